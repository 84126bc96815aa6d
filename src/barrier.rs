//! Sequence barriers: the per-consumer view of the published wavefront
//!
//! A barrier combines the sequencer's cursor, the consumer's dependent
//! sequence group, the shared wait strategy, and an alert flag into the
//! single `wait_for` call the batch event processor loops on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, SurgeError};
use crate::sequence::{Sequence, SequenceGroup};
use crate::sequencer::Sequencer;
use crate::wait_strategy::WaitStrategy;

/// Cooperative cancellation flag shared between a barrier and the wait
/// strategies suspending on it.
///
/// This is the only cancellation mechanism in the engine: `halt()` raises
/// it, strategies poll it between suspensions, and pending waits fail with
/// [`SurgeError::Alert`] on the next wakeup or iteration.
pub struct AlertFlag {
    raised: AtomicBool,
}

impl AlertFlag {
    pub fn new() -> Self {
        Self {
            raised: AtomicBool::new(false),
        }
    }

    /// Raise the flag
    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
    }

    /// Clear the flag
    pub fn clear(&self) {
        self.raised.store(false, Ordering::Release);
    }

    /// True when the flag is raised
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    /// Fail with [`SurgeError::Alert`] when the flag is raised
    #[inline]
    pub fn check(&self) -> Result<()> {
        if self.is_raised() {
            return Err(SurgeError::Alert);
        }
        Ok(())
    }
}

impl Default for AlertFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Coordination barrier between a consumer and the sequences it must
/// trail: the cursor when the consumer is first in line, or the progress
/// sequences of upstream consumers.
pub struct SequenceBarrier {
    sequencer: Arc<dyn Sequencer>,
    wait_strategy: Arc<dyn WaitStrategy>,
    cursor: Arc<Sequence>,
    dependents: SequenceGroup,
    alert: AlertFlag,
}

impl SequenceBarrier {
    /// Create a barrier over the given sequencer.
    ///
    /// With an empty `dependents` list the barrier tracks the sequencer's
    /// cursor directly; otherwise it tracks the minimum of the dependent
    /// sequences.
    pub fn new(sequencer: Arc<dyn Sequencer>, dependents: Vec<Arc<Sequence>>) -> Self {
        let cursor = sequencer.cursor_sequence();
        let wait_strategy = sequencer.wait_strategy();
        let dependents = if dependents.is_empty() {
            SequenceGroup::from_cursor(cursor.clone())
        } else {
            SequenceGroup::from_sequences(dependents)
        };
        Self {
            sequencer,
            wait_strategy,
            cursor,
            dependents,
            alert: AlertFlag::new(),
        }
    }

    /// Wait until `sequence` is reachable and return the highest sequence
    /// the caller may consume.
    ///
    /// A value below `sequence` means the wait strategy gave up early and
    /// the caller should retry. A value at or above `sequence` has been
    /// reduced to the highest contiguously published sequence, so batch
    /// consumption can never observe a gap left by an out-of-order
    /// multi-producer publish.
    pub fn wait_for(&self, sequence: i64) -> Result<i64> {
        self.check_alert()?;

        let available =
            self.wait_strategy
                .wait_for(sequence, &self.cursor, &self.dependents, &self.alert)?;
        if available < sequence {
            return Ok(available);
        }
        Ok(self
            .sequencer
            .get_highest_published_sequence(sequence, available))
    }

    /// Current value of the dependent sequence group
    pub fn get_cursor(&self) -> i64 {
        self.dependents.get()
    }

    /// Raise the alert and wake any waiter blocked in the wait strategy
    pub fn alert(&self) {
        self.alert.raise();
        self.wait_strategy.signal_all_when_blocking();
    }

    /// Clear the alert flag
    pub fn clear_alert(&self) {
        self.alert.clear();
    }

    /// True when the alert flag is raised
    pub fn is_alerted(&self) -> bool {
        self.alert.is_raised()
    }

    /// Fail with [`SurgeError::Alert`] when the alert flag is raised
    pub fn check_alert(&self) -> Result<()> {
        self.alert.check()
    }
}
