//! Single-producer sequencer
//!
//! One producing thread means claims never contend: the claim cursor and
//! the cached gating minimum live in producer-private cells, and the
//! shared cursor is only touched by `publish`. Because sequences are
//! produced contiguously, the published cursor alone tells consumers
//! exactly what is safe to read.

use std::sync::Arc;
use std::thread;

use crate::argument_error;
use crate::barrier::SequenceBarrier;
use crate::error::{Result, SurgeError};
use crate::ring_buffer::validate_buffer_size;
use crate::sequence::Sequence;
use crate::sequencer::{GatingSequences, Sequencer};
use crate::wait_strategy::WaitStrategy;

/// Sequencer for exactly one producing thread.
///
/// `next`/`try_next`/`publish`/`claim` must all be driven from the same
/// thread; every other operation is safe to call from anywhere.
pub struct SingleProducerSequencer {
    /// Highest published sequence, shared with consumers
    cursor: Arc<Sequence>,
    wait_strategy: Arc<dyn WaitStrategy>,
    gating: GatingSequences,
    /// Highest claimed sequence. Producer-private; relaxed accesses only.
    next_value: Sequence,
    /// Cached minimum of the gating sequences. Producer-private.
    cached_gating: Sequence,
    buffer_size: usize,
}

impl SingleProducerSequencer {
    /// Create a sequencer for a ring of `buffer_size` slots.
    ///
    /// Fails with `InvalidArgument` unless `buffer_size` is a power of
    /// two within the supported range.
    pub fn new(buffer_size: usize, wait_strategy: Arc<dyn WaitStrategy>) -> Result<Self> {
        validate_buffer_size(buffer_size)?;
        Ok(Self {
            cursor: Arc::new(Sequence::default()),
            wait_strategy,
            gating: GatingSequences::new(),
            next_value: Sequence::default(),
            cached_gating: Sequence::default(),
            buffer_size,
        })
    }

    /// Create a barrier for a consumer of this sequencer.
    ///
    /// `dependents` are the progress sequences of upstream consumers;
    /// empty means the consumer tracks the cursor directly. Call as
    /// `sequencer.clone().new_barrier(..)` to keep the handle.
    pub fn new_barrier(self: Arc<Self>, dependents: &[Arc<Sequence>]) -> SequenceBarrier {
        SequenceBarrier::new(self as Arc<dyn Sequencer>, dependents.to_vec())
    }
}

impl Sequencer for SingleProducerSequencer {
    fn next_n(&self, n: i64) -> Result<i64> {
        if n < 1 {
            return Err(argument_error!("claim count must be at least 1, got {}", n));
        }

        let next_value = self.next_value.get_relaxed();
        let next_sequence = next_value + n;
        let wrap_point = next_sequence - self.buffer_size as i64;
        let cached_gating = self.cached_gating.get_relaxed();

        // The cache is also stale after claim() rewound the cursor.
        if wrap_point > cached_gating || cached_gating > next_value {
            let mut minimum;
            loop {
                minimum = self.gating.minimum(next_value);
                if wrap_point <= minimum {
                    break;
                }
                thread::yield_now();
            }
            self.cached_gating.set_relaxed(minimum);
        }

        self.next_value.set_relaxed(next_sequence);
        Ok(next_sequence)
    }

    fn try_next_n(&self, n: i64) -> Result<i64> {
        if n < 1 {
            return Err(argument_error!("claim count must be at least 1, got {}", n));
        }
        if !self.has_available_capacity(n) {
            return Err(SurgeError::InsufficientCapacity);
        }

        let next_sequence = self.next_value.get_relaxed() + n;
        self.next_value.set_relaxed(next_sequence);
        Ok(next_sequence)
    }

    fn publish(&self, sequence: i64) {
        self.cursor.set(sequence);
        self.wait_strategy.signal_all_when_blocking();
    }

    fn publish_range(&self, _lo: i64, hi: i64) {
        // A single producer fills slots contiguously, so publishing the
        // high end publishes everything below it.
        self.publish(hi);
    }

    fn claim(&self, sequence: i64) {
        self.next_value.set_relaxed(sequence);
    }

    fn is_available(&self, sequence: i64) -> bool {
        sequence <= self.cursor.get()
    }

    fn get_highest_published_sequence(&self, _lower_bound: i64, available_sequence: i64) -> i64 {
        // Contiguous publication: everything at or below the cursor is
        // ready.
        available_sequence
    }

    fn remaining_capacity(&self) -> i64 {
        let next_value = self.next_value.get_relaxed();
        let consumed = self.gating.minimum(next_value);
        self.buffer_size as i64 - (next_value - consumed)
    }

    fn has_available_capacity(&self, required_capacity: i64) -> bool {
        let next_value = self.next_value.get_relaxed();
        let wrap_point = (next_value + required_capacity) - self.buffer_size as i64;
        let cached_gating = self.cached_gating.get_relaxed();

        if wrap_point > cached_gating || cached_gating > next_value {
            let minimum = self.gating.minimum(next_value);
            self.cached_gating.set_relaxed(minimum);
            if wrap_point > minimum {
                return false;
            }
        }
        true
    }

    fn get_cursor(&self) -> i64 {
        self.cursor.get()
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn add_gating_sequences(&self, sequences: &[Arc<Sequence>]) {
        self.gating.add(self.cursor.get(), sequences);
    }

    fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool {
        self.gating.remove(sequence)
    }

    fn get_minimum_sequence(&self) -> i64 {
        self.gating.minimum(self.cursor.get())
    }

    fn cursor_sequence(&self) -> Arc<Sequence> {
        self.cursor.clone()
    }

    fn wait_strategy(&self) -> Arc<dyn WaitStrategy> {
        self.wait_strategy.clone()
    }
}
