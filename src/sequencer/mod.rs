//! Sequencers: the claim/publish coordination core
//!
//! A sequencer hands out monotonically increasing sequence numbers to
//! producers, tracks which of them have been published, and gates claims
//! against consumer progress so the ring can never be overrun. Two
//! disciplines are provided:
//!
//! - [`SingleProducerSequencer`] - one producing thread, no claim
//!   contention, cursor doubles as the published high-water mark
//! - [`MultiProducerSequencer`] - CAS-contended claims plus a per-slot
//!   availability buffer so consumers only ever observe the contiguously
//!   published prefix

pub mod multi;
pub mod single;

pub use multi::MultiProducerSequencer;
pub use single::SingleProducerSequencer;

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::ring_buffer::{ProducerKind, RingBufferConfig};
use crate::sequence::{minimum_sequence, Sequence};
use crate::wait_strategy::{WaitStrategy, WaitStrategyFactory};

/// Claim/publish surface shared by both producer disciplines.
///
/// Object-safe: barriers hold `Arc<dyn Sequencer>` so chained consumers
/// never need to know which discipline is producing.
pub trait Sequencer: Send + Sync {
    /// Claim the next sequence, waiting for capacity if the ring is full
    fn next(&self) -> Result<i64> {
        self.next_n(1)
    }

    /// Claim the next `n` sequences, waiting for capacity if needed.
    /// Returns the highest claimed sequence. Fails with
    /// `InvalidArgument` when `n < 1`.
    fn next_n(&self, n: i64) -> Result<i64>;

    /// Claim the next sequence without waiting. Fails with
    /// `InsufficientCapacity` when the ring is full.
    fn try_next(&self) -> Result<i64> {
        self.try_next_n(1)
    }

    /// Claim the next `n` sequences without waiting; all-or-nothing
    fn try_next_n(&self, n: i64) -> Result<i64>;

    /// Publish a claimed sequence, making its slot visible to consumers
    fn publish(&self, sequence: i64);

    /// Publish the claimed range `[lo, hi]`
    fn publish_range(&self, lo: i64, hi: i64);

    /// Move the claim cursor directly. Testing utility; not safe once
    /// events have been published.
    fn claim(&self, sequence: i64);

    /// True when `sequence` has been published
    fn is_available(&self, sequence: i64) -> bool;

    /// Highest sequence in `[lower_bound, available_sequence]` such that
    /// every sequence up to it has been published
    fn get_highest_published_sequence(&self, lower_bound: i64, available_sequence: i64) -> i64;

    /// Slots not yet claimed ahead of the slowest gating sequence
    fn remaining_capacity(&self) -> i64;

    /// True when `required_capacity` more sequences could be claimed
    /// right now. Purely informational; the answer may be stale by the
    /// time the caller acts on it.
    fn has_available_capacity(&self, required_capacity: i64) -> bool;

    /// Current cursor value
    fn get_cursor(&self) -> i64;

    /// Number of slots in the ring this sequencer coordinates
    fn buffer_size(&self) -> usize;

    /// Register consumer progress sequences the claim path must not
    /// overrun. Intended for wiring before the first publish; see the
    /// gating notes on [`GatingSequences`].
    fn add_gating_sequences(&self, sequences: &[Arc<Sequence>]);

    /// Remove a gating sequence; returns true when it was registered
    fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool;

    /// Minimum of the gating sequences, or the cursor when none are
    /// registered
    fn get_minimum_sequence(&self) -> i64;

    /// The cursor cell itself, for barriers and groups
    fn cursor_sequence(&self) -> Arc<Sequence>;

    /// The wait strategy publishers signal through
    fn wait_strategy(&self) -> Arc<dyn WaitStrategy>;
}

/// Registry of consumer progress sequences consulted by the claim path.
///
/// The list sits behind a lock so registration cannot tear, but the
/// engine's overrun guarantee only covers sequences registered before the
/// first publish: a producer may already have claimed slots against the
/// previous minimum when a late registration lands.
pub(crate) struct GatingSequences {
    sequences: RwLock<Vec<Arc<Sequence>>>,
}

impl GatingSequences {
    pub(crate) fn new() -> Self {
        Self {
            sequences: RwLock::new(Vec::new()),
        }
    }

    /// Add sequences, initializing each to the current cursor value
    pub(crate) fn add(&self, cursor_value: i64, to_add: &[Arc<Sequence>]) {
        let mut sequences = self.sequences.write();
        for sequence in to_add {
            sequence.set(cursor_value);
            sequences.push(sequence.clone());
        }
    }

    /// Remove a sequence by identity
    pub(crate) fn remove(&self, to_remove: &Arc<Sequence>) -> bool {
        let mut sequences = self.sequences.write();
        let before = sequences.len();
        sequences.retain(|sequence| !Arc::ptr_eq(sequence, to_remove));
        sequences.len() != before
    }

    /// Minimum of the registered sequences, capped at `default`
    pub(crate) fn minimum(&self, default: i64) -> i64 {
        minimum_sequence(&self.sequences.read(), default)
    }
}

/// Build the sequencer described by a ring buffer configuration
pub fn create_sequencer(config: &RingBufferConfig) -> Result<Arc<dyn Sequencer>> {
    let wait_strategy = WaitStrategyFactory::create_strategy(config.wait_strategy);
    Ok(match config.producer {
        ProducerKind::Single => {
            Arc::new(SingleProducerSequencer::new(config.size, wait_strategy)?)
        }
        ProducerKind::Multi => Arc::new(MultiProducerSequencer::new(config.size, wait_strategy)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gating_registry_add_initializes_to_cursor() {
        let gating = GatingSequences::new();
        let consumer = Arc::new(Sequence::default());
        gating.add(41, &[consumer.clone()]);
        assert_eq!(consumer.get(), 41);
        assert_eq!(gating.minimum(i64::MAX), 41);
    }

    #[test]
    fn test_gating_registry_remove_by_identity() {
        let gating = GatingSequences::new();
        let a = Arc::new(Sequence::new(3));
        let b = Arc::new(Sequence::new(3));
        gating.add(-1, &[a.clone(), b.clone()]);

        assert!(gating.remove(&a));
        assert!(!gating.remove(&a));
        assert!(gating.remove(&b));
        assert_eq!(gating.minimum(99), 99);
    }

    #[test]
    fn test_create_sequencer_honors_producer_kind() {
        let single = RingBufferConfig::new(64).unwrap();
        assert_eq!(create_sequencer(&single).unwrap().remaining_capacity(), 64);

        let multi = RingBufferConfig::new(64)
            .unwrap()
            .with_producer(ProducerKind::Multi);
        let sequencer = create_sequencer(&multi).unwrap();
        assert_eq!(sequencer.remaining_capacity(), 64);
        // Multi-producer availability starts empty.
        assert!(!sequencer.is_available(0));
    }
}
