//! Multi-producer sequencer
//!
//! Claims are contended through a CAS loop on the shared cursor, so the
//! cursor tracks the highest *claimed* sequence and says nothing about
//! what has been written. Publication is tracked per slot instead: an
//! availability buffer of generation tags lets consumers detect the
//! highest contiguously published prefix even when producers commit out
//! of order.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;

use crate::argument_error;
use crate::barrier::SequenceBarrier;
use crate::error::{Result, SurgeError};
use crate::ring_buffer::validate_buffer_size;
use crate::sequence::Sequence;
use crate::sequencer::{GatingSequences, Sequencer};
use crate::wait_strategy::WaitStrategy;

/// Sequencer safe for any number of producing threads.
pub struct MultiProducerSequencer {
    /// Highest claimed sequence, contended by producers
    cursor: Arc<Sequence>,
    /// Cached minimum of the gating sequences, shared by producers
    gating_cache: Sequence,
    wait_strategy: Arc<dyn WaitStrategy>,
    gating: GatingSequences,
    /// Per-slot generation tags. Slot `i` holds `seq >> index_shift` for
    /// the last sequence published into it; -1 means never published.
    /// The generation of two sequences mapping to the same slot differs
    /// by at least one, so a stale tag can never masquerade as current,
    /// and sequences 0..N-1 (generation 0) stay invisible until actually
    /// published.
    available: Box<[AtomicI32]>,
    index_mask: i64,
    index_shift: u32,
    buffer_size: usize,
}

impl MultiProducerSequencer {
    /// Create a sequencer for a ring of `buffer_size` slots.
    ///
    /// Fails with `InvalidArgument` unless `buffer_size` is a power of
    /// two within the supported range.
    pub fn new(buffer_size: usize, wait_strategy: Arc<dyn WaitStrategy>) -> Result<Self> {
        validate_buffer_size(buffer_size)?;
        let available = (0..buffer_size)
            .map(|_| AtomicI32::new(-1))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ok(Self {
            cursor: Arc::new(Sequence::default()),
            gating_cache: Sequence::default(),
            wait_strategy,
            gating: GatingSequences::new(),
            available,
            index_mask: (buffer_size - 1) as i64,
            index_shift: buffer_size.trailing_zeros(),
            buffer_size,
        })
    }

    /// Create a barrier for a consumer of this sequencer. Call as
    /// `sequencer.clone().new_barrier(..)` to keep the handle.
    pub fn new_barrier(self: Arc<Self>, dependents: &[Arc<Sequence>]) -> SequenceBarrier {
        SequenceBarrier::new(self as Arc<dyn Sequencer>, dependents.to_vec())
    }

    #[inline]
    fn calculate_index(&self, sequence: i64) -> usize {
        (sequence & self.index_mask) as usize
    }

    #[inline]
    fn calculate_availability_flag(&self, sequence: i64) -> i32 {
        (sequence >> self.index_shift) as i32
    }

    fn set_available(&self, sequence: i64) {
        let index = self.calculate_index(sequence);
        let flag = self.calculate_availability_flag(sequence);
        self.available[index].store(flag, Ordering::Release);
    }

    fn has_available_capacity_from(&self, required_capacity: i64, cursor_value: i64) -> bool {
        let wrap_point = (cursor_value + required_capacity) - self.buffer_size as i64;
        let cached_gating = self.gating_cache.get();

        if wrap_point > cached_gating || cached_gating > cursor_value {
            let minimum = self.gating.minimum(cursor_value);
            self.gating_cache.set(minimum);
            if wrap_point > minimum {
                return false;
            }
        }
        true
    }
}

impl Sequencer for MultiProducerSequencer {
    fn next_n(&self, n: i64) -> Result<i64> {
        if n < 1 {
            return Err(argument_error!("claim count must be at least 1, got {}", n));
        }

        loop {
            let current = self.cursor.get();
            let next = current + n;
            let wrap_point = next - self.buffer_size as i64;
            let cached_gating = self.gating_cache.get();

            if wrap_point > cached_gating || cached_gating > current {
                let gating = self.gating.minimum(current);
                if wrap_point > gating {
                    thread::yield_now();
                    continue;
                }
                self.gating_cache.set(gating);
            } else if self.cursor.compare_and_set(current, next) {
                // The claim is reserved; the caller owns [current+1, next].
                return Ok(next);
            }
        }
    }

    fn try_next_n(&self, n: i64) -> Result<i64> {
        if n < 1 {
            return Err(argument_error!("claim count must be at least 1, got {}", n));
        }

        loop {
            let current = self.cursor.get();
            let next = current + n;
            if !self.has_available_capacity_from(n, current) {
                return Err(SurgeError::InsufficientCapacity);
            }
            if self.cursor.compare_and_set(current, next) {
                return Ok(next);
            }
        }
    }

    fn publish(&self, sequence: i64) {
        self.set_available(sequence);
        self.wait_strategy.signal_all_when_blocking();
    }

    fn publish_range(&self, lo: i64, hi: i64) {
        // Each slot is marked individually; consumers reassemble the
        // contiguous prefix through get_highest_published_sequence.
        for sequence in lo..=hi {
            self.set_available(sequence);
        }
        self.wait_strategy.signal_all_when_blocking();
    }

    fn claim(&self, sequence: i64) {
        self.cursor.set(sequence);
    }

    fn is_available(&self, sequence: i64) -> bool {
        let index = self.calculate_index(sequence);
        let flag = self.calculate_availability_flag(sequence);
        self.available[index].load(Ordering::Acquire) == flag
    }

    fn get_highest_published_sequence(&self, lower_bound: i64, available_sequence: i64) -> i64 {
        for sequence in lower_bound..=available_sequence {
            if !self.is_available(sequence) {
                return sequence - 1;
            }
        }
        available_sequence
    }

    fn remaining_capacity(&self) -> i64 {
        let produced = self.cursor.get();
        let consumed = self.gating.minimum(produced);
        self.buffer_size as i64 - (produced - consumed)
    }

    fn has_available_capacity(&self, required_capacity: i64) -> bool {
        self.has_available_capacity_from(required_capacity, self.cursor.get())
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait_strategy::WaitStrategyFactory;
    use proptest::prelude::*;

    const BUFFER_SIZE: usize = 16;

    fn sequencer() -> MultiProducerSequencer {
        MultiProducerSequencer::new(BUFFER_SIZE, WaitStrategyFactory::low_latency()).unwrap()
    }

    fn with_gating() -> (MultiProducerSequencer, Arc<Sequence>) {
        let sequencer = sequencer();
        let gating = Arc::new(Sequence::default());
        sequencer.add_gating_sequences(&[gating.clone()]);
        (sequencer, gating)
    }

    #[test]
    fn test_rejects_non_power_of_two_size() {
        let result = MultiProducerSequencer::new(24, WaitStrategyFactory::low_latency());
        assert!(matches!(result, Err(SurgeError::InvalidArgument { .. })));
    }

    #[test]
    fn test_should_start_with_initial_value() {
        assert_eq!(sequencer().next().unwrap(), 0);
    }

    #[test]
    fn test_should_batch_claim() {
        assert_eq!(sequencer().next_n(4).unwrap(), 3);
    }

    #[test]
    fn test_rejects_claims_below_one() {
        let sequencer = sequencer();
        assert!(matches!(
            sequencer.next_n(0),
            Err(SurgeError::InvalidArgument { .. })
        ));
        assert!(matches!(
            sequencer.try_next_n(-3),
            Err(SurgeError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_try_next_fails_when_full() {
        let (sequencer, _gating) = with_gating();
        for _ in 0..BUFFER_SIZE {
            sequencer.publish(sequencer.try_next().unwrap());
        }
        assert!(matches!(
            sequencer.try_next(),
            Err(SurgeError::InsufficientCapacity)
        ));
    }

    #[test]
    fn test_out_of_order_publish_leaves_gap() {
        let sequencer = MultiProducerSequencer::new(1024, WaitStrategyFactory::low_latency())
            .unwrap();
        sequencer.publish(3);
        sequencer.publish(5);

        let expected = [false, false, false, true, false, true, false];
        for (sequence, expected) in expected.iter().enumerate() {
            assert_eq!(
                sequencer.is_available(sequence as i64),
                *expected,
                "sequence {}",
                sequence
            );
        }
        assert_eq!(sequencer.get_highest_published_sequence(0, 5), 3);
    }

    #[test]
    fn test_nothing_available_before_first_publish() {
        let sequencer = sequencer();
        // Generation 0 must not collide with the -1 fill.
        for sequence in 0..BUFFER_SIZE as i64 {
            assert!(!sequencer.is_available(sequence));
        }
    }

    #[test]
    fn test_wrap_generation_distinguishes_slot_reuse() {
        let (sequencer, gating) = with_gating();
        sequencer.publish(0);
        assert!(sequencer.is_available(0));

        // Free the ring and publish a full generation later into the
        // same slot.
        gating.set(BUFFER_SIZE as i64 - 1);
        sequencer.claim(BUFFER_SIZE as i64 - 1);
        let reused = sequencer.next().unwrap();
        assert_eq!(reused, BUFFER_SIZE as i64);
        sequencer.publish(reused);

        assert!(sequencer.is_available(reused));
        assert!(!sequencer.is_available(0));
    }

    #[test]
    fn test_should_not_be_available_until_published() {
        let sequencer = sequencer();
        let next = sequencer.next_n(6).unwrap();
        for sequence in 0..=5 {
            assert!(!sequencer.is_available(sequence));
        }

        sequencer.publish_range(next - 5, next);
        for sequence in 0..=5 {
            assert!(sequencer.is_available(sequence));
        }
        assert!(!sequencer.is_available(6));
    }

    #[test]
    fn test_should_claim_specific_sequence() {
        let sequencer = sequencer();
        sequencer.claim(14);
        sequencer.publish(14);
        assert_eq!(sequencer.next().unwrap(), 15);
    }

    #[test]
    fn test_should_calculate_remaining_capacity() {
        let (sequencer, _gating) = with_gating();
        assert_eq!(sequencer.remaining_capacity(), BUFFER_SIZE as i64);
        sequencer.next().unwrap();
        assert_eq!(sequencer.remaining_capacity(), BUFFER_SIZE as i64 - 1);
    }

    #[test]
    fn test_concurrent_claims_are_disjoint() {
        let sequencer = Arc::new(
            MultiProducerSequencer::new(1024, WaitStrategyFactory::low_latency()).unwrap(),
        );
        let gating = Arc::new(Sequence::new(1024));
        sequencer.add_gating_sequences(&[gating.clone()]);
        gating.set(1024); // never gates for this claim volume

        let mut handles = Vec::new();
        for _ in 0..4 {
            let sequencer = sequencer.clone();
            handles.push(thread::spawn(move || {
                let mut claimed = Vec::new();
                for _ in 0..100 {
                    claimed.push(sequencer.next().unwrap());
                }
                claimed
            }));
        }

        let mut all: Vec<i64> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        all.sort_unstable();
        let expected: Vec<i64> = (0..400).collect();
        assert_eq!(all, expected);
    }

    proptest! {
        /// get_highest_published_sequence returns the end of the
        /// contiguous prefix: lo-1 <= v <= hi and every sequence in
        /// [lo, v] is available.
        #[test]
        fn prop_highest_published_bounds(published in proptest::collection::vec(any::<bool>(), 1..64)) {
            let sequencer = MultiProducerSequencer::new(
                64,
                WaitStrategyFactory::low_latency(),
            ).unwrap();

            for (sequence, publish) in published.iter().enumerate() {
                if *publish {
                    sequencer.publish(sequence as i64);
                }
            }

            let hi = published.len() as i64 - 1;
            let highest = sequencer.get_highest_published_sequence(0, hi);
            prop_assert!(highest >= -1);
            prop_assert!(highest <= hi);
            for sequence in 0..=highest {
                prop_assert!(sequencer.is_available(sequence));
            }
            if highest < hi {
                prop_assert!(!sequencer.is_available(highest + 1));
            }
        }
    }
}
