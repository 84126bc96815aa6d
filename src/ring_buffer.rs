//! Pre-allocated ring of event slots
//!
//! The ring never reallocates: every slot is constructed up front and
//! events are mutated in place. The slot for sequence `s` is
//! `s & (N - 1)`, so a slot is reused after every `N` further sequences.
//! All cross-thread visibility is provided by the sequencer protocol
//! (release on publish, acquire on the consumer's sequence reads), not by
//! the buffer itself.

use std::cell::UnsafeCell;

use serde::{Deserialize, Serialize};

use crate::argument_error;
use crate::constants::{DEFAULT_RING_BUFFER_SIZE, MAX_RING_BUFFER_SIZE};
use crate::error::Result;
use crate::wait_strategy::WaitStrategyKind;

/// Check a requested slot count against the engine's constraints
pub(crate) fn validate_buffer_size(size: usize) -> Result<()> {
    if size == 0 || !size.is_power_of_two() {
        return Err(argument_error!(
            "ring buffer size must be a power of 2, got {}",
            size
        ));
    }
    if size > MAX_RING_BUFFER_SIZE {
        return Err(argument_error!(
            "ring buffer size {} exceeds the maximum of {}",
            size,
            MAX_RING_BUFFER_SIZE
        ));
    }
    Ok(())
}

/// Producer cardinality of an engine instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProducerKind {
    /// Exactly one producing thread
    Single,
    /// Any number of producing threads
    Multi,
}

/// Construction-time configuration for an engine instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingBufferConfig {
    /// Number of slots (must be a power of 2)
    pub size: usize,
    /// Producer cardinality
    pub producer: ProducerKind,
    /// Wait strategy for consumers
    pub wait_strategy: WaitStrategyKind,
}

impl Default for RingBufferConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_RING_BUFFER_SIZE,
            producer: ProducerKind::Single,
            wait_strategy: WaitStrategyKind::BusySpin,
        }
    }
}

impl RingBufferConfig {
    /// Create a configuration with the specified slot count
    pub fn new(size: usize) -> Result<Self> {
        validate_buffer_size(size)?;
        Ok(Self {
            size,
            ..Default::default()
        })
    }

    /// Set the producer cardinality
    pub fn with_producer(mut self, producer: ProducerKind) -> Self {
        self.producer = producer;
        self
    }

    /// Set the wait strategy
    pub fn with_wait_strategy(mut self, wait_strategy: WaitStrategyKind) -> Self {
        self.wait_strategy = wait_strategy;
        self
    }
}

/// Fixed array of event slots addressed by sequence number.
///
/// The buffer owns its slots; producers and consumers receive references
/// whose validity is guaranteed by the sequencing protocol:
///
/// - a producer may mutate a slot only between claiming its sequence and
///   publishing it
/// - a consumer may read a slot only for published sequences it has not
///   yet released, and must not retain the reference past the end of
///   `on_event` (the slot is reused after `N` further sequences)
pub struct RingBuffer<E> {
    slots: Box<[UnsafeCell<E>]>,
    index_mask: i64,
}

// SAFETY: slots are plain memory; exclusive access to each slot is
// enforced by the sequencer protocol (a slot is never written while a
// consumer may read it, because claims gate on consumer progress).
unsafe impl<E: Send> Send for RingBuffer<E> {}
unsafe impl<E: Send + Sync> Sync for RingBuffer<E> {}

impl<E: Default> RingBuffer<E> {
    /// Create a ring of `size` default-constructed slots
    pub fn new(size: usize) -> Result<Self> {
        Self::with_factory(size, |_| E::default())
    }
}

impl<E: Clone> RingBuffer<E> {
    /// Create a ring whose slots all start as clones of `value`
    pub fn filled(size: usize, value: E) -> Result<Self> {
        Self::with_factory(size, |_| value.clone())
    }
}

impl<E> RingBuffer<E> {
    /// Create a ring whose slots are produced by `factory`, called once
    /// per slot index
    pub fn with_factory(size: usize, mut factory: impl FnMut(usize) -> E) -> Result<Self> {
        validate_buffer_size(size)?;
        let slots = (0..size)
            .map(|index| UnsafeCell::new(factory(index)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ok(Self {
            slots,
            index_mask: (size - 1) as i64,
        })
    }

    /// Number of slots
    pub fn buffer_size(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn index(&self, sequence: i64) -> usize {
        (sequence & self.index_mask) as usize
    }

    /// Read the slot for a published sequence.
    ///
    /// The caller must hold the sequence inside its barrier's published
    /// window; the sequencer protocol then guarantees no producer is
    /// writing this slot.
    #[inline]
    pub fn get(&self, sequence: i64) -> &E {
        unsafe { &*self.slots[self.index(sequence)].get() }
    }

    /// Mutable access to the slot for a sequence.
    ///
    /// # Safety
    ///
    /// The caller must have exclusive access to the sequence: either a
    /// producer that has claimed it and not yet published it, or the
    /// single consumer currently processing it. Two live references to
    /// the same slot are undefined behavior.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut(&self, sequence: i64) -> &mut E {
        &mut *self.slots[self.index(sequence)].get()
    }
}
