//! Sequence counters and fixed sequence groups
//!
//! `Sequence` is the shared progress counter used throughout the engine:
//! producer cursors, consumer progress, and gating references are all
//! sequence cells. Each cell is padded to two cache lines so that a hot
//! counter never shares a line with other mutable state.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use static_assertions::const_assert_eq;

use crate::constants::SEQUENCE_PADDING;

/// Cache-line padded sequence counter.
///
/// False sharing occurs when two threads update different variables that
/// land on the same cache line. Producer and consumer sequences are the
/// hottest words in the engine, so each one is padded out to
/// `SEQUENCE_PADDING` bytes and aligned to the same boundary.
#[repr(align(128))]
pub struct Sequence {
    value: AtomicI64,
    _padding: [u8; SEQUENCE_PADDING - 8],
}

const_assert_eq!(std::mem::size_of::<Sequence>(), SEQUENCE_PADDING);

impl Sequence {
    /// Initial value of every sequence: one before the first valid
    /// sequence number
    pub const INITIAL_VALUE: i64 = -1;

    /// Create a sequence starting at the given value
    pub fn new(initial: i64) -> Self {
        Self {
            value: AtomicI64::new(initial),
            _padding: [0; SEQUENCE_PADDING - 8],
        }
    }

    /// Current value (acquire load)
    ///
    /// Pairs with the release store in [`Sequence::set`]: an observed value
    /// makes all writes that preceded the matching `set` visible.
    #[inline]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Publish a new value (release store)
    #[inline]
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    /// Read without ordering. Only for cells owned by a single thread,
    /// such as the single-producer sequencer's private claim cursor.
    #[inline]
    pub fn get_relaxed(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Write without ordering. See [`Sequence::get_relaxed`].
    #[inline]
    pub fn set_relaxed(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    /// Attempt to move the sequence from `expected` to `new`.
    ///
    /// Uses a weak compare-exchange: spurious failure is allowed, callers
    /// retry in a loop.
    #[inline]
    pub fn compare_and_set(&self, expected: i64, new: i64) -> bool {
        self.value
            .compare_exchange_weak(expected, new, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Atomically add one and return the new value
    #[inline]
    pub fn increment_and_get(&self) -> i64 {
        self.add_and_get(1)
    }

    /// Atomically add `increment` and return the new value (release RMW)
    #[inline]
    pub fn add_and_get(&self, increment: i64) -> i64 {
        self.value.fetch_add(increment, Ordering::Release) + increment
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new(Self::INITIAL_VALUE)
    }
}

impl std::fmt::Debug for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Sequence").field(&self.get()).finish()
    }
}

/// Minimum over a set of sequences, starting from `default`.
///
/// Returns `default` unchanged when `sequences` is empty; the result is
/// never greater than `default`.
pub fn minimum_sequence(sequences: &[Arc<Sequence>], default: i64) -> i64 {
    sequences
        .iter()
        .fold(default, |minimum, sequence| minimum.min(sequence.get()))
}

/// Fixed, non-owning view over one or more sequences.
///
/// Barriers use a group as their dependent sequence: the producer cursor
/// alone, or the progress sequences of upstream consumers. `get` returns
/// the member value directly when there is exactly one member, otherwise
/// the minimum across all members.
pub struct SequenceGroup {
    sequences: Vec<Arc<Sequence>>,
}

impl SequenceGroup {
    /// Group tracking a single sequence (typically the producer cursor)
    pub fn from_cursor(cursor: Arc<Sequence>) -> Self {
        Self {
            sequences: vec![cursor],
        }
    }

    /// Group tracking several sequences; `get` returns their minimum
    pub fn from_sequences(sequences: Vec<Arc<Sequence>>) -> Self {
        debug_assert!(!sequences.is_empty(), "sequence group must not be empty");
        Self { sequences }
    }

    /// Minimum of the member sequences
    #[inline]
    pub fn get(&self) -> i64 {
        match self.sequences.len() {
            1 => self.sequences[0].get(),
            _ => minimum_sequence(&self.sequences, i64::MAX),
        }
    }

    /// Number of member sequences
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    /// True when the group has no members
    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }
}
