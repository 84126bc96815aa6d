//! Surge - Lock-free in-process messaging engine
//!
//! Surge moves events between threads through a bounded, pre-allocated
//! ring of slots coordinated by monotonic sequence numbers, in the LMAX
//! Disruptor style:
//!
//! - **Pre-allocated slots**: events are mutated in place, never moved
//! - **Lock-free coordination**: producers and consumers synchronize
//!   through release/acquire sequence counters, not per-message locks
//! - **Single- and multi-producer** sequencing disciplines
//! - **Wait strategies**: busy-spin, yielding, sleeping, blocking, lite
//!   blocking, timeout, and phased backoff trade latency against CPU
//! - **Batch consumption**: consumers drain every published event per
//!   wakeup, with an end-of-batch marker for deferred flushes
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use surge::{
//!     BatchEventProcessor, EventHandler, HandlerError, RingBuffer,
//!     Sequencer, SingleProducerSequencer, WaitStrategyFactory,
//! };
//!
//! struct Printer;
//!
//! impl EventHandler<u64> for Printer {
//!     fn on_event(
//!         &mut self,
//!         event: &mut u64,
//!         sequence: i64,
//!         end_of_batch: bool,
//!     ) -> Result<(), HandlerError> {
//!         println!("event {} at sequence {} (end: {})", event, sequence, end_of_batch);
//!         Ok(())
//!     }
//! }
//!
//! let sequencer =
//!     Arc::new(SingleProducerSequencer::new(1024, WaitStrategyFactory::balanced())?);
//! let buffer = Arc::new(RingBuffer::<u64>::new(1024)?);
//!
//! let mut processor =
//!     BatchEventProcessor::new(buffer.clone(), sequencer.clone().new_barrier(&[]), Printer);
//! sequencer.add_gating_sequences(&[processor.sequence()]);
//! let handle = processor.handle();
//! let consumer = std::thread::spawn(move || processor.run());
//!
//! let sequence = sequencer.next()?;
//! // SAFETY: the sequence was claimed above and is not yet published.
//! unsafe { *buffer.get_mut(sequence) = 42 };
//! sequencer.publish(sequence);
//!
//! // Wait for the consumer to drain the event, then stop it.
//! while handle.sequence().get() < sequence {
//!     std::thread::yield_now();
//! }
//! handle.halt();
//! consumer.join().unwrap()?;
//! # Ok::<(), surge::SurgeError>(())
//! ```

pub mod barrier;
pub mod constants;
pub mod error;
pub mod handler;
pub mod processor;
pub mod ring_buffer;
pub mod sequence;
pub mod sequencer;
pub mod wait_strategy;

// Re-export main components
pub use barrier::{AlertFlag, SequenceBarrier};
pub use error::{Result, SurgeError};
pub use handler::{EventHandler, HandlerError};
pub use processor::{BatchEventProcessor, ProcessorHandle};
pub use ring_buffer::{ProducerKind, RingBuffer, RingBufferConfig};
pub use sequence::{Sequence, SequenceGroup};
pub use sequencer::{
    create_sequencer, MultiProducerSequencer, Sequencer, SingleProducerSequencer,
};
pub use wait_strategy::{WaitStrategy, WaitStrategyFactory, WaitStrategyKind};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_config_drives_sequencer_construction() {
        let config = RingBufferConfig::new(1024)
            .unwrap()
            .with_producer(ProducerKind::Multi)
            .with_wait_strategy(WaitStrategyKind::Yielding);

        let sequencer = create_sequencer(&config).unwrap();
        assert_eq!(sequencer.buffer_size(), 1024);
        assert_eq!(sequencer.get_cursor(), Sequence::INITIAL_VALUE);
    }

    #[test]
    fn test_publish_then_available_round_trip() {
        let sequencer = Arc::new(
            SingleProducerSequencer::new(64, WaitStrategyFactory::low_latency()).unwrap(),
        );
        let buffer = Arc::new(RingBuffer::<u64>::new(64).unwrap());

        let sequence = sequencer.next().unwrap();
        unsafe {
            *buffer.get_mut(sequence) = 7;
        }
        sequencer.publish(sequence);

        assert!(sequencer.is_available(sequence));
        assert_eq!(*buffer.get(sequence), 7);
    }

    #[test]
    fn test_barrier_sees_published_wavefront() {
        let config = RingBufferConfig::new(16).unwrap();
        let sequencer = create_sequencer(&config).unwrap();
        let barrier = SequenceBarrier::new(sequencer.clone(), Vec::new());

        let hi = sequencer.next_n(4).unwrap();
        sequencer.publish_range(hi - 3, hi);

        assert_eq!(barrier.wait_for(0).unwrap(), 3);
    }
}
