//! Batch event processor: the long-running consumer loop
//!
//! A processor owns its handler, tracks its progress in a shared sequence
//! cell (which producers gate on), and loops on its barrier: wait for the
//! next batch, hand each event to the handler in order, publish progress.
//! The loop survives handler failures and timeout expirations; only
//! `halt()` stops it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::barrier::SequenceBarrier;
use crate::error::{Result, SurgeError};
use crate::handler::EventHandler;
use crate::ring_buffer::RingBuffer;
use crate::sequence::Sequence;

/// Cloneable handle for stopping a processor from another thread.
///
/// `run` borrows the processor mutably for its whole lifetime, so the
/// thread that spawned it uses a handle taken beforehand to halt it.
#[derive(Clone)]
pub struct ProcessorHandle {
    running: Arc<AtomicBool>,
    barrier: Arc<SequenceBarrier>,
    sequence: Arc<Sequence>,
}

impl ProcessorHandle {
    /// Stop the processor: clears the running flag, then alerts the
    /// barrier so any wait strategy wakes promptly.
    pub fn halt(&self) {
        self.running.store(false, Ordering::Release);
        self.barrier.alert();
    }

    /// True while the processor loop is executing
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// The processor's progress sequence, for gating and chaining
    pub fn sequence(&self) -> Arc<Sequence> {
        self.sequence.clone()
    }
}

/// Long-running consumer that drains batches from a ring buffer and
/// invokes a user-supplied [`EventHandler`].
///
/// The state machine is Idle -> Running -> Idle. A processor is not
/// restartable concurrently: a second `run` while running fails with
/// [`SurgeError::AlreadyRunning`].
pub struct BatchEventProcessor<E, H> {
    sequence: Arc<Sequence>,
    buffer: Arc<RingBuffer<E>>,
    barrier: Arc<SequenceBarrier>,
    handler: H,
    running: Arc<AtomicBool>,
}

impl<E, H: EventHandler<E>> BatchEventProcessor<E, H> {
    pub fn new(buffer: Arc<RingBuffer<E>>, barrier: SequenceBarrier, handler: H) -> Self {
        Self {
            sequence: Arc::new(Sequence::default()),
            buffer,
            barrier: Arc::new(barrier),
            handler,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The processor's progress sequence. Register it as a gating
    /// sequence on the sequencer, and as a dependent sequence on the
    /// barriers of downstream consumers.
    pub fn sequence(&self) -> Arc<Sequence> {
        self.sequence.clone()
    }

    /// Handle for halting this processor from another thread
    pub fn handle(&self) -> ProcessorHandle {
        ProcessorHandle {
            running: self.running.clone(),
            barrier: self.barrier.clone(),
            sequence: self.sequence.clone(),
        }
    }

    /// Stop the processor. Equivalent to [`ProcessorHandle::halt`].
    pub fn halt(&self) {
        self.running.store(false, Ordering::Release);
        self.barrier.alert();
    }

    /// True while the processor loop is executing
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run the consume loop on the calling thread until halted.
    ///
    /// Fails with [`SurgeError::AlreadyRunning`] when the processor is
    /// already running on another thread.
    pub fn run(&mut self) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SurgeError::AlreadyRunning);
        }

        self.barrier.clear_alert();
        tracing::debug!("batch event processor starting");
        self.notify_start();

        self.process_events();

        self.notify_shutdown();
        self.running.store(false, Ordering::Release);
        tracing::debug!(progress = self.sequence.get(), "batch event processor stopped");
        Ok(())
    }

    fn process_events(&mut self) {
        let mut next_sequence = self.sequence.get() + 1;

        'event_loop: loop {
            match self.barrier.wait_for(next_sequence) {
                Ok(available) => {
                    while next_sequence <= available {
                        let end_of_batch = next_sequence == available;
                        // SAFETY: the barrier guarantees next_sequence is
                        // published and this processor is the slot's only
                        // accessor until its progress sequence passes it.
                        let event = unsafe { self.buffer.get_mut(next_sequence) };
                        if let Err(error) = self.handler.on_event(event, next_sequence, end_of_batch)
                        {
                            tracing::warn!(
                                sequence = next_sequence,
                                "event handler failed; skipping sequence"
                            );
                            // SAFETY: as above; the previous borrow ended
                            // with the failed call.
                            let event = unsafe { self.buffer.get_mut(next_sequence) };
                            self.handler.on_event_error(error, next_sequence, Some(event));
                            self.sequence.set(next_sequence);
                            next_sequence += 1;
                            continue 'event_loop;
                        }
                        next_sequence += 1;
                    }
                    self.sequence.set(available);
                }
                Err(SurgeError::Timeout) => {
                    self.notify_timeout(self.sequence.get());
                }
                Err(SurgeError::Alert) => {
                    if !self.running.load(Ordering::Acquire) {
                        break;
                    }
                    // Transient alert without halt: clear handled by the
                    // controller that raised it; keep consuming.
                }
                Err(error) => {
                    tracing::error!(error = %error, "sequence barrier failed; stopping processor");
                    break;
                }
            }
        }
    }

    fn notify_timeout(&mut self, sequence: i64) {
        if let Err(error) = self.handler.on_timeout(sequence) {
            self.handler.on_event_error(error, sequence, None);
        }
    }

    fn notify_start(&mut self) {
        if let Err(error) = self.handler.on_start() {
            self.handler.on_start_error(error);
        }
    }

    fn notify_shutdown(&mut self) {
        if let Err(error) = self.handler.on_shutdown() {
            self.handler.on_shutdown_error(error);
        }
    }
}
