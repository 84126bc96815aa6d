//! Event handler capability set
//!
//! User code plugs into the engine by implementing [`EventHandler`]. The
//! batch event processor drives the handler from its own thread; handler
//! failures are reported through the error hooks and never stop the
//! pipeline.

/// Error type produced by handler callbacks. Propagated unchanged to the
/// matching error hook; never converted into an engine error.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Callbacks invoked by a batch event processor.
///
/// `on_event` receives a mutable reference into the ring; the reference
/// must not be retained past the call, because the slot is reused after
/// the ring wraps.
pub trait EventHandler<E>: Send {
    /// Called once when the processor starts, before any events
    fn on_start(&mut self) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Called once when the processor stops, after the last event
    fn on_shutdown(&mut self) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Called for each event in sequence order. `end_of_batch` is true
    /// for the last event of the current batch, so implementations can
    /// defer expensive flushes to batch boundaries.
    fn on_event(&mut self, event: &mut E, sequence: i64, end_of_batch: bool)
        -> Result<(), HandlerError>;

    /// Called when a timeout wait strategy expires with no new events.
    /// `sequence` is the processor's current progress.
    fn on_timeout(&mut self, sequence: i64) -> Result<(), HandlerError> {
        let _ = sequence;
        Ok(())
    }

    /// Called when `on_event` or `on_timeout` fails. `event` is present
    /// on the event path and absent on the timeout path. The processor
    /// advances past the failed sequence afterwards.
    fn on_event_error(&mut self, error: HandlerError, sequence: i64, event: Option<&mut E>) {
        let _ = event;
        tracing::error!(sequence, error = %error, "event handler failed");
    }

    /// Called when `on_start` fails; the processor still starts
    fn on_start_error(&mut self, error: HandlerError) {
        tracing::error!(error = %error, "event handler start hook failed");
    }

    /// Called when `on_shutdown` fails; the processor still stops
    fn on_shutdown_error(&mut self, error: HandlerError) {
        tracing::error!(error = %error, "event handler shutdown hook failed");
    }
}
