//! Wait strategies for consumers trailing the published wavefront
//!
//! A wait strategy controls how a consumer waits for a target sequence to
//! become reachable. Each strategy trades latency against CPU use:
//!
//! - `BusySpinWaitStrategy` - lowest latency, burns a core
//! - `YieldingWaitStrategy` - low latency, yields after a spin budget
//! - `SleepingWaitStrategy` - lowest CPU, sleeps between polls
//! - `BlockingWaitStrategy` - condition variable, publisher signals
//! - `LiteBlockingWaitStrategy` - blocking, but publishers only lock when
//!   a waiter has advertised it is needed
//! - `TimeoutBlockingWaitStrategy` - blocking with a deadline
//! - `PhasedBackoffWaitStrategy` - spin, then yield, then fall back to
//!   another strategy
//!
//! Every strategy polls the barrier's alert flag between suspensions so
//! that `halt()` interrupts a waiting consumer promptly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::barrier::AlertFlag;
use crate::constants::{
    DEFAULT_SLEEP_INTERVAL_NS, PHASED_BACKOFF_SPIN_TRIES, SLEEPING_RETRIES, YIELDING_SPIN_TRIES,
};
use crate::error::{Result, SurgeError};
use crate::sequence::{Sequence, SequenceGroup};

/// Trait for wait strategies that determine how consumers wait for the
/// dependent sequence group to reach a target.
///
/// `wait_for` returns the observed dependent value, which may exceed
/// `sequence`. It fails with [`SurgeError::Alert`] when the barrier's
/// alert flag is raised and with [`SurgeError::Timeout`] when the
/// strategy's own deadline elapses.
pub trait WaitStrategy: Send + Sync {
    /// Wait until the dependent group reaches `sequence`, the alert flag
    /// is raised, or the strategy times out
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &SequenceGroup,
        alert: &AlertFlag,
    ) -> Result<i64>;

    /// Wake any consumer blocked inside `wait_for`. Called by publishers
    /// after moving the cursor and by `alert()`.
    fn signal_all_when_blocking(&self);
}

/// Busy spin wait strategy - lowest latency, highest CPU usage
pub struct BusySpinWaitStrategy;

impl BusySpinWaitStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BusySpinWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for BusySpinWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        _cursor: &Sequence,
        dependents: &SequenceGroup,
        alert: &AlertFlag,
    ) -> Result<i64> {
        loop {
            let available = dependents.get();
            if available >= sequence {
                return Ok(available);
            }
            alert.check()?;
            std::hint::spin_loop();
        }
    }

    fn signal_all_when_blocking(&self) {
        // No blocking threads to signal
    }
}

/// Yielding wait strategy - spins for a budget, then yields the OS thread
/// on every further iteration
pub struct YieldingWaitStrategy {
    spin_tries: u32,
}

impl YieldingWaitStrategy {
    pub fn new() -> Self {
        Self {
            spin_tries: YIELDING_SPIN_TRIES,
        }
    }

    /// Create a yielding strategy with a custom spin budget
    pub fn with_spin_tries(spin_tries: u32) -> Self {
        Self { spin_tries }
    }
}

impl Default for YieldingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for YieldingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        _cursor: &Sequence,
        dependents: &SequenceGroup,
        alert: &AlertFlag,
    ) -> Result<i64> {
        let mut counter = self.spin_tries;
        loop {
            let available = dependents.get();
            if available >= sequence {
                return Ok(available);
            }
            alert.check()?;
            if counter == 0 {
                thread::yield_now();
            } else {
                counter -= 1;
                std::hint::spin_loop();
            }
        }
    }

    fn signal_all_when_blocking(&self) {
        // No blocking threads to signal
    }
}

/// Sleeping wait strategy - spins briefly, yields briefly, then sleeps a
/// tiny interval between polls. Lowest CPU usage, highest latency.
pub struct SleepingWaitStrategy {
    retries: u32,
    sleep_interval: Duration,
}

impl SleepingWaitStrategy {
    pub fn new() -> Self {
        Self::with_interval(Duration::from_nanos(DEFAULT_SLEEP_INTERVAL_NS))
    }

    /// Create a sleeping strategy with a custom sleep interval
    pub fn with_interval(sleep_interval: Duration) -> Self {
        Self {
            retries: SLEEPING_RETRIES,
            sleep_interval,
        }
    }
}

impl Default for SleepingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for SleepingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        _cursor: &Sequence,
        dependents: &SequenceGroup,
        alert: &AlertFlag,
    ) -> Result<i64> {
        let mut counter = self.retries;
        loop {
            let available = dependents.get();
            if available >= sequence {
                return Ok(available);
            }
            alert.check()?;
            if counter > self.retries / 2 {
                counter -= 1;
                std::hint::spin_loop();
            } else if counter > 0 {
                counter -= 1;
                thread::yield_now();
            } else {
                thread::sleep(self.sleep_interval);
            }
        }
    }

    fn signal_all_when_blocking(&self) {
        // Sleeping threads wake up on their own
    }
}

/// Blocking wait strategy - mutex + condition variable.
///
/// Publishers take the lock and notify on every publish, so wakeup is
/// guaranteed at the cost of publisher-side lock acquisition. Once the
/// cursor has reached the target, the dependent group is polled without
/// blocking (upstream consumers are expected to be close behind).
pub struct BlockingWaitStrategy {
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl BlockingWaitStrategy {
    pub fn new() -> Self {
        Self {
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }
}

impl Default for BlockingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for BlockingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &SequenceGroup,
        alert: &AlertFlag,
    ) -> Result<i64> {
        if cursor.get() < sequence {
            let mut guard = self.mutex.lock();
            while cursor.get() < sequence {
                alert.check()?;
                self.condvar.wait(&mut guard);
            }
        }

        loop {
            let available = dependents.get();
            if available >= sequence {
                return Ok(available);
            }
            alert.check()?;
            std::hint::spin_loop();
        }
    }

    fn signal_all_when_blocking(&self) {
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }
}

/// Lite blocking wait strategy.
///
/// Same shape as [`BlockingWaitStrategy`], but publishers only acquire the
/// lock and notify when a waiter has advertised that signalling is needed.
/// The waiter sets the flag before every suspension; the publisher clears
/// it when it signals.
pub struct LiteBlockingWaitStrategy {
    mutex: Mutex<()>,
    condvar: Condvar,
    signal_needed: AtomicBool,
}

impl LiteBlockingWaitStrategy {
    pub fn new() -> Self {
        Self {
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
            signal_needed: AtomicBool::new(false),
        }
    }
}

impl Default for LiteBlockingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for LiteBlockingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &SequenceGroup,
        alert: &AlertFlag,
    ) -> Result<i64> {
        if cursor.get() < sequence {
            let mut guard = self.mutex.lock();
            loop {
                self.signal_needed.store(true, Ordering::Release);
                if cursor.get() >= sequence {
                    break;
                }
                alert.check()?;
                self.condvar.wait(&mut guard);
                if cursor.get() >= sequence {
                    break;
                }
            }
        }

        loop {
            let available = dependents.get();
            if available >= sequence {
                return Ok(available);
            }
            alert.check()?;
            std::hint::spin_loop();
        }
    }

    fn signal_all_when_blocking(&self) {
        if self.signal_needed.swap(false, Ordering::AcqRel) {
            let _guard = self.mutex.lock();
            self.condvar.notify_all();
        }
    }
}

/// Timeout blocking wait strategy - as blocking, but every condition wait
/// carries a deadline; fails with [`SurgeError::Timeout`] when it elapses.
pub struct TimeoutBlockingWaitStrategy {
    mutex: Mutex<()>,
    condvar: Condvar,
    timeout: Duration,
}

impl TimeoutBlockingWaitStrategy {
    pub fn new(timeout: Duration) -> Self {
        Self {
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
            timeout,
        }
    }

    /// The configured per-wait deadline
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl WaitStrategy for TimeoutBlockingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &SequenceGroup,
        alert: &AlertFlag,
    ) -> Result<i64> {
        if cursor.get() < sequence {
            let mut guard = self.mutex.lock();
            while cursor.get() < sequence {
                alert.check()?;
                if self.condvar.wait_for(&mut guard, self.timeout).timed_out() {
                    return Err(SurgeError::Timeout);
                }
            }
        }

        loop {
            let available = dependents.get();
            if available >= sequence {
                return Ok(available);
            }
            alert.check()?;
            std::hint::spin_loop();
        }
    }

    fn signal_all_when_blocking(&self) {
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }
}

/// Phased backoff wait strategy.
///
/// Spins for `PHASED_BACKOFF_SPIN_TRIES` iterations at a time. Once the
/// target has stayed unreached past `spin_timeout`, each exhausted spin
/// budget yields the thread; past `yield_timeout`, the wait is delegated
/// to the fallback strategy for the remainder.
pub struct PhasedBackoffWaitStrategy {
    spin_timeout: Duration,
    yield_timeout: Duration,
    fallback: Box<dyn WaitStrategy>,
}

impl PhasedBackoffWaitStrategy {
    pub fn new(
        spin_timeout: Duration,
        yield_timeout: Duration,
        fallback: Box<dyn WaitStrategy>,
    ) -> Self {
        Self {
            spin_timeout,
            // The yield phase runs after the spin phase
            yield_timeout: spin_timeout + yield_timeout,
            fallback,
        }
    }

    /// Phased backoff falling back to a condition-variable wait
    pub fn with_lock(spin_timeout: Duration, yield_timeout: Duration) -> Self {
        Self::new(
            spin_timeout,
            yield_timeout,
            Box::new(BlockingWaitStrategy::new()),
        )
    }

    /// Phased backoff falling back to sleeping polls
    pub fn with_sleep(spin_timeout: Duration, yield_timeout: Duration) -> Self {
        Self::new(
            spin_timeout,
            yield_timeout,
            Box::new(SleepingWaitStrategy::new()),
        )
    }
}

impl WaitStrategy for PhasedBackoffWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &SequenceGroup,
        alert: &AlertFlag,
    ) -> Result<i64> {
        let mut counter = PHASED_BACKOFF_SPIN_TRIES;
        let mut start_time: Option<Instant> = None;

        loop {
            let available = dependents.get();
            if available >= sequence {
                return Ok(available);
            }

            counter -= 1;
            if counter == 0 {
                alert.check()?;
                match start_time {
                    None => start_time = Some(Instant::now()),
                    Some(started) => {
                        let elapsed = started.elapsed();
                        if elapsed > self.yield_timeout {
                            return self.fallback.wait_for(sequence, cursor, dependents, alert);
                        }
                        if elapsed > self.spin_timeout {
                            thread::yield_now();
                        }
                    }
                }
                counter = PHASED_BACKOFF_SPIN_TRIES;
            }
        }
    }

    fn signal_all_when_blocking(&self) {
        self.fallback.signal_all_when_blocking();
    }
}

/// Wait strategies selectable by construction-time configuration.
///
/// Strategies that carry parameters (timeout, phased backoff) are built
/// through the dedicated [`WaitStrategyFactory`] helpers instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitStrategyKind {
    /// Block on a condition variable; publishers always signal
    Blocking,
    /// Block, but publishers signal only when a waiter needs it
    LiteBlocking,
    /// Busy spin for lowest latency
    BusySpin,
    /// Spin then yield for balanced performance
    Yielding,
    /// Spin, yield, then sleep for lowest CPU usage
    Sleeping,
}

/// Factory for creating wait strategies
pub struct WaitStrategyFactory;

impl WaitStrategyFactory {
    /// Create a wait strategy from the given kind
    pub fn create_strategy(kind: WaitStrategyKind) -> Arc<dyn WaitStrategy> {
        match kind {
            WaitStrategyKind::Blocking => Arc::new(BlockingWaitStrategy::new()),
            WaitStrategyKind::LiteBlocking => Arc::new(LiteBlockingWaitStrategy::new()),
            WaitStrategyKind::BusySpin => Arc::new(BusySpinWaitStrategy::new()),
            WaitStrategyKind::Yielding => Arc::new(YieldingWaitStrategy::new()),
            WaitStrategyKind::Sleeping => Arc::new(SleepingWaitStrategy::new()),
        }
    }

    /// Create a blocking strategy whose condition waits carry a deadline
    pub fn with_timeout(timeout: Duration) -> Arc<dyn WaitStrategy> {
        Arc::new(TimeoutBlockingWaitStrategy::new(timeout))
    }

    /// Create a phased backoff strategy with a blocking fallback
    pub fn phased_backoff_with_lock(
        spin_timeout: Duration,
        yield_timeout: Duration,
    ) -> Arc<dyn WaitStrategy> {
        Arc::new(PhasedBackoffWaitStrategy::with_lock(
            spin_timeout,
            yield_timeout,
        ))
    }

    /// Create a phased backoff strategy with a sleeping fallback
    pub fn phased_backoff_with_sleep(
        spin_timeout: Duration,
        yield_timeout: Duration,
    ) -> Arc<dyn WaitStrategy> {
        Arc::new(PhasedBackoffWaitStrategy::with_sleep(
            spin_timeout,
            yield_timeout,
        ))
    }

    /// High-performance strategy optimized for low latency
    pub fn low_latency() -> Arc<dyn WaitStrategy> {
        Arc::new(BusySpinWaitStrategy::new())
    }

    /// Balanced strategy for moderate latency and CPU usage
    pub fn balanced() -> Arc<dyn WaitStrategy> {
        Arc::new(YieldingWaitStrategy::new())
    }

    /// Low-CPU strategy for background processing
    pub fn low_cpu() -> Arc<dyn WaitStrategy> {
        Arc::new(SleepingWaitStrategy::new())
    }
}
