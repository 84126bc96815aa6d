//! End-to-end pipeline scenarios: producers, consumers, and barriers
//! driven from real threads.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use surge::{
    BatchEventProcessor, EventHandler, HandlerError, MultiProducerSequencer, RingBuffer,
    Sequence, Sequencer, SingleProducerSequencer, SurgeError, WaitStrategyFactory,
    WaitStrategyKind,
};

fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

fn single_sequencer(size: usize, kind: WaitStrategyKind) -> Arc<SingleProducerSequencer> {
    Arc::new(
        SingleProducerSequencer::new(size, WaitStrategyFactory::create_strategy(kind)).unwrap(),
    )
}

fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

struct CollectingHandler {
    seen: Arc<AtomicI64>,
    saw_end_of_batch: Arc<AtomicBool>,
    shutdowns: Arc<AtomicI64>,
    sum: i64,
    sum_tx: Option<mpsc::Sender<i64>>,
}

impl CollectingHandler {
    fn new() -> (Self, Arc<AtomicI64>, Arc<AtomicBool>, Arc<AtomicI64>) {
        let seen = Arc::new(AtomicI64::new(0));
        let saw_end_of_batch = Arc::new(AtomicBool::new(false));
        let shutdowns = Arc::new(AtomicI64::new(0));
        let handler = Self {
            seen: seen.clone(),
            saw_end_of_batch: saw_end_of_batch.clone(),
            shutdowns: shutdowns.clone(),
            sum: 0,
            sum_tx: None,
        };
        (handler, seen, saw_end_of_batch, shutdowns)
    }
}

impl EventHandler<i64> for CollectingHandler {
    fn on_event(
        &mut self,
        event: &mut i64,
        _sequence: i64,
        end_of_batch: bool,
    ) -> Result<(), HandlerError> {
        self.sum += *event;
        self.seen.fetch_add(1, Ordering::SeqCst);
        if end_of_batch {
            self.saw_end_of_batch.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn on_shutdown(&mut self) -> Result<(), HandlerError> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        if let Some(tx) = self.sum_tx.take() {
            let _ = tx.send(self.sum);
        }
        Ok(())
    }
}

/// Single producer, N = 16, one consumer: publish ten events, drain them
/// all, observe the end-of-batch marker.
#[test]
fn single_producer_drains_in_order() {
    init_tracing();
    let sequencer = single_sequencer(16, WaitStrategyKind::Yielding);
    let buffer = Arc::new(RingBuffer::<i64>::new(16).unwrap());

    let (mut handler, seen, saw_end_of_batch, shutdowns) = CollectingHandler::new();
    let (sum_tx, sum_rx) = mpsc::channel();
    handler.sum_tx = Some(sum_tx);

    let mut processor =
        BatchEventProcessor::new(buffer.clone(), sequencer.clone().new_barrier(&[]), handler);
    sequencer.add_gating_sequences(&[processor.sequence()]);
    let progress = processor.sequence();
    let handle = processor.handle();

    let consumer = thread::spawn(move || processor.run());

    for value in 0..10 {
        let sequence = sequencer.next().unwrap();
        unsafe {
            *buffer.get_mut(sequence) = value;
        }
        sequencer.publish(sequence);
    }

    assert!(wait_until(Duration::from_secs(5), || progress.get() == 9));
    handle.halt();
    consumer.join().unwrap().unwrap();

    assert_eq!(progress.get(), 9);
    assert_eq!(seen.load(Ordering::SeqCst), 10);
    assert!(saw_end_of_batch.load(Ordering::SeqCst));
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    assert_eq!(sum_rx.recv_timeout(Duration::from_secs(1)).unwrap(), 45);
}

/// Multi-producer, N = 1024: publishing 3 and 5 without 4 leaves the gap
/// visible through is_available, and the contiguous prefix ends at 3.
#[test]
fn multi_producer_gap_visibility() {
    let sequencer =
        MultiProducerSequencer::new(1024, WaitStrategyFactory::low_latency()).unwrap();

    sequencer.publish(3);
    sequencer.publish(5);

    let availability: Vec<bool> = (0..7).map(|seq| sequencer.is_available(seq)).collect();
    assert_eq!(
        availability,
        [false, false, false, true, false, true, false]
    );
    assert_eq!(sequencer.get_highest_published_sequence(0, 5), 3);
}

/// Single producer, N = 16, gating at -1: a full ring rejects try_next
/// until the gating sequence advances.
#[test]
fn capacity_exhaustion_and_recovery() {
    let sequencer = single_sequencer(16, WaitStrategyKind::BusySpin);
    let gating = Arc::new(Sequence::default());
    sequencer.add_gating_sequences(&[gating.clone()]);

    assert_eq!(sequencer.next_n(16).unwrap(), 15);
    assert!(matches!(
        sequencer.try_next(),
        Err(SurgeError::InsufficientCapacity)
    ));

    gating.set(0);
    assert!(sequencer.has_available_capacity(1));
}

/// Timeout-blocking strategy: with the cursor stalled at 5, wait_for(6)
/// fails with Timeout no earlier than the configured deadline.
#[test]
fn timeout_elapses_at_deadline() {
    const TIMEOUT: Duration = Duration::from_millis(500);

    let sequencer = Arc::new(
        SingleProducerSequencer::new(16, WaitStrategyFactory::with_timeout(TIMEOUT)).unwrap(),
    );
    sequencer.claim(5);
    sequencer.publish(5);
    let barrier = sequencer.clone().new_barrier(&[]);

    let started = Instant::now();
    let result = barrier.wait_for(6);
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(SurgeError::Timeout)));
    assert!(elapsed >= TIMEOUT, "timed out after only {:?}", elapsed);
}

/// A barrier over three upstream sequences at {10, 9, 10} answers
/// wait_for(9) immediately with a value >= 9.
#[test]
fn dependent_group_minimum_gates_consumer() {
    let sequencer = single_sequencer(1024, WaitStrategyKind::BusySpin);
    let upstream = vec![
        Arc::new(Sequence::new(10)),
        Arc::new(Sequence::new(9)),
        Arc::new(Sequence::new(10)),
    ];
    let barrier = sequencer.clone().new_barrier(&upstream);

    let available = barrier.wait_for(9).unwrap();
    assert!(available >= 9);
}

/// halt() while the consumer is parked in the blocking strategy: the
/// processor exits within one wakeup, on_shutdown runs exactly once, and
/// is_running turns false.
#[test]
fn halt_interrupts_blocked_consumer() {
    init_tracing();
    let sequencer = single_sequencer(16, WaitStrategyKind::Blocking);
    let buffer = Arc::new(RingBuffer::<i64>::new(16).unwrap());

    let (handler, _seen, _eob, shutdowns) = CollectingHandler::new();
    let mut processor =
        BatchEventProcessor::new(buffer, sequencer.clone().new_barrier(&[]), handler);
    sequencer.add_gating_sequences(&[processor.sequence()]);
    let handle = processor.handle();

    let (done_tx, done_rx) = mpsc::channel();
    let consumer = thread::spawn(move || {
        let result = processor.run();
        done_tx.send(()).unwrap();
        result
    });

    assert!(wait_until(Duration::from_secs(5), || handle.is_running()));
    handle.halt();

    done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("processor did not exit after halt");
    consumer.join().unwrap().unwrap();

    assert!(!handle.is_running());
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
}

/// Two chained consumers: B's barrier depends on A's progress, so B can
/// never observe a sequence A has not released.
#[test]
fn chained_consumers_preserve_ordering() {
    const COUNT: i64 = 200;

    struct OrderCheckingHandler {
        upstream: Arc<Sequence>,
        violations: Arc<AtomicI64>,
        seen: Arc<AtomicI64>,
    }

    impl EventHandler<i64> for OrderCheckingHandler {
        fn on_event(
            &mut self,
            _event: &mut i64,
            sequence: i64,
            _end_of_batch: bool,
        ) -> Result<(), HandlerError> {
            // The upstream consumer must already have released this
            // sequence.
            if self.upstream.get() < sequence {
                self.violations.fetch_add(1, Ordering::SeqCst);
            }
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    let sequencer = single_sequencer(64, WaitStrategyKind::Yielding);
    let buffer = Arc::new(RingBuffer::<i64>::new(64).unwrap());

    let (first_handler, _seen_a, _eob_a, _shutdowns_a) = CollectingHandler::new();
    let mut first =
        BatchEventProcessor::new(buffer.clone(), sequencer.clone().new_barrier(&[]), first_handler);
    let first_progress = first.sequence();
    let first_handle = first.handle();

    let violations = Arc::new(AtomicI64::new(0));
    let seen_b = Arc::new(AtomicI64::new(0));
    let mut second = BatchEventProcessor::new(
        buffer.clone(),
        sequencer.clone().new_barrier(&[first_progress.clone()]),
        OrderCheckingHandler {
            upstream: first_progress.clone(),
            violations: violations.clone(),
            seen: seen_b.clone(),
        },
    );
    let second_progress = second.sequence();
    let second_handle = second.handle();

    // Producers gate on the end of the chain.
    sequencer.add_gating_sequences(&[second.sequence()]);

    let first_thread = thread::spawn(move || first.run());
    let second_thread = thread::spawn(move || second.run());

    for value in 0..COUNT {
        let sequence = sequencer.next().unwrap();
        unsafe {
            *buffer.get_mut(sequence) = value;
        }
        sequencer.publish(sequence);
    }

    assert!(wait_until(Duration::from_secs(10), || {
        second_progress.get() == COUNT - 1
    }));

    first_handle.halt();
    second_handle.halt();
    first_thread.join().unwrap().unwrap();
    second_thread.join().unwrap().unwrap();

    assert_eq!(violations.load(Ordering::SeqCst), 0);
    assert_eq!(seen_b.load(Ordering::SeqCst), COUNT);
}

/// Multiple producers and one consumer: every claimed value arrives
/// exactly once even though producers publish out of claim order.
#[test]
fn multi_producer_single_consumer_delivers_everything() {
    const PRODUCERS: i64 = 3;
    const PER_PRODUCER: i64 = 500;
    const TOTAL: i64 = PRODUCERS * PER_PRODUCER;

    struct SummingHandler {
        sum: Arc<AtomicI64>,
        seen: Arc<AtomicI64>,
    }

    impl EventHandler<i64> for SummingHandler {
        fn on_event(
            &mut self,
            event: &mut i64,
            _sequence: i64,
            _end_of_batch: bool,
        ) -> Result<(), HandlerError> {
            self.sum.fetch_add(*event, Ordering::SeqCst);
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    let sequencer = Arc::new(
        MultiProducerSequencer::new(
            256,
            WaitStrategyFactory::create_strategy(WaitStrategyKind::Blocking),
        )
        .unwrap(),
    );
    let buffer = Arc::new(RingBuffer::<i64>::new(256).unwrap());

    let sum = Arc::new(AtomicI64::new(0));
    let seen = Arc::new(AtomicI64::new(0));
    let mut processor = BatchEventProcessor::new(
        buffer.clone(),
        sequencer.clone().new_barrier(&[]),
        SummingHandler {
            sum: sum.clone(),
            seen: seen.clone(),
        },
    );
    sequencer.add_gating_sequences(&[processor.sequence()]);
    let progress = processor.sequence();
    let handle = processor.handle();

    let consumer = thread::spawn(move || processor.run());

    let mut producers = Vec::new();
    for producer_id in 0..PRODUCERS {
        let sequencer = sequencer.clone();
        let buffer = buffer.clone();
        producers.push(thread::spawn(move || {
            for i in 0..PER_PRODUCER {
                let value = producer_id * PER_PRODUCER + i + 1;
                let sequence = sequencer.next().unwrap();
                unsafe {
                    *buffer.get_mut(sequence) = value;
                }
                sequencer.publish(sequence);
            }
        }));
    }
    for producer in producers {
        producer.join().unwrap();
    }

    assert!(wait_until(Duration::from_secs(10), || {
        progress.get() == TOTAL - 1
    }));
    handle.halt();
    consumer.join().unwrap().unwrap();

    assert_eq!(seen.load(Ordering::SeqCst), TOTAL);
    // Sum of 1..=TOTAL, so a lost or duplicated event shows up.
    assert_eq!(sum.load(Ordering::SeqCst), TOTAL * (TOTAL + 1) / 2);
}
