//! Stage core tests: counters, completion detection, precondition chaining and the worker pool.

use anyhow::anyhow;
use pipewalk::stage::{
    CancelToken, CompletionCheck, Pipeline, QueueError, StageError, StageHandler,
    StageOrchestrator, StageState, upstream_completed,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const GRACE: Duration = Duration::from_millis(20);
const TAKE_TIMEOUT: Duration = Duration::from_millis(20);

/// Handler backed by a closure.
struct FnHandler<F>(F);

impl<T, F> StageHandler<T> for FnHandler<F>
where
    F: Fn(T, &CancelToken) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, item: T, cancel: &CancelToken) -> anyhow::Result<()> {
        (self.0)(item, cancel)
    }
}

fn handler<T, F>(f: F) -> Arc<dyn StageHandler<T>>
where
    T: 'static,
    F: Fn(T, &CancelToken) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

fn state<T>(name: &str, capacity: usize) -> Arc<StageState<T>> {
    Arc::new(StageState::new(name, capacity, GRACE))
}

// --- StageState ---

#[test]
fn test_conservation_and_completion() {
    let stage = state::<u32>("s", 8);
    let cancel = CancelToken::new();
    for i in 0..5 {
        stage.add(i, &cancel).unwrap();
    }
    let mut outcomes = Vec::new();
    while let Some(_item) = stage.take(TAKE_TIMEOUT, &cancel).unwrap() {
        assert_eq!(stage.active_workers(), 1);
        outcomes.push(stage.commit());
        if stage.is_completed() {
            break;
        }
    }
    assert_eq!(outcomes.len(), 5);
    assert!(outcomes[..4].iter().all(|o| *o == CompletionCheck::Busy));
    assert_eq!(outcomes[4], CompletionCheck::Completed);
    assert_eq!(stage.total_taken(), 5);
    assert_eq!(stage.total_committed(), 5);
    assert_eq!(stage.active_workers(), 0);
}

#[test]
fn test_completion_fires_once() {
    let stage = state::<u32>("s", 2);
    let cancel = CancelToken::new();
    assert_eq!(stage.check_completion(), CompletionCheck::Completed);
    assert!(stage.is_completed());
    assert_eq!(stage.check_completion(), CompletionCheck::AlreadyCompleted);
    assert!(stage.is_completed());
    assert_eq!(stage.add(1, &cancel), Err(QueueError::Closed));
    assert!(stage.await_completion_timeout(Duration::from_millis(1)));
    stage.await_completion();
}

#[test]
fn test_busy_while_item_held() {
    let stage = state::<u32>("s", 2);
    let cancel = CancelToken::new();
    stage.add(1, &cancel).unwrap();
    assert_eq!(stage.check_completion(), CompletionCheck::Busy);
    let _item = stage.take(TAKE_TIMEOUT, &cancel).unwrap().unwrap();
    assert_eq!(stage.check_completion(), CompletionCheck::Busy);
    assert_eq!(stage.commit(), CompletionCheck::Completed);
}

#[test]
fn test_commit_without_take_is_ignored() {
    let stage = state::<u32>("s", 2);
    assert_eq!(stage.commit(), CompletionCheck::Unmatched);
    assert_eq!(stage.active_workers(), 0);
    assert_eq!(stage.total_committed(), 0);
    assert!(!stage.is_completed());
}

#[test]
fn test_precondition_gates_completion() {
    let stage = state::<u32>("downstream", 2);
    let upstream_done = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&upstream_done);
        stage
            .register_precondition(move || flag.load(Ordering::SeqCst))
            .unwrap();
    }

    // Empty and idle, but upstream is still running: must stay open.
    assert_eq!(stage.check_completion(), CompletionCheck::Blocked);
    assert!(!stage.is_completed());
    stage.add(1, &CancelToken::new()).unwrap();
    let _ = stage.take(TAKE_TIMEOUT, &CancelToken::new()).unwrap();
    assert_eq!(stage.commit(), CompletionCheck::Blocked);

    upstream_done.store(true, Ordering::SeqCst);
    assert_eq!(stage.check_completion(), CompletionCheck::Completed);
}

#[test]
fn test_upstream_completed_precondition() {
    let upstream = state::<u32>("up", 2);
    let downstream = state::<u32>("down", 2);
    downstream
        .register_precondition(upstream_completed(&upstream))
        .unwrap();
    assert_eq!(downstream.check_completion(), CompletionCheck::Blocked);
    assert_eq!(upstream.check_completion(), CompletionCheck::Completed);
    assert_eq!(downstream.check_completion(), CompletionCheck::Completed);
}

#[test]
fn test_precondition_registered_once() {
    let stage = state::<u32>("s", 2);
    stage.register_precondition(|| true).unwrap();
    match stage.register_precondition(|| true) {
        Err(StageError::PreconditionAlreadySet { stage }) => assert_eq!(stage, "s"),
        other => panic!("expected PreconditionAlreadySet, got {other:?}"),
    }
}

#[test]
fn test_take_during_grace_window_is_raced() {
    let stage = Arc::new(StageState::<u32>::new("s", 2, Duration::from_millis(300)));
    let checker = {
        let stage = Arc::clone(&stage);
        thread::spawn(move || stage.check_completion())
    };
    thread::sleep(Duration::from_millis(50));

    let cancel = CancelToken::new();
    stage.add(7, &cancel).unwrap();
    assert_eq!(stage.take(TAKE_TIMEOUT, &cancel).unwrap(), Some(7));
    assert_eq!(stage.commit(), CompletionCheck::InProgress);

    assert_eq!(checker.join().unwrap(), CompletionCheck::Raced);
    assert!(!stage.is_completed());
    assert_eq!(stage.check_completion(), CompletionCheck::Completed);
}

#[test]
fn test_snapshot_reflects_counters() {
    let stage = state::<u32>("snap", 3);
    let cancel = CancelToken::new();
    stage.add(1, &cancel).unwrap();
    stage.add(2, &cancel).unwrap();
    let _ = stage.take(TAKE_TIMEOUT, &cancel).unwrap();
    let snap = stage.snapshot();
    assert_eq!(snap.name, "snap");
    assert_eq!(snap.len, 1);
    assert_eq!(snap.capacity, 3);
    assert_eq!(snap.active_workers, 1);
    assert_eq!(snap.total_taken, 1);
    assert_eq!(snap.total_committed, 0);
    assert!(!snap.completed);
}

// --- StageOrchestrator ---

#[test]
fn test_orchestrator_failures_are_committed() {
    let stage = state::<u32>("work", 16);
    let cancel = CancelToken::new();
    for i in 0..10 {
        stage.add(i, &cancel).unwrap();
    }
    let seen = Arc::new(Mutex::new(Vec::new()));
    let h = {
        let seen = Arc::clone(&seen);
        handler(move |i: u32, _: &CancelToken| {
            seen.lock().unwrap().push(i);
            if i % 2 == 1 {
                return Err(anyhow!("odd item {i}"));
            }
            if i == 4 {
                panic!("boom");
            }
            Ok(())
        })
    };
    let orchestrator = StageOrchestrator::new(Arc::clone(&stage), h, 3, TAKE_TIMEOUT);
    let report = orchestrator.run(&cancel).unwrap();

    assert!(report.completed);
    assert_eq!(report.stage, "work");
    assert_eq!(report.taken, 10);
    assert_eq!(report.committed, 10);
    assert_eq!(report.failed, 6, "five odd items plus the panic");
    let mut seen = seen.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, (0..10).collect::<Vec<_>>());
}

struct FailingInit;

impl StageHandler<u32> for FailingInit {
    fn handle(&self, _item: u32, _cancel: &CancelToken) -> anyhow::Result<()> {
        Ok(())
    }

    fn init_worker(&self, worker: usize) -> anyhow::Result<()> {
        if worker == 1 {
            anyhow::bail!("no resources for worker {worker}");
        }
        Ok(())
    }
}

#[test]
fn test_orchestrator_startup_failure_is_fatal() {
    let stage = state::<u32>("init", 4);
    let orchestrator = StageOrchestrator::new(stage, Arc::new(FailingInit), 2, TAKE_TIMEOUT);
    match orchestrator.run(&CancelToken::new()) {
        Err(StageError::Startup { stage, worker, .. }) => {
            assert_eq!(stage, "init");
            assert_eq!(worker, 1);
        }
        other => panic!("expected Startup error, got {other:?}"),
    }
}

/// Re-enqueues two children per item into its own stage; worker 1 fails to start late.
struct SelfFeedingSlowFailure {
    stage: Arc<StageState<u32>>,
}

impl StageHandler<u32> for SelfFeedingSlowFailure {
    fn handle(&self, item: u32, cancel: &CancelToken) -> anyhow::Result<()> {
        self.stage.add(item * 2 + 1, cancel)?;
        self.stage.add(item * 2 + 2, cancel)?;
        Ok(())
    }

    fn init_worker(&self, worker: usize) -> anyhow::Result<()> {
        if worker == 1 {
            thread::sleep(Duration::from_millis(100));
            anyhow::bail!("worker {worker} gave up");
        }
        Ok(())
    }
}

#[test]
fn test_startup_failure_wakes_worker_blocked_on_full_queue() {
    let stage = state::<u32>("self-feeding", 1);
    let cancel = CancelToken::new();
    stage.add(0, &cancel).unwrap();
    let h = Arc::new(SelfFeedingSlowFailure {
        stage: Arc::clone(&stage),
    });
    let orchestrator = Arc::new(StageOrchestrator::new(stage, h, 2, TAKE_TIMEOUT));

    let (done_tx, done_rx) = std::sync::mpsc::channel();
    {
        let orchestrator = Arc::clone(&orchestrator);
        let cancel = cancel.clone();
        thread::spawn(move || {
            let _ = done_tx.send(orchestrator.run(&cancel));
        });
    }
    match done_rx.recv_timeout(Duration::from_secs(3)) {
        Ok(Err(StageError::Startup { worker, .. })) => assert_eq!(worker, 1),
        Ok(other) => panic!("expected Startup error, got {other:?}"),
        Err(_) => panic!("run() still blocked 3s after a worker failed to start"),
    }
    assert!(cancel.is_cancelled());
}

#[test]
fn test_orchestrator_enqueue_into_closed_stage_is_fatal() {
    let target = state::<u32>("target", 4);
    assert_eq!(target.check_completion(), CompletionCheck::Completed);

    let stage = state::<u32>("source", 4);
    let cancel = CancelToken::new();
    stage.add(1, &cancel).unwrap();
    let h = {
        let target = Arc::clone(&target);
        handler(move |i: u32, cancel: &CancelToken| {
            target.add(i, cancel)?;
            Ok(())
        })
    };
    let orchestrator = StageOrchestrator::new(stage, h, 1, TAKE_TIMEOUT);
    match orchestrator.run(&cancel) {
        Err(StageError::QueueClosed { stage, .. }) => assert_eq!(stage, "source"),
        other => panic!("expected QueueClosed, got {other:?}"),
    }
}

#[test]
fn test_orchestrator_cancellation_is_responsive() {
    let stage = state::<u32>("blocked", 4);
    stage.register_precondition(|| false).unwrap();
    let orchestrator = Arc::new(StageOrchestrator::new(
        Arc::clone(&stage),
        handler(|_: u32, _: &CancelToken| Ok(())),
        4,
        TAKE_TIMEOUT,
    ));
    let cancel = CancelToken::new();
    let runner = {
        let orchestrator = Arc::clone(&orchestrator);
        let cancel = cancel.clone();
        thread::spawn(move || orchestrator.run(&cancel))
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!stage.is_completed(), "precondition never holds");
    let start = Instant::now();
    cancel.cancel();
    let report = runner.join().unwrap().unwrap();
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(!report.completed);
}

#[test]
fn test_orchestrator_cancels_handler_blocked_on_full_queue() {
    // Downstream never drains, so the handler blocks on add until cancelled.
    let downstream = state::<u32>("full", 1);
    let cancel = CancelToken::new();
    downstream.add(0, &cancel).unwrap();

    let stage = state::<u32>("producer", 4);
    for i in 1..=3 {
        stage.add(i, &cancel).unwrap();
    }
    let h = {
        let downstream = Arc::clone(&downstream);
        handler(move |i: u32, cancel: &CancelToken| {
            downstream.add(i, cancel)?;
            Ok(())
        })
    };
    let orchestrator = Arc::new(StageOrchestrator::new(stage, h, 2, TAKE_TIMEOUT));
    let runner = {
        let orchestrator = Arc::clone(&orchestrator);
        let cancel = cancel.clone();
        thread::spawn(move || orchestrator.run(&cancel))
    };
    thread::sleep(Duration::from_millis(100));
    cancel.cancel();
    let report = runner.join().unwrap().unwrap();
    assert!(!report.completed);
    assert_eq!(report.failed, 0, "cancellation is not a failure");
    assert_eq!(report.taken, report.committed);
}

// --- Pipeline ---

/// (depth, id) node of a synthetic tree.
type Node = (u32, u32);

#[test]
fn test_pipeline_self_feeding_tree_converges() {
    const DEPTH: u32 = 3;
    const BRANCHING: u32 = 3;

    let tree = state::<Node>("tree", 64);
    let leaves = state::<Node>("leaves", 2);
    let discovered = Arc::new(Mutex::new(HashSet::new()));

    let tree_handler = {
        let tree = Arc::clone(&tree);
        let leaves = Arc::clone(&leaves);
        let discovered = Arc::clone(&discovered);
        handler(move |(depth, id): Node, cancel: &CancelToken| {
            assert!(discovered.lock().unwrap().insert((depth, id)), "node seen twice");
            if depth == DEPTH {
                leaves.add((depth, id), cancel)?;
            } else {
                for b in 0..BRANCHING {
                    tree.add((depth + 1, id * BRANCHING + b), cancel)?;
                }
            }
            Ok(())
        })
    };
    let leaf_count = Arc::new(AtomicUsize::new(0));
    let leaf_handler = {
        let leaf_count = Arc::clone(&leaf_count);
        handler(move |_: Node, _: &CancelToken| {
            leaf_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    };

    let pipeline = Pipeline::new(vec![
        StageOrchestrator::new(Arc::clone(&tree), tree_handler, 3, TAKE_TIMEOUT),
        StageOrchestrator::new(Arc::clone(&leaves), leaf_handler, 2, TAKE_TIMEOUT),
    ])
    .unwrap();
    let workers: Vec<usize> = pipeline.stages().iter().map(|s| s.workers()).collect();
    assert_eq!(workers, vec![3, 2]);
    assert!(Arc::ptr_eq(&pipeline.states()[1], &leaves));
    let cancel = CancelToken::new();
    assert_eq!(pipeline.seed([(0, 0)], &cancel).unwrap(), 1);
    let reports = pipeline.run(&cancel).unwrap();

    let nodes: u64 = (0..=DEPTH).map(|d| u64::from(BRANCHING.pow(d))).sum();
    let leaf_nodes = BRANCHING.pow(DEPTH) as usize;
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.completed));
    assert_eq!(reports[0].committed, nodes);
    assert_eq!(reports[1].committed, leaf_nodes as u64);
    assert_eq!(discovered.lock().unwrap().len() as u64, nodes);
    assert_eq!(leaf_count.load(Ordering::SeqCst), leaf_nodes);
    assert!(tree.is_quiescent() && leaves.is_quiescent());
}

#[test]
fn test_pipeline_rejects_second_precondition() {
    let a = state::<u32>("a", 2);
    let b = state::<u32>("b", 2);
    b.register_precondition(|| true).unwrap();
    let stages = vec![
        StageOrchestrator::new(a, handler(|_: u32, _: &CancelToken| Ok(())), 1, TAKE_TIMEOUT),
        StageOrchestrator::new(b, handler(|_: u32, _: &CancelToken| Ok(())), 1, TAKE_TIMEOUT),
    ];
    assert!(matches!(
        Pipeline::new(stages),
        Err(StageError::PreconditionAlreadySet { .. })
    ));
}

#[test]
fn test_pipeline_seed_beyond_capacity_rejected() {
    let a = state::<u32>("a", 2);
    let pipeline = Pipeline::new(vec![StageOrchestrator::new(
        a,
        handler(|_: u32, _: &CancelToken| Ok(())),
        1,
        TAKE_TIMEOUT,
    )])
    .unwrap();
    let cancel = CancelToken::new();
    assert!(matches!(
        pipeline.seed([1, 2, 3], &cancel),
        Err(StageError::Startup { .. })
    ));
    assert_eq!(pipeline.seed([1, 2], &cancel).unwrap(), 2);
}

#[test]
fn test_pipeline_startup_failure_cancels_run() {
    let first = state::<u32>("first", 4);
    let second = state::<u32>("second", 4);
    let forward = {
        let second = Arc::clone(&second);
        handler(move |i: u32, cancel: &CancelToken| {
            second.add(i, cancel)?;
            Ok(())
        })
    };
    let pipeline = Pipeline::new(vec![
        StageOrchestrator::new(first, forward, 2, TAKE_TIMEOUT),
        StageOrchestrator::new(second, Arc::new(FailingInit), 2, TAKE_TIMEOUT),
    ])
    .unwrap();
    let cancel = CancelToken::new();
    pipeline.seed([1, 2, 3], &cancel).unwrap();

    let start = Instant::now();
    match pipeline.run(&cancel) {
        Err(StageError::Startup { stage, .. }) => assert_eq!(stage, "second"),
        other => panic!("expected Startup error, got {other:?}"),
    }
    assert!(cancel.is_cancelled());
    assert!(start.elapsed() < Duration::from_secs(5));
}
