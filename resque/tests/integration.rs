#![cfg(feature = "test-redis")]

use std::panic::AssertUnwindSafe;

use resque::{Config, Envelope, Error, HookOutcome, Job, JobHandler, LogLevel, MatchItem, QueueSpec, QueueStore, Resque, Stat, StatusCode, StatusTracker, Worker};
use serde_json::{json, Value};

/// Builds an isolated `Resque` context against a randomized key namespace so concurrent test
/// runs never collide, then runs `test` and scans away every key it touched — the same
/// namespace-per-run-plus-SCAN-cleanup shape the queue crate this code is modeled on uses for
/// its own Redis-backed tests.
fn run_test<F>(test: F)
where
    F: FnOnce(&mut Resque) + std::panic::UnwindSafe,
{
    dotenv::dotenv().ok();
    let redis_url = std::env::var("TEST_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let namespace = format!("resque-test-{}", uuid::Uuid::new_v4());

    let config = Config {
        redis_url,
        namespace: namespace.clone(),
        queues: QueueSpec::Wildcard,
        interval: 0,
        logging: LogLevel::None,
    };
    let mut resque = Resque::open(&config).expect("opening test context");

    let result = std::panic::catch_unwind(AssertUnwindSafe(|| test(&mut resque)));
    resque.client.borrow_mut().scan_delete("*").expect("cleaning up test keys");
    if let Err(e) = result {
        std::panic::resume_unwind(e);
    }
}

struct RecordingHandler {
    seen: std::sync::mpsc::Sender<Value>,
}

impl JobHandler for RecordingHandler {
    fn perform(&mut self, args: &Value) -> anyhow::Result<()> {
        self.seen.send(args.clone()).ok();
        Ok(())
    }
}

struct SkippingHandler;

impl JobHandler for SkippingHandler {
    fn set_up(&mut self, _args: &Value) -> anyhow::Result<HookOutcome> {
        Ok(HookOutcome::Skip)
    }

    fn perform(&mut self, _args: &Value) -> anyhow::Result<()> {
        panic!("perform must not run after setUp skips");
    }
}

struct FailingHandler;

impl JobHandler for FailingHandler {
    fn perform(&mut self, _args: &Value) -> anyhow::Result<()> {
        anyhow::bail!("boom")
    }
}

#[test]
fn enqueue_then_reserve_round_trips_class_and_args() {
    run_test(|resque| {
        let id = Job::create(resque, "default", "Add", Some(json!({"a": 1, "b": 2})), false).unwrap();

        let job = Job::reserve(resque, "default").unwrap().expect("a job was queued");
        assert_eq!(job.id(), id);
        assert_eq!(job.class(), "Add");
        assert_eq!(job.arguments(), Some(&json!({"a": 1, "b": 2})));

        assert!(Job::reserve(resque, "default").unwrap().is_none(), "queue must be empty after one reserve");
    });
}

#[test]
fn successful_perform_increments_processed_and_marks_complete() {
    run_test(|resque| {
        let (tx, rx) = std::sync::mpsc::channel();
        resque.handlers.register("Record", move || {
            Box::new(RecordingHandler { seen: tx.clone() })
        });

        let id = Job::create(resque, "default", "Record", Some(json!({"x": 1})), true).unwrap();
        let job = Job::reserve(resque, "default").unwrap().unwrap();

        let performed = job.perform(resque).unwrap();
        assert!(performed);
        assert_eq!(rx.try_recv().unwrap(), json!({"x": 1}));

        job.update_status(resque, StatusCode::Complete).unwrap();
        Stat::incr(&mut resque.client.borrow_mut(), "processed", 1).unwrap();

        assert_eq!(job.status(resque).unwrap(), Some(StatusCode::Complete));
        assert_eq!(Stat::get(&mut resque.client.borrow_mut(), "processed").unwrap(), 1);
        assert_eq!(Stat::get(&mut resque.client.borrow_mut(), "failed").unwrap(), 0);
        assert!(StatusTracker::is_tracking(&mut resque.client.borrow_mut(), &id).unwrap());
    });
}

/// A `setUp` skip must leave `processed` and `failed` both untouched — it is neither a
/// success nor a failure, just a job the handler declined to run.
#[test]
fn dont_perform_skip_touches_neither_stat() {
    run_test(|resque| {
        resque.handlers.register("Skip", || Box::new(SkippingHandler));

        Job::create(resque, "default", "Skip", None, false).unwrap();
        let job = Job::reserve(resque, "default").unwrap().unwrap();

        let performed = job.perform(resque).unwrap();
        assert!(!performed);

        assert_eq!(Stat::get(&mut resque.client.borrow_mut(), "processed").unwrap(), 0);
        assert_eq!(Stat::get(&mut resque.client.borrow_mut(), "failed").unwrap(), 0);
    });
}

#[test]
fn handler_error_records_failure_envelope_and_status() {
    run_test(|resque| {
        resque.handlers.register("Fail", || Box::new(FailingHandler));

        let id = Job::create(resque, "default", "Fail", None, true).unwrap();
        let job = Job::reserve(resque, "default").unwrap().unwrap();

        let err = job.perform(resque).unwrap_err();
        let (exception, message, _backtrace) = match &err {
            Error::HandlerError { class, source } => (class.clone(), source.to_string(), Vec::<String>::new()),
            other => panic!("unexpected error variant: {other:?}"),
        };

        job.fail(resque, "host:1:default", &exception, &message, &[]).unwrap();

        assert_eq!(job.status(resque).unwrap(), Some(StatusCode::Failed));
        assert_eq!(Stat::get(&mut resque.client.borrow_mut(), "failed").unwrap(), 1);
        assert_eq!(
            Stat::get(&mut resque.client.borrow_mut(), "failed:host:1:default").unwrap(),
            1
        );
        let raw = resque.client.borrow_mut().get(&format!("failed:{}", id)).unwrap();
        assert!(raw.is_some(), "failed:<id> envelope must be persisted");
    });
}

#[test]
fn dequeue_by_class_and_args_subset_removes_only_matches_and_preserves_order() {
    run_test(|resque| {
        let mut client = resque.client.borrow_mut();
        for (class, args) in [
            ("A", json!({"n": 1})),
            ("B", json!({"n": 2})),
            ("A", json!({"n": 3})),
            ("B", json!({"n": 4})),
        ] {
            let envelope = Envelope::new(class, Some(args), None).unwrap();
            QueueStore::push(&mut client, "mixed", &envelope).unwrap();
        }

        let removed = QueueStore::dequeue(
            &mut client,
            "mixed",
            &[MatchItem::Class("A".to_string())],
        )
        .unwrap();
        assert_eq!(removed, 2);

        let mut survivors = Vec::new();
        while let Some(envelope) = QueueStore::pop(&mut client, "mixed").unwrap() {
            survivors.push(envelope.class);
        }
        assert_eq!(survivors, vec!["B", "B"], "surviving order must be preserved");
    });
}

#[test]
fn dequeue_with_no_match_items_drops_whole_queue() {
    run_test(|resque| {
        let mut client = resque.client.borrow_mut();
        for _ in 0..3 {
            let envelope = Envelope::new("Noop", None, None).unwrap();
            QueueStore::push(&mut client, "scratch", &envelope).unwrap();
        }

        let removed = QueueStore::dequeue(&mut client, "scratch", &[]).unwrap();
        assert_eq!(removed, 3);
        assert_eq!(QueueStore::size(&mut client, "scratch").unwrap(), 0);
    });
}

/// Exercises the real startup/unregister path without forking: with no jobs queued, `work(0)`
/// (single-shot mode) registers the worker, finds every queue dry on the first pass, and
/// unregisters cleanly on the way out.
#[test]
fn worker_registers_and_unregisters_when_queues_are_dry() {
    run_test(|resque| {
        let worker = Worker::new(resque, QueueSpec::Named(vec!["default".to_string()])).unwrap();
        worker.work(0).unwrap();

        let known = resque.client.borrow_mut().smembers("workers").unwrap();
        assert!(!known.contains(&worker.id().to_string()), "worker must deregister after a dry run");
    });
}

/// Worker priority is strict declaration order, not push order: three queues are declared
/// `[high, medium, low]`, but envelopes land on them `low, high, medium`. Reserving in
/// declared order (what `Worker::reserve_from_active_queues` does internally) must still drain
/// `high` before `medium` before `low` regardless of push order.
#[test]
fn worker_reserves_in_declared_queue_priority_order() {
    run_test(|resque| {
        Job::create(resque, "low", "L", None, false).unwrap();
        Job::create(resque, "high", "H", None, false).unwrap();
        Job::create(resque, "medium", "M", None, false).unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            for queue in ["high", "medium", "low"] {
                if let Some(job) = Job::reserve(resque, queue).unwrap() {
                    seen.push(job.class().to_string());
                    break;
                }
            }
        }
        assert_eq!(seen, vec!["H", "M", "L"]);
    });
}

/// A worker that vanishes mid-job leaves `worker:<id>` pointing at the job it was running.
/// `pruneDeadWorkers` must fail that job on the dead worker's behalf, remove it from `workers`,
/// and leave any live worker entry untouched.
///
/// The fabricated "dead" pid comes from actually forking and reaping a child, rather than a
/// fixed number like `1` — a literal pid is only dead by environmental accident (pid 1 is very
/// much alive in most containers), whereas a reaped child's pid is guaranteed gone.
#[test]
fn prune_dead_workers_fails_their_job_and_leaves_live_entries() {
    run_test(|resque| {
        let live = Worker::new(resque, QueueSpec::Named(vec!["default".to_string()])).unwrap();
        {
            let mut client = resque.client.borrow_mut();
            client.sadd("workers", live.id()).unwrap();
        }

        let dead_pid = {
            use nix::sys::wait::waitpid;
            use nix::unistd::{fork, ForkResult};
            match fork().expect("fork for dead-pid fixture") {
                ForkResult::Child => std::process::exit(0),
                ForkResult::Parent { child } => {
                    waitpid(child, None).expect("reap dead-pid fixture child");
                    child
                }
            }
        };
        let dead_id = format!("{}:{}:default", live.id().split(':').next().unwrap(), dead_pid);
        let id = Job::create(resque, "default", "Fail", Some(json!({"a": 1})), true).unwrap();
        let job = Job::reserve(resque, "default").unwrap().unwrap();
        {
            let mut client = resque.client.borrow_mut();
            client.sadd("workers", &dead_id).unwrap();
            let current = serde_json::json!({
                "queue": "default",
                "run_at": "now",
                "payload": job.payload,
            });
            client.set(&format!("worker:{}", dead_id), &current.to_string()).unwrap();
        }

        // A fresh worker's startup prunes dead peers before registering itself.
        let prober = Worker::new(resque, QueueSpec::Named(vec!["default".to_string()])).unwrap();
        prober.work(0).unwrap();

        let known = resque.client.borrow_mut().smembers("workers").unwrap();
        assert!(known.contains(&live.id().to_string()), "live worker entry must survive pruning");
        assert!(!known.contains(&dead_id), "dead worker entry must be pruned");

        assert_eq!(job.status(resque).unwrap(), Some(StatusCode::Failed));
        assert_eq!(Stat::get(&mut resque.client.borrow_mut(), &format!("failed:{}", dead_id)).unwrap(), 0);
        let raw = resque.client.borrow_mut().get(&format!("failed:{}", id)).unwrap();
        assert!(raw.is_some(), "pruned worker's in-flight job must get a failure envelope");
    });
}

#[test]
fn recreate_republishes_under_a_fresh_id() {
    run_test(|resque| {
        Job::create(resque, "default", "Add", Some(json!({"a": 1})), true).unwrap();
        let job = Job::reserve(resque, "default").unwrap().unwrap();
        let original_id = job.id().to_string();

        let new_id = job.recreate(resque).unwrap();
        assert_ne!(new_id, original_id);

        let recreated = Job::reserve(resque, "default").unwrap().unwrap();
        assert_eq!(recreated.id(), new_id);
        assert_eq!(recreated.arguments(), Some(&json!({"a": 1})));
        assert!(StatusTracker::is_tracking(&mut resque.client.borrow_mut(), &new_id).unwrap());
    });
}

/// `create` with an explicit `args.id` reuses that id for the envelope but must not leave it
/// sitting in the stored `args[0]` — otherwise a later `recreate()` reads its own previous id
/// back out of its args and never actually mints a fresh one.
#[test]
fn create_with_explicit_id_strips_it_from_stored_args_and_recreate_still_mints_fresh_id() {
    run_test(|resque| {
        let id = Job::create(resque, "default", "Add", Some(json!({"id": "caller-chosen", "a": 1})), true).unwrap();
        assert_eq!(id, "caller-chosen");

        let job = Job::reserve(resque, "default").unwrap().unwrap();
        assert_eq!(job.arguments(), Some(&json!({"a": 1})), "id must not survive into stored args");

        let new_id = job.recreate(resque).unwrap();
        assert_ne!(new_id, id, "recreate must mint a fresh id even when the original came from args.id");
    });
}
