use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::QueueSpec;
use crate::context::Resque;
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::events::Event;
use crate::job::Job;
use crate::queue::QueueStore;
use crate::stat::Stat;
use crate::status::StatusCode;

/// What a worker is doing right now, written to `worker:<id>` while a job is in flight and
/// deleted once it finishes. Mirrors the envelope shape the original Resque writes so
/// dashboards reading this key keep working.
#[derive(Debug, Serialize, Deserialize)]
struct CurrentJob {
    queue: String,
    run_at: String,
    payload: Envelope,
}

/// Edge-triggered signal flags set by `signal_hook`. The actual OS signal handler only ever
/// touches these atomics; everything else (killing the child, flipping `paused`, reconnecting
/// Redis) happens on the next poll of [`Worker::process_signals`], between suspension points.
struct SignalFlags {
    term_int: Arc<AtomicBool>,
    quit: Arc<AtomicBool>,
    usr1: Arc<AtomicBool>,
    usr2: Arc<AtomicBool>,
    cont: Arc<AtomicBool>,
    pipe: Arc<AtomicBool>,
}

impl SignalFlags {
    fn install() -> Result<SignalFlags> {
        use signal_hook::consts::signal::*;
        use signal_hook::flag::register;

        let flags = SignalFlags {
            term_int: Arc::new(AtomicBool::new(false)),
            quit: Arc::new(AtomicBool::new(false)),
            usr1: Arc::new(AtomicBool::new(false)),
            usr2: Arc::new(AtomicBool::new(false)),
            cont: Arc::new(AtomicBool::new(false)),
            pipe: Arc::new(AtomicBool::new(false)),
        };

        register(SIGTERM, flags.term_int.clone()).map_err(Error::Signal)?;
        register(SIGINT, flags.term_int.clone()).map_err(Error::Signal)?;
        register(SIGQUIT, flags.quit.clone()).map_err(Error::Signal)?;
        register(SIGUSR1, flags.usr1.clone()).map_err(Error::Signal)?;
        register(SIGUSR2, flags.usr2.clone()).map_err(Error::Signal)?;
        register(SIGCONT, flags.cont.clone()).map_err(Error::Signal)?;
        register(SIGPIPE, flags.pipe.clone()).map_err(Error::Signal)?;

        Ok(flags)
    }
}

/// A polling worker bound to one or more queues. Construction is cheap; [`Worker::work`]
/// runs the fork/wait loop until a shutdown signal is observed or (in single-shot mode,
/// `interval == 0`) the configured queues run dry.
pub struct Worker<'r> {
    resque: &'r Resque,
    queues: QueueSpec,
    hostname: String,
    pid: u32,
    id: String,
    signals: SignalFlags,
    shutdown: AtomicBool,
    paused: AtomicBool,
    child: std::cell::Cell<Option<nix::unistd::Pid>>,
}

impl<'r> Worker<'r> {
    pub fn new(resque: &'r Resque, queues: QueueSpec) -> Result<Worker<'r>> {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        let pid = std::process::id();
        let id = format!("{}:{}:{}", hostname, pid, queues.as_csv());

        Ok(Worker {
            resque,
            queues,
            hostname,
            pid,
            id,
            signals: SignalFlags::install()?,
            shutdown: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            child: std::cell::Cell::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Runs the main loop. `interval` is the poll sleep, in seconds; `interval == 0`
    /// additionally enables single-shot mode, where the loop breaks instead of sleeping the
    /// first time every queue comes back empty (used by tests and `work(0)` scenarios).
    pub fn work(&self, interval: u64) -> Result<()> {
        self.startup()?;

        loop {
            self.process_signals()?;
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            if self.paused.load(Ordering::SeqCst) {
                if interval == 0 {
                    break;
                }
                thread::sleep(Duration::from_secs(interval));
                continue;
            }

            match self.reserve_from_active_queues()? {
                Some(job) => self.run_job(job)?,
                None => {
                    if interval == 0 {
                        break;
                    }
                    thread::sleep(Duration::from_secs(interval));
                }
            }
        }

        self.unregister()
    }

    /// Acts on whatever signal flags have been raised since the last check. Never touches
    /// Redis beyond the PIPE case's explicit reconnect mark.
    fn process_signals(&self) -> Result<()> {
        if self.signals.term_int.swap(false, Ordering::SeqCst) {
            self.shutdown.store(true, Ordering::SeqCst);
            self.kill_child()?;
        }
        if self.signals.quit.swap(false, Ordering::SeqCst) {
            self.shutdown.store(true, Ordering::SeqCst);
        }
        if self.signals.usr1.swap(false, Ordering::SeqCst) {
            self.kill_child()?;
        }
        if self.signals.usr2.swap(false, Ordering::SeqCst) {
            self.paused.store(true, Ordering::SeqCst);
        }
        if self.signals.cont.swap(false, Ordering::SeqCst) {
            self.paused.store(false, Ordering::SeqCst);
        }
        if self.signals.pipe.swap(false, Ordering::SeqCst) {
            self.resque.client.borrow_mut().mark_needs_reconnect();
        }
        Ok(())
    }

    /// `killChild`: no-op if there is no child; otherwise checks liveness with a
    /// zero-signal `kill` probe (the idiomatic Rust substitute for shelling out to `ps`) and
    /// sends `SIGKILL` if it's still around. If the child has already vanished, that's treated
    /// as unexpected and escalates to a full shutdown.
    fn kill_child(&self) -> Result<()> {
        let child = match self.child.get() {
            Some(pid) => pid,
            None => {
                info!(worker = %self.id, "killChild called with no active child");
                return Ok(());
            }
        };

        if process_alive(child) {
            warn!(worker = %self.id, child = %child, "killing child");
            nix::sys::signal::kill(child, nix::sys::signal::Signal::SIGKILL).ok();
        } else {
            error!(worker = %self.id, child = %child, "child vanished unexpectedly, shutting down");
            self.shutdown.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn startup(&self) -> Result<()> {
        self.prune_dead_workers()?;
        self.resque.events.trigger(Event::BeforeFirstFork)?;

        let mut client = self.resque.client.borrow_mut();
        client.sadd("workers", &self.id)?;
        client.set(&format!("worker:{}:started", self.id), &Utc::now().to_rfc2822())?;
        Ok(())
    }

    /// Resolves the priority-ordered queue list for this poll: a fixed list, or, under
    /// the wildcard, every member of `queues` sorted alphabetically — re-read on every call so
    /// queues created after startup are picked up.
    fn active_queues(&self) -> Result<Vec<String>> {
        match &self.queues {
            QueueSpec::Named(names) => Ok(names.clone()),
            QueueSpec::Wildcard => {
                let mut names = QueueStore::queues(&mut self.resque.client.borrow_mut())?;
                names.sort();
                Ok(names)
            }
        }
    }

    fn reserve_from_active_queues(&self) -> Result<Option<Job>> {
        if self.resque.client.borrow_mut().take_needs_reconnect() {
            self.resque.client.borrow_mut().reconnect()?;
        }

        for queue in self.active_queues()? {
            match Job::reserve(self.resque, &queue) {
                Ok(Some(job)) => return Ok(Some(job)),
                Ok(None) => continue,
                Err(Error::Redis(e)) => {
                    error!(worker = %self.id, queue = %queue, error = %e, alert = true, "transport error on reserve, treating as no job");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Runs one fork/wait cycle for a reserved job. `processed` is incremented in-process by
    /// the child immediately after a clean success, colocated with where `failed` is
    /// incremented on failure, rather than inferred by the parent from the child's exit code —
    /// the exit code alone can't distinguish success from a cleanly skipped (`DontPerform`)
    /// job, since both exit 0 (see DESIGN.md).
    fn run_job(&self, job: Job) -> Result<()> {
        self.resque.events.trigger(Event::BeforeFork { job: &job })?;
        self.working_on(&job)?;

        #[cfg(unix)]
        let outcome = self.fork_and_run(&job)?;
        #[cfg(not(unix))]
        let outcome = {
            self.perform_and_account(&job);
            ChildExit::Clean
        };

        if let ChildExit::Dirty(detail) = outcome {
            job.fail(self.resque, &self.id, "DirtyExitError", &detail, &[])?;
        }

        self.done_working()
    }

    #[cfg(unix)]
    fn fork_and_run(&self, job: &Job) -> Result<ChildExit> {
        use nix::sys::wait::{waitpid, WaitStatus};
        use nix::unistd::{fork, ForkResult};

        match fork().map_err(Error::Fork)? {
            ForkResult::Child => {
                // The child inherits the parent's (now stale) Redis socket; every op below
                // re-establishes it on first use because the pid no longer matches.
                self.resque.events.trigger(Event::AfterFork { job }).ok();
                self.perform_and_account(job);
                std::process::exit(0);
            }
            ForkResult::Parent { child } => {
                self.child.set(Some(child));
                let status = waitpid(child, None).map_err(Error::Wait)?;
                self.child.set(None);
                match status {
                    WaitStatus::Exited(_, 0) => Ok(ChildExit::Clean),
                    WaitStatus::Exited(_, code) => {
                        Ok(ChildExit::Dirty(format!("exit code {}", code)))
                    }
                    WaitStatus::Signaled(_, signal, _) => {
                        Ok(ChildExit::Dirty(format!("killed by signal {:?}", signal)))
                    }
                    other => Ok(ChildExit::Dirty(format!("unexpected wait status {:?}", other))),
                }
            }
        }
    }

    /// Runs the handler pipeline and performs all in-process accounting for its outcome:
    /// success increments `processed`, failure goes through `Job::fail` (which increments
    /// `failed` and persists the failure envelope), and a clean `DontPerform` skip touches
    /// neither counter.
    fn perform_and_account(&self, job: &Job) {
        match job.perform(self.resque) {
            Ok(true) => {
                if let Err(e) = job.update_status(self.resque, StatusCode::Complete) {
                    error!(worker = %self.id, job = %job.id(), error = %e, "failed to record completion status");
                }
                let mut client = self.resque.client.borrow_mut();
                if let Err(e) = Stat::incr(&mut client, "processed", 1) {
                    error!(worker = %self.id, error = %e, "failed to increment processed stat");
                }
                if let Err(e) = Stat::incr(&mut client, &format!("processed:{}", self.id), 1) {
                    error!(worker = %self.id, error = %e, "failed to increment per-worker processed stat");
                }
            }
            Ok(false) => {
                info!(worker = %self.id, job = %job.id(), class = %job.class(), "job skipped by DontPerform");
            }
            Err(e) => {
                let (exception, message, backtrace) = describe_error(&e);
                if let Err(fail_err) = job.fail(self.resque, &self.id, &exception, &message, &backtrace) {
                    error!(worker = %self.id, job = %job.id(), error = %fail_err, "failed to record job failure");
                }
            }
        }
    }

    fn working_on(&self, job: &Job) -> Result<()> {
        job.update_status(self.resque, StatusCode::Running)?;
        let current = CurrentJob {
            queue: job.queue.clone(),
            run_at: Utc::now().to_rfc2822(),
            payload: job.payload.clone(),
        };
        let raw = serde_json::to_string(&current)?;
        self.resque.client.borrow_mut().set(&format!("worker:{}", self.id), &raw)
    }

    fn done_working(&self) -> Result<()> {
        self.resque.client.borrow_mut().del(&format!("worker:{}", self.id))
    }

    /// `pruneDeadWorkers`: for every registered worker on this host whose pid is no
    /// longer alive (and isn't us), unregister it on its behalf, failing any job it was
    /// mid-execution on.
    fn prune_dead_workers(&self) -> Result<()> {
        let known = self.resque.client.borrow_mut().smembers("workers")?;

        for worker_id in known {
            let mut parts = worker_id.splitn(3, ':');
            let (host, pid_str) = match (parts.next(), parts.next()) {
                (Some(h), Some(p)) => (h, p),
                _ => continue,
            };
            if host != self.hostname {
                continue;
            }
            let pid: i32 = match pid_str.parse() {
                Ok(p) => p,
                Err(_) => continue,
            };
            if pid as u32 == self.pid || process_alive(nix::unistd::Pid::from_raw(pid)) {
                continue;
            }

            warn!(worker = %worker_id, "pruning dead worker");
            self.unregister_by_id(&worker_id)?;
        }
        Ok(())
    }

    fn unregister(&self) -> Result<()> {
        self.unregister_by_id(&self.id)
    }

    /// `unregisterWorker`. Works for any worker id, not just our own, since
    /// [`prune_dead_workers`] uses it to clean up on behalf of dead peers.
    fn unregister_by_id(&self, id: &str) -> Result<()> {
        let current_raw = self.resque.client.borrow_mut().get(&format!("worker:{}", id))?;
        if let Some(raw) = current_raw {
            if let Ok(current) = serde_json::from_str::<CurrentJob>(&raw) {
                let job = Job {
                    queue: current.queue,
                    payload: current.payload,
                };
                job.fail(self.resque, id, "DirtyExitError", "worker exited mid-job", &[])?;
            }
        }

        let mut client = self.resque.client.borrow_mut();
        client.srem("workers", id)?;
        client.del(&format!("worker:{}", id))?;
        client.del(&format!("worker:{}:started", id))?;
        Stat::clear(&mut client, &format!("processed:{}", id))?;
        Stat::clear(&mut client, &format!("failed:{}", id))?;
        Ok(())
    }
}

enum ChildExit {
    Clean,
    Dirty(String),
}

fn process_alive(pid: nix::unistd::Pid) -> bool {
    nix::sys::signal::kill(pid, None).is_ok()
}

/// Maps a propagated [`Error`] to the `{exception, error, backtrace}` triple the failure
/// envelope records. `backtrace` here is the error's cause chain rather than a stack
/// trace — Rust has no portable stack unwind capture outside of `std::backtrace`'s nightly
/// history, and the cause chain is the information actually useful to a dashboard viewer.
fn describe_error(err: &Error) -> (String, String, Vec<String>) {
    match err {
        Error::HandlerNotFound(class) => (
            "HandlerNotFound".to_string(),
            format!("no handler registered for class {:?}", class),
            Vec::new(),
        ),
        Error::HandlerError { class, source } => {
            // Include the error's own `Display` as frame 0: a plain, single-level `anyhow`
            // error (the common case) has nothing beyond that, and the failure envelope still
            // needs a non-empty backtrace to be useful to a dashboard viewer.
            let backtrace = source.chain().map(|c| c.to_string()).collect();
            (
                format!("HandlerError({})", class),
                source.to_string(),
                backtrace,
            )
        }
        other => (
            "HandlerError".to_string(),
            other.to_string(),
            Vec::new(),
        ),
    }
}
