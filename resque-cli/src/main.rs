mod handlers;
mod tracing_config;

use std::process::ExitCode;

use resque::{Config, LogLevel, QueueSpec, Resque, Worker};
use structopt::StructOpt;
use tracing::error;

/// Environment-driven launcher: parses the same variables the original Resque rake tasks
/// read (`QUEUE`, `COUNT`, `INTERVAL`, `REDIS_URL`, `REDIS_NAMESPACE`/`PREFIX`, `LOGGING`) via
/// a `structopt` derive so they can also be passed as flags.
#[derive(Debug, StructOpt)]
#[structopt(name = "resque-worker")]
struct Args {
    #[structopt(long, env = "QUEUE", default_value = "*")]
    queue: String,

    #[structopt(long, env = "COUNT", default_value = "1")]
    count: u32,

    #[structopt(long, env = "INTERVAL", default_value = "5")]
    interval: u64,

    #[structopt(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    // No `default_value` here: structopt's `env` attribute only checks a single variable, and
    // `PREFIX` is a second, lower-priority name for the same setting (SPEC_FULL §6). The
    // fallback to `PREFIX` and the final default both happen in `into_config`.
    #[structopt(long, env = "REDIS_NAMESPACE")]
    namespace: Option<String>,

    #[structopt(long, env = "LOGGING", default_value = "NORMAL")]
    logging: String,
}

impl Args {
    fn into_config(self) -> Config {
        let namespace = self
            .namespace
            .or_else(|| std::env::var("PREFIX").ok())
            .unwrap_or_else(|| "resque".to_string());

        Config {
            redis_url: self.redis_url,
            namespace,
            queues: QueueSpec::parse(&self.queue),
            interval: self.interval,
            logging: LogLevel::parse(&self.logging),
        }
    }
}

fn main() -> ExitCode {
    let args = Args::from_args();
    let count = args.count.max(1);
    let config = args.into_config();

    tracing_config::configure("resque-worker", config.logging);

    if count == 1 {
        return match run_one(&config) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = %e, "worker exited with error");
                ExitCode::FAILURE
            }
        };
    }

    run_many(&config, count)
}

fn run_one(config: &Config) -> resque::Result<()> {
    let mut resque = Resque::open(config)?;
    handlers::register_example_handlers(&mut resque.handlers);
    let worker = Worker::new(&resque, config.queues.clone())?;
    worker.work(config.interval)
}

/// `COUNT > 1`: forks one OS process per worker, matching the original `rake
/// resque:workers` task. Each child runs the ordinary single-worker path; the parent's only
/// job is to wait for all of them and propagate the worst exit status.
fn run_many(config: &Config, count: u32) -> ExitCode {
    use nix::sys::wait::{waitpid, WaitStatus};
    use nix::unistd::{fork, ForkResult};

    let mut children = Vec::with_capacity(count as usize);
    for _ in 0..count {
        match fork() {
            Ok(ForkResult::Child) => {
                let code = match run_one(config) {
                    Ok(()) => 0,
                    Err(e) => {
                        error!(error = %e, "worker exited with error");
                        1
                    }
                };
                std::process::exit(code);
            }
            Ok(ForkResult::Parent { child }) => children.push(child),
            Err(e) => {
                error!(error = %e, "failed to fork worker process");
                return ExitCode::FAILURE;
            }
        }
    }

    let mut exit_code = ExitCode::SUCCESS;
    for child in children {
        match waitpid(child, None) {
            Ok(WaitStatus::Exited(_, 0)) => {}
            Ok(status) => {
                error!(child = %child, status = ?status, "worker process exited dirty");
                exit_code = ExitCode::FAILURE;
            }
            Err(e) => {
                error!(child = %child, error = %e, "failed to wait for worker process");
                exit_code = ExitCode::FAILURE;
            }
        }
    }
    exit_code
}
