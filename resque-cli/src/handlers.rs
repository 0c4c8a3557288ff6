use resque::{HandlerRegistry, JobHandler};
use serde_json::Value;
use tracing::info;

/// Logs its arguments and succeeds. Registered under the class name `Echo` so a freshly
/// started worker has at least one runnable handler to demonstrate the pipeline end to end;
/// real deployments register their own handlers in place of this one.
struct EchoHandler;

impl JobHandler for EchoHandler {
    fn perform(&mut self, args: &Value) -> anyhow::Result<()> {
        info!(args = %args, "Echo job performed");
        Ok(())
    }
}

pub fn register_example_handlers(registry: &mut HandlerRegistry) {
    registry.register("Echo", || Box::new(EchoHandler));
}
