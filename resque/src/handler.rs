use std::collections::HashMap;

use serde_json::Value;

use crate::events::HookOutcome;

/// A job handler resolved by class name. `perform` is mandatory; `set_up`/`tear_down` are
/// optional lifecycle hooks run immediately before/after it. `set_up` may return
/// `HookOutcome::Skip` to cleanly abort the job without running `perform` (the `DontPerform`
/// redesign, see events.rs).
pub trait JobHandler {
    fn set_up(&mut self, _args: &Value) -> anyhow::Result<HookOutcome> {
        Ok(HookOutcome::Continue)
    }

    fn perform(&mut self, args: &Value) -> anyhow::Result<()>;

    fn tear_down(&mut self, _args: &Value) -> anyhow::Result<()> {
        Ok(())
    }
}

type Constructor = Box<dyn Fn() -> Box<dyn JobHandler>>;

/// Replaces the original Resque's runtime-reflection class dispatch: a mapping from class
/// name to a constructor, registered at process init. Lookup failure is
/// `Error::HandlerNotFound`, never a panic.
#[derive(Default)]
pub struct HandlerRegistry {
    constructors: HashMap<String, Constructor>,
}

impl HandlerRegistry {
    pub fn new() -> HandlerRegistry {
        HandlerRegistry::default()
    }

    pub fn register<F>(&mut self, class: impl Into<String>, constructor: F)
    where
        F: Fn() -> Box<dyn JobHandler> + 'static,
    {
        self.constructors.insert(class.into(), Box::new(constructor));
    }

    pub fn resolve(&self, class: &str) -> Option<Box<dyn JobHandler>> {
        self.constructors.get(class).map(|ctor| ctor())
    }
}
