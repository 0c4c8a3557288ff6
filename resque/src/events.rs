use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;

use crate::error::Result;
use crate::job::Job;

/// What a `beforePerform`/`setUp` listener decided. The original Resque raises a `DontPerform`
/// exception to short-circuit; here that becomes an explicit return value instead, so
/// `perform()` never needs to catch a control-flow error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    Continue,
    Skip,
}

/// Canonical event names and the data passed to their listeners.
pub enum Event<'a> {
    AfterEnqueue {
        class: &'a str,
        args: &'a Value,
        queue: &'a str,
    },
    BeforeFirstFork,
    BeforeFork {
        job: &'a Job,
    },
    AfterFork {
        job: &'a Job,
    },
    BeforePerform {
        job: &'a Job,
    },
    AfterPerform {
        job: &'a Job,
    },
    OnFailure {
        error: &'a dyn std::fmt::Display,
        job: &'a Job,
    },
}

impl<'a> Event<'a> {
    fn name(&self) -> &'static str {
        match self {
            Event::AfterEnqueue { .. } => "afterEnqueue",
            Event::BeforeFirstFork => "beforeFirstFork",
            Event::BeforeFork { .. } => "beforeFork",
            Event::AfterFork { .. } => "afterFork",
            Event::BeforePerform { .. } => "beforePerform",
            Event::AfterPerform { .. } => "afterPerform",
            Event::OnFailure { .. } => "onFailure",
        }
    }
}

type Callback = Rc<dyn Fn(&Event) -> Result<HookOutcome>>;

/// A token identifying a registered listener, returned by `listen` so it can later be passed
/// to `stop_listening`. The original identifies listeners by callable identity; Rust closures
/// aren't comparable that way, so this crate hands back an explicit id instead (an Open
/// Question resolution, recorded in DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(usize);

/// Mapping from event name to an ordered list of callbacks, invoked synchronously in
/// insertion order. The worker runtime is single-threaded (it forks rather than spawning
/// threads), so this is a `RefCell`, not a `Mutex`.
#[derive(Default)]
pub struct EventBus {
    listeners: RefCell<HashMap<&'static str, Vec<(usize, Callback)>>>,
    next_id: RefCell<usize>,
}

impl EventBus {
    pub fn new() -> EventBus {
        EventBus::default()
    }

    pub fn listen<F>(&self, event: &'static str, callback: F) -> ListenerId
    where
        F: Fn(&Event) -> Result<HookOutcome> + 'static,
    {
        let mut next_id = self.next_id.borrow_mut();
        let id = *next_id;
        *next_id += 1;
        self.listeners
            .borrow_mut()
            .entry(event)
            .or_default()
            .push((id, Rc::new(callback)));
        ListenerId(id)
    }

    pub fn stop_listening(&self, event: &'static str, id: ListenerId) {
        if let Some(list) = self.listeners.borrow_mut().get_mut(event) {
            if let Some(pos) = list.iter().position(|(lid, _)| *lid == id.0) {
                list.remove(pos);
            }
        }
    }

    pub fn clear_listeners(&self) {
        self.listeners.borrow_mut().clear();
    }

    /// Invokes every listener registered for this event's name, in insertion order. Stops
    /// early and returns `HookOutcome::Skip` the moment a listener asks to skip; any other
    /// error propagates immediately without running the remaining listeners.
    pub fn trigger(&self, event: Event) -> Result<HookOutcome> {
        let name = event.name();
        // Clone the `Rc`s out before calling any of them, so a listener is free to call
        // `listen`/`stop_listening` itself without re-entering the `RefCell` borrow.
        let callbacks: Vec<Callback> = self
            .listeners
            .borrow()
            .get(name)
            .map(|v| v.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();

        for callback in callbacks {
            if callback(&event)? == HookOutcome::Skip {
                return Ok(HookOutcome::Skip);
            }
        }

        Ok(HookOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc as StdRc;

    #[test]
    fn listeners_fire_in_order() {
        let bus = EventBus::new();
        let order = StdRc::new(RefCell::new(Vec::new()));

        let o1 = order.clone();
        bus.listen("beforeFirstFork", move |_| {
            o1.borrow_mut().push(1);
            Ok(HookOutcome::Continue)
        });
        let o2 = order.clone();
        bus.listen("beforeFirstFork", move |_| {
            o2.borrow_mut().push(2);
            Ok(HookOutcome::Continue)
        });

        bus.trigger(Event::BeforeFirstFork).unwrap();
        assert_eq!(*order.borrow(), vec![1, 2]);
    }

    #[test]
    fn stop_listening_removes_by_id() {
        let bus = EventBus::new();
        let calls = StdRc::new(Cell::new(0));
        let c = calls.clone();
        let id = bus.listen("beforeFirstFork", move |_| {
            c.set(c.get() + 1);
            Ok(HookOutcome::Continue)
        });

        bus.trigger(Event::BeforeFirstFork).unwrap();
        assert_eq!(calls.get(), 1);

        bus.stop_listening("beforeFirstFork", id);
        bus.trigger(Event::BeforeFirstFork).unwrap();
        assert_eq!(calls.get(), 1, "listener must not fire again");
    }

    #[test]
    fn skip_short_circuits_remaining_listeners() {
        let bus = EventBus::new();
        let second_ran = StdRc::new(Cell::new(0));

        bus.listen("beforeFirstFork", |_| Ok(HookOutcome::Skip));
        let second = second_ran.clone();
        bus.listen("beforeFirstFork", move |_| {
            second.set(second.get() + 1);
            Ok(HookOutcome::Continue)
        });

        let outcome = bus.trigger(Event::BeforeFirstFork).unwrap();
        assert_eq!(outcome, HookOutcome::Skip);
        assert_eq!(second_ran.get(), 0);
    }
}
