//! Execution events
//!
//! Connections and statements publish an *executing* event before each
//! transaction primitive or statement execution and exactly one matching
//! *executed* event afterwards. Listeners (the profiler, or anything a caller
//! subscribes) observe the pairs in LIFO order.
use crate::core::db::Value;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Native transaction primitive being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOperation {
    Begin,
    Commit,
    Rollback,
}

impl TransactionOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionOperation::Begin => "begin",
            TransactionOperation::Commit => "commit",
            TransactionOperation::Rollback => "rollback",
        }
    }
}

impl fmt::Display for TransactionOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an observed operation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success,
    Failure(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub(crate) fn of<T, E: fmt::Display>(result: &Result<T, E>) -> Self {
        match result {
            Ok(_) => Outcome::Success,
            Err(e) => Outcome::Failure(e.to_string()),
        }
    }
}

/// An execution event. `connection` is `None` for the default connection.
#[derive(Debug, Clone)]
pub enum Event<'a> {
    TransactionExecuting {
        connection: Option<&'a str>,
        operation: TransactionOperation,
    },
    TransactionExecuted {
        outcome: Outcome,
    },
    SqlExecuting {
        connection: Option<&'a str>,
        sql: &'a str,
    },
    SqlExecuted {
        outcome: Outcome,
    },
    PreparedExecuting {
        connection: Option<&'a str>,
        sql: &'a str,
        params: &'a [Value],
    },
    PreparedExecuted {
        outcome: Outcome,
    },
}

impl Event<'_> {
    /// `true` for the opening half of a pair.
    pub fn is_executing(&self) -> bool {
        matches!(
            self,
            Event::TransactionExecuting { .. }
                | Event::SqlExecuting { .. }
                | Event::PreparedExecuting { .. }
        )
    }
}

/// Receives execution events.
pub trait ExecutionListener {
    fn on_event(&self, event: &Event<'_>);
}

/// Multi-subscriber publish/subscribe channel for [`Event`]s.
///
/// Clones share the same subscriber list, so a listener subscribed through
/// the engine is seen by every pooled connection.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Rc<RefCell<Vec<Rc<dyn ExecutionListener>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a listener. Subscription is append-only.
    pub fn subscribe(&self, listener: Rc<dyn ExecutionListener>) {
        self.listeners.borrow_mut().push(listener);
    }

    /// `true` when at least one listener is subscribed.
    pub fn is_active(&self) -> bool {
        !self.listeners.borrow().is_empty()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    pub fn publish(&self, event: &Event<'_>) {
        // Snapshot so a listener may subscribe while being notified.
        let listeners: Vec<_> = self.listeners.borrow().iter().cloned().collect();
        for listener in listeners {
            listener.on_event(event);
        }
    }

    /// Runs `op` between an executing event and its executed counterpart.
    ///
    /// With no subscribers neither event is built and `op` runs directly.
    /// If `op` panics, a failed executed event is still published while
    /// unwinding so listeners never hold an unmatched executing event.
    pub(crate) fn around<'e, T, E, S, F>(&self, executing: S, executed: fn(Outcome) -> Event<'static>, op: F) -> Result<T, E>
    where
        E: fmt::Display,
        S: FnOnce() -> Event<'e>,
        F: FnOnce() -> Result<T, E>,
    {
        if !self.is_active() {
            return op();
        }
        self.publish(&executing());
        let mut unfinished = Unfinished { bus: self, executed, armed: true };
        let result = op();
        unfinished.armed = false;
        self.publish(&executed(Outcome::of(&result)));
        result
    }
}

/// Publishes a failed executed event if dropped while armed.
struct Unfinished<'b> {
    bus: &'b EventBus,
    executed: fn(Outcome) -> Event<'static>,
    armed: bool,
}

impl Drop for Unfinished<'_> {
    fn drop(&mut self) {
        if self.armed {
            let outcome = Outcome::Failure("operation panicked".to_string());
            self.bus.publish(&(self.executed)(outcome));
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

pub(crate) fn transaction_executed(outcome: Outcome) -> Event<'static> {
    Event::TransactionExecuted { outcome }
}

pub(crate) fn sql_executed(outcome: Outcome) -> Event<'static> {
    Event::SqlExecuted { outcome }
}

pub(crate) fn prepared_executed(outcome: Outcome) -> Event<'static> {
    Event::PreparedExecuted { outcome }
}
