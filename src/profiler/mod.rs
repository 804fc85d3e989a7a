//! Operation profiler
//!
//! The [`Profiler`] listens on the engine's event bus, times every
//! transaction primitive and statement execution, and hands a
//! [`ProfileRecord`] to the configured [`ProfileHandler`]. Without a handler
//! the record is logged at debug level when logging is enabled.
use crate::config::{HandlerKind, ProfilerConfig};
use crate::core::db::Value;
use crate::events::{Event, ExecutionListener, Outcome};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Kind of profiled operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Begin,
    Commit,
    Rollback,
    Sql,
    Prepared,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Begin => "begin",
            Operation::Commit => "commit",
            Operation::Rollback => "rollback",
            Operation::Sql => "sql",
            Operation::Prepared => "prepared",
        }
    }

    pub fn is_transaction(&self) -> bool {
        matches!(self, Operation::Begin | Operation::Commit | Operation::Rollback)
    }
}

impl From<crate::events::TransactionOperation> for Operation {
    fn from(op: crate::events::TransactionOperation) -> Self {
        use crate::events::TransactionOperation::*;
        match op {
            Begin => Operation::Begin,
            Commit => Operation::Commit,
            Rollback => Operation::Rollback,
        }
    }
}

/// Timing and metadata of one finished operation.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileRecord {
    pub connection: Option<String>,
    pub operation: Operation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Value>,
    pub started_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_seconds")]
    pub running_time: Duration,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProfileRecord {
    pub fn connection_name(&self) -> &str {
        self.connection.as_deref().unwrap_or(crate::core::db::DEFAULT_CONNECTION_NAME)
    }
}

impl fmt::Display for ProfileRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {:.6}s",
            self.connection_name(),
            self.operation.as_str(),
            self.running_time.as_secs_f64()
        )?;
        if let Some(sql) = &self.sql {
            write!(f, " {}", sql)?;
        }
        if !self.params.is_empty() {
            let params: Vec<String> = self.params.iter().map(ToString::to_string).collect();
            write!(f, " [{}]", params.join(", "))?;
        }
        if let Some(error) = &self.error {
            write!(f, " failed: {}", error)?;
        }
        Ok(())
    }
}

fn serialize_seconds<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Receives finished profile records.
pub trait ProfileHandler {
    fn handle(&self, record: ProfileRecord);
}

/// Logs each record as one JSON document at debug level.
#[derive(Debug, Default)]
pub struct JsonHandler;

impl ProfileHandler for JsonHandler {
    fn handle(&self, record: ProfileRecord) {
        match serde_json::to_string(&record) {
            Ok(line) => debug!(target: "dbclient::profile", "{}", line),
            Err(e) => warn!("Failed to serialize profile record: {}", e),
        }
    }
}

/// Writes each record as one line on standard error.
#[derive(Debug, Default)]
pub struct StderrHandler;

impl ProfileHandler for StderrHandler {
    fn handle(&self, record: ProfileRecord) {
        eprintln!("{}", record);
    }
}

/// Collects records in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryHandler {
    records: Rc<RefCell<Vec<ProfileRecord>>>,
}

impl MemoryHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ProfileRecord> {
        self.records.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.records.borrow_mut().clear();
    }
}

impl ProfileHandler for MemoryHandler {
    fn handle(&self, record: ProfileRecord) {
        self.records.borrow_mut().push(record);
    }
}

struct Pending {
    connection: Option<String>,
    operation: Operation,
    sql: Option<String>,
    params: Vec<Value>,
    started_at: DateTime<Utc>,
    start: Instant,
}

/// Times operations observed on the event bus.
pub struct Profiler {
    pending: RefCell<Vec<Pending>>,
    handler: Option<Rc<dyn ProfileHandler>>,
    log: bool,
}

impl Profiler {
    /// A profiler without handler; `log` decides whether records reach `tracing`.
    pub fn new(log: bool) -> Self {
        Profiler {
            pending: RefCell::new(Vec::new()),
            handler: None,
            log,
        }
    }

    /// Forwards every record to `handler` instead of the log.
    pub fn with_handler(mut self, handler: Rc<dyn ProfileHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Builds the profiler described by configuration; `None` when disabled.
    pub fn from_config(config: &ProfilerConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let profiler = Profiler::new(config.log);
        Some(match config.handler {
            Some(HandlerKind::Json) => profiler.with_handler(Rc::new(JsonHandler)),
            Some(HandlerKind::Stderr) => profiler.with_handler(Rc::new(StderrHandler)),
            None => profiler,
        })
    }

    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    /// Operations started but not finished yet.
    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    fn start(&self, connection: Option<&str>, operation: Operation, sql: Option<&str>, params: &[Value]) {
        self.pending.borrow_mut().push(Pending {
            connection: connection.map(str::to_string),
            operation,
            sql: sql.map(str::to_string),
            params: params.to_vec(),
            started_at: Utc::now(),
            start: Instant::now(),
        });
    }

    fn finish(&self, outcome: &Outcome) {
        let Some(pending) = self.pending.borrow_mut().pop() else {
            warn!("Profiler received a finished event without a matching start");
            return;
        };
        let (succeeded, error) = match outcome {
            Outcome::Success => (true, None),
            Outcome::Failure(message) => (false, Some(message.clone())),
        };
        let record = ProfileRecord {
            connection: pending.connection,
            operation: pending.operation,
            sql: pending.sql,
            params: pending.params,
            started_at: pending.started_at,
            running_time: pending.start.elapsed(),
            succeeded,
            error,
        };
        self.emit(record);
    }

    fn emit(&self, record: ProfileRecord) {
        if let Some(handler) = &self.handler {
            handler.handle(record);
        } else if self.log {
            debug!(target: "dbclient::profiler", "{}", record);
        }
    }
}

impl ExecutionListener for Profiler {
    fn on_event(&self, event: &Event<'_>) {
        match event {
            Event::TransactionExecuting { connection, operation } => {
                self.start(*connection, Operation::from(*operation), None, &[]);
            }
            Event::SqlExecuting { connection, sql } => {
                self.start(*connection, Operation::Sql, Some(*sql), &[]);
            }
            Event::PreparedExecuting { connection, sql, params } => {
                self.start(*connection, Operation::Prepared, Some(*sql), params);
            }
            Event::TransactionExecuted { outcome }
            | Event::SqlExecuted { outcome }
            | Event::PreparedExecuted { outcome } => self.finish(outcome),
        }
    }
}

impl fmt::Debug for Profiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profiler")
            .field("pending", &self.pending_count())
            .field("has_handler", &self.has_handler())
            .field("log", &self.log)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TransactionOperation;

    fn profiler_with_memory() -> (Profiler, MemoryHandler) {
        let memory = MemoryHandler::new();
        let profiler = Profiler::new(false).with_handler(Rc::new(memory.clone()));
        (profiler, memory)
    }

    #[test]
    fn test_transaction_pair_produces_record() {
        let (profiler, memory) = profiler_with_memory();
        profiler.on_event(&Event::TransactionExecuting {
            connection: Some("backup"),
            operation: TransactionOperation::Begin,
        });
        assert_eq!(profiler.pending_count(), 1);
        profiler.on_event(&Event::TransactionExecuted { outcome: Outcome::Success });

        let records = memory.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].operation, Operation::Begin);
        assert_eq!(records[0].connection_name(), "backup");
        assert!(records[0].succeeded);
        assert!(records[0].sql.is_none());
        assert_eq!(profiler.pending_count(), 0);
    }

    #[test]
    fn test_nested_pairs_match_lifo() {
        let (profiler, memory) = profiler_with_memory();
        profiler.on_event(&Event::TransactionExecuting { connection: None, operation: TransactionOperation::Begin });
        profiler.on_event(&Event::PreparedExecuting { connection: None, sql: "SELECT ?", params: &[Value::Integer(1)] });
        profiler.on_event(&Event::PreparedExecuted { outcome: Outcome::Failure("boom".into()) });
        profiler.on_event(&Event::TransactionExecuted { outcome: Outcome::Success });

        let records = memory.records();
        assert_eq!(records[0].operation, Operation::Prepared);
        assert_eq!(records[0].params, vec![Value::Integer(1)]);
        assert_eq!(records[0].error.as_deref(), Some("boom"));
        assert_eq!(records[1].operation, Operation::Begin);
        assert!(records[1].running_time >= records[0].running_time);
    }

    #[test]
    fn test_panicking_operation_leaves_no_stale_pending() {
        let (profiler, memory) = profiler_with_memory();
        let profiler = Rc::new(profiler);
        let bus = crate::events::EventBus::new();
        bus.subscribe(profiler.clone());

        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: crate::Result<()> = bus.around(
                || Event::SqlExecuting { connection: None, sql: "SELECT 1" },
                crate::events::sql_executed,
                || panic!("driver blew up"),
            );
        }));
        assert!(caught.is_err());
        assert_eq!(profiler.pending_count(), 0);

        let _: crate::Result<()> = bus.around(
            || Event::TransactionExecuting { connection: Some("backup"), operation: TransactionOperation::Begin },
            crate::events::transaction_executed,
            || Ok(()),
        );
        let records = memory.records();
        assert_eq!(records.len(), 2);
        assert!(!records[0].succeeded);
        assert_eq!(records[0].sql.as_deref(), Some("SELECT 1"));
        assert_eq!(records[1].operation, Operation::Begin);
        assert_eq!(records[1].connection_name(), "backup");
    }

    #[test]
    fn test_unmatched_finish_is_ignored() {
        let (profiler, memory) = profiler_with_memory();
        profiler.on_event(&Event::SqlExecuted { outcome: Outcome::Success });
        assert!(memory.is_empty());
    }

    #[test]
    fn test_from_config() {
        assert!(Profiler::from_config(&ProfilerConfig::default()).is_none());

        let config = ProfilerConfig { enabled: true, log: true, handler: Some(HandlerKind::Json) };
        let profiler = Profiler::from_config(&config).unwrap();
        assert!(profiler.has_handler());

        let config = ProfilerConfig { enabled: true, log: true, handler: None };
        assert!(!Profiler::from_config(&config).unwrap().has_handler());
    }

    #[test]
    fn test_record_formatting() {
        let record = ProfileRecord {
            connection: None,
            operation: Operation::Sql,
            sql: Some("DELETE FROM docs".into()),
            params: vec![],
            started_at: Utc::now(),
            running_time: Duration::from_millis(1500),
            succeeded: true,
            error: None,
        };
        assert_eq!(record.to_string(), "[default] sql 1.500000s DELETE FROM docs");

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["operation"], "sql");
        assert_eq!(json["running_time"], 1.5);
        assert!(json.get("params").is_none());
    }
}
