//! Database access engine over SQLite.
//!
//! A [`Client`] manages named connections, nests transactions per
//! connection, builds parameterized SQL from [`Predicate`]s, imports rows in
//! batches and publishes execution events that a [`Profiler`] can time.

// Core infrastructure modules
pub mod config;
pub mod core;
pub mod events;

// Engine modules
pub mod client;
pub mod import;
pub mod profiler;
pub mod transaction;

#[cfg(test)]
mod test_utils;

pub use client::{Aggregate, Client, Predicate};
pub use config::Config;
pub use crate::core::db::{ColumnMap, Connection, ConnectionFactory, Driver, Row, Statement, Value};
pub use crate::core::{DbError, Result};
pub use events::{Event, EventBus, ExecutionListener, Outcome, TransactionOperation};
pub use import::{ImportOptions, ImportRows};
pub use profiler::{JsonHandler, MemoryHandler, Operation, ProfileHandler, ProfileRecord, Profiler, StderrHandler};
