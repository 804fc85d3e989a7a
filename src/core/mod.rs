/// Core Module
///
/// Shared infrastructure of the engine: the driver-facing database layer and
/// the error type every other module reports through.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{DbError, Result};
