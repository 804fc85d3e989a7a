/// Database Module
///
/// The driver-facing layer of the engine, organized into focused submodules:
/// - **Connection** (`connection.rs`): one live handle, identifier quoting and transaction nesting
/// - **Factory** (`factory.rs`): DSN parsing and opening connections from configuration
/// - **Statement** (`statement.rs`): prepared statements, parameter binding and buffered results
/// - **Values** (`value.rs`): parameter and row representations shared by every layer
///
/// ## Error Handling
///
/// All operations report failures through the crate-wide `DbError` type.
pub mod connection;
pub mod factory;
pub mod statement;
pub mod value;

pub use connection::*;
pub use factory::*;
pub use statement::*;
pub use value::*;
