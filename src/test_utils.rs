/// # Test Utilities Module
///
/// Fixtures shared by the unit tests: an engine backed by a private
/// in-memory database with a small `docs` table.
use crate::client::Client;

/// Standard fixture schema and rows.
pub const DOCS_SCHEMA: &str = "
    CREATE TABLE docs (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        decimal REAL
    );
    INSERT INTO docs (id, name, decimal) VALUES (1, 'doc 1', 12.34);
    INSERT INTO docs (id, name, decimal) VALUES (2, 'doc 2', 0);
";

/// An in-memory engine with the `docs` table on its default connection.
pub fn docs_client() -> Client {
    let mut client = Client::in_memory();
    client
        .run_batch(DOCS_SCHEMA)
        .expect("Failed to create fixture schema");
    client
}

/// A unique connection name, so tests never share pooled state by accident.
pub fn unique_name(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_docs_fixture() {
        let mut client = docs_client();
        assert_eq!(client.count("docs", None).unwrap(), 2);
    }

    #[test]
    fn test_unique_names_differ() {
        assert_ne!(unique_name("conn"), unique_name("conn"));
    }
}
