use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
    #[error("Collection '{collection}' has no index named '{index}'")]
    UnknownIndex {
        collection: &'static str,
        index: String,
    },
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Whether a store survives a process restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    /// Backed by an on-device file
    Durable,
    /// Process memory only; contents are lost on restart
    Volatile,
}

impl Durability {
    #[must_use]
    pub fn is_durable(&self) -> bool {
        matches!(self, Self::Durable)
    }
}

impl std::fmt::Display for Durability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Durable => write!(f, "durable"),
            Self::Volatile => write!(f, "volatile"),
        }
    }
}

/// A named group of JSON records sharing a primary key field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Collection {
    pub name: &'static str,
    /// Top-level string field holding the primary key
    pub key_field: &'static str,
    /// Top-level fields usable with [`RecordStore::get_by_index`]
    pub indexes: &'static [&'static str],
}

impl Collection {
    /// Extract the primary key from a record.
    pub fn key_of<'a>(&self, record: &'a Value) -> Result<&'a str, StorageError> {
        record
            .get(self.key_field)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                StorageError::InvalidRecord(format!(
                    "record for '{}' is missing string field '{}'",
                    self.name, self.key_field
                ))
            })
    }

    pub(crate) fn check_index(&self, index: &str) -> Result<(), StorageError> {
        if self.indexes.contains(&index) {
            Ok(())
        } else {
            Err(StorageError::UnknownIndex {
                collection: self.name,
                index: index.to_string(),
            })
        }
    }
}

/// Text form used when comparing index values.
///
/// Mirrors SQLite's `CAST(json_extract(..) AS TEXT)` so every backend agrees:
/// strings as-is, numbers in decimal, booleans as `1`/`0`.
pub fn index_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        _ => None,
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Capability check: does data written here survive a restart?
    fn durability(&self) -> Durability;

    async fn get(&self, collection: &Collection, key: &str) -> Result<Option<Value>, StorageError>;

    /// All records in insertion order. Overwriting a record keeps its position.
    async fn get_all(&self, collection: &Collection) -> Result<Vec<Value>, StorageError>;

    async fn get_by_index(
        &self,
        collection: &Collection,
        index: &str,
        value: &Value,
    ) -> Result<Vec<Value>, StorageError>;

    /// Upsert by the record's primary key.
    async fn put(&self, collection: &Collection, record: &Value) -> Result<(), StorageError>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, collection: &Collection, key: &str) -> Result<(), StorageError>;

    /// Remove every record in the collection, returning how many were removed.
    async fn clear(&self, collection: &Collection) -> Result<u64, StorageError>;

    /// Key-ordered page of records with keys strictly greater than `after`.
    /// Returns an empty vec once the collection is exhausted.
    async fn scan(
        &self,
        collection: &Collection,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Value>, StorageError>;

    async fn count(&self, collection: &Collection) -> Result<u64, StorageError>;
}
