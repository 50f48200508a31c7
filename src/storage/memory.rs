use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use super::traits::{index_text, Collection, Durability, RecordStore, StorageError};

/// Rows of one collection, tagged with an insertion sequence number.
#[derive(Default)]
struct Table {
    next_seq: u64,
    rows: HashMap<String, (u64, Value)>,
}

impl Table {
    fn ordered(&self) -> Vec<Value> {
        let mut rows: Vec<&(u64, Value)> = self.rows.values().collect();
        rows.sort_by_key(|(seq, _)| *seq);
        rows.into_iter().map(|(_, v)| v.clone()).collect()
    }
}

/// Volatile record store. Same semantics as the SQLite store, nothing survives a restart.
pub struct MemoryStore {
    tables: DashMap<&'static str, Table>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
        }
    }

    /// Total records across all collections
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.iter().map(|t| t.rows.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn durability(&self) -> Durability {
        Durability::Volatile
    }

    async fn get(&self, collection: &Collection, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self
            .tables
            .get(collection.name)
            .and_then(|t| t.rows.get(key).map(|(_, v)| v.clone())))
    }

    async fn get_all(&self, collection: &Collection) -> Result<Vec<Value>, StorageError> {
        Ok(self
            .tables
            .get(collection.name)
            .map(|t| t.ordered())
            .unwrap_or_default())
    }

    async fn get_by_index(
        &self,
        collection: &Collection,
        index: &str,
        value: &Value,
    ) -> Result<Vec<Value>, StorageError> {
        collection.check_index(index)?;
        let Some(wanted) = index_text(value) else {
            return Ok(Vec::new());
        };

        let all = self.get_all(collection).await?;
        Ok(all
            .into_iter()
            .filter(|record| {
                record
                    .get(index)
                    .and_then(index_text)
                    .is_some_and(|text| text == wanted)
            })
            .collect())
    }

    async fn put(&self, collection: &Collection, record: &Value) -> Result<(), StorageError> {
        let key = collection.key_of(record)?.to_string();
        let mut table = self.tables.entry(collection.name).or_default();

        // Overwrites keep their original position
        let existing = table.rows.get(&key).map(|(seq, _)| *seq);
        let seq = match existing {
            Some(seq) => seq,
            None => {
                table.next_seq += 1;
                table.next_seq
            }
        };
        table.rows.insert(key, (seq, record.clone()));
        Ok(())
    }

    async fn delete(&self, collection: &Collection, key: &str) -> Result<(), StorageError> {
        if let Some(mut table) = self.tables.get_mut(collection.name) {
            table.rows.remove(key);
        }
        Ok(())
    }

    async fn clear(&self, collection: &Collection) -> Result<u64, StorageError> {
        Ok(self
            .tables
            .remove(collection.name)
            .map(|(_, t)| t.rows.len() as u64)
            .unwrap_or(0))
    }

    async fn scan(
        &self,
        collection: &Collection,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Value>, StorageError> {
        let Some(table) = self.tables.get(collection.name) else {
            return Ok(Vec::new());
        };

        let mut keys: Vec<&String> = table
            .rows
            .keys()
            .filter(|k| after.map_or(true, |a| k.as_str() > a))
            .collect();
        keys.sort();

        Ok(keys
            .into_iter()
            .take(limit)
            .filter_map(|k| table.rows.get(k).map(|(_, v)| v.clone()))
            .collect())
    }

    async fn count(&self, collection: &Collection) -> Result<u64, StorageError> {
        Ok(self
            .tables
            .get(collection.name)
            .map(|t| t.rows.len() as u64)
            .unwrap_or(0))
    }
}
