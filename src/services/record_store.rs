use async_trait::async_trait;
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record {record_id} not found in table {table_id}")]
    NotFound { table_id: Uuid, record_id: String },
    #[error("write rejected: {0}")]
    Rejected(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Port onto the tabular datastore the automations act against. Writes
/// performed through this port do not re-enter the trigger pipeline;
/// cascade suppression happens at the dispatch layer.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create_record(
        &self,
        table_id: Uuid,
        fields: Map<String, Value>,
    ) -> Result<String, StorageError>;
    async fn update_record(
        &self,
        table_id: Uuid,
        record_id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), StorageError>;
    async fn delete_record(&self, table_id: Uuid, record_id: &str) -> Result<(), StorageError>;
    async fn get_record(&self, table_id: Uuid, record_id: &str) -> Result<Value, StorageError>;
    async fn link_records(
        &self,
        table_id: Uuid,
        record_id: &str,
        field_id: &str,
        target_record_id: &str,
    ) -> Result<(), StorageError>;
    async fn unlink_records(
        &self,
        table_id: Uuid,
        record_id: &str,
        field_id: &str,
        target_record_id: &str,
    ) -> Result<(), StorageError>;
    #[allow(dead_code)]
    fn as_any(&self) -> &dyn Any;
}

/// In-memory record store. The default wiring until a real datastore
/// backend is plugged in, and the store executor tests run against.
#[derive(Default)]
pub struct MemoryRecordStore {
    tables: Mutex<HashMap<Uuid, HashMap<String, Map<String, Value>>>>,
    next_id: Mutex<u64>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_id(&self) -> String {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        format!("rec_{}", *next)
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create_record(
        &self,
        table_id: Uuid,
        fields: Map<String, Value>,
    ) -> Result<String, StorageError> {
        let id = self.alloc_id();
        let mut tables = self.tables.lock().unwrap();
        tables
            .entry(table_id)
            .or_default()
            .insert(id.clone(), fields);
        Ok(id)
    }

    async fn update_record(
        &self,
        table_id: Uuid,
        record_id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), StorageError> {
        let mut tables = self.tables.lock().unwrap();
        let record = tables
            .get_mut(&table_id)
            .and_then(|t| t.get_mut(record_id))
            .ok_or_else(|| StorageError::NotFound {
                table_id,
                record_id: record_id.to_string(),
            })?;
        for (k, v) in fields {
            record.insert(k, v);
        }
        Ok(())
    }

    async fn delete_record(&self, table_id: Uuid, record_id: &str) -> Result<(), StorageError> {
        let mut tables = self.tables.lock().unwrap();
        let removed = tables
            .get_mut(&table_id)
            .and_then(|t| t.remove(record_id))
            .is_some();
        if removed {
            Ok(())
        } else {
            Err(StorageError::NotFound {
                table_id,
                record_id: record_id.to_string(),
            })
        }
    }

    async fn get_record(&self, table_id: Uuid, record_id: &str) -> Result<Value, StorageError> {
        let tables = self.tables.lock().unwrap();
        tables
            .get(&table_id)
            .and_then(|t| t.get(record_id))
            .map(|fields| Value::Object(fields.clone()))
            .ok_or_else(|| StorageError::NotFound {
                table_id,
                record_id: record_id.to_string(),
            })
    }

    async fn link_records(
        &self,
        table_id: Uuid,
        record_id: &str,
        field_id: &str,
        target_record_id: &str,
    ) -> Result<(), StorageError> {
        let mut tables = self.tables.lock().unwrap();
        let record = tables
            .get_mut(&table_id)
            .and_then(|t| t.get_mut(record_id))
            .ok_or_else(|| StorageError::NotFound {
                table_id,
                record_id: record_id.to_string(),
            })?;
        let links = record
            .entry(field_id.to_string())
            .or_insert_with(|| Value::Array(vec![]));
        match links {
            Value::Array(arr) => {
                let target = Value::String(target_record_id.to_string());
                if !arr.contains(&target) {
                    arr.push(target);
                }
                Ok(())
            }
            _ => Err(StorageError::Rejected(format!(
                "field `{}` is not a link field",
                field_id
            ))),
        }
    }

    async fn unlink_records(
        &self,
        table_id: Uuid,
        record_id: &str,
        field_id: &str,
        target_record_id: &str,
    ) -> Result<(), StorageError> {
        let mut tables = self.tables.lock().unwrap();
        let record = tables
            .get_mut(&table_id)
            .and_then(|t| t.get_mut(record_id))
            .ok_or_else(|| StorageError::NotFound {
                table_id,
                record_id: record_id.to_string(),
            })?;
        match record.get_mut(field_id) {
            Some(Value::Array(arr)) => {
                arr.retain(|v| v.as_str() != Some(target_record_id));
                Ok(())
            }
            _ => Err(StorageError::Rejected(format!(
                "field `{}` is not a link field",
                field_id
            ))),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn create_update_get_delete() {
        let store = MemoryRecordStore::new();
        let table = Uuid::new_v4();
        let id = store
            .create_record(table, fields(&[("Name", json!("Widget"))]))
            .await
            .unwrap();
        store
            .update_record(table, &id, fields(&[("Qty", json!(3))]))
            .await
            .unwrap();
        let record = store.get_record(table, &id).await.unwrap();
        assert_eq!(record["Name"], "Widget");
        assert_eq!(record["Qty"], 3);
        store.delete_record(table, &id).await.unwrap();
        assert!(matches!(
            store.get_record(table, &id).await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn link_and_unlink_are_idempotent() {
        let store = MemoryRecordStore::new();
        let table = Uuid::new_v4();
        let id = store
            .create_record(table, fields(&[("Related", json!([]))]))
            .await
            .unwrap();
        store.link_records(table, &id, "Related", "rec_x").await.unwrap();
        store.link_records(table, &id, "Related", "rec_x").await.unwrap();
        let record = store.get_record(table, &id).await.unwrap();
        assert_eq!(record["Related"], json!(["rec_x"]));
        store
            .unlink_records(table, &id, "Related", "rec_x")
            .await
            .unwrap();
        let record = store.get_record(table, &id).await.unwrap();
        assert_eq!(record["Related"], json!([]));
    }

    #[tokio::test]
    async fn linking_through_scalar_field_is_rejected() {
        let store = MemoryRecordStore::new();
        let table = Uuid::new_v4();
        let id = store
            .create_record(table, fields(&[("Name", json!("x"))]))
            .await
            .unwrap();
        assert!(matches!(
            store.link_records(table, &id, "Name", "rec_x").await,
            Err(StorageError::Rejected(_))
        ));
    }
}
