//! 进程内后端
//!
//! 行为与远端表保持一致：服务端分配 uuid 主键和 created_at，按天查询倒序返回，
//! 每次变更广播给当前订阅者。用于离线使用和测试。

use crate::daily::backend::{
    ChangeEvent, ChangeFeed, ChangeFilter, ChangeKind, ListQuery, TableBackend,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

pub struct MemoryBackend {
    tables: Mutex<HashMap<String, Vec<Value>>>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            tables: Mutex::new(HashMap::new()),
            changes,
        }
    }

    /// 表中当前行数（不区分日期）
    pub fn len(&self, table: &str) -> usize {
        self.lock_tables().get(table).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    fn lock_tables(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Value>>> {
        // 持锁期间不会 panic，中毒时直接沿用内部数据
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, event: ChangeEvent) {
        // 没有订阅者时发送失败，忽略即可
        let _ = self.changes.send(event);
    }
}

fn row_id(row: &Value) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

fn field_str<'a>(row: &'a Value, key: &str) -> &'a str {
    row.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn value_matches(row: &Value, column: &str, expected: &str) -> bool {
    match row.get(column) {
        Some(Value::String(s)) => s == expected,
        Some(Value::Null) | None => false,
        Some(other) => other.to_string() == expected,
    }
}

#[async_trait]
impl TableBackend for MemoryBackend {
    async fn select(&self, query: &ListQuery) -> Result<Vec<Value>> {
        let date = query.date.to_string();
        let tables = self.lock_tables();

        // 先按插入倒序，created_at 相同时后插入的在前
        let mut rows: Vec<Value> = tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .rev()
                    .filter(|row| field_str(row, "date") == date)
                    .filter(|row| match &query.kind {
                        Some(kind) => value_matches(row, &kind.column, &kind.value),
                        None => true,
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        rows.sort_by(|a, b| field_str(b, "created_at").cmp(field_str(a, "created_at")));
        debug!(
            "[Memory] 查询 {} 日期 {}，共 {} 条",
            query.table,
            date,
            rows.len()
        );
        Ok(rows)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value> {
        let Value::Object(mut fields) = row else {
            return Err(anyhow::anyhow!("插入的数据必须是 JSON 对象"));
        };

        let id = Uuid::new_v4().to_string();
        fields.insert("id".to_string(), Value::String(id));
        fields.insert(
            "created_at".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
        let row = Value::Object(fields);

        self.lock_tables()
            .entry(table.to_string())
            .or_default()
            .push(row.clone());

        self.publish(ChangeEvent {
            kind: ChangeKind::Insert,
            table: table.to_string(),
            record: Some(row.clone()),
            old_record: None,
        });
        Ok(row)
    }

    async fn update(&self, table: &str, id: &str, patch: Value) -> Result<Value> {
        let Value::Object(patch) = patch else {
            return Err(anyhow::anyhow!("更新的数据必须是 JSON 对象"));
        };

        let (old, new) = {
            let mut tables = self.lock_tables();
            let row = tables
                .get_mut(table)
                .and_then(|rows| rows.iter_mut().find(|r| row_id(r) == Some(id)))
                .ok_or_else(|| anyhow::anyhow!("记录不存在: {} id={}", table, id))?;

            let old = row.clone();
            if let Value::Object(fields) = row {
                for (k, v) in patch {
                    // id 与 created_at 由服务端维护
                    if k == "id" || k == "created_at" {
                        continue;
                    }
                    fields.insert(k, v);
                }
            }
            (old, row.clone())
        };

        self.publish(ChangeEvent {
            kind: ChangeKind::Update,
            table: table.to_string(),
            record: Some(new.clone()),
            old_record: Some(old),
        });
        Ok(new)
    }

    async fn delete(&self, table: &str, id: &str) -> Result<()> {
        let removed = {
            let mut tables = self.lock_tables();
            let rows = tables
                .get_mut(table)
                .ok_or_else(|| anyhow::anyhow!("记录不存在: {} id={}", table, id))?;
            let pos = rows
                .iter()
                .position(|r| row_id(r) == Some(id))
                .ok_or_else(|| anyhow::anyhow!("记录不存在: {} id={}", table, id))?;
            rows.remove(pos)
        };

        self.publish(ChangeEvent {
            kind: ChangeKind::Delete,
            table: table.to_string(),
            record: None,
            old_record: Some(removed),
        });
        Ok(())
    }

    async fn ping(&self, _table: &str) -> Result<()> {
        Ok(())
    }

    async fn subscribe(&self, filter: ChangeFilter) -> Result<ChangeFeed> {
        let mut changes = self.changes.subscribe();
        let (tx, rx) = mpsc::channel(CHANGE_CHANNEL_CAPACITY);

        let task = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(event) => {
                        if !filter.matches(&event) {
                            continue;
                        }
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("[Memory] 订阅者落后，丢弃 {} 条变更", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(ChangeFeed::new(rx, vec![task]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::time::Duration;

    fn day(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn id_of(row: &Value) -> String {
        row_id(row).unwrap().to_string()
    }

    #[tokio::test]
    async fn insert_assigns_id_and_created_at() {
        let backend = MemoryBackend::new();
        let a = backend
            .insert("todos", json!({"text": "a", "date": "2025-03-01", "id": "client-id"}))
            .await
            .unwrap();
        let b = backend
            .insert("todos", json!({"text": "b", "date": "2025-03-01"}))
            .await
            .unwrap();

        assert_ne!(id_of(&a), "client-id");
        assert!(Uuid::parse_str(&id_of(&a)).is_ok());
        assert_ne!(id_of(&a), id_of(&b));
        assert!(a["created_at"].is_string());
        assert_eq!(backend.len("todos"), 2);
    }

    #[tokio::test]
    async fn select_filters_by_day_and_kind_newest_first() {
        let backend = MemoryBackend::new();
        let mut inserted = Vec::new();
        for (kind, date) in [
            ("todo", "2025-03-01"),
            ("question", "2025-03-01"),
            ("todo", "2025-03-01"),
            ("todo", "2025-03-02"),
        ] {
            let row = backend
                .insert("daily_records", json!({"type": kind, "date": date}))
                .await
                .unwrap();
            inserted.push(id_of(&row));
        }

        let all = backend
            .select(&ListQuery::new("daily_records", day("2025-03-01")))
            .await
            .unwrap();
        let ids: Vec<String> = all.iter().map(id_of).collect();
        assert_eq!(ids, vec![inserted[2].clone(), inserted[1].clone(), inserted[0].clone()]);

        let todos = backend
            .select(&ListQuery::new("daily_records", day("2025-03-01")).with_kind("type", "todo"))
            .await
            .unwrap();
        let ids: Vec<String> = todos.iter().map(id_of).collect();
        assert_eq!(ids, vec![inserted[2].clone(), inserted[0].clone()]);
    }

    #[tokio::test]
    async fn update_and_delete_missing_id_fail() {
        let backend = MemoryBackend::new();
        assert!(backend.update("todos", "nope", json!({"completed": true})).await.is_err());
        assert!(backend.delete("todos", "nope").await.is_err());

        let row = backend
            .insert("todos", json!({"text": "a", "date": "2025-03-01"}))
            .await
            .unwrap();
        assert!(backend.delete("todos", "nope").await.is_err());
        assert!(backend.delete("todos", &id_of(&row)).await.is_ok());
        assert!(backend.is_empty("todos"));
    }

    #[tokio::test]
    async fn update_keeps_server_fields() {
        let backend = MemoryBackend::new();
        let row = backend
            .insert("todos", json!({"text": "a", "date": "2025-03-01"}))
            .await
            .unwrap();
        let id = id_of(&row);

        let updated = backend
            .update("todos", &id, json!({"completed": true, "id": "other", "created_at": "x"}))
            .await
            .unwrap();
        assert_eq!(id_of(&updated), id);
        assert_eq!(updated["created_at"], row["created_at"]);
        assert_eq!(updated["completed"], json!(true));
        assert_eq!(updated["text"], json!("a"));
    }

    #[tokio::test]
    async fn subscribe_only_sees_matching_changes() {
        let backend = MemoryBackend::new();
        let mut feed = backend
            .subscribe(ChangeFilter::new("todos", day("2025-03-01")))
            .await
            .unwrap();

        backend
            .insert("todos", json!({"text": "other day", "date": "2025-03-02"}))
            .await
            .unwrap();
        backend
            .insert("daily_records", json!({"content": "other table", "date": "2025-03-01"}))
            .await
            .unwrap();
        backend
            .insert("todos", json!({"text": "hit", "date": "2025-03-01"}))
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), feed.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.record.unwrap()["text"], json!("hit"));
    }
}
