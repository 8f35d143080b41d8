//! 后端抽象层
//!
//! 记录读写与变更通知都通过 [`TableBackend`] 完成，行数据统一使用 JSON，
//! 由上层的 `RecordStore<T>` 负责反序列化为具体类型。

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// 按日查询条件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub table: String,
    pub date: NaiveDate,
    pub kind: Option<KindFilter>,
}

/// 子类型过滤（列名 = 值）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindFilter {
    pub column: String,
    pub value: String,
}

impl ListQuery {
    pub fn new(table: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            table: table.into(),
            date,
            kind: None,
        }
    }

    pub fn with_kind(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.kind = Some(KindFilter {
            column: column.into(),
            value: value.into(),
        });
        self
    }
}

/// 行级变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    /// 解析 realtime 推送中的 `type` 字段（INSERT / UPDATE / DELETE）
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// 行级变更事件
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub table: String,
    /// 变更后的行（删除时为空）
    pub record: Option<Value>,
    /// 变更前的行（插入时为空；删除事件可能只带主键）
    pub old_record: Option<Value>,
}

/// 变更订阅范围：某张表中某一天的记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFilter {
    pub table: String,
    pub date: NaiveDate,
}

impl ChangeFilter {
    pub fn new(table: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            table: table.into(),
            date,
        }
    }

    /// PostgREST 风格的过滤表达式
    pub fn postgrest_filter(&self) -> String {
        format!("date=eq.{}", self.date)
    }

    /// 事件是否落在订阅范围内
    ///
    /// 两个行镜像都不带日期时（例如只含主键的删除事件）视为命中，
    /// 由订阅方重新拉取列表。
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table {
            return false;
        }

        let date = self.date.to_string();
        let dates: Vec<&str> = [&event.record, &event.old_record]
            .into_iter()
            .flatten()
            .filter_map(|row| row.get("date").and_then(Value::as_str))
            .collect();

        dates.is_empty() || dates.iter().any(|d| *d == date)
    }
}

/// 变更事件流；drop 时终止所有为其供数的后台任务
pub struct ChangeFeed {
    rx: mpsc::Receiver<ChangeEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl ChangeFeed {
    pub fn new(rx: mpsc::Receiver<ChangeEvent>, tasks: Vec<JoinHandle<()>>) -> Self {
        Self { rx, tasks }
    }

    /// 下一个事件；连接关闭后返回 None
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// 远端表的最小访问接口
#[async_trait]
pub trait TableBackend: Send + Sync {
    /// 查询某天的记录，按 created_at 倒序
    async fn select(&self, query: &ListQuery) -> Result<Vec<Value>>;

    /// 插入一行，返回带服务端 id / created_at 的完整行
    async fn insert(&self, table: &str, row: Value) -> Result<Value>;

    /// 按 id 合并更新字段，返回更新后的行；id 不存在时报错
    async fn update(&self, table: &str, id: &str, patch: Value) -> Result<Value>;

    /// 按 id 删除；id 不存在时报错
    async fn delete(&self, table: &str, id: &str) -> Result<()>;

    /// 连通性检查
    async fn ping(&self, table: &str) -> Result<()>;

    /// 订阅变更
    async fn subscribe(&self, filter: ChangeFilter) -> Result<ChangeFeed>;
}
