//! 记录模型定义

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// 远端表中的一种记录
pub trait Record: DeserializeOwned + Serialize + Clone + Send + Sync + 'static {
    /// 新增时提交的数据（不含 id / created_at）
    type New: Serialize + Send + Sync;
    /// 部分更新时提交的数据
    type Patch: Serialize + Send + Sync;

    /// 表名
    const TABLE: &'static str;
    /// 子类型列名；None 表示该表不区分子类型
    const KIND_COLUMN: Option<&'static str> = None;

    fn id(&self) -> &str;
}

/// 主键统一按字符串处理：uuid 原样保留，整数主键转成十进制字符串
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Int(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Int(n) => n.to_string(),
    })
}

/// 每日记录的子类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    Todo,
    Question,
    Insight,
    Note,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::Question => "question",
            Self::Insight => "insight",
            Self::Note => "note",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "todo" => Ok(Self::Todo),
            "question" => Ok(Self::Question),
            "insight" => Ok(Self::Insight),
            "note" => Ok(Self::Note),
            other => Err(anyhow::anyhow!("未知的记录类型: {}", other)),
        }
    }
}

/// 待办优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(anyhow::anyhow!("未知的优先级: {}", other)),
        }
    }
}

/// 每日记录（表 `daily_records`）
///
/// 待办使用 `completed` / `priority`，问题使用 `answer`，感悟使用 `tags`，
/// 随手记只有正文。`metadata` 留给各端存放附加信息。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub content: String,
    /// 按天分组的日期
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Record for DailyRecord {
    type New = NewDailyRecord;
    type Patch = DailyRecordPatch;

    const TABLE: &'static str = "daily_records";
    const KIND_COLUMN: Option<&'static str> = Some("type");

    fn id(&self) -> &str {
        &self.id
    }
}

/// 新增每日记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewDailyRecord {
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub content: String,
    pub date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl NewDailyRecord {
    fn base(record_type: RecordType, date: NaiveDate, content: impl Into<String>) -> Self {
        Self {
            record_type,
            content: content.into(),
            date,
            completed: None,
            priority: None,
            answer: None,
            tags: None,
            metadata: None,
        }
    }

    /// 未完成的待办
    pub fn todo(date: NaiveDate, content: impl Into<String>, priority: Priority) -> Self {
        Self {
            completed: Some(false),
            priority: Some(priority),
            ..Self::base(RecordType::Todo, date, content)
        }
    }

    pub fn question(date: NaiveDate, content: impl Into<String>, answer: Option<String>) -> Self {
        Self {
            answer,
            ..Self::base(RecordType::Question, date, content)
        }
    }

    pub fn insight(date: NaiveDate, content: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            tags: Some(tags),
            ..Self::base(RecordType::Insight, date, content)
        }
    }

    pub fn note(date: NaiveDate, content: impl Into<String>) -> Self {
        Self::base(RecordType::Note, date, content)
    }

    pub fn with_metadata(self, metadata: Value) -> Self {
        Self {
            metadata: Some(metadata),
            ..self
        }
    }
}

/// 每日记录的部分更新，只序列化设置了的字段
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DailyRecordPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl DailyRecordPatch {
    pub fn completed(completed: bool) -> Self {
        Self {
            completed: Some(completed),
            ..Self::default()
        }
    }

    pub fn answer(answer: impl Into<String>) -> Self {
        Self {
            answer: Some(answer.into()),
            ..Self::default()
        }
    }
}

/// 待办（表 `todos`）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Todo {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub priority: Priority,
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl Record for Todo {
    type New = NewTodo;
    type Patch = TodoPatch;

    const TABLE: &'static str = "todos";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTodo {
    pub text: String,
    pub date: NaiveDate,
    pub completed: bool,
    pub priority: Priority,
}

impl NewTodo {
    pub fn new(date: NaiveDate, text: impl Into<String>, priority: Priority) -> Self {
        Self {
            text: text.into(),
            date,
            completed: false,
            priority,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TodoPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

impl TodoPatch {
    pub fn completed(completed: bool) -> Self {
        Self {
            completed: Some(completed),
            ..Self::default()
        }
    }
}
