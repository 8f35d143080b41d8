//! 记录模块
//!
//! 每日记录（`daily_records`）与待办（`todos`）两张表共用同一套访问服务

pub mod api;
pub mod listener;
pub mod models;
pub mod service;

// 重新导出主要类型
pub use api::RecordApi;
pub use listener::{EmptyRecordListener, FnRecordListener, RecordListener};
pub use models::{
    DailyRecord, DailyRecordPatch, NewDailyRecord, NewTodo, Priority, Record, RecordType, Todo,
    TodoPatch,
};
pub use service::{DailyRecordStore, RecordStore, StoreState, Subscription, TodoStore};
