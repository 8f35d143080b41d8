//! 记录监听器回调接口

use async_trait::async_trait;
use chrono::NaiveDate;

/// 记录变更监听器
///
/// 订阅日期内有任何新增、更新或删除时，以重新拉取的完整列表回调。
#[async_trait]
pub trait RecordListener<T>: Send + Sync {
    async fn on_records_changed(&self, date: NaiveDate, records: Vec<T>);
}

/// 默认空实现（无操作）
pub struct EmptyRecordListener;

#[async_trait]
impl<T: Send + 'static> RecordListener<T> for EmptyRecordListener {
    async fn on_records_changed(&self, _date: NaiveDate, _records: Vec<T>) {}
}

/// 用闭包作为监听器
pub struct FnRecordListener<F>(pub F);

#[async_trait]
impl<T, F> RecordListener<T> for FnRecordListener<F>
where
    T: Send + 'static,
    F: Fn(NaiveDate, Vec<T>) + Send + Sync,
{
    async fn on_records_changed(&self, date: NaiveDate, records: Vec<T>) {
        (self.0)(date, records)
    }
}
