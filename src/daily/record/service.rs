//! 记录访问服务层
//!
//! `RecordStore<T>` 是面向界面的统一入口：按天列表、增、改、删、按天订阅。
//! 所有操作共享一份可观察的状态（是否已配置、是否加载中、最近一次错误），
//! 错误统一折叠成可读字符串；未配置时静默返回空值。

use crate::daily::backend::{ChangeFilter, ListQuery, TableBackend};
use crate::daily::client::ClientConfig;
use crate::daily::provider::ClientProvider;
use crate::daily::record::listener::RecordListener;
use crate::daily::record::models::{DailyRecord, Record, Todo};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 每日记录服务
pub type DailyRecordStore = RecordStore<DailyRecord>;
/// 待办服务
pub type TodoStore = RecordStore<Todo>;

/// 供界面观察的共享状态
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreState {
    pub is_configured: bool,
    pub is_loading: bool,
    /// 最近一次失败的可读信息；成功的操作会清空
    pub error: Option<String>,
}

/// 订阅句柄；调用 `unsubscribe` 或 drop 后停止监听
pub struct Subscription {
    date: NaiveDate,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn unsubscribe(self) {
        // drop 中终止任务
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// 一次操作的加载标记
///
/// 操作结束时调用 `succeed` / `fail`；若操作中途被取消（所在任务被 abort），
/// drop 时复位 `is_loading`。
struct Loading {
    state: Arc<watch::Sender<StoreState>>,
    settled: bool,
}

impl Loading {
    fn succeed(mut self) {
        self.settled = true;
        self.state.send_modify(|s| s.is_loading = false);
    }

    fn fail(mut self, action: &str, err: &anyhow::Error) {
        self.settled = true;
        record_failure(&self.state, action, err);
    }
}

impl Drop for Loading {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.state.send_if_modified(|s| {
            let changed = s.is_loading;
            s.is_loading = false;
            changed
        });
    }
}

pub struct RecordStore<T: Record> {
    provider: Arc<ClientProvider>,
    state: Arc<watch::Sender<StoreState>>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> Clone for RecordStore<T> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            state: self.state.clone(),
            _record: PhantomData,
        }
    }
}

impl<T: Record> RecordStore<T> {
    pub fn new(provider: Arc<ClientProvider>) -> Self {
        let (state, _) = watch::channel(StoreState::default());
        Self {
            provider,
            state: Arc::new(state),
            _record: PhantomData,
        }
    }

    pub fn provider(&self) -> &Arc<ClientProvider> {
        &self.provider
    }

    /// 订阅状态变化
    pub fn state(&self) -> watch::Receiver<StoreState> {
        self.state.subscribe()
    }

    /// 当前状态快照
    pub fn snapshot(&self) -> StoreState {
        self.state.borrow().clone()
    }

    /// 是否已配置（会触发一次客户端解析）
    pub async fn is_configured(&self) -> bool {
        self.backend().await.is_some()
    }

    /// 保存配置；之后的操作使用新客户端
    pub async fn configure(&self, config: &ClientConfig) -> bool {
        match self.provider.configure(config).await {
            Ok(()) => {
                self.state.send_modify(|s| {
                    s.is_configured = true;
                    s.error = None;
                });
                true
            }
            Err(e) => {
                self.fail("保存配置失败", &e);
                false
            }
        }
    }

    /// 清除本地配置
    pub async fn clear_config(&self) -> bool {
        match self.provider.clear_config().await {
            Ok(()) => {
                // 环境变量提供的配置仍然有效
                let configured = self.is_configured().await;
                self.state.send_modify(|s| {
                    s.is_configured = configured;
                    s.error = None;
                });
                true
            }
            Err(e) => {
                self.fail("清除配置失败", &e);
                false
            }
        }
    }

    /// 查询某天的记录（按创建时间倒序）
    ///
    /// `kind` 只对有子类型列的表生效；未配置时返回空列表。
    pub async fn list(&self, date: NaiveDate, kind: Option<&str>) -> Vec<T> {
        let Some(backend) = self.backend().await else {
            return Vec::new();
        };

        let query = Self::list_query(date, kind);
        let loading = self.begin();
        let result = fetch::<T>(backend.as_ref(), &query).await;
        match result {
            Ok(records) => {
                loading.succeed();
                debug!("[Store] {} 日期 {} 共 {} 条", T::TABLE, date, records.len());
                records
            }
            Err(e) => {
                loading.fail("获取记录失败", &e);
                Vec::new()
            }
        }
    }

    /// 新增记录；失败返回 None
    pub async fn create(&self, new: &T::New) -> Option<T> {
        let backend = self.backend().await?;

        let loading = self.begin();
        let result: Result<T> = async {
            let row = serde_json::to_value(new).context("序列化记录失败")?;
            let saved = backend.insert(T::TABLE, row).await?;
            decode::<T>(saved)
        }
        .await;

        match result {
            Ok(record) => {
                loading.succeed();
                info!("[Store] 新增 {} id={}", T::TABLE, record.id());
                Some(record)
            }
            Err(e) => {
                loading.fail("新增记录失败", &e);
                None
            }
        }
    }

    /// 按 id 更新部分字段
    pub async fn update(&self, id: &str, patch: &T::Patch) -> bool {
        let Some(backend) = self.backend().await else {
            return false;
        };

        let loading = self.begin();
        let result: Result<Value> = async {
            let patch = serde_json::to_value(patch).context("序列化更新内容失败")?;
            backend.update(T::TABLE, id, patch).await
        }
        .await;

        match result {
            Ok(_) => {
                loading.succeed();
                info!("[Store] 更新 {} id={}", T::TABLE, id);
                true
            }
            Err(e) => {
                loading.fail("更新记录失败", &e);
                false
            }
        }
    }

    /// 按 id 删除
    pub async fn delete(&self, id: &str) -> bool {
        let Some(backend) = self.backend().await else {
            return false;
        };

        let loading = self.begin();
        match backend.delete(T::TABLE, id).await {
            Ok(()) => {
                loading.succeed();
                info!("[Store] 删除 {} id={}", T::TABLE, id);
                true
            }
            Err(e) => {
                loading.fail("删除记录失败", &e);
                false
            }
        }
    }

    /// 检查后端是否可达
    pub async fn check_connection(&self) -> bool {
        let Some(backend) = self.backend().await else {
            return false;
        };

        let loading = self.begin();
        match backend.ping(T::TABLE).await {
            Ok(()) => {
                loading.succeed();
                true
            }
            Err(e) => {
                loading.fail("连接失败", &e);
                false
            }
        }
    }

    /// 订阅某天的变更
    ///
    /// 任何命中该日期的新增、更新、删除都会触发一次完整的重新拉取，
    /// 并把结果交给 `listener`。未配置或订阅建立失败时返回 None。
    pub async fn subscribe(
        &self,
        date: NaiveDate,
        listener: Arc<dyn RecordListener<T>>,
        kind: Option<&str>,
    ) -> Option<Subscription> {
        let backend = self.backend().await?;
        let filter = ChangeFilter::new(T::TABLE, date);

        let mut feed = match backend.subscribe(filter.clone()).await {
            Ok(feed) => feed,
            Err(e) => {
                self.fail("订阅变更失败", &e);
                return None;
            }
        };
        info!("[Store] 📥 开始监听 {} 日期 {}", T::TABLE, date);

        let store = self.clone();
        let kind = kind.map(str::to_string);
        let task = tokio::spawn(async move {
            while let Some(event) = feed.recv().await {
                if !filter.matches(&event) {
                    continue;
                }
                debug!("[Store] {} 日期 {} 有变更: {:?}", T::TABLE, date, event.kind);
                let records = store.list(date, kind.as_deref()).await;
                listener.on_records_changed(date, records).await;
            }
            warn!("[Store] {} 日期 {} 的变更流已结束", T::TABLE, date);
        });

        Some(Subscription { date, task })
    }

    fn list_query(date: NaiveDate, kind: Option<&str>) -> ListQuery {
        let query = ListQuery::new(T::TABLE, date);
        match (kind, T::KIND_COLUMN) {
            (Some(kind), Some(column)) => query.with_kind(column, kind),
            (Some(kind), None) => {
                warn!("[Store] {} 不区分子类型，忽略过滤条件 {}", T::TABLE, kind);
                query
            }
            (None, _) => query,
        }
    }

    /// 解析后端并同步 is_configured；解析失败记为错误
    async fn backend(&self) -> Option<Arc<dyn TableBackend>> {
        match self.provider.client().await {
            Ok(Some(backend)) => {
                self.state.send_if_modified(|s| {
                    let changed = !s.is_configured;
                    s.is_configured = true;
                    changed
                });
                Some(backend)
            }
            Ok(None) => {
                self.state.send_if_modified(|s| {
                    let changed = s.is_configured;
                    s.is_configured = false;
                    changed
                });
                None
            }
            Err(e) => {
                self.fail("初始化客户端失败", &e);
                None
            }
        }
    }

    fn begin(&self) -> Loading {
        self.state.send_modify(|s| {
            s.is_loading = true;
            s.error = None;
        });
        Loading {
            state: self.state.clone(),
            settled: false,
        }
    }

    fn fail(&self, action: &str, err: &anyhow::Error) {
        record_failure(&self.state, action, err);
    }
}

fn record_failure(state: &watch::Sender<StoreState>, action: &str, err: &anyhow::Error) {
    let msg = format!("{}: {:#}", action, err);
    error!("[Store] {}", msg);
    state.send_modify(|s| {
        s.is_loading = false;
        s.error = Some(msg);
    });
}

/// 拉取并解析；无法识别的行跳过，不影响同一天的其他记录
async fn fetch<T: Record>(backend: &dyn TableBackend, query: &ListQuery) -> Result<Vec<T>> {
    let rows = backend.select(query).await?;
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let id = row.get("id").cloned().unwrap_or(Value::Null);
        match decode::<T>(row) {
            Ok(record) => records.push(record),
            Err(e) => warn!("[Store] 跳过无法解析的 {} 行 id={}: {:#}", T::TABLE, id, e),
        }
    }
    Ok(records)
}

fn decode<T: Record>(row: Value) -> Result<T> {
    serde_json::from_value(row).context("解析记录失败")
}
