//! Realtime 变更订阅
//!
//! 通过 WebSocket 接入 Supabase realtime（Phoenix channel 协议 vsn 1.0.0）：
//! 连接后加入一个带 `postgres_changes` 配置的频道，定时发送心跳，
//! 并把推送的行级变更转换为 [`ChangeEvent`] 写入 [`ChangeFeed`]。

use crate::daily::backend::{ChangeEvent, ChangeFeed, ChangeFilter, ChangeKind};
use anyhow::{Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// WebSocket 写入端类型别名
pub type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// WebSocket 读取端类型别名
pub type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const FEED_CAPACITY: usize = 64;

/// Phoenix 事件名
pub mod phx_event {
    pub const JOIN: &str = "phx_join";
    pub const REPLY: &str = "phx_reply";
    pub const ERROR: &str = "phx_error";
    pub const CLOSE: &str = "phx_close";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const POSTGRES_CHANGES: &str = "postgres_changes";
    pub const SYSTEM: &str = "system";
}

/// Phoenix channel 消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
}

impl PhoenixMessage {
    /// 加入频道，订阅某张表某一天的所有变更
    pub fn join(topic: &str, filter: &ChangeFilter, access_token: &str, msg_ref: u64) -> Self {
        Self {
            topic: topic.to_string(),
            event: phx_event::JOIN.to_string(),
            payload: serde_json::json!({
                "config": {
                    "broadcast": { "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [{
                        "event": "*",
                        "schema": "public",
                        "table": filter.table,
                        "filter": filter.postgrest_filter(),
                    }],
                },
                "access_token": access_token,
            }),
            msg_ref: Some(msg_ref.to_string()),
        }
    }

    pub fn heartbeat(msg_ref: u64) -> Self {
        Self {
            topic: "phoenix".to_string(),
            event: phx_event::HEARTBEAT.to_string(),
            payload: serde_json::json!({}),
            msg_ref: Some(msg_ref.to_string()),
        }
    }

    fn reply_status(&self) -> Option<&str> {
        self.payload.get("status").and_then(Value::as_str)
    }
}

/// 解析 `postgres_changes` 推送
///
/// 推送结构：`{"ids": [...], "data": {"type": "INSERT", "table": "...", "record": {...}, "old_record": {...}}}`
pub fn parse_change_event(payload: &Value) -> Option<ChangeEvent> {
    let data = payload.get("data")?;
    let kind = ChangeKind::parse(data.get("type")?.as_str()?)?;
    let table = data.get("table")?.as_str()?.to_string();

    let row = |key: &str| {
        data.get(key)
            .filter(|v| v.as_object().is_some_and(|o| !o.is_empty()))
            .cloned()
    };

    Some(ChangeEvent {
        kind,
        table,
        record: row("record"),
        old_record: row("old_record"),
    })
}

/// 服务地址转换为 realtime WebSocket 地址
pub fn realtime_url(endpoint_url: &str, api_key: &str) -> String {
    let base = endpoint_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!("{}/realtime/v1/websocket?apikey={}&vsn=1.0.0", ws_base, api_key)
}

/// Realtime 客户端；每次订阅建立一条独立连接
pub struct RealtimeClient {
    ws_url: String,
    api_key: String,
}

impl RealtimeClient {
    pub fn new(endpoint_url: &str, api_key: &str) -> Self {
        Self {
            ws_url: realtime_url(endpoint_url, api_key),
            api_key: api_key.to_string(),
        }
    }

    /// 订阅某张表某一天的变更
    pub async fn subscribe(&self, filter: ChangeFilter) -> Result<ChangeFeed> {
        let topic = format!(
            "realtime:{}:{}:{}",
            filter.table,
            filter.date,
            Uuid::new_v4().simple()
        );

        info!(
            "[Realtime] 🔗 连接 realtime，表: {}, 日期: {}",
            filter.table, filter.date
        );

        let (ws_stream, response) = connect_async(self.ws_url.as_str())
            .await
            .context("连接 realtime 失败")?;
        debug!("[Realtime] WebSocket 握手完成, 状态: {}", response.status());

        let (write, mut read) = ws_stream.split();
        let writer = Arc::new(Mutex::new(write));
        let refs = Arc::new(AtomicU64::new(1));

        let join = PhoenixMessage::join(&topic, &filter, &self.api_key, next_ref(&refs));
        send_message(&writer, &join).await?;

        timeout(JOIN_TIMEOUT, wait_for_join(&mut read, &topic))
            .await
            .context("等待加入频道超时")??;
        info!("[Realtime] ✅ 已加入频道 {}", topic);

        let (tx, rx) = mpsc::channel(FEED_CAPACITY);

        let heartbeat_writer = writer.clone();
        let heartbeat_refs = refs.clone();
        let heartbeat = tokio::spawn(async move {
            let mut ticker = interval(HEARTBEAT_INTERVAL);
            // 第一次 tick 立即返回，跳过
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let msg = PhoenixMessage::heartbeat(next_ref(&heartbeat_refs));
                if let Err(e) = send_message(&heartbeat_writer, &msg).await {
                    warn!("[Realtime] 心跳发送失败: {:#}", e);
                    break;
                }
            }
        });

        let reader = tokio::spawn(async move {
            handle_messages(read, topic, tx).await;
        });

        Ok(ChangeFeed::new(rx, vec![heartbeat, reader]))
    }
}

fn next_ref(refs: &AtomicU64) -> u64 {
    refs.fetch_add(1, Ordering::SeqCst)
}

async fn send_message(writer: &Mutex<WsWriter>, msg: &PhoenixMessage) -> Result<()> {
    let text = serde_json::to_string(msg)?;
    let mut w = writer.lock().await;
    w.send(WsMessage::Text(text)).await?;
    Ok(())
}

/// 等待本频道的 phx_reply
async fn wait_for_join(read: &mut WsReader, topic: &str) -> Result<()> {
    while let Some(msg_result) = read.next().await {
        let text = match msg_result.context("读取 realtime 消息失败")? {
            WsMessage::Text(text) => text,
            WsMessage::Close(frame) => {
                return Err(anyhow::anyhow!("加入频道前连接被关闭: {:?}", frame));
            }
            _ => continue,
        };

        let msg: PhoenixMessage = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                warn!("[Realtime] 消息解析失败: {}, 原始消息: {}", e, text);
                continue;
            }
        };

        if msg.topic != topic || msg.event != phx_event::REPLY {
            debug!("[Realtime] 加入前忽略消息: {} {}", msg.topic, msg.event);
            continue;
        }

        return match msg.reply_status() {
            Some("ok") => Ok(()),
            _ => Err(anyhow::anyhow!(
                "加入频道失败: {}",
                msg.payload.get("response").unwrap_or(&msg.payload)
            )),
        };
    }

    Err(anyhow::anyhow!("加入频道前连接已断开"))
}

/// 处理推送消息（事件循环），直到连接关闭或订阅方离开
async fn handle_messages(mut read: WsReader, topic: String, tx: mpsc::Sender<ChangeEvent>) {
    while let Some(msg_result) = read.next().await {
        let text = match msg_result {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(frame)) => {
                warn!("[Realtime] 👋 连接关闭: {:?}", frame);
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                error!("[Realtime] WebSocket 错误: {}", e);
                break;
            }
        };

        let msg: PhoenixMessage = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                warn!("[Realtime] 消息解析失败: {}, 原始消息: {}", e, text);
                continue;
            }
        };

        match msg.event.as_str() {
            phx_event::POSTGRES_CHANGES if msg.topic == topic => {
                let Some(event) = parse_change_event(&msg.payload) else {
                    warn!("[Realtime] 无法识别的变更推送: {}", msg.payload);
                    continue;
                };
                debug!("[Realtime] 收到变更: {:?} {}", event.kind, event.table);
                if tx.send(event).await.is_err() {
                    debug!("[Realtime] 订阅方已离开，停止读取");
                    break;
                }
            }
            phx_event::ERROR | phx_event::CLOSE if msg.topic == topic => {
                warn!("[Realtime] 频道 {} 已关闭: {}", topic, msg.event);
                break;
            }
            phx_event::REPLY => {
                if msg.reply_status() != Some("ok") {
                    warn!("[Realtime] 服务端回复异常: {}", msg.payload);
                }
            }
            phx_event::SYSTEM => {
                debug!("[Realtime] 系统消息: {}", msg.payload);
            }
            other => {
                debug!("[Realtime] 未处理的事件: {} ({})", other, msg.topic);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::future::Future;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    type ServerSocket = WebSocketStream<TcpStream>;

    /// 本地 realtime 服务端：接受一条连接并按脚本应答，返回服务地址
    async fn local_server<F, Fut>(script: F) -> String
    where
        F: FnOnce(ServerSocket) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            script(ws).await;
        });
        format!("http://{}", addr)
    }

    async fn read_join(ws: &mut ServerSocket) -> PhoenixMessage {
        while let Some(msg) = ws.next().await {
            if let WsMessage::Text(text) = msg.unwrap() {
                let msg: PhoenixMessage = serde_json::from_str(&text).unwrap();
                if msg.event == phx_event::JOIN {
                    return msg;
                }
            }
        }
        panic!("连接关闭前未收到 phx_join");
    }

    async fn push(ws: &mut ServerSocket, topic: &str, event: &str, payload: Value, msg_ref: Option<String>) {
        let msg = PhoenixMessage {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
            msg_ref,
        };
        ws.send(WsMessage::Text(serde_json::to_string(&msg).unwrap()))
            .await
            .unwrap();
    }

    fn filter() -> ChangeFilter {
        ChangeFilter::new("daily_records", "2025-03-01".parse().unwrap())
    }

    #[tokio::test]
    async fn feed_forwards_own_topic_and_ends_on_close() {
        let endpoint = local_server(|mut ws| async move {
            let join = read_join(&mut ws).await;
            let config = &join.payload["config"]["postgres_changes"][0];
            assert_eq!(config["table"], "daily_records");
            assert_eq!(config["filter"], "date=eq.2025-03-01");

            push(&mut ws, &join.topic, phx_event::REPLY, json!({"status": "ok", "response": {}}), join.msg_ref.clone()).await;

            let change = |content: &str| {
                json!({"data": {
                    "table": "daily_records",
                    "type": "INSERT",
                    "record": {"id": "r1", "content": content, "date": "2025-03-01"},
                    "old_record": {}
                }})
            };
            push(&mut ws, "realtime:someone-else", phx_event::POSTGRES_CHANGES, change("ignored"), None).await;
            push(&mut ws, &join.topic, phx_event::POSTGRES_CHANGES, change("delivered"), None).await;
            push(&mut ws, &join.topic, phx_event::CLOSE, json!({}), None).await;

            // 保持连接，直到客户端自己结束
            while ws.next().await.is_some() {}
        })
        .await;

        let client = RealtimeClient::new(&endpoint, "KEY");
        let mut feed = client.subscribe(filter()).await.unwrap();

        let event = timeout(Duration::from_secs(2), feed.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.record.unwrap()["content"], "delivered");

        let end = timeout(Duration::from_secs(2), feed.recv()).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn join_error_reply_fails_subscribe() {
        let endpoint = local_server(|mut ws| async move {
            let join = read_join(&mut ws).await;
            push(
                &mut ws,
                &join.topic,
                phx_event::REPLY,
                json!({"status": "error", "response": {"reason": "invalid access token"}}),
                join.msg_ref.clone(),
            )
            .await;
            while ws.next().await.is_some() {}
        })
        .await;

        let client = RealtimeClient::new(&endpoint, "KEY");
        let err = client.subscribe(filter()).await.err().unwrap();
        assert!(format!("{:#}", err).contains("invalid access token"));
    }

    #[tokio::test]
    async fn close_before_join_reply_fails_subscribe() {
        let endpoint = local_server(|mut ws| async move {
            read_join(&mut ws).await;
            let _ = ws.close(None).await;
        })
        .await;

        let client = RealtimeClient::new(&endpoint, "KEY");
        assert!(client.subscribe(filter()).await.is_err());
    }

    #[test]
    fn realtime_url_switches_scheme() {
        assert_eq!(
            realtime_url("https://abc.supabase.co/", "KEY"),
            "wss://abc.supabase.co/realtime/v1/websocket?apikey=KEY&vsn=1.0.0"
        );
        assert_eq!(
            realtime_url("http://localhost:54321", "KEY"),
            "ws://localhost:54321/realtime/v1/websocket?apikey=KEY&vsn=1.0.0"
        );
    }

    #[test]
    fn join_message_carries_postgres_changes_config() {
        let filter = ChangeFilter::new("daily_records", "2025-03-01".parse().unwrap());
        let msg = PhoenixMessage::join("realtime:t", &filter, "KEY", 1);
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["event"], "phx_join");
        assert_eq!(json["ref"], "1");
        assert_eq!(json["payload"]["access_token"], "KEY");
        let change = &json["payload"]["config"]["postgres_changes"][0];
        assert_eq!(change["table"], "daily_records");
        assert_eq!(change["filter"], "date=eq.2025-03-01");
        assert_eq!(change["event"], "*");
    }

    #[test]
    fn parses_insert_push() {
        let payload = json!({
            "ids": [1],
            "data": {
                "schema": "public",
                "table": "todos",
                "type": "INSERT",
                "commit_timestamp": "2025-03-01T08:00:00Z",
                "record": {"id": 3, "text": "write", "date": "2025-03-01"},
                "old_record": {}
            }
        });

        let event = parse_change_event(&payload).unwrap();
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.table, "todos");
        assert_eq!(event.record.unwrap()["id"], 3);
        assert!(event.old_record.is_none());
    }

    #[test]
    fn parses_delete_with_primary_key_only() {
        let payload = json!({
            "data": {"table": "todos", "type": "DELETE", "old_record": {"id": 3}}
        });
        let event = parse_change_event(&payload).unwrap();
        assert_eq!(event.kind, ChangeKind::Delete);
        assert!(event.record.is_none());
        assert_eq!(event.old_record.unwrap(), json!({"id": 3}));
    }

    #[test]
    fn rejects_unknown_push() {
        assert!(parse_change_event(&json!({"data": {"table": "t", "type": "TRUNCATE"}})).is_none());
        assert!(parse_change_event(&json!({"ids": []})).is_none());
    }

    #[test]
    fn heartbeat_decodes_back() {
        let text = serde_json::to_string(&PhoenixMessage::heartbeat(7)).unwrap();
        let msg: PhoenixMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(msg.topic, "phoenix");
        assert_eq!(msg.event, "heartbeat");
        assert_eq!(msg.msg_ref.as_deref(), Some("7"));
    }
}
