//! 每日记录 CLI
//!
//! 非交互式命令行，用于管理连接配置和查看、编辑某一天的记录；
//! `watch` 子命令持续打印指定日期的实时变更。

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use daily_record_sdk_rust::daily::config::ConfigOrigin;
use daily_record_sdk_rust::daily::db::DEFAULT_DB_URL;
use daily_record_sdk_rust::daily::record::{
    DailyRecord, DailyRecordPatch, DailyRecordStore, NewDailyRecord, Priority, RecordListener,
    RecordStore, RecordType,
};
use daily_record_sdk_rust::{ClientConfig, ClientProvider, ConfigSource, LocalStorage};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

/// 每日记录 CLI
#[derive(Parser, Debug)]
#[command(name = "daily-record-cli")]
#[command(about = "每日记录 CLI - 管理待办、问题与感悟", long_about = None)]
struct Args {
    /// 本地存储数据库（保存连接配置）
    #[arg(long, default_value = DEFAULT_DB_URL)]
    db: String,

    /// 日志级别（RUST_LOG 优先）
    #[arg(long, default_value = "warn,daily_record_sdk_rust=info")]
    log_level: String,

    /// 同时写入日志文件
    #[arg(long)]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 连接配置
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// 列出某天的记录
    List {
        /// 日期（YYYY-MM-DD），默认今天
        #[arg(short, long)]
        date: Option<NaiveDate>,
        /// 只看某类记录：todo / question / insight / note
        #[arg(short, long)]
        kind: Option<RecordType>,
    },
    /// 新增记录
    Add {
        content: String,
        #[arg(short, long)]
        date: Option<NaiveDate>,
        #[arg(short, long, default_value = "todo")]
        kind: RecordType,
        /// 待办优先级
        #[arg(short, long, default_value = "medium")]
        priority: Priority,
        /// 问题的回答
        #[arg(long)]
        answer: Option<String>,
        /// 感悟标签，逗号分隔
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
        /// 附加信息（JSON 对象）
        #[arg(long)]
        metadata: Option<String>,
    },
    /// 标记待办完成（--undo 取消）
    Done {
        id: String,
        #[arg(long)]
        undo: bool,
    },
    /// 删除记录
    Remove { id: String },
    /// 监听某天的变更
    Watch {
        #[arg(short, long)]
        date: Option<NaiveDate>,
        #[arg(short, long)]
        kind: Option<RecordType>,
        /// 运行时长（秒），0 表示持续运行
        #[arg(long, default_value = "0")]
        duration: u64,
    },
    /// 检查后端连通性
    Ping,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// 保存服务地址与 API key
    Set {
        #[arg(long)]
        url: String,
        #[arg(long)]
        key: String,
    },
    /// 清除本地保存的配置
    Clear,
    /// 显示当前生效的配置
    Show,
}

/// 初始化日志（stdout，可选同时写入文件）
fn init_logger(log_level: &str, log_file: Option<&str>) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_target(false)
        .with_ansi(true);

    // 文件不需要 ANSI 颜色
    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| anyhow::anyhow!("无法打开日志文件 {}: {}", path, e))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(false)
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();
    Ok(())
}

fn print_records(date: NaiveDate, records: &[DailyRecord]) {
    println!("📅 {}（共 {} 条）", date, records.len());
    for r in records {
        let detail = match r.record_type {
            RecordType::Todo => format!(
                "[{}] {}",
                if r.completed.unwrap_or(false) { "x" } else { " " },
                r.priority.unwrap_or_default()
            ),
            RecordType::Question => match &r.answer {
                Some(a) if !a.is_empty() => format!("答: {}", a),
                _ => "未回答".to_string(),
            },
            RecordType::Insight => r.tags.as_deref().unwrap_or_default().join(", "),
            RecordType::Note => r
                .metadata
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_default(),
        };
        println!(
            "  #{} {:<8} {} | {}",
            r.id,
            r.record_type.as_str(),
            r.content,
            detail
        );
    }
}

struct CliRecordListener;

#[async_trait::async_trait]
impl RecordListener<DailyRecord> for CliRecordListener {
    async fn on_records_changed(&self, date: NaiveDate, records: Vec<DailyRecord>) {
        info!("[CLI] 🔄 {} 有变更", date);
        print_records(date, &records);
    }
}

/// 打印状态中的错误并返回失败
fn report_failure(store: &DailyRecordStore, action: &str) -> Result<()> {
    let state = store.snapshot();
    match state.error {
        Some(msg) => {
            error!("[CLI] ❌ {}: {}", action, msg);
            Err(anyhow::anyhow!("{}: {}", action, msg))
        }
        None if !state.is_configured => {
            warn!("[CLI] 未配置后端，请先执行 `config set --url ... --key ...`");
            Err(anyhow::anyhow!("{}: 未配置后端", action))
        }
        None => Err(anyhow::anyhow!("{}: 未知错误", action)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // .env 不存在时忽略
    let _ = dotenvy::dotenv();
    init_logger(&args.log_level, args.log_file.as_deref())?;

    let storage = LocalStorage::open(&args.db).await?;
    let source = ConfigSource::from_env(Some(storage));
    let provider = Arc::new(ClientProvider::new(source));
    let store: DailyRecordStore = RecordStore::new(provider.clone());
    let today = chrono::Local::now().date_naive();

    match args.command {
        Command::Config { action } => match action {
            ConfigAction::Set { url, key } => {
                if !store.configure(&ClientConfig::new(url, key)).await {
                    return report_failure(&store, "保存配置");
                }
                println!("✅ 配置已保存");
            }
            ConfigAction::Clear => {
                if !store.clear_config().await {
                    return report_failure(&store, "清除配置");
                }
                println!("✅ 本地配置已清除");
            }
            ConfigAction::Show => match provider.source().resolve_with_origin().await? {
                Some((cfg, origin)) => {
                    let origin = match origin {
                        ConfigOrigin::Environment => "环境变量",
                        ConfigOrigin::LocalStorage => "本地存储",
                    };
                    println!("服务地址: {}（来自{}）", cfg.endpoint_url, origin);
                    println!("API key : {}…", cfg.api_key.chars().take(8).collect::<String>());
                }
                None => println!("未配置"),
            },
        },
        Command::List { date, kind } => {
            let date = date.unwrap_or(today);
            let records = store.list(date, kind.map(|k| k.as_str())).await;
            if store.snapshot().error.is_some() || !store.snapshot().is_configured {
                return report_failure(&store, "获取记录");
            }
            print_records(date, &records);
        }
        Command::Add {
            content,
            date,
            kind,
            priority,
            answer,
            tags,
            metadata,
        } => {
            let date = date.unwrap_or(today);
            let mut new = match kind {
                RecordType::Todo => NewDailyRecord::todo(date, content, priority),
                RecordType::Question => NewDailyRecord::question(date, content, answer),
                RecordType::Insight => NewDailyRecord::insight(date, content, tags),
                RecordType::Note => NewDailyRecord::note(date, content),
            };
            if let Some(raw) = metadata {
                let value: serde_json::Value =
                    serde_json::from_str(&raw).context("metadata 不是合法的 JSON")?;
                new = new.with_metadata(value);
            }
            match store.create(&new).await {
                Some(record) => println!("✅ 已新增 #{}", record.id),
                None => return report_failure(&store, "新增记录"),
            }
        }
        Command::Done { id, undo } => {
            if !store.update(&id, &DailyRecordPatch::completed(!undo)).await {
                return report_failure(&store, "更新记录");
            }
            println!("✅ #{} 已{}", id, if undo { "取消完成" } else { "完成" });
        }
        Command::Remove { id } => {
            if !store.delete(&id).await {
                return report_failure(&store, "删除记录");
            }
            println!("✅ 已删除 #{}", id);
        }
        Command::Watch {
            date,
            kind,
            duration,
        } => {
            let date = date.unwrap_or(today);
            let kind = kind.map(|k| k.as_str());

            print_records(date, &store.list(date, kind).await);
            let Some(subscription) = store
                .subscribe(date, Arc::new(CliRecordListener), kind)
                .await
            else {
                return report_failure(&store, "订阅变更");
            };

            info!("[CLI] 📥 开始监听 {} 的变更，按 Ctrl+C 退出", date);
            if duration > 0 {
                sleep(Duration::from_secs(duration)).await;
            } else {
                tokio::signal::ctrl_c().await?;
            }
            subscription.unsubscribe();
            info!("[CLI] 👋 程序退出");
        }
        Command::Ping => {
            if !store.check_connection().await {
                return report_failure(&store, "连通性检查");
            }
            println!("✅ 后端可达");
        }
    }

    Ok(())
}
