pub mod backend;
pub mod client;
pub mod config;
pub mod db;
pub mod memory;
pub mod provider;
pub mod realtime;
pub mod record;
pub mod storage;
pub mod types;

pub use backend::{ChangeEvent, ChangeFeed, ChangeFilter, ChangeKind, ListQuery, TableBackend};
pub use client::{ClientConfig, SupabaseClient};
pub use config::ConfigSource;
pub use provider::ClientProvider;
