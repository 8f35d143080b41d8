pub mod daily;

// 重新导出常用类型，方便外部使用
pub use daily::{
    client::{ClientConfig, SupabaseClient},
    config::ConfigSource,
    memory::MemoryBackend,
    provider::ClientProvider,
    record::{
        DailyRecord, DailyRecordStore, NewDailyRecord, Priority, RecordListener, RecordStore,
        RecordType, StoreState, Todo, TodoStore,
    },
    storage::LocalStorage,
};
