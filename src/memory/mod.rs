//! 记忆层：会话内追加式记忆（元数据 / 工具调用 / 工具输出 / 最终答案）与 JSON 落盘

pub mod item;
pub mod store;

pub use item::{MemoryItem, MemoryItemType};
pub use store::{
    find_recent_successful_tools, new_session_id, FileMemory, InMemorySink, MemorySink,
    RECENT_SUCCESS_LIMIT,
};
