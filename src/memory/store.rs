//! 会话记忆存储
//!
//! MemorySink 为追加式接口；FileMemory 每次追加后把整个会话写成一个 JSON 数组，
//! 路径按日期分层：`<root>/<YYYY>/<MM>/<DD>/session-<ts>-<uid>.json`。

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::core::AgentError;
use crate::memory::{MemoryItem, MemoryItemType};

/// 记忆回退默认收集的工具数
pub const RECENT_SUCCESS_LIMIT: usize = 5;

/// 追加式记忆接口（一个会话一个实例）
pub trait MemorySink: Send + Sync {
    fn session_id(&self) -> &str;

    fn add(&mut self, item: MemoryItem) -> Result<(), AgentError>;

    fn get_session_items(&self) -> &[MemoryItem];

    fn add_tool_output(
        &mut self,
        tool_name: &str,
        tool_args: Value,
        tool_result: Value,
        success: bool,
        tags: &[&str],
    ) -> Result<(), AgentError> {
        let tags = tags.iter().map(|t| t.to_string()).collect();
        self.add(MemoryItem::tool_output(
            tool_name,
            tool_args,
            tool_result,
            success,
            tags,
        ))
    }

    fn add_final_answer(&mut self, text: &str) -> Result<(), AgentError> {
        let mut item = MemoryItem::new(MemoryItemType::FinalAnswer, text);
        item.final_answer = Some(text.to_string());
        self.add(item)
    }

    /// 从新到旧收集成功过的工具名，去重，收满 limit 个即停
    fn find_recent_successes(&self, limit: usize) -> Vec<String> {
        find_recent_successful_tools(self.get_session_items(), limit)
    }
}

/// 从新到旧扫描成功的工具输出，去重，收满 limit 个或扫描完即停
pub fn find_recent_successful_tools(items: &[MemoryItem], limit: usize) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for item in items.iter().rev() {
        if found.len() >= limit {
            break;
        }
        if !item.is_successful_tool_output() {
            continue;
        }
        if let Some(name) = &item.tool_name {
            if !found.iter().any(|n| n == name) {
                found.push(name.clone());
            }
        }
    }
    found
}

/// 生成分层会话 ID：`YYYY/MM/DD/session-<unix秒>-<6位随机>`
pub fn new_session_id() -> String {
    let now = chrono::Local::now();
    let uid = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}/session-{}-{}",
        now.format("%Y/%m/%d"),
        now.timestamp(),
        &uid[..6]
    )
}

/// 纯内存实现：测试与不落盘场景
#[derive(Debug, Default)]
pub struct InMemorySink {
    session_id: String,
    items: Vec<MemoryItem>,
}

impl InMemorySink {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            items: Vec::new(),
        }
    }
}

impl MemorySink for InMemorySink {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn add(&mut self, item: MemoryItem) -> Result<(), AgentError> {
        self.items.push(item);
        Ok(())
    }

    fn get_session_items(&self) -> &[MemoryItem] {
        &self.items
    }
}

/// 文件实现：单会话单 JSON 文件，打开时加载已有条目
#[derive(Debug)]
pub struct FileMemory {
    session_id: String,
    path: PathBuf,
    items: Vec<MemoryItem>,
}

impl FileMemory {
    pub fn open(root: impl AsRef<Path>, session_id: impl Into<String>) -> Result<Self, AgentError> {
        let session_id = session_id.into();
        let path = session_path(root.as_ref(), &session_id);
        let items = if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            serde_json::from_str(&data)?
        } else {
            Vec::new()
        };
        tracing::debug!(stage = "memory", path = %path.display(), loaded = items.len(), "session memory opened");
        Ok(Self {
            session_id,
            path,
            items,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<(), AgentError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&self.items)?)?;
        Ok(())
    }
}

/// `2025/01/31/session-1738-abc123` → `<root>/2025/01/31/session-1738-abc123.json`
fn session_path(root: &Path, session_id: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for part in session_id.split('/') {
        path.push(part);
    }
    path.set_extension("json");
    path
}

impl MemorySink for FileMemory {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn add(&mut self, item: MemoryItem) -> Result<(), AgentError> {
        self.items.push(item);
        self.save()
    }

    fn get_session_items(&self) -> &[MemoryItem] {
        &self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn output(name: &str, success: bool) -> MemoryItem {
        MemoryItem::tool_output(name, json!({}), json!({"result": 1}), success, vec![])
    }

    #[test]
    fn test_recent_successes_dedup_most_recent_first() {
        let items = vec![
            output("search", true),
            output("add", true),
            output("fetch", false),
            output("search", true),
        ];
        assert_eq!(find_recent_successful_tools(&items, 5), vec!["search", "add"]);
    }

    #[test]
    fn test_recent_successes_single_tool_once() {
        let items = vec![output("search", true), output("search", true)];
        assert_eq!(find_recent_successful_tools(&items, 5), vec!["search"]);
    }

    #[test]
    fn test_recent_successes_respects_limit() {
        let items: Vec<MemoryItem> = (0..8).map(|i| output(&format!("t{i}"), true)).collect();
        let found = find_recent_successful_tools(&items, 5);
        assert_eq!(found, vec!["t7", "t6", "t5", "t4", "t3"]);
    }

    #[test]
    fn test_recent_successes_ignores_non_outputs() {
        let mut call = MemoryItem::new(MemoryItemType::ToolCall, "call");
        call.tool_name = Some("search".into());
        call.success = Some(true);
        assert!(find_recent_successful_tools(&[call], 5).is_empty());
    }

    #[test]
    fn test_session_id_is_date_hierarchical() {
        let id = new_session_id();
        let parts: Vec<&str> = id.split('/').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0].len(), 4);
        assert!(parts[3].starts_with("session-"));
    }

    #[test]
    fn test_file_memory_reloads_session() {
        let dir = tempfile::tempdir().unwrap();
        let sid = "2025/02/03/session-1-abcdef";
        {
            let mut mem = FileMemory::open(dir.path(), sid).unwrap();
            mem.add_tool_output("fetch", json!({}), json!("boom"), false, &["sandbox"])
                .unwrap();
            mem.add_tool_output("add", json!({"a": 1}), json!({"result": 2}), true, &["sandbox"])
                .unwrap();
            assert!(mem
                .path()
                .ends_with("2025/02/03/session-1-abcdef.json"));
        }
        let reopened = FileMemory::open(dir.path(), sid).unwrap();
        let items = reopened.get_session_items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].success, Some(false));
        assert_eq!(reopened.find_recent_successes(5), vec!["add"]);
    }
}
