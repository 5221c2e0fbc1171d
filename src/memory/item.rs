//! 单条会话记忆

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 记忆条目类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryItemType {
    RunMetadata,
    ToolCall,
    ToolOutput,
    FinalAnswer,
}

/// 一条会话记忆（追加写入，从不改写顺序）
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Unix 秒（带小数）
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub item_type: MemoryItemType,
    pub text: String,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_args: Option<Value>,
    #[serde(default)]
    pub tool_result: Option<Value>,
    #[serde(default)]
    pub final_answer: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub user_query: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

pub(crate) fn now_ts() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

impl MemoryItem {
    pub fn new(item_type: MemoryItemType, text: impl Into<String>) -> Self {
        Self {
            timestamp: now_ts(),
            item_type,
            text: text.into(),
            tool_name: None,
            tool_args: None,
            tool_result: None,
            final_answer: None,
            tags: Vec::new(),
            success: None,
            user_query: None,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn tool_output(
        tool_name: &str,
        tool_args: Value,
        tool_result: Value,
        success: bool,
        tags: Vec<String>,
    ) -> Self {
        Self {
            tool_name: Some(tool_name.to_string()),
            text: format!("Output of {}: {}", tool_name, tool_result),
            tool_args: Some(tool_args),
            tool_result: Some(tool_result),
            success: Some(success),
            tags,
            ..Self::new(MemoryItemType::ToolOutput, "")
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// 是否是一条成功的工具输出（记忆回退只看这一类）
    pub fn is_successful_tool_output(&self) -> bool {
        self.item_type == MemoryItemType::ToolOutput && self.success == Some(true)
    }
}
