//! 会话上下文：一次运行的全部状态
//!
//! 由控制循环独占；感知、策略、沙箱只在循环同步调用期间借用它。

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use crate::config::StrategyProfile;
use crate::core::AgentError;
use crate::memory::{MemoryItem, MemoryItemType, MemorySink};
use crate::tools::ToolDispatcher;

/// 子任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtaskStatus {
    Pending,
    Success,
    Failure,
}

/// 任务进度台账中的一条
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubtaskEntry {
    pub step: usize,
    pub tool: String,
    pub status: SubtaskStatus,
}

const HISTORY_PREVIEW_CHARS: usize = 50;

pub struct AgentContext {
    pub session_id: String,
    pub user_input: String,
    /// 当前步（从 0 开始）
    pub step: usize,
    /// 上一轮计划要求继续处理时合成的输入
    pub user_input_override: Option<String>,
    pub task_progress: Vec<SubtaskEntry>,
    pub final_answer: Option<String>,
    pub memory: Box<dyn MemorySink>,
    pub dispatcher: Arc<dyn ToolDispatcher>,
    pub profile: StrategyProfile,
}

impl AgentContext {
    /// 建立上下文并写入一条 run_metadata 记忆
    pub fn new(
        user_input: impl Into<String>,
        profile: StrategyProfile,
        memory: Box<dyn MemorySink>,
        dispatcher: Arc<dyn ToolDispatcher>,
    ) -> Result<Self, AgentError> {
        let mut ctx = Self {
            session_id: memory.session_id().to_string(),
            user_input: user_input.into(),
            step: 0,
            user_input_override: None,
            task_progress: Vec::new(),
            final_answer: None,
            memory,
            dispatcher,
            profile,
        };

        let now = chrono::Local::now();
        let mut item = MemoryItem::new(
            MemoryItemType::RunMetadata,
            format!(
                "Started new session with input: {} at {}",
                ctx.user_input,
                chrono::Utc::now().to_rfc3339()
            ),
        )
        .with_tags(&["run_start"])
        .with_metadata("start_time", json!(now.to_rfc3339()))
        .with_metadata("step", json!(ctx.step));
        item.user_query = Some(ctx.user_input.clone());
        ctx.memory.add(item)?;

        tracing::info!(stage = "loop", session_id = %ctx.session_id, "session started");
        Ok(ctx)
    }

    /// 覆盖输入优先，否则原始输入
    pub fn effective_input(&self) -> &str {
        self.user_input_override
            .as_deref()
            .unwrap_or(&self.user_input)
    }

    pub fn log_subtask(&mut self, tool: &str, status: SubtaskStatus) {
        self.task_progress.push(SubtaskEntry {
            step: self.step,
            tool: tool.to_string(),
            status,
        });
    }

    /// 更新当前步中该工具最近的一条；没有则忽略
    pub fn update_subtask_status(&mut self, tool: &str, status: SubtaskStatus) {
        let step = self.step;
        if let Some(entry) = self
            .task_progress
            .iter_mut()
            .rev()
            .find(|e| e.tool == tool && e.step == step)
        {
            entry.status = status;
        }
    }

    /// 会话中已执行工具的摘要：除最后一条外结果截断到 50 字符
    pub fn format_history_for_llm(&self) -> String {
        let outputs: Vec<&MemoryItem> = self
            .memory
            .get_session_items()
            .iter()
            .filter(|m| m.item_type == MemoryItemType::ToolOutput)
            .collect();
        if outputs.is_empty() {
            return "No previous actions".to_string();
        }

        let last = outputs.len();
        outputs
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let mut result = item
                    .tool_result
                    .as_ref()
                    .map(|r| r.to_string())
                    .unwrap_or_default();
                if i + 1 < last && result.chars().count() > HISTORY_PREVIEW_CHARS {
                    result = format!(
                        "{}... [RESPONSE TRUNCATED]",
                        result.chars().take(HISTORY_PREVIEW_CHARS).collect::<String>()
                    );
                }
                let args = item
                    .tool_args
                    .as_ref()
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "{}".to_string());
                format!(
                    "{}. Used {} with {}\nResult: {}",
                    i + 1,
                    item.tool_name.as_deref().unwrap_or("unknown"),
                    args,
                    result
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl std::fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("session_id", &self.session_id)
            .field("step", &self.step)
            .field("final_answer", &self.final_answer)
            .finish()
    }
}
