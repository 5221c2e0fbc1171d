//! 工具分发器
//!
//! ToolDispatcher 是核心触达外部工具的唯一接口：按服务器 ID 解析工具集、按名调用、生成 prompt 描述。
//! LocalDispatcher 在进程内聚合若干命名工具服务器；每次调用加超时并输出结构化审计日志（JSON）。
//! 调用结果包装成 `{"content": [{"type": "text", "text": ...}], "isError": false}`，与计划中
//! `result.content[0].text` 的取值方式一致。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::ToolRegistry;

/// 工具服务器描述（供感知阶段挑选服务器）
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub id: String,
    pub description: String,
}

/// 一个可供计划调用的工具
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub server_id: String,
    pub input_schema: Value,
}

/// 生成 prompt 中的工具清单：每行 `- name: description`
pub fn summarize_tools(tools: &[ToolInfo]) -> String {
    tools
        .iter()
        .map(|t| format!("- {}: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n")
}

/// 核心依赖的分发器接口
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// 所有已知服务器（感知失败时全选）
    fn server_catalog(&self) -> Vec<ServerInfo>;

    /// 把选中的服务器 ID 解析为具体工具集；未知 ID 忽略
    fn resolve_tools(&self, server_ids: &[String]) -> Vec<ToolInfo>;

    /// 全部工具（策略强制重规划时的最大工具集）
    fn all_tools(&self) -> Vec<ToolInfo> {
        let ids: Vec<String> = self.server_catalog().into_iter().map(|s| s.id).collect();
        self.resolve_tools(&ids)
    }

    /// 挂起点：按名调用工具
    async fn call_tool(&self, name: &str, args: Value) -> Result<Value, AgentError>;

    fn describe(&self, tools: &[ToolInfo]) -> String {
        summarize_tools(tools)
    }
}

/// 进程内工具服务器：ID + 描述 + 工具集合
pub struct ToolServer {
    pub id: String,
    pub description: String,
    pub registry: ToolRegistry,
}

impl ToolServer {
    pub fn new(id: impl Into<String>, description: impl Into<String>, registry: ToolRegistry) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            registry,
        }
    }
}

/// 进程内分发器：按注册顺序聚合服务器，同名工具以先注册者为准
pub struct LocalDispatcher {
    servers: Vec<ToolServer>,
    timeout: Duration,
}

impl LocalDispatcher {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            servers: Vec::new(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn with_server(mut self, server: ToolServer) -> Self {
        self.servers.push(server);
        self
    }

    fn find_tool(&self, name: &str) -> Option<std::sync::Arc<dyn crate::tools::Tool>> {
        self.servers.iter().find_map(|s| s.registry.get(name))
    }
}

/// 把工具文本结果包成 MCP 风格的响应
pub fn text_response(text: impl Into<String>) -> Value {
    json!({
        "content": [{"type": "text", "text": text.into()}],
        "isError": false
    })
}

#[async_trait]
impl ToolDispatcher for LocalDispatcher {
    fn server_catalog(&self) -> Vec<ServerInfo> {
        self.servers
            .iter()
            .map(|s| ServerInfo {
                id: s.id.clone(),
                description: s.description.clone(),
            })
            .collect()
    }

    fn resolve_tools(&self, server_ids: &[String]) -> Vec<ToolInfo> {
        self.servers
            .iter()
            .filter(|s| server_ids.iter().any(|id| id == &s.id))
            .flat_map(|s| {
                s.registry.tools().map(move |t| ToolInfo {
                    name: t.name().to_string(),
                    description: t.description().to_string(),
                    server_id: s.id.clone(),
                    input_schema: t.parameters_schema(),
                })
            })
            .collect()
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<Value, AgentError> {
        let tool = self
            .find_tool(name)
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))?;

        let start = Instant::now();
        let preview = args_preview(&args);
        let result = timeout(self.timeout, tool.execute(args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let audit = json!({
            "event": "tool_audit",
            "tool": name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": preview,
        });
        tracing::info!(audit = %audit, "tool");

        match result {
            Ok(Ok(text)) => Ok(text_response(text)),
            Ok(Err(e)) => Err(AgentError::ToolExecutionFailed(format!("{name}: {e}"))),
            Err(_) => Err(AgentError::ToolExecutionFailed(format!(
                "{name}: timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
