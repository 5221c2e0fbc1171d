//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / execute），由 ToolRegistry 按名注册与查找。
//! 一个 ToolRegistry 就是一个工具服务器的工具集合，由 LocalDispatcher 按服务器 ID 聚合。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（计划里 `mcp.call_tool('name', ...)` 的第一个参数）
    fn name(&self) -> &str;

    /// 工具描述（含用法示例，直接进入 prompt）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认返回空对象，表示无参数或参数格式不限
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具，返回文本结果
    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 工具注册表：按名称有序存储 Arc<dyn Tool>，保证 prompt 中的工具顺序稳定
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn tools(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.values()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// 取工具参数：兼容 `{"input": {...}}` 包裹与扁平两种写法
pub fn tool_input(args: &Value) -> &Value {
    match args.get("input") {
        Some(inner) if inner.is_object() => inner,
        _ => args,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::builtin::utility_server;
    use serde_json::json;

    #[test]
    fn test_tool_names_are_sorted() {
        let server = utility_server();
        assert_eq!(
            server.registry.tool_names(),
            vec![
                "add",
                "echo",
                "int_list_to_exponential_sum",
                "strings_to_chars_to_int"
            ]
        );
        assert!(!server.registry.is_empty());
        assert!(ToolRegistry::new().is_empty());
    }

    #[test]
    fn test_tool_input_unwraps_input_object() {
        assert_eq!(tool_input(&json!({"input": {"a": 1}})), &json!({"a": 1}));
        assert_eq!(tool_input(&json!({"a": 1})), &json!({"a": 1}));
        assert_eq!(tool_input(&json!({"input": 3})), &json!({"input": 3}));
    }
}
