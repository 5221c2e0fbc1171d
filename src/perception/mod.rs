//! 感知：把用户输入解读为意图、实体、工具提示与候选工具服务器
//!
//! 对外从不失败：LLM 出错、输出不是 JSON、字段类型不对，一律退化为
//! intent = "unknown" 且选中全部服务器的结果。

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::decision::prompt::{load_prompt, render, PERCEPTION_PROMPT};
use crate::llm::LlmClient;
use crate::tools::ServerInfo;

/// 感知结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerceptionResult {
    pub intent: String,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub tool_hint: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub selected_servers: Vec<String>,
    /// 本次感知看到的输入（原始任务或转发后的覆盖输入）
    #[serde(default)]
    pub user_input: String,
}

impl PerceptionResult {
    /// 兜底结果：未知意图，全选服务器
    pub fn fallback(user_input: &str, servers: &[ServerInfo]) -> Self {
        Self {
            intent: "unknown".to_string(),
            entities: Vec::new(),
            tool_hint: None,
            tags: Vec::new(),
            selected_servers: servers.iter().map(|s| s.id.clone()).collect(),
            user_input: user_input.to_string(),
        }
    }
}

/// 感知适配器
#[async_trait]
pub trait Perception: Send + Sync {
    async fn extract(&self, user_input: &str, servers: &[ServerInfo]) -> PerceptionResult;
}

/// 基于 LLM 的感知
pub struct LlmPerception {
    llm: Arc<dyn LlmClient>,
    prompt_dir: PathBuf,
}

impl LlmPerception {
    pub fn new(llm: Arc<dyn LlmClient>, prompt_dir: impl Into<PathBuf>) -> Self {
        Self {
            llm,
            prompt_dir: prompt_dir.into(),
        }
    }

    fn build_prompt(&self, user_input: &str, servers: &[ServerInfo]) -> String {
        let servers_text = servers
            .iter()
            .map(|s| {
                let desc = if s.description.is_empty() {
                    "No description available"
                } else {
                    s.description.as_str()
                };
                format!("- {}: {}", s.id, desc)
            })
            .collect::<Vec<_>>()
            .join("\n");
        let template = load_prompt(&self.prompt_dir, PERCEPTION_PROMPT);
        render(
            &template,
            &[("servers_text", &servers_text), ("user_input", user_input)],
        )
    }
}

#[async_trait]
impl Perception for LlmPerception {
    async fn extract(&self, user_input: &str, servers: &[ServerInfo]) -> PerceptionResult {
        let prompt = self.build_prompt(user_input, servers);
        let raw = match self.llm.generate_text(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(stage = "perception", error = %e, "perception call failed");
                return PerceptionResult::fallback(user_input, servers);
            }
        };
        let raw = raw.trim();
        tracing::debug!(stage = "perception", raw = %raw, "raw output");

        match parse_perception(raw, user_input, servers) {
            Ok(result) => {
                tracing::info!(
                    stage = "perception",
                    intent = %result.intent,
                    tool_hint = ?result.tool_hint,
                    servers = ?result.selected_servers,
                    "perceived"
                );
                result
            }
            Err(e) => {
                tracing::warn!(stage = "perception", error = %e, "perception failed, selecting all servers");
                PerceptionResult::fallback(user_input, servers)
            }
        }
    }
}

/// 从 LLM 输出中取 JSON 块：优先 ```json 围栏，其次第一个 `{` 到最后一个 `}`
pub fn extract_json_block(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

fn parse_perception(
    raw: &str,
    user_input: &str,
    servers: &[ServerInfo],
) -> Result<PerceptionResult, String> {
    let block = extract_json_block(raw).ok_or_else(|| "no JSON object in output".to_string())?;
    let mut result: PerceptionResult =
        serde_json::from_str(block).map_err(|e| format!("{}: {}", e, block))?;
    if result.selected_servers.is_empty() {
        result.selected_servers = servers.iter().map(|s| s.id.clone()).collect();
    }
    result.user_input = user_input.to_string();
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::MockReply;
    use crate::llm::MockLlmClient;

    fn servers() -> Vec<ServerInfo> {
        vec![
            ServerInfo {
                id: "math".into(),
                description: "arithmetic".into(),
            },
            ServerInfo {
                id: "docs".into(),
                description: String::new(),
            },
        ]
    }

    fn perception(llm: MockLlmClient) -> (Arc<MockLlmClient>, LlmPerception) {
        let llm = Arc::new(llm);
        let dir = std::env::temp_dir().join("lifeline-no-prompts");
        (llm.clone(), LlmPerception::new(llm, dir))
    }

    #[tokio::test]
    async fn test_parses_fenced_json() {
        let (_, p) = perception(MockLlmClient::with_replies([
            "Sure:\n```json\n{\"intent\": \"sum\", \"entities\": [\"1\", \"2\"], \"tool_hint\": \"add\", \"selected_servers\": [\"math\"]}\n```",
        ]));
        let result = p.extract("add 1 and 2", &servers()).await;
        assert_eq!(result.intent, "sum");
        assert_eq!(result.tool_hint.as_deref(), Some("add"));
        assert_eq!(result.selected_servers, vec!["math"]);
        assert_eq!(result.user_input, "add 1 and 2");
    }

    #[tokio::test]
    async fn test_missing_servers_selects_all() {
        let (_, p) = perception(MockLlmClient::with_replies([r#"{"intent": "lookup"}"#]));
        let result = p.extract("q", &servers()).await;
        assert_eq!(result.intent, "lookup");
        assert_eq!(result.selected_servers, vec!["math", "docs"]);
    }

    #[tokio::test]
    async fn test_garbage_and_errors_fall_back() {
        let (_, p) = perception(MockLlmClient::with_replies(["not json at all"]));
        let result = p.extract("q", &servers()).await;
        assert_eq!(result, PerceptionResult::fallback("q", &servers()));

        let (_, p) = perception(MockLlmClient::with_script(vec![MockReply::Error(
            "rate limited".into(),
        )]));
        let result = p.extract("q", &servers()).await;
        assert_eq!(result.intent, "unknown");
        assert_eq!(result.selected_servers.len(), 2);
    }

    #[tokio::test]
    async fn test_prompt_lists_servers() {
        let (llm, p) = perception(MockLlmClient::with_replies(["{}"]));
        p.extract("what is 2+2", &servers()).await;
        let prompt = &llm.prompts()[0];
        assert!(prompt.contains("- math: arithmetic"));
        assert!(prompt.contains("- docs: No description available"));
        assert!(prompt.contains("what is 2+2"));
    }

    #[test]
    fn test_extract_json_block() {
        assert_eq!(extract_json_block("x {\"a\": {\"b\": 1}} y"), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(extract_json_block("no braces"), None);
        assert_eq!(extract_json_block("} backwards {"), None);
    }
}
