//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）

pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

use crate::config::LlmSection;
use crate::core::AgentError;

pub use message::{Message, Role};
pub use mock::MockLlmClient;
pub use openai::OpenAiClient;
pub use traits::LlmClient;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";

/// 按 [llm] 配置创建客户端
///
/// - deepseek：固定 base_url，优先读取 `DEEPSEEK_API_KEY`
/// - openai：可选 base_url（自建代理等），读取 `OPENAI_API_KEY`
/// - mock：无需网络，回显计划，便于本地跑通
pub fn create_llm_from_config(cfg: &LlmSection) -> Result<Arc<dyn LlmClient>, AgentError> {
    match cfg.provider.as_str() {
        "deepseek" => {
            let api_key = std::env::var("DEEPSEEK_API_KEY").ok();
            Ok(Arc::new(OpenAiClient::new(
                Some(cfg.base_url.as_deref().unwrap_or(DEEPSEEK_BASE_URL)),
                &cfg.model,
                api_key.as_deref(),
            )))
        }
        "openai" => Ok(Arc::new(OpenAiClient::new(
            cfg.base_url.as_deref(),
            &cfg.model,
            None,
        ))),
        "mock" => Ok(Arc::new(MockLlmClient::default())),
        other => Err(AgentError::ConfigError(format!(
            "unknown llm provider: {other}"
        ))),
    }
}
