//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient。核心只依赖 generate_text 这一个挂起点；
//! 失败以 Err 返回，由调用方（感知、计划生成）降级为终态字符串，从不中止进程。

use async_trait::async_trait;

use crate::llm::Message;

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;

    /// 单轮文本生成：整段 prompt 作为一条 user 消息
    async fn generate_text(&self, prompt: &str) -> Result<String, String> {
        self.complete(&[Message::user(prompt)]).await
    }
}
