//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按顺序吐出预置回复；回复用尽后回显最后一条 User 消息为 FINAL_ANSWER 计划，便于本地跑通循环。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, Message, Role};

/// 单条预置回复：成功文本或模拟的后端错误
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Error(String),
}

/// Mock 客户端：先消费脚本，脚本空了就回显
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<MockReply>>,
    prompts: Mutex<Vec<String>>,
}

impl MockLlmClient {
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(replies.into_iter().map(|r| MockReply::Text(r.into())).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_script(script: Vec<MockReply>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// 收到过的最后一条 user 内容（按调用顺序）
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.clone())
            .unwrap_or_else(|| "(no input)".to_string());

        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(last_user.clone());
        }

        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(MockReply::Text(text)) => Ok(text),
            Some(MockReply::Error(e)) => Err(e),
            None => {
                let echo = last_user
                    .lines()
                    .last()
                    .unwrap_or("")
                    .replace('\\', "/")
                    .replace('"', "'");
                Ok(format!(
                    "async def solve():\n    return \"FINAL_ANSWER: Echo from Mock: {}\"",
                    echo
                ))
            }
        }
    }
}
