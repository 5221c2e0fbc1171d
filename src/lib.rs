//! Lifeline - 计划驱动的 LLM 任务智能体
//!
//! 模块划分：
//! - **config**: 应用配置加载（profiles.yaml + 环境变量）
//! - **core**: 会话上下文与执行控制循环（步数 × 救生索）
//! - **perception**: 把用户输入解读为意图、工具提示与候选服务器
//! - **decision**: prompt 模板、策略选择、solve() 计划生成
//! - **sandbox**: 计划解释执行，工具调用预算，结果规范化
//! - **tools**: 工具 trait、注册表、分发器与内置工具服务器
//! - **memory**: 会话记忆与 JSON 落盘
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **observability**: 日志初始化

pub mod config;
pub mod core;
pub mod decision;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod perception;
pub mod sandbox;
pub mod tools;

pub use crate::core::{AgentContext, AgentLoop, LoopResult};
