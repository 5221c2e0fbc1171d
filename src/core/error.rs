//! Agent 错误类型
//!
//! 只用于启动期与协作方边界（配置、记忆落盘、工具分发）；控制循环自身从不向调用方返回错误，
//! 所有运行期失败都被吸收为终态字符串或救生索消耗。

use thiserror::Error;

/// 启动期或协作方调用中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 配置缺失或非法（max_steps = 0、未知 planning_mode 等），启动即终止
    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Memory I/O error: {0}")]
    MemoryIo(#[from] std::io::Error),

    #[error("Memory encoding error: {0}")]
    MemoryEncoding(#[from] serde_json::Error),
}

impl From<config::ConfigError> for AgentError {
    fn from(e: config::ConfigError) -> Self {
        AgentError::ConfigError(e.to_string())
    }
}
