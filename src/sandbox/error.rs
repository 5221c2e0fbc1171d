//! 沙箱错误
//!
//! 只有 Display 文本会离开沙箱（包进 `[sandbox error: ...]`）。

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SandboxError {
    #[error("syntax error at line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("{0}")]
    Runtime(String),

    /// 工具调用失败（未知工具、工具报错、传输超时）
    #[error("tool call failed: {0}")]
    Tool(String),

    /// 单次计划的工具调用超限；try/except 捕获不到，直接终止整个执行
    #[error("Exceeded max tool calls ({0}) in solve() plan.")]
    ToolBudgetExceeded(usize),

    #[error("No solve() function found in plan.")]
    NoEntryPoint,

    #[error("import of '{0}' is not allowed in plan")]
    ForbiddenImport(String),

    #[error("maximum call depth ({0}) exceeded")]
    CallDepthExceeded(usize),
}

impl SandboxError {
    pub fn runtime(message: impl Into<String>) -> Self {
        SandboxError::Runtime(message.into())
    }

    pub fn syntax(line: usize, message: impl Into<String>) -> Self {
        SandboxError::Syntax {
            line,
            message: message.into(),
        }
    }

    /// 能否被计划里的 `try/except` 捕获
    pub fn is_catchable(&self) -> bool {
        matches!(self, SandboxError::Runtime(_) | SandboxError::Tool(_))
    }
}
