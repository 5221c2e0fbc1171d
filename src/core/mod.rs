//! 核心层：错误类型、会话上下文、执行控制循环

pub mod context;
pub mod error;
pub mod loop_;

pub use context::{AgentContext, SubtaskEntry, SubtaskStatus};
pub use error::AgentError;
pub use loop_::{
    forward_input, AgentLoop, LoopResult, LoopStatus, EXECUTION_FAILED_ANSWER, MAX_STEPS_ANSWER,
    SANDBOX_TOOL,
};
