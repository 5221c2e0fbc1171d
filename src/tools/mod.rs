//! 工具层：Tool trait 与注册表、分发器（按服务器聚合、超时、审计日志）、内置 utility 服务器

pub mod builtin;
pub mod dispatcher;
pub mod registry;

pub use builtin::{utility_server, EchoTool};
pub use dispatcher::{
    summarize_tools, text_response, LocalDispatcher, ServerInfo, ToolDispatcher, ToolInfo,
    ToolServer,
};
pub use registry::{tool_input, Tool, ToolRegistry};
