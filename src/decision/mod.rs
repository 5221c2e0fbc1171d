//! 决策层：prompt 模板、策略选择、计划生成

pub mod generator;
pub mod prompt;
pub mod strategy;

pub use generator::{
    is_solve_plan, strip_code_fences, Plan, PlanGenerator, PlanRequest, GENERATION_FAILED_ANSWER,
    INVALID_PLAN_ANSWER,
};
pub use strategy::{
    filter_tools_by_hint, resolve_tool_context, select_prompt_path, StrategySelector, ToolSource,
};
