//! 执行控制循环
//!
//! 外层按步（max_steps），内层按救生索（max_lifelines_per_step 递减到 0）：
//! 感知 -> 策略/计划 -> 沙箱执行 -> 按结果变体决定终止、转发或重试。
//! 循环从不返回错误，所有路径最终都得到 `{status: done, result}`。

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use crate::config::AppConfig;
use crate::core::{AgentContext, SubtaskStatus};
use crate::decision::{Plan, PlanGenerator, StrategySelector};
use crate::llm::LlmClient;
use crate::perception::{LlmPerception, Perception};
use crate::sandbox::{ExecutionReport, PlanOutcome, Sandbox};

/// 沙箱执行在台账与记忆中使用的工具名
pub const SANDBOX_TOOL: &str = "solve_sandbox";
pub const MAX_STEPS_ANSWER: &str = "FINAL_ANSWER: [Max steps reached]";
pub const EXECUTION_FAILED_ANSWER: &str = "FINAL_ANSWER: [Execution failed]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopStatus {
    Done,
}

/// 循环的终态返回
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopResult {
    pub status: LoopStatus,
    pub result: String,
}

impl LoopResult {
    fn done(result: impl Into<String>) -> Self {
        Self {
            status: LoopStatus::Done,
            result: result.into(),
        }
    }
}

/// 中间结果转发为下一步的输入
pub fn forward_input(original: &str, content: &str) -> String {
    format!(
        "Original user task: {}\n\n\
         Your last tool produced this result:\n\n\
         {}\n\n\
         If this fully answers the task, return:\n\
         FINAL_ANSWER: your answer\n\n\
         Otherwise, return the next FUNCTION_CALL.",
        original, content
    )
}

pub struct AgentLoop {
    perception: Arc<dyn Perception>,
    strategy: StrategySelector,
    sandbox: Sandbox,
}

/// 内层一次尝试之后怎么走
enum Attempt {
    Done(LoopResult),
    /// 进入下一步（转发或本步无工具可用）
    NextStep,
    /// 消耗一根救生索后在本步重试
    Retry,
}

impl AgentLoop {
    pub fn new(perception: Arc<dyn Perception>, strategy: StrategySelector, sandbox: Sandbox) -> Self {
        Self {
            perception,
            strategy,
            sandbox,
        }
    }

    /// 按配置组装：LLM 感知 + 策略选择器 + 默认预算的沙箱
    pub fn from_config(cfg: &AppConfig, llm: Arc<dyn LlmClient>) -> Self {
        let perception = Arc::new(LlmPerception::new(llm.clone(), cfg.prompts.dir.clone()));
        let generator = PlanGenerator::new(llm, cfg.prompts.dir.clone());
        Self::new(
            perception,
            StrategySelector::new(cfg.strategy.clone(), generator),
            Sandbox::default(),
        )
    }

    pub async fn run(&self, ctx: &mut AgentContext) -> LoopResult {
        let max_steps = self.strategy.profile().max_steps;
        let max_lifelines = self.strategy.profile().max_lifelines_per_step;

        for step in 0..max_steps {
            ctx.step = step;
            tracing::info!(stage = "loop", step = step + 1, max_steps, "step starting");
            tracing::debug!(stage = "loop", history = %ctx.format_history_for_llm(), "history");

            // 上一轮执行的结果与报错工具，供强制重规划时使用
            let mut last_report: Option<ExecutionReport> = None;
            let mut lifelines_left = max_lifelines as i64;
            let mut attempt = 0usize;

            while lifelines_left >= 0 {
                let force_replan = attempt > 0;
                attempt += 1;
                match self.attempt(ctx, last_report.as_ref(), force_replan).await {
                    (Attempt::Done(result), _) => return result,
                    (Attempt::NextStep, _) => break,
                    (Attempt::Retry, report) => {
                        lifelines_left -= 1;
                        tracing::warn!(stage = "loop", lifelines_left, "retrying");
                        if report.is_some() {
                            last_report = report;
                        }
                    }
                }
            }
        }

        tracing::warn!(stage = "loop", "max steps reached without final answer");
        self.finish(ctx, MAX_STEPS_ANSWER)
    }

    async fn attempt(
        &self,
        ctx: &mut AgentContext,
        last_report: Option<&ExecutionReport>,
        force_replan: bool,
    ) -> (Attempt, Option<ExecutionReport>) {
        let servers = ctx.dispatcher.server_catalog();
        let perception = self.perception.extract(ctx.effective_input(), &servers).await;

        let tools = ctx.dispatcher.resolve_tools(&perception.selected_servers);
        if tools.is_empty() {
            tracing::warn!(stage = "loop", servers = ?perception.selected_servers, "no tools selected, aborting step");
            return (Attempt::NextStep, None);
        }

        let failed_tools = last_report.map(|r| r.failed_tools()).unwrap_or_default();
        let plan_text = self
            .strategy
            .select_plan(
                ctx,
                &perception,
                &tools,
                last_report.map(|r| r.output.as_str()),
                &failed_tools,
                force_replan,
            )
            .await;

        let code = match Plan::classify(&plan_text) {
            Plan::Solve(code) => code,
            Plan::Terminal(text) | Plan::Invalid(text) => {
                tracing::warn!(stage = "loop", plan = %text, "invalid plan");
                return (Attempt::Retry, None);
            }
        };

        tracing::info!(stage = "loop", "running solve() plan in sandbox");
        ctx.log_subtask(SANDBOX_TOOL, SubtaskStatus::Pending);
        let report = self.sandbox.run(&code, ctx.dispatcher.as_ref()).await;
        self.record_tool_calls(ctx, &report);

        match report.outcome.clone() {
            PlanOutcome::Final(answer) => {
                self.record_sandbox(ctx, &code, &answer, true);
                (Attempt::Done(self.finish(ctx, &answer)), Some(report))
            }
            PlanOutcome::Continue(content) => {
                let forwarded = forward_input(&ctx.user_input, &content);
                tracing::info!(stage = "loop", forwarded = %forwarded, "forwarding intermediate result to next step");
                self.record_sandbox(ctx, &code, &report.output, true);
                ctx.user_input_override = Some(forwarded);
                (Attempt::NextStep, Some(report))
            }
            PlanOutcome::Failed(error) => {
                tracing::warn!(stage = "loop", error = %error, "plan execution failed");
                ctx.final_answer = Some(EXECUTION_FAILED_ANSWER.to_string());
                self.record_sandbox(ctx, &code, &error, false);
                (Attempt::Retry, Some(report))
            }
            PlanOutcome::Other(text) => {
                let answer = format!("FINAL_ANSWER: {}", text);
                self.record_sandbox(ctx, &code, &text, true);
                (Attempt::Done(self.finish(ctx, &answer)), Some(report))
            }
        }
    }

    /// 每次计划内的工具调用各落一条 tool_output
    fn record_tool_calls(&self, ctx: &mut AgentContext, report: &ExecutionReport) {
        for call in &report.tool_calls {
            if let Err(e) = ctx.memory.add_tool_output(
                &call.tool_name,
                call.arguments.clone(),
                call.result.clone(),
                call.success,
                &["sandbox_tool"],
            ) {
                tracing::warn!(stage = "memory", error = %e, tool = %call.tool_name, "failed to persist tool output");
            }
        }
    }

    fn record_sandbox(&self, ctx: &mut AgentContext, plan: &str, result: &str, success: bool) {
        let status = if success {
            SubtaskStatus::Success
        } else {
            SubtaskStatus::Failure
        };
        ctx.update_subtask_status(SANDBOX_TOOL, status);
        if let Err(e) = ctx.memory.add_tool_output(
            SANDBOX_TOOL,
            json!({ "plan": plan }),
            json!({ "result": result }),
            success,
            &["sandbox"],
        ) {
            tracing::warn!(stage = "memory", error = %e, "failed to persist sandbox output");
        }
    }

    fn finish(&self, ctx: &mut AgentContext, answer: &str) -> LoopResult {
        ctx.final_answer = Some(answer.to_string());
        if let Err(e) = ctx.memory.add_final_answer(answer) {
            tracing::warn!(stage = "memory", error = %e, "failed to persist final answer");
        }
        tracing::info!(stage = "loop", answer = %answer, "run finished");
        LoopResult::done(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_input_embeds_task_and_content() {
        let text = forward_input("sum the digits of 42", "[4, 2]");
        assert_eq!(
            text,
            "Original user task: sum the digits of 42\n\nYour last tool produced this result:\n\n[4, 2]\n\nIf this fully answers the task, return:\nFINAL_ANSWER: your answer\n\nOtherwise, return the next FUNCTION_CALL."
        );
    }

    #[test]
    fn test_loop_result_serializes_as_done() {
        let value = serde_json::to_value(LoopResult::done("FINAL_ANSWER: 1")).unwrap();
        assert_eq!(value, json!({"status": "done", "result": "FINAL_ANSWER: 1"}));
    }
}
