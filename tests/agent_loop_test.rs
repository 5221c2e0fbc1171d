//! 控制循环集成测试：脚本化 Mock LLM + 计数分发器

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lifeline_agent::config::{ExplorationMode, PlanningMode, StrategyProfile};
use lifeline_agent::core::{
    AgentContext, AgentLoop, LoopStatus, SubtaskStatus, MAX_STEPS_ANSWER, SANDBOX_TOOL,
};
use lifeline_agent::decision::{PlanGenerator, StrategySelector};
use lifeline_agent::llm::MockLlmClient;
use lifeline_agent::memory::{FileMemory, InMemorySink, MemoryItemType, MemorySink};
use lifeline_agent::perception::{LlmPerception, Perception, PerceptionResult};
use lifeline_agent::sandbox::Sandbox;
use lifeline_agent::tools::{
    utility_server, LocalDispatcher, ServerInfo, ToolDispatcher, ToolInfo,
};
use serde_json::Value;

/// 记录工具调用次数的分发器
struct CountingDispatcher {
    inner: LocalDispatcher,
    calls: AtomicUsize,
}

impl CountingDispatcher {
    fn new() -> Self {
        Self {
            inner: LocalDispatcher::new(5).with_server(utility_server()),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolDispatcher for CountingDispatcher {
    fn server_catalog(&self) -> Vec<ServerInfo> {
        self.inner.server_catalog()
    }

    fn resolve_tools(&self, server_ids: &[String]) -> Vec<ToolInfo> {
        self.inner.resolve_tools(server_ids)
    }

    async fn call_tool(
        &self,
        name: &str,
        args: Value,
    ) -> Result<Value, lifeline_agent::core::AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.call_tool(name, args).await
    }

    fn describe(&self, tools: &[ToolInfo]) -> String {
        format!("{}\n{}", self.inner.describe(tools), BUDGET_NOTE)
    }
}

const BUDGET_NOTE: &str = "(at most 5 tool calls per plan)";

/// 固定选择某些服务器的感知
struct FixedPerception {
    servers: Vec<String>,
}

#[async_trait]
impl Perception for FixedPerception {
    async fn extract(&self, user_input: &str, _servers: &[ServerInfo]) -> PerceptionResult {
        PerceptionResult {
            intent: "test".into(),
            entities: vec![],
            tool_hint: None,
            tags: vec![],
            selected_servers: self.servers.clone(),
            user_input: user_input.to_string(),
        }
    }
}

struct Harness {
    llm: Arc<MockLlmClient>,
    dispatcher: Arc<CountingDispatcher>,
    agent: AgentLoop,
    profile: StrategyProfile,
}

fn profile(max_steps: usize, lifelines: usize) -> StrategyProfile {
    StrategyProfile {
        max_steps,
        max_lifelines_per_step: lifelines,
        ..StrategyProfile::default()
    }
}

fn prompt_dir() -> std::path::PathBuf {
    std::env::temp_dir().join("lifeline-test-no-prompts")
}

fn harness_with(profile: StrategyProfile, servers: &[&str], plans: &[&str]) -> Harness {
    let llm = Arc::new(MockLlmClient::with_replies(plans.iter().copied()));
    let perception = Arc::new(FixedPerception {
        servers: servers.iter().map(|s| s.to_string()).collect(),
    });
    let generator = PlanGenerator::new(llm.clone(), prompt_dir());
    let agent = AgentLoop::new(
        perception,
        StrategySelector::new(profile.clone(), generator),
        Sandbox::default(),
    );
    Harness {
        llm,
        dispatcher: Arc::new(CountingDispatcher::new()),
        agent,
        profile,
    }
}

fn harness(profile: StrategyProfile, plans: &[&str]) -> Harness {
    harness_with(profile, &["utility"], plans)
}

impl Harness {
    fn context(&self, task: &str) -> AgentContext {
        AgentContext::new(
            task,
            self.profile.clone(),
            Box::new(InMemorySink::new("2025/01/01/session-1-test01")),
            self.dispatcher.clone(),
        )
        .unwrap()
    }
}

fn sandbox_outputs(ctx: &AgentContext) -> Vec<(Value, bool)> {
    ctx.memory
        .get_session_items()
        .iter()
        .filter(|m| {
            m.item_type == MemoryItemType::ToolOutput && m.tool_name.as_deref() == Some(SANDBOX_TOOL)
        })
        .map(|m| (m.tool_result.clone().unwrap_or_default(), m.success == Some(true)))
        .collect()
}

#[tokio::test]
async fn test_final_answer_terminates_immediately() {
    let h = harness(
        profile(3, 2),
        &["async def solve():\n    return 'FINAL_ANSWER: 42'"],
    );
    let mut ctx = h.context("what is the answer");
    let result = h.agent.run(&mut ctx).await;

    assert_eq!(result.status, LoopStatus::Done);
    assert_eq!(result.result, "FINAL_ANSWER: 42");
    assert_eq!(ctx.final_answer.as_deref(), Some("FINAL_ANSWER: 42"));
    assert_eq!(h.llm.prompts().len(), 1);
    assert!(h.llm.prompts()[0].contains(BUDGET_NOTE));
    assert_eq!(ctx.task_progress.len(), 1);
    assert_eq!(ctx.task_progress[0].status, SubtaskStatus::Success);

    let last = ctx.memory.get_session_items().last().unwrap();
    assert_eq!(last.item_type, MemoryItemType::FinalAnswer);
    assert_eq!(last.final_answer.as_deref(), Some("FINAL_ANSWER: 42"));
}

#[tokio::test]
async fn test_tool_calls_are_persisted() {
    let plan = r#"import json
async def solve():
    result = await mcp.call_tool('add', {'input': {'a': 20, 'b': 22}})
    total = json.loads(result.content[0].text)['result']
    return f"FINAL_ANSWER: {total}"
"#;
    let h = harness(profile(1, 0), &[plan]);
    let mut ctx = h.context("add 20 and 22");
    let result = h.agent.run(&mut ctx).await;

    assert_eq!(result.result, "FINAL_ANSWER: 42");
    assert_eq!(h.dispatcher.calls(), 1);
    let add = ctx
        .memory
        .get_session_items()
        .iter()
        .find(|m| m.tool_name.as_deref() == Some("add"))
        .unwrap();
    assert_eq!(add.success, Some(true));
    assert_eq!(add.tags, vec!["sandbox_tool"]);
    assert_eq!(ctx.memory.find_recent_successes(5), vec![SANDBOX_TOOL, "add"]);
}

#[tokio::test]
async fn test_multi_function_plan_with_blank_and_comment_lines() {
    let plan = r#"import json

# helpers

async def add(a, b):
    result = await mcp.call_tool('add', {'input': {'a': a, 'b': b}})
    return json.loads(result.content[0].text)['result']


async def solve():
    total = 0
    for n in [1, 2, 3]:
        total = await add(total, n)

    # loop finished, check the total
    if total > 5:
        label = "big"
    else:
        label = "small"

    return f"FINAL_ANSWER: {total} {label}"
"#;
    let h = harness(profile(1, 0), &[plan]);
    let mut ctx = h.context("add 1, 2 and 3");
    let result = h.agent.run(&mut ctx).await;

    assert_eq!(result.result, "FINAL_ANSWER: 6 big");
    assert_eq!(h.dispatcher.calls(), 3);
    assert_eq!(ctx.task_progress[0].status, SubtaskStatus::Success);
}

#[tokio::test]
async fn test_plain_result_becomes_implicit_final_answer() {
    let h = harness(profile(1, 0), &["def solve():\n    return {'result': 7}"]);
    let mut ctx = h.context("seven");
    assert_eq!(h.agent.run(&mut ctx).await.result, "FINAL_ANSWER: 7");
    assert_eq!(sandbox_outputs(&ctx), vec![(serde_json::json!({"result": "7"}), true)]);
}

#[tokio::test]
async fn test_invalid_plans_exhaust_every_step() {
    let h = harness(
        profile(2, 1),
        &["no code here", "still nothing", "FINAL_ANSWER: 3", "nope"],
    );
    let mut ctx = h.context("task");
    let result = h.agent.run(&mut ctx).await;

    assert_eq!(result.result, MAX_STEPS_ANSWER);
    // 2 步 × (1 + 1) 次尝试
    assert_eq!(h.llm.prompts().len(), 4);
    assert!(ctx.task_progress.is_empty());
    assert!(sandbox_outputs(&ctx).is_empty());
    assert_eq!(h.dispatcher.calls(), 0);
}

#[tokio::test]
async fn test_invalid_plan_costs_one_lifeline_then_retries() {
    let h = harness(
        profile(1, 1),
        &["I would add them", "def solve():\n    return 'FINAL_ANSWER: ok'"],
    );
    let mut ctx = h.context("task");
    assert_eq!(h.agent.run(&mut ctx).await.result, "FINAL_ANSWER: ok");
    assert_eq!(h.llm.prompts().len(), 2);
    assert_eq!(ctx.task_progress.len(), 1);
}

#[tokio::test]
async fn test_forwarding_moves_to_next_step_with_override() {
    let h = harness(
        profile(2, 0),
        &[
            "def solve():\n    return 'FURTHER_PROCESSING_REQUIRED: foo'",
            "def solve():\n    return 'FINAL_ANSWER: done'",
        ],
    );
    let mut ctx = h.context("find the foo");
    let result = h.agent.run(&mut ctx).await;

    assert_eq!(result.result, "FINAL_ANSWER: done");
    let override_input = ctx.user_input_override.clone().unwrap();
    assert!(override_input.contains("foo"));
    assert!(override_input.starts_with("Original user task: find the foo"));

    let prompts = h.llm.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(!prompts[0].contains("Original user task"));
    assert!(prompts[1].contains("Original user task: find the foo"));
    assert!(prompts[1].contains("foo"));

    let steps: Vec<(usize, SubtaskStatus)> =
        ctx.task_progress.iter().map(|e| (e.step, e.status)).collect();
    assert_eq!(
        steps,
        vec![(0, SubtaskStatus::Success), (1, SubtaskStatus::Success)]
    );
}

#[tokio::test]
async fn test_sandbox_failure_retries_within_step() {
    let h = harness(
        profile(1, 1),
        &[
            "def solve():\n    return undefined_name",
            "def solve():\n    return 'FINAL_ANSWER: recovered'",
        ],
    );
    let mut ctx = h.context("task");
    assert_eq!(h.agent.run(&mut ctx).await.result, "FINAL_ANSWER: recovered");

    let statuses: Vec<(usize, SubtaskStatus)> =
        ctx.task_progress.iter().map(|e| (e.step, e.status)).collect();
    assert_eq!(
        statuses,
        vec![(0, SubtaskStatus::Failure), (0, SubtaskStatus::Success)]
    );
    let outputs = sandbox_outputs(&ctx);
    assert!(!outputs[0].1);
    assert!(outputs[0].0["result"]
        .as_str()
        .unwrap()
        .starts_with("[sandbox error:"));
}

#[tokio::test]
async fn test_repeated_failures_reach_max_steps() {
    let h = harness(
        profile(1, 0),
        &["def solve():\n    raise ValueError('boom')"],
    );
    let mut ctx = h.context("task");
    let result = h.agent.run(&mut ctx).await;
    assert_eq!(result.result, MAX_STEPS_ANSWER);
    assert_eq!(ctx.final_answer.as_deref(), Some(MAX_STEPS_ANSWER));
}

#[tokio::test]
async fn test_budget_overrun_is_a_sandbox_failure() {
    let plan = "async def solve():\n    for i in range(6):\n        await mcp.call_tool('echo', {'input': {'text': 'hi'}})\n    return 'FINAL_ANSWER: too many'";
    let h = harness(profile(1, 0), &[plan]);
    let mut ctx = h.context("task");
    assert_eq!(h.agent.run(&mut ctx).await.result, MAX_STEPS_ANSWER);
    assert_eq!(h.dispatcher.calls(), 5);
    let outputs = sandbox_outputs(&ctx);
    assert!(outputs[0].0["result"]
        .as_str()
        .unwrap()
        .contains("Exceeded max tool calls"));
}

#[tokio::test]
async fn test_no_tools_aborts_step_without_planning() {
    let h = harness_with(profile(2, 3), &["nowhere"], &[]);
    let mut ctx = h.context("task");
    let result = h.agent.run(&mut ctx).await;
    assert_eq!(result.result, MAX_STEPS_ANSWER);
    assert!(h.llm.prompts().is_empty());
    assert!(ctx.task_progress.is_empty());
}

#[tokio::test]
async fn test_memory_fallback_limits_tools_on_replan() {
    let strategy = StrategyProfile {
        planning_mode: PlanningMode::Exploratory,
        exploration_mode: Some(ExplorationMode::Sequential),
        memory_fallback_enabled: true,
        ..profile(1, 1)
    };
    let h = harness(
        strategy,
        &[
            "async def solve():\n    await mcp.call_tool('add', {'input': {'a': 1, 'b': 2}})\n    raise ValueError('boom')",
            "def solve():\n    return 'FINAL_ANSWER: 3'",
        ],
    );
    let mut ctx = h.context("add 1 and 2");
    assert_eq!(h.agent.run(&mut ctx).await.result, "FINAL_ANSWER: 3");

    let prompts = h.llm.prompts();
    assert!(prompts[0].contains("- echo: "));
    assert!(prompts[1].contains("- add: "));
    assert!(!prompts[1].contains("- echo: "));
}

#[tokio::test]
async fn test_end_to_end_with_llm_perception_and_file_memory() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(MockLlmClient::with_replies([
        r#"{"intent": "sum", "tool_hint": "add", "selected_servers": ["utility"]}"#,
        "```python\nimport json\nasync def solve():\n    r = await mcp.call_tool('add', {'input': {'a': 2, 'b': 3}})\n    return {'result': 'FINAL_ANSWER: ' + str(json.loads(r.content[0].text)['result'])}\n```",
    ]));
    let agent = AgentLoop::new(
        Arc::new(LlmPerception::new(llm.clone(), prompt_dir())),
        StrategySelector::new(profile(2, 1), PlanGenerator::new(llm.clone(), prompt_dir())),
        Sandbox::default(),
    );
    let memory = FileMemory::open(dir.path(), "2025/03/04/session-9-e2e000").unwrap();
    let path = memory.path().to_path_buf();
    let dispatcher: Arc<dyn ToolDispatcher> =
        Arc::new(LocalDispatcher::new(5).with_server(utility_server()));
    let mut ctx =
        AgentContext::new("add 2 and 3", profile(2, 1), Box::new(memory), dispatcher).unwrap();

    let result = agent.run(&mut ctx).await;
    assert_eq!(result.result, "FINAL_ANSWER: 5");

    let prompts = llm.prompts();
    assert!(prompts[0].contains("- utility: "));
    // 工具提示把工具集收窄到 add
    assert!(prompts[1].contains("- add: "));
    assert!(!prompts[1].contains("- echo: "));

    let saved: Vec<Value> =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    let kinds: Vec<&str> = saved.iter().map(|v| v["type"].as_str().unwrap()).collect();
    assert_eq!(
        kinds,
        vec!["run_metadata", "tool_output", "tool_output", "final_answer"]
    );
}
