//! Lifeline - 计划驱动的 LLM 任务智能体
//!
//! 入口：初始化日志、加载配置、组装 LLM / 工具分发器 / 控制循环，然后逐条处理查询。
//! 查询来自命令行参数；没有参数时从标准输入逐行读取，输入 exit 结束。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use lifeline_agent::config::{load_config, AppConfig};
use lifeline_agent::core::{AgentContext, AgentLoop};
use lifeline_agent::llm::create_llm_from_config;
use lifeline_agent::memory::{new_session_id, FileMemory};
use lifeline_agent::observability;
use lifeline_agent::tools::{utility_server, LocalDispatcher, ToolDispatcher};
use tokio::io::{AsyncBufReadExt, BufReader};

/// 单次工具调用超时（秒）
const TOOL_TIMEOUT_SECS: u64 = 30;

async fn answer(
    cfg: &AppConfig,
    agent: &AgentLoop,
    dispatcher: &Arc<dyn ToolDispatcher>,
    query: &str,
) -> anyhow::Result<String> {
    let memory = FileMemory::open(&cfg.memory.root, new_session_id())
        .context("Failed to open session memory")?;
    let mut ctx = AgentContext::new(
        query,
        cfg.strategy.clone(),
        Box::new(memory),
        dispatcher.clone(),
    )
    .context("Failed to create session context")?;
    let result = agent.run(&mut ctx).await;
    Ok(result.result)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::var("LIFELINE_CONFIG").ok().map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    tracing::info!(
        agent = %cfg.agent.name,
        planning_mode = ?cfg.strategy.planning_mode,
        max_steps = cfg.strategy.max_steps,
        "config loaded"
    );

    let llm = create_llm_from_config(&cfg.llm).context("Failed to create LLM client")?;
    let dispatcher: Arc<dyn ToolDispatcher> =
        Arc::new(LocalDispatcher::new(TOOL_TIMEOUT_SECS).with_server(utility_server()));
    let agent = AgentLoop::from_config(&cfg, llm);

    let args: Vec<String> = std::env::args().skip(1).collect();
    if !args.is_empty() {
        let query = args.join(" ");
        println!("{}", answer(&cfg, &agent, &dispatcher, &query).await?);
        return Ok(());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        println!("🧑 What do you want to solve today? (exit to quit)");
        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            break;
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query.eq_ignore_ascii_case("exit") {
            break;
        }
        let result = answer(&cfg, &agent, &dispatcher, query).await?;
        println!("💡 {}", result.trim_start_matches("FINAL_ANSWER:").trim());
    }
    Ok(())
}
