//! 策略选择：按规划模式选 prompt 模板、按工具提示收窄工具集，强制重规划时放宽或走记忆回退

use crate::config::{ExplorationMode, PlanningMode, StrategyProfile};
use crate::core::AgentContext;
use crate::decision::generator::{PlanGenerator, PlanRequest};
use crate::decision::prompt::{
    CONSERVATIVE_PROMPT, EXPLORATORY_PARALLEL_PROMPT, EXPLORATORY_SEQUENTIAL_PROMPT,
};
use crate::memory::{find_recent_successful_tools, MemoryItem, RECENT_SUCCESS_LIMIT};
use crate::perception::PerceptionResult;
use crate::tools::ToolInfo;

/// 模板只由 (planning_mode, exploration_mode) 决定；exploratory 缺子模式时退回保守模板
pub fn select_prompt_path(
    planning_mode: PlanningMode,
    exploration_mode: Option<ExplorationMode>,
) -> &'static str {
    match (planning_mode, exploration_mode) {
        (PlanningMode::Conservative, _) => CONSERVATIVE_PROMPT,
        (PlanningMode::Exploratory, Some(ExplorationMode::Parallel)) => EXPLORATORY_PARALLEL_PROMPT,
        (PlanningMode::Exploratory, Some(ExplorationMode::Sequential)) => {
            EXPLORATORY_SEQUENTIAL_PROMPT
        }
        (PlanningMode::Exploratory, None) => CONSERVATIVE_PROMPT,
    }
}

/// 工具名包含提示（不区分大小写）的工具；没有提示或无一命中时返回全部
pub fn filter_tools_by_hint(tools: &[ToolInfo], hint: Option<&str>) -> Vec<ToolInfo> {
    let Some(hint) = hint.map(str::trim).filter(|h| !h.is_empty()) else {
        return tools.to_vec();
    };
    let hint = hint.to_lowercase();
    let filtered: Vec<ToolInfo> = tools
        .iter()
        .filter(|t| t.name.to_lowercase().contains(&hint))
        .cloned()
        .collect();
    if filtered.is_empty() {
        tools.to_vec()
    } else {
        filtered
    }
}

/// 展示给计划生成器的工具从哪来
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolSource {
    Filtered,
    AllTools,
    MemoryFallback,
}

/// 选择工具上下文的输入
#[derive(Debug, Clone, Copy)]
pub struct ToolContextInput<'a> {
    pub tool_hint: Option<&'a str>,
    /// 感知选中服务器解析出的工具
    pub selected: &'a [ToolInfo],
    /// 全部工具
    pub catalogue: &'a [ToolInfo],
    pub memory_items: &'a [MemoryItem],
    pub failed_tools: &'a [String],
    pub force_replan: bool,
}

/// 按策略画像决定展示哪些工具
pub fn resolve_tool_context(
    profile: &StrategyProfile,
    input: &ToolContextInput<'_>,
) -> (Vec<ToolInfo>, ToolSource) {
    let filtered = filter_tools_by_hint(input.selected, input.tool_hint);

    if input.force_replan {
        if profile.planning_mode == PlanningMode::Exploratory && profile.memory_fallback_enabled {
            let recent = find_recent_successful_tools(input.memory_items, RECENT_SUCCESS_LIMIT);
            let fallback: Vec<ToolInfo> = recent
                .iter()
                .filter(|name| !input.failed_tools.contains(*name))
                .filter_map(|name| input.catalogue.iter().find(|t| &t.name == name).cloned())
                .collect();
            if !fallback.is_empty() {
                tracing::info!(
                    stage = "strategy",
                    tools = ?fallback.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
                    "memory fallback tools found"
                );
                return (fallback, ToolSource::MemoryFallback);
            }
            tracing::warn!(stage = "strategy", "no memory fallback tools, using all tools");
        } else {
            tracing::warn!(stage = "strategy", "force replan, using all tools");
        }
        return (input.catalogue.to_vec(), ToolSource::AllTools);
    }

    if filtered.is_empty() {
        tracing::warn!(stage = "strategy", "no filtered tools, using all tools");
        return (input.catalogue.to_vec(), ToolSource::AllTools);
    }
    (filtered, ToolSource::Filtered)
}

/// 策略选择器：组合工具上下文与计划生成
pub struct StrategySelector {
    profile: StrategyProfile,
    generator: PlanGenerator,
}

impl StrategySelector {
    pub fn new(profile: StrategyProfile, generator: PlanGenerator) -> Self {
        Self { profile, generator }
    }

    pub fn profile(&self) -> &StrategyProfile {
        &self.profile
    }

    /// 为当前感知与工具集产出计划文本
    ///
    /// `tools` 是感知选中服务器解析出的工具；`last_result` 是上一轮执行的结果字符串；
    /// `failed_tools` 是上一轮执行中报错的工具，记忆回退时排除。
    pub async fn select_plan(
        &self,
        ctx: &AgentContext,
        perception: &PerceptionResult,
        tools: &[ToolInfo],
        last_result: Option<&str>,
        failed_tools: &[String],
        force_replan: bool,
    ) -> String {
        let catalogue = ctx.dispatcher.all_tools();
        let memory_items = ctx.memory.get_session_items();
        let (tool_set, source) = resolve_tool_context(
            &self.profile,
            &ToolContextInput {
                tool_hint: perception.tool_hint.as_deref(),
                selected: tools,
                catalogue: &catalogue,
                memory_items,
                failed_tools,
                force_replan,
            },
        );
        let prompt_file =
            select_prompt_path(self.profile.planning_mode, self.profile.exploration_mode);
        tracing::debug!(
            stage = "strategy",
            prompt = prompt_file,
            source = ?source,
            force_replan,
            last_result = last_result.unwrap_or(""),
            "tool context resolved"
        );

        let tool_descriptions = ctx.dispatcher.describe(&tool_set);
        self.generator
            .generate(&PlanRequest {
                user_input: ctx.effective_input(),
                memory_items,
                tool_descriptions: &tool_descriptions,
                prompt_file,
                step_num: ctx.step + 1,
                max_steps: self.profile.max_steps,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str) -> ToolInfo {
        ToolInfo {
            name: name.to_string(),
            description: format!("{name} tool"),
            server_id: "s".to_string(),
            input_schema: json!({}),
        }
    }

    fn names(tools: &[ToolInfo]) -> Vec<&str> {
        tools.iter().map(|t| t.name.as_str()).collect()
    }

    fn success(name: &str) -> MemoryItem {
        MemoryItem::tool_output(name, json!({}), json!({"result": 1}), true, vec![])
    }

    fn exploratory(fallback: bool) -> StrategyProfile {
        StrategyProfile {
            planning_mode: PlanningMode::Exploratory,
            exploration_mode: Some(ExplorationMode::Sequential),
            memory_fallback_enabled: fallback,
            ..StrategyProfile::default()
        }
    }

    #[test]
    fn test_prompt_path_selection() {
        assert_eq!(
            select_prompt_path(PlanningMode::Conservative, Some(ExplorationMode::Parallel)),
            CONSERVATIVE_PROMPT
        );
        assert_eq!(
            select_prompt_path(PlanningMode::Exploratory, Some(ExplorationMode::Parallel)),
            EXPLORATORY_PARALLEL_PROMPT
        );
        assert_eq!(
            select_prompt_path(PlanningMode::Exploratory, Some(ExplorationMode::Sequential)),
            EXPLORATORY_SEQUENTIAL_PROMPT
        );
        assert_eq!(
            select_prompt_path(PlanningMode::Exploratory, None),
            CONSERVATIVE_PROMPT
        );
    }

    #[test]
    fn test_filter_by_hint() {
        let tools = vec![tool("add"), tool("search_docs"), tool("web_search")];
        assert_eq!(names(&filter_tools_by_hint(&tools, Some("Search"))), vec!["search_docs", "web_search"]);
        assert_eq!(filter_tools_by_hint(&tools, Some("teleport")).len(), 3);
        assert_eq!(filter_tools_by_hint(&tools, None).len(), 3);
        assert_eq!(filter_tools_by_hint(&tools, Some("  ")).len(), 3);
    }

    #[test]
    fn test_conservative_narrows_then_widens_on_replan() {
        let selected = vec![tool("add"), tool("echo")];
        let catalogue = vec![tool("add"), tool("echo"), tool("search")];
        let mut input = ToolContextInput {
            tool_hint: Some("add"),
            selected: &selected,
            catalogue: &catalogue,
            memory_items: &[],
            failed_tools: &[],
            force_replan: false,
        };
        let profile = StrategyProfile::default();
        let (tools, source) = resolve_tool_context(&profile, &input);
        assert_eq!(names(&tools), vec!["add"]);
        assert_eq!(source, ToolSource::Filtered);

        input.force_replan = true;
        let (tools, source) = resolve_tool_context(&profile, &input);
        assert_eq!(tools.len(), 3);
        assert_eq!(source, ToolSource::AllTools);
    }

    #[test]
    fn test_exploratory_replan_uses_recent_successes_minus_failed() {
        let catalogue = vec![tool("add"), tool("search"), tool("fetch")];
        let memory = vec![success("add"), success("fetch"), success("search"), success("solve_sandbox")];
        let failed = vec!["fetch".to_string()];
        let input = ToolContextInput {
            tool_hint: None,
            selected: &catalogue,
            catalogue: &catalogue,
            memory_items: &memory,
            failed_tools: &failed,
            force_replan: true,
        };
        let (tools, source) = resolve_tool_context(&exploratory(true), &input);
        assert_eq!(source, ToolSource::MemoryFallback);
        assert_eq!(names(&tools), vec!["search", "add"]);

        let (tools, source) = resolve_tool_context(&exploratory(false), &input);
        assert_eq!(source, ToolSource::AllTools);
        assert_eq!(tools.len(), 3);
    }

    #[test]
    fn test_exploratory_replan_without_history_uses_all_tools() {
        let catalogue = vec![tool("add"), tool("search")];
        let selected = vec![tool("add")];
        let input = ToolContextInput {
            tool_hint: None,
            selected: &selected,
            catalogue: &catalogue,
            memory_items: &[],
            failed_tools: &[],
            force_replan: true,
        };
        let (tools, source) = resolve_tool_context(&exploratory(true), &input);
        assert_eq!(source, ToolSource::AllTools);
        assert_eq!(tools.len(), 2);
    }
}
