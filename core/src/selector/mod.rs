//! Tool Selector (§4.4, `C4`): given session state and template policy,
//! returns an ordered, bounded tool subset for the LLM prompt.

mod embedder;

pub use embedder::{cosine_similarity, Embedder, HashEmbedder, OpenAiEmbedder};

use crate::domain::{
    ContextSnapshot, RulePhase, SelectionStrategy, SessionState, TemplateVersion, ToolRecord,
};
use crate::error::SelectorError;
use crate::rules::{apply_rules, RuleContext};

fn contains_name(names: &[String], name: &str) -> bool {
    names.iter().any(|n| n.eq_ignore_ascii_case(name))
}

const REASONING_TOOL_NAME: &str = "ReasoningTool";

/// Builds the retrieval query text (§4.4 step 4a): task text + the last
/// reasoning call's remaining-step note, if any, + the current stage label.
pub fn build_query(task_text: &str, context: &ContextSnapshot) -> String {
    let mut parts = vec![task_text.to_string()];
    if let Some(reasoning) = &context.last_reasoning {
        parts.push(reasoning.clone());
    }
    if let Some(stage) = &context.stage {
        parts.push(stage.clone());
    }
    parts.join("\n")
}

/// Runs the full §4.4 algorithm. `catalog_tools` is every *active* tool
/// record the caller could plausibly need (typically all tools named by
/// the template version, loaded once by the caller via the Store);
/// `query_embedding` is `None` unless the tool policy's
/// `selection_strategy` is `Retrieval` and the caller has one ready.
pub fn select_tools(
    catalog_tools: &[ToolRecord],
    template_version: &TemplateVersion,
    context: &ContextSnapshot,
    state: SessionState,
    query_embedding: Option<&[f32]>,
) -> Result<Vec<ToolRecord>, SelectorError> {
    let policy = &template_version.settings.tool_policy;
    let rule_ctx = RuleContext::from_snapshot(context, state);
    let mut stage = context.stage.clone();

    // ReasoningTool rides along as an implicit required tool (§4.8) unless
    // the template explicitly denies it — it isn't hand-listed per template
    // the way FinalAnswerTool/ClarificationTool are.
    let mut required_tools = policy.required_tools.clone();
    if !contains_name(&policy.denylist, REASONING_TOOL_NAME)
        && !contains_name(&required_tools, REASONING_TOOL_NAME)
    {
        required_tools.push(REASONING_TOOL_NAME.to_string());
    }

    // 1. Candidate set: template tools ∪ required tools, ∩ active.
    let mut candidate_names: Vec<String> = template_version
        .tool_names
        .iter()
        .cloned()
        .chain(required_tools.iter().cloned())
        .collect();
    candidate_names.dedup_by(|a, b| a.eq_ignore_ascii_case(b));
    let active_by_name = |name: &str| catalog_tools.iter().any(|t| t.active && t.name.eq_ignore_ascii_case(name));
    candidate_names.retain(|n| active_by_name(n));

    // 2. Denylist, then allowlist.
    if !policy.denylist.is_empty() {
        candidate_names.retain(|n| !contains_name(&policy.denylist, n));
    }
    if !policy.allowlist.is_empty() {
        candidate_names.retain(|n| contains_name(&policy.allowlist, n));
    }

    // 3. Rules pre-filter.
    candidate_names = apply_rules(
        &template_version.settings.rules,
        RulePhase::PreRetrieval,
        candidate_names,
        &rule_ctx,
        &mut stage,
    );

    let max_tools = policy.max_tools_in_prompt.max(1);

    // 4. Retrieval ranking, if applicable.
    if policy.selection_strategy == SelectionStrategy::Retrieval
        && candidate_names.len() > max_tools
    {
        if let Some(query_vec) = query_embedding {
            let required_count = required_tools
                .iter()
                .filter(|r| contains_name(&candidate_names, r))
                .count();
            let keep = max_tools.saturating_sub(required_count);

            let mut scored: Vec<(f32, usize, String)> = candidate_names
                .iter()
                .enumerate()
                .map(|(order_idx, name)| {
                    let score = catalog_tools
                        .iter()
                        .find(|t| t.name.eq_ignore_ascii_case(name))
                        .and_then(|t| t.embedding.as_deref())
                        .map(|emb| cosine_similarity(query_vec, emb))
                        .unwrap_or(0.0);
                    (score, order_idx, name.clone())
                })
                .collect();
            // Highest similarity first; ties broken by template tool-list
            // order then lexicographic name (§4.4 ordering stability).
            scored.sort_by(|a, b| {
                b.0.partial_cmp(&a.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.1.cmp(&b.1))
                    .then(a.2.cmp(&b.2))
            });
            candidate_names = scored
                .into_iter()
                .take(keep)
                .map(|(_, _, name)| name)
                .collect();
        }
    }

    // 5. Union required_tools at the front.
    let mut ordered: Vec<String> = Vec::new();
    for req in &required_tools {
        if contains_name(&candidate_names, req) && !contains_name(&ordered, req) {
            ordered.push(req.clone());
        }
    }
    for name in &candidate_names {
        if !contains_name(&ordered, name) {
            ordered.push(name.clone());
        }
    }
    ordered.truncate(max_tools);

    // 6. Rules post-filter.
    ordered = apply_rules(
        &template_version.settings.rules,
        RulePhase::PostRetrieval,
        ordered,
        &rule_ctx,
        &mut stage,
    );

    // 7. Fallback chain.
    if ordered.is_empty() {
        ordered = required_tools
            .iter()
            .filter(|r| active_by_name(r))
            .cloned()
            .collect();
    }
    if ordered.is_empty() {
        if active_by_name("FinalAnswerTool") {
            ordered.push("FinalAnswerTool".to_string());
        } else {
            return Err(SelectorError::NoToolsAvailable);
        }
    }

    let resolved = ordered
        .iter()
        .filter_map(|name| {
            catalog_tools
                .iter()
                .find(|t| t.name.eq_ignore_ascii_case(name))
                .cloned()
        })
        .collect::<Vec<_>>();
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ExecutionPolicy, LlmPolicy, Prompts, ReasoningStrategy, RuleActions, RuleConditions,
        Rule, ToolCategory, ToolPolicy, TemplateVersionSettings,
    };

    fn tool(name: &str) -> ToolRecord {
        ToolRecord {
            id: format!("id-{name}"),
            name: name.to_string(),
            description: String::new(),
            entrypoint: "builtin".into(),
            config: serde_json::json!({}),
            embedding: None,
            category: ToolCategory::Utility,
            active: true,
        }
    }

    fn template_version(tool_names: &[&str], policy: ToolPolicy, rules: Vec<Rule>) -> TemplateVersion {
        TemplateVersion {
            id: "tv1".into(),
            template_id: "t1".into(),
            version: 1,
            settings: TemplateVersionSettings {
                base_class: ReasoningStrategy::Simple,
                llm: LlmPolicy {
                    model: "gpt-4o-mini".into(),
                    base_url: None,
                    api_key_ref: "OPENAI_API_KEY".into(),
                    temperature: 0.7,
                    max_tokens: 1024,
                    streaming: true,
                },
                execution: ExecutionPolicy {
                    max_iterations: 15,
                    time_budget_seconds: 300,
                },
                tool_policy: policy,
                prompts: Prompts::default(),
                rules,
                mcp: None,
            },
            tool_names: tool_names.iter().map(|s| s.to_string()).collect(),
            active: true,
        }
    }

    #[test]
    fn selection_bound_never_exceeds_max_tools_in_prompt() {
        let tools: Vec<ToolRecord> = ["A", "B", "C", "D"].iter().map(|n| tool(n)).collect();
        let policy = ToolPolicy {
            required_tools: vec!["A".into()],
            max_tools_in_prompt: 2,
            selection_strategy: SelectionStrategy::Static,
            ..Default::default()
        };
        let tv = template_version(&["A", "B", "C", "D"], policy, vec![]);
        let result = select_tools(
            &tools,
            &tv,
            &ContextSnapshot::default(),
            SessionState::Researching,
            None,
        )
        .unwrap();
        assert!(result.len() <= 2);
        assert_eq!(result[0].name, "A");
    }

    #[test]
    fn keep_only_rule_overrides_retrieval_at_iteration_limit() {
        let tools: Vec<ToolRecord> = ["FinalAnswerTool", "CreateReportTool", "WebSearchTool"]
            .iter()
            .map(|n| tool(n))
            .collect();
        let policy = ToolPolicy {
            required_tools: vec![],
            max_tools_in_prompt: 10,
            selection_strategy: SelectionStrategy::Static,
            ..Default::default()
        };
        let rule = Rule {
            apply_to: vec![RulePhase::PostRetrieval],
            when: RuleConditions {
                iteration_gte: Some(15),
                ..Default::default()
            },
            actions: RuleActions {
                exclude: None,
                keep_only: Some(vec!["FinalAnswerTool".into(), "CreateReportTool".into()]),
                set_stage: None,
            },
        };
        let tv = template_version(
            &["FinalAnswerTool", "CreateReportTool", "WebSearchTool"],
            policy,
            vec![rule],
        );
        let mut ctx = ContextSnapshot::default();
        ctx.iteration = 15;
        let result = select_tools(&tools, &tv, &ctx, SessionState::Researching, None).unwrap();
        let names: Vec<_> = result.iter().map(|t| t.name.clone()).collect();
        assert_eq!(names, vec!["FinalAnswerTool", "CreateReportTool"]);
    }

    #[test]
    fn falls_back_to_final_answer_tool_when_everything_else_filtered() {
        let tools = vec![tool("FinalAnswerTool"), tool("WebSearchTool")];
        let policy = ToolPolicy {
            required_tools: vec![],
            denylist: vec!["WebSearchTool".into(), "FinalAnswerTool".into()],
            max_tools_in_prompt: 5,
            selection_strategy: SelectionStrategy::Static,
            ..Default::default()
        };
        let tv = template_version(&["WebSearchTool"], policy, vec![]);
        let result = select_tools(
            &tools,
            &tv,
            &ContextSnapshot::default(),
            SessionState::Researching,
            None,
        )
        .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].name, "FinalAnswerTool");
    }

    #[test]
    fn errors_when_no_tools_survive_and_no_final_answer_tool_registered() {
        let tools = vec![tool("WebSearchTool")];
        let policy = ToolPolicy {
            required_tools: vec![],
            denylist: vec!["WebSearchTool".into()],
            max_tools_in_prompt: 5,
            selection_strategy: SelectionStrategy::Static,
            ..Default::default()
        };
        let tv = template_version(&["WebSearchTool"], policy, vec![]);
        let err = select_tools(
            &tools,
            &tv,
            &ContextSnapshot::default(),
            SessionState::Researching,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, SelectorError::NoToolsAvailable));
    }

    #[test]
    fn retrieval_strategy_ranks_by_cosine_similarity() {
        let mut a = tool("A");
        a.embedding = Some(vec![1.0, 0.0]);
        let mut b = tool("B");
        b.embedding = Some(vec![0.0, 1.0]);
        let tools = vec![a, b];
        let policy = ToolPolicy {
            required_tools: vec![],
            max_tools_in_prompt: 1,
            selection_strategy: SelectionStrategy::Retrieval,
            ..Default::default()
        };
        let tv = template_version(&["A", "B"], policy, vec![]);
        let result = select_tools(
            &tools,
            &tv,
            &ContextSnapshot::default(),
            SessionState::Researching,
            Some(&[1.0, 0.0]),
        )
        .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].name, "A");
    }

    #[test]
    fn reasoning_tool_is_unioned_in_when_present_in_catalog() {
        let tools = vec![tool("WebSearchTool"), tool("ReasoningTool")];
        let policy = ToolPolicy {
            required_tools: vec![],
            max_tools_in_prompt: 5,
            selection_strategy: SelectionStrategy::Static,
            ..Default::default()
        };
        let tv = template_version(&["WebSearchTool"], policy, vec![]);
        let result = select_tools(
            &tools,
            &tv,
            &ContextSnapshot::default(),
            SessionState::Researching,
            None,
        )
        .unwrap();
        let names: Vec<_> = result.iter().map(|t| t.name.clone()).collect();
        assert!(names.contains(&"ReasoningTool".to_string()));
    }

    #[test]
    fn reasoning_tool_omitted_when_denylisted() {
        let tools = vec![tool("WebSearchTool"), tool("ReasoningTool")];
        let policy = ToolPolicy {
            required_tools: vec![],
            denylist: vec!["ReasoningTool".into()],
            max_tools_in_prompt: 5,
            selection_strategy: SelectionStrategy::Static,
            ..Default::default()
        };
        let tv = template_version(&["WebSearchTool"], policy, vec![]);
        let result = select_tools(
            &tools,
            &tv,
            &ContextSnapshot::default(),
            SessionState::Researching,
            None,
        )
        .unwrap();
        let names: Vec<_> = result.iter().map(|t| t.name.clone()).collect();
        assert!(!names.contains(&"ReasoningTool".to_string()));
    }

    #[test]
    fn build_query_includes_reasoning_and_stage() {
        let mut ctx = ContextSnapshot::default();
        ctx.last_reasoning = Some("need another search".into());
        ctx.stage = Some("finishing".into());
        let q = build_query("what is 2+2", &ctx);
        assert!(q.contains("what is 2+2"));
        assert!(q.contains("need another search"));
        assert!(q.contains("finishing"));
    }
}
