//! Rules Engine (§4.5, `C5`): a pure function from session counters + a
//! candidate tool list to a filtered tool list. No I/O, no async — follows
//! this codebase's convention of small, independently testable pure routing
//! functions over state.

use crate::domain::{ContextSnapshot, Rule, RuleConditions, RulePhase, SessionState};

/// The subset of session state a rule's conditions can reference (§4.5).
#[derive(Debug, Clone, Copy)]
pub struct RuleContext {
    pub iteration: u32,
    pub searches_used: u32,
    pub clarifications_used: u32,
    pub state: SessionState,
}

impl RuleContext {
    pub fn from_snapshot(context: &ContextSnapshot, state: SessionState) -> Self {
        Self {
            iteration: context.iteration,
            searches_used: context.searches_used,
            clarifications_used: context.clarifications_used,
            state,
        }
    }
}

fn conditions_hold(cond: &RuleConditions, ctx: &RuleContext) -> bool {
    if let Some(n) = cond.iteration_gte {
        if ctx.iteration < n {
            return false;
        }
    }
    if let Some(n) = cond.searches_used_gte {
        if ctx.searches_used < n {
            return false;
        }
    }
    if let Some(n) = cond.clarifications_used_gte {
        if ctx.clarifications_used < n {
            return false;
        }
    }
    if let Some(s) = cond.state {
        if s != ctx.state {
            return false;
        }
    }
    true
}

/// Applies every rule whose `apply_to` includes `phase` and whose
/// conditions hold, in declaration order, composing effects left-to-right
/// (§4.5). `keep_only` takes precedence over `exclude` within the same
/// rule; `set_stage` is written into `*stage` as rules fire.
pub fn apply_rules(
    rules: &[Rule],
    phase: RulePhase,
    candidates: Vec<String>,
    ctx: &RuleContext,
    stage: &mut Option<String>,
) -> Vec<String> {
    let mut current = candidates;
    for rule in rules {
        if !rule.apply_to.contains(&phase) {
            continue;
        }
        if !conditions_hold(&rule.when, ctx) {
            continue;
        }
        if let Some(keep_only) = &rule.actions.keep_only {
            current.retain(|name| keep_only.iter().any(|k| k.eq_ignore_ascii_case(name)));
        } else if let Some(exclude) = &rule.actions.exclude {
            current.retain(|name| !exclude.iter().any(|e| e.eq_ignore_ascii_case(name)));
        }
        if let Some(stage_name) = &rule.actions.set_stage {
            *stage = Some(stage_name.clone());
        }
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RuleActions;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn ctx(iteration: u32) -> RuleContext {
        RuleContext {
            iteration,
            searches_used: 0,
            clarifications_used: 0,
            state: SessionState::Researching,
        }
    }

    #[test]
    fn keep_only_wins_over_exclude_in_same_rule() {
        let rule = Rule {
            apply_to: vec![RulePhase::PostRetrieval],
            when: RuleConditions {
                iteration_gte: Some(15),
                ..Default::default()
            },
            actions: RuleActions {
                exclude: Some(names(&["FinalAnswerTool"])),
                keep_only: Some(names(&["FinalAnswerTool", "CreateReportTool"])),
                set_stage: None,
            },
        };
        let mut stage = None;
        let result = apply_rules(
            &[rule],
            RulePhase::PostRetrieval,
            names(&["FinalAnswerTool", "CreateReportTool", "WebSearchTool"]),
            &ctx(15),
            &mut stage,
        );
        assert_eq!(result, names(&["FinalAnswerTool", "CreateReportTool"]));
    }

    #[test]
    fn rule_skipped_when_condition_not_met() {
        let rule = Rule {
            apply_to: vec![RulePhase::PostRetrieval],
            when: RuleConditions {
                iteration_gte: Some(15),
                ..Default::default()
            },
            actions: RuleActions {
                exclude: None,
                keep_only: Some(names(&["FinalAnswerTool"])),
                set_stage: None,
            },
        };
        let mut stage = None;
        let result = apply_rules(
            &[rule],
            RulePhase::PostRetrieval,
            names(&["FinalAnswerTool", "WebSearchTool"]),
            &ctx(3),
            &mut stage,
        );
        assert_eq!(result, names(&["FinalAnswerTool", "WebSearchTool"]));
    }

    #[test]
    fn rule_skipped_when_phase_does_not_match() {
        let rule = Rule {
            apply_to: vec![RulePhase::PreRetrieval],
            when: RuleConditions::default(),
            actions: RuleActions {
                exclude: Some(names(&["WebSearchTool"])),
                keep_only: None,
                set_stage: None,
            },
        };
        let mut stage = None;
        let result = apply_rules(
            &[rule],
            RulePhase::PostRetrieval,
            names(&["WebSearchTool"]),
            &ctx(1),
            &mut stage,
        );
        assert_eq!(result, names(&["WebSearchTool"]));
    }

    #[test]
    fn set_stage_mutates_stage_label() {
        let rule = Rule {
            apply_to: vec![RulePhase::PreRetrieval],
            when: RuleConditions::default(),
            actions: RuleActions {
                exclude: None,
                keep_only: None,
                set_stage: Some("finishing".into()),
            },
        };
        let mut stage = None;
        let _ = apply_rules(&[rule], RulePhase::PreRetrieval, vec![], &ctx(1), &mut stage);
        assert_eq!(stage.as_deref(), Some("finishing"));
    }

    #[test]
    fn effects_compose_left_to_right_across_rules() {
        let r1 = Rule {
            apply_to: vec![RulePhase::PostRetrieval],
            when: RuleConditions::default(),
            actions: RuleActions {
                exclude: Some(names(&["A"])),
                keep_only: None,
                set_stage: None,
            },
        };
        let r2 = Rule {
            apply_to: vec![RulePhase::PostRetrieval],
            when: RuleConditions::default(),
            actions: RuleActions {
                exclude: Some(names(&["B"])),
                keep_only: None,
                set_stage: None,
            },
        };
        let mut stage = None;
        let result = apply_rules(
            &[r1, r2],
            RulePhase::PostRetrieval,
            names(&["A", "B", "C"]),
            &ctx(1),
            &mut stage,
        );
        assert_eq!(result, names(&["C"]));
    }
}
