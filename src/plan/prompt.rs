use std::fmt::Write as _;

use crate::budget::CharBudget;
use crate::context::{AdditionalContext, ContextEntry};
use crate::diff::DiffSummary;
use crate::identify::InterfaceDescriptor;

use super::SynthesisError;

/// Call sites listed per interface in the prompt.
const PROMPT_CALL_SITES: usize = 5;

pub const SYSTEM_INSTRUCTIONS: &str = "You are a senior QA engineer. Given a code change and the interfaces it \
touches, write a focused Markdown test plan. Start one section per interface with a level-4 heading that is \
exactly the interface as listed (for example `#### POST /api/users`), in the order given. Under each heading list \
concrete test cases with inputs and expected outcomes. For interfaces marked removed, describe how to confirm the \
removal and which callers must migrate; do not propose functional tests for them.";

/// Render the prompt, failing when it does not fit in `limit` characters.
pub fn build_prompt(
    summary: &DiffSummary,
    descriptors: &[InterfaceDescriptor],
    context: &AdditionalContext,
    limit: usize,
) -> Result<String, SynthesisError> {
    let mut budget = CharBudget::new(limit);
    let mut prompt = String::new();
    let mut push = |section: String, prompt: &mut String| {
        if budget.try_add(&section) {
            prompt.push_str(&section);
            Ok(())
        } else {
            Err(SynthesisError::BudgetExceeded {
                needed: budget.used() + section.chars().count(),
                limit,
            })
        }
    };

    push(format!("## Change summary\n{}\n", summary.render()), &mut prompt)?;
    push("## Interfaces\n".to_string(), &mut prompt)?;
    for descriptor in descriptors {
        push(interface_section(descriptor, context.get(&descriptor.key())), &mut prompt)?;
    }
    Ok(prompt)
}

fn interface_section(descriptor: &InterfaceDescriptor, entry: Option<&ContextEntry>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n#### {}", descriptor.identity);
    let _ = writeln!(
        out,
        "- {} ({}), {} in {}:{}",
        descriptor.kind, descriptor.dialect, descriptor.change, descriptor.declaring_file, descriptor.declaring_line
    );
    if descriptor.is_removed() {
        out.push_str("- removed by this change\n");
    }

    let Some(entry) = entry else {
        out.push_str("- no definition context available\n");
        return out;
    };
    let definition = &entry.definition;
    if let Some(reason) = &definition.failure {
        let _ = writeln!(out, "- definition unavailable: {}", reason);
    }
    if !definition.parameters.is_empty() {
        out.push_str("- parameters:\n");
        for p in &definition.parameters {
            let _ = writeln!(
                out,
                "  - {} ({}, {}{})",
                p.name,
                p.location,
                p.value_type,
                if p.required { ", required" } else { "" }
            );
        }
    }
    if let Some(shape) = &definition.response_shape {
        let _ = writeln!(out, "- response: {}{}", shape.name, if shape.is_list { "[]" } else { "" });
    }
    if !definition.source_excerpt.is_empty() {
        let _ = writeln!(out, "- definition:\n```\n{}\n```", definition.source_excerpt);
    }
    if !entry.call_sites.is_empty() {
        out.push_str("- call sites:\n");
        for site in entry.call_sites.iter().take(PROMPT_CALL_SITES) {
            match site.line {
                Some(line) => {
                    let _ = writeln!(out, "  - {}:{} `{}`", site.file, line, site.excerpt);
                }
                None => {
                    let _ = writeln!(out, "  - {} `{}`", site.file, site.excerpt);
                }
            }
        }
        if entry.call_sites.len() > PROMPT_CALL_SITES {
            let _ = writeln!(out, "  - ... {} more", entry.call_sites.len() - PROMPT_CALL_SITES);
        }
    }
    out
}

/// Index of the descriptor to drop next: lowest confidence, latest first.
pub fn next_to_drop(descriptors: &[InterfaceDescriptor]) -> Option<usize> {
    descriptors
        .iter()
        .enumerate()
        .min_by_key(|(i, d)| (d.confidence, std::cmp::Reverse(*i)))
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CallSite, Definition, ParamLocation, ParameterSpec, ValueType};
    use crate::diff::parse_diff;
    use crate::identify::{ChangeTag, Dialect, HttpMethod, InterfaceKind};
    use crate::identify::types::{Confidence, Identity};

    fn descriptor(path: &str, confidence: Confidence) -> InterfaceDescriptor {
        InterfaceDescriptor {
            kind: InterfaceKind::Endpoint,
            identity: Identity::endpoint(Some(HttpMethod::Post), path),
            declaring_file: "src/routes/users.ts".to_string(),
            declaring_line: 11,
            dialect: Dialect::Express,
            change: ChangeTag::Added,
            confidence,
            search_literal: path.to_string(),
        }
    }

    fn summary() -> DiffSummary {
        let diff = "diff --git a/a.ts b/a.ts\n--- a/a.ts\n+++ b/a.ts\n@@ -1,1 +1,2 @@\n x\n+y\n";
        parse_diff(diff).unwrap().summary(1000)
    }

    #[test]
    fn test_prompt_lists_context() {
        let d = descriptor("/api/users", Confidence::High);
        let mut context = AdditionalContext::new(10_000);
        let mut definition = Definition::empty(d.clone(), "");
        definition.failure = None;
        definition.source_excerpt = "router.post('/api/users', handler)".to_string();
        definition.parameters = vec![ParameterSpec::new("name", ParamLocation::Body, ValueType::String, true)];
        context.try_insert(ContextEntry {
            definition,
            call_sites: vec![CallSite {
                file: "web/api.ts".to_string(),
                line: Some(4),
                excerpt: "fetch('/api/users')".to_string(),
            }],
        });

        let prompt = build_prompt(&summary(), &[d], &context, 15_000).unwrap();
        assert!(prompt.starts_with("## Change summary\n- a.ts +1 -0"));
        assert!(prompt.contains("#### POST /api/users\n"));
        assert!(prompt.contains("  - name (body, string, required)\n"));
        assert!(prompt.contains("router.post('/api/users', handler)"));
        assert!(prompt.contains("  - web/api.ts:4 `fetch('/api/users')`"));
    }

    #[test]
    fn test_prompt_over_budget_is_an_error() {
        let d = descriptor("/api/users", Confidence::High);
        let context = AdditionalContext::new(0);
        let err = build_prompt(&summary(), &[d], &context, 60).unwrap_err();
        assert!(matches!(err, SynthesisError::BudgetExceeded { limit: 60, .. }));
    }

    #[test]
    fn test_drop_order_prefers_low_confidence_then_latest() {
        let list = vec![
            descriptor("/a", Confidence::Low),
            descriptor("/b", Confidence::High),
            descriptor("/c", Confidence::Low),
        ];
        assert_eq!(next_to_drop(&list), Some(2));
        assert_eq!(next_to_drop(&list[..2]), Some(0));
        assert_eq!(next_to_drop(&[]), None);
    }
}
