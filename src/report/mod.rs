pub mod types;

pub use types::{ExecutionEntry, PlanEntry, Report, ReportSection, RunInfo, Totals};

use colored::Colorize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::context::AdditionalContext;
use crate::execute::Attempt;
use crate::identify::{InterfaceDescriptor, InterfaceKind};
use crate::plan::{PlanDocument, PLAN_UNAVAILABLE};

pub const NOT_FOUND: &str = "not found";
pub const NOT_EXECUTED: &str = "not executed";
pub const DEPRECATED: &str = "removed by this change; deprecation only, no new tests proposed";
pub const OVER_BUDGET: &str = "context over budget: left out of the plan prompt";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to write report file: {0}")]
    FileWrite(#[from] std::io::Error),

    #[error("Failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Join plan fragments, context and execution attempts per interface.
///
/// Sections follow the plan's interface order, which is first-appearance
/// order in the diff. Attempts for interfaces the plan does not list are
/// appended under generated headings.
#[instrument(skip_all, fields(interfaces = plan.interfaces.len(), attempts = attempts.len()))]
pub fn aggregate(
    plan: &PlanDocument,
    context: Option<&AdditionalContext>,
    attempts: Vec<Attempt>,
    mut run: RunInfo,
) -> Report {
    let mut by_key: HashMap<_, Attempt> = HashMap::new();
    let mut orphans = Vec::new();
    for attempt in attempts {
        let key = attempt.request.descriptor.key();
        if plan.interfaces.iter().any(|d| d.key() == key) && !by_key.contains_key(&key) {
            by_key.insert(key, attempt);
        } else {
            orphans.push(attempt);
        }
    }

    let mut sections = Vec::new();
    for descriptor in &plan.interfaces {
        let attempt = by_key.remove(&descriptor.key());
        sections.push(section(descriptor, plan, context, attempt));
    }
    for attempt in orphans {
        let descriptor = attempt.request.descriptor.clone();
        debug!(interface = %descriptor.identity, "result without plan interface");
        sections.push(section(&descriptor, plan, context, Some(attempt)));
    }

    if let Some(reason) = &plan.degraded {
        run.notes.push(format!("{}: {}", PLAN_UNAVAILABLE, reason));
    }
    run.dropped_from_prompt
        .extend(plan.dropped.iter().map(|d| d.identity.to_string()));
    if let Some(context) = context {
        run.context_rejected
            .extend(context.rejected().iter().map(|k| k.to_string()));
    }

    let totals = totals(&sections);
    Report { run, sections, totals }
}

fn section(
    descriptor: &InterfaceDescriptor,
    plan: &PlanDocument,
    context: Option<&AdditionalContext>,
    attempt: Option<Attempt>,
) -> ReportSection {
    let key = descriptor.key();
    let entry = context.and_then(|c| c.assembled(&key));
    let over_budget = context.is_some_and(|c| c.is_over_budget(&key));

    let (definition, definition_note) = match entry.map(|e| &e.definition) {
        Some(d) if d.failure.is_none() => (Some(d.clone()), over_budget.then(|| OVER_BUDGET.to_string())),
        Some(d) => (
            None,
            Some(format!("{}: {}", NOT_FOUND, d.failure.as_deref().unwrap_or("no definition"))),
        ),
        None => (None, Some(format!("{}: no context assembled", NOT_FOUND))),
    };
    let call_sites = entry.map(|e| e.call_sites.clone()).unwrap_or_default();

    let fragment = plan.fragment(&key);
    let plan_entry = match (fragment, &plan.degraded) {
        _ if descriptor.is_removed() => PlanEntry::Deprecated(fragment.map(str::to_string)),
        (Some(text), _) => PlanEntry::Fragment(text.to_string()),
        (None, Some(reason)) => PlanEntry::Unavailable(reason.clone()),
        (None, None) => PlanEntry::Missing,
    };

    let execution = match attempt {
        Some(Attempt {
            outcome: Ok(result), ..
        }) => ExecutionEntry::Completed {
            result: Box::new(result),
        },
        Some(Attempt { outcome: Err(err), .. }) => ExecutionEntry::Failed { error: err.to_string() },
        None => ExecutionEntry::NotExecuted {
            reason: not_executed_reason(descriptor),
        },
    };

    ReportSection {
        heading: descriptor.identity.to_string(),
        auto_heading: fragment.is_none(),
        descriptor: descriptor.clone(),
        definition,
        definition_note,
        call_sites,
        plan: plan_entry,
        execution,
    }
}

fn not_executed_reason(descriptor: &InterfaceDescriptor) -> String {
    if descriptor.kind == InterfaceKind::Component {
        format!("{}: UI component", NOT_EXECUTED)
    } else if descriptor.is_removed() {
        format!("{}: interface removed", NOT_EXECUTED)
    } else {
        NOT_EXECUTED.to_string()
    }
}

fn totals(sections: &[ReportSection]) -> Totals {
    let mut totals = Totals {
        interfaces: sections.len(),
        ..Totals::default()
    };
    for section in sections {
        match section.execution.passed() {
            Some(true) => {
                totals.executed += 1;
                totals.passed += 1;
            }
            Some(false) => {
                totals.executed += 1;
                totals.failed += 1;
            }
            None => {}
        }
    }
    totals
}

/// Write the report: terminal or Markdown by default, JSON when asked.
/// Without a path the report goes to stdout.
#[instrument(skip(report), fields(sections = report.sections.len()))]
pub fn output(report: &Report, output_path: Option<&Path>, json: bool) -> Result<(), ReportError> {
    match (output_path, json) {
        (None, false) => {
            debug!("writing report to terminal");
            print_terminal_report(report);
            Ok(())
        }
        (None, true) => {
            println!("{}", serde_json::to_string_pretty(report)?);
            Ok(())
        }
        (Some(path), true) => {
            debug!(path = %path.display(), "writing JSON report");
            std::fs::write(path, serde_json::to_string_pretty(report)?)?;
            Ok(())
        }
        (Some(path), false) => {
            debug!(path = %path.display(), "writing markdown report");
            std::fs::write(path, render_markdown(report))?;
            Ok(())
        }
    }
}

fn print_terminal_report(report: &Report) {
    let run = &report.run;
    println!();
    println!(
        "Change: {} files | +{} -{} | search: {}",
        run.files_changed,
        run.additions,
        run.deletions,
        run.strategy.as_deref().unwrap_or("none")
    );
    for note in &run.notes {
        println!("{} {}", "!".yellow().bold(), note);
    }
    for m in &run.diagnostics {
        println!(
            "{} {}:{} matched {} and {} ({}); kept {}",
            "?".cyan(),
            m.file,
            m.line,
            m.kept,
            m.runner_up,
            m.runner_up_identity,
            m.kept
        );
    }
    for name in &run.dropped_from_prompt {
        println!("{} {} left out of the plan prompt", "-".dimmed(), name);
    }
    for name in &run.context_rejected {
        println!("{} {} exceeded the context budget", "-".dimmed(), name);
    }
    println!();

    for section in &report.sections {
        let heading = if section.auto_heading {
            format!("{} [{}]", section.heading, section.descriptor.change)
        } else {
            section.heading.clone()
        };
        println!("═══ {} ═══", heading.bold());
        println!(
            "  {} {} in {}:{}",
            section.descriptor.kind,
            section.descriptor.dialect,
            section.descriptor.declaring_file,
            section.descriptor.declaring_line
        );
        match (&section.definition, &section.definition_note) {
            (Some(d), note) => {
                if let Some((file, line)) = &d.location {
                    println!("  definition: {}:{}", file, line);
                }
                if let Some(note) = note {
                    println!("  {}", note.yellow());
                }
                for p in &d.parameters {
                    println!(
                        "    • {} ({}, {}{})",
                        p.name,
                        p.location,
                        p.value_type,
                        if p.required { ", required" } else { "" }
                    );
                }
            }
            (None, Some(note)) => println!("  definition: {}", note.yellow()),
            (None, None) => println!("  definition: {}", NOT_FOUND.yellow()),
        }
        if !section.call_sites.is_empty() {
            println!("  call sites: {}", section.call_sites.len());
        }
        match &section.plan {
            PlanEntry::Fragment(text) => {
                for line in text.lines() {
                    println!("  {}", line);
                }
            }
            PlanEntry::Unavailable(reason) => println!("  plan: {}", format!("{}: {}", PLAN_UNAVAILABLE, reason).yellow()),
            PlanEntry::Missing => println!("  plan: {}", "no section generated".yellow()),
            PlanEntry::Deprecated(fragment) => {
                println!("  plan: {}", DEPRECATED.magenta());
                for line in fragment.iter().flat_map(|text| text.lines()) {
                    println!("  {}", line);
                }
            }
        }
        println!("  test: {}", execution_line(&section.execution));
        println!();
    }

    let t = &report.totals;
    let summary = format!(
        "{} interfaces | {} executed | {} passed | {} failed",
        t.interfaces, t.executed, t.passed, t.failed
    );
    if t.failed > 0 {
        println!("═══ {} ═══", summary.red().bold());
    } else {
        println!("═══ {} ═══", summary.green().bold());
    }
    println!();
}

fn execution_line(execution: &ExecutionEntry) -> colored::ColoredString {
    match execution {
        ExecutionEntry::Completed { result } => {
            let text = format!(
                "{} {} → {} in {} ms{}",
                result.request.method,
                result.url,
                result.status_code,
                result.duration_ms,
                if result.request.is_inferred() { " (inferred values)" } else { "" }
            );
            if result.validation.passed {
                format!("PASS {}", text).green()
            } else {
                format!("FAIL {}", text).red()
            }
        }
        ExecutionEntry::Failed { error } => format!("ERROR {}", error).red(),
        ExecutionEntry::NotExecuted { reason } => reason.as_str().dimmed(),
    }
}

pub fn render_markdown(report: &Report) -> String {
    let run = &report.run;
    let mut md = String::new();
    md.push_str("# Change test report\n\n");
    md.push_str(&format!(
        "**Files changed:** {} | **+{} -{}** | **Search:** {}\n\n",
        run.files_changed,
        run.additions,
        run.deletions,
        run.strategy.as_deref().unwrap_or("none")
    ));
    for note in &run.notes {
        md.push_str(&format!("> {}\n", note));
    }
    if !run.notes.is_empty() {
        md.push('\n');
    }
    if !run.diagnostics.is_empty() {
        md.push_str("**Ambiguous matches:**\n");
        for m in &run.diagnostics {
            md.push_str(&format!(
                "- `{}:{}` kept {}, runner-up {} `{}`\n",
                m.file, m.line, m.kept, m.runner_up, m.runner_up_identity
            ));
        }
        md.push('\n');
    }
    if !run.dropped_from_prompt.is_empty() {
        md.push_str(&format!("**Left out of the plan prompt:** {}\n\n", run.dropped_from_prompt.join(", ")));
    }
    if !run.context_rejected.is_empty() {
        md.push_str(&format!("**Over the context budget:** {}\n\n", run.context_rejected.join(", ")));
    }

    for section in &report.sections {
        if section.auto_heading {
            md.push_str(&format!("## {} ({})\n\n", section.heading, section.descriptor.change));
        } else {
            md.push_str(&format!("## {}\n\n", section.heading));
        }
        md.push_str(&format!(
            "*{} ({}) declared in `{}:{}`*\n\n",
            section.descriptor.kind,
            section.descriptor.dialect,
            section.descriptor.declaring_file,
            section.descriptor.declaring_line
        ));

        md.push_str("### Definition\n\n");
        match (&section.definition, &section.definition_note) {
            (Some(d), note) => {
                if let Some((file, line)) = &d.location {
                    md.push_str(&format!("`{}:{}`\n\n", file, line));
                }
                if let Some(note) = note {
                    md.push_str(&format!("_{}_\n\n", note));
                }
                for p in &d.parameters {
                    md.push_str(&format!(
                        "- `{}` {} {}{}\n",
                        p.name,
                        p.location,
                        p.value_type,
                        if p.required { " (required)" } else { "" }
                    ));
                }
                if !d.parameters.is_empty() {
                    md.push('\n');
                }
                if !d.source_excerpt.is_empty() {
                    md.push_str(&format!("```\n{}\n```\n\n", d.source_excerpt));
                }
            }
            (None, Some(note)) => md.push_str(&format!("_{}_\n\n", note)),
            (None, None) => md.push_str(&format!("_{}_\n\n", NOT_FOUND)),
        }

        if !section.call_sites.is_empty() {
            md.push_str("### Call sites\n\n");
            for site in &section.call_sites {
                match site.line {
                    Some(line) => md.push_str(&format!("- `{}:{}` {}\n", site.file, line, site.excerpt)),
                    None => md.push_str(&format!("- `{}` {}\n", site.file, site.excerpt)),
                }
            }
            md.push('\n');
        }

        md.push_str("### Plan\n\n");
        match &section.plan {
            PlanEntry::Fragment(text) => md.push_str(&format!("{}\n\n", text)),
            PlanEntry::Unavailable(reason) => md.push_str(&format!("_{}: {}_\n\n", PLAN_UNAVAILABLE, reason)),
            PlanEntry::Missing => md.push_str("_no plan section generated_\n\n"),
            PlanEntry::Deprecated(fragment) => {
                md.push_str(&format!("_{}_\n\n", DEPRECATED));
                if let Some(text) = fragment {
                    md.push_str(&format!("{}\n\n", text));
                }
            }
        }

        md.push_str("### Test\n\n");
        match &section.execution {
            ExecutionEntry::Completed { result } => {
                let verdict = if result.validation.passed { "PASS" } else { "FAIL" };
                md.push_str(&format!(
                    "**{}** `{} {}` → {} in {} ms\n",
                    verdict, result.request.method, result.url, result.status_code, result.duration_ms
                ));
                for check in &result.validation.checks {
                    let mark = if check.passed { "x" } else { " " };
                    md.push_str(&format!("- [{}] {}", mark, check.name));
                    if let Some(detail) = &check.detail {
                        md.push_str(&format!(": {}", detail));
                    }
                    md.push('\n');
                }
                for flag in &result.request.flags {
                    md.push_str(&format!("- `{}` is {}\n", flag.name, flag.kind));
                }
                if !result.body_snapshot.is_empty() {
                    md.push_str(&format!("\n```\n{}\n```\n", result.body_snapshot));
                }
                md.push('\n');
            }
            ExecutionEntry::Failed { error } => md.push_str(&format!("**ERROR** {}\n\n", error)),
            ExecutionEntry::NotExecuted { reason } => md.push_str(&format!("_{}_\n\n", reason)),
        }
    }

    let t = &report.totals;
    md.push_str(&format!(
        "## Summary\n\n{} interfaces | {} executed | {} passed | {} failed\n",
        t.interfaces, t.executed, t.passed, t.failed
    ));
    md
}
