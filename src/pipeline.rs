use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::Config;
use crate::context::{AdditionalContext, AssemblerOptions, ContextAssembler, Definition};
use crate::diff::{parse_diff, DiffError, DiffSet};
use crate::execute::{Attempt, Executor, ExecutorOptions, JsonBodyCheck};
use crate::identify::{Identification, Identifier, InterfaceDescriptor};
use crate::plan::{PlanDocument, Synthesizer, SynthesizerOptions, TextGenerator};
use crate::report::{self, Report, RunInfo};
use crate::resolver::{AccessError, AccessStrategy, Resolver, ResolverOptions};
use crate::testgen::{SharedDefaults, TestDataGenerator};

/// Run-level failures. Everything per-interface degrades into the report instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid diff: {0}")]
    InvalidDiff(#[from] DiffError),

    #[error("No usable codebase access: {0}")]
    NoStrategy(AccessError),

    #[error("Execution requested but no base URL is configured (use --base-url or [execution] base_url)")]
    MissingBaseUrl,

    #[error("Failed to build pattern tables: {0}")]
    Patterns(#[from] regex::Error),
}

/// Per-invocation switches, already merged from CLI flags and config.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub plan: bool,
    pub execute: bool,
    pub base_url: Option<String>,
    pub git_ref: Option<String>,
}

/// Injected collaborators: codebase access candidates in priority order, the
/// text generator (if any) and the HTTP client for execution.
pub struct Collaborators {
    pub strategies: Vec<Box<dyn AccessStrategy>>,
    pub generator: Option<Arc<dyn TextGenerator>>,
    pub client: reqwest::Client,
}

pub async fn run(
    diff_text: &str,
    options: &RunOptions,
    config: &Config,
    collaborators: Collaborators,
) -> Result<Report, PipelineError> {
    let diff = parse_diff(diff_text)?;
    let base_url = match (options.execute, &options.base_url) {
        (true, None) => return Err(PipelineError::MissingBaseUrl),
        (_, base_url) => base_url.clone(),
    };
    info!(files = diff.files().len(), additions = diff.additions(), deletions = diff.deletions(), "diff parsed");

    let resolver = Resolver::detect(
        collaborators.strategies,
        ResolverOptions {
            op_timeout: config.runtime.op_timeout(),
            results_cap: config.budget.search_results_cap,
        },
    )
    .instrument(info_span!("resolve"))
    .await
    .map_err(PipelineError::NoStrategy)?;
    let resolver = Arc::new(resolver);

    let identification = identify(&diff, &resolver, options.git_ref.as_deref())
        .instrument(info_span!("identify"))
        .await?;
    let descriptors = identification.descriptors.clone();
    info!(interfaces = descriptors.len(), ambiguous = identification.diagnostics.len(), "interfaces identified");

    let mut run = RunInfo {
        files_changed: diff.files().len(),
        additions: diff.additions(),
        deletions: diff.deletions(),
        strategy: Some(resolver.active().to_string()),
        diagnostics: identification.diagnostics,
        ..RunInfo::default()
    };
    if descriptors.is_empty() {
        run.notes.push("no interfaces identified in this change".to_string());
    }

    let assembler = ContextAssembler::new(
        Arc::clone(&resolver),
        AssemblerOptions {
            lines_before: config.budget.lines_before,
            lines_after: config.budget.lines_after,
            excerpt_max_lines: config.budget.excerpt_max_lines,
            call_site_cap: config.budget.call_site_cap,
            context_chars: config.budget.context_chars,
            workers: config.runtime.workers(),
            git_ref: options.git_ref.clone(),
        },
    )?;
    let context = assembler
        .assemble(&descriptors)
        .instrument(info_span!("context"))
        .await;

    let plan = synthesize(&diff, &descriptors, &context, options, config, collaborators.generator)
        .instrument(info_span!("plan"))
        .await;

    let attempts = match &base_url {
        Some(base_url) if options.execute => {
            run_requests(&descriptors, &context, base_url, config, collaborators.client)
                .instrument(info_span!("execute"))
                .await
        }
        _ => Vec::new(),
    };

    Ok(info_span!("aggregate").in_scope(|| report::aggregate(&plan, Some(&context), attempts, run)))
}

/// Identify interfaces, giving the identifier the full text of every changed
/// file it can read so router prefixes can be applied.
async fn identify(diff: &DiffSet, resolver: &Resolver, git_ref: Option<&str>) -> Result<Identification, PipelineError> {
    let mut sources = HashMap::new();
    for file in diff.files().iter().filter(|f| !f.is_deleted) {
        match resolver.fetch_file(&file.path, git_ref).await {
            Ok(text) => {
                sources.insert(file.path.clone(), text);
            }
            Err(err) => debug!(path = %file.path, error = %err, "full source unavailable"),
        }
    }
    Ok(Identifier::builtin()?.with_sources(sources).identify(diff))
}

async fn synthesize(
    diff: &DiffSet,
    descriptors: &[InterfaceDescriptor],
    context: &AdditionalContext,
    options: &RunOptions,
    config: &Config,
    generator: Option<Arc<dyn TextGenerator>>,
) -> PlanDocument {
    if !options.plan {
        return PlanDocument::skeleton(descriptors, "planning disabled");
    }
    let synthesizer = Synthesizer::new(
        generator,
        SynthesizerOptions {
            prompt_chars: config.budget.prompt_chars,
            diff_excerpt_chars: config.budget.diff_excerpt_chars,
            max_tokens: config.llm.max_tokens,
            temperature: config.llm.temperature,
            attempts: config.llm.attempts,
            timeout: config.runtime.op_timeout(),
        },
    );
    let summary = diff.summary(synthesizer.options().diff_excerpt_chars);
    match synthesizer.synthesize(&summary, descriptors, context).await {
        Ok(plan) => plan,
        Err(err) => {
            warn!(error = %err, "plan synthesis failed");
            PlanDocument::skeleton(descriptors, err.to_string())
        }
    }
}

async fn run_requests(
    descriptors: &[InterfaceDescriptor],
    context: &AdditionalContext,
    base_url: &str,
    config: &Config,
    client: reqwest::Client,
) -> Vec<Attempt> {
    let generator = TestDataGenerator::new(SharedDefaults {
        headers: config.execution.default_headers.clone(),
        auth_token: config.execution_token(),
        probe_removed: config.execution.probe_removed,
    });
    let requests: Vec<_> = descriptors
        .iter()
        .filter_map(|descriptor| match context.assembled(&descriptor.key()) {
            Some(entry) => generator.generate(&entry.definition),
            None => generator.generate(&Definition::empty(descriptor.clone(), "no context assembled")),
        })
        .collect();
    info!(requests = requests.len(), "requests generated");

    let mut executor = Executor::new(
        client,
        ExecutorOptions {
            timeout: config.execution.timeout(),
            body_snapshot_chars: config.execution.body_snapshot_chars,
            workers: config.runtime.workers(),
        },
    );
    if config.execution.expect_json {
        executor = executor.with_check(Arc::new(JsonBodyCheck));
    }
    executor.run_all(requests, base_url).await
}
