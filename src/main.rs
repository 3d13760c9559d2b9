mod budget;
mod config;
mod context;
mod diff;
mod execute;
mod identify;
mod pipeline;
mod plan;
mod pool;
mod report;
mod resolver;
mod testgen;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, info_span, Instrument};
use tracing_subscriber::EnvFilter;

use diff::DiffSource;
use plan::{ChatCompletionsClient, TextGenerator};
use resolver::vcs::GitCli;

/// Patch Probe: turns a unified diff into a change-aware test plan for the
/// HTTP endpoints and UI components it touches, and optionally runs
/// generated requests against a live base URL.
#[derive(Parser, Debug)]
#[command(name = "patch-probe", version, about)]
struct Cli {
    /// Path to a unified diff, or `-` to read it from stdin.
    ///
    /// Not required when --mock is used.
    diff: Option<String>,

    /// Working copy to search for definitions and call sites
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Base URL that generated requests are sent to
    #[arg(long)]
    base_url: Option<String>,

    /// Size of the worker pool for context fetches and request dispatch
    #[arg(long)]
    workers: Option<usize>,

    /// Execute generated requests against --base-url
    #[arg(long)]
    execute: bool,

    /// Skip test-plan synthesis and report the interface skeleton only
    #[arg(long)]
    no_plan: bool,

    /// Optional output file path for the report
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Emit the report as JSON
    #[arg(long)]
    json: bool,

    /// Use the built-in sample diff for demo purposes
    #[arg(long)]
    r#mock: bool,

    /// Revision to read files at (defaults to the working copy)
    #[arg(long)]
    git_ref: Option<String>,

    /// Configuration file (defaults to ./.patch-probe.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let source = if cli.r#mock {
        info!("using the embedded sample diff for demo");
        DiffSource::Embedded(include_str!("../tests/fixtures/sample_diff.patch"))
    } else {
        let arg = cli.diff.as_deref().ok_or(
            "A diff path is required unless --mock is used. Usage: patch-probe <DIFF|-> or patch-probe --mock",
        )?;
        DiffSource::from_arg(arg)
    };

    info!("loading configuration");
    let mut config = config::Config::load(cli.config.as_deref())?;
    if let Some(workers) = cli.workers {
        config.runtime.workers = Some(workers);
    }
    let options = pipeline::RunOptions {
        plan: !cli.no_plan,
        execute: cli.execute,
        base_url: cli.base_url.clone().or_else(|| config.execution.base_url.clone()),
        git_ref: cli.git_ref.clone(),
    };
    debug!(?options, workers = config.runtime.workers(), "run options");

    let diff_text = diff::read_source(&source).await?;

    let client = reqwest::Client::builder()
        .user_agent(concat!("patch-probe/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let vcs = Arc::new(GitCli::new(&cli.repo));
    let strategies = resolver::default_strategies(&cli.repo, &config, client.clone(), vcs).await;
    let generator = match config.llm_key() {
        Some(key) => Some(Arc::new(ChatCompletionsClient::new(
            client.clone(),
            config.llm.url(),
            key,
            config.llm.model(),
        )) as Arc<dyn TextGenerator>),
        None => {
            info!("no text generation key configured; the plan will be a skeleton");
            None
        }
    };

    let collaborators = pipeline::Collaborators {
        strategies,
        generator,
        client,
    };
    let built_report = pipeline::run(&diff_text, &options, &config, collaborators)
        .instrument(info_span!("patch_probe", repo = %cli.repo.display()))
        .await?;

    info!("writing report");
    report::output(&built_report, cli.output.as_deref(), cli.json)?;
    info!(
        interfaces = built_report.totals.interfaces,
        executed = built_report.totals.executed,
        passed = built_report.totals.passed,
        failed = built_report.totals.failed,
        "done"
    );

    Ok(())
}
