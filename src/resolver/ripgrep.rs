use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

use super::grep_output::parse_grep_output;
use super::types::{SearchHit, StrategyKind};
use super::walk::read_under;
use super::{AccessError, AccessStrategy};

/// Recursive text search through the `rg` binary.
pub struct RipGrep {
    root: PathBuf,
    binary: Option<PathBuf>,
}

impl RipGrep {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            binary: which::which("rg").ok(),
        }
    }
}

#[async_trait]
impl AccessStrategy for RipGrep {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RipGrep
    }

    async fn detect(&self) -> Result<(), AccessError> {
        match &self.binary {
            Some(_) => Ok(()),
            None => Err(AccessError::NotFound("rg is not on PATH".to_string())),
        }
    }

    async fn search(&self, query: &str, context_lines: usize) -> Result<Vec<SearchHit>, AccessError> {
        let binary = self
            .binary
            .as_ref()
            .ok_or_else(|| AccessError::NotFound("rg is not on PATH".to_string()))?;
        let context = context_lines.to_string();
        debug!(%query, "running ripgrep");
        let output = Command::new(binary)
            .args([
                "--line-number",
                "--no-heading",
                "--with-filename",
                "--null",
                "--color",
                "never",
                "--fixed-strings",
                "--context",
                context.as_str(),
                "--",
                query,
                ".",
            ])
            .current_dir(&self.root)
            .output()
            .await
            .map_err(|e| AccessError::Transient(format!("failed to run rg: {}", e)))?;

        match output.status.code() {
            Some(0) => Ok(parse_grep_output(
                &String::from_utf8_lossy(&output.stdout),
                context_lines,
            )),
            Some(1) => Ok(Vec::new()),
            _ => Err(AccessError::Transient(format!(
                "rg failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }

    async fn fetch_file(&self, path: &str, git_ref: Option<&str>) -> Result<String, AccessError> {
        if let Some(git_ref) = git_ref {
            debug!(%git_ref, "ripgrep reads the working copy; ref ignored");
        }
        read_under(&self.root, path).await
    }
}
