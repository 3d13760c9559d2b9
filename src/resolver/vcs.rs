use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tracing::debug;

use super::walk::read_under;
use super::AccessError;

/// Narrow view of a version-control working copy.
#[async_trait]
pub trait VcsReader: Send + Sync {
    async fn is_repository(&self) -> bool;

    async fn remote_url(&self) -> Option<String>;

    /// Raw grep output with NUL-terminated paths; empty when nothing matches.
    async fn grep(&self, query: &str, context_lines: usize) -> Result<String, AccessError>;

    /// File contents at `git_ref`, or the working copy when `None`.
    async fn read_file(&self, path: &str, git_ref: Option<&str>) -> Result<String, AccessError>;
}

/// `VcsReader` backed by the `git` command line.
pub struct GitCli {
    root: PathBuf,
}

impl GitCli {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn run(&self, args: &[&str]) -> Result<Output, AccessError> {
        debug!(?args, "running git");
        Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .await
            .map_err(|e| AccessError::Transient(format!("failed to run git: {}", e)))
    }
}

/// Whether `dir` or any ancestor holds a `.git` entry (directory or worktree file).
pub fn has_git_metadata(dir: &Path) -> bool {
    dir.ancestors().any(|d| d.join(".git").exists())
}

#[async_trait]
impl VcsReader for GitCli {
    async fn is_repository(&self) -> bool {
        has_git_metadata(&self.root)
    }

    async fn remote_url(&self) -> Option<String> {
        let output = self.run(&["remote", "get-url", "origin"]).await.ok()?;
        if !output.status.success() {
            return None;
        }
        let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!url.is_empty()).then_some(url)
    }

    async fn grep(&self, query: &str, context_lines: usize) -> Result<String, AccessError> {
        let context = context_lines.to_string();
        let output = self
            .run(&["grep", "-n", "-I", "-F", "-z", "-C", context.as_str(), "-e", query])
            .await?;
        match output.status.code() {
            Some(0) => Ok(String::from_utf8_lossy(&output.stdout).into_owned()),
            Some(1) => Ok(String::new()),
            _ => Err(AccessError::Transient(format!(
                "git grep failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }

    async fn read_file(&self, path: &str, git_ref: Option<&str>) -> Result<String, AccessError> {
        let Some(git_ref) = git_ref else {
            return read_under(&self.root, path).await;
        };
        let spec = format!("{}:./{}", git_ref, path);
        let output = self.run(&["show", spec.as_str()]).await?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("does not exist") || stderr.contains("exists on disk, but not in") {
            Err(AccessError::NotFound(format!("{} at {}", path, git_ref)))
        } else {
            Err(AccessError::Transient(format!("git show failed: {}", stderr.trim())))
        }
    }
}
