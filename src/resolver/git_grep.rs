use async_trait::async_trait;
use std::sync::Arc;

use super::grep_output::parse_grep_output;
use super::types::{SearchHit, StrategyKind};
use super::vcs::VcsReader;
use super::{AccessError, AccessStrategy};

/// Text search through the working copy's version-control grep.
pub struct VcsGrep {
    vcs: Arc<dyn VcsReader>,
}

impl VcsGrep {
    pub fn new(vcs: Arc<dyn VcsReader>) -> Self {
        Self { vcs }
    }
}

#[async_trait]
impl AccessStrategy for VcsGrep {
    fn kind(&self) -> StrategyKind {
        StrategyKind::VcsGrep
    }

    async fn detect(&self) -> Result<(), AccessError> {
        if self.vcs.is_repository().await {
            Ok(())
        } else {
            Err(AccessError::NotFound("no version-control metadata found".to_string()))
        }
    }

    async fn search(&self, query: &str, context_lines: usize) -> Result<Vec<SearchHit>, AccessError> {
        let output = self.vcs.grep(query, context_lines).await?;
        Ok(parse_grep_output(&output, context_lines))
    }

    async fn fetch_file(&self, path: &str, git_ref: Option<&str>) -> Result<String, AccessError> {
        self.vcs.read_file(path, git_ref).await
    }
}
