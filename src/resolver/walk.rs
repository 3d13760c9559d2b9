use async_trait::async_trait;
use ignore::WalkBuilder;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use super::types::{SearchHit, StrategyKind};
use super::{AccessError, AccessStrategy};

/// Last-resort strategy: walk the tree (honouring ignore files) and match
/// lines in-process with a plain substring test.
pub struct FilesystemWalk {
    root: PathBuf,
}

impl FilesystemWalk {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl AccessStrategy for FilesystemWalk {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FilesystemWalk
    }

    async fn detect(&self) -> Result<(), AccessError> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(AccessError::NotFound(format!("{} is not a directory", self.root.display())))
        }
    }

    async fn search(&self, query: &str, context_lines: usize) -> Result<Vec<SearchHit>, AccessError> {
        let root = self.root.clone();
        let query = query.to_string();
        tokio::task::spawn_blocking(move || walk_and_match(&root, &query, context_lines))
            .await
            .map_err(|e| AccessError::Transient(format!("walk task failed: {}", e)))
    }

    async fn fetch_file(&self, path: &str, git_ref: Option<&str>) -> Result<String, AccessError> {
        if let Some(git_ref) = git_ref {
            debug!(%git_ref, "filesystem walk reads the working copy; ref ignored");
        }
        read_under(&self.root, path).await
    }
}

fn walk_and_match(root: &Path, query: &str, context_lines: usize) -> Vec<SearchHit> {
    let mut hits = Vec::new();
    let walker = WalkBuilder::new(root)
        .git_ignore(true)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    for entry in walker.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        // Binary and unreadable files are skipped.
        let Ok(text) = std::fs::read_to_string(path) else {
            continue;
        };
        let relative = relative_path(root, path);
        let lines: Vec<&str> = text.lines().collect();
        for (i, line) in lines.iter().enumerate() {
            if !line.contains(query) {
                continue;
            }
            let mut hit = SearchHit::new(&relative, Some(i + 1), *line);
            let start = i.saturating_sub(context_lines);
            let end = (i + 1 + context_lines).min(lines.len());
            hit.before = lines[start..i].iter().map(|l| l.to_string()).collect();
            hit.after = lines[i + 1..end].iter().map(|l| l.to_string()).collect();
            hits.push(hit);
        }
    }
    hits
}

fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Read `path` relative to `root`, refusing paths that leave it.
pub(crate) async fn read_under(root: &Path, path: &str) -> Result<String, AccessError> {
    let relative = Path::new(path);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(AccessError::NotFound(format!("{} is outside the repository", path)));
    }
    match tokio::fs::read_to_string(root.join(relative)).await {
        Ok(text) => Ok(text),
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::InvalidData) => {
            Err(AccessError::NotFound(format!("{}: {}", path, e)))
        }
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            Err(AccessError::NotAuthorized(format!("{}: {}", path, e)))
        }
        Err(e) => Err(AccessError::Transient(format!("{}: {}", path, e))),
    }
}
