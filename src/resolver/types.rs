use serde::Serialize;
use std::fmt;

/// One matching line, with surrounding lines when the strategy provides them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    /// Path relative to the repository root, `/`-separated
    pub path: String,
    /// 1-based; remote search results carry no line numbers
    pub line: Option<usize>,
    pub content: String,
    pub before: Vec<String>,
    pub after: Vec<String>,
}

impl SearchHit {
    pub fn new(path: impl Into<String>, line: Option<usize>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            line,
            content: content.into(),
            before: Vec::new(),
            after: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StrategyKind {
    RemoteSearch,
    VcsGrep,
    RipGrep,
    FilesystemWalk,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::RemoteSearch => write!(f, "remote-search"),
            StrategyKind::VcsGrep => write!(f, "git-grep"),
            StrategyKind::RipGrep => write!(f, "ripgrep"),
            StrategyKind::FilesystemWalk => write!(f, "filesystem-walk"),
        }
    }
}

/// Search hits plus the strategy that produced them.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub hits: Vec<SearchHit>,
    pub served_by: StrategyKind,
}
