pub mod git_grep;
pub mod github;
pub mod grep_output;
pub mod ripgrep;
pub mod types;
pub mod vcs;
pub mod walk;

pub use types::{SearchHit, SearchOutcome, StrategyKind};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use git_grep::VcsGrep;
use github::{parse_remote_url, RemoteSearch};
use ripgrep::RipGrep;
use vcs::VcsReader;
use walk::FilesystemWalk;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Transient access failure: {0}")]
    Transient(String),
}

/// One interchangeable way of searching and reading a codebase.
#[async_trait]
pub trait AccessStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// `Ok` when this strategy can serve requests in the current environment.
    async fn detect(&self) -> Result<(), AccessError>;

    async fn search(&self, query: &str, context_lines: usize) -> Result<Vec<SearchHit>, AccessError>;

    async fn fetch_file(&self, path: &str, git_ref: Option<&str>) -> Result<String, AccessError>;
}

/// Runtime knobs for a [`Resolver`].
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    pub op_timeout: Duration,
    pub results_cap: usize,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            op_timeout: Duration::from_secs(20),
            results_cap: 200,
        }
    }
}

/// Picks the first capable strategy once, keeps the remaining capable ones
/// as a single-step fallback, and caches search results for the run.
pub struct Resolver {
    strategies: Vec<Box<dyn AccessStrategy>>,
    cache: Mutex<HashMap<(String, usize), SearchOutcome>>,
    options: ResolverOptions,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("strategies", &self.strategies.iter().map(|s| s.kind()).collect::<Vec<_>>())
            .finish()
    }
}

impl Resolver {
    /// Try `candidates` in priority order and keep the capable ones.
    /// Detection failures fall through silently; having none left is an error.
    #[instrument(skip_all, fields(candidates = candidates.len()))]
    pub async fn detect(
        candidates: Vec<Box<dyn AccessStrategy>>,
        options: ResolverOptions,
    ) -> Result<Self, AccessError> {
        let mut strategies = Vec::new();
        for candidate in candidates {
            let kind = candidate.kind();
            match tokio::time::timeout(options.op_timeout, candidate.detect()).await {
                Ok(Ok(())) => {
                    debug!(strategy = %kind, "strategy available");
                    strategies.push(candidate);
                }
                Ok(Err(err)) => debug!(strategy = %kind, reason = %err, "strategy unavailable"),
                Err(_) => debug!(strategy = %kind, "strategy detection timed out"),
            }
        }

        let Some(active) = strategies.first() else {
            return Err(AccessError::NotFound(
                "no usable codebase access strategy (remote search, git grep, rg or directory walk)"
                    .to_string(),
            ));
        };
        info!(strategy = %active.kind(), fallbacks = strategies.len() - 1, "codebase access resolved");
        Ok(Self {
            strategies,
            cache: Mutex::new(HashMap::new()),
            options,
        })
    }

    pub fn active(&self) -> StrategyKind {
        // `detect` guarantees at least one strategy.
        self.strategies
            .first()
            .map_or(StrategyKind::FilesystemWalk, |s| s.kind())
    }

    #[instrument(skip(self), fields(active = %self.active()))]
    pub async fn search(&self, query: &str, context_lines: usize) -> Result<SearchOutcome, AccessError> {
        let normalized = normalize_query(query);
        if normalized.is_empty() {
            return Err(AccessError::NotFound("empty search query".to_string()));
        }
        let key = (normalized, context_lines);
        if let Some(cached) = self.cache.lock().get(&key) {
            debug!("search cache hit");
            return Ok(cached.clone());
        }

        let query = key.0.as_str();
        let (served_by, mut hits) = self
            .with_fallback("search", |strategy| strategy.search(query, context_lines))
            .await?;
        hits.truncate(self.options.results_cap);
        let outcome = SearchOutcome { hits, served_by };
        debug!(hits = outcome.hits.len(), served_by = %served_by, "search complete");
        self.cache.lock().insert(key, outcome.clone());
        Ok(outcome)
    }

    #[instrument(skip(self), fields(active = %self.active()))]
    pub async fn fetch_file(&self, path: &str, git_ref: Option<&str>) -> Result<String, AccessError> {
        let (_, text) = self
            .with_fallback("fetch", |strategy| strategy.fetch_file(path, git_ref))
            .await?;
        Ok(text)
    }

    /// Run `op` against the active strategy; a transient failure is retried
    /// exactly once on the next capable strategy.
    async fn with_fallback<'a, T, F, Fut>(
        &'a self,
        op_name: &str,
        op: F,
    ) -> Result<(StrategyKind, T), AccessError>
    where
        F: Fn(&'a dyn AccessStrategy) -> Fut,
        Fut: Future<Output = Result<T, AccessError>>,
    {
        let mut last_error = None;
        for strategy in self.strategies.iter().take(2) {
            let kind = strategy.kind();
            let result = match tokio::time::timeout(self.options.op_timeout, op(strategy.as_ref())).await {
                Ok(result) => result,
                Err(_) => Err(AccessError::Transient(format!(
                    "{} timed out after {:?}",
                    op_name, self.options.op_timeout
                ))),
            };
            match result {
                Ok(value) => return Ok((kind, value)),
                Err(err @ AccessError::Transient(_)) => {
                    warn!(strategy = %kind, error = %err, "{} failed; falling back", op_name);
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error.unwrap_or_else(|| AccessError::NotFound("no strategy available".to_string())))
    }
}

/// Trim and collapse internal whitespace so equivalent queries share a cache slot.
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The built-in strategies in priority order for a working copy at `root`.
pub async fn default_strategies(
    root: &Path,
    config: &Config,
    client: reqwest::Client,
    vcs: Arc<dyn VcsReader>,
) -> Vec<Box<dyn AccessStrategy>> {
    let slug = match vcs.remote_url().await {
        Some(remote) => parse_remote_url(&remote),
        None => None,
    };
    vec![
        Box::new(RemoteSearch::new(
            client,
            config.github.api_url(),
            config.github_token(),
            slug,
        )),
        Box::new(VcsGrep::new(vcs)),
        Box::new(RipGrep::new(root)),
        Box::new(FilesystemWalk::new(root)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// A strategy whose detection and operations are scripted.
    struct Scripted {
        kind: StrategyKind,
        available: bool,
        search: Result<Vec<SearchHit>, AccessError>,
        calls: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn new(kind: StrategyKind, available: bool, search: Result<Vec<SearchHit>, AccessError>) -> Self {
            Self {
                kind,
                available,
                search,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl AccessStrategy for Scripted {
        fn kind(&self) -> StrategyKind {
            self.kind
        }

        async fn detect(&self) -> Result<(), AccessError> {
            if self.available {
                Ok(())
            } else {
                Err(AccessError::NotAuthorized("scripted".to_string()))
            }
        }

        async fn search(&self, _query: &str, _context_lines: usize) -> Result<Vec<SearchHit>, AccessError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.search.clone()
        }

        async fn fetch_file(&self, path: &str, _git_ref: Option<&str>) -> Result<String, AccessError> {
            Ok(format!("{} from {}", path, self.kind))
        }
    }

    /// Available, but every operation outlives any sane timeout.
    struct Stalled;

    #[async_trait]
    impl AccessStrategy for Stalled {
        fn kind(&self) -> StrategyKind {
            StrategyKind::RemoteSearch
        }

        async fn detect(&self) -> Result<(), AccessError> {
            Ok(())
        }

        async fn search(&self, _query: &str, _context_lines: usize) -> Result<Vec<SearchHit>, AccessError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Vec::new())
        }

        async fn fetch_file(&self, _path: &str, _git_ref: Option<&str>) -> Result<String, AccessError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(String::new())
        }
    }

    fn short_timeout() -> ResolverOptions {
        ResolverOptions {
            op_timeout: Duration::from_millis(50),
            ..ResolverOptions::default()
        }
    }

    fn hit(path: &str) -> SearchHit {
        SearchHit::new(path, Some(1), "x")
    }

    #[tokio::test]
    async fn test_falls_through_unavailable_strategies() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("routes.py"), "@app.post(\"/api/users\")\n").unwrap();

        let candidates: Vec<Box<dyn AccessStrategy>> = vec![
            Box::new(Scripted::new(StrategyKind::RemoteSearch, false, Ok(vec![hit("remote")]))),
            Box::new(Scripted::new(StrategyKind::VcsGrep, false, Ok(vec![hit("git")]))),
            Box::new(FilesystemWalk::new(dir.path())),
        ];
        let resolver = Resolver::detect(candidates, ResolverOptions::default()).await.unwrap();
        assert_eq!(resolver.active(), StrategyKind::FilesystemWalk);

        let outcome = resolver.search("/api/users", 0).await.unwrap();
        assert_eq!(outcome.served_by, StrategyKind::FilesystemWalk);
        assert_eq!(outcome.hits.len(), 1);
        assert_eq!(outcome.hits[0].path, "routes.py");
    }

    #[tokio::test]
    async fn test_transient_failure_retries_once() {
        let first = Scripted::new(
            StrategyKind::RemoteSearch,
            true,
            Err(AccessError::Transient("boom".to_string())),
        );
        let second = Scripted::new(StrategyKind::VcsGrep, true, Err(AccessError::Transient("again".to_string())));
        let third = Scripted::new(StrategyKind::RipGrep, true, Ok(vec![hit("rg")]));
        let third_calls = Arc::clone(&third.calls);

        let resolver = Resolver::detect(
            vec![Box::new(first), Box::new(second), Box::new(third)],
            ResolverOptions::default(),
        )
        .await
        .unwrap();
        let err = resolver.search("q", 0).await.unwrap_err();
        assert_eq!(err, AccessError::Transient("again".to_string()));
        assert_eq!(third_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transient_then_success_reports_server() {
        let resolver = Resolver::detect(
            vec![
                Box::new(Scripted::new(
                    StrategyKind::VcsGrep,
                    true,
                    Err(AccessError::Transient("process died".to_string())),
                )),
                Box::new(Scripted::new(StrategyKind::RipGrep, true, Ok(vec![hit("a.ts")]))),
            ],
            ResolverOptions::default(),
        )
        .await
        .unwrap();
        let outcome = resolver.search("q", 0).await.unwrap();
        assert_eq!(outcome.served_by, StrategyKind::RipGrep);
    }

    #[tokio::test]
    async fn test_timed_out_operation_is_transient() {
        let resolver = Resolver::detect(vec![Box::new(Stalled)], short_timeout()).await.unwrap();
        match resolver.search("q", 0).await {
            Err(AccessError::Transient(reason)) => assert!(reason.starts_with("search timed out")),
            other => panic!("unexpected search result: {:?}", other),
        }
        assert!(matches!(
            resolver.fetch_file("a.ts", None).await,
            Err(AccessError::Transient(_))
        ));
    }

    #[tokio::test]
    async fn test_timed_out_operation_falls_back() {
        let resolver = Resolver::detect(
            vec![
                Box::new(Stalled),
                Box::new(Scripted::new(StrategyKind::RipGrep, true, Ok(vec![hit("a.ts")]))),
            ],
            short_timeout(),
        )
        .await
        .unwrap();
        let outcome = resolver.search("q", 0).await.unwrap();
        assert_eq!(outcome.served_by, StrategyKind::RipGrep);
        assert_eq!(resolver.fetch_file("a.ts", None).await.unwrap(), "a.ts from ripgrep");
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let resolver = Resolver::detect(
            vec![
                Box::new(Scripted::new(StrategyKind::VcsGrep, true, Err(AccessError::NotFound("nope".into())))),
                Box::new(Scripted::new(StrategyKind::RipGrep, true, Ok(vec![hit("a.ts")]))),
            ],
            ResolverOptions::default(),
        )
        .await
        .unwrap();
        assert!(matches!(resolver.search("q", 0).await, Err(AccessError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cache_serves_repeat_queries() {
        let strategy = Scripted::new(StrategyKind::RipGrep, true, Ok(vec![hit("a.ts")]));
        let calls = Arc::clone(&strategy.calls);
        let resolver = Resolver::detect(vec![Box::new(strategy)], ResolverOptions::default())
            .await
            .unwrap();
        resolver.search("  POST   /api/users ", 2).await.unwrap();
        resolver.search("POST /api/users", 2).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        resolver.search("POST /api/users", 3).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_usable_strategy_is_an_error() {
        let result = Resolver::detect(
            vec![Box::new(Scripted::new(StrategyKind::RemoteSearch, false, Ok(vec![])))],
            ResolverOptions::default(),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_results_are_capped() {
        let many: Vec<SearchHit> = (0..10).map(|i| hit(&format!("f{}.ts", i))).collect();
        let resolver = Resolver::detect(
            vec![Box::new(Scripted::new(StrategyKind::RipGrep, true, Ok(many)))],
            ResolverOptions {
                results_cap: 3,
                ..ResolverOptions::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(resolver.search("q", 0).await.unwrap().hits.len(), 3);
    }
}
