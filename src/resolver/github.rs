use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::types::{SearchHit, StrategyKind};
use super::{AccessError, AccessStrategy};

pub const DEFAULT_API_URL: &str = "https://api.github.com";
const USER_AGENT: &str = "patch-probe";
const API_VERSION: &str = "2022-11-28";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    pub owner: String,
    pub repo: String,
}

/// Parse a GitHub remote: `https://github.com/o/r(.git)`,
/// `ssh://git@github.com/o/r.git` or `git@github.com:o/r(.git)`.
pub fn parse_remote_url(remote: &str) -> Option<RepoSlug> {
    let remote = remote.trim();
    let path = if let Some(rest) = remote.strip_prefix("git@github.com:") {
        rest.to_string()
    } else {
        let parsed = Url::parse(remote).ok()?;
        if parsed.host_str() != Some("github.com") {
            return None;
        }
        parsed.path().to_string()
    };

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() != 2 {
        return None;
    }
    let repo = segments[1].strip_suffix(".git").unwrap_or(segments[1]);
    if repo.is_empty() {
        return None;
    }
    Some(RepoSlug {
        owner: segments[0].to_string(),
        repo: repo.to_string(),
    })
}

/// GitHub code search plus the contents API.
pub struct RemoteSearch {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
    slug: Option<RepoSlug>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Deserialize)]
struct SearchItem {
    path: String,
    #[serde(default)]
    text_matches: Vec<TextMatch>,
}

#[derive(Deserialize)]
struct TextMatch {
    fragment: String,
}

impl RemoteSearch {
    pub fn new(
        client: reqwest::Client,
        api_url: impl Into<String>,
        token: Option<String>,
        slug: Option<RepoSlug>,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            token,
            slug,
        }
    }

    fn slug(&self) -> Result<&RepoSlug, AccessError> {
        self.slug
            .as_ref()
            .ok_or_else(|| AccessError::NotFound("remote is not a GitHub repository".to_string()))
    }

    fn token(&self) -> Result<&str, AccessError> {
        self.token
            .as_deref()
            .ok_or_else(|| AccessError::NotAuthorized("no GitHub token configured".to_string()))
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, AccessError> {
        let mut url = Url::parse(&self.api_url)
            .map_err(|e| AccessError::NotFound(format!("invalid API url {}: {}", self.api_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| AccessError::NotFound(format!("invalid API url {}", self.api_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get(&self, url: Url, accept: &str, query: &[(&str, &str)]) -> Result<reqwest::Response, AccessError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .header("User-Agent", USER_AGENT)
            .header("Accept", accept)
            .header("X-GitHub-Api-Version", API_VERSION)
            .bearer_auth(self.token()?)
            .send()
            .await
            .map_err(|e| AccessError::Transient(format!("GitHub request failed: {}", e)))?;
        check_status(response.status())?;
        Ok(response)
    }
}

fn check_status(status: StatusCode) -> Result<(), AccessError> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(AccessError::NotAuthorized(format!("GitHub returned {}", status)))
        }
        StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
            Err(AccessError::NotFound(format!("GitHub returned {}", status)))
        }
        _ => Err(AccessError::Transient(format!("GitHub returned {}", status))),
    }
}

/// One hit per fragment; the matching line becomes the hit content.
fn fragment_hit(path: &str, fragment: &str, query: &str, context_lines: usize) -> SearchHit {
    let lines: Vec<&str> = fragment.lines().collect();
    let Some(index) = lines.iter().position(|l| l.contains(query)) else {
        return SearchHit::new(path, None, fragment.lines().next().unwrap_or_default());
    };
    let mut hit = SearchHit::new(path, None, lines[index]);
    hit.before = lines[index.saturating_sub(context_lines)..index]
        .iter()
        .map(|l| l.to_string())
        .collect();
    hit.after = lines[index + 1..(index + 1 + context_lines).min(lines.len())]
        .iter()
        .map(|l| l.to_string())
        .collect();
    hit
}

#[async_trait]
impl AccessStrategy for RemoteSearch {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RemoteSearch
    }

    async fn detect(&self) -> Result<(), AccessError> {
        self.slug()?;
        self.token()?;
        Ok(())
    }

    #[instrument(skip(self), fields(strategy = "remote-search"))]
    async fn search(&self, query: &str, context_lines: usize) -> Result<Vec<SearchHit>, AccessError> {
        let slug = self.slug()?;
        let q = format!("\"{}\" repo:{}/{}", query, slug.owner, slug.repo);
        let url = self.endpoint(&["search", "code"])?;
        let response = self
            .get(url, "application/vnd.github.text-match+json", &[("q", q.as_str()), ("per_page", "100")])
            .await?;
        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| AccessError::Transient(format!("unreadable search response: {}", e)))?;
        debug!(items = body.items.len(), "GitHub code search returned");

        let mut hits = Vec::new();
        for item in body.items {
            if item.text_matches.is_empty() {
                hits.push(SearchHit::new(&item.path, None, ""));
            }
            for text_match in &item.text_matches {
                hits.push(fragment_hit(&item.path, &text_match.fragment, query, context_lines));
            }
        }
        Ok(hits)
    }

    async fn fetch_file(&self, path: &str, git_ref: Option<&str>) -> Result<String, AccessError> {
        let slug = self.slug()?;
        let mut segments = vec!["repos", slug.owner.as_str(), slug.repo.as_str(), "contents"];
        segments.extend(path.split('/').filter(|s| !s.is_empty()));
        let url = self.endpoint(&segments)?;
        let query: Vec<(&str, &str)> = git_ref.map(|r| ("ref", r)).into_iter().collect();
        self.get(url, "application/vnd.github.raw+json", &query)
            .await?
            .text()
            .await
            .map_err(|e| AccessError::Transient(format!("unreadable file body: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn slug() -> Option<RepoSlug> {
        Some(RepoSlug {
            owner: "acme".to_string(),
            repo: "shop".to_string(),
        })
    }

    #[test]
    fn test_parse_remote_url() {
        let expected = slug();
        assert_eq!(parse_remote_url("https://github.com/acme/shop.git"), expected);
        assert_eq!(parse_remote_url("https://github.com/acme/shop"), expected);
        assert_eq!(parse_remote_url("git@github.com:acme/shop.git"), expected);
        assert_eq!(parse_remote_url("ssh://git@github.com/acme/shop.git"), expected);
        assert_eq!(parse_remote_url("https://gitlab.com/acme/shop.git"), None);
        assert_eq!(parse_remote_url("https://github.com/acme"), None);
        assert_eq!(parse_remote_url("not a url"), None);
    }

    #[tokio::test]
    async fn test_detect_requires_token_and_slug() {
        let client = reqwest::Client::new();
        let no_token = RemoteSearch::new(client.clone(), DEFAULT_API_URL, None, slug());
        assert!(matches!(no_token.detect().await, Err(AccessError::NotAuthorized(_))));
        let no_slug = RemoteSearch::new(client, DEFAULT_API_URL, Some("t".into()), None);
        assert!(matches!(no_slug.detect().await, Err(AccessError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_code_search_fragments() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/search/code")
            .match_query(Matcher::UrlEncoded("q".into(), "\"/api/users\" repo:acme/shop".into()))
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"total_count":1,"items":[{"path":"web/api.ts","text_matches":[{"fragment":"const a = 1;\nfetch('/api/users');\nreturn a;"}]}]}"#,
            )
            .create_async()
            .await;

        let remote = RemoteSearch::new(reqwest::Client::new(), server.url(), Some("secret".into()), slug());
        let hits = remote.search("/api/users", 1).await.unwrap();
        mock.assert_async().await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "web/api.ts");
        assert_eq!(hits[0].line, None);
        assert_eq!(hits[0].content, "fetch('/api/users');");
        assert_eq!(hits[0].before, vec!["const a = 1;"]);
        assert_eq!(hits[0].after, vec!["return a;"]);
    }

    #[tokio::test]
    async fn test_contents_status_mapping() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/acme/shop/contents/src/app.ts")
            .match_query(Matcher::UrlEncoded("ref".into(), "main".into()))
            .with_status(200)
            .with_body("export const app = 1;\n")
            .create_async()
            .await;
        server
            .mock("GET", "/repos/acme/shop/contents/src/secret.ts")
            .with_status(403)
            .create_async()
            .await;
        server
            .mock("GET", "/repos/acme/shop/contents/src/gone.ts")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("GET", "/repos/acme/shop/contents/src/flaky.ts")
            .with_status(502)
            .create_async()
            .await;

        let remote = RemoteSearch::new(reqwest::Client::new(), server.url(), Some("secret".into()), slug());
        assert_eq!(
            remote.fetch_file("src/app.ts", Some("main")).await.unwrap(),
            "export const app = 1;\n"
        );
        assert!(matches!(
            remote.fetch_file("src/secret.ts", None).await,
            Err(AccessError::NotAuthorized(_))
        ));
        assert!(matches!(
            remote.fetch_file("src/gone.ts", None).await,
            Err(AccessError::NotFound(_))
        ));
        assert!(matches!(
            remote.fetch_file("src/flaky.ts", None).await,
            Err(AccessError::Transient(_))
        ));
    }
}
