pub mod path;
pub mod types;

pub use types::{CheckOutcome, FlagKind, TestRequest, TestResult, Validation, ValueFlag};

use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, Url};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info_span, instrument, warn, Instrument};

use crate::pool;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Network failure: {0}")]
    Network(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Validation could not be evaluated: {0}")]
    ValidationFailed(String),

    #[error("Request could not be built: {0}")]
    InvalidRequest(String),
}

/// What a response check gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct ResponseView<'a> {
    pub status: u16,
    pub content_type: Option<&'a str>,
    pub body: &'a str,
}

/// Extension point for structural assertions on a response. Returning an
/// error means the check could not be evaluated at all.
pub trait ResponseCheck: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self, request: &TestRequest, response: ResponseView<'_>) -> Result<CheckOutcome, ExecutionError>;
}

/// Passes when the response body is JSON. 204 responses pass without a body.
pub struct JsonBodyCheck;

impl ResponseCheck for JsonBodyCheck {
    fn name(&self) -> &str {
        "json-body"
    }

    fn check(&self, request: &TestRequest, response: ResponseView<'_>) -> Result<CheckOutcome, ExecutionError> {
        if request.expect_gone || response.status == 204 {
            return Ok(CheckOutcome::pass(self.name()));
        }
        if response.body.trim().is_empty() {
            return Err(ExecutionError::ValidationFailed(format!(
                "{}: empty body with status {}",
                self.name(),
                response.status
            )));
        }
        match serde_json::from_str::<serde_json::Value>(response.body) {
            Ok(_) => Ok(CheckOutcome::pass(self.name())),
            Err(e) => Ok(CheckOutcome::fail(
                self.name(),
                format!("body is not JSON ({}); content-type {}", e, response.content_type.unwrap_or("unset")),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub timeout: Duration,
    pub body_snapshot_chars: usize,
    pub workers: usize,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            body_snapshot_chars: 2000,
            workers: pool::default_workers(),
        }
    }
}

/// One dispatched request and how it went.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub request: TestRequest,
    pub outcome: Result<TestResult, ExecutionError>,
}

#[derive(Clone)]
pub struct Executor {
    client: reqwest::Client,
    checks: Vec<Arc<dyn ResponseCheck>>,
    options: ExecutorOptions,
}

impl Executor {
    pub fn new(client: reqwest::Client, options: ExecutorOptions) -> Self {
        Self {
            client,
            checks: Vec::new(),
            options,
        }
    }

    pub fn with_check(mut self, check: Arc<dyn ResponseCheck>) -> Self {
        self.checks.push(check);
        self
    }

    /// Dispatch every request concurrently. One failure never affects the others.
    #[instrument(skip_all, fields(requests = requests.len()))]
    pub async fn run_all(&self, requests: Vec<TestRequest>, base_url: &str) -> Vec<Attempt> {
        let base_url = base_url.to_string();
        pool::fan_out(requests, self.options.workers, |request| {
            let executor = self.clone();
            let base_url = base_url.clone();
            let span = info_span!("execute", interface = %request.descriptor.identity);
            async move {
                let outcome = executor.execute(&request, &base_url).await;
                if let Err(err) = &outcome {
                    warn!(error = %err, "execution failed");
                }
                Attempt { request, outcome }
            }
            .instrument(span)
        })
        .await
    }

    pub async fn execute(&self, request: &TestRequest, base_url: &str) -> Result<TestResult, ExecutionError> {
        let url = build_url(request, base_url)?;
        let method = Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| ExecutionError::InvalidRequest(e.to_string()))?;

        let query: Vec<(&str, String)> = request
            .query_params
            .iter()
            .map(|(k, v)| (k.as_str(), query_value(v)))
            .collect();
        let mut builder = self
            .client
            .request(method, url.clone())
            .query(&query)
            .timeout(self.options.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!(%url, method = %request.method, "dispatching");
        let started = Instant::now();
        let response = builder.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        debug!(status, duration_ms, "response received");

        let view = ResponseView {
            status,
            content_type: content_type.as_deref(),
            body: &body,
        };
        let checks = self
            .checks
            .iter()
            .map(|check| check.check(request, view))
            .collect::<Result<Vec<_>, _>>()?;
        let passed = status_passes(request, status) && checks.iter().all(|c| c.passed);

        Ok(TestResult {
            request: request.clone(),
            url: url.to_string(),
            status_code: status,
            duration_ms,
            body_snapshot: snapshot(&body, self.options.body_snapshot_chars),
            validation: Validation { passed, checks },
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> ExecutionError {
        if err.is_timeout() {
            ExecutionError::Timeout(self.options.timeout)
        } else {
            ExecutionError::Network(err.to_string())
        }
    }
}

fn build_url(request: &TestRequest, base_url: &str) -> Result<Url, ExecutionError> {
    let mut url = Url::parse(base_url).map_err(|e| ExecutionError::InvalidRequest(format!("{}: {}", base_url, e)))?;
    path::substitute(&mut url, &request.path, &request.path_params).map_err(ExecutionError::InvalidRequest)?;
    Ok(url)
}

fn query_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 2xx passes; a request to a removed endpoint passes when the route is gone.
fn status_passes(request: &TestRequest, status: u16) -> bool {
    if request.expect_gone {
        matches!(status, 404 | 405 | 410)
    } else {
        (200..300).contains(&status)
    }
}

fn snapshot(body: &str, limit: usize) -> String {
    let total = body.chars().count();
    if total <= limit {
        return body.to_string();
    }
    let mut out: String = body.chars().take(limit).collect();
    out.push_str(&format!("... ({} more characters)", total - limit));
    out
}
