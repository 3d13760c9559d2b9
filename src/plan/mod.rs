pub mod generator;
pub mod prompt;

pub use generator::{ChatCompletionsClient, TextGenerator};

use indexmap::IndexMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::context::AdditionalContext;
use crate::diff::DiffSummary;
use crate::identify::{DescriptorKey, InterfaceDescriptor};

pub const PLAN_UNAVAILABLE: &str = "plan unavailable";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SynthesisError {
    #[error("Text generation unavailable: {0}")]
    Unavailable(String),

    #[error("Prompt needs {needed} characters but the ceiling is {limit}")]
    BudgetExceeded { needed: usize, limit: usize },
}

/// Synthesized test plan. `fragments` holds the per-interface sections that
/// could be matched back to a descriptor.
#[derive(Debug, Clone, Serialize)]
pub struct PlanDocument {
    pub interfaces: Vec<InterfaceDescriptor>,
    pub markdown: String,
    #[serde(skip)]
    pub fragments: IndexMap<DescriptorKey, String>,
    /// Left out of the prompt to fit the ceiling.
    pub dropped: Vec<InterfaceDescriptor>,
    /// Why only the skeleton is available, when it is.
    pub degraded: Option<String>,
}

impl PlanDocument {
    /// Interface list plus a "plan unavailable" marker.
    pub fn skeleton(descriptors: &[InterfaceDescriptor], reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let mut markdown = format!("> {}: {}\n\n", PLAN_UNAVAILABLE, reason);
        for d in descriptors {
            markdown.push_str(&format!(
                "- `{}` ({}, {}) in {}:{}\n",
                d.identity, d.kind, d.change, d.declaring_file, d.declaring_line
            ));
        }
        Self {
            interfaces: descriptors.to_vec(),
            markdown,
            fragments: IndexMap::new(),
            dropped: Vec::new(),
            degraded: Some(reason),
        }
    }

    pub fn fragment(&self, key: &DescriptorKey) -> Option<&str> {
        self.fragments.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct SynthesizerOptions {
    pub prompt_chars: usize,
    pub diff_excerpt_chars: usize,
    pub max_tokens: u32,
    pub temperature: f32,
    pub attempts: u32,
    pub timeout: Duration,
}

impl Default for SynthesizerOptions {
    fn default() -> Self {
        Self {
            prompt_chars: 15_000,
            diff_excerpt_chars: 4_000,
            max_tokens: 4096,
            temperature: 0.3,
            attempts: 2,
            timeout: Duration::from_secs(60),
        }
    }
}

pub struct Synthesizer {
    generator: Option<Arc<dyn TextGenerator>>,
    options: SynthesizerOptions,
}

impl Synthesizer {
    /// Without a generator every plan is the skeleton.
    pub fn new(generator: Option<Arc<dyn TextGenerator>>, options: SynthesizerOptions) -> Self {
        Self { generator, options }
    }

    pub fn options(&self) -> &SynthesizerOptions {
        &self.options
    }

    /// Fit the prompt under the ceiling by dropping the lowest-confidence
    /// descriptors, then ask the generator. A generator failure degrades to
    /// the skeleton; only a diff summary that cannot fit on its own is an error.
    #[instrument(skip_all, fields(descriptors = descriptors.len()))]
    pub async fn synthesize(
        &self,
        summary: &DiffSummary,
        descriptors: &[InterfaceDescriptor],
        context: &AdditionalContext,
    ) -> Result<PlanDocument, SynthesisError> {
        let mut included = descriptors.to_vec();
        let mut dropped = Vec::new();
        let prompt = loop {
            match prompt::build_prompt(summary, &included, context, self.options.prompt_chars) {
                Ok(prompt) => break prompt,
                Err(err @ SynthesisError::BudgetExceeded { .. }) => {
                    let Some(index) = prompt::next_to_drop(&included) else {
                        return Err(err);
                    };
                    let removed = included.remove(index);
                    warn!(interface = %removed.identity, confidence = ?removed.confidence, "dropped from prompt to fit ceiling");
                    dropped.push(removed);
                }
                Err(err) => return Err(err),
            }
        };
        debug!(prompt_chars = prompt.chars().count(), included = included.len(), "prompt built");

        let mut plan = match self.generate(&prompt).await {
            Ok(markdown) => {
                info!(chars = markdown.len(), "plan generated");
                let fragments = split_fragments(&markdown, descriptors);
                PlanDocument {
                    interfaces: descriptors.to_vec(),
                    markdown,
                    fragments,
                    dropped: Vec::new(),
                    degraded: None,
                }
            }
            Err(err) => {
                warn!(error = %err, "plan synthesis degraded to skeleton");
                PlanDocument::skeleton(descriptors, err.to_string())
            }
        };
        plan.dropped = dropped;
        Ok(plan)
    }

    async fn generate(&self, prompt: &str) -> Result<String, SynthesisError> {
        let Some(generator) = &self.generator else {
            return Err(SynthesisError::Unavailable("no text generation service configured".to_string()));
        };
        let attempts = self.options.attempts.max(1);
        let mut last = String::new();
        for attempt in 1..=attempts {
            let call = generator.generate(
                prompt::SYSTEM_INSTRUCTIONS,
                prompt,
                self.options.max_tokens,
                self.options.temperature,
            );
            match tokio::time::timeout(self.options.timeout, call).await {
                Ok(Ok(text)) => return Ok(text),
                Ok(Err(err)) => last = err.to_string(),
                Err(_) => last = format!("timed out after {:?}", self.options.timeout),
            }
            warn!(attempt, attempts, error = %last, "text generation attempt failed");
        }
        Err(SynthesisError::Unavailable(last))
    }
}

/// Split generated Markdown at `####` headings and match each heading to a
/// descriptor identity. Exact matches win over headings that merely mention
/// the identity; each descriptor takes at most one fragment.
pub fn split_fragments(markdown: &str, descriptors: &[InterfaceDescriptor]) -> IndexMap<DescriptorKey, String> {
    let mut sections: Vec<(String, Vec<&str>)> = Vec::new();
    let mut current: Option<usize> = None;
    for line in markdown.lines() {
        let trimmed = line.trim_start();
        if let Some(heading) = trimmed.strip_prefix("####") {
            if !heading.starts_with('#') {
                let heading = heading.trim().trim_matches('`').trim().to_string();
                sections.push((heading, Vec::new()));
                current = Some(sections.len() - 1);
                continue;
            }
        }
        if trimmed.starts_with('#') {
            // A higher-level heading closes the current interface section.
            current = None;
            continue;
        }
        if let Some(index) = current {
            sections[index].1.push(line);
        }
    }

    let mut fragments = IndexMap::new();
    for (heading, lines) in sections {
        let normalized = heading.to_ascii_lowercase();
        let unclaimed = |d: &&InterfaceDescriptor| !fragments.contains_key(&d.key());
        let matched = descriptors
            .iter()
            .filter(unclaimed)
            .find(|d| d.identity.to_string().to_ascii_lowercase() == normalized)
            .or_else(|| {
                descriptors
                    .iter()
                    .filter(unclaimed)
                    .find(|d| normalized.contains(&d.identity.to_string().to_ascii_lowercase()))
            });
        match matched {
            Some(d) => {
                let key = d.key();
                fragments.insert(key, lines.join("\n").trim().to_string());
            }
            None => debug!(%heading, "plan heading matches no interface"),
        }
    }

    // Keep descriptor order rather than generation order.
    let mut ordered = IndexMap::new();
    for d in descriptors {
        let key = d.key();
        if let Some(text) = fragments.swap_remove(&key) {
            ordered.insert(key, text);
        }
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::generator::GenerationError;
    use super::*;
    use crate::diff::parse_diff;
    use crate::identify::{ChangeTag, Dialect, HttpMethod, InterfaceKind};
    use crate::identify::types::{Confidence, Identity};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct Canned {
        replies: Mutex<Vec<Result<String, GenerationError>>>,
        calls: Mutex<usize>,
    }

    impl Canned {
        fn new(replies: Vec<Result<String, GenerationError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for Canned {
        async fn generate(&self, _system: &str, _prompt: &str, _max: u32, _t: f32) -> Result<String, GenerationError> {
            *self.calls.lock() += 1;
            let mut replies = self.replies.lock();
            if replies.is_empty() {
                return Err(GenerationError::EmptyResponse);
            }
            replies.remove(0)
        }
    }

    /// Answers only after the caller has given up.
    struct Slow {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl TextGenerator for Slow {
        async fn generate(&self, _system: &str, _prompt: &str, _max: u32, _t: f32) -> Result<String, GenerationError> {
            *self.calls.lock() += 1;
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(PLAN.to_string())
        }
    }

    fn descriptor(method: HttpMethod, path: &str, confidence: Confidence) -> InterfaceDescriptor {
        InterfaceDescriptor {
            kind: InterfaceKind::Endpoint,
            identity: Identity::endpoint(Some(method), path),
            declaring_file: "src/routes/users.ts".to_string(),
            declaring_line: 11,
            dialect: Dialect::Express,
            change: ChangeTag::Added,
            confidence,
            search_literal: path.to_string(),
        }
    }

    fn summary() -> DiffSummary {
        let diff = "diff --git a/a.ts b/a.ts\n--- a/a.ts\n+++ b/a.ts\n@@ -1,1 +1,2 @@\n x\n+y\n";
        parse_diff(diff).unwrap().summary(1000)
    }

    const PLAN: &str = "## Plan\n\n#### POST /api/users\n- create a user\n- reject a missing email\n\n\
#### `GET /api/users`\n- list users\n\n### Notes\nunrelated\n";

    #[tokio::test]
    async fn test_generated_plan_is_split_per_interface() {
        let post = descriptor(HttpMethod::Post, "/api/users", Confidence::High);
        let get = descriptor(HttpMethod::Get, "/api/users", Confidence::High);
        let generator = Canned::new(vec![Ok(PLAN.to_string())]);
        let synthesizer = Synthesizer::new(Some(generator as Arc<dyn TextGenerator>), SynthesizerOptions::default());
        let plan = synthesizer
            .synthesize(&summary(), &[get.clone(), post.clone()], &AdditionalContext::new(100))
            .await
            .unwrap();

        assert_eq!(plan.degraded, None);
        assert_eq!(plan.fragment(&post.key()), Some("- create a user\n- reject a missing email"));
        assert_eq!(plan.fragment(&get.key()), Some("- list users"));
        let order: Vec<_> = plan.fragments.keys().cloned().collect();
        assert_eq!(order, vec![get.key(), post.key()]);
    }

    #[tokio::test]
    async fn test_generator_failure_degrades_after_retries() {
        let d = descriptor(HttpMethod::Post, "/api/users", Confidence::High);
        let generator = Canned::new(vec![
            Err(GenerationError::Status {
                status: 503,
                body: "down".to_string(),
            }),
            Err(GenerationError::EmptyResponse),
            Ok("never reached".to_string()),
        ]);
        let synthesizer = Synthesizer::new(Some(generator.clone() as Arc<dyn TextGenerator>), SynthesizerOptions::default());
        let plan = synthesizer
            .synthesize(&summary(), std::slice::from_ref(&d), &AdditionalContext::new(100))
            .await
            .unwrap();

        assert_eq!(*generator.calls.lock(), 2);
        assert!(plan.degraded.is_some());
        assert!(plan.markdown.starts_with("> plan unavailable:"));
        assert!(plan.markdown.contains("`POST /api/users`"));
        assert!(plan.fragments.is_empty());
        assert_eq!(plan.interfaces, vec![d]);
    }

    #[tokio::test]
    async fn test_generation_timeout_degrades_to_skeleton() {
        let d = descriptor(HttpMethod::Post, "/api/users", Confidence::High);
        let generator = Arc::new(Slow { calls: Mutex::new(0) });
        let options = SynthesizerOptions {
            timeout: Duration::from_millis(50),
            attempts: 2,
            ..SynthesizerOptions::default()
        };
        let synthesizer = Synthesizer::new(Some(generator.clone() as Arc<dyn TextGenerator>), options);
        let plan = synthesizer
            .synthesize(&summary(), std::slice::from_ref(&d), &AdditionalContext::new(100))
            .await
            .unwrap();

        assert_eq!(*generator.calls.lock(), 2);
        let reason = plan.degraded.as_deref().unwrap();
        assert!(reason.contains("timed out after"), "{}", reason);
        assert!(plan.fragments.is_empty());
        assert_eq!(plan.interfaces, vec![d]);
    }

    #[tokio::test]
    async fn test_unconfigured_generator_gives_skeleton() {
        let d = descriptor(HttpMethod::Get, "/health", Confidence::High);
        let synthesizer = Synthesizer::new(None, SynthesizerOptions::default());
        let plan = synthesizer
            .synthesize(&summary(), &[d], &AdditionalContext::new(100))
            .await
            .unwrap();
        assert_eq!(plan.degraded.as_deref(), Some("Text generation unavailable: no text generation service configured"));
    }

    #[tokio::test]
    async fn test_ceiling_drops_low_confidence_first() {
        let high = descriptor(HttpMethod::Post, "/api/users", Confidence::High);
        let low = descriptor(HttpMethod::Get, "/api/legacy", Confidence::Low);
        let full = prompt::build_prompt(&summary(), &[high.clone(), low.clone()], &AdditionalContext::new(0), usize::MAX)
            .unwrap();
        let options = SynthesizerOptions {
            prompt_chars: full.chars().count() - 1,
            ..SynthesizerOptions::default()
        };
        let synthesizer = Synthesizer::new(Some(Canned::new(vec![Ok(PLAN.to_string())]) as Arc<dyn TextGenerator>), options);
        let plan = synthesizer
            .synthesize(&summary(), &[high.clone(), low.clone()], &AdditionalContext::new(0))
            .await
            .unwrap();
        assert_eq!(plan.dropped, vec![low]);
        assert!(plan.fragment(&high.key()).is_some());
    }

    #[tokio::test]
    async fn test_summary_over_ceiling_is_budget_error() {
        let options = SynthesizerOptions {
            prompt_chars: 10,
            ..SynthesizerOptions::default()
        };
        let synthesizer = Synthesizer::new(None, options);
        let d = descriptor(HttpMethod::Get, "/health", Confidence::High);
        let err = synthesizer
            .synthesize(&summary(), &[d], &AdditionalContext::new(0))
            .await
            .unwrap_err();
        assert!(matches!(err, SynthesisError::BudgetExceeded { limit: 10, .. }));
    }
}
