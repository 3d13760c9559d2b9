use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Text generation request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Text generation service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Text generation service returned no content")]
    EmptyResponse,
}

/// External text-generation service. Treated as a possibly-unavailable,
/// retryable function of its inputs.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        system: &str,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, GenerationError>;
}

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
pub struct ChatCompletionsClient {
    client: reqwest::Client,
    url: String,
    key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletionsClient {
    /// `url` is the API base, e.g. `https://api.openai.com/v1`.
    pub fn new(client: reqwest::Client, url: impl Into<String>, key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            key: key.into(),
            model: model.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.url.trim_end_matches('/'))
    }
}

#[async_trait]
impl TextGenerator for ChatCompletionsClient {
    #[instrument(skip_all, fields(model = %self.model, prompt_chars = prompt.len()))]
    async fn generate(
        &self,
        system: &str,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, GenerationError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens,
            temperature,
        };

        debug!("requesting completion");
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.key)
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: ChatResponse = response.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or(GenerationError::EmptyResponse)?;
        debug!(chars = content.len(), "completion received");
        Ok(content)
    }
}
