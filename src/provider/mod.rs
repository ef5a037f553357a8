// LLM provider abstraction (spec §4.9 server-side "translate the compiled
// signature into an LLM call"). Deliberately provider-agnostic: concrete
// vendor integrations are out of scope (spec Non-goals), so this module
// only defines the trait and one generic HTTP-backed implementation any
// OpenAI-compatible endpoint can satisfy.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One call to an LLM: a prompt in, text + token usage out.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, prompt: &str, model_preset: &str) -> Result<ProviderResponse>;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub text: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl ProviderResponse {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Generic HTTP provider speaking the common OpenAI-compatible
/// `{model, messages, ...} -> {choices, usage}` shape. Any concrete vendor
/// (Anthropic, OpenAI, a local server) that speaks this shape, or is
/// fronted by a compatibility proxy, works without a dedicated
/// implementation.
pub struct HttpLlmProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpLlmProvider {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    async fn complete(&self, prompt: &str, model_preset: &str) -> Result<ProviderResponse> {
        let body = ChatRequest {
            model: model_preset,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .context("brain provider request failed")?;

        if !response.status().is_success() {
            bail!("brain provider returned status {}", response.status());
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("brain provider returned an unparseable response")?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .context("brain provider returned no choices")?;
        let usage = parsed.usage.unwrap_or_default();

        Ok(ProviderResponse {
            text: choice.message.content,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubProvider;

    #[async_trait]
    impl LlmProvider for StubProvider {
        async fn complete(&self, prompt: &str, _model_preset: &str) -> Result<ProviderResponse> {
            Ok(ProviderResponse {
                text: format!("echo: {prompt}"),
                prompt_tokens: prompt.len() as u32,
                completion_tokens: 4,
            })
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    #[tokio::test]
    async fn stub_provider_roundtrips() {
        let provider = StubProvider;
        let response = provider.complete("hello", "default").await.unwrap();
        assert_eq!(response.text, "echo: hello");
        assert_eq!(response.total_tokens(), response.prompt_tokens + 4);
    }
}
