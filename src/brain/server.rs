// Brain Protocol server (spec §4.9 "Server-side behavior"): compiles or
// fetches a cached signature, validates inputs, calls the provider with
// bounded retries, and reports token usage per request.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use super::cache::SignatureCache;
use super::signature::{compile, CompiledSignature};
use super::{BrainRequest, BrainResponse, TokenUsage};
use crate::provider::LlmProvider;

pub struct BrainServer {
    provider: Arc<dyn LlmProvider>,
    cache: Mutex<SignatureCache>,
    model_preset: String,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl BrainServer {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        cache_capacity: usize,
        model_preset: impl Into<String>,
        max_retries: u32,
        retry_base_delay: Duration,
    ) -> Self {
        Self {
            provider,
            cache: Mutex::new(SignatureCache::new(cache_capacity)),
            model_preset: model_preset.into(),
            max_retries,
            retry_base_delay,
        }
    }

    /// Serve one brain request. Returns a response carrying `aborted` +
    /// `shutdown` if `cancel` fires before a provider call completes (spec
    /// §4.9 invariant (c)); otherwise a normal or error response, always
    /// carrying the originating `request_id` (invariant (b)).
    #[instrument(skip(self, cancel), fields(request_id = %request.request_id))]
    pub async fn serve(&self, request: BrainRequest, cancel: &CancellationToken) -> BrainResponse {
        if cancel.is_cancelled() {
            return BrainResponse::aborted(request.request_id, true);
        }

        if let Err(message) = request.signature.validate_inputs(&request.input_values) {
            return BrainResponse::error(request.request_id, message);
        }

        let hash = request.signature.content_hash();
        let compiled = {
            let mut cache = self.cache.lock().await;
            match cache.get(&hash) {
                Some(existing) => existing,
                None => {
                    let fresh = compile(&request.signature, &request.input_values, &self.model_preset);
                    cache.insert(hash, fresh.clone());
                    fresh
                }
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => BrainResponse::aborted(request.request_id, true),
            result = self.call_with_retries(&compiled, &request) => result,
        }
    }

    async fn call_with_retries(
        &self,
        compiled: &CompiledSignature,
        request: &BrainRequest,
    ) -> BrainResponse {
        let mut attempt = 0;
        loop {
            match self.provider.complete(&compiled.prompt, &self.model_preset).await {
                Ok(response) => {
                    let mut output_values = std::collections::BTreeMap::new();
                    for name in request.signature.outputs.keys() {
                        output_values.insert(name.clone(), serde_json::json!(response.text));
                    }
                    return BrainResponse {
                        request_id: request.request_id.clone(),
                        output_values,
                        aborted: false,
                        shutdown: false,
                        token_usage: TokenUsage {
                            prompt_tokens: response.prompt_tokens,
                            completion_tokens: response.completion_tokens,
                        },
                        error: None,
                    };
                }
                Err(err) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(attempt, error = %err, "brain provider call failed, retrying");
                    tokio::time::sleep(self.retry_base_delay * attempt).await;
                }
                Err(err) => {
                    return BrainResponse::error(request.request_id.clone(), err.to_string());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::signature::Signature;
    use crate::brain::{RequestContext, Stage};
    use crate::provider::ProviderResponse;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProvider {
        failures_remaining: AtomicU32,
    }

    #[async_trait]
    impl LlmProvider for FlakyProvider {
        async fn complete(&self, _prompt: &str, _model_preset: &str) -> anyhow::Result<ProviderResponse> {
            if self.failures_remaining.fetch_sub(1, Ordering::SeqCst) > 0 {
                anyhow::bail!("transient failure");
            }
            Ok(ProviderResponse {
                text: "42".to_string(),
                prompt_tokens: 10,
                completion_tokens: 2,
            })
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    fn sample_request() -> BrainRequest {
        let mut inputs = BTreeMap::new();
        inputs.insert("x".to_string(), "a number".to_string());
        let mut outputs = BTreeMap::new();
        outputs.insert("result".to_string(), "the answer".to_string());
        let mut input_values = BTreeMap::new();
        input_values.insert("x".to_string(), serde_json::json!(1));

        BrainRequest {
            request_id: "req-1".to_string(),
            signature: Signature {
                task: "add one".to_string(),
                inputs,
                outputs,
            },
            input_values,
            context: RequestContext {
                cycle: 1,
                stage: Stage::Decision,
                phase: "main".to_string(),
                token_budget: 500,
            },
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let provider = Arc::new(FlakyProvider {
            failures_remaining: AtomicU32::new(2),
        });
        let server = BrainServer::new(provider, 8, "default", 3, Duration::from_millis(1));
        let cancel = CancellationToken::new();

        let response = server.serve(sample_request(), &cancel).await;
        assert!(!response.aborted);
        assert!(response.error.is_none());
        assert_eq!(response.request_id, "req-1");
    }

    #[tokio::test]
    async fn cancelled_token_yields_aborted_shutdown() {
        let provider = Arc::new(FlakyProvider {
            failures_remaining: AtomicU32::new(0),
        });
        let server = BrainServer::new(provider, 8, "default", 3, Duration::from_millis(1));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let response = server.serve(sample_request(), &cancel).await;
        assert!(response.aborted);
        assert!(response.shutdown);
    }

    #[tokio::test]
    async fn missing_required_input_returns_error_not_panic() {
        let provider = Arc::new(FlakyProvider {
            failures_remaining: AtomicU32::new(0),
        });
        let server = BrainServer::new(provider, 8, "default", 3, Duration::from_millis(1));
        let cancel = CancellationToken::new();
        let mut request = sample_request();
        request.input_values.clear();

        let response = server.serve(request, &cancel).await;
        assert!(response.error.is_some());
    }
}
