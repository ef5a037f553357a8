// Body-File Bridge (spec §4.2): outside the sandbox, drains each cyber's
// `brain`/`network`/`user_io` special-file directories in FIFO order with
// a bounded in-flight window, dispatching to the Brain Protocol Server or
// the network channel, and writing responses back. Cancellation marks
// in-flight requests `aborted=true`.

pub mod network_channel;
pub mod request;
pub mod user_io_channel;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::brain::{BrainRequest, BrainResponse, BrainServer};
use network_channel::{NetworkChannel, NetworkRequest};
use request::FileRequestChannel;

pub struct BodyFileBridge {
    cyber_name: String,
    brain_channel: FileRequestChannel,
    network_channel_files: Option<FileRequestChannel>,
    network: NetworkChannel,
    brain_server: Arc<BrainServer>,
    /// Bounds the number of requests processed concurrently per special
    /// file (spec §4.2 "bounded in-flight window (default 1)").
    in_flight: Arc<Semaphore>,
    poll_interval: Duration,
}

impl BodyFileBridge {
    pub fn new(
        cyber_name: String,
        workspace_root: &std::path::Path,
        brain_server: Arc<BrainServer>,
        io_capable: bool,
        in_flight_window: usize,
        poll_interval: Duration,
    ) -> Self {
        let brain_dir = request::directory_for(workspace_root, "brain");
        let network_channel_files =
            io_capable.then(|| FileRequestChannel::new(request::directory_for(workspace_root, "network")));

        Self {
            cyber_name,
            brain_channel: FileRequestChannel::new(brain_dir),
            network_channel_files,
            network: NetworkChannel::new(),
            brain_server,
            in_flight: Arc::new(Semaphore::new(in_flight_window.max(1))),
            poll_interval,
        }
    }

    /// Drain any pending requests across the special files once. Intended
    /// to be called in a loop by the host's bridge task, one iteration per
    /// tick, rather than blocking forever — the bridge serves many cybers.
    #[instrument(skip(self, cancel), fields(cyber = %self.cyber_name))]
    pub async fn drain_once(&self, cancel: &CancellationToken) {
        self.drain_brain(cancel).await;
        if self.network_channel_files.is_some() {
            self.drain_network().await;
        }
    }

    async fn drain_brain(&self, cancel: &CancellationToken) {
        for request_id in self.brain_channel.pending_request_ids() {
            let Ok(permit) = self.in_flight.clone().acquire_owned().await else {
                continue;
            };
            let Some(request) = self
                .brain_channel
                .take_request::<BrainRequest>(&request_id)
                .unwrap_or(None)
            else {
                continue;
            };

            let response = if cancel.is_cancelled() {
                BrainResponse::aborted(request.request_id.clone(), true)
            } else {
                self.brain_server.serve(request, cancel).await
            };

            if let Err(err) = self.brain_channel.write_response(&request_id, &response) {
                warn!(error = %err, "failed to write brain response");
            }
            drop(permit);
        }
    }

    async fn drain_network(&self) {
        let Some(channel) = &self.network_channel_files else {
            return;
        };
        for request_id in channel.pending_request_ids() {
            let Ok(permit) = self.in_flight.clone().acquire_owned().await else {
                continue;
            };
            let Some(request) = channel.take_request::<NetworkRequest>(&request_id).unwrap_or(None) else {
                continue;
            };
            let response = self.network.perform(&request).await;
            if let Err(err) = channel.write_response(&request_id, &response) {
                warn!(error = %err, "failed to write network response");
            }
            drop(permit);
        }
    }

    /// Run the drain loop until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(cyber = %self.cyber_name, "bridge started");
        loop {
            self.drain_once(&cancel).await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        info!(cyber = %self.cyber_name, "bridge stopped");
    }
}

pub fn brain_request_dir(workspace_root: &std::path::Path) -> PathBuf {
    request::directory_for(workspace_root, "brain")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::signature::Signature;
    use crate::brain::{RequestContext, Stage};
    use crate::provider::ProviderResponse;
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    struct StubProvider;

    #[async_trait]
    impl crate::provider::LlmProvider for StubProvider {
        async fn complete(&self, _prompt: &str, _model_preset: &str) -> anyhow::Result<ProviderResponse> {
            Ok(ProviderResponse {
                text: "4".to_string(),
                prompt_tokens: 5,
                completion_tokens: 1,
            })
        }
        fn name(&self) -> &str {
            "stub"
        }
    }

    fn sample_request(request_id: &str) -> BrainRequest {
        let mut inputs = BTreeMap::new();
        inputs.insert("x".to_string(), "a number".to_string());
        let mut outputs = BTreeMap::new();
        outputs.insert("result".to_string(), "the answer".to_string());
        let mut input_values = BTreeMap::new();
        input_values.insert("x".to_string(), serde_json::json!(2));

        BrainRequest {
            request_id: request_id.to_string(),
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
                token_budget: 200,
            },
        }
    }

    #[tokio::test]
    async fn drains_pending_brain_request_into_response() {
        let dir = tempfile::tempdir().unwrap();
        let brain_server = Arc::new(BrainServer::new(
            Arc::new(StubProvider),
            8,
            "default",
            1,
            Duration::from_millis(1),
        ));
        let bridge = BodyFileBridge::new(
            "alice".to_string(),
            dir.path(),
            brain_server,
            false,
            1,
            Duration::from_millis(5),
        );

        let brain_dir = brain_request_dir(dir.path());
        std::fs::create_dir_all(&brain_dir).unwrap();
        let channel = FileRequestChannel::new(brain_dir);
        channel.write_request("r1", &sample_request("r1")).unwrap();

        let cancel = CancellationToken::new();
        bridge.drain_once(&cancel).await;

        let response: BrainResponse = channel
            .await_response("r1", &cancel, Duration::from_millis(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.request_id, "r1");
        assert!(!response.aborted);
    }
}
