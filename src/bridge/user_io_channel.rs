// `user_io` special file handler (spec §4.2): brokers two-way messages
// between an I/O-capable cyber and an external operator session. The
// operator-facing transport (terminal UI, remote session, etc.) is out of
// scope; this just defines the envelope and a broadcast point any such
// transport can subscribe to.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserIoRequest {
    pub request_id: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserIoResponse {
    pub request_id: String,
    pub reply: String,
}

pub struct UserIoChannel {
    outbound: broadcast::Sender<UserIoRequest>,
}

impl UserIoChannel {
    pub fn new() -> Self {
        let (outbound, _) = broadcast::channel(64);
        Self { outbound }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UserIoRequest> {
        self.outbound.subscribe()
    }

    /// Publish a prompt to any subscribed operator session. Not an error if
    /// nothing is listening — an operator session attaching is optional.
    pub fn publish(&self, request: UserIoRequest) {
        let _ = self.outbound.send(request);
    }
}

impl Default for UserIoChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_request() {
        let channel = UserIoChannel::new();
        let mut receiver = channel.subscribe();
        channel.publish(UserIoRequest {
            request_id: "r1".to_string(),
            prompt: "continue?".to_string(),
        });
        let received = receiver.recv().await.unwrap();
        assert_eq!(received.request_id, "r1");
    }
}
