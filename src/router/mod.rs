// Message Router (spec §4.3): scans every cyber's `outbox/`, atomically
// delivers each message into its recipient's `inbox/`, and expands
// `broadcast` messages into one file per recipient before routing. Grounded
// on `message::Message` (wire format) and `fsutil::atomic_rename`
// (rename-as-delivery, the same primitive `task::CommunityTaskStore` uses
// for rename-as-claim).

pub mod backoff;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::events::{EventBus, EventKind};
use crate::fsutil;
use crate::message::{Message, MessageType};
use crate::metrics::Metrics;
use backoff::Backoff;

const BROADCAST_RECIPIENT: &str = "broadcast";

pub struct MessageRouter {
    workspace_root: PathBuf,
    backoff: Backoff,
    events: Arc<EventBus>,
    metrics: Arc<Metrics>,
}

impl MessageRouter {
    pub fn new(workspace_root: PathBuf, backoff: Backoff, events: Arc<EventBus>, metrics: Arc<Metrics>) -> Self {
        Self {
            workspace_root,
            backoff,
            events,
            metrics,
        }
    }

    fn cybers_dir(&self) -> PathBuf {
        self.workspace_root.join("cybers")
    }

    fn cyber_inbox(&self, name: &str) -> PathBuf {
        self.cybers_dir().join(name).join("inbox")
    }

    fn cyber_outbox(&self, name: &str) -> PathBuf {
        self.cybers_dir().join(name).join("outbox")
    }

    fn cyber_exists(&self, name: &str) -> bool {
        self.cybers_dir().join(name).is_dir()
    }

    fn known_cybers(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.cybers_dir()) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect()
    }

    /// One scan-and-deliver pass over every cyber's outbox. Returns the
    /// number of messages successfully delivered.
    pub async fn route_once(&self) -> Result<usize> {
        let mut delivered = 0;
        for sender in self.known_cybers() {
            delivered += self.route_outbox(&sender).await?;
        }
        Ok(delivered)
    }

    async fn route_outbox(&self, sender: &str) -> Result<usize> {
        let outbox = self.cyber_outbox(sender);
        if !outbox.is_dir() {
            return Ok(0);
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(&outbox)
            .with_context(|| format!("failed to read outbox {}", outbox.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        // FIFO per (sender, recipient) pair: process in write order.
        files.sort_by_key(|p| std::fs::metadata(p).and_then(|m| m.modified()).ok());

        let mut delivered = 0;
        for file in files {
            let message = match Message::read_from(&file) {
                Ok(message) => message,
                Err(err) => {
                    warn!(path = %file.display(), error = %err, "unreadable outbox message, skipping");
                    continue;
                }
            };

            if message.to == BROADCAST_RECIPIENT {
                self.expand_broadcast(sender, &message, &file, &outbox)?;
                continue;
            }

            if self.deliver(sender, &message, &file).await? {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// Expand a broadcast message into one per-recipient file in the same
    /// outbox, then remove the original (spec §4.3 "expands to one file per
    /// recipient before routing").
    fn expand_broadcast(&self, sender: &str, message: &Message, original: &Path, outbox: &Path) -> Result<()> {
        for recipient in self.known_cybers() {
            if recipient == sender {
                continue;
            }
            let mut expanded = message.clone();
            expanded.to = recipient;
            expanded.id = Message::generate_id();
            expanded.write_to(outbox)?;
        }
        std::fs::remove_file(original)
            .with_context(|| format!("failed to remove expanded broadcast {}", original.display()))?;
        Ok(())
    }

    /// Deliver one message, retrying the move with backoff on transient
    /// failure and falling back to a recorded permanent failure after
    /// `max_attempts` (spec §4.3 failure model).
    async fn deliver(&self, sender: &str, message: &Message, file: &Path) -> Result<bool> {
        if !self.cyber_exists(&message.to) {
            self.bounce(sender, message)?;
            std::fs::remove_file(file).ok();
            return Ok(false);
        }

        let inbox = self.cyber_inbox(&message.to);
        let dest = inbox.join(message.file_name());

        let mut attempt = 0;
        loop {
            attempt += 1;
            match fsutil::atomic_rename(file, &dest) {
                Ok(()) => {
                    self.metrics
                        .router_delivered_total
                        .with_label_values(&[sender, &message.to])
                        .inc();
                    self.events.publish(EventKind::MessageSent {
                        from: sender.to_string(),
                        to: message.to.clone(),
                        subject: message.subject.clone(),
                    });
                    return Ok(true);
                }
                Err(err) if attempt < self.backoff.max_attempts() => {
                    warn!(
                        from = sender,
                        to = %message.to,
                        attempt,
                        error = %err,
                        "delivery move failed, retrying"
                    );
                    tokio::time::sleep(self.backoff.delay_for(attempt)).await;
                }
                Err(err) => {
                    warn!(from = sender, to = %message.to, error = %err, "delivery permanently failed");
                    self.metrics
                        .router_failed_total
                        .with_label_values(&[sender, &message.to])
                        .inc();
                    self.quarantine(sender, file)?;
                    return Ok(false);
                }
            }
        }
    }

    /// A message addressed to a cyber that doesn't exist gets a
    /// `delivery_failed` reply written straight to the sender's inbox.
    fn bounce(&self, sender: &str, message: &Message) -> Result<()> {
        let reply = Message::new(
            MessageType::Message,
            "router",
            sender,
            "delivery_failed",
            format!("recipient '{}' does not exist", message.to),
        );
        reply.write_to(&self.cyber_inbox(sender))?;
        info!(from = sender, to = %message.to, "bounced message to nonexistent recipient");
        Ok(())
    }

    /// Move a message that exhausted its retries into
    /// `outbox/sent/failed/` so the sender can see what didn't go out
    /// (spec §4.3).
    fn quarantine(&self, sender: &str, file: &Path) -> Result<()> {
        let failed_dir = self.cyber_outbox(sender).join("sent").join("failed");
        let file_name = file
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("message file has no name: {}", file.display()))?;
        let dest = failed_dir.join(file_name);
        std::fs::create_dir_all(&failed_dir)?;
        fsutil::atomic_rename(file, &dest)
    }
}
