// Message envelope (spec §3 "Message (RFC2822-style)", §6 wire format).
//
// One JSON file per message; the file name is the message's identifier.
// Modeled as a plain serde struct, the way the teacher models its own
// conversation messages in `cli/messages/concrete.rs`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

use crate::fsutil;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    Command,
    Query,
    Response,
    Message,
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    pub body: String,

    /// Not part of the wire format; set when a message is loaded from disk
    /// so callers can identify it without re-deriving the file name.
    #[serde(skip)]
    pub id: String,
}

impl Message {
    pub fn new(
        message_type: MessageType,
        from: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            message_type,
            from: from.into(),
            to: to.into(),
            subject: subject.into(),
            timestamp: Utc::now(),
            in_reply_to: None,
            metadata: None,
            body: body.into(),
            id: Self::generate_id(),
        }
    }

    pub fn reply_to(&self, from: impl Into<String>, body: impl Into<String>) -> Self {
        let mut reply = Message::new(
            MessageType::Response,
            from,
            self.from.clone(),
            format!("Re: {}", self.subject),
            body,
        );
        reply.in_reply_to = Some(self.id.clone());
        reply
    }

    pub fn generate_id() -> String {
        format!("{}.msg", Uuid::new_v4())
    }

    /// File name this message should be stored under. The message id *is*
    /// the file name (spec §3 invariant).
    pub fn file_name(&self) -> String {
        if self.id.ends_with(".msg.json") {
            self.id.clone()
        } else if self.id.ends_with(".msg") {
            format!("{}.json", self.id)
        } else {
            format!("{}.msg.json", self.id)
        }
    }

    pub fn write_to(&self, dir: &Path) -> anyhow::Result<std::path::PathBuf> {
        let path = dir.join(self.file_name());
        let json = serde_json::to_vec_pretty(self)?;
        fsutil::atomic_write(&path, &json)?;
        Ok(path)
    }

    pub fn read_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut message: Message = serde_json::from_str(&contents)?;
        message.id = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(message)
    }
}
