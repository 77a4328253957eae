use serde::{Deserialize, Serialize};

/// Event kind carrying one replaceable public order
pub const ORDER_EVENT_KIND: u32 = 38383;

/// A signed event exactly as relayed (signature is not verified here)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: String,
    pub pubkey: String,
    pub created_at: i64,
    pub kind: u32,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sig: String,
}

impl RawEvent {
    /// Values following the first tag named `name`.
    pub fn tag(&self, name: &str) -> Option<&[String]> {
        self.tags
            .iter()
            .find(|tag| tag.first().map(String::as_str) == Some(name))
            .map(|tag| &tag[1..])
    }

    /// First value of the tag named `name`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tag(name)?.first().map(String::as_str)
    }
}

/// Subscription filter for the public book
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookFilter {
    pub kinds: Vec<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
}

impl BookFilter {
    pub fn orders(authors: Vec<String>, since: Option<i64>) -> Self {
        Self {
            kinds: vec![ORDER_EVENT_KIND],
            authors,
            since,
        }
    }
}

/// Notification delivered by a relay subscription
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    Event { relay: String, event: RawEvent },
    /// The relay has delivered its stored backlog
    EndOfStream { relay: String },
    /// The relay dropped or refused the subscription
    Failed { relay: String, reason: String },
}

impl RelayMessage {
    pub fn relay(&self) -> &str {
        match self {
            RelayMessage::Event { relay, .. }
            | RelayMessage::EndOfStream { relay }
            | RelayMessage::Failed { relay, .. } => relay,
        }
    }
}
