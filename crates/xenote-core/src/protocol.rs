//! Frame bridge wire protocol.
//!
//! Every message exchanged with the parent frame is a topic-tagged envelope
//! `{ "topic": "...", "data": ... }`. There is no request id or sequence
//! number: responses are matched to requests by topic alone and ordering
//! relies on the transport delivering messages in order.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, XenoteError};

/// A message envelope exchanged with the parent frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Message {
    /// A message with no payload.
    pub fn new(topic: Topic) -> Self {
        Self {
            topic: topic.as_str().to_string(),
            data: None,
        }
    }

    /// A message carrying a payload.
    pub fn with_data(topic: Topic, data: serde_json::Value) -> Self {
        Self {
            topic: topic.as_str().to_string(),
            data: Some(data),
        }
    }

    /// The known topic of this message, if any.
    pub fn known_topic(&self) -> Option<Topic> {
        Topic::parse(&self.topic)
    }
}

/// The fixed topic vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Bridge -> parent: request the initial document.
    RequestLoad,
    /// Parent -> bridge: the requested document.
    LoadData,
    /// Parent -> bridge: the document could not be loaded.
    LoadError,
    /// Parent -> bridge: the parent wants the current document.
    RequestSave,
    /// Bridge -> parent: the current document, for persistence.
    SaveData,
    /// Bridge -> parent: the current flow was aborted.
    Cancel,
    /// Bridge -> parent: a document snapshot is available for the first time.
    Staged,
}

impl Topic {
    pub const ALL: [Topic; 7] = [
        Topic::RequestLoad,
        Topic::LoadData,
        Topic::LoadError,
        Topic::RequestSave,
        Topic::SaveData,
        Topic::Cancel,
        Topic::Staged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::RequestLoad => "req loaddata",
            Topic::LoadData => "res loaddata",
            Topic::LoadError => "res load error",
            Topic::RequestSave => "req savedata",
            Topic::SaveData => "res savedata",
            Topic::Cancel => "req cancel",
            Topic::Staged => "staged",
        }
    }

    pub fn parse(topic: &str) -> Option<Topic> {
        Self::ALL.into_iter().find(|t| t.as_str() == topic)
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wildcard target origin: deliver regardless of the receiver's origin.
pub const ANY_ORIGIN: &str = "*";

/// Derive the target origin for outbound messages from a referrer URL.
///
/// The referrer is the URL of the embedding document; only its scheme, host
/// and port are kept. A referrer of [`ANY_ORIGIN`] is passed through for
/// parents that are trusted regardless of origin. Empty referrers and URLs
/// with opaque origins (`data:`, `file:`) are rejected.
pub fn target_origin(referrer: &str) -> Result<String> {
    if referrer == ANY_ORIGIN {
        return Ok(ANY_ORIGIN.to_string());
    }
    if referrer.is_empty() {
        return Err(XenoteError::Transport("no referrer to derive a target origin from".into()));
    }
    let url = Url::parse(referrer)
        .map_err(|e| XenoteError::Transport(format!("invalid referrer {referrer:?}: {e}")))?;
    let origin = url.origin();
    if !origin.is_tuple() {
        return Err(XenoteError::Transport(format!(
            "referrer {referrer:?} has an opaque origin"
        )));
    }
    Ok(origin.ascii_serialization())
}
