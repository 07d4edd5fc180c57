//! Outbound message delivery to the parent frame.

use tokio::sync::mpsc;
use tracing::{debug, trace};

use xenote_core::error::{Result, XenoteError};
use xenote_core::protocol::{ANY_ORIGIN, Message};

/// Posts messages to the parent frame.
///
/// Posting only enqueues the message; delivery order is the order of calls.
pub trait Transport: Send + Sync + 'static {
    /// Post `message`, restricted to a receiver whose origin is `target_origin`
    /// (or anyone, for `"*"`).
    fn post_message(&self, message: &Message, target_origin: &str) -> Result<()>;
}

/// Receiver for outbound messages (the parent's side of a [`ChannelTransport`]).
pub type OutboundReceiver = mpsc::UnboundedReceiver<Message>;

/// Sender for inbound messages (used by whatever feeds the bridge).
pub type InboundSender = mpsc::UnboundedSender<Message>;

/// Receiver for inbound messages, handed to [`crate::MessageBridge::listen`].
pub type InboundReceiver = mpsc::UnboundedReceiver<Message>;

/// An in-process parent frame reachable through a channel.
///
/// A message whose target origin is neither `"*"` nor the parent's origin is
/// dropped without an error, as a browser drops it.
pub struct ChannelTransport {
    parent_origin: String,
    tx: mpsc::UnboundedSender<Message>,
}

impl ChannelTransport {
    /// Create a transport to a parent living at `parent_origin`.
    pub fn new(parent_origin: impl Into<String>) -> (Self, OutboundReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                parent_origin: parent_origin.into(),
                tx,
            },
            rx,
        )
    }
}

impl Transport for ChannelTransport {
    fn post_message(&self, message: &Message, target_origin: &str) -> Result<()> {
        if target_origin != ANY_ORIGIN && target_origin != self.parent_origin {
            debug!(
                topic = %message.topic,
                target_origin,
                parent_origin = %self.parent_origin,
                "Dropping message for another origin"
            );
            return Ok(());
        }
        self.tx
            .send(message.clone())
            .map_err(|_| XenoteError::Transport("parent frame is gone".into()))?;
        trace!(topic = %message.topic, "Posted message");
        Ok(())
    }
}

/// Create the inbound side of a channel-backed bridge.
pub fn inbound_channel() -> (InboundSender, InboundReceiver) {
    mpsc::unbounded_channel()
}
