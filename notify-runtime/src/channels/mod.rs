//! The `ChannelDeliverer` contract (spec.md §6) and the mutable runtime
//! registry mapping channel kinds to deliverers (spec.md §4.2
//! "Registration"), modeled on `Controller::owns`/`watches` builder-style
//! registration in the teacher.

pub mod console;
pub mod email;
pub mod file;
pub mod log;
pub mod slack;

use async_trait::async_trait;
use notify_core::model::{ChannelKind, NotificationRequest};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use console::ConsoleDeliverer;
pub use email::EmailDeliverer;
pub use file::FileDeliverer;
pub use log::LogDeliverer;
pub use slack::SlackDeliverer;

/// Errors a deliverer can raise; carries enough information for
/// classification by `crate::retry::classify` (spec.md §6).
#[derive(Debug, Clone)]
pub enum DeliveryError {
    Http(u16),
    Connection(String),
    Timeout,
    MalformedRecipient(String),
    NoDeliverer,
    BreakerOpen(String),
    SanitizationFailed,
    Other(String),
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::Http(code) => write!(f, "http status {code}"),
            DeliveryError::Connection(msg) => write!(f, "connection error: {msg}"),
            DeliveryError::Timeout => write!(f, "timed out"),
            DeliveryError::MalformedRecipient(msg) => write!(f, "malformed recipient: {msg}"),
            DeliveryError::NoDeliverer => write!(f, "no_deliverer"),
            DeliveryError::BreakerOpen(msg) => f.write_str(msg),
            DeliveryError::SanitizationFailed => write!(f, "sanitization failed"),
            DeliveryError::Other(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// Per-attempt context carried into a deliverer call: the sanitized message
/// is constructed by the orchestrator, not here; this carries only the
/// cross-cutting concerns (spec.md §5 "Suspension points").
#[derive(Debug, Clone)]
pub struct DeliveryContext {
    pub timeout: Duration,
    pub recipient: Option<String>,
}

/// A sanitized copy of the message a deliverer actually sends (spec.md §2
/// step 6: "sanitized text is what channels and the audit sink observe").
#[derive(Debug, Clone)]
pub struct SanitizedMessage {
    pub subject: String,
    pub body: String,
}

/// `Deliver(ctx, request) -> error` (spec.md §6). Deliverers are
/// individually safe to call concurrently; the orchestrator never calls the
/// same deliverer twice for the same request in the same fan-out.
#[async_trait]
pub trait ChannelDeliverer: Send + Sync {
    async fn deliver(
        &self,
        ctx: &DeliveryContext,
        message: &SanitizedMessage,
    ) -> Result<(), DeliveryError>;
}

/// Concurrent-safe channel -> deliverer mapping (spec.md §4.2
/// "Registration", §5 "channel registry: read-mostly, occasional writes").
#[derive(Clone, Default)]
pub struct DelivererRegistry {
    deliverers: Arc<RwLock<HashMap<ChannelKind, Arc<dyn ChannelDeliverer>>>>,
}

impl DelivererRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, channel: ChannelKind, deliverer: Arc<dyn ChannelDeliverer>) {
        self.deliverers.write().insert(channel, deliverer);
    }

    /// A no-op if `channel` was never registered (spec.md §4.2).
    pub fn unregister(&self, channel: &ChannelKind) {
        self.deliverers.write().remove(channel);
    }

    pub fn get(&self, channel: &ChannelKind) -> Option<Arc<dyn ChannelDeliverer>> {
        self.deliverers.read().get(channel).cloned()
    }
}

/// Builds the sanitized view of a request's payload once per attempt
/// (spec.md §2 step 6), reused by every channel in the fan-out.
pub fn sanitize_message(request: &NotificationRequest) -> SanitizedMessage {
    SanitizedMessage {
        subject: crate::sanitizer::sanitize(&request.spec.subject),
        body: crate::sanitizer::sanitize(&request.spec.body),
    }
}
