//! Slack-style webhook deliverer.
//!
//! The actual HTTP transport is injectable (grounded in the
//! retry-decorator pattern over a swappable provider in
//! `other_examples/.../providers/retry.rs`) so tests substitute a
//! deterministic fake instead of speaking real HTTP — the wire format
//! itself is out of scope (spec.md §1).

use async_trait::async_trait;

use super::{ChannelDeliverer, DeliveryContext, DeliveryError, SanitizedMessage};

/// What a webhook POST would actually need to do; swappable for tests.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn post(&self, url: &str, payload: &str) -> Result<(), DeliveryError>;
}

pub struct SlackDeliverer {
    transport: Box<dyn WebhookTransport>,
}

impl SlackDeliverer {
    pub fn new(transport: Box<dyn WebhookTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl ChannelDeliverer for SlackDeliverer {
    async fn deliver(
        &self,
        ctx: &DeliveryContext,
        message: &SanitizedMessage,
    ) -> Result<(), DeliveryError> {
        let url = ctx
            .recipient
            .as_deref()
            .ok_or_else(|| DeliveryError::MalformedRecipient("missing webhook url".into()))?;
        let payload = format!("{{\"text\":\"{}: {}\"}}", message.subject, message.body);
        self.transport.post(url, &payload).await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    pub struct FixedStatusTransport {
        pub status: u16,
        pub calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl WebhookTransport for FixedStatusTransport {
        async fn post(&self, _url: &str, _payload: &str) -> Result<(), DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.status == 200 {
                Ok(())
            } else {
                Err(DeliveryError::Http(self.status))
            }
        }
    }
}
