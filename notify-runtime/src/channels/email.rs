//! Email deliverer with an injectable transport, mirroring the shape of
//! `SlackDeliverer` (grounded in the provider structure of
//! `other_examples/.../email-notification-provider/provider.rs`, minus its
//! real SMTP/API client).

use async_trait::async_trait;

use super::{ChannelDeliverer, DeliveryContext, DeliveryError, SanitizedMessage};

#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), DeliveryError>;
}

pub struct EmailDeliverer {
    transport: Box<dyn EmailTransport>,
}

impl EmailDeliverer {
    pub fn new(transport: Box<dyn EmailTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl ChannelDeliverer for EmailDeliverer {
    async fn deliver(
        &self,
        ctx: &DeliveryContext,
        message: &SanitizedMessage,
    ) -> Result<(), DeliveryError> {
        let to = ctx
            .recipient
            .as_deref()
            .ok_or_else(|| DeliveryError::MalformedRecipient("missing email address".into()))?;
        if !to.contains('@') {
            return Err(DeliveryError::MalformedRecipient(format!("{to:?} is not an email address")));
        }
        self.transport.send(to, &message.subject, &message.body).await
    }
}
