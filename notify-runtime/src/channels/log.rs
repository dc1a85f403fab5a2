//! Emits the sanitized message as a structured `tracing` event.

use async_trait::async_trait;
use tracing::info;

use super::{ChannelDeliverer, DeliveryContext, DeliveryError, SanitizedMessage};

#[derive(Debug, Default)]
pub struct LogDeliverer;

#[async_trait]
impl ChannelDeliverer for LogDeliverer {
    async fn deliver(
        &self,
        _ctx: &DeliveryContext,
        message: &SanitizedMessage,
    ) -> Result<(), DeliveryError> {
        info!(subject = %message.subject, body = %message.body, "delivered to log channel");
        Ok(())
    }
}
