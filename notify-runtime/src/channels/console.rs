//! Prints the sanitized message to stdout. The simplest reference
//! deliverer; transport format is explicitly not a correctness surface
//! (spec.md §1).

use async_trait::async_trait;

use super::{ChannelDeliverer, DeliveryContext, DeliveryError, SanitizedMessage};

#[derive(Debug, Default)]
pub struct ConsoleDeliverer;

#[async_trait]
impl ChannelDeliverer for ConsoleDeliverer {
    async fn deliver(
        &self,
        _ctx: &DeliveryContext,
        message: &SanitizedMessage,
    ) -> Result<(), DeliveryError> {
        println!("[console] {}: {}", message.subject, message.body);
        Ok(())
    }
}
