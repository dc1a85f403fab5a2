//! Appends one line per attempt to a configured path.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

use super::{ChannelDeliverer, DeliveryContext, DeliveryError, SanitizedMessage};

pub struct FileDeliverer {
    path: PathBuf,
}

impl FileDeliverer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ChannelDeliverer for FileDeliverer {
    async fn deliver(
        &self,
        _ctx: &DeliveryContext,
        message: &SanitizedMessage,
    ) -> Result<(), DeliveryError> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| DeliveryError::Other(format!("opening {}: {e}", self.path.display())))?;
        let line = format!("{}: {}\n", message.subject, message.body);
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| DeliveryError::Other(format!("writing {}: {e}", self.path.display())))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn appends_a_line_per_delivery() {
        let dir = std::env::temp_dir().join(format!("notify-file-test-{:?}", std::thread::current().id()));
        let path = dir.with_extension("log");
        let _ = tokio::fs::remove_file(&path).await;

        let deliverer = FileDeliverer::new(path.clone());
        let ctx = DeliveryContext {
            timeout: Duration::from_secs(1),
            recipient: None,
        };
        let message = SanitizedMessage {
            subject: "subject".into(),
            body: "body".into(),
        };
        deliverer.deliver(&ctx, &message).await.unwrap();
        deliverer.deliver(&ctx, &message).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
        let _ = tokio::fs::remove_file(&path).await;
    }
}
