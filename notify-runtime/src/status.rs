//! Optimistic-concurrency status updates and size-bounded error text
//! (spec.md §4.4).

use notify_core::error::StoreError;
use notify_core::metadata::ObjectKey;
use notify_core::model::{Attempt, AttemptStatus, NotificationRequest, NotificationStatus};
use notify_core::store::ObjectStore;
use tracing::warn;

const MAX_CONFLICT_RETRIES: u32 = 5;
const ELLIPSIS: &str = "...";

/// Truncate `text` to `max_bytes`, preserving a prefix and appending an
/// ellipsis marker when truncation occurs (spec.md §4.4).
pub fn truncate_error(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let keep = max_bytes.saturating_sub(ELLIPSIS.len());
    let mut end = keep.min(text.len());
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &text[..end], ELLIPSIS)
}

/// Fold the oldest attempts for one channel into a single `rolled_up` entry,
/// preserving `totalAttempts` accounting (spec.md §4.4, Open Question
/// resolved in the expanded spec: `Attempt { status: rolled_up,
/// attempt_index_within_channel: <folded count>, error: Some("<n> earlier
/// attempts summarized") }`).
pub fn roll_up(entries: Vec<Attempt>) -> Option<Attempt> {
    let folded = entries.len() as u32;
    let channel = entries.first()?.channel.clone();
    let timestamp = entries.last()?.timestamp;
    Some(Attempt {
        channel,
        timestamp,
        status: AttemptStatus::RolledUp,
        error: Some(format!("{folded} earlier attempts summarized")),
        attempt_index_within_channel: folded,
    })
}

/// Atomically commits a new status revision (spec.md §4.4).
pub struct StatusWriter<S> {
    store: S,
    status_error_max_bytes: usize,
}

impl<S: ObjectStore> StatusWriter<S> {
    pub fn new(store: S, status_error_max_bytes: usize) -> Self {
        Self {
            store,
            status_error_max_bytes,
        }
    }

    pub fn cap_error_text(&self, text: &str) -> String {
        truncate_error(text, self.status_error_max_bytes)
    }

    /// Write `status` for `key`, retrying on conflict by re-fetching and
    /// letting `reapply` recompute the status against the fresh base
    /// (spec.md §4.4 "On conflict: re-fetch, re-apply ... retry up to a
    /// bounded number of times").
    pub async fn commit(
        &self,
        key: &ObjectKey,
        expected_resource_version: String,
        status: NotificationStatus,
        mut reapply: impl FnMut(&NotificationRequest) -> NotificationStatus,
    ) -> Result<NotificationRequest, StoreError> {
        let mut rv = expected_resource_version;
        let mut next_status = status;
        for attempt in 0..MAX_CONFLICT_RETRIES {
            match self.store.update_status(key, &rv, next_status.clone()).await {
                Ok(updated) => return Ok(updated),
                Err(StoreError::Conflict(_)) => {
                    warn!(%key, attempt, "status write conflict, refetching");
                    let current = self.store.get(key).await.ok_or_else(|| StoreError::NotFound(key.clone()))?;
                    rv = current.metadata.resource_version.clone();
                    next_status = reapply(&current);
                }
                Err(other) => return Err(other),
            }
        }
        Err(StoreError::Conflict(key.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_leaves_short_text_untouched() {
        assert_eq!(truncate_error("short", 1024), "short");
    }

    #[test]
    fn truncate_adds_ellipsis_when_over_cap() {
        let text = "a".repeat(50);
        let truncated = truncate_error(&text, 10);
        assert_eq!(truncated.len(), 10);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn roll_up_preserves_attempt_count() {
        use chrono::Utc;
        use notify_core::model::ChannelKind;
        let entries = vec![
            Attempt {
                channel: ChannelKind::Slack,
                timestamp: Utc::now(),
                status: AttemptStatus::FailedTransient,
                error: Some("503".into()),
                attempt_index_within_channel: 1,
            },
            Attempt {
                channel: ChannelKind::Slack,
                timestamp: Utc::now(),
                status: AttemptStatus::FailedTransient,
                error: Some("503".into()),
                attempt_index_within_channel: 2,
            },
        ];
        let rolled = roll_up(entries).unwrap();
        assert_eq!(rolled.attempt_index_within_channel, 2);
        assert!(matches!(rolled.status, AttemptStatus::RolledUp));
    }
}
