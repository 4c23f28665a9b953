/// Presence tracking: the set of currently active peers
use crate::messenger_types::PresenceEntry;
use crate::realtime::protocol::OutboundEvent;
use crate::session::ChannelHandle;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct PresenceSet {
    users: BTreeMap<String, PresenceEntry>,
    stale: bool,
}

/// Active peers, rebuilt wholesale from every snapshot
#[derive(Clone)]
pub struct PresenceTracker {
    local_id: String,
    inner: Arc<RwLock<PresenceSet>>,
}

impl PresenceTracker {
    pub fn new(local_id: impl Into<String>) -> Self {
        Self {
            local_id: local_id.into(),
            inner: Arc::new(RwLock::new(PresenceSet::default())),
        }
    }

    /// Replace the tracked set with `entries`, minus the local identity.
    ///
    /// Returns the new set.
    pub async fn on_snapshot(&self, entries: Vec<PresenceEntry>) -> Vec<PresenceEntry> {
        let users: BTreeMap<String, PresenceEntry> = entries
            .into_iter()
            .filter(|entry| entry.user_id != self.local_id)
            .map(|entry| (entry.user_id.clone(), entry))
            .collect();

        let mut set = self.inner.write().await;
        set.users = users;
        set.stale = false;
        debug!("Presence snapshot: {} active peers", set.users.len());
        set.users.values().cloned().collect()
    }

    /// Ask the server for a fresh snapshot. The answer arrives later as an
    /// `activeUsers` event. A disconnected channel makes this a no-op.
    pub async fn request_snapshot(&self, channel: &ChannelHandle) -> bool {
        channel.emit(OutboundEvent::GetActiveUsers).await
    }

    pub async fn active_users(&self) -> Vec<PresenceEntry> {
        self.inner.read().await.users.values().cloned().collect()
    }

    pub async fn is_active(&self, user_id: &str) -> bool {
        self.inner.read().await.users.contains_key(user_id)
    }

    /// Keep the last snapshot but flag it as possibly outdated
    pub async fn mark_stale(&self) {
        self.inner.write().await.stale = true;
    }

    pub async fn is_stale(&self) -> bool {
        self.inner.read().await.stale
    }

    pub async fn clear(&self) {
        let mut set = self.inner.write().await;
        set.users.clear();
        set.stale = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, name: &str) -> PresenceEntry {
        PresenceEntry {
            user_id: id.to_string(),
            username: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_snapshot_excludes_local_identity() {
        let tracker = PresenceTracker::new("u1");
        let users = tracker
            .on_snapshot(vec![entry("u1", "alice"), entry("u2", "bob")])
            .await;
        assert_eq!(users, vec![entry("u2", "bob")]);
        assert!(!tracker.is_active("u1").await);
    }

    #[tokio::test]
    async fn test_snapshot_replaces_instead_of_merging() {
        let tracker = PresenceTracker::new("u1");
        tracker
            .on_snapshot(vec![entry("u2", "bob"), entry("u3", "carol")])
            .await;
        tracker.on_snapshot(vec![entry("u4", "dave")]).await;

        assert_eq!(tracker.active_users().await, vec![entry("u4", "dave")]);

        tracker.on_snapshot(Vec::new()).await;
        assert!(tracker.active_users().await.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_entries_collapse_by_user_id() {
        let tracker = PresenceTracker::new("u1");
        tracker
            .on_snapshot(vec![entry("u2", "bob"), entry("u2", "bobby")])
            .await;
        assert_eq!(tracker.active_users().await, vec![entry("u2", "bobby")]);
    }

    #[tokio::test]
    async fn test_stale_flag_cleared_by_next_snapshot() {
        let tracker = PresenceTracker::new("u1");
        tracker.on_snapshot(vec![entry("u2", "bob")]).await;
        tracker.mark_stale().await;
        assert!(tracker.is_stale().await);
        assert_eq!(tracker.active_users().await.len(), 1);

        tracker.on_snapshot(vec![entry("u3", "carol")]).await;
        assert!(!tracker.is_stale().await);
        assert_eq!(tracker.active_users().await, vec![entry("u3", "carol")]);
    }
}
