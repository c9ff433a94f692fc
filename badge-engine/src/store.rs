//! Progress store abstraction.
//!
//! The store is the only synchronization point between workers; it is
//! assumed last-write-wins per row. `InMemoryProgressStore` backs tests and
//! the replay tool.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

use badge_core::{normalize_address, BadgeId, ProgressKey, UserProgress};

use crate::error::StoreError;

/// Persistence of per-(user, badge) progress rows.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Fetch a single row.
    async fn get_one(
        &self,
        badge_id: BadgeId,
        user_address: &str,
    ) -> Result<Option<UserProgress>, StoreError>;

    /// Fetch every row matching any badge and any user, in one roundtrip.
    async fn get_many(
        &self,
        badge_ids: &[BadgeId],
        user_addresses: &[String],
    ) -> Result<Vec<UserProgress>, StoreError>;

    /// Upsert a row.
    async fn save(&self, progress: &UserProgress) -> Result<(), StoreError>;

    /// Remove a row, restoring it to absent.
    async fn delete(&self, badge_id: BadgeId, user_address: &str) -> Result<(), StoreError>;

    /// Every row belonging to a user.
    async fn get_all_for_user(&self, user_address: &str) -> Result<Vec<UserProgress>, StoreError>;
}

/// DashMap-backed store.
pub struct InMemoryProgressStore {
    rows: DashMap<ProgressKey, UserProgress>,
    available: AtomicBool,
    failing_saves: DashSet<BadgeId>,
    saves: AtomicU64,
    batch_reads: AtomicU64,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
            available: AtomicBool::new(true),
            failing_saves: DashSet::new(),
            saves: AtomicU64::new(0),
            batch_reads: AtomicU64::new(0),
        }
    }

    /// Simulate an outage: every operation fails while unavailable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make saves of one badge's rows fail while reads keep working.
    pub fn set_save_failure(&self, badge_id: BadgeId, failing: bool) {
        if failing {
            self.failing_saves.insert(badge_id);
        } else {
            self.failing_saves.remove(&badge_id);
        }
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }

    /// Number of `get_many` calls.
    pub fn batch_read_count(&self) -> u64 {
        self.batch_reads.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Serialize every row, ordered by key.
    pub fn export_json(&self) -> Result<String, StoreError> {
        let mut rows: Vec<UserProgress> = self.rows.iter().map(|r| r.value().clone()).collect();
        rows.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(serde_json::to_string_pretty(&rows)?)
    }

    /// Load rows produced by [`export_json`](Self::export_json).
    pub fn import_json(&self, json: &str) -> Result<usize, StoreError> {
        let rows: Vec<UserProgress> = serde_json::from_str(json)?;
        let count = rows.len();
        for row in rows {
            self.rows.insert(row.key(), row);
        }
        debug!(rows = count, "Imported progress snapshot");
        Ok(count)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store disabled".to_string()))
        }
    }
}

impl Default for InMemoryProgressStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn get_one(
        &self,
        badge_id: BadgeId,
        user_address: &str,
    ) -> Result<Option<UserProgress>, StoreError> {
        self.check_available()?;
        let key = ProgressKey::new(badge_id, user_address);
        Ok(self.rows.get(&key).map(|r| r.value().clone()))
    }

    async fn get_many(
        &self,
        badge_ids: &[BadgeId],
        user_addresses: &[String],
    ) -> Result<Vec<UserProgress>, StoreError> {
        self.check_available()?;
        self.batch_reads.fetch_add(1, Ordering::SeqCst);

        let mut rows = Vec::new();
        for badge_id in badge_ids {
            for user in user_addresses {
                let key = ProgressKey::new(*badge_id, user);
                if let Some(row) = self.rows.get(&key) {
                    rows.push(row.value().clone());
                }
            }
        }
        Ok(rows)
    }

    async fn save(&self, progress: &UserProgress) -> Result<(), StoreError> {
        self.check_available()?;
        if self.failing_saves.contains(&progress.badge_id) {
            return Err(StoreError::Unavailable(format!(
                "writes for {} disabled",
                progress.badge_id
            )));
        }
        self.rows.insert(progress.key(), progress.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, badge_id: BadgeId, user_address: &str) -> Result<(), StoreError> {
        self.check_available()?;
        self.rows.remove(&ProgressKey::new(badge_id, user_address));
        Ok(())
    }

    async fn get_all_for_user(&self, user_address: &str) -> Result<Vec<UserProgress>, StoreError> {
        self.check_available()?;
        let user = normalize_address(user_address);
        let mut rows: Vec<UserProgress> = self
            .rows
            .iter()
            .filter(|r| r.key().user_address == user)
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by_key(|r| r.badge_id);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
    const BOB: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    #[tokio::test]
    async fn test_save_and_get() {
        let store = InMemoryProgressStore::new();
        let row = UserProgress::new(BadgeId::Traveler, ALICE);
        store.save(&row).await.unwrap();

        // Lookups are case-insensitive on the address
        let found = store
            .get_one(BadgeId::Traveler, &ALICE.to_lowercase())
            .await
            .unwrap();
        assert_eq!(found, Some(row));
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_get_many_cross_product() {
        let store = InMemoryProgressStore::new();
        store.save(&UserProgress::new(BadgeId::Traveler, ALICE)).await.unwrap();
        store.save(&UserProgress::new(BadgeId::Fashionista, BOB)).await.unwrap();
        store.save(&UserProgress::new(BadgeId::Emotionista, BOB)).await.unwrap();

        let rows = store
            .get_many(
                &[BadgeId::Traveler, BadgeId::Fashionista],
                &[ALICE.to_string(), BOB.to_string()],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(store.batch_read_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_and_user_listing() {
        let store = InMemoryProgressStore::new();
        store.save(&UserProgress::new(BadgeId::Traveler, ALICE)).await.unwrap();
        store.save(&UserProgress::new(BadgeId::Fashionista, ALICE)).await.unwrap();

        assert_eq!(store.get_all_for_user(ALICE).await.unwrap().len(), 2);
        store.delete(BadgeId::Traveler, ALICE).await.unwrap();
        let rows = store.get_all_for_user(ALICE).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].badge_id, BadgeId::Fashionista);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let store = InMemoryProgressStore::new();
        store.set_available(false);
        assert!(store.get_many(&[BadgeId::Traveler], &[ALICE.to_string()]).await.is_err());
        store.set_available(true);
        assert!(store.get_many(&[BadgeId::Traveler], &[ALICE.to_string()]).await.is_ok());
    }

    #[tokio::test]
    async fn test_save_failure_per_badge() {
        let store = InMemoryProgressStore::new();
        store.set_save_failure(BadgeId::Traveler, true);
        assert!(store.save(&UserProgress::new(BadgeId::Traveler, ALICE)).await.is_err());
        assert!(store.save(&UserProgress::new(BadgeId::Fashionista, ALICE)).await.is_ok());
        assert_eq!(store.save_count(), 1);

        store.set_save_failure(BadgeId::Traveler, false);
        assert!(store.save(&UserProgress::new(BadgeId::Traveler, ALICE)).await.is_ok());
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip() {
        let store = InMemoryProgressStore::new();
        store.save(&UserProgress::new(BadgeId::Traveler, ALICE)).await.unwrap();
        let json = store.export_json().unwrap();

        let restored = InMemoryProgressStore::new();
        assert_eq!(restored.import_json(&json).unwrap(), 1);
        assert!(restored.get_one(BadgeId::Traveler, ALICE).await.unwrap().is_some());
    }
}
