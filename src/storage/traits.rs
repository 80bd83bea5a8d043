use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{Error, Result};

/// One user watching one source. Unique per (user_id, subreddit); two users
/// watching the same source hold independent subscriptions.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: i64,
    pub user_id: String,
    pub display_name: String,
    pub subreddit: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A named keyword filter under a subscription. `keywords` is the normalized
/// comma-joined form; `last_seen_at` is the seen cursor, None until the
/// filter's first non-empty poll.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Filter {
    pub id: i64,
    pub subscription_id: i64,
    pub name: String,
    pub keywords: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl Filter {
    pub fn keyword_list(&self) -> Vec<String> {
        self.keywords
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(String::from)
            .collect()
    }
}

/// A subscription with its filters eagerly loaded.
#[derive(Debug, Clone)]
pub struct SubscriptionFilters {
    pub subscription: Subscription,
    pub filters: Vec<Filter>,
}

/// Result of an upsert: the stored row plus whether it was newly created.
#[derive(Debug, Clone)]
pub struct UpsertResult {
    pub filter: Filter,
    pub created: bool,
}

/// What a removal did. "Not found" is an outcome here, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// Filter deleted; the subscription keeps other filters.
    Removed,
    /// Filter deleted and it was the last one, so the subscription went too.
    SubscriptionRemoved,
    /// The subscription exists but has no filter with that name.
    FilterNotFound,
    /// The user has no subscription for that source.
    SubscriptionNotFound,
}

/// Totals for status reporting.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub subscriptions: usize,
    pub filters: usize,
    pub sources: usize,
}

/// Durable filter repository.
#[async_trait]
pub trait FilterStore: Send + Sync {
    /// Get-or-create the (user, source) subscription, then insert or replace
    /// the named filter. Replacing refreshes the keywords and `updated_at`
    /// but preserves `last_seen_at`. An empty keyword list is rejected.
    async fn upsert_filter(
        &self,
        user_id: &str,
        display_name: &str,
        subreddit: &str,
        name: &str,
        keywords: &str,
    ) -> Result<UpsertResult>;

    /// Remove one filter; drops the subscription as well when the removed
    /// filter was its last.
    async fn remove_filter(
        &self,
        user_id: &str,
        subreddit: &str,
        name: &str,
    ) -> Result<RemoveOutcome>;

    /// All of a user's subscriptions with filters, ordered by source then
    /// filter name.
    async fn subscriptions_for_user(&self, user_id: &str) -> Result<Vec<SubscriptionFilters>>;

    /// Every subscription watching one source, filters loaded.
    async fn subscriptions_for_subreddit(
        &self,
        subreddit: &str,
    ) -> Result<Vec<SubscriptionFilters>>;

    /// Every source watched by at least one subscription, sorted, deduplicated.
    async fn distinct_subreddits(&self) -> Result<Vec<String>>;

    /// Advance a filter's seen cursor, only forward: the update applies when
    /// the stored cursor is NULL or strictly older than `seen_at`. Returns
    /// whether the row changed.
    async fn advance_cursor(&self, filter_id: i64, seen_at: DateTime<Utc>) -> Result<bool>;

    /// Totals across the store.
    async fn stats(&self) -> Result<StoreStats>;
}

/// Memory-only store with the same observable semantics as the SQLite
/// implementation. Used in tests and as the reference model.
pub struct MemoryFilterStore {
    inner: Arc<parking_lot::RwLock<MemoryInner>>,
}

#[derive(Default)]
struct MemoryInner {
    subscriptions: Vec<Subscription>,
    filters: Vec<Filter>,
    next_subscription_id: i64,
    next_filter_id: i64,
}

impl MemoryFilterStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(parking_lot::RwLock::new(MemoryInner {
                next_subscription_id: 1,
                next_filter_id: 1,
                ..Default::default()
            })),
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.read().subscriptions.len()
    }

    pub fn filter_count(&self) -> usize {
        self.inner.read().filters.len()
    }
}

impl Default for MemoryFilterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FilterStore for MemoryFilterStore {
    async fn upsert_filter(
        &self,
        user_id: &str,
        display_name: &str,
        subreddit: &str,
        name: &str,
        keywords: &str,
    ) -> Result<UpsertResult> {
        if keywords.trim().is_empty() {
            return Err(Error::InvalidFilter(
                "Keyword list cannot be empty".to_string(),
            ));
        }

        let mut inner = self.inner.write();
        let now = Utc::now();

        let subscription_id = match inner
            .subscriptions
            .iter()
            .find(|s| s.user_id == user_id && s.subreddit == subreddit)
        {
            Some(sub) => sub.id,
            None => {
                let id = inner.next_subscription_id;
                inner.next_subscription_id += 1;
                inner.subscriptions.push(Subscription {
                    id,
                    user_id: user_id.to_string(),
                    display_name: display_name.to_string(),
                    subreddit: subreddit.to_string(),
                    created_at: now,
                    updated_at: now,
                });
                id
            }
        };

        if let Some(filter) = inner
            .filters
            .iter_mut()
            .find(|f| f.subscription_id == subscription_id && f.name == name)
        {
            filter.keywords = keywords.to_string();
            filter.updated_at = now;
            return Ok(UpsertResult {
                filter: filter.clone(),
                created: false,
            });
        }

        let id = inner.next_filter_id;
        inner.next_filter_id += 1;
        let filter = Filter {
            id,
            subscription_id,
            name: name.to_string(),
            keywords: keywords.to_string(),
            created_at: now,
            updated_at: now,
            last_seen_at: None,
        };
        inner.filters.push(filter.clone());

        Ok(UpsertResult {
            filter,
            created: true,
        })
    }

    async fn remove_filter(
        &self,
        user_id: &str,
        subreddit: &str,
        name: &str,
    ) -> Result<RemoveOutcome> {
        let mut inner = self.inner.write();

        let subscription_id = match inner
            .subscriptions
            .iter()
            .find(|s| s.user_id == user_id && s.subreddit == subreddit)
        {
            Some(sub) => sub.id,
            None => return Ok(RemoveOutcome::SubscriptionNotFound),
        };

        let position = inner
            .filters
            .iter()
            .position(|f| f.subscription_id == subscription_id && f.name == name);
        let position = match position {
            Some(position) => position,
            None => return Ok(RemoveOutcome::FilterNotFound),
        };

        inner.filters.remove(position);

        let has_siblings = inner
            .filters
            .iter()
            .any(|f| f.subscription_id == subscription_id);
        if has_siblings {
            Ok(RemoveOutcome::Removed)
        } else {
            inner.subscriptions.retain(|s| s.id != subscription_id);
            Ok(RemoveOutcome::SubscriptionRemoved)
        }
    }

    async fn subscriptions_for_user(&self, user_id: &str) -> Result<Vec<SubscriptionFilters>> {
        let inner = self.inner.read();

        let mut result: Vec<SubscriptionFilters> = inner
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id)
            .map(|s| load_filters(&inner, s))
            .collect();
        result.sort_by(|a, b| a.subscription.subreddit.cmp(&b.subscription.subreddit));

        Ok(result)
    }

    async fn subscriptions_for_subreddit(
        &self,
        subreddit: &str,
    ) -> Result<Vec<SubscriptionFilters>> {
        let inner = self.inner.read();

        let mut result: Vec<SubscriptionFilters> = inner
            .subscriptions
            .iter()
            .filter(|s| s.subreddit == subreddit)
            .map(|s| load_filters(&inner, s))
            .collect();
        result.sort_by(|a, b| a.subscription.user_id.cmp(&b.subscription.user_id));

        Ok(result)
    }

    async fn distinct_subreddits(&self) -> Result<Vec<String>> {
        let inner = self.inner.read();

        let sources: BTreeSet<String> = inner
            .subscriptions
            .iter()
            .map(|s| s.subreddit.clone())
            .collect();

        Ok(sources.into_iter().collect())
    }

    async fn advance_cursor(&self, filter_id: i64, seen_at: DateTime<Utc>) -> Result<bool> {
        let mut inner = self.inner.write();

        if let Some(filter) = inner.filters.iter_mut().find(|f| f.id == filter_id) {
            let moves_forward = match filter.last_seen_at {
                None => true,
                Some(current) => current < seen_at,
            };
            if moves_forward {
                filter.last_seen_at = Some(seen_at);
                filter.updated_at = Utc::now();
                return Ok(true);
            }
        }

        Ok(false)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let inner = self.inner.read();

        let sources: BTreeSet<&str> = inner
            .subscriptions
            .iter()
            .map(|s| s.subreddit.as_str())
            .collect();

        Ok(StoreStats {
            subscriptions: inner.subscriptions.len(),
            filters: inner.filters.len(),
            sources: sources.len(),
        })
    }
}

fn load_filters(inner: &MemoryInner, subscription: &Subscription) -> SubscriptionFilters {
    let mut filters: Vec<Filter> = inner
        .filters
        .iter()
        .filter(|f| f.subscription_id == subscription.id)
        .cloned()
        .collect();
    filters.sort_by(|a, b| a.name.cmp(&b.name));

    SubscriptionFilters {
        subscription: subscription.clone(),
        filters,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_upsert_creates_subscription_and_filter() {
        let store = MemoryFilterStore::new();

        let result = store
            .upsert_filter("100", "alice", "mechmarket", "keycaps", "gmk,blue")
            .await
            .unwrap();

        assert!(result.created);
        assert_eq!(result.filter.name, "keycaps");
        assert_eq!(result.filter.keyword_list(), vec!["gmk", "blue"]);
        assert!(result.filter.last_seen_at.is_none());
        assert_eq!(store.subscription_count(), 1);
        assert_eq!(store.filter_count(), 1);
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = MemoryFilterStore::new();

        let first = store
            .upsert_filter("100", "alice", "mechmarket", "keycaps", "gmk")
            .await
            .unwrap();
        let second = store
            .upsert_filter("100", "alice", "mechmarket", "keycaps", "gmk,olivia")
            .await
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.filter.id, second.filter.id);
        assert_eq!(second.filter.keywords, "gmk,olivia");
        assert_eq!(store.subscription_count(), 1);
        assert_eq!(store.filter_count(), 1);
    }

    #[tokio::test]
    async fn test_upsert_preserves_cursor() {
        let store = MemoryFilterStore::new();
        let seen = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        let first = store
            .upsert_filter("100", "alice", "mechmarket", "keycaps", "gmk")
            .await
            .unwrap();
        assert!(store.advance_cursor(first.filter.id, seen).await.unwrap());

        let second = store
            .upsert_filter("100", "alice", "mechmarket", "keycaps", "gmk,updated")
            .await
            .unwrap();
        assert_eq!(second.filter.last_seen_at, Some(seen));
    }

    #[tokio::test]
    async fn test_upsert_rejects_empty_keywords() {
        let store = MemoryFilterStore::new();

        let result = store
            .upsert_filter("100", "alice", "mechmarket", "keycaps", "  ")
            .await;

        if let Err(Error::InvalidFilter(msg)) = result {
            assert!(msg.contains("empty"));
        } else {
            panic!("Expected InvalidFilter error");
        }
        assert_eq!(store.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_remove_outcomes() {
        let store = MemoryFilterStore::new();

        store
            .upsert_filter("100", "alice", "mechmarket", "keycaps", "gmk")
            .await
            .unwrap();
        store
            .upsert_filter("100", "alice", "mechmarket", "switches", "holy,panda")
            .await
            .unwrap();

        assert_eq!(
            store.remove_filter("100", "avexchange", "keycaps").await.unwrap(),
            RemoveOutcome::SubscriptionNotFound
        );
        assert_eq!(
            store.remove_filter("100", "mechmarket", "deskmat").await.unwrap(),
            RemoveOutcome::FilterNotFound
        );
        assert_eq!(
            store.remove_filter("100", "mechmarket", "keycaps").await.unwrap(),
            RemoveOutcome::Removed
        );
        assert_eq!(
            store.remove_filter("100", "mechmarket", "switches").await.unwrap(),
            RemoveOutcome::SubscriptionRemoved
        );

        assert_eq!(store.subscription_count(), 0);
        assert!(store.distinct_subreddits().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_two_users_watch_the_same_source_independently() {
        let store = MemoryFilterStore::new();

        store
            .upsert_filter("100", "alice", "mechmarket", "keycaps", "gmk")
            .await
            .unwrap();
        store
            .upsert_filter("200", "bob", "mechmarket", "keycaps", "gmk")
            .await
            .unwrap();

        assert_eq!(store.subscription_count(), 2);
        assert_eq!(store.distinct_subreddits().await.unwrap(), vec!["mechmarket"]);

        let watchers = store.subscriptions_for_subreddit("mechmarket").await.unwrap();
        assert_eq!(watchers.len(), 2);
        assert_eq!(watchers[0].subscription.user_id, "100");
        assert_eq!(watchers[1].subscription.user_id, "200");

        store.remove_filter("100", "mechmarket", "keycaps").await.unwrap();
        let watchers = store.subscriptions_for_subreddit("mechmarket").await.unwrap();
        assert_eq!(watchers.len(), 1);
        assert_eq!(watchers[0].subscription.user_id, "200");
    }

    #[tokio::test]
    async fn test_advance_cursor_is_monotonic() {
        let store = MemoryFilterStore::new();
        let earlier = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let later = Utc.timestamp_opt(1_700_000_500, 0).unwrap();

        let created = store
            .upsert_filter("100", "alice", "mechmarket", "keycaps", "gmk")
            .await
            .unwrap();
        let id = created.filter.id;

        assert!(store.advance_cursor(id, later).await.unwrap());
        assert!(!store.advance_cursor(id, earlier).await.unwrap());
        assert!(!store.advance_cursor(id, later).await.unwrap());

        let subs = store.subscriptions_for_user("100").await.unwrap();
        assert_eq!(subs[0].filters[0].last_seen_at, Some(later));
    }

    #[tokio::test]
    async fn test_advance_cursor_on_missing_filter() {
        let store = MemoryFilterStore::new();
        let seen = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert!(!store.advance_cursor(42, seen).await.unwrap());
    }

    #[tokio::test]
    async fn test_distinct_subreddits_sorted_unique() {
        let store = MemoryFilterStore::new();

        store
            .upsert_filter("100", "alice", "zelda", "botw", "master,sword")
            .await
            .unwrap();
        store
            .upsert_filter("100", "alice", "avexchange", "amps", "tube")
            .await
            .unwrap();
        store
            .upsert_filter("200", "bob", "zelda", "totk", "zonai")
            .await
            .unwrap();

        assert_eq!(
            store.distinct_subreddits().await.unwrap(),
            vec!["avexchange", "zelda"]
        );
    }

    #[tokio::test]
    async fn test_store_stats() {
        let store = MemoryFilterStore::new();

        store
            .upsert_filter("100", "alice", "mechmarket", "keycaps", "gmk")
            .await
            .unwrap();
        store
            .upsert_filter("100", "alice", "mechmarket", "switches", "panda")
            .await
            .unwrap();
        store
            .upsert_filter("200", "bob", "zelda", "totk", "zonai")
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.subscriptions, 2);
        assert_eq!(stats.filters, 3);
        assert_eq!(stats.sources, 2);
    }
}
