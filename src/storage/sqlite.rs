use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use tracing::debug;

use crate::error::{Error, Result};
use crate::storage::traits::{
    Filter, FilterStore, RemoveOutcome, StoreStats, Subscription, SubscriptionFilters,
    UpsertResult,
};

/// SQLite-backed filter store. One pool per process; migrations run on open
/// and are idempotent.
#[derive(Clone)]
pub struct SqliteFilterStore {
    pool: SqlitePool,
}

impl SqliteFilterStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        debug!("Opened filter store at {}", path.as_ref().display());
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscriptions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                display_name TEXT NOT NULL,
                subreddit TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(user_id, subreddit)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS filters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subscription_id INTEGER NOT NULL REFERENCES subscriptions(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                keywords TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_seen_at TEXT,
                UNIQUE(subscription_id, name)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_subscriptions_subreddit ON subscriptions(subreddit)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_filters_subscription ON filters(subscription_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn filters_for(&self, subscription: Subscription) -> Result<SubscriptionFilters> {
        let filters: Vec<Filter> =
            sqlx::query_as("SELECT * FROM filters WHERE subscription_id = ? ORDER BY name")
                .bind(subscription.id)
                .fetch_all(&self.pool)
                .await?;

        Ok(SubscriptionFilters {
            subscription,
            filters,
        })
    }
}

#[async_trait]
impl FilterStore for SqliteFilterStore {
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

        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO subscriptions (user_id, display_name, subreddit, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_id, subreddit) DO NOTHING
        "#,
        )
        .bind(user_id)
        .bind(display_name)
        .bind(subreddit)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let subscription: Subscription =
            sqlx::query_as("SELECT * FROM subscriptions WHERE user_id = ? AND subreddit = ?")
                .bind(user_id)
                .bind(subreddit)
                .fetch_one(&mut *tx)
                .await?;

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT id FROM filters WHERE subscription_id = ? AND name = ?")
                .bind(subscription.id)
                .bind(name)
                .fetch_optional(&mut *tx)
                .await?;
        let created = existing.is_none();

        // The conflict clause leaves created_at and last_seen_at alone, so a
        // re-added filter keeps its seen cursor.
        sqlx::query(
            r#"
            INSERT INTO filters (subscription_id, name, keywords, created_at, updated_at, last_seen_at)
            VALUES (?, ?, ?, ?, ?, NULL)
            ON CONFLICT(subscription_id, name) DO UPDATE SET
                keywords = excluded.keywords,
                updated_at = excluded.updated_at
        "#,
        )
        .bind(subscription.id)
        .bind(name)
        .bind(keywords)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let filter: Filter =
            sqlx::query_as("SELECT * FROM filters WHERE subscription_id = ? AND name = ?")
                .bind(subscription.id)
                .bind(name)
                .fetch_one(&mut *tx)
                .await?;

        tx.commit().await?;

        Ok(UpsertResult { filter, created })
    }

    async fn remove_filter(
        &self,
        user_id: &str,
        subreddit: &str,
        name: &str,
    ) -> Result<RemoveOutcome> {
        let mut tx = self.pool.begin().await?;

        let subscription_id: Option<i64> =
            sqlx::query_scalar("SELECT id FROM subscriptions WHERE user_id = ? AND subreddit = ?")
                .bind(user_id)
                .bind(subreddit)
                .fetch_optional(&mut *tx)
                .await?;
        let subscription_id = match subscription_id {
            Some(id) => id,
            None => return Ok(RemoveOutcome::SubscriptionNotFound),
        };

        let deleted = sqlx::query("DELETE FROM filters WHERE subscription_id = ? AND name = ?")
            .bind(subscription_id)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Ok(RemoveOutcome::FilterNotFound);
        }

        let remaining: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM filters WHERE subscription_id = ?")
                .bind(subscription_id)
                .fetch_one(&mut *tx)
                .await?;

        let outcome = if remaining == 0 {
            sqlx::query("DELETE FROM subscriptions WHERE id = ?")
                .bind(subscription_id)
                .execute(&mut *tx)
                .await?;
            RemoveOutcome::SubscriptionRemoved
        } else {
            RemoveOutcome::Removed
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn subscriptions_for_user(&self, user_id: &str) -> Result<Vec<SubscriptionFilters>> {
        let subscriptions: Vec<Subscription> =
            sqlx::query_as("SELECT * FROM subscriptions WHERE user_id = ? ORDER BY subreddit")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;

        let mut result = Vec::with_capacity(subscriptions.len());
        for subscription in subscriptions {
            result.push(self.filters_for(subscription).await?);
        }

        Ok(result)
    }

    async fn subscriptions_for_subreddit(
        &self,
        subreddit: &str,
    ) -> Result<Vec<SubscriptionFilters>> {
        let subscriptions: Vec<Subscription> =
            sqlx::query_as("SELECT * FROM subscriptions WHERE subreddit = ? ORDER BY user_id")
                .bind(subreddit)
                .fetch_all(&self.pool)
                .await?;

        let mut result = Vec::with_capacity(subscriptions.len());
        for subscription in subscriptions {
            result.push(self.filters_for(subscription).await?);
        }

        Ok(result)
    }

    async fn distinct_subreddits(&self) -> Result<Vec<String>> {
        let sources: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT subreddit FROM subscriptions ORDER BY subreddit")
                .fetch_all(&self.pool)
                .await?;

        Ok(sources)
    }

    async fn advance_cursor(&self, filter_id: i64, seen_at: DateTime<Utc>) -> Result<bool> {
        // Guarded in SQL so concurrent cycles can never move the cursor
        // backwards.
        let result = sqlx::query(
            r#"
            UPDATE filters
            SET last_seen_at = ?1, updated_at = ?2
            WHERE id = ?3 AND (last_seen_at IS NULL OR last_seen_at < ?1)
        "#,
        )
        .bind(seen_at)
        .bind(Utc::now())
        .bind(filter_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let subscriptions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions")
            .fetch_one(&self.pool)
            .await?;
        let filters: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM filters")
            .fetch_one(&self.pool)
            .await?;
        let sources: i64 =
            sqlx::query_scalar("SELECT COUNT(DISTINCT subreddit) FROM subscriptions")
                .fetch_one(&self.pool)
                .await?;

        Ok(StoreStats {
            subscriptions: subscriptions as usize,
            filters: filters as usize,
            sources: sources as usize,
        })
    }
}
