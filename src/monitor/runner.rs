use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::monitor::matcher;
use crate::notify::Dispatcher;
use crate::source::fetcher::SourceFetcher;
use crate::source::Post;
use crate::storage::traits::{Filter, FilterStore, Subscription};
use crate::storage::ListingCache;

/// Counters from one poll cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleStats {
    pub sources_polled: usize,
    pub sources_failed: usize,
    pub posts_seen: usize,
    pub matches: usize,
    pub notifications_sent: usize,
    pub delivery_failures: usize,
    pub cursors_advanced: usize,
}

/// The poll loop: every interval, walk all watched sources, match unseen
/// posts against every filter, and dispatch notifications. No source,
/// persistence, or delivery failure stops the loop.
pub struct Monitor {
    store: Arc<dyn FilterStore>,
    fetcher: Arc<dyn SourceFetcher>,
    dispatcher: Dispatcher,
    cache: ListingCache,
    poll_interval: Duration,
    max_posts: u32,
}

impl Monitor {
    pub fn new(
        store: Arc<dyn FilterStore>,
        fetcher: Arc<dyn SourceFetcher>,
        dispatcher: Dispatcher,
        cache: ListingCache,
        poll_interval: Duration,
        max_posts: u32,
    ) -> Self {
        Self {
            store,
            fetcher,
            dispatcher,
            cache,
            poll_interval,
            max_posts,
        }
    }

    /// Run cycles until the shutdown flag flips. The flag is observed at the
    /// top of each cycle and during the sleep, so shutdown never waits for a
    /// full interval.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Monitor started (poll interval: {}s)",
            self.poll_interval.as_secs()
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let stats = self.run_cycle().await;
            debug!(
                "Cycle complete: {}/{} sources ok, {} matches, {} notified",
                stats.sources_polled - stats.sources_failed,
                stats.sources_polled,
                stats.matches,
                stats.notifications_sent
            );

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Monitor stopped");
    }

    /// One pass over every watched source. Failures are contained to the
    /// source (or the single filter) they occurred in.
    pub async fn run_cycle(&self) -> CycleStats {
        let mut stats = CycleStats::default();

        let sources = match self.store.distinct_subreddits().await {
            Ok(sources) => sources,
            Err(e) => {
                error!(
                    "Could not load watched sources: {} [{}]",
                    e,
                    e.error_code()
                );
                return stats;
            }
        };

        if sources.is_empty() {
            debug!("No sources watched, nothing to poll");
            return stats;
        }

        debug!("Polling {} source(s)", sources.len());
        for source in sources {
            stats.sources_polled += 1;
            if let Err(e) = self.process_source(&source, &mut stats).await {
                stats.sources_failed += 1;
                if e.is_temporary() {
                    warn!(
                        "Skipping r/{} this cycle: {} [{}]",
                        source,
                        e,
                        e.error_code()
                    );
                } else {
                    error!("Source r/{} failed: {} [{}]", source, e, e.error_code());
                }
            }
        }

        stats
    }

    async fn process_source(&self, source: &str, stats: &mut CycleStats) -> Result<()> {
        let listing = match self.cache.get(source) {
            Some(cached) => {
                debug!("Using cached listing for r/{}", source);
                cached
            }
            None => {
                let posts = self.fetcher.fetch_newest(source, self.max_posts).await?;
                self.cache.insert(source, posts)
            }
        };

        if listing.is_empty() {
            debug!("No posts available for r/{}", source);
            return Ok(());
        }
        stats.posts_seen += listing.len();

        let page_cursor = matcher::next_cursor(&listing);
        let watchers = self.store.subscriptions_for_subreddit(source).await?;

        for watcher in watchers {
            for filter in &watcher.filters {
                self.process_filter(&watcher.subscription, filter, &listing, page_cursor, stats)
                    .await;
            }
        }

        Ok(())
    }

    async fn process_filter(
        &self,
        subscription: &Subscription,
        filter: &Filter,
        listing: &[Post],
        page_cursor: Option<DateTime<Utc>>,
        stats: &mut CycleStats,
    ) {
        let unseen = matcher::select_unseen(listing, filter.last_seen_at);
        if unseen.is_empty() {
            return;
        }

        let keywords = filter.keyword_list();
        let mut sent = 0usize;
        for post in unseen {
            if !matcher::matches_keywords(&post.title, &keywords) {
                continue;
            }
            stats.matches += 1;

            match self.dispatcher.notify(&subscription.user_id, post).await {
                Ok(()) => {
                    sent += 1;
                    stats.notifications_sent += 1;
                }
                Err(e) => {
                    stats.delivery_failures += 1;
                    warn!(
                        "Could not notify {} about '{}': {}",
                        subscription.display_name, post.title, e
                    );
                }
            }
        }

        if sent > 0 {
            info!(
                "Sent {} match(es) to {} for r/{}",
                sent, subscription.display_name, subscription.subreddit
            );
        }

        // The cursor moves whenever unseen posts were processed, regardless
        // of match count or delivery outcome.
        if let Some(seen_at) = page_cursor {
            match self.store.advance_cursor(filter.id, seen_at).await {
                Ok(true) => stats.cursors_advanced += 1,
                Ok(false) => {}
                Err(e) => warn!(
                    "Could not advance cursor for filter '{}': {}",
                    filter.name, e
                ),
            }
        }
    }
}
