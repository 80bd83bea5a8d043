use std::sync::Arc;

use regex::Regex;
use tracing::error;

use crate::storage::traits::{FilterStore, RemoveOutcome};

const SOURCE_NAME_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9_]{2,20}$";

/// Filter management facade shared by every front end. Each operation
/// resolves to a message suitable for echoing back verbatim; store failures
/// are folded into the message instead of surfaced as errors.
#[derive(Clone)]
pub struct FilterService {
    store: Arc<dyn FilterStore>,
    source_pattern: Regex,
}

impl FilterService {
    pub fn new(store: Arc<dyn FilterStore>) -> Self {
        Self {
            store,
            source_pattern: Regex::new(SOURCE_NAME_PATTERN)
                .expect("Failed to compile source name pattern"),
        }
    }

    /// Add or update a named filter. Keywords are normalized before storage:
    /// trimmed, lowercased, empties dropped, duplicates removed in order.
    pub async fn add_filter(
        &self,
        user_id: &str,
        display_name: &str,
        subreddit: &str,
        name: &str,
        keywords: &[String],
    ) -> String {
        let source = match self.validate_source(subreddit) {
            Ok(source) => source,
            Err(message) => return message,
        };

        let keywords = normalize_keywords(keywords);
        if keywords.is_empty() {
            return "At least one keyword is required".to_string();
        }

        match self
            .store
            .upsert_filter(user_id, display_name, &source, name, &keywords.join(","))
            .await
        {
            Ok(result) => format!(
                "Filter '{}' added/updated for subreddit '{}' with keywords: {}",
                name,
                source,
                result.filter.keyword_list().join(", ")
            ),
            Err(e) => {
                error!("Error adding filter: {}", e);
                format!("Failed to add filter: {}", e)
            }
        }
    }

    /// Remove a named filter. Removing something that does not exist is an
    /// outcome message, not an error.
    pub async fn remove_filter(&self, user_id: &str, subreddit: &str, name: &str) -> String {
        let source = strip_source_prefix(subreddit);

        match self.store.remove_filter(user_id, source, name).await {
            Ok(RemoveOutcome::SubscriptionNotFound) => {
                format!("No filters found for subreddit '{}'", source)
            }
            Ok(RemoveOutcome::FilterNotFound) => format!("Filter '{}' not found", name),
            Ok(RemoveOutcome::Removed) | Ok(RemoveOutcome::SubscriptionRemoved) => {
                format!("Filter '{}' removed from subreddit '{}'", name, source)
            }
            Err(e) => {
                error!("Error removing filter: {}", e);
                format!("Failed to remove filter: {}", e)
            }
        }
    }

    /// Render every filter the user has, grouped by source.
    pub async fn profile(&self, user_id: &str) -> String {
        match self.store.subscriptions_for_user(user_id).await {
            Ok(subscriptions) => {
                if subscriptions.is_empty() {
                    return "No filters set up yet.".to_string();
                }

                let mut lines = vec!["Your active filters:".to_string()];
                for entry in subscriptions {
                    lines.push(format!("\nSubreddit: r/{}", entry.subscription.subreddit));
                    for filter in &entry.filters {
                        lines.push(format!(
                            "  - {}: {}",
                            filter.name,
                            filter.keyword_list().join(", ")
                        ));
                    }
                }
                lines.join("\n")
            }
            Err(e) => {
                error!("Error getting user profile: {}", e);
                format!("Failed to get profile: {}", e)
            }
        }
    }

    fn validate_source(&self, raw: &str) -> std::result::Result<String, String> {
        let name = strip_source_prefix(raw);
        if self.source_pattern.is_match(name) {
            Ok(name.to_string())
        } else {
            Err(format!("Invalid subreddit name: '{}'", raw.trim()))
        }
    }
}

fn strip_source_prefix(raw: &str) -> &str {
    let name = raw.trim();
    name.strip_prefix("r/").unwrap_or(name)
}

fn normalize_keywords(raw: &[String]) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for keyword in raw {
        let cleaned = keyword.trim().to_lowercase();
        if cleaned.is_empty() || keywords.contains(&cleaned) {
            continue;
        }
        keywords.push(cleaned);
    }
    keywords
}
