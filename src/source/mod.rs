pub mod fetcher;
pub mod listing;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry from a source listing. Never persisted; lives for a cycle at most.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub title: String,
    pub permalink: String,
    pub created_at: DateTime<Utc>,
    pub author: Option<String>,
    pub subreddit: Option<String>,
}
