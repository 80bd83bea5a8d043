use crate::error::{Error, Result};
use crate::source::Post;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<ListingChild>,
}

#[derive(Debug, Deserialize)]
struct ListingChild {
    data: ListingPost,
}

#[derive(Debug, Deserialize)]
struct ListingPost {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    permalink: Option<String>,
    #[serde(default)]
    created_utc: Option<f64>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    subreddit: Option<String>,
}

/// Parse a `/new.json` listing body into posts, in the order the source
/// delivered them (newest first). Entries without a title, permalink, or
/// timestamp are skipped with a warning rather than failing the page.
pub fn parse_listing(body: &str) -> Result<Vec<Post>> {
    let listing: Listing = serde_json::from_str(body)
        .map_err(|e| Error::Transport(format!("Malformed listing body: {}", e)))?;

    let mut posts = Vec::with_capacity(listing.data.children.len());
    for child in listing.data.children {
        match convert(child.data) {
            Some(post) => posts.push(post),
            None => warn!("Skipping listing entry with missing fields"),
        }
    }

    Ok(posts)
}

fn convert(raw: ListingPost) -> Option<Post> {
    let title = raw.title?;
    let permalink = raw.permalink?;
    let created_at = epoch_seconds_to_utc(raw.created_utc?)?;

    let id = raw
        .name
        .or(raw.id)
        .unwrap_or_else(|| blake3::hash(permalink.as_bytes()).to_hex().to_string());

    Some(Post {
        id,
        title,
        permalink,
        created_at,
        author: raw.author,
        subreddit: raw.subreddit,
    })
}

// Listing timestamps are float epoch seconds; keep millisecond precision so
// cursor comparisons round-trip exactly.
fn epoch_seconds_to_utc(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Utc.timestamp_millis_opt((seconds * 1000.0) as i64).single()
}
