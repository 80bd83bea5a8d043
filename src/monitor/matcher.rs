use chrono::{DateTime, Utc};

use crate::source::Post;

/// True when every keyword appears somewhere in the title, case-insensitively.
/// All keywords must be present, not any one of them.
pub fn matches_keywords(title: &str, keywords: &[String]) -> bool {
    let title = title.to_lowercase();
    keywords
        .iter()
        .all(|keyword| title.contains(&keyword.to_lowercase()))
}

/// Posts strictly newer than the cursor. No cursor selects the whole page:
/// a filter's first poll considers everything that was fetched.
pub fn select_unseen(posts: &[Post], cursor: Option<DateTime<Utc>>) -> Vec<&Post> {
    match cursor {
        None => posts.iter().collect(),
        Some(cursor) => posts.iter().filter(|p| p.created_at > cursor).collect(),
    }
}

/// The high-water mark of an entire fetched page. A cursor taken from here
/// moves past every page item at once; entries newer than the stored cursor
/// that fell outside the fetched window are skipped for good.
pub fn next_cursor(posts: &[Post]) -> Option<DateTime<Utc>> {
    posts.iter().map(|p| p.created_at).max()
}
