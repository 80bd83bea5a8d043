pub mod discord;

pub use discord::DiscordMessenger;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::source::Post;

/// Opaque delivery address resolved from a user id. For Discord this is the
/// direct-message channel id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserHandle {
    pub channel_id: String,
}

/// Transport seam for notifications.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Resolve a user id to a deliverable handle.
    async fn resolve_user(&self, user_id: &str) -> Result<UserHandle>;

    /// Deliver one message to a resolved handle.
    async fn send(&self, handle: &UserHandle, text: &str) -> Result<()>;
}

/// Formats match notifications and pushes them through a messenger.
pub struct Dispatcher {
    messenger: Arc<dyn Messenger>,
    link_base: Url,
}

impl Dispatcher {
    pub fn new(messenger: Arc<dyn Messenger>, link_base: Url) -> Self {
        Self {
            messenger,
            link_base,
        }
    }

    /// Notify one user about one matched post. The message is two lines:
    /// the post title, then the public link built from the permalink.
    pub async fn notify(&self, user_id: &str, post: &Post) -> Result<()> {
        let text = self.render(post)?;
        let handle = self.messenger.resolve_user(user_id).await?;
        self.messenger.send(&handle, &text).await?;
        debug!("Notified user {} about '{}'", user_id, post.title);
        Ok(())
    }

    fn render(&self, post: &Post) -> Result<String> {
        let link = self.link_base.join(&post.permalink).map_err(|e| {
            Error::Delivery(format!("Invalid permalink '{}': {}", post.permalink, e))
        })?;

        Ok(format!("Match found: {}\n{}", post.title, link))
    }
}
