//! Notification port.
//!
//! Delivery is external; workers emit events at job boundaries and any
//! failure to deliver is logged and swallowed.

use async_trait::async_trait;
use tracing::warn;

#[derive(Debug, Clone)]
pub enum Notification {
    DownloadFailed {
        episode_title: String,
        feed_title: String,
        error: String,
    },
    TranscriptionComplete {
        episode_title: String,
        feed_title: String,
    },
    TranscriptionFailed {
        episode_title: String,
        feed_title: String,
        error: String,
    },
}

impl Notification {
    pub fn title(&self) -> String {
        match self {
            Notification::DownloadFailed { feed_title, .. } => {
                format!("Download failed: {}", feed_title)
            }
            Notification::TranscriptionComplete { feed_title, .. } => {
                format!("Transcript ready: {}", feed_title)
            }
            Notification::TranscriptionFailed { feed_title, .. } => {
                format!("Transcription failed: {}", feed_title)
            }
        }
    }

    pub fn body(&self) -> String {
        match self {
            Notification::DownloadFailed {
                episode_title,
                error,
                ..
            } => format!("{}: {}", episode_title, error),
            Notification::TranscriptionComplete { episode_title, .. } => episode_title.clone(),
            Notification::TranscriptionFailed {
                episode_title,
                error,
                ..
            } => format!("{}: {}", episode_title, error),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification);
}

/// Default notifier: does nothing
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _notification: Notification) {}
}

/// ntfy-style webhook: POST body is the message, title goes in a header
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: Notification) {
        let result = self
            .client
            .post(&self.url)
            .header("Title", notification.title())
            .body(notification.body())
            .send()
            .await;

        if let Err(e) = result {
            warn!("Failed to deliver notification: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_rendering() {
        let n = Notification::DownloadFailed {
            episode_title: "Ep 1".to_string(),
            feed_title: "Cast".to_string(),
            error: "HTTP 404".to_string(),
        };
        assert_eq!(n.title(), "Download failed: Cast");
        assert_eq!(n.body(), "Ep 1: HTTP 404");

        let n = Notification::TranscriptionComplete {
            episode_title: "Ep 1".to_string(),
            feed_title: "Cast".to_string(),
        };
        assert_eq!(n.body(), "Ep 1");
    }
}
