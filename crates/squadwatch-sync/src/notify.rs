//! Outbound notification channel.
//!
//! Observers hand over finished text. The channel enforces the message size
//! limit and reports whether the message was accepted; it does not retry.

use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Longest message the webhook accepts, exclusive.
pub const MESSAGE_LIMIT: usize = 2000;

/// Sent in place of a message that exceeds [`MESSAGE_LIMIT`].
pub const OVERSIZE_NOTICE: &str = "Len > 2000, check logs";

/// Destination for pre-formatted alert text.
pub trait Notifier: Send + Sync {
    /// Hand a message to the channel. Returns whether it was accepted.
    fn notify(&self, message: &str) -> bool;
}

/// Replace oversize messages with a short notice, dumping them to the log.
pub fn prepare_message(message: &str) -> String {
    let len = message.chars().count();
    if len >= MESSAGE_LIMIT {
        tracing::warn!("Refusing to send message of len={}, content:\n{}", len, message);
        return OVERSIZE_NOTICE.to_string();
    }
    message.to_string()
}

/// Writes messages to the log. Used when no webhook is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) -> bool {
        let message = prepare_message(message);
        tracing::info!("Notification:\n{}", message);
        counter!("notifications_total", "result" => "logged").increment(1);
        true
    }
}

/// Posts messages to a webhook (`content=<message>` form body) from a
/// background task, in the order they were queued.
pub struct WebhookNotifier {
    tx: mpsc::UnboundedSender<String>,
}

impl WebhookNotifier {
    /// Start the delivery task. Must be called from within a tokio runtime.
    ///
    /// The task ends once every `WebhookNotifier` handle is dropped and the
    /// queue is drained.
    pub fn spawn(url: String) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(deliver(url, reqwest::Client::new(), rx));
        (Self { tx }, handle)
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, message: &str) -> bool {
        let accepted = self.tx.send(prepare_message(message)).is_ok();
        if !accepted {
            tracing::error!("Webhook delivery task is gone, dropping notification");
            counter!("notifications_total", "result" => "dropped").increment(1);
        }
        accepted
    }
}

async fn deliver(url: String, client: reqwest::Client, mut rx: mpsc::UnboundedReceiver<String>) {
    let label = webhook_label(&url).to_string();

    while let Some(message) = rx.recv().await {
        tracing::debug!("Sending webhook message");
        let result = client
            .post(&url)
            .form(&[("content", message.as_str())])
            .send()
            .await
            .and_then(|response| response.error_for_status());

        match result {
            Ok(_) => counter!("notifications_total", "result" => "sent").increment(1),
            Err(e) => {
                let e = e.without_url();
                counter!("notifications_total", "result" => "failed").increment(1);
                tracing::error!(webhook = %label, "Failed to send webhook message: {}", e);
            }
        }
    }
    tracing::debug!("Webhook delivery task finished");
}

/// The webhook id, the segment before the trailing token. The token is a secret.
fn webhook_label(url: &str) -> &str {
    url.trim_end_matches('/').rsplit('/').nth(1).unwrap_or("webhook")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_label_hides_token() {
        let url = "https://discord.com/api/webhooks/123456789/s3cr3t-t0k3n";
        assert_eq!(webhook_label(url), "123456789");
        assert_eq!(webhook_label("https://hooks.example/42/tok/"), "42");
        assert_eq!(webhook_label("token-only"), "webhook");
    }

    #[test]
    fn test_short_message_passes_through() {
        assert_eq!(prepare_message("hello"), "hello");
    }

    #[test]
    fn test_oversize_message_replaced() {
        let long = "x".repeat(MESSAGE_LIMIT);
        assert_eq!(prepare_message(&long), OVERSIZE_NOTICE);

        let just_under = "x".repeat(MESSAGE_LIMIT - 1);
        assert_eq!(prepare_message(&just_under), just_under);
    }

    #[test]
    fn test_limit_counts_characters() {
        // 1999 two-byte characters are still under the limit
        let cyrillic = "ж".repeat(MESSAGE_LIMIT - 1);
        assert_eq!(prepare_message(&cyrillic), cyrillic);
    }

    #[test]
    fn test_log_notifier_accepts() {
        assert!(LogNotifier.notify("squad deleted"));
    }

    #[tokio::test]
    async fn test_webhook_notifier_after_task_gone() {
        let (notifier, handle) = WebhookNotifier::spawn("http://127.0.0.1:9/hook".to_string());
        handle.abort();
        let _ = handle.await;
        assert!(!notifier.notify("lost"));
    }
}
