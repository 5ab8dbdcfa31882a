//! Webhook sink: posts rendered announcements as JSON.

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::announcements::Announcement;
use crate::error::DeliveryError;
use crate::handoff::HandoffReceiver;

/// Payload accepted by Discord-style incoming webhooks.
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    content: &'a str,
}

/// Delivers text to one webhook URL.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Post a single message. Any non-2xx answer is an error.
    pub async fn deliver(&self, content: &str) -> Result<(), DeliveryError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&WebhookPayload { content })
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(DeliveryError::Status { status, body })
    }

    /// Deliver every rendered message of an announcement, in order.
    ///
    /// A failed message is logged and the rest are still sent.
    pub async fn deliver_announcement(&self, announcement: &Announcement) -> usize {
        let mut failed = 0;
        for (part, content) in announcement.render().iter().enumerate() {
            if let Err(e) = self.deliver(content).await {
                error!(subject = %announcement.subject, part, error = %e, "Failed to send webhook");
                failed += 1;
            }
        }
        failed
    }
}

/// Spawn the task that drains announcements into the webhook.
///
/// Stops when every sender is gone or `cancel` fires. A delivery already in
/// progress finishes; no new one starts after cancellation.
pub fn spawn_sink(
    sink: WebhookSink,
    mut announcements: HandoffReceiver<Announcement>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(url = %sink.url(), "Webhook sink started");
        loop {
            let announcement = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    announcements.close();
                    break;
                }
                next = announcements.recv() => match next {
                    Some(a) => a,
                    None => break,
                },
            };

            let failed = sink.deliver_announcement(&announcement).await;
            debug!(
                subject = %announcement.subject,
                segments = announcement.segments.len(),
                failed,
                "Announcement delivered"
            );
        }
        info!("Webhook sink shutting down");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_shape() {
        let json = serde_json::to_value(WebhookPayload { content: "**Hi**\n\nbody" }).unwrap();
        assert_eq!(json, serde_json::json!({ "content": "**Hi**\n\nbody" }));
    }

    #[tokio::test]
    async fn unreachable_webhook_is_request_error() {
        // port 9 (discard) on localhost is closed in test environments
        let sink = WebhookSink::new("http://127.0.0.1:9/hook");
        let err = sink.deliver("hello").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Request(_)));
    }
}
