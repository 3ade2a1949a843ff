use std::time::Duration;

use kopdar_domain::ports::BoxFuture;
use kopdar_domain::ports::notify::{AppointmentNotice, NotificationSender, NotifyError};

use crate::config::AppConfig;

/// Delivers appointment notices to the notification platform's webhook.
/// Delivery is best-effort; the domain treats a failed send as lost, so the
/// failure is logged here where the transport detail lives.
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.notify_timeout_ms))
            .build()?;
        Ok(Self {
            http,
            url: config.notify_webhook_url.clone(),
        })
    }
}

impl NotificationSender for WebhookNotifier {
    fn send(&self, notice: &AppointmentNotice) -> BoxFuture<'_, Result<(), NotifyError>> {
        let body = serde_json::json!({
            "event_type": notice.event_type.as_str(),
            "appointment_id": notice.appointment_id,
            "recipient_user_id": notice.recipient_user_id,
            "payload": notice.payload,
            "schema_version": "1",
        });
        Box::pin(async move {
            let response = self
                .http
                .post(&self.url)
                .json(&body)
                .send()
                .await
                .map_err(|err| {
                    tracing::warn!(error = %err, "notification delivery failed");
                    NotifyError::Unavailable(err.to_string())
                })?;
            if !response.status().is_success() {
                tracing::warn!(status = %response.status(), "notification endpoint rejected notice");
                return Err(NotifyError::Unavailable(format!(
                    "webhook returned {}",
                    response.status()
                )));
            }
            Ok(())
        })
    }
}

/// Used when notifications are disabled (tests, local development).
pub struct NoopNotifier;

impl NotificationSender for NoopNotifier {
    fn send(&self, _notice: &AppointmentNotice) -> BoxFuture<'_, Result<(), NotifyError>> {
        Box::pin(async move { Ok(()) })
    }
}
