use thiserror::Error;

use crate::appointments::AppointmentEventType;

use super::BoxFuture;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification channel unavailable: {0}")]
    Unavailable(String),
    #[error("notification serialization error: {0}")]
    Serialization(String),
}

/// One notice per mutation per recipient, handed off fire-and-forget; a
/// failed send never rolls back the transition that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct AppointmentNotice {
    pub event_type: AppointmentEventType,
    pub appointment_id: String,
    pub recipient_user_id: String,
    pub payload: serde_json::Value,
}

pub trait NotificationSender: Send + Sync {
    fn send(&self, notice: &AppointmentNotice) -> BoxFuture<'_, Result<(), NotifyError>>;
}
