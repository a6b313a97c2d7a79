//! Customer notifications.

mod model;
mod templates;

pub use model::{Channel, Notification, NotificationStatus, NotificationType};
pub use templates::{cancellation_message, confirmation_message, failure_message, subject_for};

use common::NotificationId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotificationError {
    #[error("Invalid notification: {0}")]
    Validation(String),

    #[error("Unsupported channel: {0}")]
    UnsupportedChannel(Channel),

    #[error("Notification delivery failed: {0}")]
    Send(String),

    #[error("Notification not found: {0}")]
    NotFound(NotificationId),

    #[error("Notification {0} has not failed")]
    NotFailed(NotificationId),
}
