use chrono::{DateTime, Utc};
use common::{CustomerId, NotificationId, OrderId};
use serde::{Deserialize, Serialize};

use super::NotificationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    OrderConfirmed,
    OrderFailed,
    OrderCancelled,
    PaymentFailed,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::OrderConfirmed => "order_confirmed",
            NotificationType::OrderFailed => "order_failed",
            NotificationType::OrderCancelled => "order_cancelled",
            NotificationType::PaymentFailed => "payment_failed",
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    #[default]
    Email,
    Sms,
    Push,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Push => "push",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = NotificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "email" => Ok(Channel::Email),
            "sms" => Ok(Channel::Sms),
            "push" => Ok(Channel::Push),
            other => Err(NotificationError::Validation(format!(
                "unknown channel '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    #[default]
    Pending,
    Sent,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub kind: NotificationType,
    pub channel: Channel,
    pub subject: String,
    pub message: String,
    pub status: NotificationStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn new(
        order_id: OrderId,
        customer_id: CustomerId,
        kind: NotificationType,
        channel: Channel,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: NotificationId::generate(),
            order_id,
            customer_id,
            kind,
            channel,
            subject: subject.into(),
            message: message.into(),
            status: NotificationStatus::Pending,
            error: None,
            created_at: now,
            updated_at: now,
            sent_at: None,
        }
    }

    pub fn validate(&self) -> Result<(), NotificationError> {
        if self.customer_id.is_empty() {
            return Err(NotificationError::Validation(
                "customer_id is required".into(),
            ));
        }
        if self.order_id.is_empty() {
            return Err(NotificationError::Validation("order_id is required".into()));
        }
        if self.message.trim().is_empty() {
            return Err(NotificationError::Validation("message is required".into()));
        }
        Ok(())
    }

    pub fn mark_sent(&mut self) {
        let now = Utc::now();
        self.status = NotificationStatus::Sent;
        self.error = None;
        self.sent_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = NotificationStatus::Failed;
        self.error = Some(error.into());
        self.updated_at = Utc::now();
    }

    pub fn is_failed(&self) -> bool {
        self.status == NotificationStatus::Failed
    }
}
