//! Notification delivery ports, the dispatcher that routes them by
//! channel, and in-memory implementations.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use common::{CustomerId, NotificationId, OrderId};
use domain::notification::{
    cancellation_message, confirmation_message, failure_message, subject_for,
};
use domain::{Channel, Notification, NotificationError, NotificationType};
use tokio::sync::RwLock;

use super::ServiceResult;

/// Delivers notifications over one or more channels.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    fn supported_channels(&self) -> Vec<Channel>;

    async fn send(&self, notification: &Notification) -> Result<(), NotificationError>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn save(&self, notification: Notification) -> ServiceResult<()>;

    async fn get(&self, id: &NotificationId) -> ServiceResult<Notification>;

    async fn find_by_order(&self, order_id: &OrderId) -> ServiceResult<Vec<Notification>>;
}

/// What to send. Missing subject and message are filled from the
/// templates for `kind`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRequest {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub kind: NotificationType,
    pub channel: Channel,
    pub subject: Option<String>,
    pub message: Option<String>,
}

impl NotificationRequest {
    pub fn new(
        order_id: OrderId,
        customer_id: CustomerId,
        kind: NotificationType,
        channel: Channel,
    ) -> Self {
        Self {
            order_id,
            customer_id,
            kind,
            channel,
            subject: None,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    fn default_message(&self) -> String {
        match self.kind {
            NotificationType::OrderConfirmed => confirmation_message(&self.order_id, None),
            NotificationType::OrderFailed | NotificationType::PaymentFailed => {
                failure_message(&self.order_id, Some("Processing failed"))
            }
            NotificationType::OrderCancelled => cancellation_message(&self.order_id),
        }
    }
}

/// Routes notifications to the sender registered for their channel and
/// records every attempt.
#[derive(Clone)]
pub struct NotificationDispatcher {
    senders: HashMap<Channel, Arc<dyn NotificationSender>>,
    repository: Arc<dyn NotificationRepository>,
}

impl NotificationDispatcher {
    pub fn new(repository: Arc<dyn NotificationRepository>) -> Self {
        Self {
            senders: HashMap::new(),
            repository,
        }
    }

    /// Registers `sender` for each channel it supports, replacing any
    /// earlier registration.
    pub fn with_sender(mut self, sender: Arc<dyn NotificationSender>) -> Self {
        for channel in sender.supported_channels() {
            self.senders.insert(channel, sender.clone());
        }
        self
    }

    pub fn supports(&self, channel: Channel) -> bool {
        self.senders.contains_key(&channel)
    }

    /// Builds, validates, sends and records a notification.
    ///
    /// A failed delivery is still recorded, with status `Failed`.
    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id, kind = %request.kind, channel = %request.channel))]
    pub async fn send(&self, request: NotificationRequest) -> ServiceResult<Notification> {
        let subject = request
            .subject
            .clone()
            .unwrap_or_else(|| subject_for(request.kind, &request.order_id));
        let message = request
            .message
            .clone()
            .unwrap_or_else(|| request.default_message());
        let notification = Notification::new(
            request.order_id,
            request.customer_id,
            request.kind,
            request.channel,
            subject,
            message,
        );
        notification.validate()?;

        self.deliver(notification).await
    }

    /// Re-sends a notification whose last delivery failed.
    pub async fn retry(&self, id: &NotificationId) -> ServiceResult<Notification> {
        let notification = self.repository.get(id).await?;
        if !notification.is_failed() {
            return Err(NotificationError::NotFailed(id.clone()).into());
        }
        self.deliver(notification).await
    }

    pub async fn for_order(&self, order_id: &OrderId) -> ServiceResult<Vec<Notification>> {
        self.repository.find_by_order(order_id).await
    }

    async fn deliver(&self, mut notification: Notification) -> ServiceResult<Notification> {
        let sender = self
            .senders
            .get(&notification.channel)
            .ok_or(NotificationError::UnsupportedChannel(notification.channel))?;

        match sender.send(&notification).await {
            Ok(()) => {
                notification.mark_sent();
                self.repository.save(notification.clone()).await?;
                tracing::info!(notification_id = %notification.id, "notification sent");
                Ok(notification)
            }
            Err(err) => {
                notification.mark_failed(err.to_string());
                self.repository.save(notification).await?;
                tracing::warn!(error = %err, "notification delivery failed");
                Err(err.into())
            }
        }
    }
}

/// Sender that records what it delivers.
#[derive(Debug)]
pub struct InMemoryNotificationSender {
    channels: Vec<Channel>,
    sent: RwLock<Vec<Notification>>,
    failures_left: AtomicU32,
    attempts: AtomicU32,
}

impl InMemoryNotificationSender {
    pub fn new(channels: impl IntoIterator<Item = Channel>) -> Self {
        Self {
            channels: channels.into_iter().collect(),
            sent: RwLock::new(Vec::new()),
            failures_left: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
        }
    }

    /// Fails the next `count` sends.
    pub fn fail_next_sends(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.read().await.clone()
    }

    pub async fn sent_for(&self, order_id: &OrderId) -> Vec<Notification> {
        self.sent
            .read()
            .await
            .iter()
            .filter(|n| &n.order_id == order_id)
            .cloned()
            .collect()
    }
}

impl Default for InMemoryNotificationSender {
    fn default() -> Self {
        Self::new([Channel::Email, Channel::Sms, Channel::Push])
    }
}

#[async_trait]
impl NotificationSender for InMemoryNotificationSender {
    fn supported_channels(&self) -> Vec<Channel> {
        self.channels.clone()
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(NotificationError::Send(format!(
                "{} provider temporarily unavailable",
                notification.channel
            )));
        }
        self.sent.write().await.push(notification.clone());
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryNotificationRepository {
    notifications: Arc<RwLock<HashMap<NotificationId, Notification>>>,
}

impl InMemoryNotificationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationRepository for InMemoryNotificationRepository {
    async fn save(&self, notification: Notification) -> ServiceResult<()> {
        self.notifications
            .write()
            .await
            .insert(notification.id.clone(), notification);
        Ok(())
    }

    async fn get(&self, id: &NotificationId) -> ServiceResult<Notification> {
        self.notifications
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| NotificationError::NotFound(id.clone()).into())
    }

    async fn find_by_order(&self, order_id: &OrderId) -> ServiceResult<Vec<Notification>> {
        let mut found: Vec<_> = self
            .notifications
            .read()
            .await
            .values()
            .filter(|n| &n.order_id == order_id)
            .cloned()
            .collect();
        found.sort_by_key(|n| n.created_at);
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ServiceError;
    use domain::{DomainError, NotificationStatus};

    fn dispatcher(sender: Arc<InMemoryNotificationSender>) -> NotificationDispatcher {
        NotificationDispatcher::new(Arc::new(InMemoryNotificationRepository::new()))
            .with_sender(sender)
    }

    fn request(kind: NotificationType, channel: Channel) -> NotificationRequest {
        NotificationRequest::new(OrderId::new("o-1"), CustomerId::new("c-1"), kind, channel)
    }

    #[tokio::test]
    async fn fills_default_texts_and_records_sent() {
        let sender = Arc::new(InMemoryNotificationSender::default());
        let dispatcher = dispatcher(sender.clone());

        let n = dispatcher
            .send(request(NotificationType::OrderCancelled, Channel::Email))
            .await
            .unwrap();

        assert_eq!(n.status, NotificationStatus::Sent);
        assert_eq!(n.subject, "Order o-1 cancelled");
        assert!(n.message.starts_with("Your order o-1 has been cancelled as requested."));
        assert_eq!(sender.sent().await.len(), 1);
        assert_eq!(dispatcher.for_order(&OrderId::new("o-1")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unsupported_channel_is_rejected() {
        let sender = Arc::new(InMemoryNotificationSender::new([Channel::Email]));
        let dispatcher = dispatcher(sender.clone());
        assert!(!dispatcher.supports(Channel::Sms));

        let err = dispatcher
            .send(request(NotificationType::OrderConfirmed, Channel::Sms))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ServiceError::Domain(DomainError::Notification(
                NotificationError::UnsupportedChannel(Channel::Sms)
            ))
        );
        assert_eq!(sender.attempts(), 0);
    }

    #[tokio::test]
    async fn blank_message_fails_validation() {
        let dispatcher = dispatcher(Arc::new(InMemoryNotificationSender::default()));
        let err = dispatcher
            .send(request(NotificationType::OrderFailed, Channel::Email).with_message("  "))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Domain(DomainError::Notification(NotificationError::Validation(_)))
        ));
    }

    #[tokio::test]
    async fn failed_delivery_is_recorded_and_retryable() {
        let sender = Arc::new(InMemoryNotificationSender::default());
        let dispatcher = dispatcher(sender.clone());
        sender.fail_next_sends(1);

        let err = dispatcher
            .send(request(NotificationType::OrderConfirmed, Channel::Push))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Domain(DomainError::Notification(NotificationError::Send(_)))
        ));

        let recorded = dispatcher.for_order(&OrderId::new("o-1")).await.unwrap();
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].is_failed());

        let retried = dispatcher.retry(&recorded[0].id).await.unwrap();
        assert_eq!(retried.status, NotificationStatus::Sent);
        assert_eq!(retried.id, recorded[0].id);

        let again = dispatcher.retry(&recorded[0].id).await.unwrap_err();
        assert!(matches!(
            again,
            ServiceError::Domain(DomainError::Notification(NotificationError::NotFailed(_)))
        ));
    }
}
