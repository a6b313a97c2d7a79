use domain::Notification;

use crate::error::StepError;
use crate::order_fulfillment::Step;
use crate::services::{NotificationDispatcher, NotificationRequest};

/// Sends one customer notification through the dispatcher.
#[derive(Clone)]
pub struct SendNotification {
    notifications: NotificationDispatcher,
}

impl SendNotification {
    pub fn new(notifications: NotificationDispatcher) -> Self {
        Self { notifications }
    }

    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id, kind = %request.kind))]
    pub async fn execute(&self, request: NotificationRequest) -> Result<Notification, StepError> {
        self.notifications
            .send(request)
            .await
            .map_err(|e| StepError::service(Step::SendNotification, &e))
    }
}
