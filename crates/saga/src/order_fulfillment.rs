//! Constants and step definitions for the order fulfillment saga.

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

pub const SAGA_TYPE: &str = "OrderFulfillment";

/// Signal that asks a running saga to cancel its order.
pub const SIGNAL_CANCEL_ORDER: &str = "cancel-order";

pub const QUERY_ORDER_STATUS: &str = "order-status";
pub const QUERY_WORKFLOW_STATE: &str = "workflow-state";
pub const QUERY_STEP_HISTORY: &str = "step-history";
pub const QUERY_PROGRESS: &str = "progress";

pub const DEFAULT_CURRENCY: &str = "USD";
pub const DEFAULT_PAYMENT_METHOD: &str = "card";

pub const MESSAGE_COMPLETED: &str = "Order processed successfully";
pub const MESSAGE_CANCELLED: &str = "Order was cancelled";

/// Steps of the saga, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    CreateOrder,
    CheckInventory,
    ProcessPayment,
    SendNotification,
    Complete,
}

impl Step {
    pub const ALL: [Step; 5] = [
        Step::CreateOrder,
        Step::CheckInventory,
        Step::ProcessPayment,
        Step::SendNotification,
        Step::Complete,
    ];

    pub const TOTAL: u32 = Self::ALL.len() as u32;

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::CreateOrder => "create_order",
            Step::CheckInventory => "check_inventory",
            Step::ProcessPayment => "process_payment",
            Step::SendNotification => "send_notification",
            Step::Complete => "complete",
        }
    }

    /// One-based position used for progress reporting.
    pub fn index(&self) -> u32 {
        match self {
            Step::CreateOrder => 1,
            Step::CheckInventory => 2,
            Step::ProcessPayment => 3,
            Step::SendNotification => 4,
            Step::Complete => 5,
        }
    }

    pub fn next(&self) -> Option<Step> {
        match self {
            Step::CreateOrder => Some(Step::CheckInventory),
            Step::CheckInventory => Some(Step::ProcessPayment),
            Step::ProcessPayment => Some(Step::SendNotification),
            Step::SendNotification => Some(Step::Complete),
            Step::Complete => None,
        }
    }

    /// Cancellation is honored only until the customer has been notified.
    pub fn accepts_cancellation(&self) -> bool {
        matches!(
            self,
            Step::CreateOrder | Step::CheckInventory | Step::ProcessPayment
        )
    }

    /// Error code reported when this step fails for a step-specific reason.
    pub fn failure_code(&self) -> ErrorCode {
        match self {
            Step::CreateOrder | Step::Complete => ErrorCode::InternalError,
            Step::CheckInventory => ErrorCode::InventoryUnavailable,
            Step::ProcessPayment => ErrorCode::PaymentFailed,
            Step::SendNotification => ErrorCode::NotificationFailed,
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
