//! Default customer-facing texts.

use common::{OrderId, PaymentId};

use super::NotificationType;

pub fn subject_for(kind: NotificationType, order_id: &OrderId) -> String {
    match kind {
        NotificationType::OrderConfirmed => format!("Order {order_id} confirmed"),
        NotificationType::OrderFailed => format!("Order {order_id} could not be processed"),
        NotificationType::OrderCancelled => format!("Order {order_id} cancelled"),
        NotificationType::PaymentFailed => format!("Payment for order {order_id} failed"),
    }
}

pub fn confirmation_message(order_id: &OrderId, payment_id: Option<&PaymentId>) -> String {
    match payment_id {
        Some(payment_id) => format!(
            "Your order {order_id} has been successfully processed (Payment ID: {payment_id}). Thank you for your purchase!"
        ),
        None => format!(
            "Your order {order_id} has been successfully processed. Thank you for your purchase!"
        ),
    }
}

pub fn failure_message(order_id: &OrderId, reason: Option<&str>) -> String {
    match reason.filter(|r| !r.is_empty()) {
        Some(reason) => format!(
            "Unfortunately, your order {order_id} could not be processed: {reason}. Please contact our support team for assistance."
        ),
        None => format!(
            "Unfortunately, your order {order_id} could not be processed. Please contact our support team for assistance."
        ),
    }
}

pub fn cancellation_message(order_id: &OrderId) -> String {
    format!(
        "Your order {order_id} has been cancelled as requested. If you have any questions, please contact our support team."
    )
}
