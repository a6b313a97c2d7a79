//! Cross-entity flows over the pure domain types.

use common::{CustomerId, OrderId};
use domain::{
    ChargeRequest, InventoryError, Money, Order, OrderItem, OrderStatus, Payment, PaymentStatus,
    Product,
};

fn order_for(items: Vec<OrderItem>) -> Order {
    Order::new(OrderId::generate(), CustomerId::new("cust-42"), items).unwrap()
}

#[test]
fn happy_path_reserves_sells_and_completes() {
    let mut widget = Product::new("SKU-1", "Widget", Money::from_cents(2000), 50);
    let mut order = order_for(vec![OrderItem::new("SKU-1", 5, widget.price)]);

    order.update_status(OrderStatus::Validating).unwrap();
    widget.reserve(5).unwrap();
    assert_eq!(widget.reserved, 5);

    order.update_status(OrderStatus::Payment).unwrap();
    let mut payment = Payment::new(&ChargeRequest {
        order_id: order.id.clone(),
        customer_id: order.customer_id.clone(),
        amount: order.total,
        currency: "USD".into(),
        method: "card".into(),
    });
    payment.complete("TXN-0001").unwrap();
    widget.sell(5).unwrap();
    order.attach_payment(payment.id.clone());
    order.update_status(OrderStatus::Completed).unwrap();

    assert_eq!(order.total, Money::from_cents(10_000));
    assert_eq!(widget.available, 45);
    assert_eq!(widget.reserved, 0);
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(order.payment_id, Some(payment.id));
}

#[test]
fn out_of_stock_fails_order_without_reservation() {
    let mut gadget = Product::new("SKU-2", "Gadget", Money::from_cents(500), 0);
    let mut order = order_for(vec![OrderItem::new("SKU-2", 1, gadget.price)]);

    order.update_status(OrderStatus::Validating).unwrap();
    let err = gadget.reserve(1).unwrap_err();
    assert!(matches!(err, InventoryError::InsufficientStock { .. }));

    order.set_failure(err.to_string()).unwrap();
    assert_eq!(order.status, OrderStatus::Failed);
    assert_eq!(gadget.reserved, 0);
}

#[test]
fn cancelling_after_payment_refunds_and_releases() {
    let mut widget = Product::new("SKU-1", "Widget", Money::from_cents(100), 10);
    let mut order = order_for(vec![OrderItem::new("SKU-1", 2, widget.price)]);
    order.update_status(OrderStatus::Validating).unwrap();
    widget.reserve(2).unwrap();
    order.update_status(OrderStatus::Payment).unwrap();

    let mut payment = Payment::new(&ChargeRequest {
        order_id: order.id.clone(),
        customer_id: order.customer_id.clone(),
        amount: order.total,
        currency: "USD".into(),
        method: "card".into(),
    });
    payment.complete("TXN-1").unwrap();

    payment.refund().unwrap();
    widget.release(2);
    order.cancel().unwrap();

    assert_eq!(payment.status, PaymentStatus::Refunded);
    assert_eq!(widget.reserved, 0);
    assert_eq!(widget.available, 10);
    assert_eq!(order.status, OrderStatus::Cancelled);
}
