use chrono::{DateTime, Duration, Utc};
use common::{OrderId, ProductId, ReservationId};
use serde::{Deserialize, Serialize};

/// How long a reservation holds stock before the sweeper reclaims it.
pub fn default_reservation_ttl() -> Duration {
    Duration::minutes(30)
}

/// Stock held for one (order, product) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    pub fn new(order_id: OrderId, product_id: ProductId, quantity: u32, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: ReservationId::generate(),
            order_id,
            product_id,
            quantity,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A requested line that could not be reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnavailableItem {
    pub product_id: ProductId,
    pub requested: u32,
    /// Free units at check time; zero for unknown products.
    pub available: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservation_expires_after_ttl() {
        let r = Reservation::new(
            OrderId::new("ord-1"),
            ProductId::new("SKU-1"),
            2,
            default_reservation_ttl(),
        );
        assert!(!r.is_expired(Utc::now()));
        assert!(r.is_expired(r.expires_at));
        assert!(r.is_expired(Utc::now() + Duration::minutes(31)));
    }
}
