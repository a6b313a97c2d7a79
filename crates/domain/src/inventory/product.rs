use chrono::{DateTime, Utc};
use common::ProductId;
use serde::{Deserialize, Serialize};

use super::InventoryError;
use crate::order::Money;

/// Stock record for one product.
///
/// `reserved` never exceeds `available`: reservations only draw from the
/// free remainder, and a sale removes the units from both counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    pub available: u32,
    pub reserved: u32,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn new(id: impl Into<ProductId>, name: impl Into<String>, price: Money, available: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
            available,
            reserved: 0,
            updated_at: Utc::now(),
        }
    }

    /// Units that are in stock and not held by any reservation.
    pub fn free(&self) -> u32 {
        self.available.saturating_sub(self.reserved)
    }

    pub fn can_reserve(&self, quantity: u32) -> bool {
        quantity > 0 && self.free() >= quantity
    }

    pub fn reserve(&mut self, quantity: u32) -> Result<(), InventoryError> {
        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity {
                product_id: self.id.clone(),
                quantity,
            });
        }
        if self.free() < quantity {
            return Err(InventoryError::InsufficientStock {
                product_id: self.id.clone(),
                requested: quantity,
                available: self.free(),
            });
        }
        self.reserved += quantity;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Returns held units to the free pool.
    pub fn release(&mut self, quantity: u32) {
        self.reserved = self.reserved.saturating_sub(quantity);
        self.updated_at = Utc::now();
    }

    /// Turns held units into a permanent decrement of stock.
    pub fn sell(&mut self, quantity: u32) -> Result<(), InventoryError> {
        if self.available < quantity {
            return Err(InventoryError::InsufficientStock {
                product_id: self.id.clone(),
                requested: quantity,
                available: self.available,
            });
        }
        self.available -= quantity;
        self.reserved = self.reserved.saturating_sub(quantity).min(self.available);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn restock(&mut self, quantity: u32) {
        self.available += quantity;
        self.updated_at = Utc::now();
    }
}
