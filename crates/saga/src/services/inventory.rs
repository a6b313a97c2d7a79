//! Inventory port and in-memory implementation.
//!
//! Every product owns its own lock. Operations that touch several
//! products acquire those locks in ascending product id order, so two
//! concurrent multi-product reservations cannot deadlock and each
//! product's check-then-write is atomic.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{OrderId, ProductId};
use domain::{InventoryError, OrderItem, Product, Reservation, UnavailableItem};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::{ServiceError, ServiceResult};

/// Result of an all-or-nothing reservation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationOutcome {
    pub available: bool,
    /// Reservations now held for the order; empty when unavailable.
    pub reservations: Vec<Reservation>,
    pub unavailable: Vec<UnavailableItem>,
}

#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Reserves every line or none of them.
    ///
    /// Calling again for an order that already holds reservations only
    /// reserves the difference.
    async fn check_and_reserve(
        &self,
        order_id: &OrderId,
        items: &[OrderItem],
    ) -> ServiceResult<ReservationOutcome>;

    /// Releases every reservation of the order. Returns how many were
    /// released; releasing an order without reservations is a no-op.
    async fn release(&self, order_id: &OrderId) -> ServiceResult<usize>;

    /// Converts the order's reservations into sold stock.
    ///
    /// Every line must be covered by a reservation of exactly its quantity,
    /// otherwise nothing is sold. Confirming lines that were already sold
    /// for the order succeeds without selling again.
    async fn confirm(&self, order_id: &OrderId, items: &[OrderItem]) -> ServiceResult<()>;

    /// Releases reservations expired at `now`. Returns how many were released.
    async fn release_expired(&self, now: DateTime<Utc>) -> ServiceResult<usize>;

    async fn product(&self, product_id: &ProductId) -> ServiceResult<Product>;

    async fn reservations_for(&self, order_id: &OrderId) -> ServiceResult<Vec<Reservation>>;
}

#[derive(Debug)]
struct StockEntry {
    product: Product,
    reservations: HashMap<OrderId, Reservation>,
    /// Units sold per order.
    sales: HashMap<OrderId, u32>,
}

type EntryRef = Arc<Mutex<StockEntry>>;

pub struct InMemoryInventoryService {
    products: RwLock<HashMap<ProductId, EntryRef>>,
    ttl: Duration,
    fail_on_confirm: AtomicBool,
    unavailable: AtomicBool,
}

impl InMemoryInventoryService {
    pub fn new(ttl: Duration) -> Self {
        Self {
            products: RwLock::new(HashMap::new()),
            ttl,
            fail_on_confirm: AtomicBool::new(false),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn with_products(ttl: Duration, products: impl IntoIterator<Item = Product>) -> Self {
        let products = products
            .into_iter()
            .map(|p| {
                let entry = StockEntry {
                    product: p,
                    reservations: HashMap::new(),
                    sales: HashMap::new(),
                };
                (entry.product.id.clone(), Arc::new(Mutex::new(entry)))
            })
            .collect();
        Self {
            products: RwLock::new(products),
            ..Self::new(ttl)
        }
    }

    /// Adds a product or replaces its stock record, dropping its reservations
    /// and sales.
    pub async fn upsert_product(&self, product: Product) {
        let entry = StockEntry {
            product,
            reservations: HashMap::new(),
            sales: HashMap::new(),
        };
        self.products
            .write()
            .await
            .insert(entry.product.id.clone(), Arc::new(Mutex::new(entry)));
    }

    pub async fn restock(&self, product_id: &ProductId, quantity: u32) -> ServiceResult<()> {
        let entry = self.entry(product_id).await?;
        entry.lock().await.product.restock(quantity);
        Ok(())
    }

    /// Makes `confirm` fail as if stock bookkeeping broke after payment.
    pub fn set_fail_on_confirm(&self, fail: bool) {
        self.fail_on_confirm.store(fail, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Total number of live reservations.
    pub async fn reservation_count(&self) -> usize {
        let mut count = 0;
        for entry in self.all_entries().await {
            count += entry.lock().await.reservations.len();
        }
        count
    }

    fn check_available(&self) -> ServiceResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable("inventory store offline".into()));
        }
        Ok(())
    }

    async fn entry(&self, product_id: &ProductId) -> ServiceResult<EntryRef> {
        self.products
            .read()
            .await
            .get(product_id)
            .cloned()
            .ok_or_else(|| InventoryError::ProductNotFound(product_id.clone()).into())
    }

    /// Snapshot of every entry in ascending product id order.
    async fn all_entries(&self) -> Vec<EntryRef> {
        let products = self.products.read().await;
        let mut ids: Vec<_> = products.keys().collect();
        ids.sort();
        ids.into_iter().map(|id| products[id].clone()).collect()
    }
}

impl Default for InMemoryInventoryService {
    fn default() -> Self {
        Self::new(domain::inventory::default_reservation_ttl())
    }
}

/// Sums quantities per product, ordered by product id.
fn merge_lines(items: &[OrderItem]) -> BTreeMap<ProductId, u32> {
    let mut merged = BTreeMap::new();
    for item in items {
        *merged.entry(item.product_id.clone()).or_insert(0) += item.quantity;
    }
    merged
}

#[async_trait]
impl InventoryService for InMemoryInventoryService {
    #[tracing::instrument(skip(self, items), fields(order_id = %order_id))]
    async fn check_and_reserve(
        &self,
        order_id: &OrderId,
        items: &[OrderItem],
    ) -> ServiceResult<ReservationOutcome> {
        self.check_available()?;

        let wanted = merge_lines(items);
        for (product_id, quantity) in &wanted {
            if *quantity == 0 {
                return Err(InventoryError::InvalidQuantity {
                    product_id: product_id.clone(),
                    quantity: *quantity,
                }
                .into());
            }
        }

        let mut unavailable = Vec::new();
        let mut found = Vec::with_capacity(wanted.len());
        {
            let products = self.products.read().await;
            for (product_id, quantity) in &wanted {
                match products.get(product_id) {
                    Some(entry) => found.push((product_id.clone(), *quantity, entry.clone())),
                    None => unavailable.push(UnavailableItem {
                        product_id: product_id.clone(),
                        requested: *quantity,
                        available: 0,
                    }),
                }
            }
        }

        // BTreeMap iteration keeps `found` sorted, which fixes the lock order.
        let mut guards: Vec<(ProductId, u32, OwnedMutexGuard<StockEntry>)> =
            Vec::with_capacity(found.len());
        for (product_id, quantity, entry) in found {
            guards.push((product_id, quantity, entry.lock_owned().await));
        }

        for (product_id, quantity, guard) in &guards {
            let held = guard
                .reservations
                .get(order_id)
                .map(|r| r.quantity)
                .unwrap_or(0);
            let missing = quantity.saturating_sub(held);
            if guard.product.free() < missing {
                unavailable.push(UnavailableItem {
                    product_id: product_id.clone(),
                    requested: *quantity,
                    available: guard.product.free() + held,
                });
            }
        }

        if !unavailable.is_empty() {
            unavailable.sort_by(|a, b| a.product_id.cmp(&b.product_id));
            tracing::warn!(unavailable = unavailable.len(), "inventory unavailable");
            return Ok(ReservationOutcome {
                available: false,
                reservations: Vec::new(),
                unavailable,
            });
        }

        let mut reservations = Vec::with_capacity(guards.len());
        for (product_id, quantity, mut guard) in guards {
            let held = guard
                .reservations
                .get(order_id)
                .map(|r| r.quantity)
                .unwrap_or(0);
            if quantity > held {
                guard.product.reserve(quantity - held)?;
            } else if quantity < held {
                guard.product.release(held - quantity);
            }
            let reservation = match guard.reservations.get(order_id) {
                Some(existing) if existing.quantity == quantity => existing.clone(),
                _ => Reservation::new(order_id.clone(), product_id, quantity, self.ttl),
            };
            guard
                .reservations
                .insert(order_id.clone(), reservation.clone());
            reservations.push(reservation);
        }

        tracing::info!(reservations = reservations.len(), "inventory reserved");
        Ok(ReservationOutcome {
            available: true,
            reservations,
            unavailable: Vec::new(),
        })
    }

    #[tracing::instrument(skip(self), fields(order_id = %order_id))]
    async fn release(&self, order_id: &OrderId) -> ServiceResult<usize> {
        self.check_available()?;
        let mut released = 0;
        for entry in self.all_entries().await {
            let mut guard = entry.lock().await;
            if let Some(reservation) = guard.reservations.remove(order_id) {
                guard.product.release(reservation.quantity);
                released += 1;
            }
        }
        if released > 0 {
            tracing::info!(released, "reservations released");
        }
        Ok(released)
    }

    #[tracing::instrument(skip(self, items), fields(order_id = %order_id))]
    async fn confirm(&self, order_id: &OrderId, items: &[OrderItem]) -> ServiceResult<()> {
        self.check_available()?;
        if self.fail_on_confirm.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable(
                "stock ledger rejected the sale".into(),
            ));
        }

        let wanted = merge_lines(items);
        let mut guards = Vec::with_capacity(wanted.len());
        for (product_id, quantity) in wanted {
            let entry = self.entry(&product_id).await?;
            guards.push((quantity, entry.lock_owned().await));
        }

        if guards
            .iter()
            .all(|(quantity, guard)| guard.sales.get(order_id) == Some(quantity))
        {
            return Ok(());
        }
        if guards
            .iter()
            .all(|(_, guard)| !guard.reservations.contains_key(order_id))
        {
            return Err(InventoryError::ReservationNotFound(order_id.clone()).into());
        }

        for (quantity, guard) in &guards {
            let held = guard
                .reservations
                .get(order_id)
                .map(|r| r.quantity)
                .unwrap_or(0);
            if held != *quantity {
                return Err(InventoryError::ReservationMismatch {
                    product_id: guard.product.id.clone(),
                    expected: *quantity,
                    held,
                }
                .into());
            }
            if guard.product.available < held {
                return Err(InventoryError::InsufficientStock {
                    product_id: guard.product.id.clone(),
                    requested: held,
                    available: guard.product.available,
                }
                .into());
            }
        }
        for (quantity, mut guard) in guards {
            guard.reservations.remove(order_id);
            guard.product.sell(quantity)?;
            guard.sales.insert(order_id.clone(), quantity);
        }

        tracing::info!("reservations confirmed as sold");
        Ok(())
    }

    async fn release_expired(&self, now: DateTime<Utc>) -> ServiceResult<usize> {
        self.check_available()?;
        let mut released = 0;
        for entry in self.all_entries().await {
            let mut guard = entry.lock().await;
            let expired: Vec<_> = guard
                .reservations
                .values()
                .filter(|r| r.is_expired(now))
                .map(|r| r.order_id.clone())
                .collect();
            for order_id in expired {
                if let Some(reservation) = guard.reservations.remove(&order_id) {
                    guard.product.release(reservation.quantity);
                    tracing::info!(
                        order_id = %order_id,
                        product_id = %reservation.product_id,
                        quantity = reservation.quantity,
                        "expired reservation released"
                    );
                    released += 1;
                }
            }
        }
        Ok(released)
    }

    async fn product(&self, product_id: &ProductId) -> ServiceResult<Product> {
        self.check_available()?;
        let entry = self.entry(product_id).await?;
        let product = entry.lock().await.product.clone();
        Ok(product)
    }

    async fn reservations_for(&self, order_id: &OrderId) -> ServiceResult<Vec<Reservation>> {
        self.check_available()?;
        let mut reservations = Vec::new();
        for entry in self.all_entries().await {
            if let Some(r) = entry.lock().await.reservations.get(order_id) {
                reservations.push(r.clone());
            }
        }
        Ok(reservations)
    }
}
