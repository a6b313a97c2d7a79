//! Background release of expired reservations.
//!
//! Sagas that never finish (a crashed process, a run aborted by a journal
//! error) leave their reservations behind. The sweeper returns that stock
//! through the same release path the sagas use, so a saga and the sweeper
//! releasing the same order is harmless.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::services::InventoryService;

#[derive(Clone)]
pub struct ReservationSweeper {
    inventory: Arc<dyn InventoryService>,
    interval: Duration,
}

impl ReservationSweeper {
    pub fn new(inventory: Arc<dyn InventoryService>, interval: Duration) -> Self {
        Self {
            inventory,
            interval,
        }
    }

    /// Releases reservations expired at `now`. Returns how many were released.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> usize {
        match self.inventory.release_expired(now).await {
            Ok(0) => 0,
            Ok(released) => {
                metrics::counter!("reservations_expired_total").increment(released as u64);
                tracing::info!(released, "expired reservations released");
                released
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to release expired reservations");
                0
            }
        }
    }

    /// Sweeps on every tick until `shutdown` turns true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "reservation sweeper started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.sweep_once(Utc::now()).await;
                }
            }
        }

        tracing::info!("reservation sweeper stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::InMemoryInventoryService;
    use common::{OrderId, ProductId};
    use domain::{Money, OrderItem, Product};

    async fn inventory_with_reservation(ttl: chrono::Duration) -> Arc<InMemoryInventoryService> {
        let inventory = Arc::new(InMemoryInventoryService::new(ttl));
        inventory
            .upsert_product(Product::new("SKU-1", "Widget", Money::from_cents(100), 10))
            .await;
        inventory
            .check_and_reserve(
                &OrderId::new("o-1"),
                &[OrderItem::new("SKU-1", 4, Money::from_cents(100))],
            )
            .await
            .unwrap();
        inventory
    }

    #[tokio::test]
    async fn sweep_releases_only_expired() {
        let inventory = inventory_with_reservation(chrono::Duration::minutes(30)).await;
        let sweeper = ReservationSweeper::new(inventory.clone(), Duration::from_secs(60));

        assert_eq!(sweeper.sweep_once(Utc::now()).await, 0);
        assert_eq!(inventory.reservation_count().await, 1);

        let later = Utc::now() + chrono::Duration::minutes(31);
        assert_eq!(sweeper.sweep_once(later).await, 1);
        let product = inventory.product(&ProductId::new("SKU-1")).await.unwrap();
        assert_eq!(product.reserved, 0);
        assert_eq!(product.available, 10);
    }

    #[tokio::test]
    async fn background_sweeper_stops_on_shutdown() {
        let inventory = inventory_with_reservation(chrono::Duration::zero()).await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = ReservationSweeper::new(inventory.clone(), Duration::from_millis(5))
            .spawn(shutdown_rx);

        for _ in 0..100 {
            if inventory.reservation_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(inventory.reservation_count().await, 0);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
