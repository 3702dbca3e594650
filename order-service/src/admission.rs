use shared::{AdmissionError, AdmissionRequest, AdmissionStage, Order, StockAvailability, VariantStock};
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::StockCache;
use crate::ledger::StockLedger;
use crate::lock::LockCoordinator;

/// Composes the lock coordinator, the ledger and the cache into the
/// admission path: acquire lock → run the ledger transaction → sync the
/// cache best-effort → release the lock unconditionally.
///
/// All collaborators are injected; an admission attempt owns its whole
/// lock lifecycle through the holder token it acquired.
pub struct OrderAdmission {
    locks: LockCoordinator,
    ledger: Arc<dyn StockLedger>,
    cache: Arc<dyn StockCache>,
}

impl OrderAdmission {
    pub fn new(
        locks: LockCoordinator,
        ledger: Arc<dyn StockLedger>,
        cache: Arc<dyn StockCache>,
    ) -> Self {
        Self {
            locks,
            ledger,
            cache,
        }
    }

    /// Admit one order: exactly one stock mutation attempt, at most one
    /// order row, at most one cache write, one full lock lifecycle.
    ///
    /// Callers impose a deadline by wrapping this future in
    /// `tokio::time::timeout`. Dropping it during the lock wait abandons
    /// nothing; dropping it later cannot run async cleanup, so the open
    /// transaction resolves at the storage layer and the lock is reclaimed
    /// by TTL expiry; the row lock stays authoritative in that window. A
    /// commit that lands before the drop stands.
    pub async fn create_order(&self, req: AdmissionRequest) -> Result<Order, AdmissionError> {
        info!(
            variant_id = %req.variant_id,
            quantity = req.quantity,
            user_id = %req.user_id,
            "incoming order request"
        );

        let token = self.locks.acquire(&req.variant_id).await?;
        let result = self.ledger.admit(&req).await;
        if let Ok(admitted) = &result {
            self.sync_cache(&req.variant_id, admitted.remaining).await;
        }
        self.locks.release(&req.variant_id, &token).await;

        match result {
            Ok(admitted) => {
                info!(
                    order_id = %admitted.order.order_id,
                    variant_id = %req.variant_id,
                    "order admitted"
                );
                Ok(admitted.order)
            }
            Err(err) => {
                warn!(variant_id = %req.variant_id, error = %err, "order admission failed");
                Err(err)
            }
        }
    }

    /// Lock-free advisory read. A hit answers from the cache; a miss (or a
    /// cache read failure) falls through to the ledger and repopulates.
    /// This path never gates an admission; the ledger transaction is the
    /// only authority on whether stock exists.
    pub async fn check_availability(
        &self,
        variant_id: &str,
        requested: i64,
    ) -> Result<StockAvailability, AdmissionError> {
        match self.cache.get(variant_id).await {
            Ok(Some(quantity)) => return Ok(StockAvailability::of(quantity, requested)),
            Ok(None) => {}
            Err(err) => {
                warn!(variant_id, error = %err, "availability cache read failed; reading ledger");
            }
        }

        match self.ledger.quantity(variant_id).await? {
            Some(quantity) => {
                self.sync_cache(variant_id, quantity).await;
                Ok(StockAvailability::of(quantity, requested))
            }
            None => Ok(StockAvailability::unknown_variant()),
        }
    }

    /// Increase stock under the same lock discipline as admission.
    pub async fn provision_stock(
        &self,
        variant_id: &str,
        quantity: i64,
    ) -> Result<VariantStock, AdmissionError> {
        info!(variant_id, quantity, "provisioning stock");

        let token = self.locks.acquire(variant_id).await?;
        let result = self.ledger.provision(variant_id, quantity).await;
        if let Ok(stock) = &result {
            self.sync_cache(variant_id, stock.quantity).await;
        }
        self.locks.release(variant_id, &token).await;
        result
    }

    /// Best-effort cache write: failures are logged and never surfaced.
    async fn sync_cache(&self, variant_id: &str, quantity: i64) {
        if let Err(err) = self.cache.set(variant_id, quantity).await {
            warn!(
                variant_id,
                quantity,
                error = %err,
                stage = %AdmissionStage::SyncCache,
                "failed to update availability cache"
            );
        }
    }
}
