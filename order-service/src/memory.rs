use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{AdmissionError, AdmissionRequest, AdmissionStage, Order, VariantStock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

use crate::ledger::{AdmittedOrder, StockLedger};

struct RowState {
    quantity: i64,
    updated_at: DateTime<Utc>,
}

/// In-memory ledger with the same observable semantics as the Postgres
/// one. Each stock row is guarded by its own async mutex, held from the
/// locked read to the commit point, so admissions for one variant
/// serialize here even when the distributed lock layer fails open.
///
/// Mutations are staged and applied only at the commit point, so an
/// injected failure between the decrement and the order insert leaves the
/// row untouched and writes no order.
#[derive(Default)]
pub struct InMemoryStockLedger {
    rows: Mutex<HashMap<String, Arc<tokio::sync::Mutex<RowState>>>>,
    orders: Mutex<Vec<Order>>,
    fail_next_insert: AtomicBool,
    fail_next_commit: AtomicBool,
    admit_delay_ms: AtomicU64,
}

impl InMemoryStockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite a stock row outside any lock discipline. Test
    /// and bootstrap seeding only.
    pub fn seed(&self, variant_id: &str, quantity: i64) {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        rows.insert(
            variant_id.to_string(),
            Arc::new(tokio::sync::Mutex::new(RowState {
                quantity,
                updated_at: Utc::now(),
            })),
        );
    }

    /// Fail the next order insert after the stock decrement was staged.
    pub fn fail_next_order_insert(&self) {
        self.fail_next_insert.store(true, Ordering::SeqCst);
    }

    /// Fail the next commit after both mutations were staged.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Hold every admission's row lock for `delay` before the stock check,
    /// simulating a transaction that outlives the distributed lock TTL.
    pub fn delay_admissions(&self, delay: Duration) {
        self.admit_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Snapshot of the order journal.
    pub fn orders(&self) -> Vec<Order> {
        self.orders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn row(&self, variant_id: &str) -> Option<Arc<tokio::sync::Mutex<RowState>>> {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        rows.get(variant_id).cloned()
    }

    fn row_or_create(&self, variant_id: &str) -> Arc<tokio::sync::Mutex<RowState>> {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(rows.entry(variant_id.to_string()).or_insert_with(|| {
            Arc::new(tokio::sync::Mutex::new(RowState {
                quantity: 0,
                updated_at: Utc::now(),
            }))
        }))
    }
}

#[async_trait]
impl StockLedger for InMemoryStockLedger {
    async fn admit(&self, req: &AdmissionRequest) -> Result<AdmittedOrder, AdmissionError> {
        let row = self.row(&req.variant_id).ok_or_else(|| {
            AdmissionError::storage(
                AdmissionStage::CheckStock,
                anyhow::anyhow!("no stock row for variant {}", req.variant_id),
            )
        })?;

        // Row lock: held until this admission resolves.
        let mut state = row.lock().await;
        debug!(variant_id = %req.variant_id, stage = %AdmissionStage::BeginTransaction, "admission transaction open");

        let delay_ms = self.admit_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        if state.quantity < req.quantity {
            return Err(AdmissionError::InsufficientStock {
                variant_id: req.variant_id.clone(),
                available: state.quantity,
                requested: req.quantity,
            });
        }

        // Staged: nothing is visible until the commit point below.
        let remaining = state.quantity - req.quantity;

        if self.fail_next_insert.swap(false, Ordering::SeqCst) {
            return Err(AdmissionError::storage(
                AdmissionStage::InsertOrder,
                anyhow::anyhow!("injected order insert failure"),
            ));
        }
        let order = Order::admitted(req);

        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(AdmissionError::commit(anyhow::anyhow!(
                "injected commit failure"
            )));
        }

        // Commit point: both mutations land while the row lock is held.
        state.quantity = remaining;
        state.updated_at = order.created_at;
        self.orders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(order.clone());
        debug!(order_id = %order.order_id, remaining, stage = %AdmissionStage::Commit, "admission committed");

        Ok(AdmittedOrder { order, remaining })
    }

    async fn provision(
        &self,
        variant_id: &str,
        quantity: i64,
    ) -> Result<VariantStock, AdmissionError> {
        let row = self.row_or_create(variant_id);
        let mut state = row.lock().await;
        state.quantity += quantity;
        state.updated_at = Utc::now();
        debug!(variant_id, quantity = state.quantity, stage = %AdmissionStage::ProvisionStock, "stock provisioned");
        Ok(VariantStock {
            variant_id: variant_id.to_string(),
            quantity: state.quantity,
            updated_at: state.updated_at,
        })
    }

    async fn quantity(&self, variant_id: &str) -> Result<Option<i64>, AdmissionError> {
        match self.row(variant_id) {
            Some(row) => {
                // Blocks while an admission holds the row, so only
                // committed values are ever observed.
                let state = row.lock().await;
                Ok(Some(state.quantity))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    fn request(variant_id: &str, quantity: i64) -> AdmissionRequest {
        AdmissionRequest {
            variant_id: variant_id.to_string(),
            quantity,
            user_id: "user-1".to_string(),
            total: BigDecimal::from(10),
        }
    }

    #[tokio::test]
    async fn admit_decrements_stock_and_journals_order() {
        let ledger = InMemoryStockLedger::new();
        ledger.seed("v1", 5);

        let admitted = ledger.admit(&request("v1", 2)).await.unwrap();
        assert_eq!(admitted.remaining, 3);
        assert_eq!(ledger.quantity("v1").await.unwrap(), Some(3));
        assert_eq!(ledger.orders().len(), 1);
        assert_eq!(ledger.orders()[0].order_id, admitted.order.order_id);
    }

    #[tokio::test]
    async fn insufficient_stock_leaves_everything_untouched() {
        let ledger = InMemoryStockLedger::new();
        ledger.seed("v1", 1);

        let err = ledger.admit(&request("v1", 2)).await.unwrap_err();
        match err {
            AdmissionError::InsufficientStock {
                available,
                requested,
                ..
            } => {
                assert_eq!(available, 1);
                assert_eq!(requested, 2);
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
        assert_eq!(ledger.quantity("v1").await.unwrap(), Some(1));
        assert!(ledger.orders().is_empty());
    }

    #[tokio::test]
    async fn missing_stock_row_is_a_storage_error() {
        let ledger = InMemoryStockLedger::new();
        let err = ledger.admit(&request("ghost", 1)).await.unwrap_err();
        assert!(matches!(
            err,
            AdmissionError::Storage {
                stage: AdmissionStage::CheckStock,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn provision_creates_then_increments() {
        let ledger = InMemoryStockLedger::new();
        let stock = ledger.provision("v1", 10).await.unwrap();
        assert_eq!(stock.quantity, 10);
        let stock = ledger.provision("v1", 5).await.unwrap();
        assert_eq!(stock.quantity, 15);
        assert_eq!(ledger.quantity("v1").await.unwrap(), Some(15));
    }
}
