use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::{AnsiTransactionManager, AsyncPgConnection, RunQueryDsl, TransactionManager};
use shared::{AdmissionError, AdmissionRequest, AdmissionStage, Order, VariantStock};
use tracing::{debug, warn};

use crate::models::{DbOrder, DbStock};
use crate::schema::{orders, stock};

type DbPool = Pool<AsyncPgConnection>;
type PgTxm = AnsiTransactionManager;

/// An admission the ledger committed: the order row plus the stock level
/// left behind, so the cache can be synchronized without a second read.
#[derive(Debug, Clone)]
pub struct AdmittedOrder {
    pub order: Order,
    pub remaining: i64,
}

/// Authoritative store of per-variant stock and the order journal.
///
/// `admit` is the only path that decrements stock and the only path that
/// writes an order, and it does both inside one transaction: a row-locked
/// read, the check, the decrement, and the order insert commit together or
/// not at all. The row lock means concurrent admissions for one variant
/// serialize here even if the distributed lock above fails open.
#[async_trait]
pub trait StockLedger: Send + Sync {
    async fn admit(&self, req: &AdmissionRequest) -> Result<AdmittedOrder, AdmissionError>;

    /// The stock-increase path. Callers must hold the same per-variant
    /// lock as admission.
    async fn provision(&self, variant_id: &str, quantity: i64)
        -> Result<VariantStock, AdmissionError>;

    /// Plain committed read, used by the advisory availability path and
    /// for cache refresh. Takes no row lock.
    async fn quantity(&self, variant_id: &str) -> Result<Option<i64>, AdmissionError>;
}

pub struct PgStockLedger {
    pool: DbPool,
}

impl PgStockLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn admit_in_tx(
        conn: &mut AsyncPgConnection,
        req: &AdmissionRequest,
    ) -> Result<AdmittedOrder, AdmissionError> {
        // Row-exclusive locked read: a concurrent transaction on the same
        // variant blocks here until this transaction resolves.
        let current: DbStock = stock::table
            .filter(stock::variant_id.eq(&req.variant_id))
            .for_update()
            .first(conn)
            .await
            .map_err(|e| AdmissionError::storage(AdmissionStage::CheckStock, e))?;
        debug!(
            variant_id = %req.variant_id,
            available = current.quantity,
            requested = req.quantity,
            stage = %AdmissionStage::CheckStock,
            "stock checked under row lock"
        );

        if current.quantity < req.quantity {
            return Err(AdmissionError::InsufficientStock {
                variant_id: req.variant_id.clone(),
                available: current.quantity,
                requested: req.quantity,
            });
        }

        let now = Utc::now();
        diesel::update(stock::table.filter(stock::variant_id.eq(&req.variant_id)))
            .set((
                stock::quantity.eq(stock::quantity - req.quantity),
                stock::updated_at.eq(now),
            ))
            .execute(conn)
            .await
            .map_err(|e| AdmissionError::storage(AdmissionStage::DecrementStock, e))?;
        debug!(variant_id = %req.variant_id, stage = %AdmissionStage::DecrementStock, "stock decremented");

        let row: DbOrder = diesel::insert_into(orders::table)
            .values(DbOrder::from(Order::admitted(req)))
            .get_result(conn)
            .await
            .map_err(|e| AdmissionError::storage(AdmissionStage::InsertOrder, e))?;
        debug!(order_id = %row.id, stage = %AdmissionStage::InsertOrder, "order journaled");

        Ok(AdmittedOrder {
            remaining: current.quantity - req.quantity,
            order: row.into(),
        })
    }

    async fn provision_in_tx(
        conn: &mut AsyncPgConnection,
        variant_id: &str,
        quantity: i64,
    ) -> Result<VariantStock, AdmissionError> {
        let now = Utc::now();
        // The upsert takes the row lock itself; unknown variants get a
        // fresh row, known ones are incremented in place.
        let row: DbStock = diesel::insert_into(stock::table)
            .values(&DbStock {
                variant_id: variant_id.to_string(),
                quantity,
                created_at: now,
                updated_at: now,
            })
            .on_conflict(stock::variant_id)
            .do_update()
            .set((
                stock::quantity.eq(stock::quantity + quantity),
                stock::updated_at.eq(now),
            ))
            .get_result(conn)
            .await
            .map_err(|e| AdmissionError::storage(AdmissionStage::ProvisionStock, e))?;
        debug!(variant_id, quantity = row.quantity, stage = %AdmissionStage::ProvisionStock, "stock provisioned");

        Ok(row.into())
    }
}

#[async_trait]
impl StockLedger for PgStockLedger {
    async fn admit(&self, req: &AdmissionRequest) -> Result<AdmittedOrder, AdmissionError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AdmissionError::storage(AdmissionStage::BeginTransaction, e))?;
        let conn = &mut *conn;

        PgTxm::begin_transaction(conn)
            .await
            .map_err(|e| AdmissionError::storage(AdmissionStage::BeginTransaction, e))?;
        debug!(variant_id = %req.variant_id, stage = %AdmissionStage::BeginTransaction, "admission transaction open");

        match Self::admit_in_tx(conn, req).await {
            Ok(admitted) => match PgTxm::commit_transaction(conn).await {
                Ok(()) => {
                    debug!(
                        order_id = %admitted.order.order_id,
                        remaining = admitted.remaining,
                        stage = %AdmissionStage::Commit,
                        "admission committed"
                    );
                    Ok(admitted)
                }
                Err(e) => Err(AdmissionError::commit(e)),
            },
            Err(err) => {
                if let Err(rollback_err) = PgTxm::rollback_transaction(conn).await {
                    warn!(
                        variant_id = %req.variant_id,
                        error = %rollback_err,
                        stage = %AdmissionStage::Rollback,
                        "rollback failed after admission error"
                    );
                }
                Err(err)
            }
        }
    }

    async fn provision(
        &self,
        variant_id: &str,
        quantity: i64,
    ) -> Result<VariantStock, AdmissionError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AdmissionError::storage(AdmissionStage::BeginTransaction, e))?;
        let conn = &mut *conn;

        PgTxm::begin_transaction(conn)
            .await
            .map_err(|e| AdmissionError::storage(AdmissionStage::BeginTransaction, e))?;

        match Self::provision_in_tx(conn, variant_id, quantity).await {
            Ok(stock) => match PgTxm::commit_transaction(conn).await {
                Ok(()) => Ok(stock),
                Err(e) => Err(AdmissionError::commit(e)),
            },
            Err(err) => {
                if let Err(rollback_err) = PgTxm::rollback_transaction(conn).await {
                    warn!(
                        variant_id,
                        error = %rollback_err,
                        stage = %AdmissionStage::Rollback,
                        "rollback failed after provisioning error"
                    );
                }
                Err(err)
            }
        }
    }

    async fn quantity(&self, variant_id: &str) -> Result<Option<i64>, AdmissionError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AdmissionError::storage(AdmissionStage::CheckStock, e))?;

        stock::table
            .filter(stock::variant_id.eq(variant_id))
            .select(stock::quantity)
            .first::<i64>(&mut conn)
            .await
            .optional()
            .map_err(|e| AdmissionError::storage(AdmissionStage::CheckStock, e))
    }
}
