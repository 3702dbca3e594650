use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// A validated order request handed over by the gateway. `user_id` has
/// already been authenticated upstream and is trusted here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionRequest {
    pub variant_id: String,
    pub quantity: i64,
    pub user_id: String,
    pub total: BigDecimal,
}

/// An admitted order. Written in the same transaction as the stock
/// decrement and immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: Uuid,
    pub variant_id: String,
    pub quantity: i64,
    pub total: BigDecimal,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Build the order row for an admission that passed the stock check.
    pub fn admitted(req: &AdmissionRequest) -> Self {
        let now = Utc::now();
        Self {
            order_id: Uuid::new_v4(),
            variant_id: req.variant_id.clone(),
            quantity: req.quantity,
            total: req.total.clone(),
            user_id: req.user_id.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Authoritative stock level for one purchasable variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantStock {
    pub variant_id: String,
    pub quantity: i64,
    pub updated_at: DateTime<Utc>,
}

/// Advisory availability answer. Served from the cache when possible and
/// never authoritative: the admission transaction re-checks the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockAvailability {
    pub is_available: bool,
    pub available_quantity: i64,
}

impl StockAvailability {
    pub fn of(available: i64, requested: i64) -> Self {
        Self {
            is_available: available >= requested,
            available_quantity: available,
        }
    }

    pub fn unknown_variant() -> Self {
        Self {
            is_available: false,
            available_quantity: 0,
        }
    }
}

/// Steps of one admission attempt, in execution order. Failed steps are
/// carried inside `AdmissionError::Storage` so callers and logs see where
/// an attempt died without parsing message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdmissionStage {
    AcquireLock,
    BeginTransaction,
    CheckStock,
    DecrementStock,
    InsertOrder,
    ProvisionStock,
    Commit,
    Rollback,
    SyncCache,
    ReleaseLock,
}

impl std::fmt::Display for AdmissionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AdmissionStage::AcquireLock => "acquire-lock",
            AdmissionStage::BeginTransaction => "begin-transaction",
            AdmissionStage::CheckStock => "check-stock",
            AdmissionStage::DecrementStock => "decrement-stock",
            AdmissionStage::InsertOrder => "insert-order",
            AdmissionStage::ProvisionStock => "provision-stock",
            AdmissionStage::Commit => "commit",
            AdmissionStage::Rollback => "rollback",
            AdmissionStage::SyncCache => "sync-cache",
            AdmissionStage::ReleaseLock => "release-lock",
        };
        f.write_str(name)
    }
}

/// Everything an admission can fail with, as distinct kinds rather than
/// strings. The HTTP boundary maps these to status codes; nothing anywhere
/// matches on message text.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    /// The per-variant lock could not be acquired within the retry budget.
    /// Transient: the caller may retry the whole call.
    #[error("timed out acquiring admission lock for variant {variant_id} after {waited:?}")]
    LockTimeout { variant_id: String, waited: Duration },

    /// The ledger does not hold enough stock. A permanent business
    /// rejection that must not be blindly retried.
    #[error(
        "insufficient stock for variant {variant_id}: available {available}, requested {requested}"
    )]
    InsufficientStock {
        variant_id: String,
        available: i64,
        requested: i64,
    },

    /// A query or connectivity failure at some stage before commit. The
    /// transaction was rolled back; retrying is the caller's decision.
    #[error("storage failure during {stage}")]
    Storage {
        stage: AdmissionStage,
        #[source]
        source: anyhow::Error,
    },

    /// The final commit failed. No mutation is visible.
    #[error("failed to commit admission transaction")]
    Commit {
        #[source]
        source: anyhow::Error,
    },
}

impl AdmissionError {
    pub fn storage(stage: AdmissionStage, source: impl Into<anyhow::Error>) -> Self {
        Self::Storage {
            stage,
            source: source.into(),
        }
    }

    pub fn commit(source: impl Into<anyhow::Error>) -> Self {
        Self::Commit {
            source: source.into(),
        }
    }
}
