use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Best-effort mirror of available quantity, read by the advisory
/// availability path. Never authoritative: admission always re-checks the
/// ledger under its row lock, so a stale or missing entry can only cost an
/// extra ledger read, never an oversell.
#[async_trait]
pub trait StockCache: Send + Sync {
    async fn get(&self, variant_id: &str) -> anyhow::Result<Option<i64>>;
    async fn set(&self, variant_id: &str, quantity: i64) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct InMemoryStockCache {
    entries: Mutex<HashMap<String, i64>>,
}

impl InMemoryStockCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StockCache for InMemoryStockCache {
    async fn get(&self, variant_id: &str) -> anyhow::Result<Option<i64>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("stock cache mutex poisoned"))?;
        Ok(entries.get(variant_id).copied())
    }

    async fn set(&self, variant_id: &str, quantity: i64) -> anyhow::Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("stock cache mutex poisoned"))?;
        entries.insert(variant_id.to_string(), quantity);
        Ok(())
    }
}
