use bigdecimal::BigDecimal;
use futures::future::join_all;
use order_service::admission::OrderAdmission;
use order_service::cache::InMemoryStockCache;
use order_service::ledger::StockLedger;
use order_service::lock::{InMemoryLockStore, LockConfig, LockCoordinator, LockStore};
use order_service::memory::InMemoryStockLedger;
use shared::{AdmissionError, AdmissionRequest};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn request(variant_id: &str, quantity: i64) -> AdmissionRequest {
    AdmissionRequest {
        variant_id: variant_id.to_string(),
        quantity,
        user_id: "user-1".to_string(),
        total: BigDecimal::from(8 * quantity),
    }
}

/// Tight retry interval with a deep budget, so heavily contended storms
/// resolve quickly without spurious timeouts.
fn storm_lock_config() -> LockConfig {
    LockConfig {
        retry_interval: Duration::from_millis(1),
        max_attempts: 10_000,
        ..LockConfig::default()
    }
}

fn admission(
    store: Arc<InMemoryLockStore>,
    ledger: Arc<InMemoryStockLedger>,
    config: LockConfig,
) -> Arc<OrderAdmission> {
    Arc::new(OrderAdmission::new(
        LockCoordinator::new(store, config),
        ledger,
        Arc::new(InMemoryStockCache::new()),
    ))
}

#[tokio::test(flavor = "multi_thread")]
async fn oversell_storm_admits_exactly_the_seeded_stock() {
    let ledger = Arc::new(InMemoryStockLedger::new());
    ledger.seed("v1", 100);
    let admission = admission(
        Arc::new(InMemoryLockStore::new()),
        Arc::clone(&ledger),
        storm_lock_config(),
    );

    let tasks: Vec<_> = (0..110)
        .map(|_| {
            let admission = Arc::clone(&admission);
            tokio::spawn(async move { admission.create_order(request("v1", 1)).await })
        })
        .collect();

    let mut admitted = 0;
    let mut rejected = 0;
    for result in join_all(tasks).await {
        match result.unwrap() {
            Ok(_) => admitted += 1,
            Err(AdmissionError::InsufficientStock { .. }) => rejected += 1,
            Err(other) => panic!("unexpected admission error: {other:?}"),
        }
    }

    assert_eq!(admitted, 100);
    assert_eq!(rejected, 10);
    assert_eq!(ledger.quantity("v1").await.unwrap(), Some(0));
    assert_eq!(ledger.orders().len(), 100);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_admissions_conserve_stock_and_never_go_negative() {
    let ledger = Arc::new(InMemoryStockLedger::new());
    ledger.seed("v1", 50);
    let admission = admission(
        Arc::new(InMemoryLockStore::new()),
        Arc::clone(&ledger),
        storm_lock_config(),
    );

    // Independent observer: stock must never read negative, at any instant.
    let done = Arc::new(AtomicBool::new(false));
    let observer = {
        let ledger = Arc::clone(&ledger);
        let done = Arc::clone(&done);
        tokio::spawn(async move {
            while !done.load(Ordering::SeqCst) {
                let quantity = ledger.quantity("v1").await.unwrap().unwrap();
                assert!(quantity >= 0, "observed negative stock: {quantity}");
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };

    let quantities = [1i64, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
    let tasks: Vec<_> = quantities
        .iter()
        .map(|&quantity| {
            let admission = Arc::clone(&admission);
            tokio::spawn(async move { admission.create_order(request("v1", quantity)).await })
        })
        .collect();

    let mut admitted_total = 0;
    for result in join_all(tasks).await {
        if let Ok(order) = result.unwrap() {
            admitted_total += order.quantity;
        }
    }
    done.store(true, Ordering::SeqCst);
    observer.await.unwrap();

    assert!(admitted_total <= 50);
    assert_eq!(
        ledger.quantity("v1").await.unwrap(),
        Some(50 - admitted_total)
    );
    let journaled: i64 = ledger.orders().iter().map(|o| o.quantity).sum();
    assert_eq!(journaled, admitted_total);
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_transaction_outliving_lock_ttl_cannot_oversell() {
    let ledger = Arc::new(InMemoryStockLedger::new());
    ledger.seed("v1", 1);
    // The ledger transaction (50ms) outlives the lock TTL (20ms): the
    // second admission takes over the expired lock while the first is
    // still inside its transaction. Only the row lock serializes them.
    ledger.delay_admissions(Duration::from_millis(50));
    let admission = admission(
        Arc::new(InMemoryLockStore::new()),
        Arc::clone(&ledger),
        LockConfig {
            ttl: Duration::from_millis(20),
            retry_interval: Duration::from_millis(5),
            max_attempts: 100,
            ..LockConfig::default()
        },
    );

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let admission = Arc::clone(&admission);
            tokio::spawn(async move { admission.create_order(request("v1", 1)).await })
        })
        .collect();

    let mut admitted = 0;
    let mut rejected = 0;
    for result in join_all(tasks).await {
        match result.unwrap() {
            Ok(_) => admitted += 1,
            Err(AdmissionError::InsufficientStock { .. }) => rejected += 1,
            Err(other) => panic!("unexpected admission error: {other:?}"),
        }
    }

    assert_eq!(admitted, 1, "row lock must prevent a double decrement");
    assert_eq!(rejected, 1);
    assert_eq!(ledger.quantity("v1").await.unwrap(), Some(0));
    assert_eq!(ledger.orders().len(), 1);
}

#[tokio::test]
async fn contended_variant_times_out_then_succeeds_after_release() {
    let store = Arc::new(InMemoryLockStore::new());
    let ledger = Arc::new(InMemoryStockLedger::new());
    ledger.seed("v1", 5);
    let admission = admission(
        Arc::clone(&store),
        Arc::clone(&ledger),
        LockConfig {
            retry_interval: Duration::from_millis(5),
            max_attempts: 3,
            ..LockConfig::default()
        },
    );

    // Another holder keeps the variant locked past the whole retry budget.
    store
        .try_acquire("order-lock:v1", "external-holder", Duration::from_secs(10))
        .await
        .unwrap();

    let err = admission.create_order(request("v1", 1)).await.unwrap_err();
    assert!(matches!(err, AdmissionError::LockTimeout { .. }));
    assert_eq!(ledger.quantity("v1").await.unwrap(), Some(5));
    assert!(ledger.orders().is_empty());

    store
        .release("order-lock:v1", "external-holder")
        .await
        .unwrap();

    let order = admission.create_order(request("v1", 1)).await.unwrap();
    assert_eq!(order.quantity, 1);
    assert_eq!(ledger.quantity("v1").await.unwrap(), Some(4));
}

#[tokio::test]
async fn unrelated_variants_do_not_contend() {
    let store = Arc::new(InMemoryLockStore::new());
    let ledger = Arc::new(InMemoryStockLedger::new());
    ledger.seed("v1", 5);
    ledger.seed("v2", 5);
    let admission = admission(
        Arc::clone(&store),
        Arc::clone(&ledger),
        LockConfig {
            retry_interval: Duration::from_millis(5),
            max_attempts: 3,
            ..LockConfig::default()
        },
    );

    // v1 is locked out entirely; v2 must admit on the first attempt.
    store
        .try_acquire("order-lock:v1", "external-holder", Duration::from_secs(10))
        .await
        .unwrap();

    let order = admission.create_order(request("v2", 2)).await.unwrap();
    assert_eq!(order.variant_id, "v2");
    assert_eq!(ledger.quantity("v2").await.unwrap(), Some(3));
    assert_eq!(ledger.quantity("v1").await.unwrap(), Some(5));
}
