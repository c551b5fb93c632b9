//! Scenario-level tests for spec.md §8, S1/S2/S5/S6: the end-to-end share
//! lifecycle and account resolution, driven through the public API rather
//! than any one module's internals.

use std::sync::Arc;

use storage_ledger::{
    accountant::Accountant,
    bucket::canary::DisconnectCanary,
    facade::StorageFacade,
    paths::ShareLayout,
    ANONYMOUS_OWNER_NUM, STARTER_LEASE_ACCOUNT, STARTER_LEASE_DURATION_SECS,
};

fn facade() -> (tempfile::TempDir, StorageFacade) {
    let dir = tempfile::tempdir().unwrap();
    let layout = ShareLayout::new(dir.path());
    let accountant = Arc::new(Accountant::open(layout).unwrap());
    (dir, StorageFacade::new(accountant))
}

/// S1 — fresh share end-to-end.
#[tokio::test]
async fn fresh_share_end_to_end() {
    let (dir, facade) = facade();
    let si = "ab".to_string() + &"c".repeat(24);
    let canary = DisconnectCanary::new();

    let (already_have, writers) = facade
        .allocate_buckets(
            Some("pub-v0-abc"),
            si.clone(),
            "renew-1".into(),
            "cancel-1".into(),
            vec![0],
            1024,
            canary,
        )
        .await
        .unwrap();
    assert!(already_have.is_empty());

    let writer = writers.get(&0).unwrap();
    writer.write(0, b"hello").unwrap();
    let info = facade
        .finish_write(Some("pub-v0-abc"), writer, "renew-1".into(), "cancel-1".into())
        .await
        .unwrap();

    assert_eq!(info.final_size, 12 + 5);
    assert!(dir.path().join("shares/ab").join(&si).join("0").exists());

    let usage = facade.get_current_usage(Some("pub-v0-abc")).await.unwrap();
    assert!(usage >= 5);
}

/// S2 — abort on disconnect: firing the canary before close leaves no
/// staged or committed file behind.
#[tokio::test]
async fn abort_on_disconnect() {
    let (dir, facade) = facade();
    let si = "cd".to_string() + &"c".repeat(24);
    let canary = DisconnectCanary::new();

    let (_already_have, writers) = facade
        .allocate_buckets(
            Some("pub-v0-abc"),
            si.clone(),
            "renew".into(),
            "cancel".into(),
            vec![0],
            1024,
            canary.clone(),
        )
        .await
        .unwrap();
    let writer = writers.get(&0).unwrap().clone();
    drop(writers);

    canary.fire();
    // The disconnect watcher task runs on its own schedule; give it a turn.
    tokio::task::yield_now().await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    assert!(!dir.path().join("shares/cd").join(&si).join("0").exists());
    assert!(!dir.path().join("shares/incoming/cd").join(&si).exists());
    assert_eq!(writer.state(), storage_ledger::bucket::writer::WriterState::Aborted);
}

/// S5 — write past allocation fails without partial effect.
#[tokio::test]
async fn write_past_allocation_is_rejected() {
    let (_dir, facade) = facade();
    let si = "ef".to_string() + &"c".repeat(24);
    let canary = DisconnectCanary::new();
    let (_, writers) = facade
        .allocate_buckets(Some("pub-v0-abc"), si, "r".into(), "c".into(), vec![0], 10, canary)
        .await
        .unwrap();
    let writer = writers.get(&0).unwrap();
    assert!(writer.write(8, b"0123456789").is_err());
}

/// S6 — account resolution: repeat lookups return the same live handle,
/// and a disallowed name is rejected.
#[tokio::test]
async fn account_resolution() {
    let dir = tempfile::tempdir().unwrap();
    let layout = ShareLayout::new(dir.path());
    let accountant = Accountant::open(layout).unwrap();

    let a = accountant.get_account("pub-v0-abc").await.unwrap();
    let b = accountant.get_account("pub-v0-abc").await.unwrap();
    assert!(Arc::ptr_eq(&a, &b));

    assert!(accountant.get_account("../x").await.is_err());

    let anon = accountant.get_anonymous_account().await.unwrap();
    assert_eq!(anon.owner_num(), ANONYMOUS_OWNER_NUM);
}

/// Invariant 3: every newly inserted share gets exactly one starter lease
/// at `insert_time + STARTER_LEASE_DURATION_SECS`, owned by account 1.
#[tokio::test]
async fn starter_lease_has_correct_owner_and_duration() {
    let (_dir, facade) = facade();
    let si = "gh".to_string() + &"c".repeat(24);
    let canary = DisconnectCanary::new();
    let (_, writers) = facade
        .allocate_buckets(Some("pub-v0-abc"), si, "r".into(), "c".into(), vec![0], 128, canary)
        .await
        .unwrap();
    let writer = writers.get(&0).unwrap();
    writer.write(0, b"x").unwrap();
    facade
        .finish_write(Some("pub-v0-abc"), writer, "r".into(), "c".into())
        .await
        .unwrap();

    let starter_usage = facade.get_current_usage(None).await;
    // Starter account (id 1) is distinct from the anonymous caller (id 0);
    // the anonymous account's own usage is unaffected by this share.
    assert_eq!(starter_usage.unwrap(), 0);
    assert!(STARTER_LEASE_ACCOUNT != ANONYMOUS_OWNER_NUM);
    assert_eq!(STARTER_LEASE_DURATION_SECS, 60 * 24 * 60 * 60);
}
