//! Integration tests for the share lifecycle: limits under concurrency,
//! expiry, scheduled deletion, and failure compensation.

use std::sync::Arc;
use std::time::Duration;

use vanish_server::blobs::{BlobStore, LocalBlobStore, MemoryBlobStore};
use vanish_server::clock::ManualClock;
use vanish_server::db::{init_db, init_memory_db, DbPool};
use vanish_server::error::{BlobError, ShareError};
use vanish_server::leases::LeaseRegistry;
use vanish_server::lifecycle::{EngineSettings, LifecycleEngine};

struct TestEngine {
    engine: Arc<LifecycleEngine>,
    blobs: Arc<MemoryBlobStore>,
    clock: ManualClock,
    db: DbPool,
}

fn engine_with_grace(grace: Duration) -> TestEngine {
    let db = init_memory_db().expect("Failed to init DB");
    let blobs = Arc::new(MemoryBlobStore::new());
    let clock = ManualClock::default();
    let engine = LifecycleEngine::start(
        LeaseRegistry::new(db.clone()),
        blobs.clone(),
        Arc::new(clock.clone()),
        EngineSettings {
            grace_period: grace,
            ..EngineSettings::default()
        },
    );
    TestEngine {
        engine,
        blobs,
        clock,
        db,
    }
}

fn engine() -> TestEngine {
    engine_with_grace(Duration::from_secs(3600))
}

/// Fire `n` retrieves at once and count (successes, LimitReached failures).
async fn race_retrieves(engine: &Arc<LifecycleEngine>, token: &str, n: usize) -> (usize, usize) {
    let barrier = Arc::new(tokio::sync::Barrier::new(n));
    let mut handles = Vec::with_capacity(n);
    for _ in 0..n {
        let engine = engine.clone();
        let token = token.to_string();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            engine.retrieve(&token).await
        }));
    }

    let mut ok = 0;
    let mut limited = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(d) => {
                assert_eq!(d.bytes, b"payload");
                ok += 1;
            }
            Err(ShareError::LimitReached) => limited += 1,
            Err(e) => panic!("unexpected retrieve error: {:?}", e),
        }
    }
    (ok, limited)
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_single_download_then_limit_reached() {
    let t = engine();
    let lease = t.engine.create(b"hello", "a.txt", 1, 10).await.unwrap();

    let download = t.engine.retrieve(&lease.token).await.unwrap();
    assert_eq!(download.bytes, b"hello");
    assert_eq!(download.original_name, "a.txt");

    let err = t.engine.retrieve(&lease.token).await.unwrap_err();
    assert!(matches!(err, ShareError::LimitReached), "got {:?}", err);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_three_of_four_concurrent_downloads_succeed() {
    let t = engine();
    let lease = t.engine.create(b"payload", "b.bin", 3, 10).await.unwrap();

    let (ok, limited) = race_retrieves(&t.engine, &lease.token, 4).await;
    assert_eq!(ok, 3);
    assert_eq!(limited, 1);
}

#[tokio::test]
async fn test_zero_expiry_rejected() {
    let t = engine();
    let err = t.engine.create(b"hello", "a.txt", 1, 0).await.unwrap_err();
    assert!(matches!(err, ShareError::InvalidRequest(_)));
    assert!(t.blobs.is_empty());
}

#[tokio::test]
async fn test_scheduled_deletion_after_grace_period() {
    let t = engine_with_grace(Duration::from_millis(100));
    let lease = t.engine.create(b"hello", "a.txt", 1, 10).await.unwrap();

    t.engine.retrieve(&lease.token).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let err = t.engine.retrieve(&lease.token).await.unwrap_err();
    assert!(matches!(err, ShareError::NotFound), "got {:?}", err);
    assert!(!t.blobs.contains(&lease.blob_ref));
}

// =============================================================================
// Properties
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_never_over_admits_under_race() {
    for limit in 1..=5 {
        let t = engine();
        let lease = t.engine.create(b"payload", "p.bin", limit, 10).await.unwrap();

        let n = limit as usize + 1;
        let (ok, limited) = race_retrieves(&t.engine, &lease.token, n).await;
        assert_eq!(ok, limit as usize, "limit {}", limit);
        assert_eq!(limited, 1, "limit {}", limit);
    }
}

#[tokio::test]
async fn test_sequential_downloads_match_limit() {
    let t = engine();
    let lease = t.engine.create(b"payload", "p.bin", 4, 10).await.unwrap();

    for expected_left in (0..4).rev() {
        let d = t.engine.retrieve(&lease.token).await.unwrap();
        assert_eq!(d.remaining_downloads, expected_left);
    }
    assert!(matches!(
        t.engine.retrieve(&lease.token).await,
        Err(ShareError::LimitReached)
    ));
}

#[tokio::test]
async fn test_expired_lease_fails_regardless_of_remaining() {
    let t = engine();
    let lease = t.engine.create(b"hello", "a.txt", 50, 1).await.unwrap();

    t.clock.advance(chrono::Duration::seconds(61));
    let err = t.engine.retrieve(&lease.token).await.unwrap_err();
    assert!(matches!(err, ShareError::Expired), "got {:?}", err);
}

#[tokio::test]
async fn test_lease_usable_up_to_expiry_instant() {
    let t = engine();
    let lease = t.engine.create(b"hello", "a.txt", 2, 1).await.unwrap();

    t.clock.set(lease.expires_at);
    assert!(t.engine.retrieve(&lease.token).await.is_ok());
}

#[tokio::test]
async fn test_after_deletion_token_and_blob_are_gone() {
    let t = engine();
    let lease = t.engine.create(b"hello", "a.txt", 2, 10).await.unwrap();

    assert!(t.engine.delete(&lease.token).await.unwrap());

    assert!(matches!(
        t.engine.retrieve(&lease.token).await,
        Err(ShareError::NotFound)
    ));
    assert!(matches!(
        t.blobs.get(&lease.blob_ref).await,
        Err(BlobError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_delete_twice_is_harmless() {
    let t = engine();
    let lease = t.engine.create(b"hello", "a.txt", 1, 10).await.unwrap();

    assert!(t.engine.delete(&lease.token).await.unwrap());
    assert!(!t.engine.delete(&lease.token).await.unwrap());
    assert!(t.blobs.is_empty());
    assert_eq!(t.engine.registry().count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_delete_finishes_half_deleted_lease() {
    let t = engine();
    let lease = t.engine.create(b"hello", "a.txt", 1, 10).await.unwrap();
    t.blobs.remove_silently(&lease.blob_ref);

    assert!(t.engine.delete(&lease.token).await.unwrap());
    assert_eq!(t.engine.registry().count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_binary_round_trip() {
    let t = engine();
    let data: Vec<u8> = (0..=255u8).cycle().take(70_000).collect();
    let lease = t.engine.create(&data, "blob.bin", 1, 10).await.unwrap();

    let d = t.engine.retrieve(&lease.token).await.unwrap();
    assert_eq!(d.bytes, data);
}

#[tokio::test]
async fn test_expired_leases_are_enumerable() {
    let t = engine();
    let short = t.engine.create(b"a", "a.txt", 1, 1).await.unwrap();
    let long = t.engine.create(b"b", "b.txt", 1, 60).await.unwrap();

    t.clock.advance(chrono::Duration::minutes(2));
    let expired = t.engine.expired_leases().await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].token, short.token);

    let report = t.engine.sweep().await.unwrap();
    assert_eq!(report.expired, 1);
    assert!(t.engine.registry().get(&long.token).await.is_ok());
    assert!(matches!(
        t.engine.retrieve(&short.token).await,
        Err(ShareError::NotFound)
    ));
}

// =============================================================================
// Failure handling
// =============================================================================

#[tokio::test]
async fn test_failed_registry_write_removes_orphan_blob() {
    let t = engine();
    {
        let conn = t.db.lock().unwrap();
        conn.execute("DROP TABLE leases", []).unwrap();
    }

    let err = t.engine.create(b"hello", "a.txt", 1, 10).await.unwrap_err();
    assert!(matches!(err, ShareError::StorageUnavailable(_)), "got {:?}", err);
    assert!(t.blobs.is_empty(), "orphaned blob should be compensated");
}

#[tokio::test]
async fn test_failed_compensation_still_surfaces_original_error() {
    let t = engine();
    {
        let conn = t.db.lock().unwrap();
        conn.execute("DROP TABLE leases", []).unwrap();
    }
    t.blobs.set_fail_deletes(true);

    let err = t.engine.create(b"hello", "a.txt", 1, 10).await.unwrap_err();
    assert!(matches!(err, ShareError::StorageUnavailable(_)));
    // Orphan is logged and left for reconciliation
    assert_eq!(t.blobs.len(), 1);
}

// =============================================================================
// Local filesystem backend
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_local_backend_end_to_end() {
    let tmp = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp.path().to_str().unwrap().to_string();

    let db = init_db(&data_dir).expect("Failed to init DB");
    let blobs = Arc::new(LocalBlobStore::new(&data_dir));
    let engine = LifecycleEngine::start(
        LeaseRegistry::new(db),
        blobs.clone(),
        Arc::new(ManualClock::default()),
        EngineSettings {
            grace_period: Duration::from_millis(50),
            ..EngineSettings::default()
        },
    );

    let lease = engine.create(b"payload", "p.bin", 2, 10).await.unwrap();
    let path = blobs.root().join(&lease.blob_ref);
    assert!(path.exists());

    let (ok, limited) = race_retrieves(&engine, &lease.token, 3).await;
    assert_eq!((ok, limited), (2, 1));

    let mut gone = false;
    for _ in 0..100 {
        if !path.exists() && engine.registry().count().await.unwrap() == 0 {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(gone, "blob file and lease row should be deleted");
}
