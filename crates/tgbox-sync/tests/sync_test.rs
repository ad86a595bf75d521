//! Fast and deep sync against an in-memory remote box.

mod common;

use std::collections::BTreeSet;
use std::time::Duration;

use common::{push, source, stray, Fixture};
use tgbox_core::BoxFile;
use tgbox_storage::{FileLocalBox, IdQuery, LocalBox, RecordSource, RemoteBox};
use tgbox_sync::{SyncEngine, SyncError, SyncOptions, SyncPhase};

fn fast() -> SyncOptions {
    SyncOptions {
        deep: false,
        start_from: None,
        page_size: 2,
        throttle_every: 1,
        timeout: Duration::ZERO,
    }
}

fn deep(start_from: Option<u64>) -> SyncOptions {
    SyncOptions {
        deep: true,
        start_from,
        ..fast()
    }
}

async fn ids<S: RecordSource + ?Sized>(source: &S) -> BTreeSet<u64> {
    source
        .file_ids(&IdQuery::page(None, usize::MAX))
        .await
        .unwrap()
        .into_iter()
        .collect()
}

#[tokio::test]
async fn deep_sync_converges_to_remote_ids() {
    let mut fx = Fixture::new(true).await;
    let writer = fx.client().await;
    let a = push(&writer, source("/docs", "a.txt", 0), b"alpha").await;
    let b = push(&writer, source("/docs", "b.txt", 0), b"bravo bravo bravo bravo").await;
    let c = push(&writer, source("/docs", "c.txt", 0), b"charlie").await;
    writer.remote.delete_files(&[b.id]).await.unwrap();

    let reader = fx.client().await;
    reader.local.import_file(stray(42)).await.unwrap();
    reader.local.import_file(stray(2)).await.unwrap();

    let mut engine = SyncEngine::new(&reader.local, &reader.remote, deep(None));
    let report = engine.run().await.unwrap();

    assert_eq!(engine.phase(), SyncPhase::Completed);
    assert_eq!(ids(&reader.local).await, ids(&reader.remote).await);
    assert_eq!(ids(&reader.local).await, BTreeSet::from([a.id, c.id]));
    assert_eq!(report.imported, 2);
    assert_eq!(report.deleted, 2);

    match reader.local.get_file(c.id).await.unwrap() {
        Some(BoxFile::Decrypted(r)) => assert_eq!(r, c),
        other => panic!("expected imported record, got {other:?}"),
    }

    // a second pass has nothing left to do
    let again = SyncEngine::new(&reader.local, &reader.remote, deep(None))
        .run()
        .await
        .unwrap();
    assert_eq!((again.imported, again.deleted), (0, 0));
}

#[tokio::test]
async fn deep_sync_respects_start_from() {
    let mut fx = Fixture::new(true).await;
    let writer = fx.client().await;
    let first = push(&writer, source("/", "1", 0), b"one").await;
    let second = push(&writer, source("/", "2", 0), b"two").await;
    let third = push(&writer, source("/", "3", 0), b"three").await;

    let reader = fx.client().await;
    let mut engine = SyncEngine::new(&reader.local, &reader.remote, deep(Some(second.id)));
    engine.run().await.unwrap();

    let local = ids(&reader.local).await;
    assert!(local.contains(&third.id));
    assert!(!local.contains(&first.id));
    assert!(!local.contains(&second.id));
}

#[tokio::test]
async fn deep_sync_reports_monotonic_progress() {
    let mut fx = Fixture::new(true).await;
    let writer = fx.client().await;
    for i in 0..5 {
        push(&writer, source("/p", &format!("f{i}"), 0), b"x").await;
    }
    let reader = fx.client().await;
    for id in 100..103 {
        reader.local.import_file(stray(id)).await.unwrap();
    }

    let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    SyncEngine::new(&reader.local, &reader.remote, deep(None))
        .with_progress(Box::new(move |current, total| {
            sink.lock().unwrap().push((current, total));
        }))
        .run()
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 8);
    for pair in seen.windows(2) {
        assert!(pair[1].0 >= pair[0].0);
        assert!(pair[1].1 >= pair[0].1);
    }
    assert!(seen.iter().all(|(current, total)| current <= total));
}

#[tokio::test]
async fn fast_sync_only_touches_logged_ids() {
    let mut fx = Fixture::new(true).await;
    let reader = fx.client().await;
    reader.local.import_file(stray(500)).await.unwrap();

    let writer = fx.client().await;
    let gone = push(&writer, source("/d", "gone.txt", 0), b"soon deleted").await;
    let kept = push(&writer, source("/d", "kept.txt", 0), b"still here").await;
    writer.remote.delete_files(&[gone.id]).await.unwrap();

    let mut engine = SyncEngine::new(&reader.local, &reader.remote, fast());
    let report = engine.run().await.unwrap();

    assert!(!report.log_denied);
    assert_eq!(report.imported, 1);
    assert_eq!(report.deleted, 0);
    assert_eq!(ids(&reader.local).await, BTreeSet::from([kept.id, 500]));
}

#[tokio::test]
async fn fast_sync_applies_edits() {
    let mut fx = Fixture::new(true).await;
    let writer = fx.client().await;
    let reader = fx.client().await;
    let record = push(&writer, source("/d", "a.txt", 0), b"content").await;

    SyncEngine::new(&reader.local, &reader.remote, fast())
        .run()
        .await
        .unwrap();

    let mut edited = record.clone();
    edited.cattrs.insert("tag".into(), b"x".to_vec());
    writer.remote.update_metadata(&edited).await.unwrap();

    let report = SyncEngine::new(&reader.local, &reader.remote, fast())
        .run()
        .await
        .unwrap();
    assert_eq!(report.updated, 1);
    match reader.local.get_file(record.id).await.unwrap() {
        Some(BoxFile::Decrypted(r)) => assert_eq!(r.cattr_str("tag"), Some("x")),
        other => panic!("expected record, got {other:?}"),
    }
}

#[tokio::test]
async fn fast_sync_with_denied_log_changes_nothing() {
    let mut fx = Fixture::new(false).await;
    let writer = fx.client().await;
    push(&writer, source("/d", "a.txt", 0), b"content").await;

    let reader = fx.client().await;
    reader.local.import_file(stray(7)).await.unwrap();
    let report = SyncEngine::new(&reader.local, &reader.remote, fast())
        .run()
        .await
        .unwrap();

    assert!(report.log_denied);
    assert_eq!(ids(&reader.local).await, BTreeSet::from([7]));
}

#[tokio::test]
async fn start_from_requires_deep() {
    let mut fx = Fixture::new(true).await;
    let client = fx.client().await;
    let mut options = fast();
    options.start_from = Some(3);

    let mut engine = SyncEngine::new(&client.local, &client.remote, options);
    let err = engine.run().await.unwrap_err();
    assert!(matches!(err, SyncError::StartFromRequiresDeep));
    assert_eq!(engine.phase(), SyncPhase::Idle);
}

#[tokio::test]
async fn fast_sync_aborts_on_missing_record_but_commits() {
    let mut fx = Fixture::new(true).await;
    let writer = fx.client().await;
    let a = push(&writer, source("/docs", "a.txt", 0), b"alpha").await;
    let b = push(&writer, source("/docs", "b.txt", 0), b"bravo").await;
    fx.drop_record(b.id).await;

    let reader = fx.client().await;
    let mut engine = SyncEngine::new(&reader.local, &reader.remote, fast());
    let err = engine.run().await.unwrap_err();
    assert!(matches!(err, SyncError::RemoteFileNotFound(id) if id == b.id));
    assert_eq!(engine.phase(), SyncPhase::Failed);

    // the import made before the failure reached disk
    let reopened = FileLocalBox::open(reader.local.path(), &fx.basekey)
        .await
        .unwrap();
    assert_eq!(ids(&reopened).await, BTreeSet::from([a.id]));
}

#[tokio::test]
async fn deep_sync_skips_and_counts_undecryptable_records() {
    let mut fx = Fixture::new(true).await;
    let writer = fx.client().await;
    let a = push(&writer, source("/docs", "a.txt", 0), b"alpha").await;
    fx.plant_foreign(&stray(a.id + 10)).await;

    let reader = fx.client().await;
    let mut engine = SyncEngine::new(&reader.local, &reader.remote, deep(None));
    let report = engine.run().await.unwrap();

    assert_eq!(engine.phase(), SyncPhase::Completed);
    assert_eq!(report.undecryptable, 1);
    assert_eq!(report.imported, 1);
    assert_eq!(ids(&reader.local).await, BTreeSet::from([a.id]));
    assert!(matches!(
        reader.remote.get_file(a.id + 10).await.unwrap(),
        Some(BoxFile::Encrypted(_))
    ));
}
