//! Runs against the real filesystem in a temporary directory.

mod common;

use common::{Add, SubPipe, num};
use recast_cache::{CacheConfig, Error, Pipeline, cleanup, persist};
use recast_cache::{CacheFs, OsFs};
use std::path::Path;
use tempfile::TempDir;

fn pipeline(root: &Path) -> Pipeline {
    Pipeline::new(CacheConfig::default().with_location(root))
}

#[tokio::test]
async fn test_results_survive_across_runs() {
    let tmp = TempDir::new().unwrap();
    let pipe = SubPipe::default();

    let (first, log) = {
        let pipe = pipe.clone();
        pipeline(tmp.path())
            .execute_with_log(|ctx| async move { ctx.invoke(&pipe, num(3)).await })
            .await
            .unwrap()
    };
    assert_eq!(first, num(8));
    assert_eq!(log.len(), 3);
    for key in &log {
        assert!(tmp.path().join(format!("{key}.yaml")).is_file(), "{key} persisted");
    }

    let replayed = {
        let pipe = pipe.clone();
        pipeline(tmp.path())
            .execute(|ctx| async move { ctx.invoke(&pipe, num(3)).await })
            .await
            .unwrap()
    };
    assert_eq!(replayed, first);
    assert_eq!(pipe.total_calls(), 3);
}

#[tokio::test]
async fn test_stale_entries_removed_from_disk() {
    let tmp = TempDir::new().unwrap();
    let stale_dir = tmp.path().join("old-step-0000");
    std::fs::create_dir_all(stale_dir.join("inner-0001")).unwrap();
    std::fs::write(stale_dir.join("inner-0001.yaml"), "[]").unwrap();
    std::fs::write(tmp.path().join("old-step-0000.yaml"), "[]").unwrap();
    std::fs::create_dir_all(tmp.path().join("empty-0002")).unwrap();

    let add = Add::non_deterministic();
    pipeline(tmp.path())
        .execute(|ctx| async move { ctx.invoke(&add, num(0)).await })
        .await
        .unwrap();

    assert!(!stale_dir.exists());
    assert!(!tmp.path().join("old-step-0000.yaml").exists());
    assert!(tmp.path().join("empty-0002").is_dir());
}

#[tokio::test]
async fn test_foreign_file_blocks_cleanup_on_disk() {
    let tmp = TempDir::new().unwrap();
    let stale_dir = tmp.path().join("old-step-0000");
    std::fs::create_dir_all(&stale_dir).unwrap();
    std::fs::write(stale_dir.join("inner-0001.yaml"), "[]").unwrap();
    std::fs::write(stale_dir.join("main.rs"), "fn main() {}").unwrap();

    let err = cleanup(&OsFs, tmp.path(), &[]).await.unwrap_err();

    match err {
        Error::CleanupSafety { file, .. } => assert_eq!(&*file, Path::new("main.rs")),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(stale_dir.join("inner-0001.yaml").exists());
}

#[tokio::test]
async fn test_relocated_cache_root_is_searched() {
    let tmp = TempDir::new().unwrap();
    let old_root = tmp.path().join("run-1");
    let add = Add::non_deterministic();

    let first = add.clone();
    let (_, log) = pipeline(&old_root)
        .execute_with_log(|ctx| async move { ctx.invoke(&first, num(0)).await })
        .await
        .unwrap();

    let entry = persist::load(&OsFs, tmp.path(), &log[0]).await.unwrap().unwrap();
    assert_eq!(entry.path, old_root.join(format!("{}.yaml", log[0])));

    let config = CacheConfig::default().with_location(tmp.path()).read_only();
    let second = add.clone();
    let output = Pipeline::new(config)
        .execute(|ctx| async move { ctx.invoke(&second, num(0)).await })
        .await
        .unwrap();

    assert_eq!(output, num(1));
    assert_eq!(add.calls.count(), 1);
}

#[tokio::test]
async fn test_relocated_replay_survives_cleanup() {
    let tmp = TempDir::new().unwrap();
    let old_root = tmp.path().join("run-1");
    std::fs::create_dir_all(tmp.path().join("run-0")).unwrap();
    std::fs::write(tmp.path().join("run-0/old-0001.yaml"), "[]").unwrap();
    let pipe = SubPipe::default();

    let first = pipe.clone();
    pipeline(&old_root)
        .execute(|ctx| async move { ctx.invoke(&first, num(3)).await })
        .await
        .unwrap();

    let second = pipe.clone();
    let (output, log) = pipeline(tmp.path())
        .execute_with_log(|ctx| async move { ctx.invoke(&second, num(3)).await })
        .await
        .unwrap();

    assert_eq!(output, num(8));
    assert_eq!(log.len(), 1);
    assert_eq!(pipe.total_calls(), 3);
    let parent = old_root.join(format!("{}.yaml", log[0]));
    assert!(parent.is_file());
    assert_eq!(std::fs::read_dir(old_root.join(&log[0])).unwrap().count(), 2);
    assert!(!tmp.path().join("run-0").exists());
}

#[tokio::test]
async fn test_os_fs_write_requires_parent() {
    let tmp = TempDir::new().unwrap();
    let err = OsFs
        .write(&tmp.path().join("missing/a.yaml"), "[]")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
}
