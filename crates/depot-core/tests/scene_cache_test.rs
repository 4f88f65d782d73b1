//! Integration tests for SceneCache.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{init_tracing, wait_until, Scene, ScriptedProvider};
use depot_core::{CacheConfig, CacheError, ReleaseOutcome, SceneCache, SceneLoadMode};

fn scenes_with(provider: &Arc<ScriptedProvider>, max_scene_entries: usize) -> SceneCache {
    init_tracing();
    let config = CacheConfig {
        max_scene_entries,
        ..CacheConfig::default()
    };
    SceneCache::new(Arc::clone(provider) as _, &config).expect("valid config")
}

#[tokio::test]
async fn test_scene_load_and_hit() {
    let provider = Arc::new(ScriptedProvider::new());
    let scenes = scenes_with(&provider, 4);

    let first = scenes.acquire::<Scene>("level-1", SceneLoadMode::Additive).await.unwrap();
    let second = scenes.acquire::<Scene>("level-1", SceneLoadMode::Single).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.name, "level-1");
    assert_eq!(first.mode, SceneLoadMode::Additive);
    assert_eq!(provider.fetch_count("level-1"), 1);
    assert_eq!(scenes.ref_count("level-1"), Some(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_scene_requests_share_one_load() {
    let provider = Arc::new(ScriptedProvider::new());
    let scenes = scenes_with(&provider, 4);
    provider.hold_loads();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let scenes = scenes.clone();
            tokio::spawn(async move { scenes.acquire::<Scene>("hub", SceneLoadMode::Single).await })
        })
        .collect();
    wait_until(|| scenes.stats().total_joins == 3).await;
    provider.open_loads();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(provider.fetch_count("hub"), 1);
    assert_eq!(scenes.ref_count("hub"), Some(4));
}

#[tokio::test]
async fn test_release_waits_for_unload() {
    let provider = Arc::new(ScriptedProvider::new());
    let scenes = scenes_with(&provider, 4);
    scenes.acquire::<Scene>("level-1", SceneLoadMode::Single).await.unwrap();
    scenes.acquire::<Scene>("level-1", SceneLoadMode::Single).await.unwrap();

    assert_eq!(scenes.release("level-1").await, ReleaseOutcome::Retained(1));
    assert!(provider.unloads().is_empty());

    assert_eq!(scenes.release("level-1").await, ReleaseOutcome::Released);
    assert_eq!(provider.unloads(), vec!["level-1".to_string()]);
    assert!(!scenes.contains("level-1"));

    assert_eq!(scenes.release("level-1").await, ReleaseOutcome::Untracked);
    assert_eq!(provider.unloads().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_eviction_unloads_before_new_scene_takes_the_slot() {
    let provider = Arc::new(ScriptedProvider::new());
    let scenes = scenes_with(&provider, 1);
    scenes.acquire::<Scene>("old", SceneLoadMode::Single).await.unwrap();
    provider.hold_unloads();

    let incoming = {
        let scenes = scenes.clone();
        tokio::spawn(async move { scenes.acquire::<Scene>("new", SceneLoadMode::Single).await })
    };

    wait_until(|| scenes.stats().unloading == 1).await;
    assert!(!scenes.contains("old"));
    assert!(!scenes.contains("new"));
    assert!(provider.unloads().is_empty());

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!incoming.is_finished());
    assert!(scenes.is_empty());

    provider.open_unloads();
    incoming.await.unwrap().unwrap();

    assert_eq!(provider.unloads(), vec!["old".to_string()]);
    assert_eq!(scenes.keys(), vec!["new".to_string()]);
    let stats = scenes.stats();
    assert_eq!(stats.total_evictions, 1);
    assert_eq!(stats.unloading, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unloading_scene_keeps_its_slot() {
    let provider = Arc::new(ScriptedProvider::new());
    let scenes = scenes_with(&provider, 1);
    scenes.acquire::<Scene>("old", SceneLoadMode::Single).await.unwrap();
    provider.hold_unloads();

    let releasing = {
        let scenes = scenes.clone();
        tokio::spawn(async move { scenes.release("old").await })
    };
    wait_until(|| scenes.stats().unloading == 1).await;

    let incoming = {
        let scenes = scenes.clone();
        tokio::spawn(async move { scenes.acquire::<Scene>("b", SceneLoadMode::Single).await })
    };
    wait_until(|| provider.fetch_count("b") == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(!incoming.is_finished());
    assert!(!releasing.is_finished());
    assert!(scenes.is_empty());
    assert_eq!(scenes.stats().total_evictions, 0);

    provider.open_unloads();
    assert_eq!(releasing.await.unwrap(), ReleaseOutcome::Released);
    incoming.await.unwrap().unwrap();

    assert_eq!(provider.unloads(), vec!["old".to_string()]);
    assert_eq!(scenes.keys(), vec!["b".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_acquire_during_unload_loads_fresh_scene() {
    let provider = Arc::new(ScriptedProvider::new());
    let scenes = scenes_with(&provider, 4);
    let first = scenes.acquire::<Scene>("hub", SceneLoadMode::Single).await.unwrap();
    provider.hold_unloads();

    let releasing = {
        let scenes = scenes.clone();
        tokio::spawn(async move { scenes.release("hub").await })
    };
    wait_until(|| scenes.stats().unloading == 1).await;

    let again = {
        let scenes = scenes.clone();
        tokio::spawn(async move { scenes.acquire::<Scene>("hub", SceneLoadMode::Additive).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!again.is_finished());
    assert_eq!(provider.fetch_count("hub"), 1);

    provider.open_unloads();
    releasing.await.unwrap();
    let second = again.await.unwrap().unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(second.mode, SceneLoadMode::Additive);
    assert_eq!(provider.fetch_count("hub"), 2);
    assert_eq!(scenes.ref_count("hub"), Some(1));
}

#[tokio::test]
async fn test_unload_failure_still_removes_scene() {
    let provider = Arc::new(ScriptedProvider::new());
    let scenes = scenes_with(&provider, 4);
    provider.fail_releases();
    scenes.acquire::<Scene>("broken", SceneLoadMode::Single).await.unwrap();

    assert_eq!(scenes.release("broken").await, ReleaseOutcome::Released);
    assert!(!scenes.contains("broken"));
    assert_eq!(provider.unloads(), vec!["broken".to_string()]);
}

#[tokio::test]
async fn test_failed_scene_load_is_not_cached() {
    let provider = Arc::new(ScriptedProvider::new());
    let scenes = scenes_with(&provider, 4);
    provider.fail("missing-level");

    let err = scenes
        .acquire::<Scene>("missing-level", SceneLoadMode::Single)
        .await
        .unwrap_err();

    assert!(matches!(err, CacheError::LoadFailed { .. }));
    assert!(scenes.is_empty());
    assert!(scenes.operation("missing-level").is_none());
}

#[tokio::test]
async fn test_scene_type_mismatch() {
    let provider = Arc::new(ScriptedProvider::new());
    let scenes = scenes_with(&provider, 4);

    let err = scenes.acquire::<String>("level-1", SceneLoadMode::Single).await.unwrap_err();

    assert!(matches!(err, CacheError::TypeMismatch { .. }));
    assert!(scenes.is_empty());
}

#[tokio::test]
async fn test_scene_preload_and_clear_all() {
    let provider = Arc::new(ScriptedProvider::new());
    let scenes = scenes_with(&provider, 4);
    provider.fail("bad");

    let report = scenes
        .preload::<Scene, _>(&["a", "b", "bad"], SceneLoadMode::Additive)
        .await;
    assert_eq!(report.loaded.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(scenes.len(), 2);

    scenes.clear_all().await;

    assert!(scenes.is_empty());
    let mut unloads = provider.unloads();
    unloads.sort();
    assert_eq!(unloads, vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn test_empty_scene_key_is_rejected() {
    let provider = Arc::new(ScriptedProvider::new());
    let scenes = scenes_with(&provider, 4);

    let err = scenes.acquire::<Scene>("", SceneLoadMode::Single).await.unwrap_err();

    assert_eq!(err, CacheError::InvalidKey);
    assert_eq!(provider.total_fetches(), 0);
    assert_eq!(scenes.capacity(), 4);
}
