//! Scripted provider shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use depot_core::{
    Payload, ProgressSink, ProviderError, ResourceLocation, ResourceProvider, SceneLoadMode,
    SceneProvider, TypeTag,
};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Scene payload produced by [`ScriptedProvider`].
#[derive(Debug, PartialEq, Eq)]
pub struct Scene {
    pub name: String,
    pub mode: SceneLoadMode,
}

/// A provider whose behaviour each test scripts up front.
///
/// Loads and unloads can be held at a gate, keys can be made to fail or
/// panic, and every call is counted.
pub struct ScriptedProvider {
    fetches: Mutex<HashMap<String, usize>>,
    releases: Mutex<Vec<String>>,
    unloads: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    missing: Mutex<HashSet<String>>,
    panicking: Mutex<HashSet<String>>,
    labels: Mutex<HashMap<String, Vec<String>>>,
    release_fails: AtomicBool,
    release_panics: AtomicBool,
    progress_steps: Mutex<Vec<f32>>,
    load_gate: watch::Sender<bool>,
    unload_gate: watch::Sender<bool>,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            fetches: Mutex::new(HashMap::new()),
            releases: Mutex::new(Vec::new()),
            unloads: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            missing: Mutex::new(HashSet::new()),
            panicking: Mutex::new(HashSet::new()),
            labels: Mutex::new(HashMap::new()),
            release_fails: AtomicBool::new(false),
            release_panics: AtomicBool::new(false),
            progress_steps: Mutex::new(Vec::new()),
            load_gate: watch::channel(true).0,
            unload_gate: watch::channel(true).0,
        }
    }

    pub fn fail(&self, key: &str) {
        self.failing.lock().unwrap().insert(key.to_string());
    }

    pub fn mark_missing(&self, key: &str) {
        self.missing.lock().unwrap().insert(key.to_string());
    }

    pub fn panic_on(&self, key: &str) {
        self.panicking.lock().unwrap().insert(key.to_string());
    }

    pub fn heal(&self, key: &str) {
        self.failing.lock().unwrap().remove(key);
        self.missing.lock().unwrap().remove(key);
        self.panicking.lock().unwrap().remove(key);
    }

    pub fn label(&self, label: &str, keys: &[&str]) {
        self.labels
            .lock()
            .unwrap()
            .insert(label.to_string(), keys.iter().map(ToString::to_string).collect());
    }

    pub fn fail_releases(&self) {
        self.release_fails.store(true, Ordering::SeqCst);
    }

    pub fn panic_on_release(&self) {
        self.release_panics.store(true, Ordering::SeqCst);
    }

    pub fn progress_steps(&self, steps: &[f32]) {
        *self.progress_steps.lock().unwrap() = steps.to_vec();
    }

    pub fn hold_loads(&self) {
        self.load_gate.send_replace(false);
    }

    pub fn open_loads(&self) {
        self.load_gate.send_replace(true);
    }

    pub fn hold_unloads(&self) {
        self.unload_gate.send_replace(false);
    }

    pub fn open_unloads(&self) {
        self.unload_gate.send_replace(true);
    }

    pub fn fetch_count(&self, key: &str) -> usize {
        self.fetches.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.fetches.lock().unwrap().values().sum()
    }

    pub fn releases(&self) -> Vec<String> {
        self.releases.lock().unwrap().clone()
    }

    pub fn unloads(&self) -> Vec<String> {
        self.unloads.lock().unwrap().clone()
    }

    async fn fetch(&self, key: &str, progress: &ProgressSink) -> Result<(), ProviderError> {
        *self.fetches.lock().unwrap().entry(key.to_string()).or_default() += 1;

        let mut gate = self.load_gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let steps = self.progress_steps.lock().unwrap().clone();
        for step in steps {
            progress.report(step);
            tokio::task::yield_now().await;
        }

        if self.panicking.lock().unwrap().contains(key) {
            panic!("scripted panic for {key}");
        }
        if self.missing.lock().unwrap().contains(key) {
            return Err(ProviderError::NotFound {
                key: key.to_string(),
            });
        }
        if self.failing.lock().unwrap().contains(key) {
            return Err(ProviderError::LoadFailed {
                key: key.to_string(),
                message: "scripted failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceProvider for ScriptedProvider {
    async fn locate(
        &self,
        key: &str,
        _type_tag: TypeTag,
    ) -> Result<Vec<ResourceLocation>, ProviderError> {
        let labels = self.labels.lock().unwrap();
        Ok(match labels.get(key) {
            Some(keys) => keys.iter().map(ResourceLocation::new).collect(),
            None => vec![ResourceLocation::new(key)],
        })
    }

    async fn load(
        &self,
        key: &str,
        _type_tag: TypeTag,
        progress: ProgressSink,
    ) -> Result<Payload, ProviderError> {
        self.fetch(key, &progress).await?;
        Ok(Payload::new(format!("payload:{key}")))
    }

    fn release(&self, key: &str, _payload: &Payload) -> Result<(), ProviderError> {
        self.releases.lock().unwrap().push(key.to_string());
        if self.release_panics.load(Ordering::SeqCst) {
            panic!("scripted release panic for {key}");
        }
        if self.release_fails.load(Ordering::SeqCst) {
            return Err(ProviderError::ReleaseFailed(format!(
                "scripted release failure for {key}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SceneProvider for ScriptedProvider {
    async fn load_scene(
        &self,
        key: &str,
        _type_tag: TypeTag,
        mode: SceneLoadMode,
        progress: ProgressSink,
    ) -> Result<Payload, ProviderError> {
        self.fetch(key, &progress).await?;
        Ok(Payload::new(Scene {
            name: key.to_string(),
            mode,
        }))
    }

    async fn unload_scene(&self, key: &str, _scene: &Payload) -> Result<(), ProviderError> {
        let mut gate = self.unload_gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        self.unloads.lock().unwrap().push(key.to_string());
        if self.release_fails.load(Ordering::SeqCst) {
            return Err(ProviderError::ReleaseFailed(format!(
                "scripted unload failure for {key}"
            )));
        }
        Ok(())
    }
}

/// Routes cache logs to the test harness output. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls `condition` until it holds, failing the test after a few seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached in time");
}
