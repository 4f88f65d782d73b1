//! In-flight loads: a shared result plus a progress stream.
//!
//! A [`LoadOperation`] is the observer side of one provider fetch. Any
//! number of callers can hold one; they all see the same progress updates
//! and the same terminal status. The producing task holds the matching
//! [`LoadCompleter`]. If the completer is dropped before publishing a
//! result, every observer sees the load as faulted.

use std::sync::{Arc, Weak};

use depot_abstraction::{Payload, ProgressSink};
use tokio::sync::watch;

use crate::error::CacheError;

/// Status of a load.
#[derive(Debug, Clone)]
pub enum LoadStatus {
    /// Still running.
    Pending,
    /// Finished with a payload.
    Succeeded(Payload),
    /// Finished without one.
    Failed(CacheError),
}

impl LoadStatus {
    /// `true` once the load has succeeded or failed.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    fn into_result(self, key: &str) -> Result<Payload, CacheError> {
        match self {
            Self::Succeeded(payload) => Ok(payload),
            Self::Failed(err) => Err(err),
            Self::Pending => Err(abandoned(key)),
        }
    }
}

/// Snapshot of a load.
#[derive(Debug, Clone)]
pub struct LoadState {
    /// Completion fraction in `[0, 1]`.
    pub progress: f32,
    /// Current status.
    pub status: LoadStatus,
}

/// Observer handle for one fetch.
#[derive(Debug, Clone)]
pub struct LoadOperation {
    key: Arc<str>,
    state: watch::Receiver<LoadState>,
}

/// Producer side of a [`LoadOperation`].
#[derive(Debug)]
pub(crate) struct LoadCompleter {
    load_id: u64,
    state: Arc<watch::Sender<LoadState>>,
}

fn abandoned(key: &str) -> CacheError {
    CacheError::Faulted {
        key: key.to_string(),
        detail: "load task ended without a result".to_string(),
    }
}

impl LoadOperation {
    pub(crate) fn new(key: &str, load_id: u64) -> (Self, LoadCompleter) {
        let (tx, rx) = watch::channel(LoadState {
            progress: 0.0,
            status: LoadStatus::Pending,
        });
        let operation = Self {
            key: Arc::from(key),
            state: rx,
        };
        let completer = LoadCompleter {
            load_id,
            state: Arc::new(tx),
        };
        (operation, completer)
    }

    /// Key being loaded.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Latest reported progress.
    #[must_use]
    pub fn progress(&self) -> f32 {
        self.state.borrow().progress
    }

    /// Latest state snapshot.
    #[must_use]
    pub fn state(&self) -> LoadState {
        self.state.borrow().clone()
    }

    /// A receiver that is notified on every progress or status change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LoadState> {
        self.state.clone()
    }

    /// Waits for the load to finish.
    pub async fn wait(&self) -> Result<Payload, CacheError> {
        self.wait_with_progress(|_| {}).await
    }

    /// Waits for the load to finish, calling `on_progress` each time the
    /// reported fraction moves. A successful load always ends with `1.0`.
    pub async fn wait_with_progress<F>(&self, mut on_progress: F) -> Result<Payload, CacheError>
    where
        F: FnMut(f32) + Send,
    {
        let mut rx = self.state.clone();
        let mut last_reported: Option<f32> = None;
        loop {
            let (progress, status) = {
                let state = rx.borrow_and_update();
                (state.progress, state.status.clone())
            };
            if last_reported.is_none_or(|last| progress > last) {
                on_progress(progress);
                last_reported = Some(progress);
            }
            if status.is_terminal() {
                return status.into_result(&self.key);
            }
            if rx.changed().await.is_err() {
                // Sender gone: take whatever was published last.
                let status = rx.borrow().status.clone();
                return status.into_result(&self.key);
            }
        }
    }
}

impl LoadCompleter {
    pub(crate) const fn load_id(&self) -> u64 {
        self.load_id
    }

    /// A sink the provider reports through. Reports after the load is
    /// settled (or the completer dropped) are ignored.
    pub(crate) fn progress_sink(&self) -> ProgressSink {
        let state: Weak<watch::Sender<LoadState>> = Arc::downgrade(&self.state);
        ProgressSink::new(move |fraction| {
            if fraction.is_nan() {
                return;
            }
            let Some(state) = state.upgrade() else {
                return;
            };
            let fraction = fraction.clamp(0.0, 1.0);
            state.send_if_modified(|current| {
                if current.status.is_terminal() || fraction <= current.progress {
                    return false;
                }
                current.progress = fraction;
                true
            });
        })
    }

    pub(crate) fn succeed(self, payload: Payload) {
        self.state.send_modify(|current| {
            current.progress = 1.0;
            current.status = LoadStatus::Succeeded(payload);
        });
    }

    pub(crate) fn fail(self, error: CacheError) {
        self.state.send_modify(|current| current.status = LoadStatus::Failed(error));
    }
}
