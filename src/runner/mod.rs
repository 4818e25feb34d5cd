//! Plasma Store Runner
//!
//! Composition root and concurrency boundary. The runner owns the allocator,
//! capacity monitor and store, and is the only component touched by more
//! than one thread.
//!
//! # Threading
//!
//! ```text
//! caller threads ──start/stop──> Mutex<RunnerInner>   (lifecycle)
//!                ──counters────> AllocatorStats       (atomics)
//!                ──tasks───────> MainService ──> PlasmaStore (single thread)
//! ```
//!
//! Counter reads may be slightly stale. Anything that needs a view consistent
//! with in-flight allocation decisions hops onto the main service instead.
//!
//! # Caller contract
//!
//! `stop`, `is_plasma_object_spillable` and `run_on_store_blocking` block the
//! calling thread on the main service. They may be called from any thread,
//! tokio workers included, but calling them from a store callback or a
//! submitted task deadlocks.

pub mod global;
pub mod main_service;

pub use global::{global, install};
pub use main_service::{MainService, ServiceHandle, StoreTask};

use crate::allocator::{Allocator, AllocatorStats};
use crate::config::StoreRunnerConfig;
use crate::error::{Error, Result};
use crate::monitor::CapacityMonitor;
use crate::object::ObjectId;
use crate::store::{PlasmaStore, StoreCallbacks};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, instrument};

/// Runner lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    NotStarted,
    Running,
    Stopping,
    Stopped,
}

struct RunnerInner {
    state: RunnerState,
    service: Option<MainService>,
}

/// Owns the plasma store and its main service
pub struct PlasmaStoreRunner {
    config: StoreRunnerConfig,
    stats: Arc<AllocatorStats>,
    inner: Mutex<RunnerInner>,
}

impl std::fmt::Debug for PlasmaStoreRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlasmaStoreRunner")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl PlasmaStoreRunner {
    /// Create a runner; nothing is allocated until [`start`](Self::start)
    pub fn new(config: StoreRunnerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            stats: Arc::new(AllocatorStats::new()),
            inner: Mutex::new(RunnerInner {
                state: RunnerState::NotStarted,
                service: None,
            }),
        })
    }

    /// Build the allocator, monitor and store, then start the main service
    ///
    /// Fails with `AlreadyStarted` outside `NotStarted`. A construction
    /// failure leaves the runner in `NotStarted` so the caller may retry.
    #[instrument(skip_all, fields(socket = %self.config.socket_name))]
    pub fn start(&self, callbacks: StoreCallbacks) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != RunnerState::NotStarted {
            return Err(Error::AlreadyStarted);
        }

        let store = self.build_store(callbacks)?;
        let interval = Duration::from_millis(self.config.monitor_interval_ms.max(1));
        let service = MainService::spawn(store, interval)?;

        inner.service = Some(service);
        inner.state = RunnerState::Running;
        info!(
            system_memory = self.config.system_memory,
            hugepages_enabled = self.config.hugepages_enabled,
            "Plasma store runner started"
        );
        Ok(())
    }

    fn build_store(&self, callbacks: StoreCallbacks) -> Result<PlasmaStore> {
        let allocator = Allocator::new(
            self.config.system_memory,
            self.config.hugepages_enabled,
            &self.config.plasma_directory,
            self.config.fallback_directory(),
            self.stats.clone(),
        )?;
        let monitor = CapacityMonitor::new(
            self.config.watched_directories(),
            self.config.capacity_threshold,
        );
        Ok(PlasmaStore::new(
            allocator,
            monitor,
            callbacks,
            self.config.reclaim_policy,
        ))
    }

    /// Drain the main service and release the allocator
    ///
    /// Runs at most once; a no-op unless the runner is `Running`.
    #[instrument(skip_all)]
    pub fn stop(&self) {
        let service = {
            let mut inner = self.inner.lock();
            if inner.state != RunnerState::Running {
                debug!(state = ?inner.state, "Stop ignored");
                return;
            }
            inner.state = RunnerState::Stopping;
            inner.service.take()
        };

        if let Some(service) = service {
            service.shutdown();
        }

        self.inner.lock().state = RunnerState::Stopped;
        info!("Plasma store runner stopped");
    }

    pub fn state(&self) -> RunnerState {
        self.inner.lock().state
    }

    pub fn config(&self) -> &StoreRunnerConfig {
        &self.config
    }

    fn service_handle(&self) -> Option<ServiceHandle> {
        let inner = self.inner.lock();
        match inner.state {
            RunnerState::Running => inner.service.as_ref().map(|s| s.handle()),
            _ => None,
        }
    }

    /// Queue `task` on the main service
    ///
    /// Returns false, dropping the task, if the runner is not running.
    pub fn submit<F>(&self, task: F) -> bool
    where
        F: FnOnce(&mut PlasmaStore) + Send + 'static,
    {
        match self.service_handle() {
            Some(handle) => handle.post(Box::new(task)),
            None => false,
        }
    }

    /// Run `task` on the main service and await its result
    pub async fn run_on_store<F, R>(&self, task: F) -> Result<R>
    where
        F: FnOnce(&mut PlasmaStore) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        if !self.submit(move |store| {
            let _ = tx.send(task(store));
        }) {
            return Err(Error::NotRunning);
        }
        rx.await.map_err(|_| Error::NotRunning)
    }

    /// Run `task` on the main service, blocking until it completes
    ///
    /// Safe on any thread, including one driving a tokio runtime, since the
    /// store runs on its own thread. Async callers should still prefer
    /// [`run_on_store`](Self::run_on_store) to avoid stalling their executor.
    pub fn run_on_store_blocking<F, R>(&self, task: F) -> Result<R>
    where
        F: FnOnce(&mut PlasmaStore) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        if !self.submit(move |store| {
            let _ = tx.send(task(store));
        }) {
            return Err(Error::NotRunning);
        }
        rx.recv().map_err(|_| Error::NotRunning)
    }

    /// Whether the object is sealed and unreferenced
    ///
    /// Callable from any thread. False for unknown objects and when the runner
    /// is not running.
    pub fn is_plasma_object_spillable(&self, object_id: &ObjectId) -> bool {
        let object_id = *object_id;
        self.run_on_store_blocking(move |store| store.is_object_spillable(&object_id))
            .unwrap_or(false)
    }

    pub async fn is_plasma_object_spillable_async(&self, object_id: &ObjectId) -> bool {
        let object_id = *object_id;
        self.run_on_store(move |store| store.is_object_spillable(&object_id))
            .await
            .unwrap_or(false)
    }

    pub fn consumed_bytes(&self) -> u64 {
        self.stats.consumed_bytes()
    }

    pub fn cumulative_created_objects(&self) -> u64 {
        self.stats.cumulative_created_objects()
    }

    pub fn cumulative_created_bytes(&self) -> u64 {
        self.stats.cumulative_created_bytes()
    }

    pub fn fallback_allocated(&self) -> u64 {
        self.stats.fallback_allocated_bytes()
    }

    /// Compute available memory on the main service and hand it to `callback`
    ///
    /// The callback never runs if the runner is not running or stops first.
    pub fn get_available_memory_async<F>(&self, callback: F)
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.submit(move |store| callback(store.available_memory()));
    }
}

impl Drop for PlasmaStoreRunner {
    fn drop(&mut self) {
        self.stop();
    }
}
