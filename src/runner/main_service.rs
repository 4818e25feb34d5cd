//! The store's single-threaded execution context
//!
//! A dedicated OS thread drives a tokio current-thread runtime. Work arrives
//! as boxed closures over an unbounded channel and runs against the store one
//! at a time; a ticker refreshes the capacity monitor between tasks.

use crate::error::{Error, Result};
use crate::store::PlasmaStore;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// A unit of work executed on the main service
pub type StoreTask = Box<dyn FnOnce(&mut PlasmaStore) + Send + 'static>;

enum Message {
    Run(StoreTask),
    Shutdown,
}

/// Cloneable handle for posting tasks to the main service
#[derive(Clone)]
pub struct ServiceHandle {
    tx: mpsc::UnboundedSender<Message>,
}

impl ServiceHandle {
    /// Queue a task, returning false if the service no longer accepts work
    pub fn post(&self, task: StoreTask) -> bool {
        self.tx.send(Message::Run(task)).is_ok()
    }
}

/// Owner of the main service thread
pub struct MainService {
    handle: ServiceHandle,
    thread: JoinHandle<()>,
}

impl MainService {
    /// Move `store` onto a new service thread and start processing tasks
    pub fn spawn(store: PlasmaStore, monitor_interval: Duration) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| {
                Error::ConstructionFailure(format!("Failed to build store runtime: {}", e))
            })?;

        let (tx, rx) = mpsc::unbounded_channel();

        let thread = std::thread::Builder::new()
            .name("plasma-store".to_string())
            .spawn(move || {
                runtime.block_on(run(store, rx, monitor_interval));
            })
            .map_err(|e| {
                Error::ConstructionFailure(format!("Failed to spawn store thread: {}", e))
            })?;

        Ok(Self {
            handle: ServiceHandle { tx },
            thread,
        })
    }

    pub fn handle(&self) -> ServiceHandle {
        self.handle.clone()
    }

    /// Stop accepting work, finish queued tasks, and join the thread
    ///
    /// Blocks the caller. Must not be called from a task on this service.
    pub fn shutdown(self) {
        // The receiver may already be gone if a task panicked
        let _ = self.handle.tx.send(Message::Shutdown);
        drop(self.handle);

        if self.thread.join().is_err() {
            error!("Plasma store thread panicked");
        }
    }
}

async fn run(
    mut store: PlasmaStore,
    mut rx: mpsc::UnboundedReceiver<Message>,
    monitor_interval: Duration,
) {
    info!("Plasma store main service started");

    let mut ticker = tokio::time::interval(monitor_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The monitor sampled once at construction
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            message = rx.recv() => match message {
                Some(Message::Run(task)) => task(&mut store),
                Some(Message::Shutdown) | None => break,
            },
            _ = ticker.tick() => {
                store.refresh_capacity();
            }
        }
    }

    rx.close();
    let mut drained = 0usize;
    while let Ok(message) = rx.try_recv() {
        if let Message::Run(task) = message {
            task(&mut store);
            drained += 1;
        }
    }
    debug!(drained, "Drained plasma store tasks");

    drop(store);
    info!("Plasma store main service stopped");
}
