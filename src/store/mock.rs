//! Recording callbacks for testing
//!
//! This module provides store callbacks that record every invocation
//! so tests can assert on what the store signalled and in which order.

use super::callbacks::{CapacityObserver, ObjectDirectoryNotifier, Spiller, StoreCallbacks};
use crate::object::{ObjectId, ObjectInfo};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A callback invocation observed by [`RecordingCallbacks`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackEvent {
    Spill(Vec<ObjectId>),
    StoreFull,
    Added(ObjectId),
    Deleted(ObjectId),
}

/// Callbacks that record every invocation
pub struct RecordingCallbacks {
    events: Mutex<Vec<CallbackEvent>>,
    accept_spills: AtomicBool,
}

impl RecordingCallbacks {
    /// Create a recorder that accepts every spill request
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            accept_spills: AtomicBool::new(true),
        })
    }

    /// Decide whether later spill requests are accepted
    pub fn set_accept_spills(&self, accept: bool) {
        self.accept_spills.store(accept, Ordering::SeqCst);
    }

    /// Wire this recorder as all three collaborators
    pub fn callbacks(self: &Arc<Self>) -> StoreCallbacks {
        StoreCallbacks::new(self.clone(), self.clone(), self.clone())
    }

    pub fn events(&self) -> Vec<CallbackEvent> {
        self.events.lock().clone()
    }

    /// Number of spill requests received
    pub fn spill_requests(&self) -> usize {
        self.count(|e| matches!(e, CallbackEvent::Spill(_)))
    }

    /// Number of store-full signals received
    pub fn store_full_count(&self) -> usize {
        self.count(|e| matches!(e, CallbackEvent::StoreFull))
    }

    pub fn added(&self) -> Vec<ObjectId> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                CallbackEvent::Added(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn deleted(&self) -> Vec<ObjectId> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                CallbackEvent::Deleted(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    fn count(&self, pred: impl Fn(&CallbackEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    fn record(&self, event: CallbackEvent) {
        self.events.lock().push(event);
    }
}

impl Spiller for RecordingCallbacks {
    fn spill_objects(&self, object_ids: &[ObjectId]) -> bool {
        self.record(CallbackEvent::Spill(object_ids.to_vec()));
        self.accept_spills.load(Ordering::SeqCst)
    }
}

impl CapacityObserver for RecordingCallbacks {
    fn on_object_store_full(&self) {
        self.record(CallbackEvent::StoreFull);
    }
}

impl ObjectDirectoryNotifier for RecordingCallbacks {
    fn on_object_added(&self, info: &ObjectInfo) {
        self.record(CallbackEvent::Added(info.object_id));
    }

    fn on_object_deleted(&self, object_id: &ObjectId) {
        self.record(CallbackEvent::Deleted(*object_id));
    }
}
