//! Callback contracts between the store and external subsystems
//!
//! All callbacks run inline on the store's main service. They must return
//! quickly and hand long work off elsewhere; blocking them stalls every
//! object operation. They must not stop the runner.

use crate::object::{ObjectId, ObjectInfo};
use std::sync::Arc;

/// Persists objects to external storage
pub trait Spiller: Send + Sync {
    /// Ask for `object_ids` to be spilled
    ///
    /// Returning `true` hands the objects over: the store frees their
    /// in-memory backing immediately and marks them spilled. Persistence
    /// itself completes asynchronously.
    fn spill_objects(&self, object_ids: &[ObjectId]) -> bool;
}

impl<F> Spiller for F
where
    F: Fn(&[ObjectId]) -> bool + Send + Sync,
{
    fn spill_objects(&self, object_ids: &[ObjectId]) -> bool {
        self(object_ids)
    }
}

/// Receives backpressure when creation cannot be satisfied
pub trait CapacityObserver: Send + Sync {
    fn on_object_store_full(&self);
}

impl<F> CapacityObserver for F
where
    F: Fn() + Send + Sync,
{
    fn on_object_store_full(&self) {
        self()
    }
}

/// Keeps an external object directory consistent with the store
///
/// For one object id, `on_object_added` always precedes `on_object_deleted`,
/// and each fires at most once.
pub trait ObjectDirectoryNotifier: Send + Sync {
    fn on_object_added(&self, info: &ObjectInfo);
    fn on_object_deleted(&self, object_id: &ObjectId);
}

/// Directory notifier built from a pair of closures
pub struct FnDirectoryNotifier<A, D> {
    add: A,
    delete: D,
}

impl<A, D> ObjectDirectoryNotifier for FnDirectoryNotifier<A, D>
where
    A: Fn(&ObjectInfo) + Send + Sync,
    D: Fn(&ObjectId) + Send + Sync,
{
    fn on_object_added(&self, info: &ObjectInfo) {
        (self.add)(info)
    }

    fn on_object_deleted(&self, object_id: &ObjectId) {
        (self.delete)(object_id)
    }
}

/// The callbacks a store is wired to at construction
#[derive(Clone)]
pub struct StoreCallbacks {
    pub spiller: Arc<dyn Spiller>,
    pub capacity_observer: Arc<dyn CapacityObserver>,
    pub directory: Arc<dyn ObjectDirectoryNotifier>,
}

impl StoreCallbacks {
    pub fn new(
        spiller: Arc<dyn Spiller>,
        capacity_observer: Arc<dyn CapacityObserver>,
        directory: Arc<dyn ObjectDirectoryNotifier>,
    ) -> Self {
        Self {
            spiller,
            capacity_observer,
            directory,
        }
    }

    /// Wire the four callbacks from closures
    pub fn from_fns<S, F, A, D>(
        spill_objects_callback: S,
        object_store_full_callback: F,
        add_object_callback: A,
        delete_object_callback: D,
    ) -> Self
    where
        S: Fn(&[ObjectId]) -> bool + Send + Sync + 'static,
        F: Fn() + Send + Sync + 'static,
        A: Fn(&ObjectInfo) + Send + Sync + 'static,
        D: Fn(&ObjectId) + Send + Sync + 'static,
    {
        Self {
            spiller: Arc::new(spill_objects_callback),
            capacity_observer: Arc::new(object_store_full_callback),
            directory: Arc::new(FnDirectoryNotifier {
                add: add_object_callback,
                delete: delete_object_callback,
            }),
        }
    }
}

impl std::fmt::Debug for StoreCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreCallbacks").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_closures_drive_callbacks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (c1, c2, c3, c4) = (calls.clone(), calls.clone(), calls.clone(), calls.clone());

        let callbacks = StoreCallbacks::from_fns(
            move |ids: &[ObjectId]| {
                c1.fetch_add(ids.len(), Ordering::SeqCst);
                true
            },
            move || {
                c2.fetch_add(10, Ordering::SeqCst);
            },
            move |_info: &ObjectInfo| {
                c3.fetch_add(100, Ordering::SeqCst);
            },
            move |_id: &ObjectId| {
                c4.fetch_add(1000, Ordering::SeqCst);
            },
        );

        let id = ObjectId::from_random();
        assert!(callbacks.spiller.spill_objects(&[id, id]));
        callbacks.capacity_observer.on_object_store_full();
        callbacks
            .directory
            .on_object_added(&ObjectInfo::new(id, 1, Bytes::new()));
        callbacks.directory.on_object_deleted(&id);

        assert_eq!(calls.load(Ordering::SeqCst), 1112);
    }
}
