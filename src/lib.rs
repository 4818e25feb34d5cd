// Plasma Store - Rust Implementation
// Lifecycle and memory-pressure coordinator for a shared-memory object store

#![warn(rust_2018_idioms)]

pub mod allocator;
pub mod config;
pub mod metrics;
pub mod monitor;
pub mod object;
pub mod runner;
pub mod store;

// Re-exports for convenience
pub use allocator::{Allocation, AllocationKind, Allocator, AllocatorStats};
pub use config::{ReclaimPolicy, StoreRunnerConfig};
pub use monitor::CapacityMonitor;
pub use object::{ObjectId, ObjectInfo, ObjectLocation, ObjectState};
pub use runner::{PlasmaStoreRunner, RunnerState};
pub use store::{
    CapacityObserver, ObjectDirectoryNotifier, PlasmaStore, Spiller, StoreCallbacks,
};

/// Plasma store error types
pub mod error {
    use crate::object::ObjectId;
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Construction failure: {0}")]
        ConstructionFailure(String),

        #[error("Out of memory: cannot allocate {requested} bytes")]
        OutOfMemory { requested: u64 },

        #[error("Object already exists: {0}")]
        ObjectExists(ObjectId),

        #[error("Unknown object: {0}")]
        UnknownObject(ObjectId),

        #[error("Object already sealed: {0}")]
        AlreadySealed(ObjectId),

        #[error("Object in use: {0}")]
        ObjectInUse(ObjectId),

        #[error("Object not referenced: {0}")]
        NotReferenced(ObjectId),

        #[error("Object not in memory: {0}")]
        NotInMemory(ObjectId),

        #[error("Allocator corruption: {0}")]
        AllocatorCorruption(String),

        #[error("Runner not running")]
        NotRunning,

        #[error("Runner already started")]
        AlreadyStarted,

        #[error("Runner already installed")]
        AlreadyInstalled,

        #[error("Configuration error: {0}")]
        Config(String),
    }

    impl Error {
        /// Invariant violations that must not be survived.
        pub fn is_fatal(&self) -> bool {
            matches!(self, Error::AllocatorCorruption(_))
        }
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
