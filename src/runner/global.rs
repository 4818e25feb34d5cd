//! Process-wide runner handle
//!
//! The primary shared-memory reservation is process-global, so exactly one
//! runner may be installed per process. Components that need it should still
//! receive the `Arc` explicitly; the global is for call sites that cannot.

use super::PlasmaStoreRunner;
use crate::error::{Error, Result};
use std::sync::{Arc, OnceLock};
use tracing::info;

static PLASMA_STORE_RUNNER: OnceLock<Arc<PlasmaStoreRunner>> = OnceLock::new();

/// Install the process runner, failing if one is already installed
pub fn install(runner: PlasmaStoreRunner) -> Result<Arc<PlasmaStoreRunner>> {
    let runner = Arc::new(runner);
    PLASMA_STORE_RUNNER
        .set(runner.clone())
        .map_err(|_| Error::AlreadyInstalled)?;

    info!(socket = %runner.config().socket_name, "Installed process plasma store runner");
    Ok(runner)
}

/// The installed runner, if any
pub fn global() -> Option<Arc<PlasmaStoreRunner>> {
    PLASMA_STORE_RUNNER.get().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreRunnerConfig;
    use crate::runner::RunnerState;

    // The only test in this binary that touches the global handle
    #[test]
    fn test_install_once() {
        let config = StoreRunnerConfig::new("global_socket", 1000, false, "/tmp/plasma_global", "");

        let installed = install(PlasmaStoreRunner::new(config.clone()).unwrap()).unwrap();
        assert_eq!(installed.state(), RunnerState::NotStarted);

        let second = install(PlasmaStoreRunner::new(config).unwrap());
        assert!(matches!(second, Err(Error::AlreadyInstalled)));

        let handle = global().expect("runner installed");
        assert!(Arc::ptr_eq(&handle, &installed));
    }
}
