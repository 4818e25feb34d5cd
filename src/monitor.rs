//! Capacity monitor for the plasma and fallback directories
//!
//! Features:
//! - Free-space sampling per watched directory
//! - Over-capacity signal against a used-fraction threshold
//! - Pluggable probes (sysinfo-backed by default)

use std::path::{Path, PathBuf};
use sysinfo::Disks;
use tracing::{debug, info, warn};

/// Space figures for the filesystem holding a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl DiskUsage {
    /// Fraction of the filesystem in use, 0.0 for an empty filesystem
    pub fn used_fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        1.0 - self.available_bytes as f64 / self.total_bytes as f64
    }
}

/// Source of disk usage figures
pub trait SpaceProbe: Send {
    /// Usage of the filesystem holding `path`, `None` if it cannot be determined
    fn usage(&mut self, path: &Path) -> Option<DiskUsage>;
}

/// Probe backed by the system disk list
///
/// Picks the disk with the longest mount point containing the path.
#[derive(Debug, Default)]
pub struct SysinfoProbe;

impl SpaceProbe for SysinfoProbe {
    fn usage(&mut self, path: &Path) -> Option<DiskUsage> {
        let target = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let disks = Disks::new_with_refreshed_list();

        disks
            .list()
            .iter()
            .filter(|disk| target.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| DiskUsage {
                total_bytes: disk.total_space(),
                available_bytes: disk.available_space(),
            })
    }
}

/// Watches free space of the storage directories
pub struct CapacityMonitor {
    paths: Vec<PathBuf>,
    capacity_threshold: f64,
    probe: Box<dyn SpaceProbe>,
    over_capacity: bool,
}

impl CapacityMonitor {
    /// Create a monitor using the system disk list
    pub fn new(paths: Vec<PathBuf>, capacity_threshold: f64) -> Self {
        Self::with_probe(paths, capacity_threshold, Box::new(SysinfoProbe))
    }

    /// Create a monitor with a custom probe
    ///
    /// A threshold of 1.0 or more disables the monitor.
    pub fn with_probe(
        paths: Vec<PathBuf>,
        capacity_threshold: f64,
        probe: Box<dyn SpaceProbe>,
    ) -> Self {
        let mut monitor = Self {
            paths,
            capacity_threshold,
            probe,
            over_capacity: false,
        };
        monitor.refresh();
        monitor
    }

    /// Resample every watched directory and update the signal
    pub fn refresh(&mut self) -> bool {
        if self.capacity_threshold >= 1.0 {
            self.over_capacity = false;
            return false;
        }

        let mut over = false;
        for path in &self.paths {
            match self.probe.usage(path) {
                Some(usage) => {
                    let used = usage.used_fraction();
                    debug!(path = ?path, used, "Sampled directory usage");
                    if used >= self.capacity_threshold {
                        over = true;
                    }
                }
                None => debug!(path = ?path, "No filesystem found for directory"),
            }
        }

        if over && !self.over_capacity {
            warn!(
                threshold = self.capacity_threshold,
                "Storage directories over capacity, fallback allocation disabled"
            );
        } else if !over && self.over_capacity {
            info!("Storage directories back under capacity");
        }

        self.over_capacity = over;
        over
    }

    /// Last computed signal
    pub fn over_capacity(&self) -> bool {
        self.over_capacity
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn capacity_threshold(&self) -> f64 {
        self.capacity_threshold
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Probe reporting whatever usage the test sets
    #[derive(Clone)]
    pub(crate) struct FixedProbe(pub Arc<Mutex<Option<DiskUsage>>>);

    impl SpaceProbe for FixedProbe {
        fn usage(&mut self, _path: &Path) -> Option<DiskUsage> {
            *self.0.lock()
        }
    }

    fn usage(total: u64, available: u64) -> Option<DiskUsage> {
        Some(DiskUsage {
            total_bytes: total,
            available_bytes: available,
        })
    }

    #[test]
    fn test_used_fraction() {
        let u = DiskUsage {
            total_bytes: 100,
            available_bytes: 25,
        };
        assert!((u.used_fraction() - 0.75).abs() < f64::EPSILON);

        let empty = DiskUsage {
            total_bytes: 0,
            available_bytes: 0,
        };
        assert_eq!(empty.used_fraction(), 0.0);
    }

    #[test]
    fn test_over_capacity_transitions() {
        let state = Arc::new(Mutex::new(usage(100, 50)));
        let mut monitor = CapacityMonitor::with_probe(
            vec![PathBuf::from("/plasma")],
            0.9,
            Box::new(FixedProbe(state.clone())),
        );
        assert!(!monitor.over_capacity());

        *state.lock() = usage(100, 5);
        assert!(monitor.refresh());
        assert!(monitor.over_capacity());

        *state.lock() = usage(100, 50);
        assert!(!monitor.refresh());
    }

    #[test]
    fn test_threshold_one_disables() {
        let state = Arc::new(Mutex::new(usage(100, 0)));
        let mut monitor = CapacityMonitor::with_probe(
            vec![PathBuf::from("/plasma")],
            1.0,
            Box::new(FixedProbe(state)),
        );
        assert!(!monitor.refresh());
    }

    #[test]
    fn test_unknown_filesystem_is_not_over() {
        let state = Arc::new(Mutex::new(None));
        let mut monitor = CapacityMonitor::with_probe(
            vec![PathBuf::from("/nowhere")],
            0.0,
            Box::new(FixedProbe(state)),
        );
        assert!(!monitor.refresh());
    }

    #[test]
    fn test_sysinfo_probe_does_not_panic() {
        let mut probe = SysinfoProbe;
        if let Some(u) = probe.usage(&std::env::temp_dir()) {
            assert!(u.available_bytes <= u.total_bytes);
        }
    }
}
