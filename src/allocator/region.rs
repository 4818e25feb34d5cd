//! File-backed memory-mapped regions

use crate::error::{Error, Result};
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A file in a backing directory, sized and mapped read-write
///
/// The file is removed when the region is dropped.
pub struct MappedRegion {
    mmap: MmapMut,
    _file: File,
    path: PathBuf,
}

impl MappedRegion {
    /// Create, size and map `directory/file_name`
    pub fn create(directory: &Path, file_name: &str, len: u64) -> Result<Self> {
        if len == 0 {
            return Err(Error::ConstructionFailure(format!(
                "Cannot map empty region {}",
                file_name
            )));
        }

        std::fs::create_dir_all(directory).map_err(|e| {
            Error::ConstructionFailure(format!(
                "Failed to create directory {:?}: {}",
                directory, e
            ))
        })?;

        let path = directory.join(file_name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| {
                Error::ConstructionFailure(format!("Failed to open {:?}: {}", path, e))
            })?;

        file.set_len(len).map_err(|e| {
            Error::ConstructionFailure(format!("Failed to size {:?}: {}", path, e))
        })?;

        let mmap = unsafe {
            MmapOptions::new()
                .len(len as usize)
                .map_mut(&file)
                .map_err(|e| {
                    Error::ConstructionFailure(format!("Failed to map {:?}: {}", path, e))
                })?
        };

        debug!(path = ?path, len, "Mapped region");
        Ok(Self {
            mmap,
            _file: file,
            path,
        })
    }

    pub fn len(&self) -> u64 {
        self.mmap.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = ?self.path, error = %e, "Failed to remove region file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "plasma_region_{}_{}_{}",
            tag,
            std::process::id(),
            uuid::Uuid::new_v4()
        ))
    }

    #[test]
    fn test_region_file_lifecycle() -> Result<()> {
        let dir = temp_dir("lifecycle");
        let region = MappedRegion::create(&dir, "region.bin", 4096)?;
        let path = region.path().to_path_buf();

        assert_eq!(region.len(), 4096);
        assert!(path.exists());

        drop(region);
        assert!(!path.exists());

        std::fs::remove_dir_all(dir).ok();
        Ok(())
    }

    #[test]
    fn test_empty_region_rejected() {
        let dir = temp_dir("empty");
        assert!(MappedRegion::create(&dir, "empty.bin", 0).is_err());
        std::fs::remove_dir_all(dir).ok();
    }
}
