// Removable storage used to stage firmware images between the two stages

use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;

use crate::error::{OtaError, Result};

/// Mount point of the SD card in the VFS.
pub const SD_MOUNT_POINT: &str = "/sdcard";
/// Staged firmware image, relative to the storage root.
pub const FIRMWARE_IMAGE: &str = "firmware_update.bin";
/// Marker file used when the key/value store does not hold the update record.
pub const PENDING_MARKER: &str = "ota_pending";

pub trait ImageStorage {
    type Reader: Read;
    type Writer: Write;

    /// Create (truncating) a file for writing.
    fn create(&self, name: &str) -> Result<Self::Writer>;

    /// Flush and durably close a file produced by [`ImageStorage::create`].
    fn commit(&self, writer: Self::Writer) -> Result<()>;

    fn open(&self, name: &str) -> Result<Self::Reader>;

    fn size(&self, name: &str) -> Result<u64>;

    fn exists(&self, name: &str) -> bool;

    /// Remove a file. Removing a missing file is not an error.
    fn remove(&self, name: &str) -> Result<()>;
}

/// `std::fs` backed storage rooted at a VFS mount point.
#[derive(Debug, Clone)]
pub struct FsImageStorage {
    root: PathBuf,
}

impl FsImageStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn sd_card() -> Self {
        Self::new(SD_MOUNT_POINT)
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name.trim_start_matches('/'))
    }
}

impl ImageStorage for FsImageStorage {
    type Reader = File;
    type Writer = File;

    fn create(&self, name: &str) -> Result<File> {
        File::create(self.path(name))
            .map_err(|e| OtaError::storage(format!("create {}: {}", name, e)))
    }

    fn commit(&self, mut writer: File) -> Result<()> {
        writer.flush()?;
        writer.sync_all()?;
        Ok(())
    }

    fn open(&self, name: &str) -> Result<File> {
        File::open(self.path(name)).map_err(|e| OtaError::storage(format!("open {}: {}", name, e)))
    }

    fn size(&self, name: &str) -> Result<u64> {
        fs::metadata(self.path(name))
            .map(|m| m.len())
            .map_err(|e| OtaError::storage(format!("stat {}: {}", name, e)))
    }

    fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    fn remove(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(OtaError::storage(format!("remove {}: {}", name, e))),
        }
    }
}

/// Remove a staged file, logging instead of failing. Used on every abort path.
pub fn discard<S: ImageStorage + ?Sized>(storage: &S, name: &str) {
    match storage.remove(name) {
        Ok(()) => log::info!("Deleted {}", name),
        Err(e) => log::warn!("Failed to delete {}: {}", name, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("catcam-storage-{}-{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn create_commit_size_and_remove() {
        let dir = scratch_dir("roundtrip");
        let storage = FsImageStorage::new(&dir);

        let mut file = storage.create(FIRMWARE_IMAGE).unwrap();
        file.write_all(&[0xE9; 1500]).unwrap();
        storage.commit(file).unwrap();

        assert!(storage.exists(FIRMWARE_IMAGE));
        assert_eq!(storage.size(FIRMWARE_IMAGE).unwrap(), 1500);

        storage.remove(FIRMWARE_IMAGE).unwrap();
        assert!(!storage.exists(FIRMWARE_IMAGE));
        // second removal is a no-op
        storage.remove(FIRMWARE_IMAGE).unwrap();

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn missing_file_reports_storage_error() {
        let dir = scratch_dir("missing");
        let storage = FsImageStorage::new(&dir);
        assert!(matches!(storage.size(FIRMWARE_IMAGE), Err(OtaError::Storage(_))));
        assert!(matches!(storage.open("/firmware_update.bin"), Err(OtaError::Storage(_))));
        fs::remove_dir_all(dir).unwrap();
    }
}
