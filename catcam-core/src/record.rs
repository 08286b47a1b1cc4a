// Persistent update record - the only state that crosses the Stage-1/Stage-2 reboot

use std::io::{Read, Write};

use crate::error::{OtaError, Result};
use crate::storage::{ImageStorage, PENDING_MARKER};

/// Durable cross-reboot intent to flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateRecord {
    #[default]
    Idle,
    Pending { size: u32 },
}

impl UpdateRecord {
    pub fn is_pending(&self) -> bool {
        matches!(self, UpdateRecord::Pending { .. })
    }

    pub fn expected_size(&self) -> Option<u32> {
        match self {
            UpdateRecord::Pending { size } => Some(*size),
            UpdateRecord::Idle => None,
        }
    }
}

/// Every call completes durably before returning.
pub trait UpdateRecordStore {
    fn load(&self) -> Result<UpdateRecord>;

    fn set_pending(&mut self, size: u32) -> Result<()>;

    fn clear_pending(&mut self) -> Result<()>;

    /// An unreadable record is reported as "nothing pending".
    fn has_pending(&self) -> bool {
        match self.load() {
            Ok(record) => record.is_pending(),
            Err(e) => {
                log::warn!("Update record unreadable, treating as idle: {}", e);
                false
            }
        }
    }
}

impl<T: UpdateRecordStore + ?Sized> UpdateRecordStore for Box<T> {
    fn load(&self) -> Result<UpdateRecord> {
        (**self).load()
    }

    fn set_pending(&mut self, size: u32) -> Result<()> {
        (**self).set_pending(size)
    }

    fn clear_pending(&mut self) -> Result<()> {
        (**self).clear_pending()
    }
}

/// Marker file next to the staged image. Present means pending; its content is
/// the decimal expected size.
#[derive(Debug, Clone)]
pub struct MarkerFileRecord<S> {
    storage: S,
}

impl<S: ImageStorage> MarkerFileRecord<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }
}

impl<S: ImageStorage> UpdateRecordStore for MarkerFileRecord<S> {
    fn load(&self) -> Result<UpdateRecord> {
        if !self.storage.exists(PENDING_MARKER) {
            return Ok(UpdateRecord::Idle);
        }

        let mut text = String::new();
        self.storage.open(PENDING_MARKER)?.read_to_string(&mut text)?;
        let size = text
            .trim()
            .parse::<u32>()
            .map_err(|_| OtaError::storage(format!("marker holds '{}', not a size", text.trim())))?;

        Ok(UpdateRecord::Pending { size })
    }

    fn set_pending(&mut self, size: u32) -> Result<()> {
        let mut marker = self.storage.create(PENDING_MARKER)?;
        marker.write_all(size.to_string().as_bytes())?;
        self.storage.commit(marker)
    }

    fn clear_pending(&mut self) -> Result<()> {
        self.storage.remove(PENDING_MARKER)
    }
}

/// Two backends read as one.
///
/// Writes go to `primary`; reads report pending if either backend does, so a
/// record written by a build configured for the other backend is still found.
/// Clearing clears both.
pub struct DualRecord<A, B> {
    primary: A,
    secondary: B,
}

impl<A, B> DualRecord<A, B> {
    pub fn new(primary: A, secondary: B) -> Self {
        Self { primary, secondary }
    }
}

impl<A: UpdateRecordStore, B: UpdateRecordStore> UpdateRecordStore for DualRecord<A, B> {
    fn load(&self) -> Result<UpdateRecord> {
        match (self.primary.load(), self.secondary.load()) {
            (Ok(r @ UpdateRecord::Pending { .. }), _) => Ok(r),
            (_, Ok(r @ UpdateRecord::Pending { .. })) => Ok(r),
            (Ok(UpdateRecord::Idle), _) | (_, Ok(UpdateRecord::Idle)) => Ok(UpdateRecord::Idle),
            (Err(e), Err(_)) => Err(e),
        }
    }

    fn set_pending(&mut self, size: u32) -> Result<()> {
        self.primary.set_pending(size)
    }

    fn clear_pending(&mut self) -> Result<()> {
        let first = self.primary.clear_pending();
        let second = self.secondary.clear_pending();
        first.and(second)
    }
}
