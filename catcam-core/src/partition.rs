// Partition directory - read-only view of the flash layout plus the boot pointer

use crate::error::{OtaError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionDescriptor {
    pub label: String,
    pub address: u32,
    pub size: u32,
    pub running: bool,
}

impl PartitionDescriptor {
    pub fn new(label: impl Into<String>, address: u32, size: u32, running: bool) -> Self {
        Self { label: label.into(), address, size, running }
    }

    /// Two descriptors name the same flash range regardless of how they were obtained.
    pub fn same_region(&self, other: &PartitionDescriptor) -> bool {
        self.address == other.address && self.size == other.size
    }
}

/// Where an installer writes the staged image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallTarget {
    /// The alternate slot of a two-slot layout.
    NextUpdatePartition,
    /// The single main-application slot, written by the factory loader.
    MainApplication,
}

pub trait PartitionDirectory {
    fn running_partition(&self) -> Result<PartitionDescriptor>;

    /// The alternate region. Implementations report what the hardware says;
    /// callers must go through [`checked_update_target`] before writing.
    fn next_update_partition(&self) -> Result<PartitionDescriptor>;

    fn boot_partition(&self) -> Result<PartitionDescriptor>;

    fn factory_partition(&self) -> Option<PartitionDescriptor>;

    fn main_application_partition(&self) -> Option<PartitionDescriptor>;

    /// Durably select the partition booted next. Idempotent.
    fn set_boot_partition(&mut self, partition: &PartitionDescriptor) -> Result<()>;
}

/// Look up the install target without the running-partition check.
///
/// Stage-1 uses this for its early capacity check; in loader-driven mode the
/// main application is both running and the eventual target.
pub fn resolve_target<D>(directory: &D, target: InstallTarget) -> Result<PartitionDescriptor>
where
    D: PartitionDirectory + ?Sized,
{
    match target {
        InstallTarget::NextUpdatePartition => directory.next_update_partition(),
        InstallTarget::MainApplication => directory
            .main_application_partition()
            .ok_or_else(|| OtaError::flash("no main application partition")),
    }
}

/// Resolve the partition about to be written and refuse it if it is executing.
pub fn checked_target<D>(directory: &D, target: InstallTarget) -> Result<PartitionDescriptor>
where
    D: PartitionDirectory + ?Sized,
{
    let running = directory.running_partition()?;
    let candidate = resolve_target(directory, target)?;

    if candidate.same_region(&running) {
        log::error!(
            "INTEGRITY: update target '{}' @ 0x{:x} is the running partition - refusing to write",
            candidate.label,
            candidate.address
        );
        return Err(OtaError::PartitionConflict {
            label: candidate.label,
            address: candidate.address,
        });
    }

    Ok(candidate)
}

pub fn checked_update_target<D>(directory: &D) -> Result<PartitionDescriptor>
where
    D: PartitionDirectory + ?Sized,
{
    checked_target(directory, InstallTarget::NextUpdatePartition)
}

/// Size gate applied before any flash write session is opened.
pub fn ensure_capacity(partition: &PartitionDescriptor, image_size: u64) -> Result<()> {
    if image_size == 0 {
        return Err(OtaError::flash("image is empty"));
    }
    if image_size > partition.size as u64 {
        return Err(OtaError::flash(format!(
            "image of {} bytes does not fit partition '{}' ({} bytes)",
            image_size, partition.label, partition.size
        )));
    }
    Ok(())
}

/// Point the boot pointer at `partition` unless it already is.
pub fn ensure_boot_partition<D>(directory: &mut D, partition: &PartitionDescriptor) -> Result<()>
where
    D: PartitionDirectory + ?Sized,
{
    match directory.boot_partition() {
        Ok(current) if current.same_region(partition) => Ok(()),
        _ => {
            log::info!("Setting boot partition to '{}'", partition.label);
            directory.set_boot_partition(partition)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Table {
        running: PartitionDescriptor,
        next: PartitionDescriptor,
        boot: PartitionDescriptor,
        sets: u32,
    }

    impl PartitionDirectory for Table {
        fn running_partition(&self) -> Result<PartitionDescriptor> {
            Ok(self.running.clone())
        }
        fn next_update_partition(&self) -> Result<PartitionDescriptor> {
            Ok(self.next.clone())
        }
        fn boot_partition(&self) -> Result<PartitionDescriptor> {
            Ok(self.boot.clone())
        }
        fn factory_partition(&self) -> Option<PartitionDescriptor> {
            None
        }
        fn main_application_partition(&self) -> Option<PartitionDescriptor> {
            Some(self.next.clone())
        }
        fn set_boot_partition(&mut self, partition: &PartitionDescriptor) -> Result<()> {
            self.boot = partition.clone();
            self.sets += 1;
            Ok(())
        }
    }

    fn slot(label: &str, address: u32) -> PartitionDescriptor {
        PartitionDescriptor::new(label, address, 0x100000, false)
    }

    #[test]
    fn conflict_is_reported_when_next_equals_running() {
        let table = Table {
            running: slot("ota_0", 0x110000),
            next: slot("ota_0", 0x110000),
            boot: slot("ota_0", 0x110000),
            sets: 0,
        };
        let err = checked_update_target(&table).unwrap_err();
        assert!(err.is_integrity_violation());
    }

    #[test]
    fn distinct_next_partition_is_returned() {
        let table = Table {
            running: slot("ota_0", 0x10000),
            next: slot("ota_1", 0x110000),
            boot: slot("ota_0", 0x10000),
            sets: 0,
        };
        let target = checked_update_target(&table).unwrap();
        assert_eq!(target.label, "ota_1");
    }

    #[test]
    fn capacity_gate_rejects_oversized_and_empty_images() {
        let p = slot("ota_1", 0x110000);
        assert!(ensure_capacity(&p, 0x100000).is_ok());
        assert!(matches!(ensure_capacity(&p, 0x100001), Err(OtaError::Flash(_))));
        assert!(ensure_capacity(&p, 0).is_err());
    }

    #[test]
    fn boot_pointer_is_only_written_when_it_differs() {
        let mut table = Table {
            running: slot("factory", 0x10000),
            next: slot("ota_0", 0x110000),
            boot: slot("ota_0", 0x110000),
            sets: 0,
        };
        let main = slot("ota_0", 0x110000);
        ensure_boot_partition(&mut table, &main).unwrap();
        assert_eq!(table.sets, 0);

        let factory = slot("factory", 0x10000);
        ensure_boot_partition(&mut table, &factory).unwrap();
        ensure_boot_partition(&mut table, &factory).unwrap();
        assert_eq!(table.sets, 1);
    }
}
