// Partition directory backed by the ESP-IDF partition and OTA APIs

use core::ffi::CStr;
use std::ffi::CString;

use esp_idf_sys::{
    esp, esp_ota_get_boot_partition, esp_ota_get_next_update_partition,
    esp_ota_get_running_partition, esp_ota_set_boot_partition, esp_partition_find_first,
    esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_ANY,
    esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_APP_FACTORY,
    esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_APP_OTA_0, esp_partition_t,
    esp_partition_type_t_ESP_PARTITION_TYPE_APP,
};

use crate::error::{OtaError, Result};
use crate::partition::{PartitionDescriptor, PartitionDirectory};

#[derive(Debug, Default, Clone, Copy)]
pub struct EspPartitionDirectory;

impl EspPartitionDirectory {
    pub fn new() -> Self {
        Self
    }
}

fn describe(ptr: *const esp_partition_t, running: Option<*const esp_partition_t>) -> Option<PartitionDescriptor> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: partition table entries are static for the lifetime of the program.
    let part = unsafe { &*ptr };
    let label = unsafe { CStr::from_ptr(part.label.as_ptr()) }.to_string_lossy().into_owned();
    let running = match running {
        Some(r) => r == ptr,
        None => unsafe { esp_ota_get_running_partition() } == ptr,
    };
    Some(PartitionDescriptor::new(label, part.address, part.size, running))
}

/// Look the raw table entry for a descriptor back up, matching on label and address.
pub(crate) fn find_app_partition(partition: &PartitionDescriptor) -> Result<*const esp_partition_t> {
    let label = CString::new(partition.label.as_str())
        .map_err(|_| OtaError::flash(format!("bad partition label '{}'", partition.label)))?;
    let ptr = unsafe {
        esp_partition_find_first(
            esp_partition_type_t_ESP_PARTITION_TYPE_APP,
            esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_ANY,
            label.as_ptr(),
        )
    };
    if ptr.is_null() {
        return Err(OtaError::flash(format!("partition '{}' not found", partition.label)));
    }
    if unsafe { (*ptr).address } != partition.address {
        return Err(OtaError::flash(format!(
            "partition '{}' moved from 0x{:x}",
            partition.label, partition.address
        )));
    }
    Ok(ptr)
}

fn find_by_subtype(subtype: u32) -> Option<PartitionDescriptor> {
    let ptr = unsafe {
        esp_partition_find_first(esp_partition_type_t_ESP_PARTITION_TYPE_APP, subtype, core::ptr::null())
    };
    describe(ptr, None)
}

impl PartitionDirectory for EspPartitionDirectory {
    fn running_partition(&self) -> Result<PartitionDescriptor> {
        let ptr = unsafe { esp_ota_get_running_partition() };
        describe(ptr, Some(ptr)).ok_or_else(|| OtaError::flash("running partition unknown"))
    }

    fn next_update_partition(&self) -> Result<PartitionDescriptor> {
        let ptr = unsafe { esp_ota_get_next_update_partition(core::ptr::null()) };
        describe(ptr, None).ok_or_else(|| OtaError::flash("no OTA update partition"))
    }

    fn boot_partition(&self) -> Result<PartitionDescriptor> {
        let ptr = unsafe { esp_ota_get_boot_partition() };
        describe(ptr, None).ok_or_else(|| OtaError::flash("boot partition unknown"))
    }

    fn factory_partition(&self) -> Option<PartitionDescriptor> {
        find_by_subtype(esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_APP_FACTORY)
    }

    fn main_application_partition(&self) -> Option<PartitionDescriptor> {
        find_by_subtype(esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_APP_OTA_0)
    }

    fn set_boot_partition(&mut self, partition: &PartitionDescriptor) -> Result<()> {
        let ptr = find_app_partition(partition)?;
        esp!(unsafe { esp_ota_set_boot_partition(ptr) })
            .map_err(|e| OtaError::flash(format!("set boot partition '{}': {}", partition.label, e)))
    }
}
