// Flash write sessions on top of esp_ota_begin/write/end

use core::ffi::c_void;

use esp_idf_sys::{
    esp, esp_ota_abort, esp_ota_begin, esp_ota_end, esp_ota_handle_t, esp_ota_write,
    ESP_ERR_OTA_VALIDATE_FAILED, OTA_WITH_SEQUENTIAL_WRITES,
};

use crate::error::{OtaError, Result};
use crate::flash::{EraseMode, FlashSession, FlashWriter};
use crate::partition::PartitionDescriptor;
use crate::platform::partitions::find_app_partition;

#[derive(Debug, Default, Clone, Copy)]
pub struct EspFlashWriter;

pub struct EspFlashSession {
    handle: esp_ota_handle_t,
    written: usize,
}

impl FlashWriter for EspFlashWriter {
    type Session = EspFlashSession;

    fn begin(
        &mut self,
        partition: &PartitionDescriptor,
        image_size: u32,
        mode: EraseMode,
    ) -> Result<EspFlashSession> {
        let ptr = find_app_partition(partition)?;
        let erase_size = match mode {
            EraseMode::Full => image_size as usize,
            EraseMode::Incremental => OTA_WITH_SEQUENTIAL_WRITES as usize,
        };

        let mut handle: esp_ota_handle_t = 0;
        esp!(unsafe { esp_ota_begin(ptr, erase_size, &mut handle) })
            .map_err(|e| OtaError::flash(format!("esp_ota_begin on '{}': {}", partition.label, e)))?;

        log::info!("Flash session open on '{}' ({:?} erase)", partition.label, mode);
        Ok(EspFlashSession { handle, written: 0 })
    }
}

impl FlashSession for EspFlashSession {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        esp!(unsafe { esp_ota_write(self.handle, data.as_ptr() as *const c_void, data.len()) })
            .map_err(|e| OtaError::flash(format!("esp_ota_write at {}: {}", self.written, e)))?;
        self.written += data.len();
        Ok(())
    }

    fn finalize(self) -> Result<()> {
        let err = unsafe { esp_ota_end(self.handle) };
        if err == ESP_ERR_OTA_VALIDATE_FAILED as i32 {
            return Err(OtaError::flash("image validation failed"));
        }
        esp!(err).map_err(|e| OtaError::flash(format!("esp_ota_end: {}", e)))
    }

    fn abort(self) {
        let err = unsafe { esp_ota_abort(self.handle) };
        if err != 0 {
            log::warn!("esp_ota_abort returned {}", err);
        }
    }
}
