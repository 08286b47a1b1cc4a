// Update record in NVS: namespace "ota", keys "pending" (u8) and "size" (u32)

use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};

use crate::error::{OtaError, Result};
use crate::record::{UpdateRecord, UpdateRecordStore};

const NAMESPACE: &str = "ota";
const KEY_PENDING: &str = "pending";
const KEY_SIZE: &str = "size";

pub struct NvsUpdateRecord {
    nvs: EspNvs<NvsDefault>,
}

fn nvs_err(op: &str, e: esp_idf_sys::EspError) -> OtaError {
    OtaError::storage(format!("nvs {}: {}", op, e))
}

impl NvsUpdateRecord {
    pub fn new(partition: EspDefaultNvsPartition) -> Result<Self> {
        let nvs = EspNvs::new(partition, NAMESPACE, true).map_err(|e| nvs_err("open", e))?;
        Ok(Self { nvs })
    }
}

impl UpdateRecordStore for NvsUpdateRecord {
    fn load(&self) -> Result<UpdateRecord> {
        let pending = self.nvs.get_u8(KEY_PENDING).map_err(|e| nvs_err("get pending", e))?;
        if pending.unwrap_or(0) == 0 {
            return Ok(UpdateRecord::Idle);
        }
        let size = self
            .nvs
            .get_u32(KEY_SIZE)
            .map_err(|e| nvs_err("get size", e))?
            .ok_or_else(|| OtaError::storage("pending flag set without a size"))?;
        Ok(UpdateRecord::Pending { size })
    }

    // Size first: a set flag always has a valid size behind it.
    fn set_pending(&mut self, size: u32) -> Result<()> {
        self.nvs.set_u32(KEY_SIZE, size).map_err(|e| nvs_err("set size", e))?;
        self.nvs.set_u8(KEY_PENDING, 1).map_err(|e| nvs_err("set pending", e))?;
        Ok(())
    }

    fn clear_pending(&mut self) -> Result<()> {
        self.nvs.set_u8(KEY_PENDING, 0).map_err(|e| nvs_err("clear pending", e))?;
        self.nvs.set_u32(KEY_SIZE, 0).map_err(|e| nvs_err("clear size", e))?;
        Ok(())
    }
}
