// Wiring of the update pipeline onto ESP-IDF

use catcam_core::platform::{EspFlashWriter, EspPartitionDirectory, NvsUpdateRecord};
use catcam_core::record::{DualRecord, MarkerFileRecord};
use catcam_core::storage::FsImageStorage;
use catcam_core::strategy::{OtaController, ResourceGovernor, StrategyConfig};
use catcam_core::{UpdateContext, UpdateRecordStore};
use esp_idf_hal::delay::FreeRtos;
use esp_idf_svc::nvs::EspDefaultNvsPartition;

use crate::config::{Config, RecordBackend};
use crate::network::EspFirmwareSource;
use crate::{logging, memory};

pub type AppRecord = Box<dyn UpdateRecordStore>;

pub type AppContext =
    UpdateContext<EspPartitionDirectory, AppRecord, FsImageStorage, EspFlashWriter, FreeRtos>;

pub type AppController = OtaController<
    EspPartitionDirectory,
    AppRecord,
    FsImageStorage,
    EspFlashWriter,
    FreeRtos,
    EspFirmwareSource,
    AppGovernor,
>;

/// Both record backends are always written on clear and read on load, so a
/// device that switched `record_backend` still sees older pending work. The
/// configured backend is the one `set_pending` writes.
pub fn build_record(nvs: EspDefaultNvsPartition, storage: &FsImageStorage, backend: RecordBackend) -> AppRecord {
    let marker = MarkerFileRecord::new(storage.clone());
    let nvs_record = match NvsUpdateRecord::new(nvs) {
        Ok(record) => record,
        Err(e) => {
            log::error!("NVS update record unavailable: {}", e);
            return Box::new(marker);
        }
    };
    match backend {
        RecordBackend::Nvs => Box::new(DualRecord::new(nvs_record, marker)),
        RecordBackend::MarkerFile => Box::new(DualRecord::new(marker, nvs_record)),
    }
}

pub fn build_context(nvs: EspDefaultNvsPartition, config: &Config) -> AppContext {
    let storage = FsImageStorage::sd_card();
    let record = build_record(nvs, &storage, config.record_backend);
    UpdateContext::new(EspPartitionDirectory::new(), record, storage, EspFlashWriter, FreeRtos)
}

pub fn build_controller(ctx: AppContext, config: &Config) -> AppController {
    let strategy = StrategyConfig {
        direct_flash_enabled: config.direct_flash_enabled,
        direct_flash_min_heap: config.direct_flash_min_heap,
    };
    OtaController::new(
        ctx,
        EspFirmwareSource::new(),
        AppGovernor::default(),
        strategy,
    )
}

/// File logging is the only service paused during a transfer; the radio and
/// Wi-Fi are what the transfer needs.
#[derive(Default)]
pub struct AppGovernor {
    /// File logging was on when the transfer started.
    resume_logging: bool,
}

impl ResourceGovernor for AppGovernor {
    fn suspend_non_essential(&mut self) {
        self.resume_logging = logging::file_logging_enabled();
        logging::set_file_logging_enabled(false);
        memory::log_memory_state("transfer start");
    }

    fn resume_non_essential(&mut self) {
        memory::log_memory_state("transfer end");
        if std::mem::take(&mut self.resume_logging) {
            logging::set_file_logging_enabled(true);
        }
    }

    fn free_internal_heap(&self) -> usize {
        memory::free_internal_heap()
    }
}
