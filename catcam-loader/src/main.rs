//! CatCam factory loader
//!
//! Lives in the `factory` partition and runs on every reset. Installs a staged
//! image into the main application slot when one is pending, then hands over.

use anyhow::Result;
use catcam_core::loader::{pattern, run_factory_loader, LoaderDecision, StatusLed};
use catcam_core::platform::{mount_sd_card, EspFlashWriter, EspPartitionDirectory, NvsUpdateRecord};
use catcam_core::record::{DualRecord, MarkerFileRecord};
use catcam_core::stage2::LOADER_FLASH_BUFFER;
use catcam_core::storage::FsImageStorage;
use catcam_core::{UpdateContext, UpdateRecordStore};
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::gpio::{AnyOutputPin, Output, OutputPin, PinDriver};
use esp_idf_hal::prelude::*;
use esp_idf_svc::log::EspLogger;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_sys as _; // Binstart

struct BoardLed<'d> {
    pin: PinDriver<'d, AnyOutputPin, Output>,
}

impl StatusLed for BoardLed<'_> {
    fn blink(&mut self, times: u32, period_ms: u32) {
        for _ in 0..times {
            let _ = self.pin.set_high();
            FreeRtos::delay_ms(period_ms);
            let _ = self.pin.set_low();
            FreeRtos::delay_ms(period_ms);
        }
    }
}

fn restart(reason: &str) -> ! {
    log::info!("Restarting: {}", reason);
    FreeRtos::delay_ms(100);
    esp_idf_hal::reset::restart()
}

fn main() -> Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();
    log::info!("CatCam factory loader v{}", env!("CARGO_PKG_VERSION"));

    let peripherals = Peripherals::take()?;
    let nvs = EspDefaultNvsPartition::take()?;
    let mut led = BoardLed {
        pin: PinDriver::output(peripherals.pins.gpio48.downgrade_output())?,
    };

    // Without a card there is nothing to install, but the main application still boots.
    let _sd_card = match mount_sd_card(
        peripherals.sdmmc1,
        peripherals.pins.gpio38, // CMD
        peripherals.pins.gpio39, // CLK
        peripherals.pins.gpio40, // D0
    ) {
        Ok(mounted) => Some(mounted),
        Err(e) => {
            log::warn!("SD card unavailable: {}", e);
            None
        }
    };

    let storage = FsImageStorage::sd_card();
    let marker = MarkerFileRecord::new(storage.clone());
    let record: Box<dyn UpdateRecordStore> = match NvsUpdateRecord::new(nvs) {
        Ok(nvs_record) => Box::new(DualRecord::new(nvs_record, marker)),
        Err(e) => {
            log::warn!("NVS update record unavailable: {}", e);
            Box::new(marker)
        }
    };

    let mut ctx = UpdateContext::new(EspPartitionDirectory::new(), record, storage, EspFlashWriter, FreeRtos);
    let mut buf = [0u8; LOADER_FLASH_BUFFER];

    match run_factory_loader(&mut ctx, &mut led, &mut buf) {
        LoaderDecision::BootMainApplication(partition) => {
            restart(&format!("booting main application in '{}'", partition.label))
        }
        LoaderDecision::RebootIntoUpdate(partition) => {
            restart(&format!("booting updated application in '{}'", partition.label))
        }
        LoaderDecision::Halt => {
            log::error!("No main application partition, halting");
            let (times, period) = pattern::NO_APPLICATION;
            loop {
                led.blink(times, period);
            }
        }
    }
}
