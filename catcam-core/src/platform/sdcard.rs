// SD card mounted as FAT at /sdcard through the VFS

use esp_idf_hal::gpio::{InputPin, OutputPin};
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_hal::sd::mmc::{SdMmcHostDriver, SlotConfiguration, SDMMC1};
use esp_idf_hal::sd::{SdCardConfiguration, SdCardDriver};
use esp_idf_svc::fs::fatfs::Fatfs;
use esp_idf_svc::io::vfs::MountedFatfs;

use crate::error::{OtaError, Result};
use crate::storage::SD_MOUNT_POINT;

const MAX_OPEN_FILES: usize = 4;

/// Mount the card in 1-bit SDMMC mode. Keep the returned handle alive for as
/// long as the filesystem is used; dropping it unmounts.
pub fn mount_sd_card<'d>(
    slot: impl Peripheral<P = SDMMC1> + 'd,
    cmd: impl Peripheral<P = impl OutputPin> + 'd,
    clk: impl Peripheral<P = impl OutputPin> + 'd,
    d0: impl Peripheral<P = impl InputPin + OutputPin> + 'd,
) -> Result<impl Sized + 'd> {
    let host = SdMmcHostDriver::new_1bit(
        slot,
        cmd,
        clk,
        d0,
        None::<esp_idf_hal::gpio::AnyIOPin>,
        None::<esp_idf_hal::gpio::AnyIOPin>,
        &SlotConfiguration::new(),
    )
    .map_err(|e| OtaError::storage(format!("sdmmc host: {}", e)))?;

    let card = SdCardDriver::new_mmc(host, &SdCardConfiguration::new())
        .map_err(|e| OtaError::storage(format!("sd card init: {}", e)))?;

    let fatfs = Fatfs::new_sdcard(0, card).map_err(|e| OtaError::storage(format!("fatfs: {}", e)))?;

    let mounted = MountedFatfs::mount(fatfs, SD_MOUNT_POINT, MAX_OPEN_FILES)
        .map_err(|e| OtaError::storage(format!("mount {}: {}", SD_MOUNT_POINT, e)))?;

    log::info!("SD card mounted at {}", SD_MOUNT_POINT);
    Ok(mounted)
}
