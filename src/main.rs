use anyhow::Result;
use catcam_core::boot::{prepare_boot, BootPlan};
use catcam_core::bridge::{BridgeAction, ControlBridge, Inbox, LinkFlags, RadioCallbacks};
use catcam_core::platform::mount_sd_card;
use catcam_core::stage2::APP_FLASH_BUFFER;
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::prelude::*;
use esp_idf_svc::{eventloop::EspSystemEventLoop, nvs::EspDefaultNvsPartition};
use esp_idf_sys as _; // Binstart
use static_cell::StaticCell;

use log::{info, warn};

// Generate ESP-IDF app descriptor
#[allow(unexpected_cfgs)]
mod app_desc {
    esp_idf_sys::esp_app_desc!();
}

mod bluetooth;
mod config;
mod logging;
mod memory;
mod network;
mod ota;
mod system;
mod version;

use crate::bluetooth::BleRadio;
use crate::network::WifiManager;
use crate::system::reset;

const LOOP_PERIOD_MS: u32 = 20;
// Lets the final status notification reach the phone before the reset.
const REBOOT_GRACE_MS: u32 = 2000;
const RADIO_REGISTER_TIMEOUT_MS: u32 = 3000;
const WIFI_CHECK_TICKS: u32 = 30_000 / LOOP_PERIOD_MS;

static INBOX: StaticCell<Inbox> = StaticCell::new();
static LINK: LinkFlags = LinkFlags::new();

fn main() -> Result<()> {
    // Initialize ESP-IDF
    esp_idf_svc::sys::link_patches();

    logging::init_logger().map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

    info!("BootBoots CatCam {}", version::full_version());
    info!("Boot reason: {}", reset::get_reset_reason());
    if reset::was_abnormal_reset() {
        warn!("Previous run ended abnormally");
    }

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    // Load configuration
    let config = config::load_or_default(&nvs)?;
    if !logging::set_max_level_from_str(&config.log_level) {
        warn!("Unknown log level '{}', keeping info", config.log_level);
    }
    info!("WiFi credentials: SSID='{}', Password={}",
        config.wifi_ssid,
        if config.wifi_password.is_empty() { "<empty>" } else { "<set>" }
    );

    // The card holds the staged image and possibly the marker record, so it
    // is mounted before the pending-update check.
    let _sd_card = match mount_sd_card(
        peripherals.sdmmc1,
        peripherals.pins.gpio38, // CMD
        peripherals.pins.gpio39, // CLK
        peripherals.pins.gpio40, // D0
    ) {
        Ok(mounted) => {
            if config.file_logging {
                if let Err(e) = logging::attach_file_sink() {
                    warn!("File logging unavailable: {}", e);
                }
            }
            Some(mounted)
        }
        Err(e) => {
            warn!("SD card unavailable, staged updates will fail: {}", e);
            None
        }
    };

    // Pending work is handled before the radios come up.
    let mut ctx = ota::build_context(nvs.clone(), &config);
    {
        let mut buf = [0u8; APP_FLASH_BUFFER];
        match prepare_boot(&mut ctx, &mut buf, &mut ()) {
            BootPlan::Continue => {}
            BootPlan::RebootIntoLoader => reset::restart("update staged, factory loader installs it"),
            BootPlan::RebootIntoUpdate(partition) => {
                reset::restart(&format!("new image installed in '{}'", partition.label))
            }
        }
    }
    memory::log_memory_state("boot");

    let (wifi_modem, bt_modem) = peripherals.modem.split();

    let mut wifi = WifiManager::new(
        wifi_modem,
        sys_loop.clone(),
        nvs.clone(),
        config.wifi_ssid.clone(),
        config.wifi_password.clone(),
    )?;
    if let Err(e) = wifi.connect() {
        warn!("WiFi not connected, will retry: {:?}", e);
    }

    let (producer, consumer) = INBOX.init(Inbox::new()).split();
    let radio = BleRadio::start(
        bt_modem,
        nvs.clone(),
        &config.device_name,
        RadioCallbacks::new(producer, &LINK),
    )?;

    let mut waited = 0;
    while !radio.is_registered() && waited < RADIO_REGISTER_TIMEOUT_MS {
        FreeRtos::delay_ms(50);
        waited += 50;
    }
    if !radio.is_registered() {
        warn!("BLE service still registering after {} ms", waited);
    }

    let mut bridge = ControlBridge::new(consumer, &LINK, radio, version::FIRMWARE_VERSION);
    bridge.announce_ready();

    let mut ota = ota::build_controller(ctx, &config);
    let mut delay = FreeRtos;
    memory::log_memory_state("ready");
    info!("CatCam ready as '{}'", config.device_name);

    let mut ticks: u32 = 0;
    loop {
        if bridge.handle(&mut ota, &mut delay) == BridgeAction::Reboot {
            FreeRtos::delay_ms(REBOOT_GRACE_MS);
            reset::restart("update session finished");
        }

        ticks = ticks.wrapping_add(1);
        if ticks % WIFI_CHECK_TICKS == 0 && !wifi.is_connected() {
            warn!("WiFi lost, reconnecting");
            if let Err(e) = wifi.join() {
                warn!("WiFi reconnect failed: {:?}", e);
            }
        }

        FreeRtos::delay_ms(LOOP_PERIOD_MS);
    }
}
