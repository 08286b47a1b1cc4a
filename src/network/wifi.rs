use anyhow::{bail, Result};
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::modem::WifiModemPeripheral;
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    nvs::EspDefaultNvsPartition,
    wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi},
};

const CONNECT_ATTEMPTS: u32 = 3;

pub struct WifiManager {
    wifi: BlockingWifi<EspWifi<'static>>,
    pub ssid: String,
}

impl WifiManager {
    pub fn new<M: WifiModemPeripheral>(
        modem: impl Peripheral<P = M> + 'static,
        sys_loop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
        ssid: String,
        password: String,
    ) -> Result<Self> {
        log::info!("Initializing WiFi manager for SSID: '{}'", ssid);

        // Check if credentials are empty
        if ssid.is_empty() {
            log::error!("WiFi SSID is empty! Check wifi_config.h");
            bail!("WiFi SSID cannot be empty");
        }

        let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs))?;

        let cfg = Configuration::Client(ClientConfiguration {
            ssid: ssid.as_str().try_into()
                .map_err(|_| anyhow::anyhow!("Invalid SSID format: {}", ssid))?,
            password: password.as_str().try_into()
                .map_err(|_| anyhow::anyhow!("Invalid password format"))?,
            auth_method: if password.is_empty() {
                log::warn!("WiFi password is empty, using open network");
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        });

        esp_wifi.set_configuration(&cfg)?;
        let wifi = BlockingWifi::wrap(esp_wifi, sys_loop)?;

        log::info!("WiFi manager initialized successfully");
        Ok(Self { wifi, ssid })
    }

    pub fn connect(&mut self) -> Result<()> {
        log::info!("Starting WiFi...");
        self.wifi.start()?;
        self.join()
    }

    /// Associate and wait for DHCP, retrying with a growing pause.
    pub fn join(&mut self) -> Result<()> {
        let mut attempt = 1;
        loop {
            log::info!("Connecting to {} (attempt {}/{})...", self.ssid, attempt, CONNECT_ATTEMPTS);
            match self.wifi.connect().and_then(|_| self.wifi.wait_netif_up()) {
                Ok(()) => break,
                Err(e) if attempt < CONNECT_ATTEMPTS => {
                    log::warn!("WiFi connect failed: {:?}", e);
                    let _ = self.wifi.disconnect();
                    FreeRtos::delay_ms(1000 * attempt);
                    attempt += 1;
                }
                Err(e) => bail!("WiFi connect failed after {} attempts: {:?}", CONNECT_ATTEMPTS, e),
            }
        }

        log::info!("WiFi connected, IP: {}", self.get_ip().unwrap_or_else(|| "?".to_string()));

        // Radio coexistence with BLE requires modem sleep; PS_NONE is rejected.
        unsafe {
            use esp_idf_sys::*;
            let result = esp_wifi_set_ps(wifi_ps_type_t_WIFI_PS_MIN_MODEM);
            if result != ESP_OK {
                log::warn!("Failed to set WiFi power save mode: {:?}", result);
            }
        }

        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false)
    }

    pub fn get_ip(&self) -> Option<String> {
        self.wifi.wifi().sta_netif().get_ip_info().ok()
            .map(|ip_info| format!("{}", ip_info.ip))
    }
}
