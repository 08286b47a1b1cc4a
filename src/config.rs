use anyhow::Result;
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs};
use serde::{Deserialize, Serialize};

const CONFIG_NAMESPACE: &str = "catcam";
const CONFIG_KEY: &str = "config";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordBackend {
    Nvs,
    MarkerFile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Advertised BLE name
    pub device_name: String,

    // WiFi settings
    pub wifi_ssid: String,
    pub wifi_password: String,

    // Update pipeline
    pub record_backend: RecordBackend,
    pub direct_flash_enabled: bool,
    pub direct_flash_min_heap: usize,

    // Logging
    pub file_logging: bool,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        // Get WiFi credentials from environment variables set by build.rs
        // These come from wifi_config.h which should NOT be committed to git
        let wifi_ssid = env!("WIFI_SSID");
        let wifi_password = env!("WIFI_PASSWORD");

        Self {
            device_name: "BootBoots-CatCam".to_string(),
            wifi_ssid: wifi_ssid.to_string(),
            wifi_password: wifi_password.to_string(),
            record_backend: RecordBackend::Nvs,
            direct_flash_enabled: false,
            direct_flash_min_heap: 96 * 1024,
            file_logging: true,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn save(&self, nvs: &EspDefaultNvsPartition) -> Result<()> {
        save_to_nvs(nvs, self)?;
        log::info!("Configuration saved to NVS");
        Ok(())
    }
}

pub fn load_or_default(nvs: &EspDefaultNvsPartition) -> Result<Config> {
    match load_from_nvs(nvs) {
        Ok(mut config) => {
            log::info!("Loaded configuration from NVS");

            // If NVS has empty WiFi credentials, use the compiled-in ones
            if config.wifi_ssid.is_empty() {
                let default_config = Config::default();
                log::warn!("NVS WiFi credentials empty, using compiled defaults: SSID='{}'", default_config.wifi_ssid);
                config.wifi_ssid = default_config.wifi_ssid;
                config.wifi_password = default_config.wifi_password;

                if let Err(e) = config.save(nvs) {
                    log::warn!("Failed to save updated config with WiFi credentials: {:?}", e);
                }
            }

            Ok(config)
        }
        Err(e) => {
            log::warn!("Failed to load config from NVS: {:?}, using defaults", e);
            let config = Config::default();

            // Try to save default config to NVS for next time
            if let Err(save_err) = config.save(nvs) {
                log::warn!("Failed to save default config to NVS: {:?}", save_err);
            }

            Ok(config)
        }
    }
}

fn load_from_nvs(nvs: &EspDefaultNvsPartition) -> Result<Config> {
    let nvs = EspNvs::new(nvs.clone(), CONFIG_NAMESPACE, true)?;

    let mut buf = vec![0u8; 1024]; // Max config size
    let data = nvs.get_blob(CONFIG_KEY, &mut buf)?
        .ok_or_else(|| anyhow::anyhow!("Config not found in NVS"))?;

    let config: Config = serde_json::from_slice(data)?;

    Ok(config)
}

fn save_to_nvs(nvs: &EspDefaultNvsPartition, config: &Config) -> Result<()> {
    let mut nvs = EspNvs::new(nvs.clone(), CONFIG_NAMESPACE, true)?;

    let json = serde_json::to_vec(config)?;
    nvs.set_blob(CONFIG_KEY, &json)?;

    Ok(())
}
