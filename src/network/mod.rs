pub mod http;
pub mod wifi;

pub use http::EspFirmwareSource;
pub use wifi::WifiManager;
