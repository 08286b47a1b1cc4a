// Firmware downloads over esp-idf's HTTP client

use std::time::Duration;

use catcam_core::http::{FirmwareSource, ResponseHead};
use catcam_core::{OtaError, Result};
use esp_idf_svc::http::client::{Configuration as HttpConfig, EspHttpConnection};
use embedded_svc::http::Method;

const RX_BUFFER: usize = 2048;
const TIMEOUT: Duration = Duration::from_secs(30);

/// One connection per `get`. Works for plain HTTP and for HTTPS against the
/// certificate bundle (pre-signed object-store URLs).
#[derive(Default)]
pub struct EspFirmwareSource {
    connection: Option<EspHttpConnection>,
}

impl EspFirmwareSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FirmwareSource for EspFirmwareSource {
    fn get(&mut self, url: &str) -> Result<ResponseHead> {
        self.close();

        let config = HttpConfig {
            buffer_size: Some(RX_BUFFER),
            timeout: Some(TIMEOUT),
            crt_bundle_attach: Some(esp_idf_sys::esp_crt_bundle_attach),
            ..Default::default()
        };

        let mut connection = EspHttpConnection::new(&config)
            .map_err(|e| OtaError::transfer(format!("http client: {}", e)))?;
        connection
            .initiate_request(Method::Get, url, &[])
            .map_err(|e| OtaError::transfer(format!("request: {}", e)))?;
        connection
            .initiate_response()
            .map_err(|e| OtaError::transfer(format!("response: {}", e)))?;

        let head = ResponseHead {
            status: connection.status(),
            content_length: connection
                .header("Content-Length")
                .and_then(|v| v.trim().parse::<u64>().ok()),
        };
        log::info!("GET {} -> {} ({:?} bytes)", url, head.status, head.content_length);

        self.connection = Some(connection);
        Ok(head)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| OtaError::transfer("read without a request"))?;
        connection
            .read(buf)
            .map_err(|e| OtaError::transfer(format!("connection lost: {}", e)))
    }

    fn close(&mut self) {
        self.connection = None;
    }
}
