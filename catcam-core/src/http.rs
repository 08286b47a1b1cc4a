// Firmware transport seen by the downloaders

use crate::error::{OtaError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub content_length: Option<u64>,
}

impl ResponseHead {
    /// A body is only accepted with a 2xx status and a known, non-zero length
    /// that fits a partition size field.
    pub fn validated_length(&self) -> Result<u32> {
        if !(200..300).contains(&self.status) {
            return Err(OtaError::transfer(format!("HTTP status {}", self.status)));
        }
        match self.content_length {
            None => Err(OtaError::transfer("missing Content-Length")),
            Some(0) => Err(OtaError::transfer("empty response body")),
            Some(len) => u32::try_from(len)
                .map_err(|_| OtaError::transfer(format!("Content-Length {} too large", len))),
        }
    }
}

/// A GET request whose body is pulled in caller-sized pieces.
pub trait FirmwareSource {
    fn get(&mut self, url: &str) -> Result<ResponseHead>;

    /// `Ok(0)` means the body ended.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Drop the connection. Safe to call more than once.
    fn close(&mut self);
}
