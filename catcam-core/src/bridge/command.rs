use serde::Deserialize;

use crate::error::{OtaError, Result};

/// Longest URL split a client may send.
pub const MAX_URL_CHUNKS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlChunk {
    pub index: usize,
    pub total: usize,
    pub data: String,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    OtaUpdate { firmware_url: String, version: Option<String> },
    GetStatus,
    CancelUpdate,
    UrlChunk(UrlChunk),
}

// Wire shape. Chunk frames carry no "action".
#[derive(Debug, Deserialize)]
struct RawCommand {
    action: Option<String>,
    firmware_url: Option<String>,
    version: Option<String>,
    chunk_index: Option<i64>,
    total_chunks: Option<i64>,
    chunk_data: Option<String>,
}

impl Command {
    pub fn parse(bytes: &[u8]) -> Result<Command> {
        let raw: RawCommand = serde_json::from_slice(bytes)
            .map_err(|e| OtaError::protocol(format!("Invalid JSON: {}", e)))?;

        if let Some(index) = raw.chunk_index {
            let total = raw
                .total_chunks
                .ok_or_else(|| OtaError::protocol("Chunk without total_chunks"))?;
            let (index, total) = validate_chunk(index, total)?;
            let data = raw
                .chunk_data
                .ok_or_else(|| OtaError::protocol("Chunk without chunk_data"))?;
            return Ok(Command::UrlChunk(UrlChunk { index, total, data, version: raw.version }));
        }

        match raw.action.as_deref() {
            Some("ota_update") => {
                let firmware_url = raw
                    .firmware_url
                    .filter(|url| !url.is_empty())
                    .ok_or_else(|| OtaError::protocol("No firmware URL provided"))?;
                validate_url(&firmware_url)?;
                Ok(Command::OtaUpdate { firmware_url, version: raw.version })
            }
            Some("get_status") => Ok(Command::GetStatus),
            Some("cancel_update") => Ok(Command::CancelUpdate),
            Some(other) => Err(OtaError::protocol(format!("Unknown command: {}", other))),
            None => Err(OtaError::protocol("Missing action")),
        }
    }
}

pub fn validate_chunk(index: i64, total: i64) -> Result<(usize, usize)> {
    let max = MAX_URL_CHUNKS as i64;
    if !(1..=max).contains(&total) || !(0..max).contains(&index) || index >= total {
        return Err(OtaError::protocol(format!(
            "Invalid chunk parameters: index={}, total={}",
            index, total
        )));
    }
    Ok((index as usize, total as usize))
}

pub fn validate_url(url: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(OtaError::protocol("Firmware URL must be http or https"))
    }
}
