// Reassembly of a firmware URL split across several writes

use crate::bridge::command::{validate_chunk, UrlChunk, MAX_URL_CHUNKS};
use crate::error::{OtaError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkProgress {
    Partial { index: usize, received: usize, total: usize },
    Complete { url: String, version: Option<String> },
}

#[derive(Debug, Default)]
pub struct ChunkAccumulator {
    /// Zero while no transfer is in progress.
    total: usize,
    received: usize,
    chunks: [Option<String>; MAX_URL_CHUNKS],
    version: Option<String>,
}

impl ChunkAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_idle(&self) -> bool {
        self.total == 0
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Store one chunk. The accumulator resets itself after a completed URL.
    ///
    /// Chunk 0 always starts a new transfer and drops anything collected so
    /// far. Any other chunk disagreeing on the total is rejected without
    /// disturbing what has been collected.
    pub fn accept(&mut self, chunk: UrlChunk) -> Result<ChunkProgress> {
        validate_chunk(chunk.index as i64, chunk.total as i64)?;

        if chunk.index == 0 {
            if !self.is_idle() {
                log::warn!(
                    "New URL transfer ({} chunks) replaces partial one ({}/{})",
                    chunk.total,
                    self.received,
                    self.total
                );
            }
            self.begin(chunk.total);
        } else if self.is_idle() {
            self.begin(chunk.total);
        } else if chunk.total != self.total {
            return Err(OtaError::protocol(format!(
                "Chunk {} claims {} chunks, expected {}",
                chunk.index, chunk.total, self.total
            )));
        }

        if chunk.version.is_some() {
            self.version = chunk.version;
        }
        if self.chunks[chunk.index].is_none() {
            self.received += 1;
        }
        self.chunks[chunk.index] = Some(chunk.data);

        if self.received < self.total {
            return Ok(ChunkProgress::Partial {
                index: chunk.index,
                received: self.received,
                total: self.total,
            });
        }

        let url: String = self.chunks[..self.total].iter().flatten().map(String::as_str).collect();
        let version = self.version.take();
        self.reset();
        Ok(ChunkProgress::Complete { url, version })
    }

    fn begin(&mut self, total: usize) {
        self.reset();
        self.total = total;
    }
}
