// Flash write sessions against an application partition

use embedded_hal::delay::DelayNs;

use crate::error::Result;
use crate::partition::PartitionDescriptor;

const BEGIN_ATTEMPTS: u32 = 3;
const BEGIN_BACKOFF_MS: u32 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseMode {
    /// Erase the whole image range when the session opens.
    Full,
    /// Erase sector by sector as writes arrive. Keeps the radio responsive.
    Incremental,
}

pub trait FlashWriter {
    type Session: FlashSession;

    fn begin(
        &mut self,
        partition: &PartitionDescriptor,
        image_size: u32,
        mode: EraseMode,
    ) -> Result<Self::Session>;
}

/// An open write session. Consumed by exactly one of `finalize` or `abort`.
pub trait FlashSession {
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Validate the written image. The boot pointer is not touched.
    fn finalize(self) -> Result<()>;

    fn abort(self);
}

/// Open a session, retrying only this step with a doubling backoff.
///
/// Writes and finalization are never retried; a failure there aborts the session.
pub fn begin_with_retry<W, D>(
    writer: &mut W,
    delay: &mut D,
    partition: &PartitionDescriptor,
    image_size: u32,
    mode: EraseMode,
) -> Result<W::Session>
where
    W: FlashWriter,
    D: DelayNs,
{
    let mut backoff = BEGIN_BACKOFF_MS;
    let mut attempt = 1;
    loop {
        match writer.begin(partition, image_size, mode) {
            Ok(session) => {
                if attempt > 1 {
                    log::info!("Flash session opened on attempt {}", attempt);
                }
                return Ok(session);
            }
            Err(e) if attempt < BEGIN_ATTEMPTS => {
                log::warn!(
                    "Flash begin failed (attempt {}/{}): {} - retrying in {}ms",
                    attempt,
                    BEGIN_ATTEMPTS,
                    e,
                    backoff
                );
                delay.delay_ms(backoff);
                backoff *= 2;
                attempt += 1;
            }
            Err(e) => {
                log::error!("Flash begin failed after {} attempts: {}", BEGIN_ATTEMPTS, e);
                return Err(e);
            }
        }
    }
}
