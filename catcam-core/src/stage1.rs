// Stage-1: network to removable storage, then record the intent and reboot

use std::io::Write;

use embedded_hal::delay::DelayNs;

use crate::context::{ImageDigest, UpdateContext};
use crate::error::{OtaError, Result};
use crate::http::FirmwareSource;
use crate::partition::{ensure_capacity, resolve_target, PartitionDirectory};
use crate::progress::{report, ProgressMilestones, TransferObserver, TransferStage};
use crate::record::UpdateRecordStore;
use crate::storage::{discard, ImageStorage, FIRMWARE_IMAGE};

/// The radio stack owns most of the heap while Stage-1 runs.
pub const STAGE1_BUFFER: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Image is on storage and the record says pending.
    Staged { size: u32, digest: String },
    /// Partial image removed, record untouched.
    Failed(OtaError),
    /// Stopped by the operator. Partial image removed, record untouched.
    Cancelled,
}

impl DownloadOutcome {
    /// Success hands over to Stage-2 and failure restores a clean radio state;
    /// both go through a reboot. A cancel keeps the session alive.
    pub fn requires_reboot(&self) -> bool {
        !matches!(self, DownloadOutcome::Cancelled)
    }
}

pub fn download_to_storage<P, R, S, F, D, H>(
    ctx: &mut UpdateContext<P, R, S, F, D>,
    http: &mut H,
    url: &str,
    observer: &mut dyn TransferObserver,
) -> DownloadOutcome
where
    P: PartitionDirectory,
    R: UpdateRecordStore,
    S: ImageStorage,
    D: DelayNs,
    H: FirmwareSource,
{
    log::info!("Stage-1: downloading {} to removable storage", url);

    let streamed = stream_to_storage(ctx, http, url, observer);
    http.close();

    let (size, digest) = match streamed {
        Ok(done) => done,
        Err(OtaError::Cancelled) => {
            log::warn!("Stage-1: download cancelled");
            discard(&ctx.storage, FIRMWARE_IMAGE);
            return DownloadOutcome::Cancelled;
        }
        Err(e) => {
            log::error!("Stage-1: download failed: {}", e);
            discard(&ctx.storage, FIRMWARE_IMAGE);
            return DownloadOutcome::Failed(e);
        }
    };

    // The record is written last: only a complete, closed image is ever pending.
    if let Err(e) = ctx.record.set_pending(size) {
        log::error!("Stage-1: could not persist update record: {}", e);
        discard(&ctx.storage, FIRMWARE_IMAGE);
        return DownloadOutcome::Failed(e);
    }

    log::info!("Stage-1: staged {} bytes, sha256 {}", size, digest);
    DownloadOutcome::Staged { size, digest }
}

fn stream_to_storage<P, R, S, F, D, H>(
    ctx: &mut UpdateContext<P, R, S, F, D>,
    http: &mut H,
    url: &str,
    observer: &mut dyn TransferObserver,
) -> Result<(u32, String)>
where
    P: PartitionDirectory,
    S: ImageStorage,
    D: DelayNs,
    H: FirmwareSource,
{
    let head = http.get(url)?;
    let total = head.validated_length()?;
    log::info!("Stage-1: HTTP {}, {} bytes", head.status, total);

    let target = resolve_target(&ctx.partitions, ctx.install_target)?;
    ensure_capacity(&target, u64::from(total))?;

    ctx.storage.remove(FIRMWARE_IMAGE)?;
    let mut file = ctx.storage.create(FIRMWARE_IMAGE)?;

    let mut buf = [0u8; STAGE1_BUFFER];
    let mut digest = ImageDigest::new();
    let mut milestones = ProgressMilestones::new(u64::from(total));
    let mut written: u64 = 0;

    loop {
        if observer.cancel_requested() {
            return Err(OtaError::Cancelled);
        }

        let n = http.read(&mut buf)?;
        if n == 0 {
            break;
        }
        if written + n as u64 > u64::from(total) {
            return Err(OtaError::transfer(format!(
                "server sent more than the declared {} bytes",
                total
            )));
        }

        file.write_all(&buf[..n])
            .map_err(|e| OtaError::storage(format!("write at offset {}: {}", written, e)))?;
        digest.update(&buf[..n]);
        written += n as u64;

        report(&mut milestones, observer, TransferStage::Download, written, u64::from(total));
        ctx.delay.delay_ms(1);
    }

    if written != u64::from(total) {
        return Err(OtaError::transfer(format!(
            "incomplete transfer: {} of {} bytes",
            written, total
        )));
    }

    ctx.storage.commit(file)?;
    Ok((total, digest.finish()))
}
