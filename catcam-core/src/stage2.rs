// Stage-2: staged image to flash, run before anything memory hungry starts

use std::io::Read;

use embedded_hal::delay::DelayNs;

use crate::context::{ImageDigest, UpdateContext};
use crate::error::{OtaError, Result};
use crate::flash::{begin_with_retry, EraseMode, FlashSession, FlashWriter};
use crate::partition::{checked_target, ensure_capacity, PartitionDescriptor, PartitionDirectory};
use crate::progress::{report, ProgressMilestones, TransferObserver, TransferStage};
use crate::record::{UpdateRecord, UpdateRecordStore};
use crate::storage::{discard, ImageStorage, FIRMWARE_IMAGE};

/// Buffer sizes used by the main application and the factory loader.
pub const APP_FLASH_BUFFER: usize = 1024;
pub const LOADER_FLASH_BUFFER: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Normal boot.
    NothingPending,
    /// Image written and selected for the next boot.
    Installed { partition: PartitionDescriptor, size: u32 },
    /// Record cleared, image discarded, previous firmware keeps running.
    Aborted(OtaError),
}

impl InstallOutcome {
    pub fn requires_reboot(&self) -> bool {
        matches!(self, InstallOutcome::Installed { .. })
    }
}

/// Install a pending staged image, if there is one.
///
/// The record is cleared before the image is even opened. Whatever happens
/// afterwards, including a crash or power loss mid-write, the next boot sees
/// no pending work.
pub fn install_pending<P, R, S, F, D>(
    ctx: &mut UpdateContext<P, R, S, F, D>,
    buf: &mut [u8],
    observer: &mut dyn TransferObserver,
) -> InstallOutcome
where
    P: PartitionDirectory,
    R: UpdateRecordStore,
    S: ImageStorage,
    F: FlashWriter,
    D: DelayNs,
{
    let expected = match ctx.record.load() {
        Ok(UpdateRecord::Idle) => return InstallOutcome::NothingPending,
        Ok(UpdateRecord::Pending { size }) => size,
        Err(e) => {
            log::warn!("Stage-2: update record unreadable ({}), clearing it", e);
            if let Err(e) = ctx.record.clear_pending() {
                log::warn!("Stage-2: could not clear unreadable record: {}", e);
            }
            return InstallOutcome::NothingPending;
        }
    };

    log::info!("Stage-2: pending update of {} bytes", expected);

    if let Err(e) = ctx.record.clear_pending() {
        log::error!("Stage-2: cannot clear update record, refusing to flash: {}", e);
        discard(&ctx.storage, FIRMWARE_IMAGE);
        return InstallOutcome::Aborted(e);
    }

    let flashed = flash_staged_image(ctx, expected, buf, observer);

    // The staged image never outlives this boot, whatever the outcome.
    discard(&ctx.storage, FIRMWARE_IMAGE);

    let partition = match flashed {
        Ok(partition) => partition,
        Err(e) => {
            if e.is_integrity_violation() {
                log::error!("INTEGRITY: Stage-2 aborted: {}", e);
            } else {
                log::error!("Stage-2 aborted, keeping current firmware: {}", e);
            }
            return InstallOutcome::Aborted(e);
        }
    };

    if let Err(e) = ctx.partitions.set_boot_partition(&partition) {
        log::error!("Stage-2: could not select '{}' for boot: {}", partition.label, e);
        return InstallOutcome::Aborted(e);
    }

    log::info!("Stage-2: '{}' will boot next", partition.label);
    InstallOutcome::Installed { partition, size: expected }
}

fn flash_staged_image<P, R, S, F, D>(
    ctx: &mut UpdateContext<P, R, S, F, D>,
    expected: u32,
    buf: &mut [u8],
    observer: &mut dyn TransferObserver,
) -> Result<PartitionDescriptor>
where
    P: PartitionDirectory,
    S: ImageStorage,
    F: FlashWriter,
    D: DelayNs,
{
    if buf.is_empty() {
        return Err(OtaError::flash("zero-length copy buffer"));
    }

    let actual = ctx.storage.size(FIRMWARE_IMAGE)?;
    if actual != u64::from(expected) {
        return Err(OtaError::storage(format!(
            "size mismatch: file has {} bytes, expected {}",
            actual, expected
        )));
    }

    let target = checked_target(&ctx.partitions, ctx.install_target)?;
    ensure_capacity(&target, actual)?;

    let mut file = ctx.storage.open(FIRMWARE_IMAGE)?;
    log::info!(
        "Stage-2: writing {} bytes to '{}' @ 0x{:x}",
        expected,
        target.label,
        target.address
    );

    let mut session =
        begin_with_retry(&mut ctx.flash, &mut ctx.delay, &target, expected, EraseMode::Full)?;

    match copy_to_flash(&mut file, &mut session, buf, expected, observer, &mut ctx.delay) {
        Ok(digest) => {
            session.finalize()?;
            log::info!("Stage-2: image verified, sha256 {}", digest);
            Ok(target)
        }
        Err(e) => {
            session.abort();
            Err(e)
        }
    }
}

fn copy_to_flash<Src, Sess, D>(
    file: &mut Src,
    session: &mut Sess,
    buf: &mut [u8],
    expected: u32,
    observer: &mut dyn TransferObserver,
    delay: &mut D,
) -> Result<String>
where
    Src: Read,
    Sess: FlashSession,
    D: DelayNs,
{
    let total = u64::from(expected);
    let mut digest = ImageDigest::new();
    let mut milestones = ProgressMilestones::new(total);
    let mut written: u64 = 0;

    loop {
        let n = file
            .read(buf)
            .map_err(|e| OtaError::storage(format!("read at offset {}: {}", written, e)))?;
        if n == 0 {
            break;
        }
        if written + n as u64 > total {
            return Err(OtaError::storage("image grew while flashing"));
        }

        session.write(&buf[..n])?;
        digest.update(&buf[..n]);
        written += n as u64;

        report(&mut milestones, observer, TransferStage::Flash, written, total);
        delay.delay_ms(1);
    }

    if written != total {
        return Err(OtaError::storage(format!("short read: {} of {} bytes", written, total)));
    }

    Ok(digest.finish())
}
