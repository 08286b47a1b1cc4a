// Direct-flash path: network straight into the next partition, no storage hop

use embedded_hal::delay::DelayNs;

use crate::context::{ImageDigest, UpdateContext};
use crate::error::{OtaError, Result};
use crate::flash::{begin_with_retry, EraseMode, FlashSession, FlashWriter};
use crate::http::FirmwareSource;
use crate::partition::{checked_update_target, ensure_capacity, PartitionDescriptor, PartitionDirectory};
use crate::progress::{report, ProgressMilestones, TransferObserver, TransferStage};

pub const DIRECT_BUFFER: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectOutcome {
    Installed { partition: PartitionDescriptor, size: u32 },
    Failed(OtaError),
    Cancelled,
}

impl DirectOutcome {
    pub fn requires_reboot(&self) -> bool {
        !matches!(self, DirectOutcome::Cancelled)
    }
}

/// Stream `url` into the alternate partition with incremental erase and select
/// it for boot. The update record is never touched.
pub fn flash_from_network<P, R, S, F, D, H>(
    ctx: &mut UpdateContext<P, R, S, F, D>,
    http: &mut H,
    url: &str,
    observer: &mut dyn TransferObserver,
) -> DirectOutcome
where
    P: PartitionDirectory,
    F: FlashWriter,
    D: DelayNs,
    H: FirmwareSource,
{
    log::info!("Direct flash: {}", url);

    let result = stream_to_flash(ctx, http, url, observer);
    http.close();

    match result {
        Ok((partition, size)) => DirectOutcome::Installed { partition, size },
        Err(OtaError::Cancelled) => {
            log::warn!("Direct flash cancelled, current firmware untouched");
            DirectOutcome::Cancelled
        }
        Err(e) => {
            if e.is_integrity_violation() {
                log::error!("INTEGRITY: direct flash aborted: {}", e);
            } else {
                log::error!("Direct flash failed: {}", e);
            }
            DirectOutcome::Failed(e)
        }
    }
}

fn stream_to_flash<P, R, S, F, D, H>(
    ctx: &mut UpdateContext<P, R, S, F, D>,
    http: &mut H,
    url: &str,
    observer: &mut dyn TransferObserver,
) -> Result<(PartitionDescriptor, u32)>
where
    P: PartitionDirectory,
    F: FlashWriter,
    D: DelayNs,
    H: FirmwareSource,
{
    let target = checked_update_target(&ctx.partitions)?;

    let head = http.get(url)?;
    let total = head.validated_length()?;
    ensure_capacity(&target, u64::from(total))?;

    log::info!(
        "Direct flash: {} bytes into '{}' @ 0x{:x}",
        total,
        target.label,
        target.address
    );

    let mut session = begin_with_retry(
        &mut ctx.flash,
        &mut ctx.delay,
        &target,
        total,
        EraseMode::Incremental,
    )?;

    let mut buf = [0u8; DIRECT_BUFFER];
    let mut digest = ImageDigest::new();
    let mut milestones = ProgressMilestones::new(u64::from(total));
    let mut written: u64 = 0;

    let streamed: Result<()> = loop {
        if observer.cancel_requested() {
            break Err(OtaError::Cancelled);
        }
        let n = match http.read(&mut buf) {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(e) => break Err(e),
        };
        if written + n as u64 > u64::from(total) {
            break Err(OtaError::transfer("server sent more than Content-Length"));
        }
        if let Err(e) = session.write(&buf[..n]) {
            break Err(e);
        }
        digest.update(&buf[..n]);
        written += n as u64;

        report(&mut milestones, observer, TransferStage::Download, written, u64::from(total));
        ctx.delay.delay_ms(1);
    };

    let streamed = streamed.and_then(|()| {
        if written == u64::from(total) {
            Ok(())
        } else {
            Err(OtaError::transfer(format!(
                "incomplete transfer: {} of {} bytes",
                written, total
            )))
        }
    });

    if let Err(e) = streamed {
        session.abort();
        return Err(e);
    }

    session.finalize()?;
    log::info!("Direct flash: image verified, sha256 {}", digest.finish());

    ctx.partitions.set_boot_partition(&target)?;
    Ok((target, total))
}
