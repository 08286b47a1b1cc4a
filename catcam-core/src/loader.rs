// Decision logic of the factory loader

use embedded_hal::delay::DelayNs;

use crate::context::UpdateContext;
use crate::flash::FlashWriter;
use crate::partition::{ensure_boot_partition, InstallTarget, PartitionDescriptor, PartitionDirectory};
use crate::progress::{TransferObserver, TransferStage};
use crate::record::UpdateRecordStore;
use crate::stage2::{install_pending, InstallOutcome};
use crate::storage::ImageStorage;

/// The loader's only user interface.
pub trait StatusLed {
    fn blink(&mut self, times: u32, period_ms: u32);
}

pub mod pattern {
    pub const STARTUP: (u32, u32) = (3, 100);
    pub const PENDING: (u32, u32) = (10, 50);
    pub const PROGRESS: (u32, u32) = (1, 50);
    pub const SUCCESS: (u32, u32) = (5, 100);
    /// Repeated forever when there is nothing to boot.
    pub const NO_APPLICATION: (u32, u32) = (1, 1000);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderDecision {
    BootMainApplication(PartitionDescriptor),
    RebootIntoUpdate(PartitionDescriptor),
    /// No main application partition. The one unrecoverable state.
    Halt,
}

struct LedProgress<'a, L: StatusLed>(&'a mut L);

impl<L: StatusLed> TransferObserver for LedProgress<'_, L> {
    fn on_progress(&mut self, _stage: TransferStage, _percent: u8, _done: u64, _total: u64) {
        let (times, period) = pattern::PROGRESS;
        self.0.blink(times, period);
    }
}

pub fn run_factory_loader<P, R, S, F, D, L>(
    ctx: &mut UpdateContext<P, R, S, F, D>,
    led: &mut L,
    buf: &mut [u8],
) -> LoaderDecision
where
    P: PartitionDirectory,
    R: UpdateRecordStore,
    S: ImageStorage,
    F: FlashWriter,
    D: DelayNs,
    L: StatusLed,
{
    let (times, period) = pattern::STARTUP;
    led.blink(times, period);

    let Some(main_app) = ctx.partitions.main_application_partition() else {
        log::error!("No main application partition - nothing to boot");
        return LoaderDecision::Halt;
    };
    log::info!("Main application: '{}' @ 0x{:x}", main_app.label, main_app.address);

    ctx.install_target = InstallTarget::MainApplication;

    if ctx.record.has_pending() {
        let (times, period) = pattern::PENDING;
        led.blink(times, period);

        match install_pending(ctx, buf, &mut LedProgress(&mut *led)) {
            InstallOutcome::Installed { partition, size } => {
                log::info!("Installed {} bytes into '{}'", size, partition.label);
                let (times, period) = pattern::SUCCESS;
                led.blink(times, period);
                return LoaderDecision::RebootIntoUpdate(partition);
            }
            InstallOutcome::Aborted(e) => {
                log::error!("Update aborted, booting existing application: {}", e);
            }
            InstallOutcome::NothingPending => {}
        }
    }

    if let Err(e) = ensure_boot_partition(&mut ctx.partitions, &main_app) {
        log::error!("Could not select main application for boot: {}", e);
    }
    LoaderDecision::BootMainApplication(main_app)
}
