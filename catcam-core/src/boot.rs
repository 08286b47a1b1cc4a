// First thing the main application does after reset

use embedded_hal::delay::DelayNs;

use crate::context::UpdateContext;
use crate::flash::FlashWriter;
use crate::partition::{ensure_boot_partition, InstallTarget, PartitionDescriptor, PartitionDirectory};
use crate::progress::TransferObserver;
use crate::record::UpdateRecordStore;
use crate::stage2::{install_pending, InstallOutcome};
use crate::storage::ImageStorage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMode {
    /// A factory loader exists and performs Stage-2 into the main application slot.
    LoaderDriven,
    /// Two application slots; the main application flashes the other one itself.
    InApp,
}

impl InstallMode {
    pub fn install_target(self) -> InstallTarget {
        match self {
            InstallMode::LoaderDriven => InstallTarget::MainApplication,
            InstallMode::InApp => InstallTarget::NextUpdatePartition,
        }
    }
}

pub fn install_mode<P: PartitionDirectory + ?Sized>(directory: &P) -> InstallMode {
    match (directory.factory_partition(), directory.running_partition()) {
        (Some(factory), Ok(running)) if !factory.same_region(&running) => InstallMode::LoaderDriven,
        _ => InstallMode::InApp,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootPlan {
    /// Bring up the radio and run normally.
    Continue,
    /// An update is staged and the factory loader installs it.
    RebootIntoLoader,
    /// Stage-2 just installed this partition.
    RebootIntoUpdate(PartitionDescriptor),
}

/// Decide what the main application does before any other subsystem starts.
///
/// In loader-driven mode the boot pointer is kept on the factory partition so
/// the loader sees every reset. In in-app mode Stage-2 runs right here.
pub fn prepare_boot<P, R, S, F, D>(
    ctx: &mut UpdateContext<P, R, S, F, D>,
    buf: &mut [u8],
    observer: &mut dyn TransferObserver,
) -> BootPlan
where
    P: PartitionDirectory,
    R: UpdateRecordStore,
    S: ImageStorage,
    F: FlashWriter,
    D: DelayNs,
{
    let mode = install_mode(&ctx.partitions);
    ctx.install_target = mode.install_target();
    log::info!("Install mode: {:?}", mode);

    match mode {
        InstallMode::LoaderDriven => {
            let Some(factory) = ctx.partitions.factory_partition() else {
                return BootPlan::Continue;
            };
            if let Err(e) = ensure_boot_partition(&mut ctx.partitions, &factory) {
                // Rebooting now would land back here, not in the loader.
                log::error!("Could not point boot at the factory loader: {}", e);
                return BootPlan::Continue;
            }
            if ctx.record.has_pending() {
                log::info!("Update staged, handing over to the factory loader");
                BootPlan::RebootIntoLoader
            } else {
                BootPlan::Continue
            }
        }
        InstallMode::InApp => match install_pending(ctx, buf, observer) {
            InstallOutcome::Installed { partition, .. } => BootPlan::RebootIntoUpdate(partition),
            InstallOutcome::NothingPending => BootPlan::Continue,
            InstallOutcome::Aborted(e) => {
                log::warn!("Continuing on current firmware after failed install: {}", e);
                BootPlan::Continue
            }
        },
    }
}
