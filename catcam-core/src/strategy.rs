// Picking between the staged path and the direct-flash path, and running it

use embedded_hal::delay::DelayNs;

use crate::context::UpdateContext;
use crate::direct::{flash_from_network, DirectOutcome};
use crate::error::OtaError;
use crate::flash::FlashWriter;
use crate::http::FirmwareSource;
use crate::partition::{InstallTarget, PartitionDescriptor, PartitionDirectory};
use crate::progress::TransferObserver;
use crate::record::UpdateRecordStore;
use crate::stage1::{download_to_storage, DownloadOutcome};
use crate::storage::ImageStorage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStrategy {
    /// Stage-1 to removable storage, reboot, Stage-2. The default.
    Staged,
    /// Network straight to flash while the radio stays up.
    DirectFlash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyConfig {
    pub direct_flash_enabled: bool,
    pub direct_flash_min_heap: usize,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self { direct_flash_enabled: false, direct_flash_min_heap: 96 * 1024 }
    }
}

/// Direct flash only when it is switched on and the heap measured after
/// suspending non-essential services clears the configured floor.
pub fn select_strategy(direct_flash_enabled: bool, free_heap: usize, min_heap: usize) -> UpdateStrategy {
    if direct_flash_enabled && free_heap >= min_heap {
        UpdateStrategy::DirectFlash
    } else {
        UpdateStrategy::Staged
    }
}

/// Services that may be paused while a transfer owns the heap.
pub trait ResourceGovernor {
    fn suspend_non_essential(&mut self);

    fn resume_non_essential(&mut self);

    fn free_internal_heap(&self) -> usize;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Image staged and record written. Reboot into Stage-2.
    Staged { size: u32 },
    /// Image flashed and selected. Reboot into it.
    Installed { partition: PartitionDescriptor },
    /// Reboot to restore a clean, connectable state.
    Failed(OtaError),
    /// Keep running.
    Cancelled,
}

impl UpdateOutcome {
    pub fn requires_reboot(&self) -> bool {
        !matches!(self, UpdateOutcome::Cancelled)
    }
}

impl From<DownloadOutcome> for UpdateOutcome {
    fn from(outcome: DownloadOutcome) -> Self {
        match outcome {
            DownloadOutcome::Staged { size, .. } => UpdateOutcome::Staged { size },
            DownloadOutcome::Failed(e) => UpdateOutcome::Failed(e),
            DownloadOutcome::Cancelled => UpdateOutcome::Cancelled,
        }
    }
}

impl From<DirectOutcome> for UpdateOutcome {
    fn from(outcome: DirectOutcome) -> Self {
        match outcome {
            DirectOutcome::Installed { partition, .. } => UpdateOutcome::Installed { partition },
            DirectOutcome::Failed(e) => UpdateOutcome::Failed(e),
            DirectOutcome::Cancelled => UpdateOutcome::Cancelled,
        }
    }
}

/// What the control bridge delegates to. It never touches flash itself.
pub trait UpdateService {
    fn start_update(
        &mut self,
        url: &str,
        version: Option<&str>,
        observer: &mut dyn TransferObserver,
    ) -> UpdateOutcome;
}

pub struct OtaController<P, R, S, F, D, H, G> {
    pub ctx: UpdateContext<P, R, S, F, D>,
    pub http: H,
    pub governor: G,
    pub config: StrategyConfig,
}

impl<P, R, S, F, D, H, G> OtaController<P, R, S, F, D, H, G> {
    pub fn new(ctx: UpdateContext<P, R, S, F, D>, http: H, governor: G, config: StrategyConfig) -> Self {
        Self { ctx, http, governor, config }
    }
}

impl<P, R, S, F, D, H, G> UpdateService for OtaController<P, R, S, F, D, H, G>
where
    P: PartitionDirectory,
    R: UpdateRecordStore,
    S: ImageStorage,
    F: FlashWriter,
    D: DelayNs,
    H: FirmwareSource,
    G: ResourceGovernor,
{
    fn start_update(
        &mut self,
        url: &str,
        version: Option<&str>,
        observer: &mut dyn TransferObserver,
    ) -> UpdateOutcome {
        log::info!("Starting update to {}", version.unwrap_or("unknown version"));

        self.governor.suspend_non_essential();
        let free_heap = self.governor.free_internal_heap();

        // A single-slot layout has no alternate partition to stream into.
        let direct_possible = self.config.direct_flash_enabled
            && self.ctx.install_target == InstallTarget::NextUpdatePartition;
        let strategy = select_strategy(direct_possible, free_heap, self.config.direct_flash_min_heap);
        log::info!("Update strategy: {:?} ({} bytes free)", strategy, free_heap);

        let outcome: UpdateOutcome = match strategy {
            UpdateStrategy::Staged => {
                download_to_storage(&mut self.ctx, &mut self.http, url, observer).into()
            }
            UpdateStrategy::DirectFlash => {
                flash_from_network(&mut self.ctx, &mut self.http, url, observer).into()
            }
        };

        if matches!(outcome, UpdateOutcome::Failed(_) | UpdateOutcome::Cancelled) {
            self.governor.resume_non_essential();
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_is_the_default() {
        assert_eq!(select_strategy(false, 1 << 20, 96 * 1024), UpdateStrategy::Staged);
        assert_eq!(select_strategy(true, 40 * 1024, 96 * 1024), UpdateStrategy::Staged);
    }

    #[test]
    fn direct_needs_both_switch_and_heap() {
        assert_eq!(select_strategy(true, 96 * 1024, 96 * 1024), UpdateStrategy::DirectFlash);
        assert_eq!(StrategyConfig::default().direct_flash_min_heap, 96 * 1024);
        assert!(!StrategyConfig::default().direct_flash_enabled);
    }

    #[test]
    fn only_cancel_keeps_running() {
        assert!(UpdateOutcome::Staged { size: 1 }.requires_reboot());
        assert!(UpdateOutcome::Failed(OtaError::transfer("x")).requires_reboot());
        assert!(!UpdateOutcome::Cancelled.requires_reboot());
    }
}
