// Progress reporting at 10% granularity

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStage {
    /// Network to removable storage, or network straight to flash.
    Download,
    /// Removable storage to flash.
    Flash,
}

pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    (done.min(total) * 100 / total) as u8
}

/// Yields a percentage each time the transfer crosses into a new 10% band.
#[derive(Debug, Clone)]
pub struct ProgressMilestones {
    total: u64,
    last_band: u8,
}

impl ProgressMilestones {
    pub fn new(total: u64) -> Self {
        Self { total, last_band: 0 }
    }

    pub fn advance(&mut self, done: u64) -> Option<u8> {
        let band = percent(done, self.total) / 10;
        if band > self.last_band {
            self.last_band = band;
            Some(band * 10)
        } else {
            None
        }
    }
}

/// Receives progress from a running transfer and may ask it to stop.
pub trait TransferObserver {
    fn on_progress(&mut self, _stage: TransferStage, _percent: u8, _done: u64, _total: u64) {}

    /// Polled between chunks. Only Stage-1 style transfers honor it.
    fn cancel_requested(&mut self) -> bool {
        false
    }
}

impl TransferObserver for () {}

/// Shared milestone reporting for all transfer loops.
pub(crate) fn report(
    milestones: &mut ProgressMilestones,
    observer: &mut dyn TransferObserver,
    stage: TransferStage,
    done: u64,
    total: u64,
) {
    if let Some(pct) = milestones.advance(done) {
        log::info!("{:?} progress: {}% ({}/{} bytes)", stage, pct, done, total);
        observer.on_progress(stage, pct, done, total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn milestones_fire_once_per_band() {
        let mut m = ProgressMilestones::new(1000);
        assert_eq!(m.advance(50), None);
        assert_eq!(m.advance(100), Some(10));
        assert_eq!(m.advance(150), None);
        assert_eq!(m.advance(350), Some(30));
        assert_eq!(m.advance(1000), Some(100));
        assert_eq!(m.advance(1000), None);
    }

    proptest! {
        #[test]
        fn milestones_are_increasing_multiples_of_ten(
            total in 1u64..5_000_000,
            steps in proptest::collection::vec(1u64..20_000, 1..400),
        ) {
            let mut m = ProgressMilestones::new(total);
            let mut done = 0u64;
            let mut last = 0u8;
            for step in steps {
                done = (done + step).min(total);
                if let Some(p) = m.advance(done) {
                    prop_assert_eq!(p % 10, 0);
                    prop_assert!(p > last);
                    prop_assert!(p <= 100);
                    last = p;
                }
            }
            let _ = m.advance(total);
            prop_assert_eq!(percent(total, total), 100);
        }
    }
}
