// Explicitly constructed handles shared by the stages and the bridge

use sha2::{Digest, Sha256};

use crate::partition::InstallTarget;

/// Everything an update stage touches, owned in one place.
///
/// Stage-1, Stage-2, the direct-flash path and the factory loader all take
/// `&mut UpdateContext`, so each can be driven against in-memory doubles.
pub struct UpdateContext<P, R, S, F, D> {
    pub partitions: P,
    pub record: R,
    pub storage: S,
    pub flash: F,
    pub delay: D,
    /// Where Stage-2 writes the staged image.
    pub install_target: InstallTarget,
}

impl<P, R, S, F, D> UpdateContext<P, R, S, F, D> {
    pub fn new(partitions: P, record: R, storage: S, flash: F, delay: D) -> Self {
        Self {
            partitions,
            record,
            storage,
            flash,
            delay,
            install_target: InstallTarget::NextUpdatePartition,
        }
    }

    pub fn with_install_target(mut self, target: InstallTarget) -> Self {
        self.install_target = target;
        self
    }
}

/// SHA-256 over the bytes a stage streamed, logged so that a download and the
/// later install can be matched up.
#[derive(Default)]
pub struct ImageDigest(Sha256);

impl ImageDigest {
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finish(self) -> String {
        self.0.finalize().iter().map(|b| format!("{:02x}", b)).collect()
    }
}
