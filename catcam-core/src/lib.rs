//! CatCam Core - firmware update pipeline for the CatCam node
//!
//! Everything here except `platform` builds and tests on the host. The
//! pipeline only sees the traits in `partition`, `record`, `storage`, `flash`
//! and `http`; the `esp-idf` feature adds implementations of them on top of
//! ESP-IDF.

pub mod boot;
pub mod bridge;
pub mod context;
pub mod direct;
pub mod error;
pub mod flash;
pub mod http;
pub mod layout;
pub mod loader;
pub mod partition;
pub mod progress;
pub mod record;
pub mod stage1;
pub mod stage2;
pub mod storage;
pub mod strategy;

#[cfg(feature = "esp-idf")]
pub mod platform;

pub use context::UpdateContext;
pub use error::{OtaError, Result};
pub use partition::{InstallTarget, PartitionDescriptor, PartitionDirectory};
pub use record::{UpdateRecord, UpdateRecordStore};
