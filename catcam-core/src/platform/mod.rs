//! ESP-IDF implementations of the pipeline traits. Built only with the `esp-idf` feature.

pub mod flash;
pub mod nvs_record;
pub mod partitions;
pub mod sdcard;

pub use flash::{EspFlashSession, EspFlashWriter};
pub use nvs_record::NvsUpdateRecord;
pub use partitions::EspPartitionDirectory;
pub use sdcard::mount_sd_card;
