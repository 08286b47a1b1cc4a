//! Flash layout of the 16 MB module. Must agree with `partitions.csv`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Bootloader,
    PartitionTable,
    KeyValueStore,
    UpdateSelector,
    FactoryApp,
    MainApp,
    FileStorage,
    CrashDump,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashRegion {
    pub name: &'static str,
    pub kind: RegionKind,
    pub offset: u32,
    pub size: u32,
}

impl FlashRegion {
    pub const fn end(&self) -> u32 {
        self.offset + self.size
    }
}

pub const FLASH_SIZE: u32 = 16 * 1024 * 1024;

pub const FLASH_LAYOUT: [FlashRegion; 8] = [
    FlashRegion { name: "bootloader", kind: RegionKind::Bootloader, offset: 0x0, size: 0x8000 },
    FlashRegion { name: "partition_table", kind: RegionKind::PartitionTable, offset: 0x8000, size: 0x1000 },
    FlashRegion { name: "nvs", kind: RegionKind::KeyValueStore, offset: 0x9000, size: 0x5000 },
    FlashRegion { name: "otadata", kind: RegionKind::UpdateSelector, offset: 0xE000, size: 0x2000 },
    FlashRegion { name: "factory", kind: RegionKind::FactoryApp, offset: 0x10000, size: 0x100000 },
    FlashRegion { name: "ota_0", kind: RegionKind::MainApp, offset: 0x110000, size: 0x700000 },
    FlashRegion { name: "storage", kind: RegionKind::FileStorage, offset: 0x810000, size: 0x7E0000 },
    FlashRegion { name: "coredump", kind: RegionKind::CrashDump, offset: 0xFF0000, size: 0x10000 },
];

pub fn region(kind: RegionKind) -> Option<&'static FlashRegion> {
    FLASH_LAYOUT.iter().find(|r| r.kind == kind)
}
