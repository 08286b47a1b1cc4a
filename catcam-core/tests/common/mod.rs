//! In-memory doubles for driving the update pipeline on the host.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io::{self, Cursor, Write};
use std::rc::Rc;

use catcam_core::bridge::StatusChannel;
use catcam_core::flash::{EraseMode, FlashSession, FlashWriter};
use catcam_core::http::{FirmwareSource, ResponseHead};
use catcam_core::loader::StatusLed;
use catcam_core::progress::TransferObserver;
use catcam_core::storage::ImageStorage;
use catcam_core::strategy::ResourceGovernor;
use catcam_core::{
    OtaError, PartitionDescriptor, PartitionDirectory, Result, UpdateContext, UpdateRecord,
    UpdateRecordStore,
};
use embedded_hal::delay::DelayNs;

pub const SCENARIO_IMAGE: usize = 1_940_992;

pub fn image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

// ---------------------------------------------------------------------------
// Partition table

#[derive(Debug, Clone)]
pub struct MemPartitions {
    pub running: PartitionDescriptor,
    pub next: PartitionDescriptor,
    pub boot: PartitionDescriptor,
    pub factory: Option<PartitionDescriptor>,
    pub main_app: Option<PartitionDescriptor>,
    pub boot_writes: u32,
    pub fail_set_boot: bool,
}

pub fn slot(label: &str, address: u32, size: u32) -> PartitionDescriptor {
    PartitionDescriptor::new(label, address, size, false)
}

impl MemPartitions {
    /// Two application slots, running from ota_0.
    pub fn two_slot() -> Self {
        let ota_0 = slot("ota_0", 0x10000, 0x300000);
        let ota_1 = slot("ota_1", 0x310000, 0x300000);
        Self {
            running: ota_0.clone(),
            next: ota_1,
            boot: ota_0.clone(),
            factory: None,
            main_app: Some(ota_0),
            boot_writes: 0,
            fail_set_boot: false,
        }
    }

    /// Factory loader plus one main application slot, as in `partitions.csv`.
    pub fn factory_layout(running_factory: bool) -> Self {
        let factory = slot("factory", 0x10000, 0x100000);
        let ota_0 = slot("ota_0", 0x110000, 0x700000);
        let running = if running_factory { factory.clone() } else { ota_0.clone() };
        Self {
            running: running.clone(),
            // With a single OTA slot the hardware reports ota_0 as "next" even
            // while it is running.
            next: ota_0.clone(),
            boot: running,
            factory: Some(factory),
            main_app: Some(ota_0),
            boot_writes: 0,
            fail_set_boot: false,
        }
    }

    /// Corrupt table: the alternate slot is the running one.
    pub fn conflicting() -> Self {
        let mut table = Self::two_slot();
        table.next = table.running.clone();
        table
    }
}

impl PartitionDirectory for MemPartitions {
    fn running_partition(&self) -> Result<PartitionDescriptor> {
        let mut running = self.running.clone();
        running.running = true;
        Ok(running)
    }

    fn next_update_partition(&self) -> Result<PartitionDescriptor> {
        Ok(self.next.clone())
    }

    fn boot_partition(&self) -> Result<PartitionDescriptor> {
        Ok(self.boot.clone())
    }

    fn factory_partition(&self) -> Option<PartitionDescriptor> {
        self.factory.clone()
    }

    fn main_application_partition(&self) -> Option<PartitionDescriptor> {
        self.main_app.clone()
    }

    fn set_boot_partition(&mut self, partition: &PartitionDescriptor) -> Result<()> {
        if self.fail_set_boot {
            return Err(OtaError::flash("otadata write failed"));
        }
        self.boot = partition.clone();
        self.boot_writes += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Update record

#[derive(Debug, Default)]
pub struct RecordState {
    pub record: UpdateRecord,
    pub sets: u32,
    pub clears: u32,
    pub fail_load: bool,
    pub fail_clear: bool,
    pub fail_set: bool,
}

/// Shared handle; survives "reboots" between contexts like NVS does.
#[derive(Debug, Clone, Default)]
pub struct MemRecord(pub Rc<RefCell<RecordState>>);

impl MemRecord {
    pub fn pending(size: u32) -> Self {
        let record = MemRecord::default();
        record.0.borrow_mut().record = UpdateRecord::Pending { size };
        record
    }

    pub fn current(&self) -> UpdateRecord {
        self.0.borrow().record
    }
}

impl UpdateRecordStore for MemRecord {
    fn load(&self) -> Result<UpdateRecord> {
        let state = self.0.borrow();
        if state.fail_load {
            return Err(OtaError::storage("nvs read failed"));
        }
        Ok(state.record)
    }

    fn set_pending(&mut self, size: u32) -> Result<()> {
        let mut state = self.0.borrow_mut();
        if state.fail_set {
            return Err(OtaError::storage("nvs write failed"));
        }
        state.record = UpdateRecord::Pending { size };
        state.sets += 1;
        Ok(())
    }

    fn clear_pending(&mut self) -> Result<()> {
        let mut state = self.0.borrow_mut();
        if state.fail_clear {
            return Err(OtaError::storage("nvs write failed"));
        }
        state.record = UpdateRecord::Idle;
        state.clears += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Removable storage

#[derive(Debug, Default)]
pub struct StorageState {
    pub files: HashMap<String, Vec<u8>>,
    pub fail_write_after: Option<usize>,
    pub removes: u32,
}

/// Files are written through on every call, so a partial image is visible.
#[derive(Debug, Clone, Default)]
pub struct MemStorage(pub Rc<RefCell<StorageState>>);

impl MemStorage {
    pub fn with_file(name: &str, data: Vec<u8>) -> Self {
        let storage = MemStorage::default();
        storage.0.borrow_mut().files.insert(name.to_string(), data);
        storage
    }

    pub fn file(&self, name: &str) -> Option<Vec<u8>> {
        self.0.borrow().files.get(name).cloned()
    }
}

pub struct MemFile {
    storage: MemStorage,
    name: String,
    written: usize,
}

impl Write for MemFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.storage.0.borrow_mut();
        if let Some(limit) = state.fail_write_after {
            if self.written + buf.len() > limit {
                return Err(io::Error::new(io::ErrorKind::Other, "card removed"));
            }
        }
        state
            .files
            .get_mut(&self.name)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "file vanished"))?
            .extend_from_slice(buf);
        self.written += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ImageStorage for MemStorage {
    type Reader = Cursor<Vec<u8>>;
    type Writer = MemFile;

    fn create(&self, name: &str) -> Result<MemFile> {
        self.0.borrow_mut().files.insert(name.to_string(), Vec::new());
        Ok(MemFile { storage: self.clone(), name: name.to_string(), written: 0 })
    }

    fn commit(&self, _writer: MemFile) -> Result<()> {
        Ok(())
    }

    fn open(&self, name: &str) -> Result<Self::Reader> {
        self.file(name)
            .map(Cursor::new)
            .ok_or_else(|| OtaError::storage(format!("{} not found", name)))
    }

    fn size(&self, name: &str) -> Result<u64> {
        self.file(name)
            .map(|f| f.len() as u64)
            .ok_or_else(|| OtaError::storage(format!("{} not found", name)))
    }

    fn exists(&self, name: &str) -> bool {
        self.0.borrow().files.contains_key(name)
    }

    fn remove(&self, name: &str) -> Result<()> {
        let mut state = self.0.borrow_mut();
        if state.files.remove(name).is_some() {
            state.removes += 1;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Flash

#[derive(Debug, Default)]
pub struct FlashState {
    pub begins: Vec<(String, u32, EraseMode)>,
    pub contents: HashMap<String, Vec<u8>>,
    pub finalized: Vec<String>,
    pub aborted: u32,
    /// Record state observed at every begin and write.
    pub record_seen: Vec<UpdateRecord>,
    pub begin_failures: u32,
    pub fail_write_at: Option<usize>,
    pub fail_finalize: bool,
    /// Panic (simulated power loss) once this many bytes are written.
    pub crash_at: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct MemFlash {
    pub state: Rc<RefCell<FlashState>>,
    pub record: Option<MemRecord>,
}

impl MemFlash {
    pub fn watching(record: &MemRecord) -> Self {
        Self { state: Rc::default(), record: Some(record.clone()) }
    }

    fn observe_record(&self) {
        if let Some(record) = &self.record {
            let seen = record.current();
            self.state.borrow_mut().record_seen.push(seen);
        }
    }

    pub fn written_to(&self, label: &str) -> Option<Vec<u8>> {
        self.state.borrow().contents.get(label).cloned()
    }

    pub fn was_written(&self) -> bool {
        !self.state.borrow().begins.is_empty()
    }
}

pub struct MemSession {
    flash: MemFlash,
    label: String,
    written: usize,
}

impl FlashWriter for MemFlash {
    type Session = MemSession;

    fn begin(&mut self, partition: &PartitionDescriptor, image_size: u32, mode: EraseMode) -> Result<MemSession> {
        self.observe_record();
        {
            let mut state = self.state.borrow_mut();
            if state.begin_failures > 0 {
                state.begin_failures -= 1;
                return Err(OtaError::flash("ESP_ERR_OTA_BASE"));
            }
            state.begins.push((partition.label.clone(), image_size, mode));
            state.contents.insert(partition.label.clone(), Vec::new());
        }
        Ok(MemSession { flash: self.clone(), label: partition.label.clone(), written: 0 })
    }
}

impl FlashSession for MemSession {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.flash.observe_record();
        let crash = {
            let mut state = self.flash.state.borrow_mut();
            if let Some(at) = state.fail_write_at {
                if self.written + data.len() > at {
                    return Err(OtaError::flash("esp_ota_write failed"));
                }
            }
            let crash = matches!(state.crash_at, Some(at) if self.written + data.len() > at);
            if !crash {
                if let Some(buf) = state.contents.get_mut(&self.label) {
                    buf.extend_from_slice(data);
                }
            }
            crash
        };
        if crash {
            panic!("simulated power loss during flash write");
        }
        self.written += data.len();
        Ok(())
    }

    fn finalize(self) -> Result<()> {
        let mut state = self.flash.state.borrow_mut();
        if state.fail_finalize {
            return Err(OtaError::flash("image validation failed"));
        }
        state.finalized.push(self.label);
        Ok(())
    }

    fn abort(self) {
        self.flash.state.borrow_mut().aborted += 1;
    }
}

// ---------------------------------------------------------------------------
// HTTP

#[derive(Debug, Clone)]
pub struct ScriptedHttp {
    pub status: u16,
    pub content_length: Option<u64>,
    pub body: Vec<u8>,
    pub pos: usize,
    /// Largest piece handed out per read.
    pub chunk: usize,
    /// Connection drops once this many body bytes were delivered.
    pub drop_after: Option<usize>,
    pub connect_error: bool,
    pub requested: Vec<String>,
    pub closes: u32,
}

impl ScriptedHttp {
    pub fn serving(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_length: Some(body.len() as u64),
            body,
            pos: 0,
            chunk: 1460,
            drop_after: None,
            connect_error: false,
            requested: Vec::new(),
            closes: 0,
        }
    }
}

impl FirmwareSource for ScriptedHttp {
    fn get(&mut self, url: &str) -> Result<ResponseHead> {
        self.requested.push(url.to_string());
        if self.connect_error {
            return Err(OtaError::transfer("connection refused"));
        }
        self.pos = 0;
        Ok(ResponseHead { status: self.status, content_length: self.content_length })
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut end = self.body.len().min(self.pos + self.chunk.min(buf.len()));
        if let Some(limit) = self.drop_after {
            if self.pos >= limit {
                return Err(OtaError::transfer("connection reset by peer"));
            }
            end = end.min(limit);
        }
        let n = end - self.pos;
        buf[..n].copy_from_slice(&self.body[self.pos..end]);
        self.pos = end;
        Ok(n)
    }

    fn close(&mut self) {
        self.closes += 1;
    }
}

// ---------------------------------------------------------------------------
// Timing, LED, radio, governor

#[derive(Debug, Default)]
pub struct NoDelay {
    pub total_ms: u64,
}

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ms += u64::from(ns) / 1_000_000;
    }

    fn delay_ms(&mut self, ms: u32) {
        self.total_ms += u64::from(ms);
    }
}

#[derive(Debug, Default)]
pub struct LedLog(pub Vec<(u32, u32)>);

impl StatusLed for LedLog {
    fn blink(&mut self, times: u32, period_ms: u32) {
        self.0.push((times, period_ms));
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordingRadio {
    pub notified: Rc<RefCell<Vec<String>>>,
    pub value: Rc<RefCell<String>>,
    pub advertising: Rc<Cell<bool>>,
    pub advertising_stops: Rc<Cell<u32>>,
}

impl RecordingRadio {
    pub fn statuses(&self) -> Vec<serde_json::Value> {
        self.notified
            .borrow()
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }
}

impl StatusChannel for RecordingRadio {
    fn set_status(&mut self, payload: &[u8]) -> Result<()> {
        *self.value.borrow_mut() = String::from_utf8_lossy(payload).into_owned();
        Ok(())
    }

    fn notify(&mut self, payload: &[u8]) -> Result<()> {
        self.notified.borrow_mut().push(String::from_utf8_lossy(payload).into_owned());
        Ok(())
    }

    fn start_advertising(&mut self) -> Result<()> {
        self.advertising.set(true);
        Ok(())
    }

    fn stop_advertising(&mut self) -> Result<()> {
        self.advertising.set(false);
        self.advertising_stops.set(self.advertising_stops.get() + 1);
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeGovernor {
    pub free_heap: usize,
    pub suspended: Rc<Cell<bool>>,
    pub resumes: Rc<Cell<u32>>,
}

impl ResourceGovernor for FakeGovernor {
    fn suspend_non_essential(&mut self) {
        self.suspended.set(true);
    }

    fn resume_non_essential(&mut self) {
        self.suspended.set(false);
        self.resumes.set(self.resumes.get() + 1);
    }

    fn free_internal_heap(&self) -> usize {
        self.free_heap
    }
}

/// Requests cancellation on the n-th poll.
pub struct CancelAfter {
    pub polls_left: usize,
}

impl TransferObserver for CancelAfter {
    fn cancel_requested(&mut self) -> bool {
        if self.polls_left == 0 {
            return true;
        }
        self.polls_left -= 1;
        false
    }
}

pub type MemContext = UpdateContext<MemPartitions, MemRecord, MemStorage, MemFlash, NoDelay>;

/// A context whose flash double watches the same record the context uses.
pub fn context(partitions: MemPartitions, record: MemRecord, storage: MemStorage) -> MemContext {
    let flash = MemFlash::watching(&record);
    UpdateContext::new(partitions, record, storage, flash, NoDelay::default())
}
