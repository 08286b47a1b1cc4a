// Hand-off between the radio callback context and the main loop
//
// Callbacks run on the radio task with a few KB of stack. They only copy the
// written bytes into a fixed frame, push it on a lock-free queue and flip
// atomics. Parsing, logging and notifications happen in `ControlBridge::handle`.

use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};

use heapless::spsc::{Consumer, Producer, Queue};

/// Largest single characteristic write accepted (negotiated MTU is smaller).
pub const FRAME_CAPACITY: usize = 512;
/// Queue slots. One slot stays empty, so this holds `INBOX_SLOTS - 1` frames.
pub const INBOX_SLOTS: usize = 8;

pub type Frame = heapless::Vec<u8, FRAME_CAPACITY>;
pub type Inbox = Queue<Frame, INBOX_SLOTS>;
pub type FrameProducer<'a> = Producer<'a, Frame, INBOX_SLOTS>;
pub type FrameConsumer<'a> = Consumer<'a, Frame, INBOX_SLOTS>;

/// Connection state shared with the radio callbacks. `const` so it can be a `static`.
#[derive(Debug, Default)]
pub struct LinkFlags {
    connected: AtomicBool,
    connect_event: AtomicBool,
    disconnect_event: AtomicBool,
    dropped_frames: AtomicU32,
    long_writes: AtomicU32,
    radio_errors: AtomicU32,
    /// Last negotiated MTU not yet reported; 0 when none.
    mtu: AtomicU16,
}

impl LinkFlags {
    pub const fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            connect_event: AtomicBool::new(false),
            disconnect_event: AtomicBool::new(false),
            dropped_frames: AtomicU32::new(0),
            long_writes: AtomicU32::new(0),
            radio_errors: AtomicU32::new(0),
            mtu: AtomicU16::new(0),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn mark_connected(&self) {
        self.connected.store(true, Ordering::Release);
        self.connect_event.store(true, Ordering::Release);
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
        self.disconnect_event.store(true, Ordering::Release);
    }

    pub fn take_connect_event(&self) -> bool {
        self.connect_event.swap(false, Ordering::AcqRel)
    }

    pub fn take_disconnect_event(&self) -> bool {
        self.disconnect_event.swap(false, Ordering::AcqRel)
    }

    pub fn note_dropped(&self) {
        self.dropped_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn take_dropped(&self) -> u32 {
        self.dropped_frames.swap(0, Ordering::Relaxed)
    }

    pub fn note_long_write(&self) {
        self.long_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn take_long_writes(&self) -> u32 {
        self.long_writes.swap(0, Ordering::Relaxed)
    }

    pub fn note_radio_error(&self) {
        self.radio_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn take_radio_errors(&self) -> u32 {
        self.radio_errors.swap(0, Ordering::Relaxed)
    }

    pub fn note_mtu(&self, mtu: u16) {
        self.mtu.store(mtu, Ordering::Relaxed);
    }

    pub fn take_mtu(&self) -> Option<u16> {
        match self.mtu.swap(0, Ordering::Relaxed) {
            0 => None,
            mtu => Some(mtu),
        }
    }
}

/// The only state the radio callbacks touch.
pub struct RadioCallbacks<'a> {
    producer: FrameProducer<'a>,
    link: &'a LinkFlags,
}

impl<'a> RadioCallbacks<'a> {
    pub fn new(producer: FrameProducer<'a>, link: &'a LinkFlags) -> Self {
        Self { producer, link }
    }

    /// Copy a command write. Returns `false` if it had to be dropped.
    pub fn on_write(&mut self, data: &[u8]) -> bool {
        let queued = Frame::from_slice(data)
            .ok()
            .map(|frame| self.producer.enqueue(frame).is_ok())
            .unwrap_or(false);
        if !queued {
            self.link.note_dropped();
        }
        queued
    }

    pub fn on_connect(&self) {
        self.link.mark_connected();
    }

    pub fn on_disconnect(&self) {
        self.link.mark_disconnected();
    }

    /// Prepared (long) writes are not reassembled; clients chunk the URL instead.
    pub fn on_long_write(&self) {
        self.link.note_long_write();
    }

    pub fn on_mtu(&self, mtu: u16) {
        self.link.note_mtu(mtu);
    }

    /// A radio-side operation failed inside a callback.
    pub fn on_radio_error(&self) {
        self.link.note_radio_error();
    }

    pub fn link(&self) -> &'a LinkFlags {
        self.link
    }
}
