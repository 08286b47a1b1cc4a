// Main-loop side of the wireless control bridge

use embedded_hal::delay::DelayNs;

use crate::bridge::chunks::{ChunkAccumulator, ChunkProgress};
use crate::bridge::command::{validate_url, Command};
use crate::bridge::inbox::{FrameConsumer, LinkFlags};
use crate::bridge::status::{StatusKind, StatusReport};
use crate::error::{OtaError, Result};
use crate::progress::{TransferObserver, TransferStage};
use crate::strategy::{UpdateOutcome, UpdateService};

const READVERTISE_DELAY_MS: u32 = 500;

/// The radio side of the status characteristic and advertising.
pub trait StatusChannel {
    /// Update the readable value of the status characteristic.
    fn set_status(&mut self, payload: &[u8]) -> Result<()>;

    /// Push to the connected client. Must not block on delivery.
    fn notify(&mut self, payload: &[u8]) -> Result<()>;

    fn start_advertising(&mut self) -> Result<()>;

    fn stop_advertising(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeAction {
    None,
    /// An update finished or failed; the caller reboots after a short grace period.
    Reboot,
}

fn publish<C: StatusChannel>(channel: &mut C, link: &LinkFlags, report: &StatusReport) {
    let json = report.to_json();
    if let Err(e) = channel.set_status(json.as_bytes()) {
        log::debug!("Status value not updated: {}", e);
    }
    if !link.is_connected() {
        return;
    }
    if let Err(e) = channel.notify(json.as_bytes()) {
        log::debug!("Status notify dropped: {}", e);
    }
}

pub struct ControlBridge<'a, C> {
    inbox: FrameConsumer<'a>,
    link: &'a LinkFlags,
    channel: C,
    chunks: ChunkAccumulator,
    version: String,
}

impl<'a, C: StatusChannel> ControlBridge<'a, C> {
    pub fn new(inbox: FrameConsumer<'a>, link: &'a LinkFlags, channel: C, version: &str) -> Self {
        Self { inbox, link, channel, chunks: ChunkAccumulator::new(), version: version.to_string() }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Emitted once the service is registered and advertising.
    pub fn announce_ready(&mut self) {
        self.send(StatusKind::Ready, "Bluetooth OTA service ready", 0);
    }

    /// Called on every main-loop iteration. All command processing happens here.
    pub fn handle<U, D>(&mut self, service: &mut U, delay: &mut D) -> BridgeAction
    where
        U: UpdateService,
        D: DelayNs,
    {
        self.report_radio_notes();

        // Disconnect first: a drop and a reconnect can both land between two calls.
        if self.link.take_disconnect_event() {
            if self.link.is_connected() {
                log::info!("BLE: client disconnected and a new one connected");
            } else {
                log::info!("BLE: client disconnected, restarting advertising");
                delay.delay_ms(READVERTISE_DELAY_MS);
                self.restart_advertising();
            }
        }

        if self.link.take_connect_event() && self.link.is_connected() {
            log::info!("BLE: client connected");
            self.send(StatusKind::Connected, "Client connected to BootBoots", 0);
        }

        while let Some(frame) = self.inbox.dequeue() {
            if self.dispatch(&frame, service) == BridgeAction::Reboot {
                return BridgeAction::Reboot;
            }
        }

        BridgeAction::None
    }

    fn dispatch<U: UpdateService>(&mut self, frame: &[u8], service: &mut U) -> BridgeAction {
        let command = match Command::parse(frame) {
            Ok(command) => command,
            Err(e) => {
                log::warn!("BLE: rejected command: {}", e);
                self.send(StatusKind::Error, error_message(&e), 0);
                return BridgeAction::None;
            }
        };
        log::info!("BLE: command {:?}", command);

        match command {
            Command::GetStatus => {
                self.send(StatusKind::Ready, "Ready for OTA update", 0);
                BridgeAction::None
            }
            Command::CancelUpdate => {
                self.chunks.reset();
                self.send(StatusKind::Cancelled, "OTA update cancelled", 0);
                BridgeAction::None
            }
            Command::OtaUpdate { firmware_url, version } => {
                self.run_update(service, &firmware_url, version.as_deref())
            }
            Command::UrlChunk(chunk) => match self.chunks.accept(chunk) {
                Ok(ChunkProgress::Partial { index, total, .. }) => {
                    let message = format!("Chunk {}/{} received", index + 1, total);
                    self.send(StatusKind::Starting, message, 0);
                    BridgeAction::None
                }
                Ok(ChunkProgress::Complete { url, version }) => {
                    log::info!("BLE: firmware URL reassembled ({} bytes)", url.len());
                    if let Err(e) = validate_url(&url) {
                        self.send(StatusKind::Error, error_message(&e), 0);
                        return BridgeAction::None;
                    }
                    self.run_update(service, &url, version.as_deref())
                }
                Err(e) => {
                    log::warn!("BLE: bad chunk: {}", e);
                    self.send(StatusKind::Error, error_message(&e), 0);
                    BridgeAction::None
                }
            },
        }
    }

    fn run_update<U: UpdateService>(
        &mut self,
        service: &mut U,
        url: &str,
        version: Option<&str>,
    ) -> BridgeAction {
        self.send(StatusKind::Starting, "Starting OTA update...", 0);
        if let Err(e) = self.channel.stop_advertising() {
            log::warn!("BLE: could not stop advertising: {}", e);
        }
        self.chunks.reset();

        let outcome = {
            let mut observer = BridgeObserver {
                inbox: &mut self.inbox,
                link: self.link,
                channel: &mut self.channel,
                version: &self.version,
                stage: TransferStage::Download,
                percent: 0,
                cancelled: false,
            };
            observer.publish(StatusKind::Downloading, "Downloading firmware...".to_string());
            service.start_update(url, version, &mut observer)
        };

        match outcome {
            UpdateOutcome::Staged { size } => {
                self.send(
                    StatusKind::Updating,
                    format!("Firmware downloaded ({} bytes), rebooting to install", size),
                    100,
                );
                BridgeAction::Reboot
            }
            UpdateOutcome::Installed { partition } => {
                self.send(
                    StatusKind::Updating,
                    format!("Firmware installed to {}, rebooting", partition.label),
                    100,
                );
                BridgeAction::Reboot
            }
            UpdateOutcome::Failed(e) => {
                self.send(StatusKind::Error, format!("Update failed: {}", e), 0);
                BridgeAction::Reboot
            }
            UpdateOutcome::Cancelled => {
                self.send(StatusKind::Cancelled, "OTA update cancelled", 0);
                self.restart_advertising();
                BridgeAction::None
            }
        }
    }

    fn report_radio_notes(&self) {
        let dropped = self.link.take_dropped();
        if dropped > 0 {
            log::warn!("BLE: dropped {} command frame(s) (queue full or oversized)", dropped);
        }
        let long_writes = self.link.take_long_writes();
        if long_writes > 0 {
            log::warn!("BLE: ignored {} long write(s); send the URL in chunks", long_writes);
        }
        let errors = self.link.take_radio_errors();
        if errors > 0 {
            log::warn!("BLE: {} radio event(s) failed", errors);
        }
        if let Some(mtu) = self.link.take_mtu() {
            log::debug!("BLE: MTU negotiated: {}", mtu);
        }
    }

    fn restart_advertising(&mut self) {
        if let Err(e) = self.channel.start_advertising() {
            log::error!("BLE: failed to restart advertising: {}", e);
        }
    }

    fn send(&mut self, status: StatusKind, message: impl Into<String>, progress: u8) {
        let report = StatusReport::new(status, message, progress, &self.version);
        publish(&mut self.channel, self.link, &report);
    }
}

fn error_message(e: &OtaError) -> String {
    match e {
        OtaError::Protocol(msg) => msg.clone(),
        other => other.to_string(),
    }
}

/// Keeps the client informed while a transfer owns the main loop, and picks
/// `cancel_update` out of the inbox between chunks.
struct BridgeObserver<'b, 'a, C> {
    inbox: &'b mut FrameConsumer<'a>,
    link: &'a LinkFlags,
    channel: &'b mut C,
    version: &'b str,
    stage: TransferStage,
    percent: u8,
    cancelled: bool,
}

impl<C: StatusChannel> BridgeObserver<'_, '_, C> {
    fn publish(&mut self, status: StatusKind, message: String) {
        let report = StatusReport::new(status, message, self.percent, self.version);
        publish(self.channel, self.link, &report);
    }

    fn current_status(&self) -> (StatusKind, String) {
        match self.stage {
            TransferStage::Download => {
                (StatusKind::Downloading, format!("Downloading firmware... {}%", self.percent))
            }
            TransferStage::Flash => {
                (StatusKind::Updating, format!("Writing firmware... {}%", self.percent))
            }
        }
    }
}

impl<C: StatusChannel> TransferObserver for BridgeObserver<'_, '_, C> {
    fn on_progress(&mut self, stage: TransferStage, percent: u8, _done: u64, _total: u64) {
        self.stage = stage;
        self.percent = percent;
        let (status, message) = self.current_status();
        self.publish(status, message);
    }

    fn cancel_requested(&mut self) -> bool {
        while let Some(frame) = self.inbox.dequeue() {
            match Command::parse(&frame) {
                Ok(Command::CancelUpdate) => {
                    log::info!("BLE: cancel requested during transfer");
                    self.cancelled = true;
                }
                Ok(Command::GetStatus) => {
                    let (status, message) = self.current_status();
                    self.publish(status, message);
                }
                Ok(Command::OtaUpdate { .. }) | Ok(Command::UrlChunk(_)) => {
                    self.publish(StatusKind::Error, "Update already in progress".to_string());
                }
                Err(e) => {
                    self.publish(StatusKind::Error, error_message(&e));
                }
            }
        }
        self.cancelled
    }
}
