// BLE GATT server carrying the control bridge
//
// The Bluedroid callbacks only touch `RadioCallbacks` and a few atomics, and
// never log. All command handling and reporting happens on the main loop
// through `ControlBridge`.

use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use catcam_core::bridge::{
    uuid_bytes, RadioCallbacks, StatusChannel, COMMAND_CHAR_UUID, SERVICE_UUID, STATUS_CHAR_UUID,
};
use catcam_core::OtaError;
use esp_idf_hal::modem::BluetoothModemPeripheral;
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_svc::bt::ble::gap::{AdvConfiguration, BleGapEvent, EspBleGap};
use esp_idf_svc::bt::ble::gatt::server::{EspGatts, GattsEvent};
use esp_idf_svc::bt::ble::gatt::{
    AutoResponse, GattCharacteristic, GattDescriptor, GattId, GattInterface, GattServiceId,
    GattStatus, Handle, Permission, Property,
};
use esp_idf_svc::bt::{Ble, BtDriver, BtStatus, BtUuid};
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_sys::EspError;

const APP_ID: u16 = 0;
const SERVICE_HANDLES: u8 = 8;
const MAX_VALUE_LEN: usize = 512;
const LOCAL_MTU: u16 = 517;
const CCCD_UUID: u16 = 0x2902;

type Driver = Arc<BtDriver<'static, Ble>>;
type Gap = EspBleGap<'static, Ble, Driver>;
type Gatts = EspGatts<'static, Ble, Driver>;

/// Handles learned while the service registers; 0 means not yet known.
#[derive(Default)]
struct Handles {
    gatt_if: AtomicU8,
    conn_id: AtomicU16,
    command: AtomicU16,
    status: AtomicU16,
}

fn uuid128(uuid: &str) -> Result<BtUuid> {
    uuid_bytes(uuid)
        .map(|b| BtUuid::uuid128(u128::from_be_bytes(b)))
        .ok_or_else(|| anyhow!("bad UUID {}", uuid))
}

struct Uuids {
    service: BtUuid,
    command: BtUuid,
    status: BtUuid,
}

pub struct BleRadio {
    gap: Arc<Gap>,
    gatts: Arc<Gatts>,
    handles: Arc<Handles>,
}

impl BleRadio {
    /// Bring up Bluedroid, register the service and start advertising.
    /// Writes to the command characteristic land in `callbacks`.
    pub fn start<M: BluetoothModemPeripheral>(
        modem: impl Peripheral<P = M> + 'static,
        nvs: EspDefaultNvsPartition,
        device_name: &str,
        callbacks: RadioCallbacks<'static>,
    ) -> Result<Self> {
        let driver: Driver = Arc::new(BtDriver::new(modem, Some(nvs))?);
        let gap = Arc::new(EspBleGap::new(driver.clone())?);
        let gatts = Arc::new(EspGatts::new(driver)?);
        let handles = Arc::new(Handles::default());
        let uuids = Arc::new(Uuids {
            service: uuid128(SERVICE_UUID)?,
            command: uuid128(COMMAND_CHAR_UUID)?,
            status: uuid128(STATUS_CHAR_UUID)?,
        });

        {
            let gap_cb = gap.clone();
            let link = callbacks.link();
            gap.subscribe(move |event| {
                if let BleGapEvent::AdvertisingConfigured(status) = event {
                    if status != BtStatus::Success || gap_cb.start_advertising().is_err() {
                        link.note_radio_error();
                    }
                }
            })?;
        }

        {
            let gap_cb = gap.clone();
            let gatts_cb = gatts.clone();
            let handles_cb = handles.clone();
            let uuids_cb = uuids.clone();
            let name = device_name.to_string();
            let callbacks = Mutex::new(callbacks);
            gatts.subscribe(move |(gatt_if, event)| {
                let Ok(mut callbacks) = callbacks.lock() else {
                    return;
                };
                let server = GattsHandler {
                    gap: &gap_cb,
                    gatts: &gatts_cb,
                    handles: &handles_cb,
                    uuids: &uuids_cb,
                    name: &name,
                };
                if server.on_event(&mut callbacks, gatt_if, event).is_err() {
                    callbacks.on_radio_error();
                }
            })?;
        }

        esp_idf_sys::esp!(unsafe { esp_idf_sys::esp_ble_gatt_set_local_mtu(LOCAL_MTU) })?;
        gatts.register_app(APP_ID)?;
        log::info!("BLE stack up, registering service as '{}'", device_name);

        Ok(Self { gap, gatts, handles })
    }
}

struct GattsHandler<'a> {
    gap: &'a Gap,
    gatts: &'a Gatts,
    handles: &'a Handles,
    uuids: &'a Uuids,
    name: &'a str,
}

impl GattsHandler<'_> {
    fn on_event(
        &self,
        callbacks: &mut RadioCallbacks<'static>,
        gatt_if: GattInterface,
        event: GattsEvent,
    ) -> Result<(), EspError> {
        match event {
            GattsEvent::ServiceRegistered { status, app_id } => {
                if status == GattStatus::Ok && app_id == APP_ID {
                    self.handles.gatt_if.store(gatt_if, Ordering::Relaxed);
                    self.create_service(gatt_if)?;
                }
            }
            GattsEvent::ServiceCreated { status, service_handle, .. } => {
                if status == GattStatus::Ok {
                    self.gatts.start_service(service_handle)?;
                    self.gatts.add_characteristic(
                        service_handle,
                        &GattCharacteristic {
                            uuid: self.uuids.command.clone(),
                            permissions: Permission::Write.into(),
                            properties: Property::Write.into(),
                            max_len: MAX_VALUE_LEN,
                            auto_rsp: AutoResponse::ByGatt,
                        },
                        &[],
                    )?;
                }
            }
            GattsEvent::CharacteristicAdded { status, attr_handle, service_handle, char_uuid } => {
                if status != GattStatus::Ok {
                    callbacks.on_radio_error();
                } else if char_uuid == self.uuids.command {
                    self.handles.command.store(attr_handle, Ordering::Relaxed);
                    self.gatts.add_characteristic(
                        service_handle,
                        &GattCharacteristic {
                            uuid: self.uuids.status.clone(),
                            permissions: Permission::Read.into(),
                            properties: Property::Read | Property::Notify,
                            max_len: MAX_VALUE_LEN,
                            auto_rsp: AutoResponse::ByGatt,
                        },
                        &[],
                    )?;
                } else if char_uuid == self.uuids.status {
                    self.handles.status.store(attr_handle, Ordering::Relaxed);
                    self.gatts.add_descriptor(
                        service_handle,
                        &GattDescriptor {
                            uuid: BtUuid::uuid16(CCCD_UUID),
                            permissions: Permission::Read | Permission::Write,
                        },
                    )?;
                }
            }
            GattsEvent::PeerConnected { conn_id, .. } => {
                self.handles.conn_id.store(conn_id, Ordering::Relaxed);
                callbacks.on_connect();
            }
            GattsEvent::PeerDisconnected { .. } => {
                callbacks.on_disconnect();
            }
            GattsEvent::Write { handle, is_prep, value, .. } => {
                if handle == self.handles.command.load(Ordering::Relaxed) {
                    if is_prep {
                        callbacks.on_long_write();
                    } else {
                        // Drops are counted in the link flags.
                        callbacks.on_write(value);
                    }
                }
            }
            GattsEvent::Mtu { mtu, .. } => {
                callbacks.on_mtu(mtu);
            }
            _ => {}
        }
        Ok(())
    }

    fn create_service(&self, gatt_if: GattInterface) -> Result<(), EspError> {
        self.gap.set_device_name(self.name)?;
        // The 128-bit UUID and the name do not fit one 31 byte packet.
        self.gap.set_adv_conf(&AdvConfiguration {
            set_scan_rsp: true,
            include_name: true,
            ..Default::default()
        })?;
        self.gap.set_adv_conf(&AdvConfiguration {
            include_name: false,
            include_txpower: true,
            flag: 2,
            service_uuid: Some(self.uuids.service.clone()),
            ..Default::default()
        })?;
        self.gatts.create_service(
            gatt_if,
            &GattServiceId {
                id: GattId { uuid: self.uuids.service.clone(), inst_id: 0 },
                is_primary: true,
            },
            SERVICE_HANDLES,
        )
    }
}

fn radio_err(op: &str, e: EspError) -> OtaError {
    OtaError::protocol(format!("ble {}: {}", op, e))
}

impl BleRadio {
    /// True once both characteristics have handles.
    pub fn is_registered(&self) -> bool {
        self.handles.command.load(Ordering::Relaxed) != 0 && self.handles.status.load(Ordering::Relaxed) != 0
    }

    fn status_handle(&self) -> catcam_core::Result<Handle> {
        match self.handles.status.load(Ordering::Relaxed) {
            0 => Err(OtaError::protocol("status characteristic not registered")),
            handle => Ok(handle),
        }
    }
}

impl StatusChannel for BleRadio {
    fn set_status(&mut self, payload: &[u8]) -> catcam_core::Result<()> {
        let handle = self.status_handle()?;
        self.gatts.set_attr(handle, payload).map_err(|e| radio_err("set_attr", e))
    }

    fn notify(&mut self, payload: &[u8]) -> catcam_core::Result<()> {
        let handle = self.status_handle()?;
        self.gatts
            .notify(
                self.handles.gatt_if.load(Ordering::Relaxed),
                self.handles.conn_id.load(Ordering::Relaxed),
                handle,
                payload,
            )
            .map_err(|e| radio_err("notify", e))
    }

    fn start_advertising(&mut self) -> catcam_core::Result<()> {
        self.gap.start_advertising().map_err(|e| radio_err("start advertising", e))
    }

    fn stop_advertising(&mut self) -> catcam_core::Result<()> {
        self.gap.stop_advertising().map_err(|e| radio_err("stop advertising", e))
    }
}
