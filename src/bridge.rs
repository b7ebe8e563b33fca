//! The contract between the GATT sessions and the application layer:
//! commands go in through [`BleBridge`], structured events come out on one
//! mpsc channel consumed by a single application task.

use crate::central::{CentralRegistry, ConnectAck, DisconnectAck};
use crate::codec::{self, PayloadAnalysis};
use crate::error::Error;
use crate::gatt::service::Service;
use crate::peripheral::{AdvertiseConfig, AdvertiseFailure, PeripheralSession};
use crate::platform::{BondState, CentralBackend, PeripheralBackend};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc::Sender;
use uuid::Uuid;

pub type EventSink = Sender<BridgeEvent>;

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct BridgeEvent {
    pub timestamp_ms: u64,
    pub kind: BridgeEventKind,
}

#[derive(Debug, Clone)]
pub enum BridgeEventKind {
    AdvertisingStarted,
    AdvertisingFailed {
        reason: AdvertiseFailure,
    },
    /// A remote central connected to our GATT server.
    DeviceConnected {
        address: String,
        name: Option<String>,
        bond_state: BondState,
        device_class: Option<u32>,
        device_class_label: Option<String>,
        /// Snapshot of every registered service with current values.
        services: Vec<Service>,
    },
    DeviceDisconnected {
        address: String,
    },
    /// A remote central wrote one of our characteristics.
    DataReceived(CharacteristicData),
    CentralConnected {
        address: String,
        name: Option<String>,
        bond_state: BondState,
    },
    CentralDisconnected {
        address: String,
        status: i32,
        /// Decoded reason for known platform error classes.
        reason: Option<String>,
    },
    ServicesDiscovered {
        address: String,
        services: Vec<Service>,
        subscribed_count: usize,
        poll_count: usize,
    },
    CharacteristicRead(CharacteristicData),
    CharacteristicChanged(CharacteristicData),
}

/// One received payload with every interpretation attached. Identical for
/// pushed and polled data; consumers need not know which path delivered it.
#[derive(Debug, Clone)]
pub struct CharacteristicData {
    pub address: String,
    pub device_name: Option<String>,
    pub service: Uuid,
    pub characteristic: Uuid,
    pub data: Vec<u8>,
    pub hex: String,
    pub text: String,
    pub size: usize,
    pub analysis: PayloadAnalysis,
}

impl CharacteristicData {
    pub(crate) fn new(
        address: String,
        device_name: Option<String>,
        service: Uuid,
        characteristic: Uuid,
        data: Vec<u8>,
    ) -> Self {
        let analysis = codec::analyze(&data, characteristic);
        CharacteristicData {
            hex: analysis.hex.clone(),
            text: codec::display_text(&data),
            size: data.len(),
            address,
            device_name,
            service,
            characteristic,
            data,
            analysis,
        }
    }
}

pub(crate) async fn emit(sink: &EventSink, kind: BridgeEventKind) {
    let event = BridgeEvent {
        timestamp_ms: now_millis(),
        kind,
    };
    if let Err(err) = sink.send(event).await {
        log::error!("Error sending bridge event: {:?}", err);
    }
}

/// Facade over both roles, exposing the full command surface.
pub struct BleBridge<P: PeripheralBackend, C: CentralBackend> {
    peripheral: PeripheralSession<P>,
    central: CentralRegistry<C>,
}

impl<P: PeripheralBackend, C: CentralBackend> BleBridge<P, C> {
    pub fn new(peripheral: PeripheralSession<P>, central: CentralRegistry<C>) -> Self {
        BleBridge {
            peripheral,
            central,
        }
    }

    pub async fn start_advertising(&self, config: AdvertiseConfig) -> Result<(), Error> {
        self.peripheral.start(config).await
    }

    pub async fn stop_advertising(&self) -> Result<(), Error> {
        self.peripheral.stop().await
    }

    pub async fn update_heart_rate(&self, bpm: u32) -> Result<(), Error> {
        self.peripheral.update_heart_rate(bpm).await
    }

    pub async fn update_battery_level(&self, percent: u32) -> Result<(), Error> {
        self.peripheral.update_battery_level(percent).await
    }

    pub async fn connect_to_device(&self, address: &str) -> Result<ConnectAck, Error> {
        self.central.connect(address).await
    }

    pub async fn disconnect_from_device(&self, address: &str) -> Result<DisconnectAck, Error> {
        self.central.disconnect(address).await
    }

    pub async fn discover_services(&self, address: &str) -> Result<(), Error> {
        self.central.discover_services(address).await
    }

    pub fn peripheral(&self) -> &PeripheralSession<P> {
        &self.peripheral
    }

    pub fn central(&self) -> &CentralRegistry<C> {
        &self.central
    }
}
