//! The boundary with the platform Bluetooth stack.
//!
//! Everything below the GATT sessions is reached through these traits; the
//! stack reports back over plain mpsc channels, with the remote address as
//! the correlation key. Inbound attribute requests carry a oneshot
//! responder; dropping the responder sends no response at all.

pub mod mock;

use crate::error::Error;
use crate::gatt::service::Service;
use async_trait::async_trait;
use std::fmt;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Connection-state sentinels as delivered by platform callbacks.
pub const STATE_DISCONNECTED: i32 = 0;
pub const STATE_CONNECTED: i32 = 2;
/// Alias value some stacks report for a connected transition; callback
/// encodings have been observed to vary.
pub const STATE_CONNECTED_ALIAS: i32 = 2;

/// Status code reported alongside a successful operation.
pub const GATT_SUCCESS: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondState {
    None,
    Bonding,
    Bonded,
}

impl fmt::Display for BondState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BondState::None => write!(f, "none"),
            BondState::Bonding => write!(f, "bonding"),
            BondState::Bonded => write!(f, "bonded"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteDevice {
    pub address: String,
    pub name: Option<String>,
    pub bond_state: BondState,
    /// Class-of-device major number, when the stack reports one.
    pub device_class: Option<u32>,
}

impl RemoteDevice {
    pub fn new(address: impl Into<String>) -> Self {
        RemoteDevice {
            address: address.into(),
            name: None,
            bond_state: BondState::None,
            device_class: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// An open outbound GATT link. The id is assigned per `connect` call, so a
/// disconnect-then-reconnect under the same address yields a different
/// handle; stale holders detect replacement by comparing ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkHandle {
    pub address: String,
    pub id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Success,
    Failure,
}

/// Payload handed back through a request's oneshot responder; mirrors
/// `send_response(status, offset, value)` on the platform side.
#[derive(Debug)]
pub struct GattResponse {
    pub status: ResponseStatus,
    pub offset: usize,
    pub value: Vec<u8>,
}

impl GattResponse {
    pub fn success(value: Vec<u8>) -> Self {
        GattResponse {
            status: ResponseStatus::Success,
            offset: 0,
            value,
        }
    }

    pub fn empty_success() -> Self {
        GattResponse::success(Vec::new())
    }
}

/// Callbacks from the GATT-server side of the stack.
#[derive(Debug)]
pub enum ServerEvent {
    /// The one asynchronous outcome of a `start_advertising` request; `Err`
    /// carries the platform failure code.
    AdvertiseResult { result: Result<(), i32> },
    ConnectionStateChange {
        device: RemoteDevice,
        status: i32,
        new_state: i32,
    },
    ReadRequest {
        device: RemoteDevice,
        service: Uuid,
        characteristic: Uuid,
        offset: usize,
        responder: oneshot::Sender<GattResponse>,
    },
    /// `responder` is absent for write-without-response requests.
    WriteRequest {
        device: RemoteDevice,
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
        offset: usize,
        prepared: bool,
        responder: Option<oneshot::Sender<GattResponse>>,
    },
    DescriptorWriteRequest {
        device: RemoteDevice,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
        responder: Option<oneshot::Sender<GattResponse>>,
    },
    ExecuteWrite {
        device: RemoteDevice,
        execute: bool,
        responder: oneshot::Sender<GattResponse>,
    },
}

/// Callbacks from the GATT-client side of the stack.
#[derive(Debug, Clone)]
pub enum CentralEvent {
    ConnectionStateChange {
        address: String,
        status: i32,
        new_state: i32,
    },
    ServicesDiscovered {
        address: String,
        status: i32,
        services: Vec<Service>,
    },
    CharacteristicRead {
        address: String,
        service: Uuid,
        characteristic: Uuid,
        status: i32,
        value: Vec<u8>,
    },
    CharacteristicChanged {
        address: String,
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
    },
}

#[derive(Debug, Clone)]
pub struct AdvertiseRequest {
    pub local_name: String,
    pub service_uuids: Vec<Uuid>,
    /// Excluded by default for packet-size economy.
    pub include_tx_power: bool,
    pub connectable: bool,
    /// `None` advertises without a timeout.
    pub timeout_ms: Option<u32>,
}

#[async_trait]
pub trait PeripheralBackend: Send + Sync + 'static {
    /// Names of required platform permissions that are not granted.
    fn missing_permissions(&self) -> Vec<String>;

    async fn is_powered(&self) -> Result<bool, Error>;

    fn advertising_supported(&self) -> bool;

    async fn open_gatt_server(&self) -> Result<(), Error>;

    async fn close_gatt_server(&self);

    async fn add_service(&self, service: &Service) -> Result<(), Error>;

    /// Request-acceptance only; the outcome arrives as
    /// [`ServerEvent::AdvertiseResult`].
    async fn start_advertising(&self, request: &AdvertiseRequest) -> Result<(), Error>;

    async fn stop_advertising(&self) -> Result<(), Error>;

    async fn notify_characteristic(&self, characteristic: Uuid, value: Vec<u8>)
        -> Result<(), Error>;
}

#[async_trait]
pub trait CentralBackend: Send + Sync + 'static {
    fn missing_permissions(&self) -> Vec<String>;

    async fn is_powered(&self) -> Result<bool, Error>;

    async fn resolve_device(&self, address: &str) -> Option<RemoteDevice>;

    /// Opens an outbound link; completion arrives as
    /// [`CentralEvent::ConnectionStateChange`] keyed by address.
    async fn connect(&self, address: &str) -> Result<LinkHandle, Error>;

    async fn discover_services(&self, link: &LinkHandle) -> Result<(), Error>;

    async fn write_descriptor(
        &self,
        link: &LinkHandle,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
    ) -> Result<(), Error>;

    /// Fire-and-forget; the value arrives as
    /// [`CentralEvent::CharacteristicRead`].
    async fn read_characteristic(
        &self,
        link: &LinkHandle,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), Error>;

    async fn close(&self, link: &LinkHandle);
}
