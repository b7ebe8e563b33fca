//! GATT-server side of the bridge: advertising lifecycle, the peripheral
//! connection slot, and attribute request handling.

use crate::bridge::{self, BridgeEventKind, CharacteristicData, EventSink};
use crate::codec;
use crate::error::{Error, ErrorKind};
use crate::gatt::{catalog, ids, service::Service};
use crate::platform::{
    AdvertiseRequest, BondState, GattResponse, PeripheralBackend, RemoteDevice, ServerEvent,
    GATT_SUCCESS, STATE_CONNECTED, STATE_CONNECTED_ALIAS,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::Receiver;
use tokio::sync::oneshot;
use uuid::Uuid;

/// At most this many service UUIDs fit the advertisement payload.
pub const MAX_ADVERTISED_SERVICES: usize = 3;

#[derive(Debug, Clone)]
pub struct AdvertiseConfig {
    pub device_name: String,
    /// Primary service UUIDs included in the advertisement (up to three).
    pub service_uuids: Vec<Uuid>,
}

impl Default for AdvertiseConfig {
    fn default() -> Self {
        AdvertiseConfig {
            device_name: catalog::DEFAULT_DEVICE_NAME.to_string(),
            service_uuids: vec![
                *ids::HEART_RATE_SERVICE,
                *ids::BATTERY_SERVICE,
                *ids::DEVICE_INFORMATION_SERVICE,
            ],
        }
    }
}

/// The one remote central currently bonded to our GATT server.
#[derive(Debug, Clone)]
pub struct PeripheralConnection {
    pub address: String,
    pub name: Option<String>,
    pub bond_state: BondState,
    pub connected_at_ms: u64,
}

/// Tagged outcome of an advertising start that failed at the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertiseFailure {
    DataTooLarge,
    TooManyAdvertisers,
    AlreadyStarted,
    InternalError,
    Unsupported,
    Unknown(i32),
}

impl AdvertiseFailure {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => AdvertiseFailure::DataTooLarge,
            2 => AdvertiseFailure::TooManyAdvertisers,
            3 => AdvertiseFailure::AlreadyStarted,
            4 => AdvertiseFailure::InternalError,
            5 => AdvertiseFailure::Unsupported,
            other => AdvertiseFailure::Unknown(other),
        }
    }
}

impl fmt::Display for AdvertiseFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AdvertiseFailure::DataTooLarge => write!(f, "data-too-large"),
            AdvertiseFailure::TooManyAdvertisers => write!(f, "too-many-advertisers"),
            AdvertiseFailure::AlreadyStarted => write!(f, "already-started"),
            AdvertiseFailure::InternalError => write!(f, "internal-error"),
            AdvertiseFailure::Unsupported => write!(f, "unsupported"),
            AdvertiseFailure::Unknown(code) => write!(f, "unknown:{}", code),
        }
    }
}

/// Decides whether a connection-state callback means "connected".
///
/// Platform stacks have been observed to disagree on the encoding, so every
/// accepted sentinel lives in this one function instead of inline checks
/// scattered through the state machine.
pub(crate) fn is_connected_transition(status: i32, new_state: i32) -> bool {
    new_state == STATE_CONNECTED
        || (status == GATT_SUCCESS && new_state == STATE_CONNECTED_ALIAS)
}

/// Class-of-device major class, per the assigned-numbers table.
pub fn device_class_label(major: u32) -> String {
    let label = match major {
        0x0000 => "Miscellaneous",
        0x0100 => "Computer",
        0x0200 => "Phone",
        0x0300 => "Networking",
        0x0400 => "Audio/Video",
        0x0500 => "Peripheral",
        0x0600 => "Imaging",
        0x0700 => "Wearable",
        0x0800 => "Toy",
        0x0900 => "Health",
        other => return format!("Unknown class ({:#06x})", other),
    };
    label.to_string()
}

#[derive(Debug)]
struct SessionState {
    config: AdvertiseConfig,
    advertising: bool,
    services: Vec<Service>,
    /// Per-service registration outcome of the last `start`.
    registration: Vec<(Uuid, bool)>,
    connection: Option<PeripheralConnection>,
    heart_rate: u32,
    battery_level: u32,
    /// Last-known client-configuration state, keyed by characteristic.
    notifications_enabled: HashMap<Uuid, bool>,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState {
            config: AdvertiseConfig::default(),
            advertising: false,
            services: Vec::new(),
            registration: Vec::new(),
            connection: None,
            heart_rate: catalog::DEFAULT_HEART_RATE,
            battery_level: catalog::DEFAULT_BATTERY_LEVEL,
            notifications_enabled: HashMap::new(),
        }
    }
}

pub struct PeripheralSession<B: PeripheralBackend> {
    backend: Arc<B>,
    state: Arc<Mutex<SessionState>>,
    events: EventSink,
}

impl<B: PeripheralBackend> Clone for PeripheralSession<B> {
    fn clone(&self) -> Self {
        PeripheralSession {
            backend: Arc::clone(&self.backend),
            state: Arc::clone(&self.state),
            events: self.events.clone(),
        }
    }
}

impl<B: PeripheralBackend> PeripheralSession<B> {
    /// Creates the session and spawns its event pump over the backend's
    /// callback channel.
    pub fn spawn(
        backend: Arc<B>,
        server_events: Receiver<ServerEvent>,
        events: EventSink,
    ) -> Self {
        let session = PeripheralSession {
            backend,
            state: Arc::new(Mutex::new(SessionState::default())),
            events,
        };
        let pump = session.clone();
        tokio::spawn(async move {
            pump.run(server_events).await;
        });
        session
    }

    async fn run(self, mut server_events: Receiver<ServerEvent>) {
        while let Some(event) = server_events.recv().await {
            self.handle_server_event(event).await;
        }
        log::debug!("Peripheral backend event stream closed");
    }

    /// Registers the catalog and requests advertising. Returns
    /// request-acceptance; the one asynchronous outcome arrives as an
    /// `AdvertisingStarted` or `AdvertisingFailed` event.
    pub async fn start(&self, mut config: AdvertiseConfig) -> Result<(), Error> {
        let missing = self.backend.missing_permissions();
        if !missing.is_empty() {
            return Err(Error::new(
                ErrorKind::PermissionDenied,
                format!("Missing permissions: {}", missing.join(", ")),
            ));
        }
        if !self.backend.is_powered().await? {
            return Err(Error::new(
                ErrorKind::HardwareUnavailable,
                "Bluetooth is not enabled",
            ));
        }
        if !self.backend.advertising_supported() {
            return Err(Error::new(
                ErrorKind::HardwareUnavailable,
                "BLE advertising not supported",
            ));
        }

        if config.service_uuids.len() > MAX_ADVERTISED_SERVICES {
            log::warn!(
                "Advertising {} service UUIDs does not fit the packet, keeping the first {}",
                config.service_uuids.len(),
                MAX_ADVERTISED_SERVICES
            );
            config.service_uuids.truncate(MAX_ADVERTISED_SERVICES);
        }

        // A previous advertisement may still be running; stop it before
        // re-registering services.
        if let Err(err) = self.backend.stop_advertising().await {
            log::warn!("Stopping previous advertisement failed: {}", err);
        }

        let (heart_rate, battery_level) = match self.state.lock() {
            Ok(state) => (state.heart_rate, state.battery_level),
            Err(err) => return Err(Error::new(ErrorKind::Internal, err.to_string())),
        };
        let services = catalog::build_catalog(&config.device_name, heart_rate, battery_level);

        self.backend.open_gatt_server().await?;

        let mut registration = Vec::with_capacity(services.len());
        for service in &services {
            match self.backend.add_service(service).await {
                Ok(()) => {
                    log::debug!("Service registered: {}", service.uuid);
                    registration.push((service.uuid, true));
                }
                Err(err) => {
                    // One failed registration must not keep the remaining
                    // services from attempting.
                    log::error!("Failed to register service {}: {}", service.uuid, err);
                    registration.push((service.uuid, false));
                }
            }
        }

        let request = AdvertiseRequest {
            local_name: config.device_name.clone(),
            service_uuids: config.service_uuids.clone(),
            include_tx_power: false,
            connectable: true,
            timeout_ms: None,
        };
        self.backend.start_advertising(&request).await?;

        match self.state.lock() {
            Ok(mut state) => {
                state.config = config;
                state.services = services;
                state.registration = registration;
                state.advertising = true;
                Ok(())
            }
            Err(err) => Err(Error::new(ErrorKind::Internal, err.to_string())),
        }
    }

    /// Idempotent; stopping while not advertising is a no-op success. The
    /// GATT server is closed either way.
    pub async fn stop(&self) -> Result<(), Error> {
        if let Err(err) = self.backend.stop_advertising().await {
            log::warn!("Stopping advertisement failed: {}", err);
        }
        self.backend.close_gatt_server().await;
        if let Ok(mut state) = self.state.lock() {
            state.advertising = false;
        }
        Ok(())
    }

    pub async fn update_heart_rate(&self, bpm: u32) -> Result<(), Error> {
        let value = codec::encode_heart_rate(bpm);
        let notify = match self.state.lock() {
            Ok(mut state) => {
                state.heart_rate = bpm;
                set_characteristic_value(
                    &mut state.services,
                    *ids::HEART_RATE_MEASUREMENT,
                    value.clone(),
                );
                state
                    .notifications_enabled
                    .get(&*ids::HEART_RATE_MEASUREMENT)
                    .copied()
                    .unwrap_or(false)
            }
            Err(err) => return Err(Error::new(ErrorKind::Internal, err.to_string())),
        };
        if notify {
            self.backend
                .notify_characteristic(*ids::HEART_RATE_MEASUREMENT, value)
                .await?;
        }
        Ok(())
    }

    pub async fn update_battery_level(&self, percent: u32) -> Result<(), Error> {
        let value = codec::encode_u8(percent);
        let notify = match self.state.lock() {
            Ok(mut state) => {
                state.battery_level = percent;
                set_characteristic_value(&mut state.services, *ids::BATTERY_LEVEL, value.clone());
                state
                    .notifications_enabled
                    .get(&*ids::BATTERY_LEVEL)
                    .copied()
                    .unwrap_or(false)
            }
            Err(err) => return Err(Error::new(ErrorKind::Internal, err.to_string())),
        };
        if notify {
            self.backend
                .notify_characteristic(*ids::BATTERY_LEVEL, value)
                .await?;
        }
        Ok(())
    }

    pub fn is_advertising(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.advertising)
            .unwrap_or(false)
    }

    pub fn connection(&self) -> Option<PeripheralConnection> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.connection.clone())
    }

    /// Per-service outcome of the last catalog registration.
    pub fn registration_report(&self) -> Vec<(Uuid, bool)> {
        self.state
            .lock()
            .map(|state| state.registration.clone())
            .unwrap_or_default()
    }

    async fn handle_server_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::AdvertiseResult { result } => self.on_advertise_result(result).await,
            ServerEvent::ConnectionStateChange {
                device,
                status,
                new_state,
            } => self.on_connection_state(device, status, new_state).await,
            ServerEvent::ReadRequest {
                device,
                characteristic,
                responder,
                ..
            } => self.on_read_request(device, characteristic, responder),
            ServerEvent::WriteRequest {
                device,
                service,
                characteristic,
                value,
                offset,
                responder,
                ..
            } => {
                self.on_write_request(device, service, characteristic, value, offset, responder)
                    .await
            }
            ServerEvent::DescriptorWriteRequest {
                device,
                characteristic,
                descriptor,
                value,
                responder,
            } => self.on_descriptor_write(device, characteristic, descriptor, value, responder),
            ServerEvent::ExecuteWrite {
                device, responder, ..
            } => {
                // Writes are applied immediately on receipt, which makes
                // execute-write a formality.
                log::debug!("Execute write from {}", device.address);
                let _ = responder.send(GattResponse::empty_success());
            }
        }
    }

    async fn on_advertise_result(&self, result: Result<(), i32>) {
        match result {
            Ok(()) => {
                log::info!("Advertising started");
                bridge::emit(&self.events, BridgeEventKind::AdvertisingStarted).await;
            }
            Err(code) => {
                let reason = AdvertiseFailure::from_code(code);
                log::error!("Failed to start advertising: {} ({})", reason, code);
                if let Ok(mut state) = self.state.lock() {
                    state.advertising = false;
                }
                bridge::emit(&self.events, BridgeEventKind::AdvertisingFailed { reason }).await;
            }
        }
    }

    async fn on_connection_state(&self, device: RemoteDevice, status: i32, new_state: i32) {
        if is_connected_transition(status, new_state) {
            log::info!(
                "Device connected: {} ({})",
                device.address,
                device.name.as_deref().unwrap_or("unknown")
            );
            let connection = PeripheralConnection {
                address: device.address.clone(),
                name: device.name.clone(),
                bond_state: device.bond_state,
                connected_at_ms: bridge::now_millis(),
            };
            let services = match self.state.lock() {
                Ok(mut state) => {
                    state.connection = Some(connection);
                    state.services.clone()
                }
                Err(err) => {
                    log::error!("Failed to record peripheral connection: {}", err);
                    return;
                }
            };
            bridge::emit(
                &self.events,
                BridgeEventKind::DeviceConnected {
                    address: device.address,
                    name: device.name,
                    bond_state: device.bond_state,
                    device_class: device.device_class,
                    device_class_label: device.device_class.map(device_class_label),
                    services,
                },
            )
            .await;
        } else {
            // Any non-connected state clears the slot, but only when it is
            // the tracked device reporting.
            let cleared = match self.state.lock() {
                Ok(mut state) => {
                    let matches = state
                        .connection
                        .as_ref()
                        .map(|connection| connection.address == device.address)
                        .unwrap_or(false);
                    if matches {
                        state.connection = None;
                    }
                    matches
                }
                Err(_) => false,
            };
            if cleared {
                log::info!("Device disconnected: {} (state {})", device.address, new_state);
                bridge::emit(
                    &self.events,
                    BridgeEventKind::DeviceDisconnected {
                        address: device.address,
                    },
                )
                .await;
            }
        }
    }

    fn on_read_request(
        &self,
        device: RemoteDevice,
        characteristic: Uuid,
        responder: oneshot::Sender<GattResponse>,
    ) {
        let value = match self.state.lock() {
            Ok(mut state) => {
                if characteristic == *ids::HEART_RATE_MEASUREMENT {
                    let value = codec::encode_heart_rate(state.heart_rate);
                    set_characteristic_value(&mut state.services, characteristic, value.clone());
                    Some(value)
                } else if characteristic == *ids::BATTERY_LEVEL {
                    let value = codec::encode_u8(state.battery_level);
                    set_characteristic_value(&mut state.services, characteristic, value.clone());
                    Some(value)
                } else if characteristic == *ids::DEVICE_NAME {
                    Some(state.config.device_name.as_bytes().to_vec())
                } else {
                    None
                }
            }
            Err(err) => {
                log::error!("Failed to serve read request: {}", err);
                return;
            }
        };
        match value {
            Some(value) => {
                if responder.send(GattResponse::success(value)).is_err() {
                    log::error!("Error sending read response for {}", characteristic);
                }
            }
            None => {
                // Characteristics outside the fixed responder set get no
                // response; the remote observes a protocol timeout. Known
                // gap, kept deliberately.
                log::warn!(
                    "Unanswered read for {} from {}",
                    characteristic,
                    device.address
                );
                drop(responder);
            }
        }
    }

    async fn on_write_request(
        &self,
        device: RemoteDevice,
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
        offset: usize,
        responder: Option<oneshot::Sender<GattResponse>>,
    ) {
        log::debug!(
            "Write of {} bytes to {} from {}",
            value.len(),
            characteristic,
            device.address
        );
        let data = CharacteristicData::new(
            device.address,
            device.name,
            service,
            characteristic,
            value.clone(),
        );
        bridge::emit(&self.events, BridgeEventKind::DataReceived(data)).await;

        // Echo the received bytes back, but only when a response was asked
        // for.
        if let Some(responder) = responder {
            let response = GattResponse {
                status: crate::platform::ResponseStatus::Success,
                offset,
                value,
            };
            if responder.send(response).is_err() {
                log::error!("Error sending write response for {}", characteristic);
            }
        }
    }

    fn on_descriptor_write(
        &self,
        device: RemoteDevice,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
        responder: Option<oneshot::Sender<GattResponse>>,
    ) {
        if descriptor != *ids::CLIENT_CONFIG {
            log::warn!(
                "Unanswered descriptor write for {} from {}",
                descriptor,
                device.address
            );
            return;
        }
        // Bookkeeping happens whether or not a response was required.
        let enabled = value.first().map(|first| *first != 0).unwrap_or(false);
        if let Ok(mut state) = self.state.lock() {
            state.notifications_enabled.insert(characteristic, enabled);
        }
        if let Some(responder) = responder {
            let _ = responder.send(GattResponse::empty_success());
        }
        if enabled {
            log::debug!(
                "Notifications enabled for {} by {}",
                characteristic,
                device.address
            );
        }
    }
}

fn set_characteristic_value(services: &mut [Service], characteristic: Uuid, value: Vec<u8>) {
    for service in services.iter_mut() {
        for candidate in service.characteristics.iter_mut() {
            if candidate.uuid == characteristic {
                candidate.value = Some(value);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::STATE_DISCONNECTED;

    #[test]
    fn connected_sentinel_accepts_primary_and_alias() {
        assert!(is_connected_transition(GATT_SUCCESS, STATE_CONNECTED));
        assert!(is_connected_transition(GATT_SUCCESS, STATE_CONNECTED_ALIAS));
        // A failed status with the connected state still counts; some stacks
        // report the profile state without a success code.
        assert!(is_connected_transition(133, STATE_CONNECTED));
        assert!(!is_connected_transition(GATT_SUCCESS, STATE_DISCONNECTED));
        assert!(!is_connected_transition(GATT_SUCCESS, 1));
    }

    #[test]
    fn advertise_failure_codes_map_to_tags() {
        assert_eq!(AdvertiseFailure::from_code(1), AdvertiseFailure::DataTooLarge);
        assert_eq!(
            AdvertiseFailure::from_code(2),
            AdvertiseFailure::TooManyAdvertisers
        );
        assert_eq!(
            AdvertiseFailure::from_code(3),
            AdvertiseFailure::AlreadyStarted
        );
        assert_eq!(
            AdvertiseFailure::from_code(4),
            AdvertiseFailure::InternalError
        );
        assert_eq!(AdvertiseFailure::from_code(5), AdvertiseFailure::Unsupported);
        assert_eq!(AdvertiseFailure::from_code(42), AdvertiseFailure::Unknown(42));
        assert_eq!(AdvertiseFailure::Unknown(42).to_string(), "unknown:42");
    }

    #[test]
    fn device_class_table_follows_the_standard() {
        assert_eq!(device_class_label(0x0200), "Phone");
        assert_eq!(device_class_label(0x0400), "Audio/Video");
        assert_eq!(device_class_label(0x0900), "Health");
        assert_eq!(device_class_label(0x0700), "Wearable");
        assert!(device_class_label(0x1F00).starts_with("Unknown class"));
    }

    #[test]
    fn default_config_advertises_the_three_standard_services() {
        let config = AdvertiseConfig::default();
        assert_eq!(config.device_name, catalog::DEFAULT_DEVICE_NAME);
        assert_eq!(config.service_uuids.len(), MAX_ADVERTISED_SERVICES);
    }
}
