//! GATT-client side of the bridge: the registry of outbound connections,
//! discovery classification, and the per-connection poll schedule.

use crate::bridge::{self, BridgeEventKind, CharacteristicData, EventSink};
use crate::error::{Error, ErrorKind};
use crate::gatt::{
    characteristic::Characteristic, ids, properties::CharacteristicProperty, service::Service,
};
use crate::platform::{
    CentralBackend, CentralEvent, LinkHandle, RemoteDevice, GATT_SUCCESS, STATE_CONNECTED,
    STATE_DISCONNECTED,
};
use crate::uuid::ShortUuid;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::Receiver;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub const POLL_INTERVAL: Duration = Duration::from_millis(1000);
pub const POLL_INITIAL_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Connected,
    ServicesDiscovering,
    ServicesReady,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTarget {
    pub service: Uuid,
    pub characteristic: Uuid,
}

/// Immediate result of a connect command; actual success or failure arrives
/// later as a bridge event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectAck {
    Initiated {
        address: String,
        name: Option<String>,
    },
    AlreadyConnected {
        address: String,
        name: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectAck {
    Disconnected,
    /// Disconnecting an unknown address is not a failure.
    WasNotConnected,
}

struct CentralConnection {
    device: RemoteDevice,
    handle: LinkHandle,
    state: LinkState,
    services: Vec<Service>,
    subscribed: Vec<Uuid>,
    poll_set: Vec<PollTarget>,
    poll_task: Option<JoinHandle<()>>,
}

/// How a discovered characteristic gets harvested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Acquisition {
    Subscribe { indicate: bool },
    Poll,
    Skip,
}

/// Push capability wins outright; polling is reserved for readable
/// fitness-equipment characteristics that cannot push.
fn classify(service_uuid: Uuid, characteristic: &Characteristic) -> Acquisition {
    if characteristic.has_property(CharacteristicProperty::Indicate) {
        return Acquisition::Subscribe { indicate: true };
    }
    if characteristic.has_property(CharacteristicProperty::Notify) {
        return Acquisition::Subscribe { indicate: false };
    }
    if characteristic.has_property(CharacteristicProperty::Read)
        && is_fitness_target(service_uuid, characteristic.uuid)
    {
        return Acquisition::Poll;
    }
    Acquisition::Skip
}

fn is_fitness_target(service: Uuid, characteristic: Uuid) -> bool {
    if service.short_id() == Some(0x1826) {
        return true;
    }
    matches!(
        characteristic.short_id(),
        Some(0x2ACD) | Some(0x2AD9) | Some(0x2ADA)
    )
}

/// Human-readable reason for a disconnect status, for the known platform
/// error classes; anything else surfaces the raw code.
pub(crate) fn decode_disconnect_reason(status: i32) -> Option<String> {
    match status {
        GATT_SUCCESS => None,
        133 => Some("link loss (status 133)".to_string()),
        8 => Some("internal stack error".to_string()),
        19 => Some("insufficient authorization".to_string()),
        22 => Some("insufficient encryption".to_string()),
        other => Some(format!("status {}", other)),
    }
}

pub struct CentralRegistry<B: CentralBackend> {
    backend: Arc<B>,
    connections: Arc<Mutex<HashMap<String, CentralConnection>>>,
    events: EventSink,
}

impl<B: CentralBackend> Clone for CentralRegistry<B> {
    fn clone(&self) -> Self {
        CentralRegistry {
            backend: Arc::clone(&self.backend),
            connections: Arc::clone(&self.connections),
            events: self.events.clone(),
        }
    }
}

impl<B: CentralBackend> CentralRegistry<B> {
    /// Creates the registry and spawns its event pump over the backend's
    /// callback channel.
    pub fn spawn(
        backend: Arc<B>,
        central_events: Receiver<CentralEvent>,
        events: EventSink,
    ) -> Self {
        let registry = CentralRegistry {
            backend,
            connections: Arc::new(Mutex::new(HashMap::new())),
            events,
        };
        let pump = registry.clone();
        tokio::spawn(async move {
            pump.run(central_events).await;
        });
        registry
    }

    async fn run(self, mut central_events: Receiver<CentralEvent>) {
        while let Some(event) = central_events.recv().await {
            self.handle_central_event(event).await;
        }
        log::debug!("Central backend event stream closed");
    }

    /// Opens an outbound link. Idempotent: a second connect for a live
    /// address reports the existing connection instead of opening another
    /// link.
    pub async fn connect(&self, address: &str) -> Result<ConnectAck, Error> {
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

        let device = self.backend.resolve_device(address).await.ok_or_else(|| {
            Error::new(ErrorKind::NotFound, format!("Device {} not found", address))
        })?;

        if let Some(existing) = self.existing_ack(address)? {
            log::debug!("Already connected to {}", address);
            return Ok(existing);
        }

        let handle = self.backend.connect(address).await?;
        log::debug!("Connection initiated to {}", address);

        let duplicate = match self.connections.lock() {
            Ok(mut connections) => {
                if let Some(existing) = connections.get(address) {
                    // A racing connect for the same address won; keep its
                    // entry and release the extra link.
                    Some((handle.clone(), existing.device.name.clone()))
                } else {
                    connections.insert(
                        address.to_string(),
                        CentralConnection {
                            device: device.clone(),
                            handle,
                            state: LinkState::Connecting,
                            services: Vec::new(),
                            subscribed: Vec::new(),
                            poll_set: Vec::new(),
                            poll_task: None,
                        },
                    );
                    None
                }
            }
            Err(err) => return Err(Error::new(ErrorKind::Internal, err.to_string())),
        };

        if let Some((extra, name)) = duplicate {
            self.backend.close(&extra).await;
            return Ok(ConnectAck::AlreadyConnected {
                address: address.to_string(),
                name,
            });
        }

        Ok(ConnectAck::Initiated {
            address: address.to_string(),
            name: device.name,
        })
    }

    fn existing_ack(&self, address: &str) -> Result<Option<ConnectAck>, Error> {
        match self.connections.lock() {
            Ok(connections) => Ok(connections.get(address).map(|existing| {
                ConnectAck::AlreadyConnected {
                    address: address.to_string(),
                    name: existing.device.name.clone(),
                }
            })),
            Err(err) => Err(Error::new(ErrorKind::Internal, err.to_string())),
        }
    }

    /// Tears the connection down. Unknown addresses report
    /// [`DisconnectAck::WasNotConnected`] rather than failing.
    pub async fn disconnect(&self, address: &str) -> Result<DisconnectAck, Error> {
        let removed = match self.connections.lock() {
            Ok(mut connections) => connections.remove(address),
            Err(err) => return Err(Error::new(ErrorKind::Internal, err.to_string())),
        };
        match removed {
            Some(mut connection) => {
                if let Some(task) = connection.poll_task.take() {
                    task.abort();
                }
                self.backend.close(&connection.handle).await;
                log::debug!("Disconnected from {}", address);
                Ok(DisconnectAck::Disconnected)
            }
            None => Ok(DisconnectAck::WasNotConnected),
        }
    }

    /// Re-triggers discovery on a live connection.
    pub async fn discover_services(&self, address: &str) -> Result<(), Error> {
        let handle = match self.connections.lock() {
            Ok(connections) => connections
                .get(address)
                .map(|connection| connection.handle.clone()),
            Err(err) => return Err(Error::new(ErrorKind::Internal, err.to_string())),
        };
        let handle = handle.ok_or_else(|| {
            Error::new(
                ErrorKind::NotFound,
                format!("Device {} is not connected", address),
            )
        })?;
        self.backend.discover_services(&handle).await
    }

    pub fn addresses(&self) -> Vec<String> {
        self.connections
            .lock()
            .map(|connections| connections.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn link_state(&self, address: &str) -> Option<LinkState> {
        self.connections
            .lock()
            .ok()
            .and_then(|connections| connections.get(address).map(|connection| connection.state))
    }

    pub fn discovered_services(&self, address: &str) -> Vec<Service> {
        self.connections
            .lock()
            .map(|connections| {
                connections
                    .get(address)
                    .map(|connection| connection.services.clone())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Characteristics successfully subscribed via notify/indicate.
    pub fn subscriptions(&self, address: &str) -> Vec<Uuid> {
        self.connections
            .lock()
            .map(|connections| {
                connections
                    .get(address)
                    .map(|connection| connection.subscribed.clone())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Characteristics selected for periodic reads.
    pub fn poll_targets(&self, address: &str) -> Vec<PollTarget> {
        self.connections
            .lock()
            .map(|connections| {
                connections
                    .get(address)
                    .map(|connection| connection.poll_set.clone())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    async fn handle_central_event(&self, event: CentralEvent) {
        match event {
            CentralEvent::ConnectionStateChange {
                address,
                status,
                new_state,
            } => {
                if new_state == STATE_CONNECTED && status == GATT_SUCCESS {
                    self.on_connected(address).await;
                } else if new_state == STATE_DISCONNECTED {
                    self.on_disconnected(address, status).await;
                }
            }
            CentralEvent::ServicesDiscovered {
                address,
                status,
                services,
            } => {
                if status == GATT_SUCCESS {
                    self.on_services_discovered(address, services).await;
                } else {
                    log::warn!("Service discovery for {} failed: status {}", address, status);
                }
            }
            CentralEvent::CharacteristicRead {
                address,
                service,
                characteristic,
                status,
                value,
            } => {
                if status == GATT_SUCCESS {
                    self.on_data(address, service, characteristic, value, false)
                        .await;
                } else {
                    log::warn!(
                        "Read of {} on {} failed: status {}",
                        characteristic,
                        address,
                        status
                    );
                }
            }
            CentralEvent::CharacteristicChanged {
                address,
                service,
                characteristic,
                value,
            } => {
                self.on_data(address, service, characteristic, value, true)
                    .await;
            }
        }
    }

    async fn on_connected(&self, address: String) {
        let connection = match self.connections.lock() {
            Ok(mut connections) => match connections.get_mut(&address) {
                Some(connection) => {
                    connection.state = LinkState::Connected;
                    Some((connection.device.clone(), connection.handle.clone()))
                }
                None => None,
            },
            Err(_) => None,
        };
        let Some((device, handle)) = connection else {
            log::warn!("Connected callback for unknown address {}", address);
            return;
        };
        log::info!("Connected to {}", address);

        // Data only flows once the topology is known, so discovery starts
        // right away.
        if let Ok(mut connections) = self.connections.lock() {
            if let Some(connection) = connections.get_mut(&address) {
                connection.state = LinkState::ServicesDiscovering;
            }
        }
        if let Err(err) = self.backend.discover_services(&handle).await {
            log::error!("Service discovery request for {} failed: {}", address, err);
        }

        bridge::emit(
            &self.events,
            BridgeEventKind::CentralConnected {
                address,
                name: device.name,
                bond_state: device.bond_state,
            },
        )
        .await;
    }

    async fn on_disconnected(&self, address: String, status: i32) {
        let removed = match self.connections.lock() {
            Ok(mut connections) => connections.remove(&address),
            Err(_) => None,
        };
        let Some(mut connection) = removed else {
            log::debug!("Disconnect callback for unknown address {}", address);
            return;
        };
        if let Some(task) = connection.poll_task.take() {
            task.abort();
        }
        self.backend.close(&connection.handle).await;

        let reason = decode_disconnect_reason(status);
        match &reason {
            Some(reason) => log::warn!("Disconnected from {}: {}", address, reason),
            None => log::info!("Disconnected from {}", address),
        }
        bridge::emit(
            &self.events,
            BridgeEventKind::CentralDisconnected {
                address,
                status,
                reason,
            },
        )
        .await;
    }

    async fn on_services_discovered(&self, address: String, services: Vec<Service>) {
        let handle = match self.connections.lock() {
            Ok(connections) => connections
                .get(&address)
                .map(|connection| connection.handle.clone()),
            Err(_) => None,
        };
        let Some(handle) = handle else {
            log::debug!("Discovery result for unknown address {}", address);
            return;
        };

        let mut subscriptions = Vec::new();
        let mut poll_set = Vec::new();
        for service in &services {
            for characteristic in &service.characteristics {
                match classify(service.uuid, characteristic) {
                    Acquisition::Subscribe { indicate } => {
                        subscriptions.push((service.uuid, characteristic.uuid, indicate));
                    }
                    Acquisition::Poll => {
                        poll_set.push(PollTarget {
                            service: service.uuid,
                            characteristic: characteristic.uuid,
                        });
                        log::debug!(
                            "Added {} to the poll set for {}",
                            characteristic.uuid,
                            address
                        );
                    }
                    Acquisition::Skip => {}
                }
            }
        }

        // Enable push on every subscribable characteristic; a failing
        // descriptor write must not block its siblings.
        let attempts = subscriptions.into_iter().map(|(service, uuid, indicate)| {
            let backend = Arc::clone(&self.backend);
            let handle = handle.clone();
            async move {
                let enable = if indicate {
                    ids::ENABLE_INDICATION_VALUE
                } else {
                    ids::ENABLE_NOTIFICATION_VALUE
                };
                match backend
                    .write_descriptor(&handle, service, uuid, *ids::CLIENT_CONFIG, enable.to_vec())
                    .await
                {
                    Ok(()) => {
                        log::debug!(
                            "Subscribed to {} ({})",
                            uuid,
                            if indicate { "indicate" } else { "notify" }
                        );
                        Some(uuid)
                    }
                    Err(err) => {
                        log::warn!("Subscription to {} failed: {}", uuid, err);
                        None
                    }
                }
            }
        });
        let subscribed: Vec<Uuid> = join_all(attempts).await.into_iter().flatten().collect();
        let subscribed_count = subscribed.len();

        let stored = match self.connections.lock() {
            Ok(mut connections) => match connections.get_mut(&address) {
                // The entry may have been torn down or replaced while the
                // subscriptions were in flight.
                Some(connection) if connection.handle == handle => {
                    connection.services = services.clone();
                    connection.subscribed = subscribed;
                    connection.poll_set = poll_set.clone();
                    connection.state = LinkState::ServicesReady;
                    let task = if poll_set.is_empty() {
                        None
                    } else {
                        Some(self.spawn_poll_schedule(
                            address.clone(),
                            handle.clone(),
                            poll_set.clone(),
                        ))
                    };
                    if let Some(previous) = match task {
                        Some(task) => connection.poll_task.replace(task),
                        None => connection.poll_task.take(),
                    } {
                        previous.abort();
                    }
                    true
                }
                _ => false,
            },
            Err(_) => false,
        };
        if !stored {
            log::debug!("Connection to {} vanished during discovery", address);
            return;
        }

        log::info!(
            "Discovered {} services on {}: {} subscribed, {} polled",
            services.len(),
            address,
            subscribed_count,
            poll_set.len()
        );
        bridge::emit(
            &self.events,
            BridgeEventKind::ServicesDiscovered {
                address,
                services,
                subscribed_count,
                poll_count: poll_set.len(),
            },
        )
        .await;
    }

    /// One repeating task per connection: after an initial delay, read the
    /// characteristic at the round-robin cursor once per interval. A tick
    /// reschedules only after completing its own work; read results arrive
    /// through the read callback like any other data.
    fn spawn_poll_schedule(
        &self,
        address: String,
        handle: LinkHandle,
        targets: Vec<PollTarget>,
    ) -> JoinHandle<()> {
        let backend = Arc::clone(&self.backend);
        let connections = Arc::clone(&self.connections);
        tokio::spawn(async move {
            tokio::time::sleep(POLL_INITIAL_DELAY).await;
            let mut cursor = 0usize;
            loop {
                // The address may have been disconnected and even
                // reconnected since the last tick; only the exact handle
                // this schedule was created for is valid.
                let live = match connections.lock() {
                    Ok(connections) => connections
                        .get(&address)
                        .map(|connection| connection.handle == handle)
                        .unwrap_or(false),
                    Err(_) => false,
                };
                if !live {
                    break;
                }
                let target = &targets[cursor];
                if let Err(err) = backend
                    .read_characteristic(&handle, target.service, target.characteristic)
                    .await
                {
                    log::warn!("Poll read of {} failed: {}", target.characteristic, err);
                }
                cursor = (cursor + 1) % targets.len();
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            log::debug!("Poll schedule for {} stopped", address);
        })
    }

    /// Pushed and polled data converge here; the consuming layer must not
    /// have to care which path delivered the bytes.
    async fn on_data(
        &self,
        address: String,
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
        pushed: bool,
    ) {
        let device_name = match self.connections.lock() {
            Ok(connections) => connections
                .get(&address)
                .and_then(|connection| connection.device.name.clone()),
            Err(_) => None,
        };
        let data = CharacteristicData::new(address, device_name, service, characteristic, value);
        let kind = if pushed {
            BridgeEventKind::CharacteristicChanged(data)
        } else {
            BridgeEventKind::CharacteristicRead(data)
        };
        bridge::emit(&self.events, kind).await;
    }
}
