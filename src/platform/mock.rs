//! In-memory backends for tests and the demo binary.
//!
//! The mocks record every outbound call so tests can assert what the
//! sessions asked of the platform; inbound callbacks are injected by the
//! test through the session's event channel.

use super::{
    AdvertiseRequest, CentralBackend, LinkHandle, PeripheralBackend, RemoteDevice,
};
use crate::error::{Error, ErrorKind};
use crate::gatt::service::Service;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
struct PeripheralState {
    server_open: bool,
    services: Vec<Service>,
    advertise_request: Option<AdvertiseRequest>,
    notifications: Vec<(Uuid, Vec<u8>)>,
}

#[derive(Debug, Default)]
pub struct MockPeripheralBackend {
    missing_permissions: Vec<String>,
    unpowered: AtomicBool,
    unsupported: AtomicBool,
    reject_service: Mutex<Option<Uuid>>,
    advertising: AtomicBool,
    state: Mutex<PeripheralState>,
}

impl MockPeripheralBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_missing_permissions(permissions: &[&str]) -> Self {
        MockPeripheralBackend {
            missing_permissions: permissions.iter().map(|p| p.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn set_powered(&self, powered: bool) {
        self.unpowered.store(!powered, Ordering::SeqCst);
    }

    pub fn set_advertising_supported(&self, supported: bool) {
        self.unsupported.store(!supported, Ordering::SeqCst);
    }

    /// Makes `add_service` reject this one service, leaving its siblings
    /// unaffected.
    pub fn reject_service(&self, uuid: Uuid) {
        if let Ok(mut reject) = self.reject_service.lock() {
            *reject = Some(uuid);
        }
    }

    pub fn registered_services(&self) -> Vec<Service> {
        self.state
            .lock()
            .map(|state| state.services.clone())
            .unwrap_or_default()
    }

    pub fn advertise_request(&self) -> Option<AdvertiseRequest> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.advertise_request.clone())
    }

    pub fn notifications(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.state
            .lock()
            .map(|state| state.notifications.clone())
            .unwrap_or_default()
    }

    pub fn server_open(&self) -> bool {
        self.state.lock().map(|state| state.server_open).unwrap_or(false)
    }
}

#[async_trait]
impl PeripheralBackend for MockPeripheralBackend {
    fn missing_permissions(&self) -> Vec<String> {
        self.missing_permissions.clone()
    }

    async fn is_powered(&self) -> Result<bool, Error> {
        Ok(!self.unpowered.load(Ordering::SeqCst))
    }

    fn advertising_supported(&self) -> bool {
        !self.unsupported.load(Ordering::SeqCst)
    }

    async fn open_gatt_server(&self) -> Result<(), Error> {
        match self.state.lock() {
            Ok(mut state) => {
                state.server_open = true;
                state.services.clear();
                Ok(())
            }
            Err(err) => Err(Error::new(ErrorKind::Internal, err.to_string())),
        }
    }

    async fn close_gatt_server(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.server_open = false;
            state.services.clear();
        }
    }

    async fn add_service(&self, service: &Service) -> Result<(), Error> {
        let rejected = self
            .reject_service
            .lock()
            .map(|reject| *reject == Some(service.uuid))
            .unwrap_or(false);
        if rejected {
            return Err(Error::new(
                ErrorKind::TransportRejected,
                format!("service {} rejected", service.uuid),
            ));
        }
        match self.state.lock() {
            Ok(mut state) => {
                state.services.push(service.clone());
                Ok(())
            }
            Err(err) => Err(Error::new(ErrorKind::Internal, err.to_string())),
        }
    }

    async fn start_advertising(&self, request: &AdvertiseRequest) -> Result<(), Error> {
        if self.advertising.swap(true, Ordering::SeqCst) {
            return Err(Error::new(
                ErrorKind::AlreadyInProgress,
                "advertising already started",
            ));
        }
        if let Ok(mut state) = self.state.lock() {
            state.advertise_request = Some(request.clone());
        }
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), Error> {
        self.advertising.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn notify_characteristic(
        &self,
        characteristic: Uuid,
        value: Vec<u8>,
    ) -> Result<(), Error> {
        match self.state.lock() {
            Ok(mut state) => {
                state.notifications.push((characteristic, value));
                Ok(())
            }
            Err(err) => Err(Error::new(ErrorKind::Internal, err.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedDescriptorWrite {
    pub link: LinkHandle,
    pub service: Uuid,
    pub characteristic: Uuid,
    pub descriptor: Uuid,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRead {
    pub link: LinkHandle,
    pub service: Uuid,
    pub characteristic: Uuid,
}

#[derive(Debug, Default)]
struct CentralState {
    open_links: Vec<LinkHandle>,
    closed_links: Vec<LinkHandle>,
    discover_requests: Vec<LinkHandle>,
    descriptor_writes: Vec<RecordedDescriptorWrite>,
    reads: Vec<RecordedRead>,
}

#[derive(Debug, Default)]
pub struct MockCentralBackend {
    missing_permissions: Vec<String>,
    unpowered: AtomicBool,
    reject_descriptor_writes: AtomicBool,
    devices: Mutex<HashMap<String, RemoteDevice>>,
    next_link_id: AtomicU64,
    state: Mutex<CentralState>,
}

impl MockCentralBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_missing_permissions(permissions: &[&str]) -> Self {
        MockCentralBackend {
            missing_permissions: permissions.iter().map(|p| p.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn set_powered(&self, powered: bool) {
        self.unpowered.store(!powered, Ordering::SeqCst);
    }

    pub fn reject_descriptor_writes(&self, reject: bool) {
        self.reject_descriptor_writes.store(reject, Ordering::SeqCst);
    }

    /// Registers a device the backend can resolve by address.
    pub fn add_device(&self, device: RemoteDevice) {
        if let Ok(mut devices) = self.devices.lock() {
            devices.insert(device.address.clone(), device);
        }
    }

    pub fn open_links(&self) -> Vec<LinkHandle> {
        self.state
            .lock()
            .map(|state| state.open_links.clone())
            .unwrap_or_default()
    }

    pub fn closed_links(&self) -> Vec<LinkHandle> {
        self.state
            .lock()
            .map(|state| state.closed_links.clone())
            .unwrap_or_default()
    }

    pub fn discover_requests(&self) -> Vec<LinkHandle> {
        self.state
            .lock()
            .map(|state| state.discover_requests.clone())
            .unwrap_or_default()
    }

    pub fn descriptor_writes(&self) -> Vec<RecordedDescriptorWrite> {
        self.state
            .lock()
            .map(|state| state.descriptor_writes.clone())
            .unwrap_or_default()
    }

    pub fn reads(&self) -> Vec<RecordedRead> {
        self.state
            .lock()
            .map(|state| state.reads.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CentralBackend for MockCentralBackend {
    fn missing_permissions(&self) -> Vec<String> {
        self.missing_permissions.clone()
    }

    async fn is_powered(&self) -> Result<bool, Error> {
        Ok(!self.unpowered.load(Ordering::SeqCst))
    }

    async fn resolve_device(&self, address: &str) -> Option<RemoteDevice> {
        self.devices
            .lock()
            .ok()
            .and_then(|devices| devices.get(address).cloned())
    }

    async fn connect(&self, address: &str) -> Result<LinkHandle, Error> {
        let link = LinkHandle {
            address: address.to_string(),
            id: self.next_link_id.fetch_add(1, Ordering::SeqCst),
        };
        match self.state.lock() {
            Ok(mut state) => {
                state.open_links.push(link.clone());
                Ok(link)
            }
            Err(err) => Err(Error::new(ErrorKind::Internal, err.to_string())),
        }
    }

    async fn discover_services(&self, link: &LinkHandle) -> Result<(), Error> {
        match self.state.lock() {
            Ok(mut state) => {
                state.discover_requests.push(link.clone());
                Ok(())
            }
            Err(err) => Err(Error::new(ErrorKind::Internal, err.to_string())),
        }
    }

    async fn write_descriptor(
        &self,
        link: &LinkHandle,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
    ) -> Result<(), Error> {
        if self.reject_descriptor_writes.load(Ordering::SeqCst) {
            return Err(Error::new(
                ErrorKind::TransportRejected,
                "descriptor write rejected",
            ));
        }
        match self.state.lock() {
            Ok(mut state) => {
                state.descriptor_writes.push(RecordedDescriptorWrite {
                    link: link.clone(),
                    service,
                    characteristic,
                    descriptor,
                    value,
                });
                Ok(())
            }
            Err(err) => Err(Error::new(ErrorKind::Internal, err.to_string())),
        }
    }

    async fn read_characteristic(
        &self,
        link: &LinkHandle,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), Error> {
        match self.state.lock() {
            Ok(mut state) => {
                state.reads.push(RecordedRead {
                    link: link.clone(),
                    service,
                    characteristic,
                });
                Ok(())
            }
            Err(err) => Err(Error::new(ErrorKind::Internal, err.to_string())),
        }
    }

    async fn close(&self, link: &LinkHandle) {
        if let Ok(mut state) = self.state.lock() {
            state.open_links.retain(|open| open != link);
            state.closed_links.push(link.clone());
        }
    }
}
