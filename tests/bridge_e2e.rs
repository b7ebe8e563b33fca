//! End-to-end scenarios driven through the mock backends: the application
//! issues commands on the bridge facade, the test plays the platform stack
//! by injecting callback events, and the bridge channel is observed.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use ble_gatt_bridge::gatt::characteristic::Characteristic;
use ble_gatt_bridge::gatt::ids;
use ble_gatt_bridge::gatt::properties::{AttributePermission, CharacteristicProperty};
use ble_gatt_bridge::gatt::service::Service;
use ble_gatt_bridge::platform::mock::{MockCentralBackend, MockPeripheralBackend};
use ble_gatt_bridge::platform::{
    BondState, CentralEvent, GattResponse, RemoteDevice, ResponseStatus, ServerEvent,
    GATT_SUCCESS, STATE_CONNECTED, STATE_DISCONNECTED,
};
use ble_gatt_bridge::{
    codec, AdvertiseConfig, AdvertiseFailure, BleBridge, BridgeEvent, BridgeEventKind,
    CentralRegistry, ConnectAck, PeripheralSession,
};

const TREADMILL: &str = "AA:BB:CC:DD:EE:FF";

struct Harness {
    bridge: BleBridge<MockPeripheralBackend, MockCentralBackend>,
    peripheral_backend: Arc<MockPeripheralBackend>,
    central_backend: Arc<MockCentralBackend>,
    server_tx: mpsc::Sender<ServerEvent>,
    central_tx: mpsc::Sender<CentralEvent>,
    events: mpsc::Receiver<BridgeEvent>,
}

fn harness() -> Harness {
    let (server_tx, server_rx) = mpsc::channel(64);
    let (central_tx, central_rx) = mpsc::channel(64);
    let (bridge_tx, events) = mpsc::channel(256);

    let peripheral_backend = Arc::new(MockPeripheralBackend::new());
    let central_backend = Arc::new(MockCentralBackend::new());
    central_backend.add_device(RemoteDevice {
        address: TREADMILL.to_string(),
        name: Some("Treadmill X1".to_string()),
        bond_state: BondState::None,
        device_class: Some(0x0900),
    });

    let bridge = BleBridge::new(
        PeripheralSession::spawn(
            Arc::clone(&peripheral_backend),
            server_rx,
            bridge_tx.clone(),
        ),
        CentralRegistry::spawn(Arc::clone(&central_backend), central_rx, bridge_tx),
    );

    Harness {
        bridge,
        peripheral_backend,
        central_backend,
        server_tx,
        central_tx,
        events,
    }
}

async fn next_event(events: &mut mpsc::Receiver<BridgeEvent>) -> BridgeEventKind {
    let event = timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for a bridge event")
        .expect("bridge channel closed");
    assert!(event.timestamp_ms > 0);
    event.kind
}

async fn assert_quiet(events: &mut mpsc::Receiver<BridgeEvent>) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        events.try_recv().is_err(),
        "expected no further bridge events"
    );
}

fn remote_central() -> RemoteDevice {
    RemoteDevice {
        address: "11:22:33:44:55:66".to_string(),
        name: Some("Trainer App".to_string()),
        bond_state: BondState::Bonded,
        device_class: Some(0x0900),
    }
}

#[tokio::test]
async fn advertising_and_peripheral_connection_flow() {
    let mut harness = harness();

    harness
        .bridge
        .start_advertising(AdvertiseConfig::default())
        .await
        .expect("advertising request rejected");

    let request = harness
        .peripheral_backend
        .advertise_request()
        .expect("no advertise request reached the backend");
    assert_eq!(request.local_name, "Fitness Watch");
    assert_eq!(request.service_uuids.len(), 3);
    assert!(!request.include_tx_power);
    assert!(request.connectable);
    assert_eq!(request.timeout_ms, None);

    // All five catalog services were registered despite advertising only
    // three UUIDs.
    assert_eq!(harness.peripheral_backend.registered_services().len(), 5);

    harness
        .server_tx
        .send(ServerEvent::AdvertiseResult { result: Ok(()) })
        .await
        .unwrap();
    assert!(matches!(
        next_event(&mut harness.events).await,
        BridgeEventKind::AdvertisingStarted
    ));
    assert_quiet(&mut harness.events).await;

    harness
        .server_tx
        .send(ServerEvent::ConnectionStateChange {
            device: remote_central(),
            status: GATT_SUCCESS,
            new_state: STATE_CONNECTED,
        })
        .await
        .unwrap();
    match next_event(&mut harness.events).await {
        BridgeEventKind::DeviceConnected {
            address,
            name,
            bond_state,
            device_class_label,
            services,
            ..
        } => {
            assert_eq!(address, "11:22:33:44:55:66");
            assert_eq!(name.as_deref(), Some("Trainer App"));
            assert_eq!(bond_state, BondState::Bonded);
            assert_eq!(device_class_label.as_deref(), Some("Health"));
            assert_eq!(services.len(), 5);
        }
        other => panic!("expected DeviceConnected, got {:?}", other),
    }
    assert_quiet(&mut harness.events).await;
    assert!(harness.bridge.peripheral().connection().is_some());

    harness
        .server_tx
        .send(ServerEvent::ConnectionStateChange {
            device: remote_central(),
            status: GATT_SUCCESS,
            new_state: STATE_DISCONNECTED,
        })
        .await
        .unwrap();
    assert!(matches!(
        next_event(&mut harness.events).await,
        BridgeEventKind::DeviceDisconnected { .. }
    ));
    assert!(harness.bridge.peripheral().connection().is_none());
}

#[tokio::test]
async fn advertising_failure_is_tagged() {
    let mut harness = harness();

    harness
        .bridge
        .start_advertising(AdvertiseConfig::default())
        .await
        .unwrap();
    harness
        .server_tx
        .send(ServerEvent::AdvertiseResult { result: Err(2) })
        .await
        .unwrap();

    match next_event(&mut harness.events).await {
        BridgeEventKind::AdvertisingFailed { reason } => {
            assert_eq!(reason, AdvertiseFailure::TooManyAdvertisers);
        }
        other => panic!("expected AdvertisingFailed, got {:?}", other),
    }
    assert!(!harness.bridge.peripheral().is_advertising());
}

#[tokio::test]
async fn start_fails_fast_without_permissions_or_radio() {
    let (_server_tx, server_rx) = mpsc::channel(8);
    let (bridge_tx, _events) = mpsc::channel(8);
    let backend = Arc::new(MockPeripheralBackend::with_missing_permissions(&[
        "BLUETOOTH_ADVERTISE",
        "BLUETOOTH_CONNECT",
    ]));
    let session = PeripheralSession::spawn(backend, server_rx, bridge_tx);
    let error = session.start(AdvertiseConfig::default()).await.unwrap_err();
    assert_eq!(
        error.kind(),
        ble_gatt_bridge::error::ErrorKind::PermissionDenied
    );
    assert!(error.description().contains("BLUETOOTH_ADVERTISE"));

    let (_server_tx, server_rx) = mpsc::channel(8);
    let (bridge_tx, _events) = mpsc::channel(8);
    let backend = Arc::new(MockPeripheralBackend::new());
    backend.set_powered(false);
    let session = PeripheralSession::spawn(backend, server_rx, bridge_tx);
    let error = session.start(AdvertiseConfig::default()).await.unwrap_err();
    assert_eq!(
        error.kind(),
        ble_gatt_bridge::error::ErrorKind::HardwareUnavailable
    );

    let (_server_tx, server_rx) = mpsc::channel(8);
    let (bridge_tx, _events) = mpsc::channel(8);
    let backend = Arc::new(MockPeripheralBackend::new());
    backend.set_advertising_supported(false);
    let session = PeripheralSession::spawn(backend, server_rx, bridge_tx);
    let error = session.start(AdvertiseConfig::default()).await.unwrap_err();
    assert_eq!(
        error.kind(),
        ble_gatt_bridge::error::ErrorKind::HardwareUnavailable
    );
}

#[tokio::test]
async fn one_rejected_service_does_not_block_the_rest() {
    let mut harness = harness();
    harness
        .peripheral_backend
        .reject_service(*ids::BATTERY_SERVICE);

    harness
        .bridge
        .start_advertising(AdvertiseConfig::default())
        .await
        .unwrap();

    assert_eq!(harness.peripheral_backend.registered_services().len(), 4);
    let report = harness.bridge.peripheral().registration_report();
    assert_eq!(report.len(), 5);
    let failed: Vec<_> = report.iter().filter(|(_, ok)| !ok).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, *ids::BATTERY_SERVICE);
    assert_quiet(&mut harness.events).await;
}

#[tokio::test]
async fn reads_dispatch_to_the_fixed_responders() {
    let harness = harness();
    harness
        .bridge
        .start_advertising(AdvertiseConfig::default())
        .await
        .unwrap();

    let (reply_tx, reply_rx) = oneshot::channel();
    harness
        .server_tx
        .send(ServerEvent::ReadRequest {
            device: remote_central(),
            service: *ids::HEART_RATE_SERVICE,
            characteristic: *ids::HEART_RATE_MEASUREMENT,
            offset: 0,
            responder: reply_tx,
        })
        .await
        .unwrap();
    let response = reply_rx.await.expect("read went unanswered");
    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.value, codec::encode_heart_rate(75));

    harness.bridge.update_battery_level(60).await.unwrap();
    let (reply_tx, reply_rx) = oneshot::channel();
    harness
        .server_tx
        .send(ServerEvent::ReadRequest {
            device: remote_central(),
            service: *ids::BATTERY_SERVICE,
            characteristic: *ids::BATTERY_LEVEL,
            offset: 0,
            responder: reply_tx,
        })
        .await
        .unwrap();
    assert_eq!(reply_rx.await.unwrap().value, vec![60]);

    let (reply_tx, reply_rx) = oneshot::channel();
    harness
        .server_tx
        .send(ServerEvent::ReadRequest {
            device: remote_central(),
            service: *ids::DEVICE_INFORMATION_SERVICE,
            characteristic: *ids::DEVICE_NAME,
            offset: 0,
            responder: reply_tx,
        })
        .await
        .unwrap();
    assert_eq!(reply_rx.await.unwrap().value, b"Fitness Watch".to_vec());

    // Characteristics outside the responder set are deliberately left
    // unanswered; the responder is dropped and the remote would time out.
    let (reply_tx, reply_rx) = oneshot::channel();
    harness
        .server_tx
        .send(ServerEvent::ReadRequest {
            device: remote_central(),
            service: *ids::FITNESS_MACHINE_SERVICE,
            characteristic: *ids::FITNESS_FEATURE,
            offset: 0,
            responder: reply_tx,
        })
        .await
        .unwrap();
    assert!(reply_rx.await.is_err());
}

#[tokio::test]
async fn writes_surface_analysis_and_echo_when_asked() {
    let mut harness = harness();
    harness
        .bridge
        .start_advertising(AdvertiseConfig::default())
        .await
        .unwrap();

    let (reply_tx, reply_rx) = oneshot::channel();
    harness
        .server_tx
        .send(ServerEvent::WriteRequest {
            device: remote_central(),
            service: *ids::VENDOR_DATA_SERVICE,
            characteristic: *ids::TREADMILL_DATA,
            value: vec![0x01, 0x02],
            offset: 0,
            prepared: false,
            responder: Some(reply_tx),
        })
        .await
        .unwrap();

    match next_event(&mut harness.events).await {
        BridgeEventKind::DataReceived(data) => {
            assert_eq!(data.address, "11:22:33:44:55:66");
            assert_eq!(data.data, vec![0x01, 0x02]);
            assert_eq!(data.hex, "01 02");
            assert_eq!(data.size, 2);
            assert_eq!(data.text, "binary data (2 bytes)");
            match data.analysis.numeric {
                Some(codec::NumericView::Word {
                    little_endian,
                    big_endian,
                }) => {
                    assert_eq!(little_endian, 513);
                    assert_eq!(big_endian, 258);
                }
                other => panic!("unexpected numeric view: {:?}", other),
            }
            assert_eq!(
                data.analysis.hint,
                Some(codec::PayloadHint::TreadmillCommand(0x01))
            );
        }
        other => panic!("expected DataReceived, got {:?}", other),
    }

    let response = reply_rx.await.expect("write went unanswered");
    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.value, vec![0x01, 0x02]);

    // Write-without-response still surfaces the data event.
    harness
        .server_tx
        .send(ServerEvent::WriteRequest {
            device: remote_central(),
            service: *ids::FITNESS_MACHINE_SERVICE,
            characteristic: *ids::TREADMILL_DATA_STANDARD,
            value: b"Hi".to_vec(),
            offset: 0,
            prepared: false,
            responder: None,
        })
        .await
        .unwrap();
    match next_event(&mut harness.events).await {
        BridgeEventKind::DataReceived(data) => {
            assert_eq!(data.text, "Hi");
            assert_eq!(data.analysis.text.as_deref(), Some("Hi"));
        }
        other => panic!("expected DataReceived, got {:?}", other),
    }
}

#[tokio::test]
async fn descriptor_and_execute_writes_are_acknowledged() {
    let harness = harness();
    harness
        .bridge
        .start_advertising(AdvertiseConfig::default())
        .await
        .unwrap();

    let (reply_tx, reply_rx) = oneshot::channel();
    harness
        .server_tx
        .send(ServerEvent::DescriptorWriteRequest {
            device: remote_central(),
            characteristic: *ids::HEART_RATE_MEASUREMENT,
            descriptor: *ids::CLIENT_CONFIG,
            value: ids::ENABLE_NOTIFICATION_VALUE.to_vec(),
            responder: Some(reply_tx),
        })
        .await
        .unwrap();
    let response = reply_rx.await.expect("descriptor write unanswered");
    assert_eq!(response.status, ResponseStatus::Success);
    assert!(response.value.is_empty());

    // With notifications enabled, a heart-rate update pushes the new value.
    harness.bridge.update_heart_rate(90).await.unwrap();
    let notifications = harness.peripheral_backend.notifications();
    assert_eq!(
        notifications,
        vec![(*ids::HEART_RATE_MEASUREMENT, codec::encode_heart_rate(90))]
    );

    let (reply_tx, reply_rx) = oneshot::channel();
    harness
        .server_tx
        .send(ServerEvent::ExecuteWrite {
            device: remote_central(),
            execute: true,
            responder: reply_tx,
        })
        .await
        .unwrap();
    let response: GattResponse = reply_rx.await.expect("execute write unanswered");
    assert_eq!(response.status, ResponseStatus::Success);
    assert!(response.value.is_empty());
}

#[tokio::test]
async fn stop_advertising_is_idempotent() {
    let harness = harness();
    harness.bridge.stop_advertising().await.unwrap();
    harness
        .bridge
        .start_advertising(AdvertiseConfig::default())
        .await
        .unwrap();
    harness.bridge.stop_advertising().await.unwrap();
    harness.bridge.stop_advertising().await.unwrap();
    assert!(!harness.bridge.peripheral().is_advertising());
    assert!(!harness.peripheral_backend.server_open());
}

#[tokio::test]
async fn central_flow_subscribes_polls_and_converges_data() {
    let mut harness = harness();

    let ack = harness.bridge.connect_to_device(TREADMILL).await.unwrap();
    assert_eq!(
        ack,
        ConnectAck::Initiated {
            address: TREADMILL.to_string(),
            name: Some("Treadmill X1".to_string()),
        }
    );

    harness
        .central_tx
        .send(CentralEvent::ConnectionStateChange {
            address: TREADMILL.to_string(),
            status: GATT_SUCCESS,
            new_state: STATE_CONNECTED,
        })
        .await
        .unwrap();
    match next_event(&mut harness.events).await {
        BridgeEventKind::CentralConnected { address, name, .. } => {
            assert_eq!(address, TREADMILL);
            assert_eq!(name.as_deref(), Some("Treadmill X1"));
        }
        other => panic!("expected CentralConnected, got {:?}", other),
    }
    // Connecting immediately requested discovery.
    assert_eq!(harness.central_backend.discover_requests().len(), 1);

    let discovered = vec![Service {
        uuid: *ids::FITNESS_MACHINE_SERVICE,
        primary: true,
        characteristics: vec![
            Characteristic {
                uuid: *ids::FITNESS_CONTROL_POINT,
                properties: vec![
                    CharacteristicProperty::Write,
                    CharacteristicProperty::Indicate,
                ],
                permissions: vec![AttributePermission::Writeable],
                value: None,
                descriptors: Vec::new(),
            },
            Characteristic {
                uuid: *ids::TREADMILL_DATA_STANDARD,
                properties: vec![
                    CharacteristicProperty::Write,
                    CharacteristicProperty::Notify,
                ],
                permissions: vec![AttributePermission::Writeable],
                value: None,
                descriptors: Vec::new(),
            },
            Characteristic {
                uuid: *ids::FITNESS_FEATURE,
                properties: vec![CharacteristicProperty::Read],
                permissions: vec![AttributePermission::Readable],
                value: None,
                descriptors: Vec::new(),
            },
        ],
    }];
    harness
        .central_tx
        .send(CentralEvent::ServicesDiscovered {
            address: TREADMILL.to_string(),
            status: GATT_SUCCESS,
            services: discovered,
        })
        .await
        .unwrap();

    match next_event(&mut harness.events).await {
        BridgeEventKind::ServicesDiscovered {
            address,
            services,
            subscribed_count,
            poll_count,
        } => {
            assert_eq!(address, TREADMILL);
            assert_eq!(services.len(), 1);
            // Push-capable characteristics subscribe, the read-only fitness
            // characteristic polls, and the sets are disjoint.
            assert_eq!(subscribed_count, 2);
            assert_eq!(poll_count, 1);
        }
        other => panic!("expected ServicesDiscovered, got {:?}", other),
    }

    // The subscribed set and the poll set are disjoint.
    let subscriptions = harness.bridge.central().subscriptions(TREADMILL);
    let poll_targets = harness.bridge.central().poll_targets(TREADMILL);
    assert_eq!(subscriptions.len(), 2);
    assert_eq!(poll_targets.len(), 1);
    assert_eq!(poll_targets[0].characteristic, *ids::FITNESS_FEATURE);
    assert!(subscriptions
        .iter()
        .all(|subscribed| poll_targets.iter().all(|t| t.characteristic != *subscribed)));
    assert_eq!(
        harness.bridge.central().discovered_services(TREADMILL).len(),
        1
    );

    let writes = harness.central_backend.descriptor_writes();
    assert_eq!(writes.len(), 2);
    for write in &writes {
        assert_eq!(write.descriptor, *ids::CLIENT_CONFIG);
        if write.characteristic == *ids::FITNESS_CONTROL_POINT {
            assert_eq!(write.value, ids::ENABLE_INDICATION_VALUE.to_vec());
        } else {
            assert_eq!(write.characteristic, *ids::TREADMILL_DATA_STANDARD);
            assert_eq!(write.value, ids::ENABLE_NOTIFICATION_VALUE.to_vec());
        }
    }

    // A notified value and a polled read converge on the same data shape.
    harness
        .central_tx
        .send(CentralEvent::CharacteristicChanged {
            address: TREADMILL.to_string(),
            service: *ids::FITNESS_MACHINE_SERVICE,
            characteristic: *ids::TREADMILL_DATA_STANDARD,
            value: vec![0xFF],
        })
        .await
        .unwrap();
    match next_event(&mut harness.events).await {
        BridgeEventKind::CharacteristicChanged(data) => {
            assert_eq!(data.address, TREADMILL);
            assert_eq!(data.device_name.as_deref(), Some("Treadmill X1"));
            assert_eq!(data.hex, "FF");
            assert_eq!(data.text, "binary data (1 bytes)");
            match data.analysis.numeric {
                Some(codec::NumericView::Byte { unsigned, signed }) => {
                    assert_eq!(unsigned, 255);
                    assert_eq!(signed, -1);
                }
                other => panic!("unexpected numeric view: {:?}", other),
            }
        }
        other => panic!("expected CharacteristicChanged, got {:?}", other),
    }

    harness
        .central_tx
        .send(CentralEvent::CharacteristicRead {
            address: TREADMILL.to_string(),
            service: *ids::FITNESS_MACHINE_SERVICE,
            characteristic: *ids::FITNESS_FEATURE,
            status: GATT_SUCCESS,
            value: vec![0x02, 0x00],
        })
        .await
        .unwrap();
    match next_event(&mut harness.events).await {
        BridgeEventKind::CharacteristicRead(data) => {
            assert_eq!(data.characteristic, *ids::FITNESS_FEATURE);
            assert_eq!(data.hex, "02 00");
        }
        other => panic!("expected CharacteristicRead, got {:?}", other),
    }

    // Teardown stops the schedule and releases the link.
    harness.bridge.disconnect_from_device(TREADMILL).await.unwrap();
    assert!(harness.central_backend.open_links().is_empty());
    assert_eq!(harness.central_backend.closed_links().len(), 1);
}

#[tokio::test]
async fn rediscovery_command_reuses_the_existing_link() {
    let harness = harness();
    harness.bridge.connect_to_device(TREADMILL).await.unwrap();
    harness
        .central_tx
        .send(CentralEvent::ConnectionStateChange {
            address: TREADMILL.to_string(),
            status: GATT_SUCCESS,
            new_state: STATE_CONNECTED,
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    harness.bridge.discover_services(TREADMILL).await.unwrap();
    assert_eq!(harness.central_backend.discover_requests().len(), 2);

    let error = harness
        .bridge
        .discover_services("00:00:00:00:00:00")
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ble_gatt_bridge::error::ErrorKind::NotFound);
}
