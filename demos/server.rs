use std::sync::Arc;
use tokio::sync::mpsc;

use ble_gatt_bridge::{
    gatt::ids,
    platform::{
        mock::{MockCentralBackend, MockPeripheralBackend},
        BondState, CentralEvent, RemoteDevice, ServerEvent, GATT_SUCCESS, STATE_CONNECTED,
    },
    AdvertiseConfig, BleBridge, BridgeEventKind, CentralRegistry, PeripheralSession,
};

/// Drives the bridge end to end over the mock backends: advertise, accept a
/// simulated central, receive a write, then connect out to a simulated
/// treadmill and watch the poll schedule harvest it.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    std::env::set_var("RUST_LOG", "debug");
    if let Err(err) = pretty_env_logger::try_init() {
        eprintln!("WARNING: failed to initialize logging framework: {}", err);
    }

    let (server_tx, server_rx) = mpsc::channel::<ServerEvent>(256);
    let (central_tx, central_rx) = mpsc::channel::<CentralEvent>(256);
    let (bridge_tx, mut bridge_rx) = mpsc::channel(256);

    let peripheral_backend = Arc::new(MockPeripheralBackend::new());
    let central_backend = Arc::new(MockCentralBackend::new());
    central_backend.add_device(RemoteDevice {
        address: "AA:BB:CC:DD:EE:FF".to_string(),
        name: Some("Treadmill X1".to_string()),
        bond_state: BondState::None,
        device_class: Some(0x0900),
    });

    let bridge = BleBridge::new(
        PeripheralSession::spawn(peripheral_backend, server_rx, bridge_tx.clone()),
        CentralRegistry::spawn(central_backend, central_rx, bridge_tx),
    );

    // Print every event the application layer would receive.
    tokio::spawn(async move {
        while let Some(event) = bridge_rx.recv().await {
            match event.kind {
                BridgeEventKind::DataReceived(data) => {
                    println!(
                        "[{}] data from {}: {} ({})",
                        event.timestamp_ms, data.address, data.hex, data.text
                    );
                }
                BridgeEventKind::CharacteristicRead(data)
                | BridgeEventKind::CharacteristicChanged(data) => {
                    println!(
                        "[{}] {} on {} = {}",
                        event.timestamp_ms, data.characteristic, data.address, data.hex
                    );
                }
                other => println!("[{}] {:?}", event.timestamp_ms, other),
            }
        }
    });

    bridge
        .start_advertising(AdvertiseConfig::default())
        .await
        .expect("advertising request rejected");
    server_tx
        .send(ServerEvent::AdvertiseResult { result: Ok(()) })
        .await
        .expect("backend channel closed");

    // A remote central connects to our GATT server and writes a payload.
    let central_device = RemoteDevice::new("11:22:33:44:55:66").with_name("Trainer App");
    server_tx
        .send(ServerEvent::ConnectionStateChange {
            device: central_device.clone(),
            status: GATT_SUCCESS,
            new_state: STATE_CONNECTED,
        })
        .await
        .expect("backend channel closed");
    server_tx
        .send(ServerEvent::WriteRequest {
            device: central_device,
            service: *ids::VENDOR_DATA_SERVICE,
            characteristic: *ids::TREADMILL_DATA,
            value: vec![0x07, 0x2C, 0x01],
            offset: 0,
            prepared: false,
            responder: None,
        })
        .await
        .expect("backend channel closed");

    bridge.update_heart_rate(82).await.expect("update failed");

    // Connect outward to the treadmill; it reports a read-only fitness
    // service, so the poll schedule takes over.
    bridge
        .connect_to_device("AA:BB:CC:DD:EE:FF")
        .await
        .expect("connect rejected");
    central_tx
        .send(CentralEvent::ConnectionStateChange {
            address: "AA:BB:CC:DD:EE:FF".to_string(),
            status: GATT_SUCCESS,
            new_state: STATE_CONNECTED,
        })
        .await
        .expect("backend channel closed");
    central_tx
        .send(CentralEvent::ServicesDiscovered {
            address: "AA:BB:CC:DD:EE:FF".to_string(),
            status: GATT_SUCCESS,
            services: ble_gatt_bridge::gatt::catalog::build_catalog("Treadmill X1", 0, 100),
        })
        .await
        .expect("backend channel closed");
    central_tx
        .send(CentralEvent::CharacteristicChanged {
            address: "AA:BB:CC:DD:EE:FF".to_string(),
            service: *ids::FITNESS_MACHINE_SERVICE,
            characteristic: *ids::TREADMILL_DATA_STANDARD,
            value: vec![0x01, 0x02],
        })
        .await
        .expect("backend channel closed");

    tokio::time::sleep(std::time::Duration::from_millis(2600)).await;

    bridge
        .disconnect_from_device("AA:BB:CC:DD:EE:FF")
        .await
        .expect("disconnect failed");
    bridge.stop_advertising().await.expect("stop failed");
}
