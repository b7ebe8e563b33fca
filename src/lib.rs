pub mod bridge;
pub mod codec;
pub mod error;
pub mod gatt;
pub mod platform;
pub mod uuid;

mod central;
mod peripheral;

pub use self::bridge::{BleBridge, BridgeEvent, BridgeEventKind, CharacteristicData, EventSink};
pub use self::central::{
    CentralRegistry, ConnectAck, DisconnectAck, LinkState, PollTarget, POLL_INITIAL_DELAY,
    POLL_INTERVAL,
};
pub use self::peripheral::{
    device_class_label, AdvertiseConfig, AdvertiseFailure, PeripheralConnection,
    PeripheralSession, MAX_ADVERTISED_SERVICES,
};
