//! The fixed set of services the peripheral role exposes.
//!
//! Building the catalog never touches the transport; it only produces
//! descriptors for the session to register one service at a time.

use super::{
    characteristic::Characteristic,
    descriptor::Descriptor,
    ids,
    properties::{AttributePermission, CharacteristicProperty},
    service::Service,
};
use crate::codec;

pub const DEFAULT_DEVICE_NAME: &str = "Fitness Watch";
pub const DEFAULT_HEART_RATE: u32 = 75;
pub const DEFAULT_BATTERY_LEVEL: u32 = 85;

/// Builds the full catalog in registration order: Heart Rate, Battery,
/// Device Information, vendor data, Fitness Machine.
pub fn build_catalog(device_name: &str, heart_rate: u32, battery_level: u32) -> Vec<Service> {
    vec![
        heart_rate_service(heart_rate),
        battery_service(battery_level),
        device_information_service(device_name),
        vendor_data_service(),
        fitness_machine_service(),
    ]
}

fn heart_rate_service(heart_rate: u32) -> Service {
    Service {
        uuid: *ids::HEART_RATE_SERVICE,
        primary: true,
        characteristics: vec![Characteristic {
            uuid: *ids::HEART_RATE_MEASUREMENT,
            properties: vec![CharacteristicProperty::Notify],
            permissions: vec![AttributePermission::Readable],
            value: Some(codec::encode_heart_rate(heart_rate)),
            descriptors: vec![Descriptor::client_config()],
        }],
    }
}

fn battery_service(battery_level: u32) -> Service {
    Service {
        uuid: *ids::BATTERY_SERVICE,
        primary: true,
        characteristics: vec![Characteristic {
            uuid: *ids::BATTERY_LEVEL,
            properties: vec![
                CharacteristicProperty::Read,
                CharacteristicProperty::Notify,
            ],
            permissions: vec![AttributePermission::Readable],
            value: Some(codec::encode_u8(battery_level)),
            descriptors: vec![Descriptor::client_config()],
        }],
    }
}

fn device_information_service(device_name: &str) -> Service {
    Service {
        uuid: *ids::DEVICE_INFORMATION_SERVICE,
        primary: true,
        characteristics: vec![Characteristic {
            uuid: *ids::DEVICE_NAME,
            properties: vec![CharacteristicProperty::Read],
            permissions: vec![AttributePermission::Readable],
            value: Some(device_name.as_bytes().to_vec()),
            descriptors: Vec::new(),
        }],
    }
}

fn vendor_data_service() -> Service {
    Service {
        uuid: *ids::VENDOR_DATA_SERVICE,
        primary: true,
        characteristics: vec![Characteristic {
            uuid: *ids::TREADMILL_DATA,
            properties: vec![
                CharacteristicProperty::Read,
                CharacteristicProperty::Write,
                CharacteristicProperty::WriteWithoutResponse,
            ],
            permissions: vec![
                AttributePermission::Readable,
                AttributePermission::Writeable,
            ],
            value: None,
            descriptors: vec![Descriptor::client_config()],
        }],
    }
}

fn fitness_machine_service() -> Service {
    Service {
        uuid: *ids::FITNESS_MACHINE_SERVICE,
        primary: true,
        characteristics: vec![
            Characteristic {
                uuid: *ids::FITNESS_CONTROL_POINT,
                properties: vec![
                    CharacteristicProperty::Write,
                    CharacteristicProperty::WriteWithoutResponse,
                    CharacteristicProperty::Indicate,
                ],
                permissions: vec![AttributePermission::Writeable],
                value: None,
                descriptors: vec![Descriptor::client_config()],
            },
            Characteristic {
                uuid: *ids::FITNESS_FEATURE,
                properties: vec![CharacteristicProperty::Read],
                permissions: vec![AttributePermission::Readable],
                value: None,
                descriptors: Vec::new(),
            },
            Characteristic {
                uuid: *ids::TREADMILL_DATA_STANDARD,
                properties: vec![
                    CharacteristicProperty::Write,
                    CharacteristicProperty::WriteWithoutResponse,
                    CharacteristicProperty::Notify,
                ],
                permissions: vec![AttributePermission::Writeable],
                value: None,
                descriptors: vec![Descriptor::client_config()],
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_five_services_in_registration_order() {
        let services = build_catalog(DEFAULT_DEVICE_NAME, DEFAULT_HEART_RATE, DEFAULT_BATTERY_LEVEL);
        let uuids: Vec<_> = services.iter().map(|s| s.uuid).collect();
        assert_eq!(
            uuids,
            vec![
                *ids::HEART_RATE_SERVICE,
                *ids::BATTERY_SERVICE,
                *ids::DEVICE_INFORMATION_SERVICE,
                *ids::VENDOR_DATA_SERVICE,
                *ids::FITNESS_MACHINE_SERVICE,
            ]
        );
        assert!(services.iter().all(|s| s.primary));
    }

    #[test]
    fn heart_rate_measurement_is_notify_only_with_client_config() {
        let services = build_catalog(DEFAULT_DEVICE_NAME, DEFAULT_HEART_RATE, DEFAULT_BATTERY_LEVEL);
        let measurement = services[0]
            .characteristic(*ids::HEART_RATE_MEASUREMENT)
            .unwrap();
        assert_eq!(
            measurement.properties,
            vec![CharacteristicProperty::Notify]
        );
        assert!(measurement.client_config().is_some());
        assert_eq!(
            measurement.value,
            Some(codec::encode_heart_rate(DEFAULT_HEART_RATE))
        );
    }

    #[test]
    fn battery_level_is_readable_and_seeded() {
        let services = build_catalog(DEFAULT_DEVICE_NAME, DEFAULT_HEART_RATE, DEFAULT_BATTERY_LEVEL);
        let level = services[1].characteristic(*ids::BATTERY_LEVEL).unwrap();
        assert!(level.has_property(CharacteristicProperty::Read));
        assert!(level.has_property(CharacteristicProperty::Notify));
        assert_eq!(level.value, Some(vec![DEFAULT_BATTERY_LEVEL as u8]));
    }

    #[test]
    fn device_name_carries_configured_name() {
        let services = build_catalog("Test Bridge", DEFAULT_HEART_RATE, DEFAULT_BATTERY_LEVEL);
        let name = services[2].characteristic(*ids::DEVICE_NAME).unwrap();
        assert_eq!(name.value, Some(b"Test Bridge".to_vec()));
        assert_eq!(name.properties, vec![CharacteristicProperty::Read]);
        assert!(name.descriptors.is_empty());
    }

    #[test]
    fn fitness_machine_control_point_prefers_indicate() {
        let services = build_catalog(DEFAULT_DEVICE_NAME, DEFAULT_HEART_RATE, DEFAULT_BATTERY_LEVEL);
        let control = services[4]
            .characteristic(*ids::FITNESS_CONTROL_POINT)
            .unwrap();
        assert!(control.has_property(CharacteristicProperty::Indicate));
        assert!(control.has_property(CharacteristicProperty::WriteWithoutResponse));
        assert!(control.supports_push());
        assert!(control.client_config().is_some());

        let treadmill = services[4]
            .characteristic(*ids::TREADMILL_DATA_STANDARD)
            .unwrap();
        assert!(treadmill.has_property(CharacteristicProperty::Notify));
    }
}
