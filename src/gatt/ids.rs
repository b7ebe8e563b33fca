//! Well-known identifiers the bridge speaks on both roles.

use crate::uuid::ShortUuid;
use once_cell::sync::Lazy;
use uuid::Uuid;

pub static HEART_RATE_SERVICE: Lazy<Uuid> = Lazy::new(|| Uuid::from_short(0x180D));
pub static HEART_RATE_MEASUREMENT: Lazy<Uuid> = Lazy::new(|| Uuid::from_short(0x2A37));

pub static BATTERY_SERVICE: Lazy<Uuid> = Lazy::new(|| Uuid::from_short(0x180F));
pub static BATTERY_LEVEL: Lazy<Uuid> = Lazy::new(|| Uuid::from_short(0x2A19));

pub static DEVICE_INFORMATION_SERVICE: Lazy<Uuid> = Lazy::new(|| Uuid::from_short(0x180A));
pub static DEVICE_NAME: Lazy<Uuid> = Lazy::new(|| Uuid::from_short(0x2A00));

pub static CLIENT_CONFIG: Lazy<Uuid> = Lazy::new(|| Uuid::from_short(0x2902));

pub static FITNESS_MACHINE_SERVICE: Lazy<Uuid> = Lazy::new(|| Uuid::from_short(0x1826));
pub static FITNESS_CONTROL_POINT: Lazy<Uuid> = Lazy::new(|| Uuid::from_short(0x2AD9));
pub static FITNESS_FEATURE: Lazy<Uuid> = Lazy::new(|| Uuid::from_short(0x2ADA));
pub static TREADMILL_DATA_STANDARD: Lazy<Uuid> = Lazy::new(|| Uuid::from_short(0x2ACD));

/// Vendor service accepting pushed data from fitness equipment.
pub static VENDOR_DATA_SERVICE: Lazy<Uuid> =
    Lazy::new(|| Uuid::from_string("12345678-1234-1234-1234-123456789abc"));
pub static TREADMILL_DATA: Lazy<Uuid> =
    Lazy::new(|| Uuid::from_string("12345678-1234-1234-1234-123456789abd"));

/// Client-configuration values a central writes to enable push delivery.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];
pub const ENABLE_INDICATION_VALUE: [u8; 2] = [0x02, 0x00];
