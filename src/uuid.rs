use uuid::Uuid;

/// The Bluetooth base UUID suffix shared by every 16-bit assigned number.
const BLUETOOTH_BASE_NODE: &[u8; 8] = b"\x80\x00\x00\x80\x5F\x9B\x34\xFB";

pub trait ShortUuid {
    fn from_short(uuid: u16) -> Uuid;

    fn from_string(uuid_str: &str) -> Uuid;

    /// The 16-bit assigned number, if this UUID is a Bluetooth-base alias.
    fn short_id(&self) -> Option<u16>;
}

impl ShortUuid for Uuid {
    fn from_short(uuid: u16) -> Uuid {
        return Uuid::from_fields(uuid.into(), 0, 0x1000, BLUETOOTH_BASE_NODE);
    }

    fn from_string(uuid_str: &str) -> Uuid {
        let uuid = uuid_str.to_string();
        match Uuid::parse_str(&uuid) {
            Ok(uuid) => uuid,
            Err(_) => {
                let long_uuid_str = match uuid.len() {
                    4 => format!("0000{}-0000-1000-8000-00805f9b34fb", uuid),
                    8 => format!("{}-0000-1000-8000-00805f9b34fb", uuid),
                    _ => uuid.clone(),
                };
                Uuid::parse_str(&long_uuid_str)
                    .unwrap_or_else(|_| panic!("Invalid UUID string: {}", uuid))
            }
        }
    }

    fn short_id(&self) -> Option<u16> {
        let (d1, d2, d3, d4) = self.as_fields();
        if d2 == 0 && d3 == 0x1000 && d4 == BLUETOOTH_BASE_NODE && d1 <= u16::MAX as u32 {
            return Some(d1 as u16);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_uuid_expands_to_bluetooth_base() {
        let uuid = Uuid::from_short(0x180D);
        assert_eq!(uuid.to_string(), "0000180d-0000-1000-8000-00805f9b34fb");
    }

    #[test]
    fn from_string_accepts_short_forms() {
        assert_eq!(Uuid::from_string("180D"), Uuid::from_short(0x180D));
        assert_eq!(Uuid::from_string("0000180d"), Uuid::from_short(0x180D));
        assert_eq!(
            Uuid::from_string("0000180d-0000-1000-8000-00805f9b34fb"),
            Uuid::from_short(0x180D)
        );
    }

    #[test]
    fn short_id_roundtrips() {
        assert_eq!(Uuid::from_short(0x2ACD).short_id(), Some(0x2ACD));
    }

    #[test]
    fn short_id_rejects_vendor_uuids() {
        let vendor = Uuid::from_string("12345678-1234-1234-1234-123456789abc");
        assert_eq!(vendor.short_id(), None);
    }
}
