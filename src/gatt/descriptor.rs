use super::ids;
use super::properties::AttributePermission;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub uuid: Uuid,
    pub permissions: Vec<AttributePermission>,
    pub value: Option<Vec<u8>>,
}

impl Descriptor {
    /// The client-configuration descriptor a central writes to enable
    /// notify/indicate delivery.
    pub fn client_config() -> Self {
        Descriptor {
            uuid: *ids::CLIENT_CONFIG,
            permissions: vec![
                AttributePermission::Readable,
                AttributePermission::Writeable,
            ],
            value: None,
        }
    }
}

impl Default for Descriptor {
    fn default() -> Self {
        Descriptor {
            uuid: Uuid::nil(),
            permissions: vec![
                AttributePermission::Readable,
                AttributePermission::Writeable,
            ],
            value: None,
        }
    }
}
