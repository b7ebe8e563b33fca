use super::{
    descriptor::Descriptor,
    ids,
    properties::{AttributePermission, CharacteristicProperty},
};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    pub uuid: Uuid,
    pub properties: Vec<CharacteristicProperty>,
    pub permissions: Vec<AttributePermission>,
    pub value: Option<Vec<u8>>,
    pub descriptors: Vec<Descriptor>,
}

impl Characteristic {
    pub fn has_property(&self, property: CharacteristicProperty) -> bool {
        self.properties.contains(&property)
    }

    /// True when the characteristic can push values (notify or indicate).
    pub fn supports_push(&self) -> bool {
        self.has_property(CharacteristicProperty::Notify)
            || self.has_property(CharacteristicProperty::Indicate)
    }

    pub fn client_config(&self) -> Option<&Descriptor> {
        self.descriptors
            .iter()
            .find(|descriptor| descriptor.uuid == *ids::CLIENT_CONFIG)
    }
}

impl Default for Characteristic {
    fn default() -> Self {
        Characteristic {
            uuid: Uuid::nil(),
            properties: vec![
                CharacteristicProperty::Read,
                CharacteristicProperty::Write,
                CharacteristicProperty::Notify,
            ],
            permissions: vec![
                AttributePermission::Readable,
                AttributePermission::Writeable,
            ],
            value: None,
            descriptors: Vec::new(),
        }
    }
}
