use super::characteristic::Characteristic;
use uuid::Uuid;

/// A service's structure is immutable once built; only characteristic
/// values mutate. Characteristic order is preserved for deterministic
/// enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub uuid: Uuid,
    pub primary: bool,
    pub characteristics: Vec<Characteristic>,
}

impl Service {
    pub fn characteristic(&self, uuid: Uuid) -> Option<&Characteristic> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

impl Default for Service {
    fn default() -> Self {
        Service {
            uuid: Uuid::nil(),
            primary: true,
            characteristics: Vec::new(),
        }
    }
}
