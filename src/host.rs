//! Minimal model of the home-automation host: accessories own services, services
//! own characteristics, and a characteristic forwards host reads and writes to
//! whatever handler was bound to it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::types::PositionState;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    AccessoryInformation,
    Lightbulb,
    WindowCovering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacteristicKind {
    Name,
    Manufacturer,
    Model,
    SerialNumber,
    On,
    CurrentPosition,
    TargetPosition,
    PositionState,
}

impl CharacteristicKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CharacteristicKind::Name => "Name",
            CharacteristicKind::Manufacturer => "Manufacturer",
            CharacteristicKind::Model => "Model",
            CharacteristicKind::SerialNumber => "SerialNumber",
            CharacteristicKind::On => "On",
            CharacteristicKind::CurrentPosition => "CurrentPosition",
            CharacteristicKind::TargetPosition => "TargetPosition",
            CharacteristicKind::PositionState => "PositionState",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CharacteristicValue {
    Bool(bool),
    Int(i64),
    String(String),
}

/// Conversion between synchronized values and host characteristic values.
pub trait HostValue: Sized {
    fn into_host(self) -> CharacteristicValue;
    fn from_host(value: &CharacteristicValue) -> Option<Self>;
}

impl HostValue for bool {
    fn into_host(self) -> CharacteristicValue {
        CharacteristicValue::Bool(self)
    }

    fn from_host(value: &CharacteristicValue) -> Option<Self> {
        match value {
            CharacteristicValue::Bool(b) => Some(*b),
            CharacteristicValue::Int(i) => Some(*i != 0),
            CharacteristicValue::String(_) => None,
        }
    }
}

impl HostValue for u8 {
    fn into_host(self) -> CharacteristicValue {
        CharacteristicValue::Int(i64::from(self))
    }

    fn from_host(value: &CharacteristicValue) -> Option<Self> {
        match value {
            CharacteristicValue::Int(i) => u8::try_from(*i).ok(),
            _ => None,
        }
    }
}

impl HostValue for PositionState {
    fn into_host(self) -> CharacteristicValue {
        CharacteristicValue::Int(self as i64)
    }

    fn from_host(value: &CharacteristicValue) -> Option<Self> {
        match value {
            CharacteristicValue::Int(i) => PositionState::from_code(*i),
            _ => None,
        }
    }
}

/// Get/set entry points the host invokes for a characteristic.
#[async_trait]
pub trait CharacteristicHandler: Send + Sync {
    async fn on_get(&self) -> Result<CharacteristicValue>;
    async fn on_set(&self, value: CharacteristicValue) -> Result<()>;
}

pub struct Characteristic {
    kind: CharacteristicKind,
    value: Mutex<Option<CharacteristicValue>>,
    handler: Mutex<Option<Arc<dyn CharacteristicHandler>>>,
}

impl Characteristic {
    fn new(kind: CharacteristicKind) -> Self {
        Self {
            kind,
            value: Mutex::new(None),
            handler: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> CharacteristicKind {
        self.kind
    }

    /// Last value pushed to the host.
    pub fn value(&self) -> Option<CharacteristicValue> {
        self.value.lock().clone()
    }

    /// Pushes a value to the host without going through the handler.
    pub fn update(&self, value: CharacteristicValue) {
        *self.value.lock() = Some(value);
    }

    pub fn set_handler(&self, handler: Arc<dyn CharacteristicHandler>) {
        *self.handler.lock() = Some(handler);
    }

    pub fn has_handler(&self) -> bool {
        self.handler.lock().is_some()
    }

    /// Host read. Falls back to the last pushed value when nothing is bound.
    pub async fn get(&self) -> Result<CharacteristicValue> {
        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => handler.on_get().await,
            None => self.value().ok_or(Error::NoValue(self.kind.as_str())),
        }
    }

    /// Host write. Without a handler the value is only stored.
    pub async fn set(&self, value: CharacteristicValue) -> Result<()> {
        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => handler.on_set(value).await,
            None => {
                self.update(value);
                Ok(())
            }
        }
    }
}

pub struct Service {
    kind: ServiceKind,
    characteristics: Mutex<HashMap<CharacteristicKind, Arc<Characteristic>>>,
}

impl Service {
    fn new(kind: ServiceKind) -> Self {
        Self {
            kind,
            characteristics: Mutex::new(HashMap::new()),
        }
    }

    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    pub fn characteristic(&self, kind: CharacteristicKind) -> Arc<Characteristic> {
        self.characteristics
            .lock()
            .entry(kind)
            .or_insert_with(|| Arc::new(Characteristic::new(kind)))
            .clone()
    }

    pub fn set_characteristic(
        &self,
        kind: CharacteristicKind,
        value: CharacteristicValue,
    ) -> &Self {
        self.characteristic(kind).update(value);
        self
    }
}

pub struct Accessory {
    uuid: Uuid,
    display_name: String,
    services: Mutex<HashMap<ServiceKind, Arc<Service>>>,
}

impl Accessory {
    pub fn new(display_name: impl Into<String>, uuid: Uuid) -> Self {
        let accessory = Self {
            uuid,
            display_name: display_name.into(),
            services: Mutex::new(HashMap::new()),
        };
        accessory.get_or_add_service(ServiceKind::AccessoryInformation);
        accessory
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn service(&self, kind: ServiceKind) -> Option<Arc<Service>> {
        self.services.lock().get(&kind).cloned()
    }

    pub fn get_or_add_service(&self, kind: ServiceKind) -> Arc<Service> {
        self.services
            .lock()
            .entry(kind)
            .or_insert_with(|| Arc::new(Service::new(kind)))
            .clone()
    }

    /// Installs `service`, replacing any service of the same kind.
    pub fn replace_service(&self, service: Arc<Service>) {
        self.services.lock().insert(service.kind(), service);
    }

    /// Returns whether a service was present.
    pub fn remove_service(&self, kind: ServiceKind) -> bool {
        self.services.lock().remove(&kind).is_some()
    }

    pub fn has_service(&self, kind: ServiceKind) -> bool {
        self.services.lock().contains_key(&kind)
    }
}

/// Platform-level registration surface of the host framework.
pub trait PlatformHost: Send + Sync {
    /// Stable accessory UUID for a remote id.
    fn accessory_uuid(&self, id: &str) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, id.as_bytes())
    }

    fn register_accessories(&self, accessories: &[Arc<Accessory>]);
    fn update_accessories(&self, accessories: &[Arc<Accessory>]);
    fn unregister_accessories(&self, accessories: &[Arc<Accessory>]);
}
