use std::sync::Arc;

use tracing::info;

use crate::Result;
use crate::host::{Accessory, CharacteristicKind, CharacteristicValue, ServiceKind};
use crate::sync::binding::CharacteristicBinding;
use crate::sync::channel::FactorChannel;

/// On/off light over the zone's `BRI` factor. Writes are idempotent booleans,
/// so no convergence polling.
pub struct LightBulb {
    on: Arc<CharacteristicBinding<bool>>,
    channel: Arc<FactorChannel>,
}

impl LightBulb {
    pub async fn create(
        accessory: &Accessory,
        name: &str,
        channel: Arc<FactorChannel>,
    ) -> Result<Self> {
        let label = format!("{name}:LightBulb");
        let service = accessory.get_or_add_service(ServiceKind::Lightbulb);
        let display = CharacteristicValue::String(name.to_string());
        service.set_characteristic(CharacteristicKind::Name, display);

        let reader = channel.clone();
        let writer = channel.clone();
        let characteristic = service.characteristic(CharacteristicKind::On);
        let on = CharacteristicBinding::builder(label.clone(), characteristic)
            .getter(move || {
                let channel = reader.clone();
                async move { Ok(channel.read().await? > 0.0) }
            })
            .setter(move |is_on: bool| {
                let channel = writer.clone();
                async move { channel.write(if is_on { 1.0 } else { 0.0 }).await }
            })
            .refresh_on_get(true)
            .build()
            .await?;

        info!(zone = %label, on = ?on.value(), "light bulb ready");
        Ok(Self { on, channel })
    }

    pub fn is_on(&self) -> Option<bool> {
        self.on.value()
    }

    pub fn binding(&self) -> &Arc<CharacteristicBinding<bool>> {
        &self.on
    }

    /// Host-side write, as if the user toggled the light.
    pub async fn set_on(&self, on: bool) -> Result<()> {
        self.on.set_value(on).await
    }

    /// Reflects a pushed `BRI` value without going through the remote.
    pub async fn apply_remote(&self, value: f64) {
        self.channel.apply_event(value);
        self.on.set_internal_value(value > 0.0).await;
    }
}
