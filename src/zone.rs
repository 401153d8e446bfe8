use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;
use crate::config::PlatformConfig;
use crate::host::{Accessory, CharacteristicKind, CharacteristicValue, ServiceKind};
use crate::service::ZoneService;
use crate::sync::{
    DEFAULT_DEBOUNCE, FactorChannel, LightBulb, WindowCovering, WindowCoveringOptions,
};
use crate::types::{Exclusions, Factor, FactorEvent, Zone, ZoneCapabilities};

pub const MANUFACTURER: &str = "Flexom";
pub const MODEL: &str = "Zone";

#[derive(Debug, Clone, Copy)]
pub struct ZoneOptions {
    /// Remote factor tolerance, as a fraction of full range.
    pub tolerance: f64,
    pub debounce: Duration,
    pub window: WindowCoveringOptions,
}

impl ZoneOptions {
    pub fn from_config(config: &PlatformConfig) -> Self {
        Self {
            tolerance: config.tolerance,
            debounce: DEFAULT_DEBOUNCE,
            window: WindowCoveringOptions {
                tolerance: config.window_tolerance(),
                refresh_interval: config.polling_interval(),
                ..WindowCoveringOptions::default()
            },
        }
    }
}

impl Default for ZoneOptions {
    fn default() -> Self {
        Self::from_config(&PlatformConfig::default())
    }
}

/// Live synchronizers of one zone, plus the task forwarding its push events.
pub struct ZoneControls {
    zone: Zone,
    capabilities: ZoneCapabilities,
    light: Option<Arc<LightBulb>>,
    window: Option<Arc<WindowCovering>>,
    events: CancellationToken,
}

impl ZoneControls {
    /// Sets up the zone's controls on `accessory`.
    ///
    /// Returns `Ok(None)` when the zone has nothing to control; the light and
    /// window services are then removed from the accessory. On error the
    /// accessory is left untouched.
    pub async fn create(
        accessory: &Accessory,
        service: Arc<dyn ZoneService>,
        zone: &Zone,
        exclusions: Exclusions,
        options: &ZoneOptions,
    ) -> Result<Option<Self>> {
        debug!(zone = %zone.name, "request getZoneSettings");
        let settings = service.get_zone_settings(zone).await?;
        let capabilities = ZoneCapabilities::from_settings(&settings, exclusions);
        debug!(
            zone = %zone.name,
            light = capabilities.has_light,
            window = capabilities.has_window,
            "zone capabilities"
        );

        // Built off to the side so a failure leaves the accessory as it was.
        let staged = Accessory::new(accessory.display_name(), accessory.uuid());
        let channel = |factor: Factor| {
            let channel = FactorChannel::with_debounce(
                service.clone(),
                zone.clone(),
                factor,
                options.tolerance,
                options.debounce,
            );
            channel.seed(settings.clone());
            Arc::new(channel)
        };

        let light = if capabilities.has_light {
            let light = LightBulb::create(&staged, &zone.name, channel(Factor::Brightness)).await?;
            Some(Arc::new(light))
        } else {
            None
        };

        let window = if capabilities.has_window {
            let window_channel = channel(Factor::ExternalBrightness);
            let window =
                WindowCovering::create(&staged, &zone.name, window_channel, options.window).await?;
            Some(Arc::new(window))
        } else {
            None
        };

        let info = accessory.get_or_add_service(ServiceKind::AccessoryInformation);
        for (kind, value) in [
            (CharacteristicKind::Manufacturer, MANUFACTURER.to_string()),
            (CharacteristicKind::Model, MODEL.to_string()),
            (CharacteristicKind::SerialNumber, zone.id.clone()),
        ] {
            info.set_characteristic(kind, CharacteristicValue::String(value));
        }
        for kind in [ServiceKind::Lightbulb, ServiceKind::WindowCovering] {
            match staged.service(kind) {
                Some(built) => accessory.replace_service(built),
                None => remove_service(accessory, zone, kind),
            }
        }

        if capabilities.is_empty() {
            info!(zone = %zone.name, "zone has no controls");
            return Ok(None);
        }

        let events = CancellationToken::new();
        match service.subscribe(zone).await {
            Ok(receiver) => {
                tokio::spawn(forward_events(
                    zone.name.clone(),
                    receiver,
                    light.clone(),
                    window.clone(),
                    events.clone(),
                ));
            }
            Err(e) => warn!(zone = %zone.name, error = %e, "failed to subscribe to zone events"),
        }

        Ok(Some(Self {
            zone: zone.clone(),
            capabilities,
            light,
            window,
            events,
        }))
    }

    pub fn zone(&self) -> &Zone {
        &self.zone
    }

    pub fn capabilities(&self) -> ZoneCapabilities {
        self.capabilities
    }

    pub fn light(&self) -> Option<&Arc<LightBulb>> {
        self.light.as_ref()
    }

    pub fn window(&self) -> Option<&Arc<WindowCovering>> {
        self.window.as_ref()
    }

    /// Stops event forwarding and every poller of the zone. Idempotent.
    pub fn shutdown(&self) {
        self.events.cancel();
        if let Some(window) = &self.window {
            window.shutdown();
        }
    }
}

impl Drop for ZoneControls {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn remove_service(accessory: &Accessory, zone: &Zone, kind: ServiceKind) {
    if accessory.remove_service(kind) {
        info!(zone = %zone.name, service = ?kind, "removed service");
    }
}

async fn forward_events(
    label: String,
    mut events: mpsc::Receiver<FactorEvent>,
    light: Option<Arc<LightBulb>>,
    window: Option<Arc<WindowCovering>>,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = token.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        debug!(zone = %label, factor = %event.factor, value = event.value, "hardware state event");
        match (event.factor, &light, &window) {
            (Factor::Brightness, Some(light), _) => light.apply_remote(event.value).await,
            (Factor::ExternalBrightness, _, Some(window)) => window.apply_remote(event.value).await,
            _ => debug!(zone = %label, factor = %event.factor, "no control for factor"),
        }
    }
    debug!(zone = %label, "event forwarding stopped");
}
