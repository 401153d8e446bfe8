use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::service::ZoneService;
use crate::sync::debounce::{DEFAULT_DEBOUNCE, Debouncer};
use crate::types::{Factor, SetFactorRequest, SetOutcome, Zone, ZoneSettings};
use crate::{Error, Result};

/// Reads within this window reuse the last fetched settings.
pub const READ_THROTTLE: Duration = Duration::from_millis(1000);

/// Settings as last seen by one channel. Replaced wholesale, never edited in place.
#[derive(Debug, Clone)]
pub struct SettingsSnapshot {
    pub version: u64,
    pub settings: ZoneSettings,
    fetched_at: Instant,
}

/// Link between one zone factor and the remote service: throttled reads over
/// an owned settings snapshot, debounced writes.
pub struct FactorChannel {
    service: Arc<dyn ZoneService>,
    zone: Zone,
    factor: Factor,
    snapshot: Mutex<Option<Arc<SettingsSnapshot>>>,
    fetch: tokio::sync::Mutex<()>,
    writes: Debouncer<f64>,
}

impl FactorChannel {
    pub fn new(service: Arc<dyn ZoneService>, zone: Zone, factor: Factor, tolerance: f64) -> Self {
        Self::with_debounce(service, zone, factor, tolerance, DEFAULT_DEBOUNCE)
    }

    pub fn with_debounce(
        service: Arc<dyn ZoneService>,
        zone: Zone,
        factor: Factor,
        tolerance: f64,
        delay: Duration,
    ) -> Self {
        let sink_service = service.clone();
        let zone_id = zone.id.clone();
        let zone_name = zone.name.clone();
        let writes = Debouncer::new(delay, move |value: f64| {
            let service = sink_service.clone();
            let request = SetFactorRequest {
                zone_id: zone_id.clone(),
                factor,
                value,
                tolerance,
                wait: false,
            };
            let zone_name = zone_name.clone();
            async move {
                debug!(zone = %zone_name, factor = %factor, value, "request setZoneFactor");
                service.set_zone_factor(request).await
            }
            .boxed()
        });
        Self {
            service,
            zone,
            factor,
            snapshot: Mutex::new(None),
            fetch: tokio::sync::Mutex::new(()),
            writes,
        }
    }

    /// Seeds the snapshot with settings fetched elsewhere.
    pub fn seed(&self, settings: ZoneSettings) {
        self.replace(|version| SettingsSnapshot {
            version,
            settings,
            fetched_at: Instant::now(),
        });
    }

    pub fn factor(&self) -> Factor {
        self.factor
    }

    pub fn snapshot(&self) -> Option<Arc<SettingsSnapshot>> {
        self.snapshot.lock().clone()
    }

    /// Current remote value of the factor, fetching at most once per
    /// [`READ_THROTTLE`].
    pub async fn read(&self) -> Result<f64> {
        let settings = self.settings().await?;
        settings
            .value(self.factor)
            .ok_or_else(|| {
                Error::Protocol(format!("zone {} has no {} setting", self.zone.id, self.factor))
            })
    }

    async fn settings(&self) -> Result<ZoneSettings> {
        let _guard = self.fetch.lock().await;
        let started = self.snapshot();
        if let Some(ref snapshot) = started
            && snapshot.fetched_at.elapsed() < READ_THROTTLE
        {
            return Ok(snapshot.settings.clone());
        }

        debug!(zone = %self.zone.name, factor = %self.factor, "request getZoneSettings");
        let fetched = self.service.get_zone_settings(&self.zone).await?;

        let mut slot = self.snapshot.lock();
        let started_version = started.map(|s| s.version);
        let current_version = slot.as_ref().map(|s| s.version);
        if current_version != started_version
            && let Some(ref pushed) = *slot
        {
            // A push event landed while fetching; it is newer than this read.
            return Ok(pushed.settings.clone());
        }
        let version = current_version.map_or(1, |v| v + 1);
        *slot = Some(Arc::new(SettingsSnapshot {
            version,
            settings: fetched.clone(),
            fetched_at: Instant::now(),
        }));
        Ok(fetched)
    }

    /// Applies a pushed hardware-state value as a new snapshot.
    pub fn apply_event(&self, value: f64) {
        let base = self
            .snapshot()
            .map(|s| s.settings.clone())
            .unwrap_or_default();
        let mut settings = base;
        settings.set(self.factor, value);
        self.replace(|version| SettingsSnapshot {
            version,
            settings,
            fetched_at: Instant::now(),
        });
    }

    fn replace(&self, build: impl FnOnce(u64) -> SettingsSnapshot) {
        let mut slot = self.snapshot.lock();
        let version = slot.as_ref().map_or(1, |s| s.version + 1);
        *slot = Some(Arc::new(build(version)));
    }

    /// Debounced remote write.
    pub async fn write(&self, value: f64) -> Result<SetOutcome> {
        self.writes.call(value).await
    }
}
