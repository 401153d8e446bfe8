//! Zone discovery: turns the backend's zones into host accessories and keeps
//! the host's registrations in line with what the backend reports.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::client::HemisClient;
use crate::config::PlatformConfig;
use crate::host::{Accessory, PlatformHost};
use crate::service::ZoneService;
use crate::types::Zone;
use crate::zone::{ZoneControls, ZoneOptions};
use crate::{Error, Result};

/// Outcome of one discovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    /// Zones reported by the backend.
    pub zones: usize,
    /// Accessories that are live after the pass, including ones kept because
    /// their zone failed to set up.
    pub active: usize,
    pub registered: usize,
    pub updated: usize,
    pub removed: usize,
    pub failed: usize,
}

enum ZoneSetup {
    Active { accessory: Arc<Accessory>, cached: bool },
    NoControls,
    Failed { uuid: Uuid, error: Error },
}

pub struct Platform<H> {
    host: Arc<H>,
    config: PlatformConfig,
    options: ZoneOptions,
    accessories: Mutex<HashMap<Uuid, Arc<Accessory>>>,
    controls: Mutex<HashMap<Uuid, Arc<ZoneControls>>>,
}

impl<H: PlatformHost> Platform<H> {
    pub fn new(host: Arc<H>, config: PlatformConfig) -> Self {
        let options = ZoneOptions::from_config(&config);
        Self::with_options(host, config, options)
    }

    pub fn with_options(host: Arc<H>, config: PlatformConfig, options: ZoneOptions) -> Self {
        Self {
            host,
            config,
            options,
            accessories: Mutex::new(HashMap::new()),
            controls: Mutex::new(HashMap::new()),
        }
    }

    /// Restores an accessory from the host's cache.
    pub fn configure_accessory(&self, accessory: Arc<Accessory>) {
        info!(name = %accessory.display_name(), uuid = %accessory.uuid(), "loading accessory from cache");
        self.accessories.lock().insert(accessory.uuid(), accessory);
    }

    pub fn accessories(&self) -> Vec<Arc<Accessory>> {
        self.accessories.lock().values().cloned().collect()
    }

    pub fn accessory(&self, zone_id: &str) -> Option<Arc<Accessory>> {
        let uuid = self.host.accessory_uuid(zone_id);
        self.accessories.lock().get(&uuid).cloned()
    }

    pub fn controls(&self, zone_id: &str) -> Option<Arc<ZoneControls>> {
        let uuid = self.host.accessory_uuid(zone_id);
        self.controls.lock().get(&uuid).cloned()
    }

    pub fn zone_controls(&self) -> Vec<Arc<ZoneControls>> {
        self.controls.lock().values().cloned().collect()
    }

    /// Logs in with the configured account and runs discovery.
    ///
    /// Returns `None` when discovery is disabled or did not complete; the
    /// reason is logged.
    pub async fn launch(&self) -> Option<DiscoveryReport> {
        if !self.config.zones {
            warn!("zone discovery is disabled, removing cached accessories");
            self.cleanup(&HashSet::new());
            return None;
        }
        if !self.config.has_credentials() {
            warn!("Flexom email or password missing, skipping discovery");
            return None;
        }

        let mut builder = HemisClient::builder()
            .base_url(&self.config.base_url)
            .credentials(&self.config.email, &self.config.password);
        if let Some((mode, path)) = self.config.message_log() {
            builder = builder.message_log(mode, path);
        }
        let client = match builder.build() {
            Ok(client) => client,
            Err(e) => {
                error!(error = %e, "failed to create Flexom client");
                return None;
            }
        };
        if let Err(e) = client.login().await {
            report_failure(&e);
            return None;
        }

        self.launch_with(Arc::new(client)).await
    }

    /// Runs discovery against an already connected service.
    pub async fn launch_with(&self, service: Arc<dyn ZoneService>) -> Option<DiscoveryReport> {
        match self.discover(service).await {
            Ok(report) => {
                info!(
                    zones = report.zones,
                    active = report.active,
                    registered = report.registered,
                    removed = report.removed,
                    failed = report.failed,
                    "zone discovery finished"
                );
                Some(report)
            }
            Err(e) => {
                report_failure(&e);
                None
            }
        }
    }

    /// One discovery pass. Zones are set up concurrently and independently;
    /// a failed zone keeps whatever accessory it already had. An
    /// authentication failure ends the pass without touching registrations.
    pub async fn discover(&self, service: Arc<dyn ZoneService>) -> Result<DiscoveryReport> {
        debug!("request listZones");
        let zones = service.list_zones().await?;
        info!(count = zones.len(), "discovered zones");

        let setups =
            join_all(zones.iter().map(|zone| self.setup_zone(service.clone(), zone))).await;

        let mut report = DiscoveryReport {
            zones: zones.len(),
            ..DiscoveryReport::default()
        };
        let mut active = HashSet::new();
        let mut registered = Vec::new();
        let mut updated = Vec::new();
        let mut fatal = None;

        for setup in setups {
            match setup {
                ZoneSetup::Active { accessory, cached } => {
                    active.insert(accessory.uuid());
                    if cached {
                        updated.push(accessory);
                    } else {
                        registered.push(accessory);
                    }
                }
                ZoneSetup::NoControls => {}
                ZoneSetup::Failed { uuid, error } => {
                    report.failed += 1;
                    if error.is_unauthorized() {
                        if fatal.is_none() {
                            fatal = Some(error);
                        }
                    } else if self.accessories.lock().contains_key(&uuid) {
                        active.insert(uuid);
                    }
                }
            }
        }

        if let Some(error) = fatal {
            let mut controls = self.controls.lock();
            for accessory in &registered {
                if let Some(zone) = controls.remove(&accessory.uuid()) {
                    zone.shutdown();
                }
            }
            return Err(error);
        }

        {
            let mut accessories = self.accessories.lock();
            for accessory in &registered {
                accessories.insert(accessory.uuid(), accessory.clone());
            }
        }
        if !registered.is_empty() {
            self.host.register_accessories(&registered);
        }
        if !updated.is_empty() {
            self.host.update_accessories(&updated);
        }

        report.registered = registered.len();
        report.updated = updated.len();
        report.removed = self.cleanup(&active);
        report.active = active.len();
        Ok(report)
    }

    async fn setup_zone(&self, service: Arc<dyn ZoneService>, zone: &Zone) -> ZoneSetup {
        let uuid = self.host.accessory_uuid(&zone.id);
        let cached = self.accessories.lock().get(&uuid).cloned();
        let is_cached = cached.is_some();
        let accessory = cached.unwrap_or_else(|| Arc::new(Accessory::new(zone.name.clone(), uuid)));

        let exclusions = self.config.exclusions_for(&zone.id);
        match ZoneControls::create(&accessory, service, zone, exclusions, &self.options).await {
            Ok(Some(controls)) => {
                if is_cached {
                    info!(zone = %zone.name, "restoring existing accessory");
                } else {
                    info!(zone = %zone.name, "adding new accessory");
                }
                if let Some(previous) = self.controls.lock().insert(uuid, Arc::new(controls)) {
                    previous.shutdown();
                }
                ZoneSetup::Active {
                    accessory,
                    cached: is_cached,
                }
            }
            Ok(None) => {
                if let Some(previous) = self.controls.lock().remove(&uuid) {
                    previous.shutdown();
                }
                ZoneSetup::NoControls
            }
            Err(error) => {
                error!(zone = %zone.name, error = %error, "failed to set up zone");
                ZoneSetup::Failed { uuid, error }
            }
        }
    }

    /// Unregisters every known accessory not in `active`; returns how many.
    fn cleanup(&self, active: &HashSet<Uuid>) -> usize {
        let stale: Vec<Arc<Accessory>> = {
            let mut accessories = self.accessories.lock();
            let ids: Vec<Uuid> = accessories
                .keys()
                .filter(|id| !active.contains(id))
                .copied()
                .collect();
            ids.iter().filter_map(|id| accessories.remove(id)).collect()
        };
        if stale.is_empty() {
            return 0;
        }

        for accessory in &stale {
            info!(name = %accessory.display_name(), "removing accessory");
            if let Some(controls) = self.controls.lock().remove(&accessory.uuid()) {
                controls.shutdown();
            }
        }
        self.host.unregister_accessories(&stale);
        stale.len()
    }

    /// Stops every zone's pollers and event forwarding.
    pub fn shutdown(&self) {
        let controls: Vec<Arc<ZoneControls>> =
            self.controls.lock().drain().map(|(_, c)| c).collect();
        for zone in &controls {
            zone.shutdown();
        }
        debug!(zones = controls.len(), "platform shut down");
    }
}

fn report_failure(error: &Error) {
    if error.is_unauthorized() {
        error!("incorrect Flexom email or password");
    } else {
        error!(error = %error, "zone discovery failed");
    }
}
