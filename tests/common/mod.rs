#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use flexom_bridge::host::{Accessory, PlatformHost};
use flexom_bridge::{
    Error, Factor, FactorEvent, Result, SetFactorRequest, SetOutcome, Zone, ZoneService,
    ZoneSettings,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

/// In-memory backend. Writes are applied to the stored settings unless
/// `hold_writes` is set, in which case the test moves values itself, or
/// `abort_writes` is set, in which case the backend rejects them as redundant.
#[derive(Default)]
pub struct MockZoneService {
    zones: Mutex<Vec<Zone>>,
    settings: Mutex<HashMap<String, ZoneSettings>>,
    writes: Mutex<Vec<SetFactorRequest>>,
    failing: Mutex<HashSet<String>>,
    senders: Mutex<HashMap<String, mpsc::Sender<FactorEvent>>>,
    hold_writes: AtomicBool,
    abort_writes: AtomicBool,
    unauthorized: AtomicBool,
    reads: AtomicUsize,
}

impl MockZoneService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_zone(&self, id: &str, name: &str, settings: ZoneSettings) {
        self.zones.lock().push(Zone {
            id: id.into(),
            name: name.into(),
        });
        self.settings.lock().insert(id.into(), settings);
    }

    pub fn zone(&self, id: &str) -> Zone {
        self.zones
            .lock()
            .iter()
            .find(|z| z.id == id)
            .cloned()
            .unwrap_or_else(|| panic!("unknown zone {id}"))
    }

    pub fn set_value(&self, id: &str, factor: Factor, value: f64) {
        if let Some(settings) = self.settings.lock().get_mut(id) {
            settings.set(factor, value);
        }
    }

    pub fn fail_zone(&self, id: &str) {
        self.failing.lock().insert(id.into());
    }

    pub fn hold_writes(&self) {
        self.hold_writes.store(true, Ordering::SeqCst);
    }

    pub fn abort_writes(&self) {
        self.abort_writes.store(true, Ordering::SeqCst);
    }

    pub fn set_unauthorized(&self) {
        self.unauthorized.store(true, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<SetFactorRequest> {
        self.writes.lock().clone()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Delivers a hardware-state event to the zone's subscriber.
    pub async fn push(&self, id: &str, factor: Factor, value: f64) {
        self.set_value(id, factor, value);
        let sender = self.senders.lock().get(id).cloned();
        if let Some(sender) = sender {
            sender
                .send(FactorEvent { factor, value })
                .await
                .expect("subscriber should be listening");
        }
    }

    fn check_auth(&self) -> Result<()> {
        if self.unauthorized.load(Ordering::SeqCst) {
            return Err(Error::Unauthorized);
        }
        Ok(())
    }
}

#[async_trait]
impl ZoneService for MockZoneService {
    async fn list_zones(&self) -> Result<Vec<Zone>> {
        self.check_auth()?;
        Ok(self.zones.lock().clone())
    }

    async fn get_zone_settings(&self, zone: &Zone) -> Result<ZoneSettings> {
        self.check_auth()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().contains(&zone.id) {
            return Err(Error::UnexpectedStatus(500));
        }
        Ok(self.settings.lock().get(&zone.id).cloned().unwrap_or_default())
    }

    async fn set_zone_factor(&self, request: SetFactorRequest) -> Result<SetOutcome> {
        self.check_auth()?;
        if self.abort_writes.load(Ordering::SeqCst) {
            self.writes.lock().push(request);
            return Ok(SetOutcome::Aborted);
        }
        if !self.hold_writes.load(Ordering::SeqCst) {
            self.set_value(&request.zone_id, request.factor, request.value);
        }
        self.writes.lock().push(request);
        Ok(SetOutcome::Applied)
    }

    async fn subscribe(&self, zone: &Zone) -> Result<mpsc::Receiver<FactorEvent>> {
        let (tx, rx) = mpsc::channel(8);
        self.senders.lock().insert(zone.id.clone(), tx);
        Ok(rx)
    }
}

/// Host that records every registration call.
#[derive(Default)]
pub struct RecordingHost {
    pub registered: Mutex<Vec<Uuid>>,
    pub updated: Mutex<Vec<Uuid>>,
    pub unregistered: Mutex<Vec<Uuid>>,
}

impl RecordingHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl PlatformHost for RecordingHost {
    fn register_accessories(&self, accessories: &[Arc<Accessory>]) {
        self.registered.lock().extend(accessories.iter().map(|a| a.uuid()));
    }

    fn update_accessories(&self, accessories: &[Arc<Accessory>]) {
        self.updated.lock().extend(accessories.iter().map(|a| a.uuid()));
    }

    fn unregister_accessories(&self, accessories: &[Arc<Accessory>]) {
        self.unregistered.lock().extend(accessories.iter().map(|a| a.uuid()));
    }
}

pub fn light_settings(value: f64) -> ZoneSettings {
    ZoneSettings::new().with(Factor::Brightness, value)
}

pub fn window_settings(value: f64) -> ZoneSettings {
    ZoneSettings::new().with(Factor::ExternalBrightness, value)
}

/// Lets spawned tasks catch up; under paused time this also advances the clock.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
