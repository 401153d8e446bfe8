use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::Result;
use crate::types::{FactorEvent, SetFactorRequest, SetOutcome, Zone, ZoneSettings};

/// Remote zone backend, shared by every zone and synchronizer.
///
/// Calls are independent request/response exchanges; implementations hold no
/// per-caller state beyond what `set_zone_factor` needs to detect superseded
/// waits.
#[async_trait]
pub trait ZoneService: Send + Sync {
    async fn list_zones(&self) -> Result<Vec<Zone>>;

    async fn get_zone_settings(&self, zone: &Zone) -> Result<ZoneSettings>;

    /// Returns `SetOutcome::Aborted` when the remote treats the write as redundant.
    async fn set_zone_factor(&self, request: SetFactorRequest) -> Result<SetOutcome>;

    /// Hardware-state events for one zone. The subscription ends when the
    /// receiver is dropped.
    async fn subscribe(&self, zone: &Zone) -> Result<mpsc::Receiver<FactorEvent>>;
}
