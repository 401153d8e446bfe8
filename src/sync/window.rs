use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::host::{Accessory, CharacteristicKind, CharacteristicValue, ServiceKind};
use crate::sync::binding::CharacteristicBinding;
use crate::sync::channel::FactorChannel;
use crate::sync::poller::{PollOptions, Poller};
use crate::types::{PositionState, SetOutcome};
use crate::{Error, Result};

pub const CONVERGENCE_INTERVAL: Duration = Duration::from_secs(3);
pub const CONVERGENCE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
pub struct WindowCoveringOptions {
    /// Percentage points within which current counts as having reached target.
    pub tolerance: f64,
    pub refresh_interval: Duration,
    pub convergence_interval: Duration,
    pub convergence_timeout: Duration,
}

impl Default for WindowCoveringOptions {
    fn default() -> Self {
        Self {
            tolerance: 5.0,
            refresh_interval: REFRESH_INTERVAL,
            convergence_interval: CONVERGENCE_INTERVAL,
            convergence_timeout: CONVERGENCE_TIMEOUT,
        }
    }
}

/// Remote factor (0.0..=1.0) to host position (0..=100).
pub fn to_position(value: f64) -> u8 {
    (value * 100.0).round().clamp(0.0, 100.0) as u8
}

pub fn to_factor(position: u8) -> f64 {
    f64::from(position) / 100.0
}

/// Polls current position after a target change until it is within
/// tolerance. On timeout the target is reset to the last observed position.
struct Convergence {
    label: String,
    current: Arc<CharacteristicBinding<u8>>,
    target: OnceLock<Weak<CharacteristicBinding<u8>>>,
    poller: Mutex<Option<Arc<Poller<()>>>>,
    options: WindowCoveringOptions,
}

impl Convergence {
    async fn start(&self, goal: u8) -> Result<()> {
        let iteration = Arc::new(AtomicU32::new(0));

        let current = self.current.clone();
        let target = self.target.get().cloned();
        let label = self.label.clone();
        let attempts = iteration.clone();
        let on_timeout = move || {
            async move {
                let last = current.value();
                warn!(
                    zone = %label,
                    target = goal,
                    attempts = attempts.load(Ordering::SeqCst),
                    "failed to reach target"
                );
                if let (Some(last), Some(target)) = (last, target.and_then(|t| t.upgrade())) {
                    warn!(zone = %label, current = last, "resetting target to current value");
                    target.set_internal_value(last).await;
                }
            }
            .boxed()
        };

        let current = self.current.clone();
        let label = self.label.clone();
        let tolerance = self.options.tolerance;
        let polls = iteration.clone();
        let options = PollOptions::every(self.options.convergence_interval)
            .timeout(self.options.convergence_timeout);
        let poller = Poller::new(options, move |cancel: CancellationToken, ()| {
            let current = current.clone();
            let label = label.clone();
            let n = polls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                current.refresh_value().await?;
                let position = current.value();
                debug!(zone = %label, iteration = n, current = ?position, target = goal, "polling");
                let state = PositionState::compute(position, Some(goal), tolerance);
                if state == PositionState::Stopped {
                    info!(zone = %label, target = goal, iterations = n, "target reached");
                    cancel.cancel();
                }
                Ok(None)
            }
            .boxed()
        })?;
        let poller = Arc::new(poller.on_timeout(on_timeout));
        if let Some(previous) = self.poller.lock().replace(poller.clone()) {
            previous.cancel();
        }
        poller.start(()).await
    }

    fn is_running(&self) -> bool {
        self.poller.lock().as_ref().is_some_and(|p| !p.is_cancelled())
    }

    fn cancel(&self) {
        if let Some(poller) = self.poller.lock().take() {
            poller.cancel();
        }
    }
}

/// Window covering over the zone's `BRIEXT` factor.
///
/// `current` is read-only from the host and refreshed by a background poller;
/// `target` is written by the host and starts a convergence poll; the
/// position state is derived from both and never polled on its own.
pub struct WindowCovering {
    current: Arc<CharacteristicBinding<u8>>,
    target: Arc<CharacteristicBinding<u8>>,
    state: Arc<CharacteristicBinding<PositionState>>,
    background: Poller<()>,
    convergence: Arc<Convergence>,
    channel: Arc<FactorChannel>,
}

impl WindowCovering {
    pub async fn create(
        accessory: &Accessory,
        name: &str,
        channel: Arc<FactorChannel>,
        options: WindowCoveringOptions,
    ) -> Result<Self> {
        if !options.tolerance.is_finite() || options.tolerance < 0.0 {
            return Err(Error::Config(format!(
                "window tolerance must be a non-negative number, got {}",
                options.tolerance
            )));
        }
        let label = format!("{name}:WindowCovering");
        let service = accessory.get_or_add_service(ServiceKind::WindowCovering);
        let display = CharacteristicValue::String(name.to_string());
        service.set_characteristic(CharacteristicKind::Name, display);

        let reader = channel.clone();
        let current = CharacteristicBinding::builder(
            label.clone(),
            service.characteristic(CharacteristicKind::CurrentPosition),
        )
        .getter(move || {
            let channel = reader.clone();
            async move { Ok(to_position(channel.read().await?)) }
        })
        .build()
        .await?;

        let initial = current
            .value()
            .ok_or(Error::NoValue(CharacteristicKind::CurrentPosition.as_str()))?;
        info!(zone = %label, target = initial, "initial target");

        let convergence = Arc::new(Convergence {
            label: label.clone(),
            current: current.clone(),
            target: OnceLock::new(),
            poller: Mutex::new(None),
            options,
        });

        let writer = channel.clone();
        let converge = convergence.clone();
        let target = CharacteristicBinding::builder(
            label.clone(),
            service.characteristic(CharacteristicKind::TargetPosition),
        )
        .initial_value(initial)
        .setter(move |position: u8| {
            let channel = writer.clone();
            let convergence = converge.clone();
            async move {
                let outcome = channel.write(to_factor(position)).await?;
                if outcome == SetOutcome::Applied {
                    convergence.start(position).await?;
                }
                Ok(outcome)
            }
        })
        .build()
        .await?;
        let _ = convergence.target.set(Arc::downgrade(&target));

        let (c, t) = (current.clone(), target.clone());
        let tolerance = options.tolerance;
        let state = CharacteristicBinding::builder(
            label.clone(),
            service.characteristic(CharacteristicKind::PositionState),
        )
        .getter(move || {
            let state = PositionState::compute(c.value(), t.value(), tolerance);
            async move { Ok(state) }
        })
        .dependencies(&[&*current, &*target])
        .build()
        .await?;

        let refresher = current.clone();
        let background = Poller::new(PollOptions::every(options.refresh_interval), move |_, ()| {
            let current = refresher.clone();
            async move {
                current.refresh_value().await?;
                Ok(None)
            }
            .boxed()
        })?;
        background.start(()).await?;

        Ok(Self {
            current,
            target,
            state,
            background,
            convergence,
            channel,
        })
    }

    pub fn current_position(&self) -> Option<u8> {
        self.current.value()
    }

    pub fn target_position(&self) -> Option<u8> {
        self.target.value()
    }

    pub fn position_state(&self) -> PositionState {
        self.state.value().unwrap_or_default()
    }

    pub fn is_converging(&self) -> bool {
        self.convergence.is_running()
    }

    /// Host-side write, as if the user moved the slider.
    pub async fn set_target_position(&self, position: u8) -> Result<()> {
        self.target.set_value(position).await
    }

    /// Reflects a pushed `BRIEXT` value without going through the remote.
    pub async fn apply_remote(&self, value: f64) {
        self.channel.apply_event(value);
        self.current.set_internal_value(to_position(value)).await;
    }

    pub fn shutdown(&self) {
        self.background.cancel();
        self.convergence.cancel();
    }
}
