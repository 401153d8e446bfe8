use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{Error, Result};

/// One poll: receives the poller's cancellation token and the current
/// arguments. `Ok(Some(args))` replaces the arguments and compounds the delay
/// by the backoff factor; `Ok(None)` keeps both.
pub type PollWork<A> =
    Box<dyn FnMut(CancellationToken, A) -> BoxFuture<'static, Result<Option<A>>> + Send>;
type TimeoutHook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;
type ErrorHook = Box<dyn Fn(&Error) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    pub delay: Duration,
    pub factor: f64,
    pub timeout: Option<Duration>,
}

impl PollOptions {
    pub fn every(delay: Duration) -> Self {
        Self {
            delay,
            factor: 1.0,
            timeout: None,
        }
    }

    pub fn factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

struct PollLoop<A> {
    work: PollWork<A>,
    args: A,
    delay: Duration,
    factor: f64,
    deadline: Option<Instant>,
    token: CancellationToken,
    on_timeout: Option<TimeoutHook>,
    on_error: ErrorHook,
}

enum Flow {
    Again(Duration),
    Stop,
}

impl<A: Clone + Send + 'static> PollLoop<A> {
    async fn step(&mut self) -> Flow {
        if self.token.is_cancelled() {
            return Flow::Stop;
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            self.token.cancel();
            if let Some(on_timeout) = self.on_timeout.take() {
                on_timeout().await;
            }
            return Flow::Stop;
        }

        match (self.work)(self.token.clone(), self.args.clone()).await {
            Ok(next) => {
                if self.token.is_cancelled() {
                    return Flow::Stop;
                }
                if let Some(args) = next {
                    self.args = args;
                    match Duration::try_from_secs_f64(self.delay.as_secs_f64() * self.factor) {
                        Ok(delay) => self.delay = delay,
                        Err(_) => {
                            error!(delay = ?self.delay, factor = self.factor, "poll delay overflow, stopping");
                            self.token.cancel();
                            return Flow::Stop;
                        }
                    }
                }
                Flow::Again(self.delay)
            }
            Err(e) => {
                if (self.on_error)(&e) && !self.token.is_cancelled() {
                    Flow::Again(self.delay)
                } else {
                    self.token.cancel();
                    Flow::Stop
                }
            }
        }
    }

    async fn run(mut self, mut flow: Flow) {
        while let Flow::Again(delay) = flow {
            tokio::select! {
                biased;
                () = self.token.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
            flow = self.step().await;
        }
    }
}

struct Pending<A> {
    work: PollWork<A>,
    on_timeout: Option<TimeoutHook>,
    on_error: ErrorHook,
}

/// Cancellable repeating task with optional deadline and multiplicative backoff.
///
/// `start` runs the first poll inline, then keeps polling on a spawned task
/// until cancelled, timed out, or stopped by the error hook. Dropping the
/// poller cancels it.
pub struct Poller<A> {
    options: PollOptions,
    token: CancellationToken,
    pending: Mutex<Option<Pending<A>>>,
}

impl<A: Clone + Send + 'static> Poller<A> {
    pub fn new<F>(options: PollOptions, work: F) -> Result<Self>
    where
        F: FnMut(CancellationToken, A) -> BoxFuture<'static, Result<Option<A>>> + Send + 'static,
    {
        if !options.factor.is_finite() || options.factor <= 0.0 {
            return Err(Error::InvalidPollFactor(options.factor));
        }
        Ok(Self {
            options,
            token: CancellationToken::new(),
            pending: Mutex::new(Some(Pending {
                work: Box::new(work),
                on_timeout: None,
                on_error: Box::new(|e| {
                    warn!(error = %e, "poll failed, retrying");
                    true
                }),
            })),
        })
    }

    /// Called once when the deadline passes. Has no effect after `start`.
    pub fn on_timeout<F>(self, f: F) -> Self
    where
        F: FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
    {
        if let Some(pending) = self.pending.lock().as_mut() {
            pending.on_timeout = Some(Box::new(f));
        }
        self
    }

    /// Decides whether a failed poll is retried (`true`) or ends the poller.
    /// Has no effect after `start`.
    pub fn on_error<F>(self, f: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        if let Some(pending) = self.pending.lock().as_mut() {
            pending.on_error = Box::new(f);
        }
        self
    }

    pub async fn start(&self, args: A) -> Result<()> {
        let Some(pending) = self.pending.lock().take() else {
            return Err(Error::PollerStarted);
        };

        let mut poll = PollLoop {
            work: pending.work,
            args,
            delay: self.options.delay,
            factor: self.options.factor,
            deadline: self.options.timeout.map(|t| Instant::now() + t),
            token: self.token.clone(),
            on_timeout: pending.on_timeout,
            on_error: pending.on_error,
        };

        let flow = poll.step().await;
        if matches!(flow, Flow::Stop) {
            debug!("poller finished on first poll");
            return Ok(());
        }
        tokio::spawn(poll.run(flow));
        Ok(())
    }

    /// Idempotent; safe to call from inside the unit of work.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl<A> Drop for Poller<A> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
