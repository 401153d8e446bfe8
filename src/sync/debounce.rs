use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{trace, warn};

use crate::Result;
use crate::types::SetOutcome;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1000);

type Sink<T> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<SetOutcome>> + Send + Sync>;

struct Pending<T> {
    generation: u64,
    deadline: Instant,
    value: Option<T>,
    waiter: Option<oneshot::Sender<Result<SetOutcome>>>,
    timer: bool,
}

struct Shared<T> {
    delay: Duration,
    pending: Mutex<Pending<T>>,
    sink: Sink<T>,
}

/// Trailing-edge debounce: every call restarts the quiet period, and only the
/// last value seen when it elapses is forwarded to the sink.
///
/// The quiet period runs on a spawned timer task, so the last value is sent
/// even if its caller stops waiting. Callers overtaken by a newer call resolve
/// to [`SetOutcome::Superseded`] right away; the last caller gets the sink's
/// result.
pub struct Debouncer<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new<F>(delay: Duration, sink: F) -> Self
    where
        F: Fn(T) -> BoxFuture<'static, Result<SetOutcome>> + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                delay,
                pending: Mutex::new(Pending {
                    generation: 0,
                    deadline: Instant::now(),
                    value: None,
                    waiter: None,
                    timer: false,
                }),
                sink: Arc::new(sink),
            }),
        }
    }

    pub fn delay(&self) -> Duration {
        self.shared.delay
    }

    pub async fn call(&self, value: T) -> Result<SetOutcome> {
        let (tx, rx) = oneshot::channel();
        let spawn_timer = {
            let mut pending = self.shared.pending.lock();
            pending.generation += 1;
            pending.deadline = Instant::now() + self.shared.delay;
            pending.value = Some(value);
            if let Some(overtaken) = pending.waiter.replace(tx) {
                trace!(latest = pending.generation, "debounced call superseded");
                let _ = overtaken.send(Ok(SetOutcome::Superseded));
            }
            !std::mem::replace(&mut pending.timer, true)
        };
        if spawn_timer {
            tokio::spawn(fire(self.shared.clone()));
        }

        rx.await.unwrap_or(Ok(SetOutcome::Superseded))
    }
}

async fn fire<T: Send + 'static>(shared: Arc<Shared<T>>) {
    let (generation, value, waiter) = loop {
        let deadline = shared.pending.lock().deadline;
        tokio::time::sleep_until(deadline).await;

        let due = {
            let mut pending = shared.pending.lock();
            (Instant::now() >= pending.deadline).then(|| {
                pending.timer = false;
                (pending.generation, pending.value.take(), pending.waiter.take())
            })
        };
        if let Some(due) = due {
            break due;
        }
    };

    let Some(value) = value else {
        return;
    };
    let result = (shared.sink)(value).await;
    match waiter {
        Some(waiter) => {
            let _ = waiter.send(result);
        }
        None => match result {
            Ok(outcome) => trace!(generation, ?outcome, "debounced write finished without a waiter"),
            Err(e) => warn!(generation, error = %e, "debounced write failed"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording() -> (Arc<Mutex<Vec<u32>>>, Debouncer<u32>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink_calls = calls.clone();
        let debouncer = Debouncer::new(DEFAULT_DEBOUNCE, move |v| {
            let calls = sink_calls.clone();
            Box::pin(async move {
                calls.lock().push(v);
                Ok(SetOutcome::Applied)
            }) as BoxFuture<'static, Result<SetOutcome>>
        });
        (calls, debouncer)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_to_last_value() {
        let (calls, debouncer) = recording();
        let debouncer = Arc::new(debouncer);

        let mut handles = Vec::new();
        for v in 1..=5 {
            let d = debouncer.clone();
            handles.push(tokio::spawn(async move { d.call(v).await.unwrap() }));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let outcomes: Vec<SetOutcome> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(*calls.lock(), vec![5]);
        assert_eq!(outcomes.last(), Some(&SetOutcome::Applied));
        assert!(outcomes[..4].iter().all(|o| *o == SetOutcome::Superseded));
    }

    #[tokio::test(start_paused = true)]
    async fn spaced_calls_each_fire() {
        let (calls, debouncer) = recording();
        debouncer.call(1).await.unwrap();
        debouncer.call(2).await.unwrap();
        assert_eq!(*calls.lock(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn fires_only_after_quiet_period() {
        let (calls, debouncer) = recording();
        let debouncer = Arc::new(debouncer);
        let d = debouncer.clone();
        let handle = tokio::spawn(async move { d.call(7).await });

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(calls.lock().is_empty());

        handle.await.unwrap().unwrap();
        assert_eq!(*calls.lock(), vec![7]);
    }

    #[tokio::test(start_paused = true)]
    async fn last_value_is_sent_when_its_caller_goes_away() {
        let (calls, debouncer) = recording();
        let debouncer = Arc::new(debouncer);

        let d = debouncer.clone();
        let first = tokio::spawn(async move { d.call(1).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        let d = debouncer.clone();
        let second = tokio::spawn(async move { d.call(2).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        second.abort();

        assert_eq!(first.await.unwrap().unwrap(), SetOutcome::Superseded);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(*calls.lock(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn independent_debouncers_do_not_coalesce() {
        let (light_calls, light) = recording();
        let (shade_calls, shade) = recording();
        let (a, b) = tokio::join!(light.call(1), shade.call(2));
        assert_eq!(a.unwrap(), SetOutcome::Applied);
        assert_eq!(b.unwrap(), SetOutcome::Applied);
        assert_eq!(*light_calls.lock(), vec![1]);
        assert_eq!(*shade_calls.lock(), vec![2]);
    }
}
