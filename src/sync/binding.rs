use std::fmt::Debug;
use std::future::Future;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::host::{Characteristic, CharacteristicHandler, CharacteristicValue, HostValue};
use crate::types::SetOutcome;
use crate::{Error, Result};

type Getter<T> = Box<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;
type Setter<T> = Box<dyn Fn(T) -> BoxFuture<'static, Result<SetOutcome>> + Send + Sync>;
type ValueListener<T> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Type-erased change notification used for dependency wiring.
pub type ChangeListener = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Something a binding can follow: every change notification triggers the
/// follower's refresh.
pub trait Dependency: Send + Sync {
    fn on_change(&self, listener: ChangeListener) -> usize;
}

/// Bounds for values a binding can hold.
pub trait BindingValue: HostValue + Clone + PartialEq + Debug + Send + Sync + 'static {}

impl<T: HostValue + Clone + PartialEq + Debug + Send + Sync + 'static> BindingValue for T {}

pub struct BindingBuilder<'a, T> {
    label: String,
    characteristic: Arc<Characteristic>,
    initial: Option<T>,
    getter: Option<Getter<T>>,
    setter: Option<Setter<T>>,
    dependencies: Vec<&'a dyn Dependency>,
    refresh_on_get: bool,
}

impl<'a, T: BindingValue> BindingBuilder<'a, T> {
    pub fn initial_value(mut self, value: T) -> Self {
        self.initial = Some(value);
        self
    }

    pub fn getter<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.getter = Some(Box::new(move || f().boxed()));
        self
    }

    pub fn setter<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<SetOutcome>> + Send + 'static,
    {
        self.setter = Some(Box::new(move |v| f(v).boxed()));
        self
    }

    /// Bindings whose changes trigger this binding's `refresh_value`.
    pub fn dependencies(mut self, dependencies: &[&'a dyn Dependency]) -> Self {
        self.dependencies.extend_from_slice(dependencies);
        self
    }

    /// Answer host reads from the held value and refresh in the background.
    pub fn refresh_on_get(mut self, enabled: bool) -> Self {
        self.refresh_on_get = enabled;
        self
    }

    /// Creates the binding, performs the initial refresh and binds it to the
    /// host characteristic.
    pub async fn build(self) -> Result<Arc<CharacteristicBinding<T>>> {
        let name = self.characteristic.kind().as_str();
        if self.initial.is_none() && self.getter.is_none() {
            return Err(Error::MissingState(name));
        }
        if let Some(ref initial) = self.initial {
            self.characteristic.update(initial.clone().into_host());
        }

        let binding = Arc::new_cyclic(|me| CharacteristicBinding {
            me: me.clone(),
            label: self.label,
            name,
            characteristic: Arc::downgrade(&self.characteristic),
            value: Mutex::new(self.initial),
            getter: self.getter,
            setter: self.setter,
            listeners: Mutex::new(Vec::new()),
            refresh_on_get: self.refresh_on_get,
        });

        for dependency in self.dependencies {
            let follower = Arc::downgrade(&binding);
            dependency.on_change(Arc::new(move || {
                let follower = follower.clone();
                async move {
                    match follower.upgrade() {
                        Some(binding) => binding.refresh_value().await,
                        None => Ok(()),
                    }
                }
                .boxed()
            }));
        }

        binding.refresh_value().await?;
        self.characteristic.set_handler(binding.clone());
        Ok(binding)
    }
}

/// One synchronized value coupled to one host characteristic.
///
/// The held value only changes inside [`set_internal_value`], which also pushes
/// it to the host and then notifies listeners in registration order. A failing
/// listener is logged and does not stop the others.
///
/// [`set_internal_value`]: CharacteristicBinding::set_internal_value
pub struct CharacteristicBinding<T> {
    me: Weak<Self>,
    label: String,
    name: &'static str,
    // The characteristic owns the binding as its handler.
    characteristic: Weak<Characteristic>,
    value: Mutex<Option<T>>,
    getter: Option<Getter<T>>,
    setter: Option<Setter<T>>,
    listeners: Mutex<Vec<ValueListener<T>>>,
    refresh_on_get: bool,
}

impl<T: BindingValue> CharacteristicBinding<T> {
    pub fn builder<'a>(
        label: impl Into<String>,
        characteristic: Arc<Characteristic>,
    ) -> BindingBuilder<'a, T> {
        BindingBuilder {
            label: label.into(),
            characteristic,
            initial: None,
            getter: None,
            setter: None,
            dependencies: Vec::new(),
            refresh_on_get: false,
        }
    }

    pub fn value(&self) -> Option<T> {
        self.value.lock().clone()
    }

    /// Re-reads the remote state. Applies the result even when unchanged so
    /// the host characteristic stays consistent.
    pub async fn refresh_value(&self) -> Result<()> {
        let Some(getter) = &self.getter else {
            return Ok(());
        };
        debug!(
            zone = %self.label,
            characteristic = self.name,
            current = ?self.value(),
            "refresh state"
        );
        let value = getter().await?;
        self.set_internal_value(value).await;
        Ok(())
    }

    /// User-initiated write through the remote setter.
    pub async fn set_value(&self, value: T) -> Result<()> {
        let outcome = match &self.setter {
            Some(setter) => setter(value.clone()).await?,
            None => SetOutcome::Applied,
        };
        match outcome {
            SetOutcome::Applied => {
                self.set_internal_value(value).await;
                Ok(())
            }
            SetOutcome::Aborted => {
                info!(
                    zone = %self.label,
                    characteristic = self.name,
                    attempted = ?value,
                    "update aborted, resynchronizing"
                );
                self.refresh_value().await
            }
            SetOutcome::Superseded => {
                debug!(
                    zone = %self.label,
                    characteristic = self.name,
                    attempted = ?value,
                    "update superseded by a newer write"
                );
                Ok(())
            }
        }
    }

    /// Replaces the held value, pushes it to the host and notifies listeners.
    pub async fn set_internal_value(&self, value: T) {
        let previous = self.value.lock().replace(value.clone());
        if let Some(characteristic) = self.characteristic.upgrade() {
            characteristic.update(value.clone().into_host());
        }

        if previous.as_ref() == Some(&value) {
            debug!(zone = %self.label, characteristic = self.name, value = ?value, "state unchanged");
        } else {
            info!(
                zone = %self.label,
                characteristic = self.name,
                from = ?previous,
                to = ?value,
                "state changed"
            );
        }

        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            if let Err(e) = listener(value.clone()).await {
                warn!(
                    zone = %self.label,
                    characteristic = self.name,
                    error = %e,
                    "value listener failed"
                );
            }
        }
    }

    /// Registers a listener; returns the number of registered listeners.
    pub fn on_value<F, Fut>(&self, listener: F) -> usize
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut listeners = self.listeners.lock();
        listeners.push(Arc::new(move |v| listener(v).boxed()));
        listeners.len()
    }
}

impl<T: BindingValue> Dependency for CharacteristicBinding<T> {
    fn on_change(&self, listener: ChangeListener) -> usize {
        self.on_value(move |_| listener())
    }
}

#[async_trait]
impl<T: BindingValue> CharacteristicHandler for CharacteristicBinding<T> {
    async fn on_get(&self) -> Result<CharacteristicValue> {
        debug!(zone = %self.label, characteristic = self.name, value = ?self.value(), "host get state");
        if let Some(value) = self.value() {
            if self.refresh_on_get
                && let Some(me) = self.me.upgrade()
            {
                tokio::spawn(async move {
                    if let Err(e) = me.refresh_value().await {
                        warn!(zone = %me.label, characteristic = me.name, error = %e, "background refresh failed");
                    }
                });
            }
            return Ok(value.into_host());
        }

        let refreshed = self.refresh_value().await.and_then(|()| {
            self.value()
                .map(HostValue::into_host)
                .ok_or(Error::NoValue(self.name))
        });
        if let Err(ref e) = refreshed {
            error!(zone = %self.label, characteristic = self.name, error = %e, "failed to get state");
        }
        refreshed
    }

    async fn on_set(&self, value: CharacteristicValue) -> Result<()> {
        debug!(zone = %self.label, characteristic = self.name, value = ?value, "host set state");
        let value = T::from_host(&value).ok_or_else(|| {
            Error::InvalidValue(format!("{value:?} for {}", self.name))
        })?;
        self.set_value(value.clone()).await.inspect_err(|e| {
            error!(
                zone = %self.label,
                characteristic = self.name,
                attempted = ?value,
                error = %e,
                "failed to reach target state"
            );
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::host::{Accessory, CharacteristicKind, ServiceKind};

    fn characteristic(kind: CharacteristicKind) -> Arc<Characteristic> {
        let accessory = Accessory::new("Test", uuid::Uuid::nil());
        accessory
            .get_or_add_service(ServiceKind::WindowCovering)
            .characteristic(kind)
    }

    #[tokio::test]
    async fn requires_initial_value_or_getter() {
        let on = characteristic(CharacteristicKind::On);
        let result = CharacteristicBinding::<bool>::builder("Test", on).build().await;
        assert!(matches!(result, Err(Error::MissingState("On"))));
    }

    #[tokio::test]
    async fn refresh_applies_remote_value() {
        let remote = Arc::new(Mutex::new(10u8));
        let r = remote.clone();
        let current = characteristic(CharacteristicKind::CurrentPosition);
        let binding = CharacteristicBinding::builder("Test", current)
            .initial_value(99u8)
            .getter(move || {
                let r = r.clone();
                async move { Ok(*r.lock()) }
            })
            .build()
            .await
            .unwrap();
        assert_eq!(binding.value(), Some(10));

        *remote.lock() = 55;
        binding.refresh_value().await.unwrap();
        assert_eq!(binding.value(), Some(55));
    }

    #[tokio::test]
    async fn refresh_pushes_unchanged_value_to_host() {
        let c = characteristic(CharacteristicKind::CurrentPosition);
        let binding = CharacteristicBinding::builder("Test", c.clone())
            .getter(|| async { Ok(30u8) })
            .build()
            .await
            .unwrap();
        c.update(CharacteristicValue::Int(0));
        binding.refresh_value().await.unwrap();
        assert_eq!(c.value(), Some(CharacteristicValue::Int(30)));
    }

    #[tokio::test]
    async fn aborted_write_keeps_value_and_resynchronizes() {
        let reads = Arc::new(AtomicU32::new(0));
        let r = reads.clone();
        let binding = CharacteristicBinding::builder("Test", characteristic(CharacteristicKind::On))
            .getter(move || {
                r.fetch_add(1, Ordering::SeqCst);
                async { Ok(false) }
            })
            .setter(|_| async { Ok(SetOutcome::Aborted) })
            .build()
            .await
            .unwrap();
        assert_eq!(reads.load(Ordering::SeqCst), 1);

        binding.set_value(true).await.unwrap();
        assert_eq!(binding.value(), Some(false));
        assert_eq!(reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn superseded_write_changes_nothing() {
        let binding = CharacteristicBinding::builder("Test", characteristic(CharacteristicKind::On))
            .initial_value(false)
            .setter(|_| async { Ok(SetOutcome::Superseded) })
            .build()
            .await
            .unwrap();
        binding.set_value(true).await.unwrap();
        assert_eq!(binding.value(), Some(false));
    }

    #[tokio::test]
    async fn failed_write_keeps_value() {
        let binding = CharacteristicBinding::builder("Test", characteristic(CharacteristicKind::On))
            .initial_value(false)
            .setter(|_| async { Err(Error::Remote("offline".into())) })
            .build()
            .await
            .unwrap();
        assert!(binding.set_value(true).await.is_err());
        assert_eq!(binding.value(), Some(false));
    }

    #[tokio::test]
    async fn applied_write_notifies_listeners_in_order() {
        let binding = CharacteristicBinding::builder("Test", characteristic(CharacteristicKind::On))
            .initial_value(false)
            .setter(|_| async { Ok(SetOutcome::Applied) })
            .build()
            .await
            .unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = seen.clone();
        let second = seen.clone();
        binding.on_value(move |v| {
            first.lock().push(("first", v));
            async { Ok(()) }
        });
        let count = binding.on_value(move |v| {
            second.lock().push(("second", v));
            async { Ok(()) }
        });
        assert_eq!(count, 2);

        binding.set_value(true).await.unwrap();
        assert_eq!(binding.value(), Some(true));
        assert_eq!(*seen.lock(), vec![("first", true), ("second", true)]);
    }

    #[tokio::test]
    async fn failing_listener_does_not_stop_others() {
        let binding = CharacteristicBinding::builder("Test", characteristic(CharacteristicKind::On))
            .initial_value(false)
            .build()
            .await
            .unwrap();
        let reached = Arc::new(AtomicU32::new(0));
        let r = reached.clone();
        binding.on_value(|_| async { Err(Error::Remote("boom".into())) });
        binding.on_value(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        });
        binding.set_value(true).await.unwrap();
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dependent_binding_follows_changes() {
        let current = characteristic(CharacteristicKind::CurrentPosition);
        let source = CharacteristicBinding::builder("Test", current)
            .initial_value(10u8)
            .build()
            .await
            .unwrap();
        let s = source.clone();
        let target = characteristic(CharacteristicKind::TargetPosition);
        let follower = CharacteristicBinding::builder("Test", target)
            .getter(move || {
                let s = s.clone();
                async move { Ok(s.value().unwrap_or_default().saturating_mul(2)) }
            })
            .dependencies(&[&*source])
            .build()
            .await
            .unwrap();
        assert_eq!(follower.value(), Some(20));

        source.set_internal_value(30).await;
        assert_eq!(follower.value(), Some(60));
    }

    #[tokio::test]
    async fn host_get_and_set_go_through_binding() {
        let c = characteristic(CharacteristicKind::On);
        let binding = CharacteristicBinding::builder("Test", c.clone())
            .initial_value(false)
            .setter(|_| async { Ok(SetOutcome::Applied) })
            .build()
            .await
            .unwrap();
        assert_eq!(c.get().await.unwrap(), CharacteristicValue::Bool(false));
        c.set(CharacteristicValue::Bool(true)).await.unwrap();
        assert_eq!(binding.value(), Some(true));
        assert_eq!(c.value(), Some(CharacteristicValue::Bool(true)));

        let err = c.set(CharacteristicValue::String("on".into())).await.unwrap_err();
        assert!(matches!(err, Error::InvalidValue(_)));
    }

    #[tokio::test]
    async fn getter_failure_surfaces_to_host_without_corrupting_value() {
        let c = characteristic(CharacteristicKind::CurrentPosition);
        let fail = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let f = fail.clone();
        let binding = CharacteristicBinding::builder("Test", c.clone())
            .getter(move || {
                let failing = f.load(Ordering::SeqCst);
                async move {
                    if failing {
                        Err(Error::Remote("offline".into()))
                    } else {
                        Ok(40u8)
                    }
                }
            })
            .build()
            .await
            .unwrap();
        fail.store(true, Ordering::SeqCst);
        assert!(binding.refresh_value().await.is_err());
        assert_eq!(binding.value(), Some(40));
    }
}
