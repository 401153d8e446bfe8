use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Method, RequestBuilder};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::DEFAULT_BASE_URL;
use crate::diff::factor_events;
use crate::logger::{MessageLogMode, MessageLogger};
use crate::protocol::{
    LOGIN_PATH, ZONES_PATH, factor_state_body, factor_state_path, login_body, parse_login_response,
    parse_zone_settings, parse_zones, zone_settings_path,
};
use crate::service::ZoneService;
use crate::types::{Factor, FactorEvent, SetFactorRequest, SetOutcome, Zone, ZoneSettings};
use crate::{Error, Result};

pub const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_EVENT_INTERVAL: Duration = Duration::from_secs(5);

const EVENT_BUFFER: usize = 16;

pub struct HemisClientBuilder {
    base_url: String,
    email: String,
    password: String,
    log: Option<(MessageLogMode, PathBuf)>,
    wait_interval: Duration,
    wait_timeout: Duration,
    event_interval: Duration,
}

impl HemisClientBuilder {
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            email: String::new(),
            password: String::new(),
            log: None,
            wait_interval: DEFAULT_WAIT_INTERVAL,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            event_interval: DEFAULT_EVENT_INTERVAL,
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn credentials(mut self, email: impl Into<String>, password: impl Into<String>) -> Self {
        self.email = email.into();
        self.password = password.into();
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<PathBuf>) -> Self {
        self.log = Some((mode, path.into()));
        self
    }

    /// Delay between settings reads while waiting for a write to land.
    pub fn wait_interval(mut self, interval: Duration) -> Self {
        self.wait_interval = interval;
        self
    }

    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Delay between settings reads of a zone subscription.
    pub fn event_interval(mut self, interval: Duration) -> Self {
        self.event_interval = interval;
        self
    }

    pub fn build(self) -> Result<HemisClient> {
        let http = reqwest::Client::builder().build()?;
        let logger = match self.log {
            Some((mode, path)) => Some(Mutex::new(MessageLogger::new(mode, path)?)),
            None => None,
        };

        Ok(HemisClient {
            inner: Arc::new(Inner {
                http,
                base_url: self.base_url,
                email: self.email,
                password: self.password,
                token: Mutex::new(None),
                logger,
                writes: Mutex::new(HashMap::new()),
                wait_interval: self.wait_interval,
                wait_timeout: self.wait_timeout,
                event_interval: self.event_interval,
            }),
        })
    }
}

impl Default for HemisClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct Inner {
    http: reqwest::Client,
    base_url: String,
    email: String,
    password: String,
    token: Mutex<Option<String>>,
    logger: Option<Mutex<MessageLogger>>,
    /// Latest write generation per zone and factor.
    writes: Mutex<HashMap<(String, Factor), u64>>,
    wait_interval: Duration,
    wait_timeout: Duration,
    event_interval: Duration,
}

/// HTTP client for the Flexom zone backend. Cheap to clone; clones share the
/// session.
#[derive(Clone)]
pub struct HemisClient {
    inner: Arc<Inner>,
}

impl HemisClient {
    pub fn builder() -> HemisClientBuilder {
        HemisClientBuilder::new()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.token.lock().is_some()
    }

    pub async fn login(&self) -> Result<()> {
        let url = format!("{}{LOGIN_PATH}", self.inner.base_url);
        debug!(url = %url, "logging in to Flexom");

        let body = login_body(&self.inner.email, &self.inner.password);
        self.log(|logger| logger.log_request("POST", LOGIN_PATH, Some(&body)));

        let response = self.inner.http.post(&url).json(&body).send().await?;
        let json = read_json(response).await?;
        let token = parse_login_response(&json)?;
        *self.inner.token.lock() = Some(token);
        info!("logged in to Flexom");
        Ok(())
    }

    pub async fn list_zones(&self) -> Result<Vec<Zone>> {
        let json = self.request(Method::GET, ZONES_PATH, None).await?;
        parse_zones(&json)
    }

    pub async fn get_zone_settings(&self, zone: &Zone) -> Result<ZoneSettings> {
        self.settings_by_id(&zone.id).await
    }

    async fn settings_by_id(&self, zone_id: &str) -> Result<ZoneSettings> {
        let path = zone_settings_path(zone_id);
        let json = self.request(Method::GET, &path, None).await?;
        self.log(|logger| logger.log_settings(zone_id, 200, &json));
        parse_zone_settings(&json)
    }

    /// Writes a factor value.
    ///
    /// A value already within tolerance of the remote one is not sent and
    /// yields `Aborted`. With `wait`, settings are re-read until the value
    /// lands (`Applied`), a newer write for the same factor takes over
    /// (`Aborted`), or the wait times out.
    pub async fn set_zone_factor(&self, request: SetFactorRequest) -> Result<SetOutcome> {
        let SetFactorRequest {
            zone_id,
            factor,
            value,
            tolerance,
            wait,
        } = request;

        let current = self.settings_by_id(&zone_id).await?.value(factor);
        if let Some(current) = current
            && within(current, value, tolerance)
        {
            debug!(zone = %zone_id, factor = %factor, current, target = value, "write is redundant, not sent");
            return Ok(SetOutcome::Aborted);
        }

        let generation = {
            let mut writes = self.inner.writes.lock();
            let generation = writes.entry((zone_id.clone(), factor)).or_insert(0);
            *generation += 1;
            *generation
        };

        let path = factor_state_path(&zone_id, factor);
        let body = factor_state_body(value);
        self.log(|logger| logger.log_command(&format!("set_factor_{factor}"), &zone_id, &body));
        self.request(Method::PUT, &path, Some(&body)).await?;
        debug!(zone = %zone_id, factor = %factor, value, "factor written");

        if !wait {
            return Ok(SetOutcome::Applied);
        }

        let deadline = Instant::now() + self.inner.wait_timeout;
        loop {
            tokio::time::sleep(self.inner.wait_interval).await;
            if self.write_generation(&zone_id, factor) != generation {
                debug!(zone = %zone_id, factor = %factor, value, "wait superseded by a newer write");
                return Ok(SetOutcome::Aborted);
            }
            let current = self.settings_by_id(&zone_id).await?.value(factor);
            trace!(zone = %zone_id, factor = %factor, current = ?current, target = value, "waiting for factor");
            if current.is_some_and(|c| within(c, value, tolerance)) {
                return Ok(SetOutcome::Applied);
            }
            if Instant::now() >= deadline {
                warn!(zone = %zone_id, factor = %factor, target = value, "timed out waiting for factor");
                return Err(Error::Timeout);
            }
        }
    }

    /// Watches a zone's settings and emits one event per changed factor value.
    ///
    /// The watcher stops once the receiver is dropped.
    pub async fn subscribe(&self, zone: &Zone) -> Result<mpsc::Receiver<FactorEvent>> {
        let mut previous = self.get_zone_settings(zone).await?;
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let client = self.clone();
        let zone = zone.clone();

        tokio::spawn(async move {
            debug!(zone = %zone.name, "zone event watcher started");
            loop {
                tokio::select! {
                    biased;
                    () = tx.closed() => break,
                    () = tokio::time::sleep(client.inner.event_interval) => {}
                }

                let current = match client.get_zone_settings(&zone).await {
                    Ok(settings) => settings,
                    Err(Error::UnexpectedStatus(502)) => {
                        debug!(zone = %zone.name, "transient 502, retrying");
                        continue;
                    }
                    Err(e) if e.is_unauthorized() => {
                        warn!(zone = %zone.name, "session expired, logging in again");
                        if let Err(e) = client.login().await {
                            warn!(zone = %zone.name, error = %e, "login failed, stopping event watcher");
                            break;
                        }
                        continue;
                    }
                    Err(e) => {
                        warn!(zone = %zone.name, error = %e, "failed to read zone settings");
                        continue;
                    }
                };

                for event in factor_events(&previous, &current) {
                    if tx.send(event).await.is_err() {
                        debug!(zone = %zone.name, "event receiver dropped");
                        return;
                    }
                }
                previous = current;
            }
            debug!(zone = %zone.name, "zone event watcher stopped");
        });

        Ok(rx)
    }

    fn write_generation(&self, zone_id: &str, factor: Factor) -> u64 {
        self.inner
            .writes
            .lock()
            .get(&(zone_id.to_string(), factor))
            .copied()
            .unwrap_or(0)
    }

    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let token = self.inner.token.lock().clone().ok_or(Error::NotConnected)?;
        let url = format!("{}{path}", self.inner.base_url);
        trace!(method = %method, url = %url, "request");
        if method != Method::GET {
            self.log(|logger| logger.log_request(method.as_str(), path, body));
        }

        let mut builder: RequestBuilder = self.inner.http.request(method, &url).bearer_auth(token);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let result = read_json(builder.send().await?).await;
        if matches!(result, Err(Error::Unauthorized)) {
            *self.inner.token.lock() = None;
        }
        result
    }

    fn log(&self, f: impl FnOnce(&mut MessageLogger)) {
        if let Some(ref logger) = self.inner.logger {
            f(&mut *logger.lock());
        }
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value> {
    match response.status().as_u16() {
        401 => Err(Error::Unauthorized),
        204 => Ok(Value::Null),
        s if !(200..300).contains(&s) => Err(Error::UnexpectedStatus(s)),
        _ => {
            let text = response.text().await?;
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            Ok(serde_json::from_str(&text)?)
        }
    }
}

fn within(current: f64, target: f64, tolerance: f64) -> bool {
    (current - target).abs() <= tolerance
}

#[async_trait]
impl ZoneService for HemisClient {
    async fn list_zones(&self) -> Result<Vec<Zone>> {
        HemisClient::list_zones(self).await
    }

    async fn get_zone_settings(&self, zone: &Zone) -> Result<ZoneSettings> {
        HemisClient::get_zone_settings(self, zone).await
    }

    async fn set_zone_factor(&self, request: SetFactorRequest) -> Result<SetOutcome> {
        HemisClient::set_zone_factor(self, request).await
    }

    async fn subscribe(&self, zone: &Zone) -> Result<mpsc::Receiver<FactorEvent>> {
        HemisClient::subscribe(self, zone).await
    }
}
