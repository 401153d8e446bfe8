use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;

use crate::diff::diff_json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLogMode {
    Full,
    /// First settings read per zone in full, then only the changed paths.
    Diffed,
}

impl MessageLogMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "full" => Some(MessageLogMode::Full),
            "diffed" => Some(MessageLogMode::Diffed),
            _ => None,
        }
    }
}

/// NDJSON log of the traffic with the backend.
pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    previous_settings: HashMap<String, Value>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            mode,
            file,
            previous_settings: HashMap::new(),
        })
    }

    pub fn log_request(&mut self, method: &str, path: &str, body: Option<&Value>) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "req",
            "method": method,
            "path": path,
            "body": body.map(redact),
        });
        self.write_line(&entry);
    }

    pub fn log_command(&mut self, action: &str, zone: &str, body: &Value) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "cmd",
            "action": action,
            "zone": zone,
            "body": body,
        });
        self.write_line(&entry);
    }

    pub fn log_settings(&mut self, zone: &str, status: u16, body: &Value) {
        let entry = match (self.mode, self.previous_settings.get(zone)) {
            (MessageLogMode::Full, _) => json!({
                "ts": Utc::now().to_rfc3339(),
                "dir": "settings",
                "zone": zone,
                "status": status,
                "body": body,
            }),
            (MessageLogMode::Diffed, None) => json!({
                "ts": Utc::now().to_rfc3339(),
                "dir": "settings",
                "zone": zone,
                "status": status,
                "full": true,
                "body": body,
            }),
            (MessageLogMode::Diffed, Some(previous)) => {
                let mut changes = Vec::new();
                diff_json(previous, body, "", &mut changes);
                let changes: Vec<Value> = changes
                    .iter()
                    .map(|(path, old, new)| json!({ "path": path, "old": old, "new": new }))
                    .collect();
                json!({
                    "ts": Utc::now().to_rfc3339(),
                    "dir": "settings",
                    "zone": zone,
                    "status": status,
                    "changes": changes,
                })
            }
        };
        self.write_line(&entry);
        if self.mode == MessageLogMode::Diffed {
            self.previous_settings.insert(zone.to_string(), body.clone());
        }
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!(error = %e, "failed to write message log entry");
        }
    }
}

fn redact(body: &Value) -> Value {
    let mut body = body.clone();
    if let Some(password) = body.get_mut("password") {
        *password = Value::String("***".into());
    }
    body
}
