use serde_json::{json, Value};

use crate::types::{Factor, Zone, ZoneSettings};
use crate::{Error, Result};

pub const LOGIN_PATH: &str = "/WS_UserManagement/login";
pub const ZONES_PATH: &str = "/WS_ZoneManagement/zones";

pub fn zone_settings_path(zone_id: &str) -> String {
    format!("{ZONES_PATH}/{zone_id}/settings")
}

pub fn factor_state_path(zone_id: &str, factor: Factor) -> String {
    format!("/WS_ReactiveEnvironmentDataManagement/{zone_id}/actuators/factors/{factor}/state")
}

pub fn login_body(email: &str, password: &str) -> Value {
    json!({
        "email": email,
        "password": password,
    })
}

pub fn factor_state_body(value: f64) -> Value {
    json!({ "value": value })
}

pub fn parse_login_response(body: &Value) -> Result<String> {
    body.get("token")
        .and_then(|v| v.as_str())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::Protocol("login response without token".into()))
}

/// Zones come back either as a bare array or wrapped in `{"zones": [...]}`.
pub fn parse_zones(body: &Value) -> Result<Vec<Zone>> {
    let list = match body {
        Value::Array(_) => body,
        _ => body
            .get("zones")
            .ok_or_else(|| Error::Protocol("zone list missing".into()))?,
    };
    let zones: Vec<Zone> = serde_json::from_value(list.clone())?;
    Ok(zones)
}

/// Settings come back as `{"settings": {"BRI": {"value": ..}, ..}}` or as the
/// bare factor map.
pub fn parse_zone_settings(body: &Value) -> Result<ZoneSettings> {
    let map = body.get("settings").unwrap_or(body);
    if !map.is_object() {
        return Err(Error::Protocol(format!("zone settings is not an object: {map}")));
    }
    Ok(serde_json::from_value(map.clone())?)
}
