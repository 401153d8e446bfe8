use serde_json::{Map, Value};

use crate::types::{Factor, FactorEvent, ZoneSettings};

/// `(path, old, new)` for one changed leaf.
pub(crate) type Change = (String, Value, Value);

/// Collects changed leaves of `current` relative to `previous`, as
/// dot-separated paths. Keys that disappeared are not reported.
pub(crate) fn diff_json(
    previous: &Value,
    current: &Value,
    path_prefix: &str,
    changes: &mut Vec<Change>,
) {
    match (previous, current) {
        (Value::Object(prev_map), Value::Object(curr_map)) => {
            for (key, curr_val) in curr_map {
                let path = if path_prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{path_prefix}.{key}")
                };
                match prev_map.get(key) {
                    Some(prev_val) => diff_json(prev_val, curr_val, &path, changes),
                    None if curr_val.is_object() => {
                        diff_json(&Value::Object(Map::new()), curr_val, &path, changes);
                    }
                    None => changes.push((path, Value::Null, curr_val.clone())),
                }
            }
        }
        (prev, curr) if prev != curr => {
            changes.push((path_prefix.to_string(), prev.clone(), curr.clone()));
        }
        _ => {}
    }
}

/// Maps a `<FACTOR>.value` change to an event. Metadata changes and factors
/// this bridge does not drive yield nothing.
fn factor_event(path: &str, value: &Value) -> Option<FactorEvent> {
    let (factor, field) = path.split_once('.')?;
    if field != "value" {
        return None;
    }
    Some(FactorEvent {
        factor: Factor::from_remote_str(factor)?,
        value: value.as_f64()?,
    })
}

/// One event per driven factor whose value differs between two settings reads.
pub fn factor_events(previous: &ZoneSettings, current: &ZoneSettings) -> Vec<FactorEvent> {
    let (previous, current) = (serde_json::to_value(previous), serde_json::to_value(current));
    let (Ok(previous), Ok(current)) = (previous, current) else {
        return Vec::new();
    };
    let mut changes = Vec::new();
    diff_json(&previous, &current, "", &mut changes);
    changes
        .iter()
        .filter_map(|(path, _old, new)| factor_event(path, new))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn diff_detects_leaf_change() {
        let prev = json!({"BRI": {"value": 0.0}});
        let curr = json!({"BRI": {"value": 1.0}});
        let mut changes = vec![];
        diff_json(&prev, &curr, "", &mut changes);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0, "BRI.value");
        assert_eq!(changes[0].1, json!(0.0));
        assert_eq!(changes[0].2, json!(1.0));
    }

    #[test]
    fn diff_ignores_unchanged() {
        let val = json!({"BRI": {"value": 0.5, "unit": "%"}});
        let mut changes = vec![];
        diff_json(&val, &val, "", &mut changes);
        assert!(changes.is_empty());
    }

    #[test]
    fn diff_detects_new_key() {
        let prev = json!({});
        let curr = json!({"BRIEXT": {"value": 0.3}});
        let mut changes = vec![];
        diff_json(&prev, &curr, "", &mut changes);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0, "BRIEXT.value");
        assert_eq!(changes[0].1, Value::Null);
    }

    #[test]
    fn events_for_changed_factor_values_only() {
        let previous = ZoneSettings::new()
            .with(Factor::Brightness, 0.0)
            .with(Factor::ExternalBrightness, 0.4);
        let current = ZoneSettings::new()
            .with(Factor::Brightness, 1.0)
            .with(Factor::ExternalBrightness, 0.4);
        assert_eq!(
            factor_events(&previous, &current),
            vec![FactorEvent {
                factor: Factor::Brightness,
                value: 1.0
            }]
        );
    }

    #[test]
    fn metadata_and_unknown_factors_are_ignored() {
        let previous: ZoneSettings = serde_json::from_value(json!({
            "BRI": {"value": 1.0, "unit": "%"},
            "TMP": {"value": 20.0}
        }))
        .unwrap();
        let current: ZoneSettings = serde_json::from_value(json!({
            "BRI": {"value": 1.0, "unit": "lux"},
            "TMP": {"value": 21.0}
        }))
        .unwrap();
        assert!(factor_events(&previous, &current).is_empty());
    }

    #[test]
    fn newly_reported_factor_is_an_event() {
        let previous = ZoneSettings::new();
        let current = ZoneSettings::new().with(Factor::ExternalBrightness, 0.7);
        let events = factor_events(&previous, &current);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].factor, Factor::ExternalBrightness);
        assert_eq!(events[0].value, 0.7);
    }
}
