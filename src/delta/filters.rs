use std::collections::HashMap;

use lazy_static::lazy_static;
use serde_json::{Map, Value};

lazy_static! {
    /// Attribute names kept per domain when a watch polls with
    /// `slim=true`. Domains without an entry pass through untouched.
    static ref SLIM_ATTRIBUTES: HashMap<&'static str, &'static [&'static str]> = {
        let mut table: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
        table.insert(
            "light",
            &[
                "brightness",
                "color_mode",
                "color_temp_kelvin",
                "effect",
                "friendly_name",
                "hs_color",
                "rgb_color",
                "supported_color_modes",
                "supported_features",
            ][..],
        );
        table.insert(
            "climate",
            &[
                "current_humidity",
                "current_temperature",
                "fan_mode",
                "fan_modes",
                "friendly_name",
                "humidity",
                "hvac_action",
                "hvac_modes",
                "max_humidity",
                "max_temp",
                "min_humidity",
                "min_temp",
                "preset_mode",
                "preset_modes",
                "target_temp_high",
                "target_temp_low",
                "temperature",
            ][..],
        );
        table.insert(
            "sensor",
            &[
                "device_class",
                "friendly_name",
                "state_class",
                "unit_of_measurement",
            ][..],
        );
        table.insert(
            "binary_sensor",
            &["device_class", "friendly_name"][..],
        );
        table.insert(
            "media_player",
            &[
                "friendly_name",
                "media_artist",
                "media_duration",
                "media_position",
                "media_title",
                "source",
                "source_list",
                "volume_level",
            ][..],
        );
        table.insert(
            "cover",
            &[
                "current_position",
                "current_tilt_position",
                "device_class",
                "friendly_name",
            ][..],
        );
        table.insert("person", &["friendly_name", "source"][..]);
        table
    };
}

fn domain_of(entity_id: &str) -> &str {
    entity_id.split('.').next().unwrap_or("")
}

/// Filter the `new_state.attributes` map of a rendered payload down to
/// the per-domain whitelist. Payloads for unknown domains come back
/// unchanged.
pub fn slim_payload(payload: &Value) -> Value {
    let entity_id = payload
        .get("entity_id")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let Some(allowed) = SLIM_ATTRIBUTES.get(domain_of(entity_id)) else {
        return payload.clone();
    };

    let mut slimmed = payload.clone();
    if let Some(attributes) = slimmed
        .get_mut("new_state")
        .and_then(|s| s.get_mut("attributes"))
        .and_then(Value::as_object_mut)
    {
        let kept: Map<String, Value> = attributes
            .iter()
            .filter(|(name, _)| allowed.contains(&name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        *attributes = kept;
    }
    slimmed
}
