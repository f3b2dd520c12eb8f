//! On-demand aggregate view over the hub's current state for the
//! domains wrist clients render on their watch faces.

use std::collections::HashMap;

use serde::Serialize;
use utoipa::ToSchema;

use crate::hub::{State, StateStore};

pub const DEFAULT_BATTERY_THRESHOLD: f64 = 20.0;
pub const MIN_BATTERY_THRESHOLD: f64 = 5.0;
pub const MAX_BATTERY_THRESHOLD: f64 = 95.0;

pub fn clamp_battery_threshold(requested: Option<f64>) -> f64 {
    requested
        .unwrap_or(DEFAULT_BATTERY_THRESHOLD)
        .clamp(MIN_BATTERY_THRESHOLD, MAX_BATTERY_THRESHOLD)
}

#[derive(Debug, Clone, Default)]
pub struct SummaryOptions {
    pub include_details: bool,
    pub battery_threshold: f64,
    pub entity_filter: Option<HashMap<String, Vec<String>>>,
}

impl SummaryOptions {
    pub fn new(
        include_details: bool,
        battery_threshold: Option<f64>,
        entity_filter: Option<HashMap<String, Vec<String>>>,
    ) -> Self {
        SummaryOptions {
            include_details,
            battery_threshold: clamp_battery_threshold(battery_threshold),
            entity_filter,
        }
    }

    fn filter_for(&self, domain_key: &str) -> Option<&Vec<String>> {
        self.entity_filter.as_ref()?.get(domain_key)
    }

    fn wants_details(&self, domain_key: &str) -> bool {
        self.include_details || self.filter_for(domain_key).is_some()
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EntityDetail {
    pub entity_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
}

impl EntityDetail {
    fn new(state: &State) -> Self {
        EntityDetail {
            entity_id: state.entity_id.clone(),
            name: state.friendly_name().to_string(),
            state: None,
            brightness: None,
            unit: None,
            level: None,
            device_class: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DomainSummary {
    pub count: usize,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<EntityDetail>>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InfoSummary {
    pub lights: DomainSummary,
    pub persons: DomainSummary,
    pub sensors: DomainSummary,
    pub binary_sensors: DomainSummary,
    pub battery: DomainSummary,
}

/// Build the aggregate projection from the current state machine.
pub fn project(states: &dyn StateStore, opts: &SummaryOptions) -> InfoSummary {
    let lights = filtered(states.all("light"), opts.filter_for("lights"));
    let persons = filtered(states.all("person"), opts.filter_for("persons"));
    let all_sensors = states.all("sensor");
    let (battery_sensors, plain_sensors): (Vec<State>, Vec<State>) = all_sensors
        .into_iter()
        .partition(|s| s.attribute_str("device_class") == Some("battery"));
    let sensors = filtered(plain_sensors, opts.filter_for("sensors"));
    let binary_sensors = filtered(states.all("binary_sensor"), opts.filter_for("binary_sensors"));
    let battery = filtered(battery_sensors, opts.filter_for("battery"));

    InfoSummary {
        lights: light_summary(&lights, opts.wants_details("lights")),
        persons: person_summary(&persons, opts.wants_details("persons")),
        sensors: sensor_summary(&sensors, opts.wants_details("sensors")),
        binary_sensors: binary_sensor_summary(
            &binary_sensors,
            opts.wants_details("binary_sensors"),
        ),
        battery: battery_summary(
            &battery,
            opts.battery_threshold,
            opts.wants_details("battery"),
        ),
    }
}

fn filtered(states: Vec<State>, allowed: Option<&Vec<String>>) -> Vec<State> {
    match allowed {
        Some(ids) => states
            .into_iter()
            .filter(|s| ids.contains(&s.entity_id))
            .collect(),
        None => states,
    }
}

fn light_summary(states: &[State], details: bool) -> DomainSummary {
    DomainSummary {
        count: states.iter().filter(|s| s.state == "on").count(),
        total: states.len(),
        details: details.then(|| {
            states
                .iter()
                .map(|s| {
                    let mut detail = EntityDetail::new(s);
                    detail.state = Some(s.state.clone());
                    detail.brightness = s.attribute_f64("brightness");
                    detail
                })
                .collect()
        }),
    }
}

fn person_summary(states: &[State], details: bool) -> DomainSummary {
    DomainSummary {
        count: states.iter().filter(|s| s.state == "home").count(),
        total: states.len(),
        details: details.then(|| {
            states
                .iter()
                .map(|s| {
                    let mut detail = EntityDetail::new(s);
                    detail.state = Some(s.state.clone());
                    detail
                })
                .collect()
        }),
    }
}

fn sensor_summary(states: &[State], details: bool) -> DomainSummary {
    DomainSummary {
        count: states.len(),
        total: states.len(),
        details: details.then(|| {
            states
                .iter()
                .map(|s| {
                    let mut detail = EntityDetail::new(s);
                    detail.state = Some(s.state.clone());
                    detail.unit = s
                        .attribute_str("unit_of_measurement")
                        .map(str::to_string);
                    detail.device_class =
                        s.attribute_str("device_class").map(str::to_string);
                    detail
                })
                .collect()
        }),
    }
}

fn binary_sensor_summary(states: &[State], details: bool) -> DomainSummary {
    DomainSummary {
        count: states.iter().filter(|s| s.state == "on").count(),
        total: states.len(),
        details: details.then(|| {
            states
                .iter()
                .map(|s| {
                    let mut detail = EntityDetail::new(s);
                    detail.state = Some(s.state.clone());
                    detail.device_class =
                        s.attribute_str("device_class").map(str::to_string);
                    detail
                })
                .collect()
        }),
    }
}

/// Battery level comes from parsing the state as a float; unparseable
/// states are excluded rather than counted as low.
fn battery_summary(states: &[State], threshold: f64, details: bool) -> DomainSummary {
    let mut levels: Vec<(&State, f64)> = states
        .iter()
        .filter_map(|s| s.state.parse::<f64>().ok().map(|level| (s, level)))
        .collect();
    levels.sort_by(|a, b| a.1.total_cmp(&b.1));

    DomainSummary {
        count: levels.iter().filter(|(_, level)| *level <= threshold).count(),
        total: levels.len(),
        details: details.then(|| {
            levels
                .iter()
                .map(|(s, level)| {
                    let mut detail = EntityDetail::new(s);
                    detail.level = Some(*level);
                    detail.unit = s
                        .attribute_str("unit_of_measurement")
                        .map(str::to_string);
                    detail
                })
                .collect()
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use maplit::hashmap;
    use test_case::test_case;

    use super::*;
    use crate::hub::memory::MemoryHub;
    use crate::hub::value::AttrValue;

    fn hub_with_fixture() -> Arc<MemoryHub> {
        let hub = MemoryHub::new();
        hub.set_state(
            State::new("light.kitchen", "on").with_attribute("brightness", AttrValue::Int(200)),
        );
        hub.set_state(State::new("light.hall", "off"));
        hub.set_state(State::new("person.ada", "home"));
        hub.set_state(State::new("person.grace", "work"));
        hub.set_state(
            State::new("sensor.temp", "21.5")
                .with_attribute("unit_of_measurement", AttrValue::String("°C".into())),
        );
        hub.set_state(
            State::new("sensor.watch_battery", "15")
                .with_attribute("device_class", AttrValue::String("battery".into())),
        );
        hub.set_state(
            State::new("sensor.phone_battery", "80")
                .with_attribute("device_class", AttrValue::String("battery".into())),
        );
        hub.set_state(
            State::new("sensor.broken_battery", "unavailable")
                .with_attribute("device_class", AttrValue::String("battery".into())),
        );
        hub.set_state(State::new("binary_sensor.door", "on"));
        hub
    }

    #[test]
    fn counts_per_domain() {
        let hub = hub_with_fixture();
        let summary = project(hub.as_ref(), &SummaryOptions::new(false, None, None));

        assert_eq!(summary.lights.count, 1);
        assert_eq!(summary.lights.total, 2);
        assert_eq!(summary.persons.count, 1);
        assert_eq!(summary.persons.total, 2);
        assert_eq!(summary.binary_sensors.count, 1);
        // Battery sensors are split out of the sensor domain.
        assert_eq!(summary.sensors.total, 1);
        // Unparseable battery state is excluded entirely.
        assert_eq!(summary.battery.total, 2);
        assert_eq!(summary.battery.count, 1);
        assert!(summary.lights.details.is_none());
    }

    #[test]
    fn details_on_request() {
        let hub = hub_with_fixture();
        let summary = project(hub.as_ref(), &SummaryOptions::new(true, None, None));

        let lights = summary.lights.details.unwrap();
        assert_eq!(lights.len(), 2);
        let kitchen = lights
            .iter()
            .find(|d| d.entity_id == "light.kitchen")
            .unwrap();
        assert_eq!(kitchen.brightness, Some(200.0));

        let battery = summary.battery.details.unwrap();
        // Ascending by level.
        assert_eq!(battery[0].entity_id, "sensor.watch_battery");
        assert_eq!(battery[0].level, Some(15.0));
        assert_eq!(battery[1].level, Some(80.0));
    }

    #[test]
    fn entity_filter_forces_details_for_that_domain() {
        let hub = hub_with_fixture();
        let opts = SummaryOptions::new(
            false,
            None,
            Some(hashmap! {
                "lights".to_string() => vec!["light.kitchen".to_string()],
            }),
        );
        let summary = project(hub.as_ref(), &opts);

        let lights = summary.lights.details.unwrap();
        assert_eq!(lights.len(), 1);
        assert_eq!(summary.lights.total, 1);
        assert!(summary.persons.details.is_none());
    }

    #[test_case(None, DEFAULT_BATTERY_THRESHOLD ; "default")]
    #[test_case(Some(1.0), MIN_BATTERY_THRESHOLD ; "clamps low")]
    #[test_case(Some(99.0), MAX_BATTERY_THRESHOLD ; "clamps high")]
    #[test_case(Some(50.0), 50.0 ; "in range passes")]
    fn battery_threshold_clamps(requested: Option<f64>, expected: f64) {
        assert_eq!(clamp_battery_threshold(requested), expected);
    }

    #[test]
    fn battery_threshold_changes_low_count() {
        let hub = hub_with_fixture();
        let summary = project(hub.as_ref(), &SummaryOptions::new(false, Some(90.0), None));
        assert_eq!(summary.battery.count, 2);
    }
}
