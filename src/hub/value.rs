use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Number, Value};

/// Tagged attribute value as exposed by the hub's state machine.
///
/// Scalars and containers map directly onto JSON. `Timestamp` and
/// `Duration` carry typed values the hub hands out for datetime-ish
/// attributes; `Opaque` covers everything else, holding the source
/// object's displayable form and, when the object exposes one, an
/// inner value to prefer over the display string.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<AttrValue>),
    Map(BTreeMap<String, AttrValue>),
    Timestamp(DateTime<Utc>),
    Duration(Duration),
    Opaque {
        display: String,
        value: Option<Box<AttrValue>>,
    },
}

impl AttrValue {
    pub fn from_json(value: &Value) -> AttrValue {
        match value {
            Value::Null => AttrValue::Null,
            Value::Bool(b) => AttrValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    AttrValue::Int(i)
                } else {
                    AttrValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => AttrValue::String(s.clone()),
            Value::Array(items) => AttrValue::List(items.iter().map(AttrValue::from_json).collect()),
            Value::Object(map) => AttrValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), AttrValue::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl<'de> Deserialize<'de> for AttrValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(AttrValue::from_json(&Value::deserialize(deserializer)?))
    }
}

/// Reduce an attribute value to its JSON-safe rendering. Happens once
/// per state change at ingest time so every subscriber shares one
/// serialization.
pub fn to_json_value(value: &AttrValue) -> Value {
    match value {
        AttrValue::Null => Value::Null,
        AttrValue::Bool(b) => Value::Bool(*b),
        AttrValue::Int(i) => Value::Number((*i).into()),
        AttrValue::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        AttrValue::String(s) => Value::String(s.clone()),
        AttrValue::List(items) => Value::Array(items.iter().map(to_json_value).collect()),
        AttrValue::Map(entries) => Value::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), to_json_value(v)))
                .collect(),
        ),
        AttrValue::Timestamp(ts) => Value::String(ts.to_rfc3339()),
        AttrValue::Duration(d) => {
            let seconds = d.num_milliseconds() as f64 / 1000.0;
            Number::from_f64(seconds).map(Value::Number).unwrap_or(Value::Null)
        }
        AttrValue::Opaque { display, value } => match value {
            Some(inner) => to_json_value(inner),
            None => Value::String(display.clone()),
        },
    }
}

pub fn attributes_to_json(attributes: &BTreeMap<String, AttrValue>) -> Value {
    Value::Object(
        attributes
            .iter()
            .map(|(k, v)| (k.clone(), to_json_value(v)))
            .collect::<Map<String, Value>>(),
    )
}
