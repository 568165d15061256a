use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

const UNAVAILABLE_STATES: [&str; 3] = ["", "unknown", "unavailable"];

/// One host entity: its state string plus free-form attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub state: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl EntityState {
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn is_available(&self) -> bool {
        !UNAVAILABLE_STATES.contains(&self.state.trim().to_ascii_lowercase().as_str())
    }

    pub fn attribute_f64(&self, key: &str) -> Option<f64> {
        match self.attributes.get(key)? {
            Value::Number(number) => number.as_f64(),
            Value::String(raw) => raw.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|value| value.is_finite())
    }
}

/// Read side of the host's entity registry.
pub trait EntityReader {
    fn entity(&self, entity_id: &str) -> Option<&EntityState>;

    /// State string, or `None` for an empty id and unknown/unavailable entities.
    fn read_state(&self, entity_id: &str) -> Option<&str> {
        if entity_id.trim().is_empty() {
            return None;
        }
        self.entity(entity_id)
            .filter(|entity| entity.is_available())
            .map(|entity| entity.state.trim())
    }

    fn read_numeric(&self, entity_id: &str) -> Option<f64> {
        self.read_state(entity_id)?
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
    }

    fn read_optional(&self, entity_id: Option<&str>) -> Option<f64> {
        entity_id.and_then(|id| self.read_numeric(id))
    }
}

/// In-memory snapshot of host entities.
#[derive(Debug, Clone, Default)]
pub struct EntityStates {
    entities: HashMap<String, EntityState>,
}

impl EntityStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_state(&mut self, entity_id: &str, state: impl Into<String>) {
        self.entities
            .entry(entity_id.to_string())
            .or_default()
            .state = state.into();
    }

    pub fn set_attribute(&mut self, entity_id: &str, key: &str, value: impl Into<Value>) {
        self.entities
            .entry(entity_id.to_string())
            .or_default()
            .attributes
            .insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, entity_id: &str) -> Option<EntityState> {
        self.entities.remove(entity_id)
    }
}

impl EntityReader for EntityStates {
    fn entity(&self, entity_id: &str) -> Option<&EntityState> {
        self.entities.get(entity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_reads_reject_unusable_states() {
        let mut states = EntityStates::new();
        states.set_state("sensor.ok", " 21.5 ");
        states.set_state("sensor.unknown", "unknown");
        states.set_state("sensor.unavailable", "Unavailable");
        states.set_state("sensor.text", "warm");
        states.set_state("sensor.nan", "NaN");

        assert_eq!(states.read_numeric("sensor.ok"), Some(21.5));
        assert_eq!(states.read_numeric("sensor.unknown"), None);
        assert_eq!(states.read_numeric("sensor.unavailable"), None);
        assert_eq!(states.read_numeric("sensor.text"), None);
        assert_eq!(states.read_numeric("sensor.nan"), None);
        assert_eq!(states.read_numeric("sensor.missing"), None);
        assert_eq!(states.read_numeric(""), None);
        assert_eq!(states.read_optional(None), None);
    }

    #[test]
    fn removed_entities_read_as_unavailable() {
        let mut states = EntityStates::new();
        states.set_state("climate.daikin", "heat");
        states.set_attribute("climate.daikin", "temperature", 21.0);

        assert!(states.remove("climate.daikin").is_some());
        assert_eq!(states.read_state("climate.daikin"), None);
        assert!(states.entity("climate.daikin").is_none());
    }

    #[test]
    fn attributes_accept_numbers_and_numeric_strings() {
        let entity = EntityState::new("heat")
            .with_attribute("temperature", 21.0)
            .with_attribute("target_temp_high", "24.5")
            .with_attribute("fan_mode", "auto");

        assert_eq!(entity.attribute_f64("temperature"), Some(21.0));
        assert_eq!(entity.attribute_f64("target_temp_high"), Some(24.5));
        assert_eq!(entity.attribute_f64("fan_mode"), None);
        assert_eq!(entity.attribute_f64("missing"), None);
    }
}
