use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{cop::CopCurve, schedule::ComfortSchedule};

pub const DEFAULT_HYSTERESIS_C: f64 = 0.5;
pub const DEFAULT_BATTERY_THRESHOLD_PCT: f64 = 30.0;
pub const DEFAULT_GAS_PRICE: f64 = 0.085;
pub const DEFAULT_MIN_RUNTIME_MIN: u32 = 5;
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 60;
pub const SUMMER_OUTSIDE_FALLBACK_C: f64 = 25.0;
pub const WINTER_OUTSIDE_FALLBACK_C: f64 = 7.0;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("room #{index} has an empty name")]
    EmptyRoomName { index: usize },
    #[error("room '{room}' appears more than once")]
    DuplicateRoom { room: String },
    #[error("room '{room}' has no temperature sensor")]
    MissingTemperatureSensor { room: String },
    #[error("room '{room}' has a non-finite COP calibration value")]
    InvalidCop { room: String },
    #[error("room '{room}' has an invalid comfort schedule")]
    InvalidComfortSchedule { room: String },
    #[error("tariff tier {tier} has no consumption price entity")]
    MissingTierPrice { tier: u8 },
    #[error("off-peak hours must be within 0..24 (got {start}..{end})")]
    InvalidOffPeak { start: u8, end: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TariffMode {
    Single,
    Dual,
    Triple,
}

impl TariffMode {
    pub fn tiers(self) -> u8 {
        match self {
            Self::Single => 1,
            Self::Dual => 2,
            Self::Triple => 3,
        }
    }
}

/// How rooms receive their requested mode and setpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingKind {
    /// Thermostat owned by this process.
    Virtual,
    /// Switch driven by an external thermostat controller.
    PassThrough,
}

impl BindingKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Virtual => "virtual",
            Self::PassThrough => "pass_through",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierEntities {
    #[serde(rename = "consumptionPrice", default)]
    pub consumption_price: Option<String>,
    #[serde(rename = "injectionPrice", default)]
    pub injection_price: Option<String>,
}

/// Night/weekend heuristic used when no tariff sensor is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffPeakWindow {
    #[serde(rename = "startHour")]
    pub start_hour: u8,
    #[serde(rename = "endHour")]
    pub end_hour: u8,
    pub weekends: bool,
}

impl Default for OffPeakWindow {
    fn default() -> Self {
        Self {
            start_hour: 22,
            end_hour: 7,
            weekends: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    #[serde(rename = "tariffMode")]
    pub tariff_mode: TariffMode,
    #[serde(rename = "tariffSensor")]
    pub tariff_sensor: Option<String>,
    #[serde(rename = "offPeak")]
    pub off_peak: Option<OffPeakWindow>,
    /// Index 0 is tier 1.
    pub tiers: Vec<TierEntities>,
    #[serde(rename = "gasPriceEntity")]
    pub gas_price_entity: Option<String>,
    #[serde(rename = "gasPriceFallback")]
    pub gas_price_fallback: f64,
    #[serde(rename = "outsideTempEntity")]
    pub outside_temp_entity: Option<String>,
    /// Overrides the season-dependent fallback.
    #[serde(rename = "outsideTempFallback")]
    pub outside_temp_fallback: Option<f64>,
    #[serde(rename = "batteryEntity")]
    pub battery_entity: Option<String>,
    #[serde(rename = "batteryThresholdEntity")]
    pub battery_threshold_entity: Option<String>,
    #[serde(rename = "batteryThreshold")]
    pub battery_threshold_pct: f64,
    #[serde(rename = "gridPowerEntity")]
    pub grid_power_entity: Option<String>,
    #[serde(rename = "summerModeEntity")]
    pub summer_mode_entity: Option<String>,
    pub hysteresis: f64,
    pub binding: BindingKind,
    #[serde(rename = "scanIntervalSecs")]
    pub scan_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tariff_mode: TariffMode::Single,
            tariff_sensor: None,
            off_peak: None,
            tiers: Vec::new(),
            gas_price_entity: None,
            gas_price_fallback: DEFAULT_GAS_PRICE,
            outside_temp_entity: None,
            outside_temp_fallback: None,
            battery_entity: None,
            battery_threshold_entity: None,
            battery_threshold_pct: DEFAULT_BATTERY_THRESHOLD_PCT,
            grid_power_entity: None,
            summer_mode_entity: None,
            hysteresis: DEFAULT_HYSTERESIS_C,
            binding: BindingKind::PassThrough,
            scan_interval_secs: DEFAULT_SCAN_INTERVAL_SECS,
        }
    }
}

impl EngineConfig {
    pub fn sanitize(&mut self) {
        if !self.hysteresis.is_finite() {
            self.hysteresis = DEFAULT_HYSTERESIS_C;
        }
        self.hysteresis = self.hysteresis.clamp(0.0, 5.0);

        if !self.battery_threshold_pct.is_finite() {
            self.battery_threshold_pct = DEFAULT_BATTERY_THRESHOLD_PCT;
        }
        self.battery_threshold_pct = self.battery_threshold_pct.clamp(0.0, 100.0);

        if !self.gas_price_fallback.is_finite() || self.gas_price_fallback <= 0.0 {
            self.gas_price_fallback = DEFAULT_GAS_PRICE;
        }

        if self.scan_interval_secs == 0 {
            self.scan_interval_secs = DEFAULT_SCAN_INTERVAL_SECS;
        }
    }

    /// Entities for tier `index` (1-based).
    pub fn tier(&self, index: u8) -> Option<&TierEntities> {
        self.tiers.get(usize::from(index).checked_sub(1)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for tier in 1..=self.tariff_mode.tiers() {
            let has_price = self
                .tier(tier)
                .and_then(|entities| entities.consumption_price.as_deref())
                .is_some_and(|id| !id.trim().is_empty());
            if !has_price {
                return Err(ConfigError::MissingTierPrice { tier });
            }
        }

        if let Some(window) = self.off_peak {
            if window.start_hour > 23 || window.end_hour > 23 {
                return Err(ConfigError::InvalidOffPeak {
                    start: window.start_hour,
                    end: window.end_hour,
                });
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomConfig {
    pub name: String,
    #[serde(rename = "heatPump", default)]
    pub heat_pump: Option<String>,
    #[serde(default)]
    pub gas: Option<String>,
    #[serde(rename = "tempSensor")]
    pub temp_sensor: String,
    #[serde(default)]
    pub cop: CopCurve,
    #[serde(rename = "minRuntimeMin", default = "default_min_runtime")]
    pub min_runtime_min: u32,
    #[serde(default)]
    pub comfort: Option<ComfortSchedule>,
}

fn default_min_runtime() -> u32 {
    DEFAULT_MIN_RUNTIME_MIN
}

impl RoomConfig {
    pub fn new(name: impl Into<String>, temp_sensor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            heat_pump: None,
            gas: None,
            temp_sensor: temp_sensor.into(),
            cop: CopCurve::default(),
            min_runtime_min: DEFAULT_MIN_RUNTIME_MIN,
            comfort: None,
        }
    }

    pub fn heat_pump_id(&self) -> Option<&str> {
        self.heat_pump.as_deref().filter(|id| !id.trim().is_empty())
    }

    pub fn gas_id(&self) -> Option<&str> {
        self.gas.as_deref().filter(|id| !id.trim().is_empty())
    }

    pub fn min_runtime_ms(&self) -> u64 {
        u64::from(self.min_runtime_min) * 60_000
    }

    pub fn validate(&self, index: usize) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyRoomName { index });
        }
        if self.temp_sensor.trim().is_empty() {
            return Err(ConfigError::MissingTemperatureSensor {
                room: self.name.clone(),
            });
        }
        if !self.cop.is_finite() {
            return Err(ConfigError::InvalidCop {
                room: self.name.clone(),
            });
        }
        if self.comfort.as_ref().is_some_and(|comfort| !comfort.validate()) {
            return Err(ConfigError::InvalidComfortSchedule {
                room: self.name.clone(),
            });
        }
        Ok(())
    }
}

pub fn validate_rooms(rooms: &[RoomConfig]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for (index, room) in rooms.iter().enumerate() {
        room.validate(index)?;
        if !seen.insert(room.name.trim().to_ascii_lowercase()) {
            return Err(ConfigError::DuplicateRoom {
                room: room.name.clone(),
            });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub client_id: String,
    /// Base topic of the host's state stream.
    pub statestream_base: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            client_id: "energy-arbiter".to_string(),
            statestream_base: "homeassistant".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub engine: EngineConfig,
    pub rooms: Vec<RoomConfig>,
    pub network: NetworkConfig,
    pub timezone: String,
    pub http_port: u16,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            rooms: Vec::new(),
            network: NetworkConfig::default(),
            timezone: "Europe/Brussels".to_string(),
            http_port: 8080,
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;
        validate_rooms(&self.rooms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn room_defaults_fill_optional_fields() {
        let room: RoomConfig =
            serde_json::from_str(r#"{"name": "Living", "tempSensor": "sensor.living"}"#).unwrap();

        assert_eq!(room.min_runtime_min, 5);
        assert_eq!(room.cop, CopCurve::default());
        assert_eq!(room.heat_pump_id(), None);
        assert_eq!(room.min_runtime_ms(), 300_000);
    }

    #[test]
    fn blank_device_ids_count_as_absent() {
        let mut room = RoomConfig::new("Office", "sensor.office");
        room.heat_pump = Some("  ".to_string());
        room.gas = Some("climate.boiler".to_string());

        assert_eq!(room.heat_pump_id(), None);
        assert_eq!(room.gas_id(), Some("climate.boiler"));
    }

    #[test]
    fn sanitize_restores_defaults() {
        let mut config = EngineConfig {
            hysteresis: f64::NAN,
            battery_threshold_pct: 140.0,
            gas_price_fallback: 0.0,
            scan_interval_secs: 0,
            ..EngineConfig::default()
        };
        config.sanitize();

        assert_eq!(config.hysteresis, DEFAULT_HYSTERESIS_C);
        assert_eq!(config.battery_threshold_pct, 100.0);
        assert_eq!(config.gas_price_fallback, DEFAULT_GAS_PRICE);
        assert_eq!(config.scan_interval_secs, DEFAULT_SCAN_INTERVAL_SECS);
    }

    #[test]
    fn validation_requires_price_per_selectable_tier() {
        let mut config = EngineConfig {
            tariff_mode: TariffMode::Dual,
            tiers: vec![TierEntities {
                consumption_price: Some("sensor.price_day".to_string()),
                injection_price: None,
            }],
            ..EngineConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingTierPrice { tier: 2 })
        );

        config.tiers.push(TierEntities {
            consumption_price: Some("sensor.price_night".to_string()),
            injection_price: None,
        });
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn rejects_invalid_rooms() {
        let rooms = vec![
            RoomConfig::new("Living", "sensor.living"),
            RoomConfig::new("living", "sensor.other"),
        ];
        assert_eq!(
            validate_rooms(&rooms),
            Err(ConfigError::DuplicateRoom {
                room: "living".to_string()
            })
        );

        let rooms = vec![RoomConfig::new("Attic", " ")];
        assert_eq!(
            validate_rooms(&rooms),
            Err(ConfigError::MissingTemperatureSensor {
                room: "Attic".to_string()
            })
        );

        let mut room = RoomConfig::new("Cellar", "sensor.cellar");
        room.cop.cop_0 = f64::INFINITY;
        assert_eq!(
            validate_rooms(&[room]),
            Err(ConfigError::InvalidCop {
                room: "Cellar".to_string()
            })
        );
    }
}
