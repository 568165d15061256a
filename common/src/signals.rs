use chrono::{DateTime, Datelike, FixedOffset, Timelike, Weekday};
use serde::Serialize;
use thiserror::Error;

use crate::{
    config::{EngineConfig, OffPeakWindow, TariffMode, SUMMER_OUTSIDE_FALLBACK_C, WINTER_OUTSIDE_FALLBACK_C},
    entities::EntityReader,
    types::Season,
};

/// Grid power below this (W, negative = export) counts as solar surplus.
pub const SOLAR_EXPORT_THRESHOLD_W: f64 = -500.0;

const NORMAL_TARIFF: u8 = 2;

#[derive(Debug, Error, PartialEq)]
pub enum CycleError {
    #[error("no consumption price available for tariff tier {tariff}")]
    ConsumptionPriceUnavailable { tariff: u8 },
}

/// Signals shared by every room for one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalContext {
    pub tariff: u8,
    #[serde(rename = "consumptionPrice")]
    pub consumption_price: f64,
    #[serde(rename = "injectionPrice")]
    pub injection_price: Option<f64>,
    /// Electricity price used for heat-pump costs.
    #[serde(rename = "effectivePrice")]
    pub effective_price: f64,
    #[serde(rename = "gasPrice")]
    pub gas_price: f64,
    #[serde(rename = "outsideTemp")]
    pub outside_temp: f64,
    #[serde(rename = "batterySoc")]
    pub battery_soc: Option<f64>,
    #[serde(rename = "batteryThreshold")]
    pub battery_threshold: f64,
    #[serde(rename = "batteryForced")]
    pub battery_forced: bool,
    #[serde(rename = "gridPowerW")]
    pub grid_power_w: Option<f64>,
    #[serde(rename = "solarExporting")]
    pub solar_exporting: bool,
    pub season: Season,
}

pub fn parse_tariff(raw: &str) -> Option<u8> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "1.0" | "low" | "night" | "off_peak" | "eco" => Some(1),
        "2" | "2.0" | "normal" | "day" | "peak" => Some(2),
        "3" | "3.0" | "high" | "super_peak" => Some(3),
        _ => None,
    }
}

pub fn is_off_peak(window: &OffPeakWindow, local: DateTime<FixedOffset>) -> bool {
    if window.weekends && matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
        return true;
    }

    let hour = local.hour();
    let start = u32::from(window.start_hour);
    let end = u32::from(window.end_hour);
    if start == end {
        false
    } else if start < end {
        (start..end).contains(&hour)
    } else {
        hour >= start || hour < end
    }
}

pub fn active_tariff<R: EntityReader>(
    config: &EngineConfig,
    states: &R,
    local: DateTime<FixedOffset>,
) -> u8 {
    if config.tariff_mode == TariffMode::Single {
        return 1;
    }

    let tariff = match config.tariff_sensor.as_deref() {
        Some(sensor) => states
            .read_state(sensor)
            .and_then(parse_tariff)
            .unwrap_or(NORMAL_TARIFF),
        None => match config.off_peak {
            Some(window) if is_off_peak(&window, local) => 1,
            _ => NORMAL_TARIFF,
        },
    };

    tariff.min(config.tariff_mode.tiers())
}

pub fn resolve_season<R: EntityReader>(config: &EngineConfig, states: &R) -> Season {
    let summer = config
        .summer_mode_entity
        .as_deref()
        .and_then(|id| states.read_state(id))
        .is_some_and(|state| state.eq_ignore_ascii_case("on"));

    if summer {
        Season::Summer
    } else {
        Season::Winter
    }
}

/// Builds the cycle context; fails only when the consumption price is unknown.
pub fn resolve<R: EntityReader>(
    config: &EngineConfig,
    states: &R,
    local: DateTime<FixedOffset>,
) -> Result<GlobalContext, CycleError> {
    let tariff = active_tariff(config, states, local);
    let tier = config.tier(tariff);

    let consumption_price = states
        .read_optional(tier.and_then(|t| t.consumption_price.as_deref()))
        .ok_or(CycleError::ConsumptionPriceUnavailable { tariff })?;
    let injection_price = states.read_optional(tier.and_then(|t| t.injection_price.as_deref()));

    let gas_price = states
        .read_optional(config.gas_price_entity.as_deref())
        .filter(|price| *price > 0.0)
        .unwrap_or(config.gas_price_fallback);

    let season = resolve_season(config, states);
    let outside_temp = states
        .read_optional(config.outside_temp_entity.as_deref())
        .unwrap_or_else(|| {
            config.outside_temp_fallback.unwrap_or(match season {
                Season::Summer => SUMMER_OUTSIDE_FALLBACK_C,
                Season::Winter => WINTER_OUTSIDE_FALLBACK_C,
            })
        });

    let battery_threshold = states
        .read_optional(config.battery_threshold_entity.as_deref())
        .unwrap_or(config.battery_threshold_pct);
    let battery_soc = states.read_optional(config.battery_entity.as_deref());
    let battery_forced = battery_soc.is_some_and(|soc| soc > battery_threshold);

    let grid_power_w = states.read_optional(config.grid_power_entity.as_deref());
    let exporting = grid_power_w.is_some_and(|power| power < SOLAR_EXPORT_THRESHOLD_W);
    let (effective_price, solar_exporting) = match injection_price {
        Some(price) if exporting => (price, true),
        _ => (consumption_price, false),
    };

    Ok(GlobalContext {
        tariff,
        consumption_price,
        injection_price,
        effective_price,
        gas_price,
        outside_temp,
        battery_soc,
        battery_threshold,
        battery_forced,
        grid_power_w,
        solar_exporting,
        season,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::TierEntities, entities::EntityStates};
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<FixedOffset> {
        // Jan 5, 2026 is a Monday.
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2026, 1, day, hour, 0, 0)
            .unwrap()
    }

    fn tier(consumption: &str, injection: &str) -> TierEntities {
        TierEntities {
            consumption_price: Some(consumption.to_string()),
            injection_price: Some(injection.to_string()),
        }
    }

    fn triple_config() -> EngineConfig {
        EngineConfig {
            tariff_mode: TariffMode::Triple,
            tariff_sensor: Some("sensor.tariff".to_string()),
            tiers: vec![
                tier("sensor.price_t1", "sensor.inj_t1"),
                tier("sensor.price_t2", "sensor.inj_t2"),
                tier("sensor.price_t3", "sensor.inj_t3"),
            ],
            gas_price_entity: Some("sensor.gas_price".to_string()),
            outside_temp_entity: Some("sensor.outside".to_string()),
            battery_entity: Some("sensor.soc".to_string()),
            grid_power_entity: Some("sensor.grid".to_string()),
            summer_mode_entity: Some("input_boolean.summer".to_string()),
            ..EngineConfig::default()
        }
    }

    fn base_states() -> EntityStates {
        let mut states = EntityStates::new();
        states.set_state("sensor.price_t1", "0.18");
        states.set_state("sensor.price_t2", "0.25");
        states.set_state("sensor.price_t3", "0.40");
        states.set_state("sensor.inj_t2", "0.04");
        states
    }

    #[test]
    fn maps_textual_tariffs() {
        assert_eq!(parse_tariff("night"), Some(1));
        assert_eq!(parse_tariff(" OFF_PEAK "), Some(1));
        assert_eq!(parse_tariff("2.0"), Some(2));
        assert_eq!(parse_tariff("peak"), Some(2));
        assert_eq!(parse_tariff("super_peak"), Some(3));
        assert_eq!(parse_tariff("shoulder"), None);
    }

    #[test]
    fn tariff_falls_back_to_normal() {
        let config = triple_config();
        let mut states = base_states();

        assert_eq!(active_tariff(&config, &states, at(5, 12)), 2);
        states.set_state("sensor.tariff", "unavailable");
        assert_eq!(active_tariff(&config, &states, at(5, 12)), 2);
        states.set_state("sensor.tariff", "mystery");
        assert_eq!(active_tariff(&config, &states, at(5, 12)), 2);
        states.set_state("sensor.tariff", "high");
        assert_eq!(active_tariff(&config, &states, at(5, 12)), 3);
    }

    #[test]
    fn single_rate_ignores_sensor() {
        let mut config = triple_config();
        config.tariff_mode = TariffMode::Single;
        let mut states = base_states();
        states.set_state("sensor.tariff", "3");

        assert_eq!(active_tariff(&config, &states, at(5, 12)), 1);
    }

    #[test]
    fn dual_rate_never_selects_third_tier() {
        let mut config = triple_config();
        config.tariff_mode = TariffMode::Dual;
        let mut states = base_states();
        states.set_state("sensor.tariff", "super_peak");

        assert_eq!(active_tariff(&config, &states, at(5, 12)), 2);
    }

    #[test]
    fn off_peak_heuristic_without_sensor() {
        let mut config = triple_config();
        config.tariff_mode = TariffMode::Dual;
        config.tariff_sensor = None;
        let states = base_states();

        assert_eq!(active_tariff(&config, &states, at(5, 23)), 2);

        config.off_peak = Some(OffPeakWindow::default());
        assert_eq!(active_tariff(&config, &states, at(5, 23)), 1);
        assert_eq!(active_tariff(&config, &states, at(5, 6)), 1);
        assert_eq!(active_tariff(&config, &states, at(5, 12)), 2);
        // Saturday noon.
        assert_eq!(active_tariff(&config, &states, at(10, 12)), 1);
    }

    #[test]
    fn missing_consumption_price_aborts() {
        let config = triple_config();
        let mut states = base_states();
        states.set_state("sensor.price_t2", "unknown");

        assert_eq!(
            resolve(&config, &states, at(5, 12)),
            Err(CycleError::ConsumptionPriceUnavailable { tariff: 2 })
        );
    }

    #[test]
    fn optional_signals_use_defaults() {
        let config = triple_config();
        let states = base_states();

        let context = resolve(&config, &states, at(5, 12)).unwrap();

        assert_eq!(context.tariff, 2);
        assert_eq!(context.consumption_price, 0.25);
        assert_eq!(context.gas_price, 0.085);
        assert_eq!(context.season, Season::Winter);
        assert_eq!(context.outside_temp, WINTER_OUTSIDE_FALLBACK_C);
        assert_eq!(context.battery_soc, None);
        assert!(!context.battery_forced);
        assert!(!context.solar_exporting);
        assert_eq!(context.effective_price, 0.25);
    }

    #[test]
    fn summer_fallback_outdoor_temperature() {
        let config = triple_config();
        let mut states = base_states();
        states.set_state("input_boolean.summer", "on");

        let context = resolve(&config, &states, at(5, 12)).unwrap();

        assert_eq!(context.season, Season::Summer);
        assert_eq!(context.outside_temp, SUMMER_OUTSIDE_FALLBACK_C);
    }

    #[test]
    fn zero_gas_price_is_treated_as_missing() {
        let config = triple_config();
        let mut states = base_states();
        states.set_state("sensor.gas_price", "0");

        let context = resolve(&config, &states, at(5, 12)).unwrap();
        assert_eq!(context.gas_price, 0.085);

        states.set_state("sensor.gas_price", "0.11");
        let context = resolve(&config, &states, at(5, 12)).unwrap();
        assert_eq!(context.gas_price, 0.11);
    }

    #[test]
    fn battery_forced_above_threshold() {
        let mut config = triple_config();
        config.battery_threshold_entity = Some("input_number.soc_threshold".to_string());
        let mut states = base_states();
        states.set_state("sensor.soc", "30");

        assert!(!resolve(&config, &states, at(5, 12)).unwrap().battery_forced);

        states.set_state("sensor.soc", "31");
        assert!(resolve(&config, &states, at(5, 12)).unwrap().battery_forced);

        states.set_state("input_number.soc_threshold", "80");
        let context = resolve(&config, &states, at(5, 12)).unwrap();
        assert!(!context.battery_forced);
        assert_eq!(context.battery_threshold, 80.0);
    }

    #[test]
    fn export_switches_to_injection_price() {
        let config = triple_config();
        let mut states = base_states();

        states.set_state("sensor.grid", "-500");
        let context = resolve(&config, &states, at(5, 12)).unwrap();
        assert!(!context.solar_exporting);

        states.set_state("sensor.grid", "-1200");
        let context = resolve(&config, &states, at(5, 12)).unwrap();
        assert!(context.solar_exporting);
        assert_eq!(context.effective_price, 0.04);
        assert_eq!(context.grid_power_w, Some(-1200.0));
    }

    #[test]
    fn export_without_injection_price_is_not_solar() {
        let config = triple_config();
        let mut states = base_states();
        states.set_state("sensor.tariff", "1");
        states.set_state("sensor.grid", "-2000");

        let context = resolve(&config, &states, at(5, 12)).unwrap();

        assert_eq!(context.tariff, 1);
        assert!(!context.solar_exporting);
        assert_eq!(context.effective_price, 0.18);
    }
}
