use std::fmt::Debug;

use serde::Serialize;

use crate::{
    config::BindingKind,
    types::{HvacAction, HvacMode, Season},
};

pub const MIN_TARGET_C: f64 = 10.0;
pub const MAX_TARGET_C: f64 = 30.0;
pub const DEFAULT_TARGET_C: f64 = 20.0;

/// Where a room's requested mode and setpoint come from, and where the
/// engine reports its decision back to.
pub trait ThermostatBinding: Send + Debug {
    fn kind(&self) -> BindingKind;

    fn requested_mode(&self) -> HvacMode;

    fn target_temp(&self) -> f64;

    /// Returns `true` when the mode actually changed.
    fn set_requested_mode(&mut self, mode: HvacMode) -> bool;

    /// Returns `true` when the setpoint actually changed.
    fn set_target_temp(&mut self, temp: f64) -> bool;

    fn report_back(&mut self, current_temp: Option<f64>, action: HvacAction, reason: &str);

    fn view(&self) -> BindingView;

    fn align_to_season(&mut self, _season: Season) {}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BindingView {
    pub kind: BindingKind,
    pub mode: HvacMode,
    #[serde(rename = "targetTemp")]
    pub target_temp: f64,
    #[serde(rename = "currentTemp")]
    pub current_temp: Option<f64>,
    pub action: HvacAction,
    pub reason: String,
}

#[derive(Debug, Clone)]
struct ThermostatSettings {
    mode: HvacMode,
    target_temp: f64,
    current_temp: Option<f64>,
    action: HvacAction,
    reason: String,
}

impl Default for ThermostatSettings {
    fn default() -> Self {
        Self {
            mode: HvacMode::Off,
            target_temp: DEFAULT_TARGET_C,
            current_temp: None,
            action: HvacAction::Off,
            reason: String::new(),
        }
    }
}

impl ThermostatSettings {
    fn set_mode(&mut self, mode: HvacMode) -> bool {
        if self.mode != mode {
            self.mode = mode;
            true
        } else {
            false
        }
    }

    fn set_target(&mut self, temp: f64) -> bool {
        if !temp.is_finite() {
            return false;
        }
        let clamped = temp.clamp(MIN_TARGET_C, MAX_TARGET_C);
        if (self.target_temp - clamped).abs() > f64::EPSILON {
            self.target_temp = clamped;
            true
        } else {
            false
        }
    }

    fn record(&mut self, current_temp: Option<f64>, action: HvacAction, reason: &str) {
        self.current_temp = current_temp;
        self.action = action;
        self.reason = reason.to_string();
    }

    fn view(&self, kind: BindingKind) -> BindingView {
        BindingView {
            kind,
            mode: self.mode,
            target_temp: self.target_temp,
            current_temp: self.current_temp,
            action: self.action,
            reason: self.reason.clone(),
        }
    }
}

/// Thermostat owned by this process; its mode follows the season.
#[derive(Debug, Clone, Default)]
pub struct VirtualThermostat {
    settings: ThermostatSettings,
}

impl VirtualThermostat {
    pub fn new(mode: HvacMode, target_temp: f64) -> Self {
        let mut thermostat = Self::default();
        thermostat.settings.mode = mode;
        thermostat.settings.set_target(target_temp);
        thermostat
    }
}

impl ThermostatBinding for VirtualThermostat {
    fn kind(&self) -> BindingKind {
        BindingKind::Virtual
    }

    fn requested_mode(&self) -> HvacMode {
        self.settings.mode
    }

    fn target_temp(&self) -> f64 {
        self.settings.target_temp
    }

    fn set_requested_mode(&mut self, mode: HvacMode) -> bool {
        self.settings.set_mode(mode)
    }

    fn set_target_temp(&mut self, temp: f64) -> bool {
        self.settings.set_target(temp)
    }

    fn report_back(&mut self, current_temp: Option<f64>, action: HvacAction, reason: &str) {
        self.settings.record(current_temp, action, reason);
    }

    fn view(&self) -> BindingView {
        self.settings.view(self.kind())
    }

    fn align_to_season(&mut self, season: Season) {
        if self.settings.mode == HvacMode::Off {
            return;
        }
        self.settings.mode = match season {
            Season::Summer => HvacMode::Cool,
            Season::Winter => HvacMode::Heat,
        };
    }
}

/// Switch commanded by an external thermostat controller. The engine's
/// decision is reported back so the controller sees the real action.
#[derive(Debug, Clone, Default)]
pub struct PassThroughSwitch {
    settings: ThermostatSettings,
}

impl PassThroughSwitch {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ThermostatBinding for PassThroughSwitch {
    fn kind(&self) -> BindingKind {
        BindingKind::PassThrough
    }

    fn requested_mode(&self) -> HvacMode {
        self.settings.mode
    }

    fn target_temp(&self) -> f64 {
        self.settings.target_temp
    }

    fn set_requested_mode(&mut self, mode: HvacMode) -> bool {
        self.settings.set_mode(mode)
    }

    fn set_target_temp(&mut self, temp: f64) -> bool {
        self.settings.set_target(temp)
    }

    fn report_back(&mut self, current_temp: Option<f64>, action: HvacAction, reason: &str) {
        self.settings.record(current_temp, action, reason);
    }

    fn view(&self) -> BindingView {
        self.settings.view(self.kind())
    }
}

pub fn new_binding(kind: BindingKind) -> Box<dyn ThermostatBinding> {
    match kind {
        BindingKind::Virtual => Box::new(VirtualThermostat::new(HvacMode::Off, DEFAULT_TARGET_C)),
        BindingKind::PassThrough => Box::new(PassThroughSwitch::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_is_clamped_and_change_detected() {
        let mut switch = PassThroughSwitch::new();

        assert!(switch.set_target_temp(35.0));
        assert_eq!(switch.target_temp(), MAX_TARGET_C);
        assert!(!switch.set_target_temp(31.0));
        assert!(!switch.set_target_temp(f64::NAN));
        assert!(switch.set_target_temp(21.5));
        assert_eq!(switch.target_temp(), 21.5);
    }

    #[test]
    fn new_bindings_start_off_at_default_target() {
        for kind in [BindingKind::Virtual, BindingKind::PassThrough] {
            let binding = new_binding(kind);
            assert_eq!(binding.kind(), kind);
            assert_eq!(binding.requested_mode(), HvacMode::Off);
            assert_eq!(binding.target_temp(), DEFAULT_TARGET_C);
        }
    }

    #[test]
    fn virtual_thermostat_follows_season_unless_off() {
        let mut thermostat = VirtualThermostat::new(HvacMode::HeatCool, 21.0);

        thermostat.align_to_season(Season::Summer);
        assert_eq!(thermostat.requested_mode(), HvacMode::Cool);
        thermostat.align_to_season(Season::Winter);
        assert_eq!(thermostat.requested_mode(), HvacMode::Heat);

        thermostat.set_requested_mode(HvacMode::Off);
        thermostat.align_to_season(Season::Summer);
        assert_eq!(thermostat.requested_mode(), HvacMode::Off);
    }

    #[test]
    fn pass_through_keeps_requested_mode_and_records_last_decision() {
        let mut switch = PassThroughSwitch::new();
        switch.set_requested_mode(HvacMode::Heat);
        switch.align_to_season(Season::Summer);
        assert_eq!(switch.requested_mode(), HvacMode::Heat);

        switch.report_back(Some(19.5), HvacAction::Heating, "Gas cheaper");
        let view = switch.view();

        assert_eq!(view.current_temp, Some(19.5));
        assert_eq!(view.action, HvacAction::Heating);
        assert_eq!(view.reason, "Gas cheaper");
    }
}
