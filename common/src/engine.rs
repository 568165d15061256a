use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use tracing::{debug, info, warn};

use crate::{
    binding::{new_binding, BindingView, ThermostatBinding},
    config::{BindingKind, EngineConfig, RoomConfig},
    cop::heat_pump_cost_per_kwh,
    entities::EntityReader,
    signals::{self, CycleError, GlobalContext},
    types::{ActiveSource, HvacAction, HvacMode, RoomStatus, Season, StateReport},
};

/// Setpoints closer than this are considered equal.
pub const SETPOINT_TOLERANCE_C: f64 = 0.01;

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    SetHvacMode { entity_id: String, mode: HvacMode },
    SetTemperature { entity_id: String, temperature: f64 },
}

impl DeviceCommand {
    pub fn entity_id(&self) -> &str {
        match self {
            Self::SetHvacMode { entity_id, .. } | Self::SetTemperature { entity_id, .. } => {
                entity_id
            }
        }
    }
}

/// Commands needed to bring `device_id` to `mode` (and `target` when heating
/// or cooling). Empty when the device is unknown or already matches.
pub fn set_climate_state<R: EntityReader>(
    states: &R,
    device_id: &str,
    mode: HvacMode,
    target: Option<f64>,
) -> Vec<DeviceCommand> {
    let mut commands = Vec::new();
    let Some(device) = states.entity(device_id).filter(|device| device.is_available()) else {
        return commands;
    };

    if !device.state.trim().eq_ignore_ascii_case(mode.as_str()) {
        commands.push(DeviceCommand::SetHvacMode {
            entity_id: device_id.to_string(),
            mode,
        });
    }

    if let Some(target) = target.filter(|_| mode.is_active()) {
        let diverges = device
            .attribute_f64("temperature")
            .map(|current| (current - target).abs() > SETPOINT_TOLERANCE_C)
            .unwrap_or(true);
        if diverges {
            commands.push(DeviceCommand::SetTemperature {
                entity_id: device_id.to_string(),
                temperature: target,
            });
        }
    }

    commands
}

/// Notified once after every completed cycle.
pub trait StatusObserver: Send + Sync {
    fn refresh(&self);
}

impl<F> StatusObserver for F
where
    F: Fn() + Send + Sync,
{
    fn refresh(&self) {
        self()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    pub context: GlobalContext,
    pub commands: Vec<DeviceCommand>,
    /// Decisions to forward to pass-through controllers.
    pub reports: Vec<StateReport>,
}

#[derive(Debug)]
pub struct RoomState {
    pub config: RoomConfig,
    binding: Box<dyn ThermostatBinding>,
    current_temp: Option<f64>,
    heat_pump_started_ms: Option<u64>,
    status: RoomStatus,
}

impl RoomState {
    fn new(config: RoomConfig, kind: BindingKind) -> Self {
        Self {
            config,
            binding: new_binding(kind),
            current_temp: None,
            heat_pump_started_ms: None,
            status: RoomStatus::default(),
        }
    }

    pub fn current_temp(&self) -> Option<f64> {
        self.current_temp
    }

    pub fn heat_pump_started_ms(&self) -> Option<u64> {
        self.heat_pump_started_ms
    }

    pub fn status(&self) -> &RoomStatus {
        &self.status
    }

    pub fn binding(&self) -> BindingView {
        self.binding.view()
    }

    pub fn can_stop(&self, now_ms: u64) -> bool {
        self.heat_pump_started_ms
            .map(|start| now_ms.saturating_sub(start) >= self.config.min_runtime_ms())
            .unwrap_or(true)
    }

    fn effective_target(&self, local: DateTime<FixedOffset>) -> f64 {
        match (&self.config.comfort, self.binding.kind()) {
            (Some(comfort), BindingKind::Virtual) => comfort.target_at(local),
            _ => self.binding.target_temp(),
        }
    }

    fn min_runtime_reason(&self, now_ms: u64) -> String {
        let elapsed_ms = self
            .heat_pump_started_ms
            .map(|start| now_ms.saturating_sub(start))
            .unwrap_or(0);
        let remaining_ms = self.config.min_runtime_ms().saturating_sub(elapsed_ms);
        format!(
            "Minimum runtime ({:.1}/{} min, {:.1} min remaining)",
            elapsed_ms as f64 / 60_000.0,
            self.config.min_runtime_min,
            remaining_ms as f64 / 60_000.0
        )
    }
}

enum HeatChoice {
    HeatPump,
    Gas,
    Nothing,
}

/// One room's view of the cycle while it is being decided.
struct RoomCycle<'a, R> {
    states: &'a R,
    context: &'a GlobalContext,
    hysteresis: f64,
    now_ms: u64,
    commands: &'a mut Vec<DeviceCommand>,
}

impl<R: EntityReader> RoomCycle<'_, R> {
    fn command(&mut self, device: Option<&str>, mode: HvacMode, target: Option<f64>) {
        if let Some(device_id) = device {
            self.commands
                .extend(set_climate_state(self.states, device_id, mode, target));
        }
    }

    fn running_mode(&self, device: Option<&str>) -> Option<HvacMode> {
        device
            .and_then(|id| self.states.read_state(id))
            .and_then(HvacMode::parse)
            .filter(|mode| mode.is_active())
    }

    /// Mode to hold the heat pump in, when it is running and still inside
    /// its minimum runtime.
    fn held_mode(&self, room: &RoomState) -> Option<HvacMode> {
        if room.can_stop(self.now_ms) {
            return None;
        }
        self.running_mode(room.config.heat_pump_id())
    }

    fn all_off(&mut self, room: &mut RoomState) {
        let heat_pump = room.config.heat_pump_id().map(str::to_owned);
        let gas = room.config.gas_id().map(str::to_owned);
        self.command(heat_pump.as_deref(), HvacMode::Off, None);
        self.command(gas.as_deref(), HvacMode::Off, None);
        room.heat_pump_started_ms = None;
    }

    fn start_heat_pump(&mut self, room: &mut RoomState, mode: HvacMode, target: f64) {
        let heat_pump = room.config.heat_pump_id().map(str::to_owned);
        self.command(heat_pump.as_deref(), mode, Some(target));
        if room.heat_pump_started_ms.is_none() {
            room.heat_pump_started_ms = Some(self.now_ms);
        }
    }

    fn decide(&mut self, room: &mut RoomState, local: DateTime<FixedOffset>) -> RoomStatus {
        room.binding.align_to_season(self.context.season);
        let target = room.effective_target(local);
        room.current_temp = self.states.read_numeric(&room.config.temp_sensor);

        let Some(current) = room.current_temp else {
            warn!(
                "room '{}': temperature sensor {} unavailable, switching devices off",
                room.config.name, room.config.temp_sensor
            );
            self.all_off(room);
            let mut status = RoomStatus::new(
                ActiveSource::Error,
                "Temperature sensor unavailable",
                HvacAction::Off,
            );
            status.target_temp = Some(target);
            return status;
        };

        let mut status = if room.binding.requested_mode() == HvacMode::Off {
            self.all_off(room);
            RoomStatus::new(ActiveSource::Off, "Thermostat off", HvacAction::Off)
        } else {
            match self.context.season {
                Season::Winter => self.decide_winter(room, current, target),
                Season::Summer => self.decide_summer(room, current, target),
            }
        };

        status.current_temp = Some(current);
        status.target_temp = Some(target);
        status
    }

    fn decide_winter(&mut self, room: &mut RoomState, current: f64, target: f64) -> RoomStatus {
        let heat_pump = room.config.heat_pump_id().map(str::to_owned);
        let gas = room.config.gas_id().map(str::to_owned);

        if current >= target + self.hysteresis {
            if let Some(mode) = self.held_mode(room) {
                return self.hold_heat_pump(room, mode, target);
            }
            self.all_off(room);
            return RoomStatus::new(
                ActiveSource::OffTargetReached,
                format!("Target reached ({current:.1} >= {target:.1} + {:.1})", self.hysteresis),
                HvacAction::Idle,
            );
        }

        let context = self.context;
        let curve = room.config.cop;
        let cop = heat_pump
            .as_ref()
            .map(|_| curve.interpolate(context.outside_temp));
        let cost = heat_pump
            .as_ref()
            .map(|_| heat_pump_cost_per_kwh(context.effective_price, &curve, context.outside_temp));

        let (choice, reason) = match (cost, gas.is_some()) {
            (Some(_), true) if context.battery_forced => (
                HeatChoice::HeatPump,
                format!("Battery charged ({:.0}%)", context.battery_soc.unwrap_or_default()),
            ),
            (Some(hp_cost), true) if hp_cost < context.gas_price => {
                let reason = match context.grid_power_w.filter(|_| context.solar_exporting) {
                    Some(power) => format!("Solar export ({power:.0} W)"),
                    None => format!("Heat pump cheaper ({hp_cost:.3} < {:.3})", context.gas_price),
                };
                (HeatChoice::HeatPump, reason)
            }
            (Some(hp_cost), true) => (
                HeatChoice::Gas,
                format!("Gas cheaper ({:.3} <= {hp_cost:.3})", context.gas_price),
            ),
            (Some(_), false) => (HeatChoice::HeatPump, "Heat pump is the only option".to_string()),
            (None, true) => (HeatChoice::Gas, "Gas is the only option".to_string()),
            (None, false) => (HeatChoice::Nothing, "No heating device configured".to_string()),
        };

        let mut status = match choice {
            HeatChoice::HeatPump => {
                self.start_heat_pump(room, HvacMode::Heat, target);
                self.command(gas.as_deref(), HvacMode::Off, None);
                RoomStatus::new(ActiveSource::HeatPumpHeat, reason, HvacAction::Heating)
            }
            HeatChoice::Gas => match self.held_mode(room) {
                Some(mode) => {
                    let mut held = self.hold_heat_pump(room, mode, target);
                    held.reason = format!("{reason}; {}", held.reason);
                    held
                }
                None => {
                    self.command(gas.as_deref(), HvacMode::Heat, Some(target));
                    self.command(heat_pump.as_deref(), HvacMode::Off, None);
                    room.heat_pump_started_ms = None;
                    RoomStatus::new(ActiveSource::Gas, reason, HvacAction::Heating)
                }
            },
            HeatChoice::Nothing => RoomStatus::new(ActiveSource::Idle, reason, HvacAction::Idle),
        };

        status.cop = cop;
        status.cost_heat_pump_kwh = cost;
        status.cost_gas_kwh = Some(context.gas_price);
        status.profitable = cost.map(|hp_cost| hp_cost < context.gas_price);
        status
    }

    fn decide_summer(&mut self, room: &mut RoomState, current: f64, target: f64) -> RoomStatus {
        let heat_pump = room.config.heat_pump_id().map(str::to_owned);
        let gas = room.config.gas_id().map(str::to_owned);
        self.command(gas.as_deref(), HvacMode::Off, None);

        if heat_pump.is_none() {
            room.heat_pump_started_ms = None;
            return RoomStatus::new(ActiveSource::Idle, "No AC available", HvacAction::Idle);
        }

        let context = self.context;
        if current > target {
            if context.solar_exporting || context.battery_forced {
                self.start_heat_pump(room, HvacMode::Cool, target);
                let reason = match context.grid_power_w.filter(|_| context.solar_exporting) {
                    Some(power) => format!("Solar export ({power:.0} W)"),
                    None => format!("Battery charged ({:.0}%)", context.battery_soc.unwrap_or_default()),
                };
                return RoomStatus::new(ActiveSource::HeatPumpCooling, reason, HvacAction::Cooling);
            }

            if let Some(mode) = self.held_mode(room) {
                return self.hold_heat_pump(room, mode, target);
            }
            self.command(heat_pump.as_deref(), HvacMode::Off, None);
            room.heat_pump_started_ms = None;
            return RoomStatus::new(
                ActiveSource::WaitingForSolar,
                "Not enough solar production",
                HvacAction::Idle,
            );
        }

        if let Some(mode) = self.held_mode(room) {
            return self.hold_heat_pump(room, mode, target);
        }
        self.command(heat_pump.as_deref(), HvacMode::Off, None);
        room.heat_pump_started_ms = None;
        RoomStatus::new(
            ActiveSource::TargetReached,
            format!("Target reached ({current:.1} <= {target:.1})"),
            HvacAction::Idle,
        )
    }

    /// Keeps the heat pump on in its current mode until its minimum runtime
    /// has elapsed.
    fn hold_heat_pump(&mut self, room: &mut RoomState, mode: HvacMode, target: f64) -> RoomStatus {
        let heat_pump = room.config.heat_pump_id().map(str::to_owned);
        let gas = room.config.gas_id().map(str::to_owned);
        self.command(heat_pump.as_deref(), mode, Some(target));
        self.command(gas.as_deref(), HvacMode::Off, None);

        let reason = room.min_runtime_reason(self.now_ms);
        info!("room '{}': holding heat pump, {reason}", room.config.name);

        let (source, action) = match mode {
            HvacMode::Cool => (ActiveSource::HeatPumpCoolingMinRuntime, HvacAction::Cooling),
            _ => (ActiveSource::HeatPumpHeatMinRuntime, HvacAction::Heating),
        };
        RoomStatus::new(source, reason, action)
    }
}

/// Decides, once per cycle, which device heats or cools each room.
pub struct ArbitrationEngine {
    pub config: EngineConfig,
    rooms: Vec<RoomState>,
    observers: Vec<Arc<dyn StatusObserver>>,
    last_context: Option<GlobalContext>,
}

impl ArbitrationEngine {
    pub fn new(mut config: EngineConfig, rooms: Vec<RoomConfig>) -> Self {
        config.sanitize();
        let kind = config.binding;
        Self {
            config,
            rooms: rooms
                .into_iter()
                .map(|room| RoomState::new(room, kind))
                .collect(),
            observers: Vec::new(),
            last_context: None,
        }
    }

    pub fn rooms(&self) -> &[RoomState] {
        &self.rooms
    }

    pub fn room(&self, index: usize) -> Option<&RoomState> {
        self.rooms.get(index)
    }

    pub fn get_room_status(&self, index: usize) -> Option<&RoomStatus> {
        self.rooms.get(index).map(RoomState::status)
    }

    pub fn last_context(&self) -> Option<&GlobalContext> {
        self.last_context.as_ref()
    }

    pub fn register_status_observer(&mut self, observer: Arc<dyn StatusObserver>) {
        self.observers.push(observer);
    }

    /// Anti-cycling guard for the room's heat pump.
    pub fn can_stop(&self, index: usize, now_ms: u64) -> bool {
        self.rooms
            .get(index)
            .map(|room| room.can_stop(now_ms))
            .unwrap_or(true)
    }

    /// Returns `true` when the thermostat state changed and a cycle is due.
    pub fn on_mode_change(&mut self, index: usize, mode: HvacMode, target: Option<f64>) -> bool {
        let Some(room) = self.rooms.get_mut(index) else {
            return false;
        };
        let mut changed = room.binding.set_requested_mode(mode);
        if let Some(target) = target {
            changed |= room.binding.set_target_temp(target);
        }
        if changed {
            info!("room '{}': thermostat mode -> {}", room.config.name, mode.as_str());
        }
        changed
    }

    pub fn on_temp_change(&mut self, index: usize, target: f64) -> bool {
        let Some(room) = self.rooms.get_mut(index) else {
            return false;
        };
        let changed = room.binding.set_target_temp(target);
        if changed {
            info!(
                "room '{}': thermostat target -> {:.1}",
                room.config.name,
                room.binding.target_temp()
            );
        }
        changed
    }

    /// Swaps the room list. Rooms keeping their name at the same index keep
    /// their runtime state; everything else starts fresh.
    pub fn replace_rooms(&mut self, configs: Vec<RoomConfig>) {
        let kind = self.config.binding;
        let mut previous: Vec<Option<RoomState>> = std::mem::take(&mut self.rooms)
            .into_iter()
            .map(Some)
            .collect();

        self.rooms = configs
            .into_iter()
            .enumerate()
            .map(|(index, config)| {
                match previous.get_mut(index).and_then(Option::take) {
                    Some(mut kept) if kept.config.name == config.name => {
                        kept.config = config;
                        kept
                    }
                    _ => RoomState::new(config, kind),
                }
            })
            .collect();
    }

    /// Runs one full cycle. Nothing is mutated when the consumption price is
    /// unavailable.
    pub fn run_cycle<R: EntityReader>(
        &mut self,
        states: &R,
        now_ms: u64,
        local: DateTime<FixedOffset>,
    ) -> Result<CycleOutcome, CycleError> {
        let context = match signals::resolve(&self.config, states, local) {
            Ok(context) => context,
            Err(err) => {
                warn!("cycle aborted: {err}");
                return Err(err);
            }
        };

        let mut commands = Vec::new();
        let mut reports = Vec::new();

        for (index, room) in self.rooms.iter_mut().enumerate() {
            let mut cycle = RoomCycle {
                states,
                context: &context,
                hysteresis: self.config.hysteresis,
                now_ms,
                commands: &mut commands,
            };
            let mut status = cycle.decide(room, local);
            status.outside_temp = Some(context.outside_temp);
            status.updated_ms = Some(now_ms);

            debug!(
                "room '{}': {} ({})",
                room.config.name, status.active_source, status.reason
            );

            room.binding
                .report_back(room.current_temp, status.action, &status.reason);
            if room.binding.kind() == BindingKind::PassThrough {
                reports.push(StateReport {
                    room_index: index,
                    current_temp: room.current_temp,
                    action: status.action,
                    reason: status.reason.clone(),
                });
            }
            room.status = status;
        }

        self.last_context = Some(context.clone());
        for observer in &self.observers {
            observer.refresh();
        }

        Ok(CycleOutcome {
            context,
            commands,
            reports,
        })
    }
}
