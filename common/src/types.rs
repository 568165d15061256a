use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HvacMode {
    Off,
    Heat,
    Cool,
    HeatCool,
}

impl HvacMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Heat => "heat",
            Self::Cool => "cool",
            Self::HeatCool => "heat_cool",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" => Some(Self::Off),
            "heat" => Some(Self::Heat),
            "cool" => Some(Self::Cool),
            "heat_cool" | "auto" => Some(Self::HeatCool),
            _ => None,
        }
    }

    /// Heating or cooling, the two modes that carry a setpoint.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Heat | Self::Cool)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HvacAction {
    Off,
    Idle,
    Heating,
    Cooling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Summer,
    Winter,
}

/// Which source a room ended up on after its last decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActiveSource {
    Unknown,
    Error,
    Off,
    OffTargetReached,
    HeatPumpHeat,
    HeatPumpHeatMinRuntime,
    Gas,
    HeatPumpCooling,
    HeatPumpCoolingMinRuntime,
    WaitingForSolar,
    TargetReached,
    Idle,
}

impl ActiveSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Error => "Error",
            Self::Off => "Off",
            Self::OffTargetReached => "Off (Temp OK)",
            Self::HeatPumpHeat => "AC (Heat)",
            Self::HeatPumpHeatMinRuntime => "AC (Heat - Min Runtime)",
            Self::Gas => "Gas",
            Self::HeatPumpCooling => "AC (Cooling)",
            Self::HeatPumpCoolingMinRuntime => "AC (Cooling - Min Runtime)",
            Self::WaitingForSolar => "Waiting for Solar",
            Self::TargetReached => "Temp OK",
            Self::Idle => "Idle",
        }
    }
}

/// Last decision for one room, as exposed to status projections.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomStatus {
    #[serde(rename = "activeSource")]
    pub active_source: &'static str,
    #[serde(skip)]
    pub source: ActiveSource,
    pub reason: String,
    pub action: HvacAction,
    #[serde(rename = "currentTemp")]
    pub current_temp: Option<f64>,
    #[serde(rename = "targetTemp")]
    pub target_temp: Option<f64>,
    #[serde(rename = "outsideTemp")]
    pub outside_temp: Option<f64>,
    pub cop: Option<f64>,
    #[serde(rename = "costHeatPumpKwh")]
    pub cost_heat_pump_kwh: Option<f64>,
    #[serde(rename = "costGasKwh")]
    pub cost_gas_kwh: Option<f64>,
    pub profitable: Option<bool>,
    #[serde(rename = "updatedMs")]
    pub updated_ms: Option<u64>,
}

impl RoomStatus {
    pub fn new(source: ActiveSource, reason: impl Into<String>, action: HvacAction) -> Self {
        Self {
            active_source: source.as_str(),
            source,
            reason: reason.into(),
            action,
            current_temp: None,
            target_temp: None,
            outside_temp: None,
            cop: None,
            cost_heat_pump_kwh: None,
            cost_gas_kwh: None,
            profitable: None,
            updated_ms: None,
        }
    }
}

impl Default for RoomStatus {
    fn default() -> Self {
        Self::new(ActiveSource::Unknown, "", HvacAction::Off)
    }
}

/// What the engine pushes back to a pass-through switch after deciding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateReport {
    #[serde(rename = "roomIndex")]
    pub room_index: usize,
    #[serde(rename = "currentTemp")]
    pub current_temp: Option<f64>,
    pub action: HvacAction,
    pub reason: String,
}
