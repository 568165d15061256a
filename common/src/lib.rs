pub mod binding;
pub mod config;
pub mod cop;
pub mod engine;
pub mod entities;
pub mod schedule;
pub mod signals;
pub mod topics;
pub mod types;

pub use binding::{BindingView, PassThroughSwitch, ThermostatBinding, VirtualThermostat};
pub use config::{BindingKind, ConfigError, EngineConfig, NetworkConfig, RoomConfig, RuntimeConfig};
pub use cop::CopCurve;
pub use engine::{set_climate_state, ArbitrationEngine, CycleOutcome, DeviceCommand, StatusObserver};
pub use entities::{EntityReader, EntityState, EntityStates};
pub use signals::{CycleError, GlobalContext};
pub use topics::*;
pub use types::{ActiveSource, HvacAction, HvacMode, RoomStatus, Season, StateReport};
