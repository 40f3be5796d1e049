//! Unified error types for the controller.
//!
//! A handful of typed enums, one per boundary, that every subsystem funnels
//! into — the same split the port traits in this crate's lineage used:
//! small `Display`-only enums at the edges, `anyhow` only at `main`.

use std::fmt;

// ---------------------------------------------------------------------------
// Hardware façade errors
// ---------------------------------------------------------------------------

/// Every façade method that can fail returns this on an unrecoverable
/// read/write error. `context` carries the human-readable detail (current
/// pressure, which valve, etc.) that a `FailureMode` description is built
/// from upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct HardwareFailure {
    pub kind: HardwareFailureKind,
    pub context: String,
}

impl HardwareFailure {
    pub fn new(kind: HardwareFailureKind, context: impl Into<String>) -> Self {
        Self { kind, context: context.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareFailureKind {
    Electrical,
    PressureSensor,
    UserPanel,
    AlcoholSensor,
    Fan,
    Heater,
}

impl fmt::Display for HardwareFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Electrical => "electrical",
            Self::PressureSensor => "pressure sensor",
            Self::UserPanel => "user panel",
            Self::AlcoholSensor => "alcohol sensor",
            Self::Fan => "fan",
            Self::Heater => "heater",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for HardwareFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure: {}", self.kind, self.context)
    }
}

impl std::error::Error for HardwareFailure {}

// ---------------------------------------------------------------------------
// FSM failure taxonomy (§7)
// ---------------------------------------------------------------------------

/// Root-cause classification surfaced in the Error state. Distinct from
/// [`HardwareFailureKind`]: a single hardware kind (e.g. `PressureSensor`)
/// can map to several `FailureMode`s depending on which check was running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureMode {
    None,
    EvcLeak,
    ExcLeak,
    AlcoholGasLevelError,
    Valve3Blocked,
    HeaterError,
    PumpNeedsCleanOrReplacement,
    Valve2Blocked,
    Valve4Blocked,
    Valve1OrValve3Blocked,
    FanError,
    PressureSensorError,
    ThermalRunaway,
    UnknownError,
}

impl FailureMode {
    /// The 4-bit code the panel encodes into the four program LEDs (§4.D).
    /// `None` is never displayed (Error always carries a real mode), so the
    /// mapping starting at 1 is a stable wire contract for the panel, not an
    /// implementation detail that can be renumbered freely.
    pub const fn led_code(self) -> u8 {
        match self {
            Self::None => 0b0000,
            Self::Valve3Blocked => 0b0001,
            Self::Valve2Blocked => 0b0010,
            Self::Valve4Blocked => 0b0011,
            Self::Valve1OrValve3Blocked => 0b0100,
            Self::EvcLeak => 0b0101,
            Self::ExcLeak => 0b0110,
            Self::HeaterError => 0b0111,
            Self::PumpNeedsCleanOrReplacement => 0b1000,
            Self::FanError => 0b1001,
            Self::PressureSensorError => 0b1010,
            Self::ThermalRunaway => 0b1011,
            Self::AlcoholGasLevelError => 0b1100,
            Self::UnknownError => 0b1111,
        }
    }

    pub fn from_hardware_kind(kind: HardwareFailureKind) -> Self {
        match kind {
            HardwareFailureKind::PressureSensor => Self::PressureSensorError,
            HardwareFailureKind::Heater => Self::HeaterError,
            HardwareFailureKind::Fan => Self::FanError,
            HardwareFailureKind::AlcoholSensor => Self::AlcoholGasLevelError,
            HardwareFailureKind::Electrical | HardwareFailureKind::UserPanel => Self::UnknownError,
        }
    }
}

impl fmt::Display for FailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::EvcLeak => "EVC_LEAK",
            Self::ExcLeak => "EXC_LEAK",
            Self::AlcoholGasLevelError => "ALCOHOL_GASLEVEL_ERROR",
            Self::Valve3Blocked => "VALVE_3_BLOCKED",
            Self::HeaterError => "HEATER_ERROR",
            Self::PumpNeedsCleanOrReplacement => "PUMP_NEEDS_CLEAN_OR_REPLACEMENT",
            Self::Valve2Blocked => "VALVE_2_BLOCKED",
            Self::Valve4Blocked => "VALVE_4_BLOCKED",
            Self::Valve1OrValve3Blocked => "VALVE_1_OR_VALVE_3_BLOCKED",
            Self::FanError => "FAN_ERROR",
            Self::PressureSensorError => "PRESSURE_SENSOR_ERROR",
            Self::ThermalRunaway => "THERMAL_RUNAWAY",
            Self::UnknownError => "UNKNOWN_ERROR",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    /// No config found on disk (first boot) — caller should fall back to defaults.
    NotFound,
    /// Stored config failed to parse as INI or is missing a recognised section.
    Corrupted(String),
    /// A config field failed range validation.
    ValidationFailed(String),
    /// Underlying I/O error (read, write, or atomic rename).
    Io(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted(msg) => write!(f, "config corrupted: {msg}"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
            Self::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Command errors (§4.G)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Start* rejected because the machine is paused or already running.
    RejectedWhilePausedOrRunning,
    /// Pause/Resume rejected because the machine is not in DistillBulk.
    WrongStateForPauseResume,
    /// CleanValve rejected because the machine is not in Ready.
    WrongStateForCleanValve,
    /// Valve id outside 1..=4.
    InvalidValveId(u8),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RejectedWhilePausedOrRunning => {
                write!(f, "cannot start a new program while paused or running")
            }
            Self::WrongStateForPauseResume => write!(f, "pause/resume only valid during DistillBulk"),
            Self::WrongStateForCleanValve => write!(f, "clean valve only valid in Ready"),
            Self::InvalidValveId(id) => write!(f, "invalid valve id: {id}"),
        }
    }
}

impl std::error::Error for CommandError {}

// ---------------------------------------------------------------------------
// Stats store errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct StatsError(pub String);

impl fmt::Display for StatsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stats store error: {}", self.0)
    }
}

impl std::error::Error for StatsError {}

impl From<rusqlite::Error> for StatsError {
    fn from(e: rusqlite::Error) -> Self {
        Self(e.to_string())
    }
}
