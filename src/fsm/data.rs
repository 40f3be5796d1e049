//! Runtime flags and measurements owned exclusively by the FSM (§3).

use crate::error::FailureMode;

#[derive(Debug, Clone, PartialEq)]
pub struct FsmData {
    pub start_flag: bool,
    pub running_flag: bool,
    pub pause_flag: bool,
    pub run_full_extraction: bool,
    pub force_afterstill: bool,

    pub atm_pressure: f64,
    pub exc_volume: f64,
    pub total_volume: f64,
    pub system_leak: f64,
    pub exc_volume_liquid: f64,

    pub aspirate_volume_target: f64,
    pub aspirate_volume_actual: f64,
    pub aspirate_speed_target: f64,
    pub aspirate_speed_actual: f64,
    pub aspirate_error: f64,

    pub flushes_performed: u32,
    pub pressure_failure_counter: u32,

    pub failure_mode: FailureMode,
    pub failure_description: String,
    /// A single non-fatal warning attached to the active state without
    /// leaving it (§7), e.g. "flow rate lower than expected". Cleared on
    /// every state entry.
    pub warning: Option<String>,

    pub target_temp: f64,

    /// 1..4, wrapping; advanced by a single Select press in Ready (§4.D).
    pub selected_program: u8,
    /// Set by SystemCheck step 2 when it had to vent before retrying the
    /// pump-down; VentPump routes back into SystemCheck on completion
    /// instead of Ready when this is set.
    pub start_extract_after_vent: bool,
}

impl Default for FsmData {
    fn default() -> Self {
        Self {
            start_flag: false,
            running_flag: false,
            pause_flag: false,
            run_full_extraction: false,
            force_afterstill: false,
            atm_pressure: 1013.0,
            exc_volume: 0.0,
            total_volume: 0.0,
            system_leak: 0.0,
            exc_volume_liquid: 0.0,
            aspirate_volume_target: 0.0,
            aspirate_volume_actual: 0.0,
            aspirate_speed_target: 0.0,
            aspirate_speed_actual: 0.0,
            aspirate_error: 0.0,
            flushes_performed: 0,
            pressure_failure_counter: 0,
            failure_mode: FailureMode::None,
            failure_description: String::new(),
            warning: None,
            target_temp: 0.0,
            selected_program: 1,
            start_extract_after_vent: false,
        }
    }
}

impl FsmData {
    /// Effects of a Reset command (§4.G): clears all run flags and derived
    /// measurements. The caller (the Reset command) additionally forces
    /// `selected_program` back to 1.
    pub fn reinit(&mut self) {
        *self = Self::default();
    }

    pub fn enter_failure(&mut self, mode: FailureMode, description: impl Into<String>) {
        self.failure_mode = mode;
        self.failure_description = description.into();
    }

    pub fn set_warning(&mut self, warning: impl Into<String>) {
        self.warning = Some(warning.into());
    }
}
