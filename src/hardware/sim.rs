//! Simulated hardware façade. Backs every test in this crate and is the
//! default build when the `hardware` feature is not enabled.
//!
//! Every physical quantity is a plain field a test sets directly before
//! ticking the control loop, the same "inject, then observe" shape this
//! crate's lineage used for its `sim_set_*` sensor-injection functions,
//! generalised here into one struct instead of one function per module.

use super::{AlcoholLevel, DeviceState, FanCheck, HardwareFacade, HwResult, InitStatus, PanelButton, ValveId};
use crate::error::{HardwareFailure, HardwareFailureKind};

pub struct SimulatedHardware {
    pub valves: [u8; 4],
    pub heater_pct: u8,
    pub pump_pct: u8,
    pub fan_pct: u8,
    pub fan_check: FanCheck,

    pub pressure_mbar: f64,
    pub bottom_temp_c: f64,
    pub gas_temp_c: f64,

    pub alcohol: AlcoholLevel,
    pub alcohol_sensor_enabled: bool,

    /// Queue of edge-events a test injects; `button_press` pops one per call.
    pub pending_button: Option<PanelButton>,
    /// Level currently held, consulted by `button_press_force`.
    pub held_button: PanelButton,

    pub panel_state: DeviceState,
    pub selected_program: u8,
    pub light_state: LightState,

    /// Blink-helper call counts, so tests can assert the panel feedback
    /// paths (§4.D, §7) actually fire instead of going silently dead.
    pub blink_disconnected_count: u32,
    pub blink_label_print_count: u32,
    pub blink_force_afterstill_count: u32,
    pub blink_reset_count: u32,
    pub blink_fault_count: u32,
    pub flash_green_count: u32,

    /// Count of consecutive pressure-read failures still owed before a
    /// success, used by the boundary tests (B2).
    pub pressure_failures_remaining: u32,
    pub pressure_retry_budget: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightState {
    Off,
    Warm,
    Red,
}

impl Default for SimulatedHardware {
    fn default() -> Self {
        Self {
            valves: [0, 100, 100, 100],
            heater_pct: 0,
            pump_pct: 0,
            fan_pct: 0,
            fan_check: FanCheck::Off,
            pressure_mbar: 1013.0,
            bottom_temp_c: 20.0,
            gas_temp_c: 20.0,
            alcohol: AlcoholLevel::Off,
            alcohol_sensor_enabled: false,
            pending_button: None,
            held_button: PanelButton::None,
            panel_state: DeviceState::Booting,
            selected_program: 1,
            light_state: LightState::Off,
            blink_disconnected_count: 0,
            blink_label_print_count: 0,
            blink_force_afterstill_count: 0,
            blink_reset_count: 0,
            blink_fault_count: 0,
            flash_green_count: 0,
            pressure_failures_remaining: 0,
            pressure_retry_budget: 5,
        }
    }
}

impl SimulatedHardware {
    pub fn new() -> Self {
        Self::default()
    }

    fn valve_index(id: ValveId) -> usize {
        id as usize - 1
    }
}

impl HardwareFacade for SimulatedHardware {
    fn init(&mut self) -> InitStatus {
        InitStatus::Ok
    }

    fn set_valve(&mut self, id: ValveId, opening_pct: u8) -> HwResult<()> {
        if opening_pct > 100 {
            return Err(HardwareFailure::new(
                HardwareFailureKind::Electrical,
                format!("valve opening {opening_pct} out of range"),
            ));
        }
        self.valves[Self::valve_index(id)] = opening_pct;
        Ok(())
    }

    fn valve_position(&self, id: ValveId) -> u8 {
        self.valves[Self::valve_index(id)]
    }

    fn home_all_valves(&mut self) -> HwResult<()> {
        self.valves = [100, 100, 100, 100];
        Ok(())
    }

    fn set_bottom_heater_percent(&mut self, pct: u8) -> HwResult<()> {
        self.heater_pct = pct.min(100);
        Ok(())
    }

    fn set_pump_pwm(&mut self, pct: u8) -> HwResult<()> {
        self.pump_pct = pct.min(100);
        Ok(())
    }

    fn set_fan_pwm(&mut self, pct: u8) -> HwResult<()> {
        self.fan_pct = pct.min(100);
        self.fan_check = if pct > 0 { FanCheck::On } else { FanCheck::Off };
        Ok(())
    }

    fn fan_adc_check(&mut self) -> HwResult<FanCheck> {
        Ok(self.fan_check)
    }

    fn pressure(&mut self) -> HwResult<f64> {
        if self.pressure_failures_remaining > 0 {
            self.pressure_failures_remaining -= 1;
            if self.pressure_retry_budget == 0 {
                return Err(HardwareFailure::new(HardwareFailureKind::PressureSensor, "retry budget exhausted"));
            }
            self.pressure_retry_budget -= 1;
            return self.pressure();
        }
        Ok(self.pressure_mbar)
    }

    fn bottom_temperature(&mut self) -> HwResult<f64> {
        Ok(self.bottom_temp_c)
    }

    fn gas_temperature(&mut self) -> HwResult<f64> {
        Ok(self.gas_temp_c)
    }

    fn alcohol_level(&mut self) -> HwResult<AlcoholLevel> {
        Ok(self.alcohol)
    }

    fn alcohol_sensor_on(&mut self) -> HwResult<()> {
        self.alcohol_sensor_enabled = true;
        Ok(())
    }

    fn alcohol_sensor_off(&mut self) -> HwResult<()> {
        self.alcohol_sensor_enabled = false;
        Ok(())
    }

    fn button_press(&mut self) -> PanelButton {
        self.pending_button.take().unwrap_or(PanelButton::None)
    }

    fn button_press_force(&self) -> PanelButton {
        self.held_button
    }

    fn set_panel_state(&mut self, state: DeviceState) {
        self.panel_state = state;
    }

    fn set_program(&mut self, program: u8) {
        self.selected_program = program;
    }

    fn blink_disconnected(&mut self) {
        self.blink_disconnected_count += 1;
    }

    fn blink_label_print(&mut self) {
        self.blink_label_print_count += 1;
    }

    fn blink_force_afterstill(&mut self) {
        self.blink_force_afterstill_count += 1;
    }

    fn blink_reset(&mut self) {
        self.blink_reset_count += 1;
    }

    fn blink_fault(&mut self) {
        self.blink_fault_count += 1;
    }

    fn flash_green(&mut self) {
        self.flash_green_count += 1;
    }

    fn light_warm(&mut self) {
        self.light_state = LightState::Warm;
    }

    fn light_red(&mut self) {
        self.light_state = LightState::Red;
    }

    fn light_off(&mut self) {
        self.light_state = LightState::Off;
    }

    fn toggle_white(&mut self) {
        self.light_state = if self.light_state == LightState::Warm { LightState::Off } else { LightState::Warm };
    }

    fn toggle_red(&mut self) {
        self.light_state = if self.light_state == LightState::Red { LightState::Off } else { LightState::Red };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_valve_rejects_out_of_range() {
        let mut hw = SimulatedHardware::new();
        assert!(hw.set_valve(ValveId::V1, 101).is_err());
    }

    #[test]
    fn relax_position_matches_spec() {
        let mut hw = SimulatedHardware::new();
        hw.set_valves_in_relax_position().unwrap();
        assert_eq!(hw.valves, [0, 100, 100, 100]);
    }

    #[test]
    fn pressure_retries_then_succeeds() {
        let mut hw = SimulatedHardware::new();
        hw.pressure_failures_remaining = 2;
        hw.pressure_retry_budget = 5;
        assert!(hw.pressure().is_ok());
    }

    #[test]
    fn pressure_fails_when_budget_exhausted() {
        let mut hw = SimulatedHardware::new();
        hw.pressure_failures_remaining = 10;
        hw.pressure_retry_budget = 3;
        assert!(hw.pressure().is_err());
    }
}
