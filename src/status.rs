//! Device status snapshot (§3): the read-only view of Machine state +
//! FsmData + live sensor reads, published for the presentation thread.

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;

use crate::config::Config;
use crate::error::HardwareFailure;
use crate::fsm::{Machine, State};
use crate::hardware::HardwareFacade;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineState {
    Idle,
    Running,
    Pause,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub machine_id: String,
    pub unique_id: String,
    pub firmware_version: String,
    pub lifetime_distill_minutes: f64,
    pub since_date: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HardwareMonitor {
    pub pump_pct: u8,
    pub heater_pct: u8,
    pub fan_pwm_pct: u8,
    pub fan_adc_raw: f64,
    pub fan_classification: String,
    pub pressure_mbar: f64,
    pub gas_temperature_c: f64,
    pub heater_temperature_c: f64,
    pub valve_opening_pct: [u8; 4],
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveProgram {
    pub id: u8,
    pub current_action: String,
    pub progress_pct: f64,
    pub estimated_time_left_s: f64,
    pub time_elapsed_s: f64,
    pub warning: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgramParameters {
    pub distillation_temperature: f64,
    pub aspirate_volume: f64,
    pub number_of_flushes: u32,
    pub soak_time_seconds: u32,
    pub decarb_temperature: f64,
    pub decarb_time_minutes: u32,
    pub oil_mix_temperature: f64,
    pub oil_mix_time_minutes: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub timestamp_unix: i64,
    pub machine_state: MachineState,
    pub device_info: DeviceInfo,
    pub hardware: HardwareMonitor,
    pub active_program: ActiveProgram,
    pub program_parameters: ProgramParameters,
}

impl DeviceStatus {
    /// Snapshot the current machine/config/live-sensor state. Sensor reads
    /// that fail are reported as the last-known value rather than aborting
    /// the whole snapshot — a stale status beats no status.
    pub fn snapshot(machine: &Machine, cfg: &Config, hw: &mut dyn HardwareFacade, device_info: DeviceInfo, timestamp_unix: i64) -> Self {
        let pressure = hw.pressure().unwrap_or(machine.data.atm_pressure);
        let gas_temp = hw.gas_temperature().unwrap_or(0.0);
        let heater_temp = hw.bottom_temperature().unwrap_or(0.0);
        let valve_opening_pct = [
            hw.valve_position(crate::hardware::ValveId::V1),
            hw.valve_position(crate::hardware::ValveId::V2),
            hw.valve_position(crate::hardware::ValveId::V3),
            hw.valve_position(crate::hardware::ValveId::V4),
        ];

        let (progress_pct, eta_s, elapsed_s) = program_progress(machine);

        Self {
            timestamp_unix,
            machine_state: machine_state(machine),
            device_info,
            hardware: HardwareMonitor {
                pump_pct: 0,
                heater_pct: 0,
                fan_pwm_pct: 0,
                fan_adc_raw: 0.0,
                fan_classification: "unknown".to_string(),
                pressure_mbar: pressure,
                gas_temperature_c: gas_temp,
                heater_temperature_c: heater_temp,
                valve_opening_pct,
            },
            active_program: ActiveProgram {
                id: machine.data.selected_program,
                current_action: machine.state.label().to_string(),
                progress_pct,
                estimated_time_left_s: eta_s,
                time_elapsed_s: elapsed_s,
                warning: machine.data.warning.clone(),
                error_message: if machine.state.is_error() { Some(machine.data.failure_description.clone()) } else { None },
            },
            program_parameters: ProgramParameters {
                distillation_temperature: cfg.fsm_ev.distillation_temperature,
                aspirate_volume: cfg.fsm_ex.aspirate_volume,
                number_of_flushes: cfg.fsm_ex.number_of_flushes,
                soak_time_seconds: cfg.system.soak_time_seconds,
                decarb_temperature: cfg.decarb.temperature,
                decarb_time_minutes: cfg.decarb.time_minutes,
                oil_mix_temperature: cfg.oil_mix.temperature,
                oil_mix_time_minutes: cfg.oil_mix.time_minutes,
            },
        }
    }
}

fn machine_state(machine: &Machine) -> MachineState {
    if machine.state.is_error() {
        MachineState::Error
    } else if machine.data.pause_flag {
        MachineState::Pause
    } else if machine.data.running_flag {
        MachineState::Running
    } else {
        MachineState::Idle
    }
}

fn program_progress(machine: &Machine) -> (f64, f64, f64) {
    match &machine.state {
        State::DistillBulk(d) => (d.progress_pct, d.eta_s, 0.0),
        _ => (0.0, 0.0, 0.0),
    }
}

/// Lock-free publication point: the control loop swaps in a fresh
/// snapshot each tick; the presentation thread only ever reads `load()`.
pub struct StatusPublisher {
    current: ArcSwap<Option<DeviceStatus>>,
}

impl StatusPublisher {
    pub fn new() -> Self {
        Self { current: ArcSwap::from_pointee(None) }
    }

    pub fn publish(&self, status: DeviceStatus) {
        self.current.store(Arc::new(Some(status)));
    }

    pub fn latest(&self) -> Option<DeviceStatus> {
        (**self.current.load()).clone()
    }
}

pub fn failure_from_hardware(e: &HardwareFailure) -> String {
    e.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::pid::PidController;
    use crate::hardware::sim::SimulatedHardware;

    fn fresh_machine() -> Machine {
        Machine::new(PidController::new(1.0, 0.25, 0.05, 1.0, (0.0, 100.0), 300.0, 100.0))
    }

    #[test]
    fn idle_when_ready() {
        let m = fresh_machine();
        assert_eq!(machine_state(&m), MachineState::Idle);
    }

    #[test]
    fn error_overrides_pause_and_running() {
        let mut m = fresh_machine();
        m.data.pause_flag = true;
        m.data.running_flag = true;
        m.force_state(State::Error(crate::fsm::states::misc::ErrorData::default()));
        assert_eq!(machine_state(&m), MachineState::Error);
    }

    #[test]
    fn publisher_round_trips_latest_snapshot() {
        let m = fresh_machine();
        let cfg = Config::default();
        let mut hw = SimulatedHardware::new();
        let info = DeviceInfo {
            machine_id: "m1".into(),
            unique_id: "u1".into(),
            firmware_version: "0.2.0".into(),
            lifetime_distill_minutes: 0.0,
            since_date: "2026-01-01".into(),
        };
        let snap = DeviceStatus::snapshot(&m, &cfg, &mut hw, info, 0);
        let publisher = StatusPublisher::new();
        assert!(publisher.latest().is_none());
        publisher.publish(snap);
        assert!(publisher.latest().is_some());
    }
}
