//! End-to-end invariant checks driven directly against `Machine` +
//! `SimulatedHardware` + the command layer, without the supervisor
//! thread/signal plumbing (that part is integration-level, not
//! unit-testable without a live process).

use merlinctl::commands::{Command, CommandQueue};
use merlinctl::config::Config;
use merlinctl::control::pid::PidController;
use merlinctl::error::FailureMode;
use merlinctl::fsm::states::distill::DistillData;
use merlinctl::fsm::states::misc::ErrorData;
use merlinctl::fsm::{Machine, State};
use merlinctl::hardware::sim::SimulatedHardware;
use merlinctl::hardware::HardwareFacade;

fn fresh_machine() -> Machine {
    Machine::new(PidController::new(1.0, 0.25, 0.05, 1.0, (0.0, 100.0), 300.0, 100.0))
}

fn tick(machine: &mut Machine, hw: &mut SimulatedHardware, cfg: &Config, dt_s: f64) {
    machine.tick(hw, cfg, dt_s);
}

/// I1: while paused in DistillBulk, heater and pump stay at zero.
#[test]
fn pause_safety_zeroes_heater_and_pump() {
    let mut machine = fresh_machine();
    let mut hw = SimulatedHardware::new();
    let cfg = Config::default();

    machine.force_state(State::DistillBulk(DistillData::default()));
    tick(&mut machine, &mut hw, &cfg, 1.0);
    hw.heater_pct = 80;
    hw.pump_pct = 90;

    machine.data.pause_flag = true;
    tick(&mut machine, &mut hw, &cfg, 1.0);

    assert_eq!(hw.heater_pct, 0);
    assert_eq!(hw.pump_pct, 0);
}

/// I2: in Error, the error entry routine zeroes every actuator and the
/// PID is off.
#[test]
fn error_quiescence_zeroes_actuators() {
    let mut machine = fresh_machine();
    let mut hw = SimulatedHardware::new();
    let cfg = Config::default();

    hw.heater_pct = 50;
    hw.pump_pct = 50;
    hw.fan_pct = 50;
    machine.pid.pid_on();

    machine.force_state(State::Error(ErrorData::default()));
    tick(&mut machine, &mut hw, &cfg, 1.0);

    assert_eq!(hw.heater_pct, 0);
    assert_eq!(hw.pump_pct, 0);
    assert_eq!(hw.fan_pct, 0);
    assert!(!machine.pid.is_running());
}

/// I3: after Reset, state/flags/valves/program all land on their
/// documented defaults.
#[test]
fn reset_restores_documented_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let cfg_path = dir.path().join("config.ini");
    let mut cfg = Config::default();
    cfg.save(&cfg_path).unwrap();

    let mut machine = fresh_machine();
    let mut hw = SimulatedHardware::new();

    machine.data.selected_program = 3;
    machine.data.pause_flag = true;
    machine.data.force_afterstill = true;
    machine.force_state(State::DistillBulk(DistillData::default()));
    machine.pid.pid_on();

    Command::Reset.execute(&mut machine, &mut hw, &mut cfg, &cfg_path);

    assert_eq!(machine.state, State::Ready);
    assert!(!machine.data.running_flag);
    assert!(!machine.data.pause_flag);
    assert!(!machine.data.force_afterstill);
    assert!(!machine.pid.is_running());
    assert_eq!(machine.data.selected_program, 1);
    assert_eq!(hw.valves, [0, 100, 100, 100]);
}

/// I4: DistillBulk's progress is non-decreasing as effective elapsed time
/// advances and never exceeds the 0.99 in-run ceiling.
#[test]
fn distill_progress_is_monotone_and_bounded() {
    let mut machine = fresh_machine();
    let mut hw = SimulatedHardware::new();
    let cfg = Config::default();
    hw.bottom_temp_c = cfg.fsm_ev.temperature_check_threshold + 1.0;

    machine.force_state(State::DistillBulk(DistillData::default()));

    let mut last_progress = 0.0;
    for _ in 0..50 {
        tick(&mut machine, &mut hw, &cfg, 1.0);
        if let State::DistillBulk(d) = &machine.state {
            assert!(d.progress_pct >= last_progress);
            assert!(d.progress_pct <= 0.99);
            last_progress = d.progress_pct;
        } else {
            break;
        }
    }
}

/// I5: a StartExtraction submitted while running is rejected and causes
/// no state change.
#[test]
fn start_while_running_is_rejected_without_state_change() {
    let mut machine = fresh_machine();
    machine.force_state(State::DistillBulk(DistillData::default()));
    let before = machine.state.clone();

    let cmd = Command::StartExtraction { run_full: true, soak_time: None };
    assert!(cmd.validate(&machine).is_err());
    assert_eq!(machine.state, before);
}

/// I6: submitting multiple commands between ticks leaves only the last
/// one to be drained and executed.
#[test]
fn queue_executes_only_the_latest_command_per_tick() {
    let mut machine = fresh_machine();
    let mut hw = SimulatedHardware::new();
    let mut cfg = Config::default();
    let dir = tempfile::tempdir().unwrap();
    let cfg_path = dir.path().join("config.ini");

    let queue = CommandQueue::new();
    queue.submit(Command::StartDecarb);
    queue.submit(Command::StartHeatOil);

    let drained = queue.drain().unwrap();
    assert_eq!(drained, Command::StartHeatOil);
    assert!(queue.drain().is_none());

    drained.execute(&mut machine, &mut hw, &mut cfg, &cfg_path);
    assert!(matches!(machine.state, State::MixOil(_)));
}

/// Scenario 6 (§8): alcohol danger from Ready shuts down pump/heater/
/// valves/sensor and routes to Error with ALCOHOL_GASLEVEL_ERROR.
#[test]
fn alcohol_danger_during_idle_shuts_down_and_errors() {
    let mut machine = fresh_machine();
    let mut hw = SimulatedHardware::new();
    hw.heater_pct = 10;
    hw.pump_pct = 10;
    hw.alcohol_sensor_enabled = true;
    hw.alcohol = merlinctl::hardware::AlcoholLevel::Danger;

    let level = hw.alcohol_level().unwrap();
    assert_eq!(level, merlinctl::hardware::AlcoholLevel::Danger);

    let _ = hw.set_pump_pwm(0);
    let _ = hw.set_bottom_heater_percent(0);
    let _ = hw.set_valves_in_relax_position();
    let _ = hw.alcohol_sensor_off();
    machine.data.enter_failure(FailureMode::AlcoholGasLevelError, "alcohol sensor reported danger level");
    machine.force_state(State::Error(ErrorData::default()));

    assert_eq!(hw.heater_pct, 0);
    assert_eq!(hw.pump_pct, 0);
    assert!(!hw.alcohol_sensor_enabled);
    assert_eq!(machine.data.failure_mode, FailureMode::AlcoholGasLevelError);
    assert!(machine.state.is_error());
}
