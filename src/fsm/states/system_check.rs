//! SystemCheck: a linear 14-step (0..13) pre-flight diagnostic run as one
//! FSM state with an internal sub-state counter, per §4.E.

use crate::error::FailureMode;
use crate::fsm::State;
use crate::hardware::{AlcoholLevel, FanCheck, ValveId};

use super::{Ctx, StepResult, Transition};

#[derive(Debug, Clone, PartialEq)]
pub struct SystemCheckData {
    pub step: u8,
    pub step_elapsed_s: f64,
    pub vacuum_retries: u32,
    pub start_pressure: f64,
    pub last_pressure: f64,
    pub start_temp: f64,
    pub rise_test_phase_elapsed_s: f64,
}

impl Default for SystemCheckData {
    fn default() -> Self {
        Self {
            step: 0,
            step_elapsed_s: 0.0,
            vacuum_retries: 0,
            start_pressure: 0.0,
            last_pressure: 0.0,
            start_temp: 0.0,
            rise_test_phase_elapsed_s: 0.0,
        }
    }
}

impl SystemCheckData {
    fn advance(&mut self, step: u8) {
        self.step = step;
        self.step_elapsed_s = 0.0;
    }
}

pub fn execute(ctx: &mut Ctx, d: &mut SystemCheckData) -> StepResult {
    d.step_elapsed_s += ctx.dt_s;

    match d.step {
        0 => step0_alcohol_and_ambient(ctx, d),
        1 => step1_close_and_pump(ctx, d),
        2 => step2_pump_down(ctx, d),
        3 => step3_wait_leak_delay(ctx, d),
        4 => step4_evc_leak_check(ctx, d),
        5 => step5_exc_volume(ctx, d),
        6 => step6_second_leak_check(ctx, d),
        7 => step7_open_valve4(ctx, d),
        8 => step8_equalize_valve4(ctx, d),
        9 => step9_pump_down_again(ctx, d),
        10 => step10_open_valve2(ctx, d),
        11 => step11_heater_on(ctx, d),
        12 => step12_heater_rise(ctx, d),
        13 => step13_final_alcohol_gate(ctx, d),
        _ => Ok(Some(Transition::error(FailureMode::UnknownError, "SystemCheck step out of range"))),
    }
}

fn step0_alcohol_and_ambient(ctx: &mut Ctx, d: &mut SystemCheckData) -> StepResult {
    if ctx.hw.alcohol_sensor_on().is_err() {
        return Ok(Some(Transition::error(FailureMode::AlcoholGasLevelError, "alcohol sensor init failed")));
    }
    let level = match ctx.hw.alcohol_level() {
        Ok(l) => l,
        Err(e) => return Ok(Some(Transition::error(FailureMode::AlcoholGasLevelError, e.to_string()))),
    };
    if level == AlcoholLevel::NotReady || level == AlcoholLevel::Off {
        return Ok(None);
    }
    if level == AlcoholLevel::Danger {
        return Ok(Some(Transition::error(FailureMode::AlcoholGasLevelError, "alcohol level danger at boot")));
    }

    if ctx.hw.set_fan_pwm(100).is_err() {
        return Ok(Some(Transition::error(FailureMode::FanError, "failed to start fan")));
    }
    match ctx.hw.fan_adc_check() {
        Ok(FanCheck::On | FanCheck::NotSupported) => {}
        _ => return Ok(Some(Transition::error(FailureMode::FanError, "fan ADC check failed"))),
    }

    for id in ValveId::ALL {
        if ctx.hw.set_valve(id, 100).is_err() {
            return Ok(Some(Transition::error(FailureMode::UnknownError, "failed to open valves for ambient read")));
        }
    }
    if d.step_elapsed_s < 2.0 {
        return Ok(None);
    }
    let pressure = match ctx.hw.pressure() {
        Ok(p) => p,
        Err(e) => return Ok(Some(Transition::error(FailureMode::PressureSensorError, e.to_string()))),
    };
    if pressure < ctx.cfg.fsm_ev.ambient_pressure_lower_bound || pressure > ctx.cfg.fsm_ev.ambient_pressure_upper_bound {
        return Ok(Some(Transition::error(FailureMode::PressureSensorError, format!("ambient pressure {pressure} out of bounds"))));
    }
    ctx.fsm.atm_pressure = pressure;
    d.advance(1);
    Ok(None)
}

fn step1_close_and_pump(ctx: &mut Ctx, d: &mut SystemCheckData) -> StepResult {
    for id in ValveId::ALL {
        ctx.hw.set_valve(id, 0)?;
    }
    ctx.hw.set_pump_pwm(100)?;
    d.advance(2);
    Ok(None)
}

fn step2_pump_down(ctx: &mut Ctx, d: &mut SystemCheckData) -> StepResult {
    let pressure = match ctx.hw.pressure() {
        Ok(p) => p,
        Err(e) => return Ok(Some(Transition::error(FailureMode::PressureSensorError, e.to_string()))),
    };
    if pressure < ctx.cfg.fsm_ex.maximum_vacuum_pressure {
        d.advance(3);
        return Ok(None);
    }
    if d.step_elapsed_s < f64::from(ctx.cfg.fsm_ex.maximum_vacuum_time) {
        return Ok(None);
    }

    // Timeout: run the pump diagnostic (§4.E SystemCheck step 2).
    if pressure > 900.0 {
        return Ok(Some(Transition::error(FailureMode::EvcLeak, format!("gross leak, pressure={pressure} mbar"))));
    }
    d.vacuum_retries += 1;
    if d.vacuum_retries > 3 {
        return Ok(Some(Transition::error(FailureMode::PumpNeedsCleanOrReplacement, "pump-down retries exhausted")));
    }
    ctx.fsm.start_extract_after_vent = true;
    Ok(Some(Transition::To(State::VentPump(crate::fsm::states::misc::VentPumpData::default()))))
}

fn step3_wait_leak_delay(ctx: &mut Ctx, d: &mut SystemCheckData) -> StepResult {
    if d.step_elapsed_s < f64::from(ctx.cfg.fsm_ex.leak_delay_time) {
        return Ok(None);
    }
    d.start_pressure = match ctx.hw.pressure() {
        Ok(p) => p,
        Err(e) => return Ok(Some(Transition::error(FailureMode::PressureSensorError, e.to_string()))),
    };
    d.advance(4);
    Ok(None)
}

fn step4_evc_leak_check(ctx: &mut Ctx, d: &mut SystemCheckData) -> StepResult {
    if d.step_elapsed_s < f64::from(ctx.cfg.fsm_ex.leak_sample_time) {
        return Ok(None);
    }
    let now = match ctx.hw.pressure() {
        Ok(p) => p,
        Err(e) => return Ok(Some(Transition::error(FailureMode::PressureSensorError, e.to_string()))),
    };
    let leak = crate::domain::math::pressure_leak_by_sample_time(now, d.start_pressure, f64::from(ctx.cfg.fsm_ex.leak_sample_time));
    if leak > ctx.cfg.fsm_ex.max_pressure_loss_evc {
        return Ok(Some(Transition::error(FailureMode::EvcLeak, format!("leak rate {leak} mbar/s"))));
    }
    ctx.fsm.system_leak = leak;
    if ctx.hw.set_valve(ValveId::V3, 100).is_err() {
        return Ok(Some(Transition::error(FailureMode::Valve3Blocked, "failed to open valve3")));
    }
    d.last_pressure = now;
    d.advance(5);
    Ok(None)
}

fn step5_exc_volume(ctx: &mut Ctx, d: &mut SystemCheckData) -> StepResult {
    if d.step_elapsed_s < f64::from(ctx.cfg.fsm_ex.pressure_eq_time) {
        return Ok(None);
    }
    let now = match ctx.hw.pressure() {
        Ok(p) => p,
        Err(e) => return Ok(Some(Transition::error(FailureMode::PressureSensorError, e.to_string()))),
    };
    if now - d.last_pressure < 100.0 {
        return Ok(Some(Transition::error(FailureMode::Valve3Blocked, "pressure failed to rise after opening valve3")));
    }
    let volume = crate::domain::math::calc_raw_volume(now, ctx.cfg.fsm_ex.evc_volume, d.last_pressure, ctx.fsm.atm_pressure);
    ctx.fsm.exc_volume = volume;
    ctx.fsm.exc_volume_liquid = crate::domain::math::convert_air_to_liquid(
        &ctx.cfg.fsm_ex.calculated_exc_volume_calibration_data,
        &ctx.cfg.fsm_ex.calculated_aspirated_volume_calibration_data,
        volume,
    );
    if volume > 500.0 {
        return Ok(Some(Transition::error(FailureMode::ExcLeak, format!("EXC volume {volume} mL exceeds 500 mL"))));
    }
    d.last_pressure = now;
    d.advance(6);
    Ok(None)
}

fn step6_second_leak_check(ctx: &mut Ctx, d: &mut SystemCheckData) -> StepResult {
    if d.step_elapsed_s < f64::from(ctx.cfg.fsm_ex.pressure_eq_time) {
        return Ok(None);
    }
    let now = match ctx.hw.pressure() {
        Ok(p) => p,
        Err(e) => return Ok(Some(Transition::error(FailureMode::PressureSensorError, e.to_string()))),
    };
    let volume = crate::domain::math::calc_raw_volume(now, ctx.cfg.fsm_ex.evc_volume, d.last_pressure, ctx.fsm.atm_pressure);
    if volume > 500.0 {
        return Ok(Some(Transition::error(FailureMode::ExcLeak, format!("EXC volume {volume} mL exceeds 500 mL on recheck"))));
    }
    d.last_pressure = now;
    d.advance(7);
    Ok(None)
}

fn step7_open_valve4(ctx: &mut Ctx, d: &mut SystemCheckData) -> StepResult {
    let now = match ctx.hw.pressure() {
        Ok(p) => p,
        Err(e) => return Ok(Some(Transition::error(FailureMode::PressureSensorError, e.to_string()))),
    };
    d.last_pressure = now;
    if ctx.hw.set_valve(ValveId::V4, 100).is_err() {
        return Ok(Some(Transition::error(FailureMode::Valve4Blocked, "failed to open valve4")));
    }
    d.advance(8);
    Ok(None)
}

fn step8_equalize_valve4(ctx: &mut Ctx, d: &mut SystemCheckData) -> StepResult {
    if d.step_elapsed_s < f64::from(ctx.cfg.fsm_ex.pressure_eq_time) {
        return Ok(None);
    }
    let now = match ctx.hw.pressure() {
        Ok(p) => p,
        Err(e) => return Ok(Some(Transition::error(FailureMode::PressureSensorError, e.to_string()))),
    };
    if now - d.last_pressure < 100.0 {
        return Ok(Some(Transition::error(FailureMode::Valve4Blocked, "pressure failed to rise after opening valve4")));
    }
    ctx.hw.set_valve(ValveId::V4, 0)?;
    ctx.hw.set_pump_pwm(100)?;
    d.advance(9);
    Ok(None)
}

fn step9_pump_down_again(ctx: &mut Ctx, d: &mut SystemCheckData) -> StepResult {
    let pressure = match ctx.hw.pressure() {
        Ok(p) => p,
        Err(e) => return Ok(Some(Transition::error(FailureMode::PressureSensorError, e.to_string()))),
    };
    if pressure < ctx.cfg.fsm_ex.maximum_vacuum_pressure {
        d.advance(10);
        return Ok(None);
    }
    if d.step_elapsed_s >= f64::from(ctx.cfg.fsm_ex.maximum_vacuum_time) {
        return Ok(Some(Transition::error(FailureMode::PumpNeedsCleanOrReplacement, "second pump-down timed out")));
    }
    Ok(None)
}

fn step10_open_valve2(ctx: &mut Ctx, d: &mut SystemCheckData) -> StepResult {
    if d.step_elapsed_s == ctx.dt_s {
        ctx.hw.set_valve(ValveId::V2, 100)?;
    }
    if d.step_elapsed_s < f64::from(ctx.cfg.fsm_ex.pressure_eq_time) {
        return Ok(None);
    }
    let now = match ctx.hw.pressure() {
        Ok(p) => p,
        Err(e) => return Ok(Some(Transition::error(FailureMode::PressureSensorError, e.to_string()))),
    };
    if now < ctx.fsm.atm_pressure - 100.0 {
        return Ok(Some(Transition::error(FailureMode::Valve2Blocked, "pressure failed to equalise through valve2")));
    }
    for id in ValveId::ALL {
        ctx.hw.set_valve(id, 0)?;
    }
    d.advance(11);
    Ok(None)
}

fn step11_heater_on(ctx: &mut Ctx, d: &mut SystemCheckData) -> StepResult {
    d.start_temp = match ctx.hw.bottom_temperature() {
        Ok(t) => t,
        Err(e) => return Ok(Some(Transition::error(FailureMode::HeaterError, e.to_string()))),
    };
    if ctx.hw.set_bottom_heater_percent(100).is_err() {
        return Ok(Some(Transition::error(FailureMode::HeaterError, "failed to drive heater")));
    }
    d.advance(12);
    Ok(None)
}

fn step12_heater_rise(ctx: &mut Ctx, d: &mut SystemCheckData) -> StepResult {
    let temp = match ctx.hw.bottom_temperature() {
        Ok(t) => t,
        Err(e) => return Ok(Some(Transition::error(FailureMode::HeaterError, e.to_string()))),
    };
    if temp - d.start_temp > 5.0 {
        ctx.hw.set_bottom_heater_percent(0)?;
        d.advance(13);
        return Ok(None);
    }
    if d.step_elapsed_s >= 20.0 {
        return Ok(Some(Transition::error(FailureMode::HeaterError, "bottom temperature failed to rise")));
    }
    Ok(None)
}

fn step13_final_alcohol_gate(ctx: &mut Ctx, _d: &mut SystemCheckData) -> StepResult {
    let level = match ctx.hw.alcohol_level() {
        Ok(l) => l,
        Err(e) => return Ok(Some(Transition::error(FailureMode::AlcoholGasLevelError, e.to_string()))),
    };
    if level == AlcoholLevel::Warning || level == AlcoholLevel::Danger {
        return Ok(Some(Transition::error(FailureMode::AlcoholGasLevelError, "alcohol level unsafe before extraction")));
    }
    Ok(Some(Transition::To(State::PreFillTubes(super::prep::TimedData::default()))))
}
