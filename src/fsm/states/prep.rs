//! EXC-chamber preparation states between SystemCheck and Aspirate:
//! PreFillTubes, FirstDepressurize, MeasureEXCVolume, SecondDepressurize,
//! SecondLeakCheck, TopUpEXC, Soak, ThirdDepressurize.
//!
//! §4.E names these as distinct recipe-graph states but only fully
//! specifies SystemCheck's own internal leak/volume checks; these states
//! repeat that established vacuum/leak-check/volume-measurement shape
//! against the prepped EXC chamber rather than inventing a new one (see
//! the open-question note in the crate's grounding ledger).

use crate::domain::math;
use crate::error::FailureMode;
use crate::fsm::State;
use crate::hardware::ValveId;

use super::{Ctx, StepResult, Transition};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimedData {
    pub elapsed_s: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DepressurizeData {
    pub elapsed_s: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MeasureData {
    pub elapsed_s: f64,
    pub start_pressure: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LeakCheckData {
    pub elapsed_s: f64,
    pub start_pressure: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TopUpData {
    pub elapsed_s: f64,
    pub afterfill_opened: bool,
}

pub fn pre_fill_tubes(ctx: &mut Ctx, d: &mut TimedData) -> StepResult {
    d.elapsed_s += ctx.dt_s;
    if d.elapsed_s <= ctx.dt_s {
        ctx.hw.set_valve(ValveId::V1, 100)?;
        ctx.hw.set_valve(ValveId::V3, 100)?;
        ctx.hw.set_pump_pwm(100)?;
    }
    let pressure = match ctx.hw.pressure() {
        Ok(p) => p,
        Err(e) => return Ok(Some(Transition::error(FailureMode::PressureSensorError, e.to_string()))),
    };
    if pressure < ctx.cfg.fsm_ex.tube_filling_vacuum {
        return Ok(Some(Transition::To(State::FirstDepressurize(DepressurizeData::default()))));
    }
    if d.elapsed_s >= f64::from(ctx.cfg.fsm_ex.maximum_vacuum_time) {
        return Ok(Some(Transition::error(FailureMode::EvcLeak, "tube pre-fill failed to reach vacuum")));
    }
    Ok(None)
}

pub fn first_depressurize(ctx: &mut Ctx, d: &mut DepressurizeData) -> StepResult {
    d.elapsed_s += ctx.dt_s;
    if d.elapsed_s <= ctx.dt_s {
        for id in ValveId::ALL {
            ctx.hw.set_valve(id, 0)?;
        }
    }
    if d.elapsed_s < f64::from(ctx.cfg.fsm_ex.pressure_eq_time) {
        return Ok(None);
    }
    let start_pressure = match ctx.hw.pressure() {
        Ok(p) => p,
        Err(e) => return Ok(Some(Transition::error(FailureMode::PressureSensorError, e.to_string()))),
    };
    Ok(Some(Transition::To(State::MeasureEXCVolume(MeasureData { elapsed_s: 0.0, start_pressure }))))
}

pub fn measure_exc_volume(ctx: &mut Ctx, d: &mut MeasureData) -> StepResult {
    d.elapsed_s += ctx.dt_s;
    if d.elapsed_s <= ctx.dt_s && ctx.hw.set_valve(ValveId::V3, 100).is_err() {
        return Ok(Some(Transition::error(FailureMode::Valve3Blocked, "failed to open valve3 for volume measurement")));
    }
    if d.elapsed_s < f64::from(ctx.cfg.fsm_ex.pressure_eq_time) {
        return Ok(None);
    }
    let now = match ctx.hw.pressure() {
        Ok(p) => p,
        Err(e) => return Ok(Some(Transition::error(FailureMode::PressureSensorError, e.to_string()))),
    };
    let volume = math::calc_raw_volume(now, ctx.cfg.fsm_ex.evc_volume, d.start_pressure, ctx.fsm.atm_pressure);
    ctx.fsm.exc_volume = volume;
    if volume > 500.0 {
        return Ok(Some(Transition::error(FailureMode::ExcLeak, format!("EXC volume {volume} mL exceeds 500 mL"))));
    }
    Ok(Some(Transition::To(State::SecondDepressurize(DepressurizeData::default()))))
}

pub fn second_depressurize(ctx: &mut Ctx, d: &mut DepressurizeData) -> StepResult {
    d.elapsed_s += ctx.dt_s;
    if d.elapsed_s <= ctx.dt_s {
        for id in ValveId::ALL {
            ctx.hw.set_valve(id, 0)?;
        }
        ctx.hw.set_pump_pwm(100)?;
    }
    if d.elapsed_s < f64::from(ctx.cfg.fsm_ex.pressure_eq_time) {
        return Ok(None);
    }
    let start_pressure = match ctx.hw.pressure() {
        Ok(p) => p,
        Err(e) => return Ok(Some(Transition::error(FailureMode::PressureSensorError, e.to_string()))),
    };
    Ok(Some(Transition::To(State::SecondLeakCheck(LeakCheckData { elapsed_s: 0.0, start_pressure }))))
}

pub fn second_leak_check(ctx: &mut Ctx, d: &mut LeakCheckData) -> StepResult {
    d.elapsed_s += ctx.dt_s;
    if d.elapsed_s < f64::from(ctx.cfg.fsm_ex.leak_sample_time) {
        return Ok(None);
    }
    let now = match ctx.hw.pressure() {
        Ok(p) => p,
        Err(e) => return Ok(Some(Transition::error(FailureMode::PressureSensorError, e.to_string()))),
    };
    let leak = math::pressure_leak_by_sample_time(now, d.start_pressure, f64::from(ctx.cfg.fsm_ex.leak_sample_time));
    if leak > ctx.cfg.fsm_ex.max_pressure_loss_evc {
        return Ok(Some(Transition::error(FailureMode::ExcLeak, format!("second leak check rate {leak} mbar/s"))));
    }
    ctx.fsm.system_leak = leak;
    Ok(Some(Transition::To(State::TopUpEXC(TopUpData::default()))))
}

pub fn top_up_exc(ctx: &mut Ctx, d: &mut TopUpData) -> StepResult {
    d.elapsed_s += ctx.dt_s;
    if d.elapsed_s <= ctx.dt_s {
        ctx.hw.set_valve(ValveId::V1, 100)?;
    }
    if d.elapsed_s < f64::from(ctx.cfg.fsm_ex.top_up_time) {
        return Ok(None);
    }
    if !d.afterfill_opened {
        ctx.hw.set_valve(ValveId::V3, ctx.cfg.fsm_ex.top_up_afterfill_valve_setting)?;
        d.afterfill_opened = true;
        return Ok(None);
    }
    for id in ValveId::ALL {
        ctx.hw.set_valve(id, 0)?;
    }
    Ok(Some(Transition::To(State::Soak(TimedData::default()))))
}

pub fn soak(ctx: &mut Ctx, d: &mut TimedData) -> StepResult {
    d.elapsed_s += ctx.dt_s;
    if d.elapsed_s < f64::from(ctx.cfg.system.soak_time_seconds) {
        return Ok(None);
    }
    Ok(Some(Transition::To(State::ThirdDepressurize(DepressurizeData::default()))))
}

pub fn third_depressurize(ctx: &mut Ctx, d: &mut DepressurizeData) -> StepResult {
    d.elapsed_s += ctx.dt_s;
    if d.elapsed_s <= ctx.dt_s {
        for id in ValveId::ALL {
            ctx.hw.set_valve(id, 0)?;
        }
        ctx.hw.set_pump_pwm(100)?;
    }
    let pressure = match ctx.hw.pressure() {
        Ok(p) => p,
        Err(e) => return Ok(Some(Transition::error(FailureMode::PressureSensorError, e.to_string()))),
    };
    if pressure < ctx.cfg.fsm_ex.maximum_vacuum_pressure {
        return Ok(Some(Transition::To(State::Aspirate(super::aspirate::AspirateData::default()))));
    }
    if d.elapsed_s >= f64::from(ctx.cfg.fsm_ex.maximum_vacuum_time) {
        return Ok(Some(Transition::error(FailureMode::EvcLeak, "third depressurize failed to reach vacuum")));
    }
    Ok(None)
}
