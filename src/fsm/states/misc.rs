//! The simple timed recipes (Decarb, MixOil), VentPump, CleanPump, and the
//! terminal Error state.

use crate::error::FailureMode;
use crate::fsm::State;
use crate::hardware::ValveId;

use super::system_check::SystemCheckData;
use super::{Ctx, StepResult, Transition};

pub fn decarb(ctx: &mut Ctx, d: &mut super::prep::TimedData) -> StepResult {
    timed_heat(ctx, d, ctx.cfg.decarb.temperature, f64::from(ctx.cfg.decarb.time_minutes) * 60.0)
}

pub fn mix_oil(ctx: &mut Ctx, d: &mut super::prep::TimedData) -> StepResult {
    timed_heat(ctx, d, ctx.cfg.oil_mix.temperature, f64::from(ctx.cfg.oil_mix.time_minutes) * 60.0)
}

fn timed_heat(ctx: &mut Ctx, d: &mut super::prep::TimedData, setpoint: f64, duration_s: f64) -> StepResult {
    d.elapsed_s += ctx.dt_s;
    if d.elapsed_s <= ctx.dt_s {
        ctx.pid.set_setpoint(setpoint);
        ctx.pid.pid_on();
    }
    let temp = match ctx.hw.bottom_temperature() {
        Ok(t) => t,
        Err(e) => return Ok(Some(Transition::error(FailureMode::HeaterError, e.to_string()))),
    };
    let (output, _) = ctx.pid.update(temp, ctx.dt_s);
    ctx.hw.set_bottom_heater_percent(output as u8)?;
    if d.elapsed_s < duration_s {
        return Ok(None);
    }
    ctx.pid.pid_off();
    ctx.hw.set_bottom_heater_percent(0)?;
    Ok(Some(Transition::To(State::Ready)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VentCyclePhase {
    Depressurize,
    Vent,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VentPumpData {
    phase: VentCyclePhase,
    phase_elapsed_s: f64,
    cycle: u32,
}

impl Default for VentPumpData {
    fn default() -> Self {
        Self { phase: VentCyclePhase::Depressurize, phase_elapsed_s: 0.0, cycle: 0 }
    }
}

pub fn vent_pump(ctx: &mut Ctx, d: &mut VentPumpData) -> StepResult {
    d.phase_elapsed_s += ctx.dt_s;
    match d.phase {
        VentCyclePhase::Depressurize => {
            if d.phase_elapsed_s <= ctx.dt_s {
                for id in ValveId::ALL {
                    ctx.hw.set_valve(id, 0)?;
                }
                ctx.hw.set_pump_pwm(100)?;
            }
            if d.phase_elapsed_s < 20.0 {
                return Ok(None);
            }
            ctx.hw.set_pump_pwm(0)?;
            ctx.hw.set_valve(ValveId::V2, 100)?;
            d.phase = VentCyclePhase::Vent;
            d.phase_elapsed_s = 0.0;
            Ok(None)
        }
        VentCyclePhase::Vent => {
            if d.phase_elapsed_s < 5.0 {
                return Ok(None);
            }
            ctx.hw.set_valve(ValveId::V2, 0)?;
            d.cycle += 1;
            if d.cycle >= 3 {
                ctx.hw.set_valves_in_relax_position()?;
                if ctx.fsm.start_extract_after_vent {
                    ctx.fsm.start_extract_after_vent = false;
                    let mut resumed = SystemCheckData::default();
                    resumed.step = 1;
                    return Ok(Some(Transition::To(State::SystemCheck(resumed))));
                }
                return Ok(Some(Transition::To(State::Ready)));
            }
            d.phase = VentCyclePhase::Depressurize;
            d.phase_elapsed_s = 0.0;
            Ok(None)
        }
    }
}

/// How long CleanPump runs the pump before relaxing back to Ready, absent
/// an early Play-long-press force-afterstill.
const CLEAN_PUMP_DURATION_S: f64 = 300.0;

pub fn clean_pump(ctx: &mut Ctx, d: &mut super::prep::TimedData) -> StepResult {
    d.elapsed_s += ctx.dt_s;
    if d.elapsed_s <= ctx.dt_s {
        ctx.hw.set_pump_pwm(100)?;
    }
    if ctx.fsm.force_afterstill {
        ctx.fsm.force_afterstill = false;
    } else if d.elapsed_s < CLEAN_PUMP_DURATION_S {
        return Ok(None);
    }
    ctx.hw.set_pump_pwm(0)?;
    ctx.hw.set_valves_in_relax_position()?;
    Ok(Some(Transition::To(State::Ready)))
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ErrorData;

pub fn error(ctx: &mut Ctx, _d: &mut ErrorData) -> StepResult {
    ctx.hw.set_bottom_heater_percent(0)?;
    ctx.hw.set_pump_pwm(0)?;
    ctx.hw.set_fan_pwm(0)?;
    ctx.pid.pid_off();
    ctx.hw.blink_fault();
    Ok(None)
}
