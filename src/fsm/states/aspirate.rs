//! Aspirate: transfer liquid from EXC to EVC through valve3 under flow
//! control, and the Flush/ExtraFlushDepressurize rinse loop that follows it.

use std::collections::VecDeque;

use crate::domain::math;
use crate::error::FailureMode;
use crate::fsm::State;
use crate::hardware::ValveId;

use super::{Ctx, StepResult, Transition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Prelude,
    Running,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AspirateData {
    phase: Phase,
    prelude_elapsed_s: f64,
    since_adjust_s: f64,
    t_elapsed_s: f64,
    v_prev: f64,
    t_prev: f64,
    pinned_since_s: Option<f64>,
    flow_window: VecDeque<(f64, f64)>,
    hysteresis_stored: bool,
    /// Valve-3 opening the control loop should persist as
    /// `valve_last_known_setting` once flow settles within hysteresis, or
    /// on successful completion. Consumed and cleared by the control loop.
    pub persist_valve_setting: Option<u8>,
}

impl Default for AspirateData {
    fn default() -> Self {
        Self {
            phase: Phase::Prelude,
            prelude_elapsed_s: 0.0,
            since_adjust_s: 0.0,
            t_elapsed_s: 0.0,
            v_prev: 0.0,
            t_prev: 0.0,
            pinned_since_s: None,
            flow_window: VecDeque::new(),
            hysteresis_stored: false,
            persist_valve_setting: None,
        }
    }
}

pub fn execute(ctx: &mut Ctx, d: &mut AspirateData) -> StepResult {
    match d.phase {
        Phase::Prelude => prelude(ctx, d),
        Phase::Running => running(ctx, d),
    }
}

fn prelude(ctx: &mut Ctx, d: &mut AspirateData) -> StepResult {
    d.prelude_elapsed_s += ctx.dt_s;
    if d.prelude_elapsed_s <= ctx.dt_s {
        ctx.hw.set_valve(ValveId::V1, 100)?;
        return Ok(None);
    }
    if d.prelude_elapsed_s < 1.0 {
        return Ok(None);
    }
    let opening = ctx.cfg.fsm_ex.valve_last_known_setting.saturating_sub(2);
    if ctx.hw.set_valve(ValveId::V3, opening).is_err() {
        return Ok(Some(Transition::error(FailureMode::Valve1OrValve3Blocked, "failed to open valve3 for aspirate")));
    }
    if d.prelude_elapsed_s < 1.0 + f64::from(ctx.cfg.fsm_ex.leak_sample_time) {
        return Ok(None);
    }
    let pressure = match ctx.hw.pressure() {
        Ok(p) => p,
        Err(e) => return Ok(Some(Transition::error(FailureMode::PressureSensorError, e.to_string()))),
    };
    ctx.fsm.system_leak = math::pressure_leak_by_sample_time(pressure, ctx.fsm.atm_pressure, f64::from(ctx.cfg.fsm_ex.leak_sample_time));
    ctx.fsm.aspirate_speed_target = f64::from(ctx.cfg.fsm_ex.aspirate_speed);
    ctx.fsm.aspirate_volume_target = ctx.cfg.fsm_ex.aspirate_volume;
    d.phase = Phase::Running;
    d.t_prev = 0.0;
    d.v_prev = 0.0;
    Ok(None)
}

fn running(ctx: &mut Ctx, d: &mut AspirateData) -> StepResult {
    d.t_elapsed_s += ctx.dt_s;
    d.since_adjust_s += ctx.dt_s;
    if d.since_adjust_s < f64::from(ctx.cfg.fsm_ex.valve_adjust_delay) {
        return Ok(None);
    }
    let adjust_dt = d.since_adjust_s;
    d.since_adjust_s = 0.0;

    let pressure = match ctx.hw.pressure() {
        Ok(p) => p,
        Err(e) => return Ok(Some(Transition::error(FailureMode::PressureSensorError, e.to_string()))),
    };
    let pv = math::pv_const(ctx.fsm.atm_pressure, ctx.cfg.fsm_ex.evc_volume);
    let leak = math::historic_leak(ctx.fsm.system_leak, d.t_elapsed_s, 0.0);
    let v_now = math::total_volume_aspirated(ctx.cfg.fsm_ex.evc_volume, pv, pressure - leak);
    ctx.fsm.aspirate_volume_actual = v_now;

    let flowrate = math::flowrate(v_now, d.v_prev, d.t_elapsed_s, d.t_prev);
    d.v_prev = v_now;
    d.t_prev = d.t_elapsed_s;
    ctx.fsm.aspirate_speed_actual = flowrate;

    d.flow_window.push_back((d.t_elapsed_s, flowrate));
    while matches!(d.flow_window.front(), Some((t, _)) if d.t_elapsed_s - *t > 60.0) {
        d.flow_window.pop_front();
    }
    let avg_flow: f64 = if d.flow_window.is_empty() {
        flowrate
    } else {
        d.flow_window.iter().map(|(_, v)| v).sum::<f64>() / d.flow_window.len() as f64
    };

    let target = ctx.fsm.aspirate_speed_target;
    let error_pct = 100.0 * flowrate / target;
    ctx.fsm.aspirate_error = error_pct;
    let (step, _period) = math::step_and_period(&ctx.cfg.flow_adj.math_bands(), error_pct.abs());

    let current = ctx.hw.valve_position(ValveId::V3);
    let new_opening = if flowrate > target {
        current.saturating_sub(step as u8)
    } else {
        (current as f64 + step).min(100.0) as u8
    };
    if ctx.hw.set_valve(ValveId::V3, new_opening).is_err() {
        return Ok(Some(Transition::error(FailureMode::Valve1OrValve3Blocked, "failed to adjust valve3")));
    }

    if new_opening >= 100 {
        let since = *d.pinned_since_s.get_or_insert(d.t_elapsed_s);
        if d.t_elapsed_s - since > 60.0 {
            if avg_flow <= ctx.cfg.fsm_ex.flowrate_fall_limit {
                return Ok(Some(Transition::error(FailureMode::Valve1OrValve3Blocked, "flow collapsed with valve3 fully open")));
            }
            if avg_flow <= target / 2.0 {
                ctx.fsm.set_warning("flow rate lower than expected");
            }
        }
    } else {
        d.pinned_since_s = None;
    }

    if !d.hysteresis_stored && (flowrate - target).abs() <= ctx.cfg.fsm_ex.valve_adjust_hysteresis {
        d.persist_valve_setting = Some(new_opening);
        d.hysteresis_stored = true;
    }

    let stop_at = adjust_dt; // keep clippy quiet about unused binding in some configurations
    let _ = stop_at;

    if v_now > ctx.cfg.fsm_ex.aspirate_volume {
        d.persist_valve_setting = Some(new_opening);
        if ctx.cfg.fsm_ex.number_of_flushes >= 1 {
            return Ok(Some(Transition::To(State::Flush(FlushData::default()))));
        }
        if ctx.fsm.run_full_extraction {
            return Ok(Some(Transition::To(State::DistillBulk(super::distill::DistillData::default()))));
        }
        return Ok(Some(Transition::To(State::Ready)));
    }
    Ok(None)
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FlushData {
    pub elapsed_s: f64,
    pub pumped_down: bool,
}

pub fn flush(ctx: &mut Ctx, d: &mut FlushData) -> StepResult {
    d.elapsed_s += ctx.dt_s;
    if !d.pumped_down {
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
            d.pumped_down = true;
            d.elapsed_s = 0.0;
            ctx.hw.set_valve(ValveId::V2, 100)?;
            ctx.hw.set_valve(ValveId::V3, 100)?;
        } else if d.elapsed_s >= f64::from(ctx.cfg.fsm_ex.maximum_vacuum_time) {
            return Ok(Some(Transition::error(FailureMode::EvcLeak, "flush pump-down timed out")));
        }
        return Ok(None);
    }

    if d.elapsed_s < f64::from(ctx.cfg.fsm_ex.flush_time) {
        return Ok(None);
    }
    ctx.fsm.flushes_performed += 1;
    Ok(Some(Transition::To(State::ExtraFlushDepressurize(FlushData::default()))))
}

pub fn extra_flush_depressurize(ctx: &mut Ctx, d: &mut FlushData) -> StepResult {
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
    if pressure >= ctx.cfg.fsm_ex.maximum_vacuum_pressure && d.elapsed_s < f64::from(ctx.cfg.fsm_ex.maximum_vacuum_time) {
        return Ok(None);
    }
    if ctx.fsm.flushes_performed < ctx.cfg.fsm_ex.number_of_flushes {
        return Ok(Some(Transition::To(State::Flush(FlushData::default()))));
    }
    if ctx.fsm.run_full_extraction {
        return Ok(Some(Transition::To(State::DistillBulk(super::distill::DistillData::default()))));
    }
    Ok(Some(Transition::To(State::Ready)))
}
