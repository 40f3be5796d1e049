//! DistillBulk (the long hot run) and its two successors, AfterDistill and
//! FinalSolventRemoval.

use crate::domain::math;
use crate::error::FailureMode;
use crate::fsm::State;
use crate::hardware::ValveId;

use super::{Ctx, StepResult, Transition};

#[derive(Debug, Clone, Copy, PartialEq)]
enum PeakPhase {
    VentOpen(f64),
    Cooling(f64),
    VentClose(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DistillData {
    /// Pause-excluded elapsed time, drives progress/ETA.
    effective_elapsed_s: f64,
    /// Wall-clock elapsed time since Enter, drives the pressure regimes.
    wall_elapsed_s: f64,
    valve4_checked_at: Option<f64>,
    start_temp: Option<f64>,
    heater_rise_ok: bool,
    peak_over_since: Option<f64>,
    peak_cycle_count: u32,
    peak_phase: Option<PeakPhase>,
    absolute_guard_since: Option<f64>,
    thermal_runaway_since: Option<f64>,
    pub progress_pct: f64,
    pub eta_s: f64,
}

impl Default for DistillData {
    fn default() -> Self {
        Self {
            effective_elapsed_s: 0.0,
            wall_elapsed_s: 0.0,
            valve4_checked_at: None,
            start_temp: None,
            heater_rise_ok: false,
            peak_over_since: None,
            peak_cycle_count: 0,
            peak_phase: None,
            absolute_guard_since: None,
            thermal_runaway_since: None,
            progress_pct: 0.0,
            eta_s: 0.0,
        }
    }
}

pub fn execute(ctx: &mut Ctx, d: &mut DistillData) -> StepResult {
    d.wall_elapsed_s += ctx.dt_s;

    if d.start_temp.is_none() {
        ctx.hw.set_fan_pwm(100)?;
        ctx.hw.set_pump_pwm(100)?;
        for id in ValveId::ALL {
            ctx.hw.set_valve(id, 0)?;
        }
        ctx.pid.set_setpoint(ctx.cfg.fsm_ev.distillation_temperature);
        ctx.pid.pid_on();
        d.start_temp = match ctx.hw.bottom_temperature() {
            Ok(t) => Some(t),
            Err(e) => return Ok(Some(Transition::error(FailureMode::HeaterError, e.to_string()))),
        };
        if d.start_temp.unwrap() >= ctx.cfg.fsm_ev.temperature_check_threshold {
            d.heater_rise_ok = true;
        }
    }

    if let Some(t) = d.valve4_checked_at {
        if d.wall_elapsed_s - t > 3.0 {
            ctx.hw.set_valve(ValveId::V4, 0)?;
        }
    } else if (d.wall_elapsed_s - ctx.dt_s).abs() < f64::EPSILON {
        ctx.hw.set_valve(ValveId::V4, 100)?;
        d.valve4_checked_at = Some(d.wall_elapsed_s);
    }

    if ctx.fsm.pause_flag {
        ctx.pid.set_setpoint(0.0);
        ctx.hw.set_bottom_heater_percent(0)?;
        ctx.hw.set_pump_pwm(0)?;
        return Ok(None);
    }

    if !d.heater_rise_ok {
        let temp = match ctx.hw.bottom_temperature() {
            Ok(t) => t,
            Err(e) => return Ok(Some(Transition::error(FailureMode::HeaterError, e.to_string()))),
        };
        if temp - d.start_temp.unwrap() >= ctx.cfg.fsm_ev.temperature_increase_threshold {
            d.heater_rise_ok = true;
        } else if d.wall_elapsed_s >= f64::from(ctx.cfg.fsm_ev.temperature_check_interval) {
            return Ok(Some(Transition::error(FailureMode::HeaterError, "bottom temperature failed to rise during distill")));
        }
    }

    let temp = match ctx.hw.bottom_temperature() {
        Ok(t) => t,
        Err(e) => return Ok(Some(Transition::error(FailureMode::HeaterError, e.to_string()))),
    };
    if temp >= ctx.cfg.fsm_ev.temperature_critical_level {
        let since = *d.thermal_runaway_since.get_or_insert(d.wall_elapsed_s);
        if d.wall_elapsed_s - since >= f64::from(ctx.cfg.fsm_ev.temperature_critical_level_max_interval) {
            return Ok(Some(Transition::error(FailureMode::ThermalRunaway, format!("bottom temperature {temp}C sustained"))));
        }
    } else {
        d.thermal_runaway_since = None;
    }

    if let Some(phase) = d.peak_phase {
        return peak_handling(ctx, d, phase);
    }

    let pressure = match ctx.hw.pressure() {
        Ok(p) => p,
        Err(e) => return Ok(Some(Transition::error(FailureMode::PressureSensorError, e.to_string()))),
    };

    if d.wall_elapsed_s > 90.0 {
        if pressure > ctx.cfg.fsm_ev.error_pressure_during_distill {
            let since = *d.absolute_guard_since.get_or_insert(d.wall_elapsed_s);
            if d.wall_elapsed_s - since >= 20.0 * ctx.dt_s.max(1.0) {
                ctx.hw.set_bottom_heater_percent(0)?;
                ctx.hw.set_pump_pwm(0)?;
                return Ok(Some(Transition::error(FailureMode::PumpNeedsCleanOrReplacement, "sustained over-pressure during distill")));
            }
        } else {
            d.absolute_guard_since = None;
        }
    }

    if (120.0..=600.0).contains(&d.wall_elapsed_s) {
        if pressure > ctx.cfg.fsm_ev.peak_pressure_during_distill {
            let since = *d.peak_over_since.get_or_insert(d.wall_elapsed_s);
            if d.wall_elapsed_s - since > f64::from(ctx.cfg.fsm_ev.peak_pressure_detection_interval_seconds) {
                return Ok(Some(Transition::error(FailureMode::PumpNeedsCleanOrReplacement, "pressure peak exceeded mid-run bound")));
            }
        } else {
            d.peak_over_since = None;
        }
    } else if d.wall_elapsed_s > 600.0 {
        if pressure > ctx.cfg.fsm_ev.peak_pressure_during_distill {
            let since = *d.peak_over_since.get_or_insert(d.wall_elapsed_s);
            if d.wall_elapsed_s - since > f64::from(ctx.cfg.fsm_ev.peak_pressure_detection_interval_seconds) {
                if d.peak_cycle_count >= 2 {
                    return Ok(Some(Transition::error(FailureMode::PumpNeedsCleanOrReplacement, "third pressure peak cycle")));
                }
                d.peak_cycle_count += 1;
                ctx.pid.set_setpoint(0.0);
                ctx.hw.set_bottom_heater_percent(0)?;
                ctx.hw.set_valve(ValveId::V4, 100)?;
                d.peak_phase = Some(PeakPhase::VentOpen(0.0));
                d.peak_over_since = None;
                return Ok(None);
            }
        } else {
            d.peak_over_since = None;
        }
    }

    let (output, _fired) = ctx.pid.update(temp, ctx.dt_s);
    let pct = output / 100.0;
    ctx.hw.set_bottom_heater_percent(output as u8)?;

    d.effective_elapsed_s += ctx.dt_s;
    let avg_power = ctx.pid.current_window_power_average().unwrap_or(pct * 100.0);
    if avg_power < ctx.cfg.pid.wattage_decrease_limit || ctx.fsm.force_afterstill {
        ctx.fsm.force_afterstill = false;
        return Ok(Some(Transition::To(State::AfterDistill(super::prep::TimedData::default()))));
    }

    let (progress, eta) = math::distill_progress(d.effective_elapsed_s, avg_power / 100.0);
    d.progress_pct = progress;
    d.eta_s = eta;
    Ok(None)
}

fn peak_handling(ctx: &mut Ctx, d: &mut DistillData, phase: PeakPhase) -> StepResult {
    match phase {
        PeakPhase::VentOpen(t) => {
            let t = t + ctx.dt_s;
            if t >= 5.0 {
                ctx.hw.set_valve(ValveId::V4, 0)?;
                d.peak_phase = Some(PeakPhase::Cooling(0.0));
            } else {
                d.peak_phase = Some(PeakPhase::VentOpen(t));
            }
            Ok(None)
        }
        PeakPhase::Cooling(t) => {
            let t = t + ctx.dt_s;
            if t >= f64::from(ctx.cfg.fsm_ev.pressure_peak_handle_time_seconds) {
                ctx.hw.set_valve(ValveId::V4, 100)?;
                d.peak_phase = Some(PeakPhase::VentClose(0.0));
            } else {
                d.peak_phase = Some(PeakPhase::Cooling(t));
            }
            Ok(None)
        }
        PeakPhase::VentClose(t) => {
            let t = t + ctx.dt_s;
            if t >= 5.0 {
                ctx.hw.set_valve(ValveId::V4, 0)?;
                let max_output = (100.0 - 10.0 * d.peak_cycle_count as f64).max(0.0);
                ctx.pid.set_output_limits(0.0, max_output);
                ctx.pid.set_setpoint(ctx.cfg.fsm_ev.distillation_temperature);
                d.peak_phase = None;
            } else {
                d.peak_phase = Some(PeakPhase::VentClose(t));
            }
            Ok(None)
        }
    }
}

pub fn after_distill(ctx: &mut Ctx, d: &mut super::prep::TimedData) -> StepResult {
    d.elapsed_s += ctx.dt_s;
    if d.elapsed_s <= ctx.dt_s {
        ctx.pid.set_setpoint(ctx.cfg.fsm_ev.after_heat_temp);
    }
    let temp = match ctx.hw.bottom_temperature() {
        Ok(t) => t,
        Err(e) => return Ok(Some(Transition::error(FailureMode::HeaterError, e.to_string()))),
    };
    let (output, _) = ctx.pid.update(temp, ctx.dt_s);
    ctx.hw.set_bottom_heater_percent(output as u8)?;
    if d.elapsed_s < f64::from(ctx.cfg.fsm_ev.after_heat_time) {
        return Ok(None);
    }
    Ok(Some(Transition::To(State::FinalSolventRemoval(FinalAirData::default()))))
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FinalAirData {
    pub cycle: u32,
    pub open: bool,
    pub phase_elapsed_s: f64,
}

pub fn final_solvent_removal(ctx: &mut Ctx, d: &mut FinalAirData) -> StepResult {
    d.phase_elapsed_s += ctx.dt_s;
    if d.phase_elapsed_s <= ctx.dt_s && d.cycle == 0 && !d.open {
        ctx.hw.set_valve(ValveId::V4, 100)?;
        d.open = true;
    }
    let threshold = if d.open {
        f64::from(ctx.cfg.fsm_ev.final_air_cycles_time_open)
    } else {
        f64::from(ctx.cfg.fsm_ev.final_air_cycles_time_closed)
    };
    if d.phase_elapsed_s < threshold {
        return Ok(None);
    }
    d.phase_elapsed_s = 0.0;
    if d.open {
        ctx.hw.set_valve(ValveId::V4, 0)?;
        d.open = false;
        d.cycle += 1;
    } else {
        ctx.hw.set_valve(ValveId::V4, 100)?;
        d.open = true;
    }
    if d.cycle >= ctx.cfg.fsm_ev.final_air_cycles {
        ctx.pid.pid_off();
        ctx.hw.set_bottom_heater_percent(0)?;
        ctx.hw.set_pump_pwm(0)?;
        ctx.hw.set_fan_pwm(0)?;
        ctx.hw.set_valves_in_relax_position()?;
        return Ok(Some(Transition::To(State::Ready)));
    }
    Ok(None)
}
