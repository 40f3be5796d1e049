//! Domain math: ideal-gas volume calculation, leak detection, flow-rate
//! control, and distill-progress estimation.
//!
//! Every function here is pure and stateless — no hardware access, no
//! config lookups beyond whatever is passed in. Grounded directly on the
//! upstream `module_math.py` this controller's arithmetic descends from;
//! function names were translated to the domain's own vocabulary rather
//! than kept verbatim.

/// `p·V` — the ideal-gas PV product used to infer volume changes from
/// pressure deltas.
pub fn pv_const(pressure: f64, total_volume: f64) -> f64 {
    pressure * total_volume
}

/// Pressure leak rate between two timestamped samples (mbar/s).
pub fn pressure_leak(p_stop: f64, p_start: f64, t_stop: f64, t_start: f64) -> f64 {
    (p_stop - p_start) / (t_stop - t_start)
}

/// Pressure leak rate over a fixed sample interval, used by the SystemCheck
/// rise tests that specify a duration rather than two timestamps.
pub fn pressure_leak_by_sample_time(p_stop: f64, p_start: f64, sample_time: f64) -> f64 {
    (p_stop - p_start) / sample_time
}

/// Remaining aspirated volume given the PV constant and leak-corrected
/// current pressure.
pub fn total_volume_aspirated(total_volume: f64, pv: f64, pressure_now_minus_leak: f64) -> f64 {
    total_volume - (pv / pressure_now_minus_leak)
}

/// Accumulated leak contribution since `t_leak`, added to any prior
/// historic leak term.
pub fn leakfactor(now: f64, t_leak: f64, system_leak: f64, historic_leak: f64) -> f64 {
    (now - t_leak) * system_leak + historic_leak
}

/// Historic leak accumulated between two timestamps at a fixed rate.
pub fn historic_leak(system_leak: f64, stop_time: f64, start_time: f64) -> f64 {
    system_leak * (stop_time - start_time)
}

/// Infer the extraction-chamber air volume after two pressures have
/// equalised across a known total volume.
pub fn calc_raw_volume(p_full: f64, total_volume: f64, p_init: f64, p_atm: f64) -> f64 {
    (p_full * total_volume - total_volume * p_init) / (p_atm - p_full)
}

/// Instantaneous flow rate between two volume samples.
pub fn flowrate(v_now: f64, v_prev: f64, t_now: f64, t_prev: f64) -> f64 {
    (v_now - v_prev) / (t_now - t_prev)
}

/// Pressure slope — change in pressure per second. Distinct entry point
/// from [`pressure_leak`] so callers that already have a precomputed delta
/// don't need to fabricate a start/stop pair; the upstream implementation
/// swallowed an exception here and always handed callers zero — this
/// version surfaces the real value instead (§9 open question).
pub fn pressure_slope(pressure_diff: f64, time_elapsed: f64) -> f64 {
    pressure_diff / time_elapsed
}

/// Linear interpolation with edge clamping, matching `numpy.interp`'s
/// behaviour for points outside the table: values below the first knot
/// saturate to the first range value, values above the last knot saturate
/// to the last.
fn interp(x: f64, xs: &[f64], ys: &[f64]) -> f64 {
    debug_assert_eq!(xs.len(), ys.len());
    debug_assert!(!xs.is_empty());
    if x <= xs[0] {
        return ys[0];
    }
    if x >= xs[xs.len() - 1] {
        return ys[ys.len() - 1];
    }
    for w in xs.windows(2).zip(ys.windows(2)) {
        let ((x0, x1), (y0, y1)) = ((w.0[0], w.0[1]), (w.1[0], w.1[1]));
        if x >= x0 && x <= x1 {
            let t = (x - x0) / (x1 - x0);
            return y0 + t * (y1 - y0);
        }
    }
    ys[ys.len() - 1]
}

/// Convert a measured air-displacement volume into the calibrated
/// plant-and-liquid volume, by 1-D linear interpolation over the two
/// calibration vectors carried in `FSM_EX`.
pub fn convert_air_to_liquid(air_volume_calibration: &[f64], actual_volume_calibration: &[f64], air_volume: f64) -> f64 {
    interp(air_volume, air_volume_calibration, actual_volume_calibration)
}

/// Estimated completion fraction and ETA (seconds) for a distillation run,
/// derived from how much heater power is still being drawn. Power uptake
/// is a fraction in `[0, 1]` (PID average output / 100).
pub fn distill_progress(elapsed_s: f64, power_uptake: f64) -> (f64, f64) {
    const POWER_X: [f64; 3] = [0.5, 0.8, 0.9];
    const TIME_Y: [f64; 3] = [6.0 * 3600.0, 2.5 * 3600.0, 2.0 * 3600.0];

    let elapsed_s = elapsed_s.max(1.0);
    let time_estimated = interp(power_uptake, &POWER_X, &TIME_Y);

    if time_estimated - elapsed_s > 0.0 {
        (elapsed_s / time_estimated, time_estimated - elapsed_s)
    } else {
        (0.99, 1.0)
    }
}

/// One staircase band: an `error_pct` upper threshold and the valve step
/// size/settle period to apply when the flow error falls at or below it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowAdjustBand {
    pub threshold_pct: f64,
    pub step_size: f64,
    pub step_period_s: f64,
}

/// Pick the first band whose threshold is `>= error_pct`; past the last
/// band (table exhausted), the final band applies as a fallback — the
/// table is meant to be read as 1..10 uniformly even though the upstream
/// implementation indexes it 1..9 with the 10th as a special case (§9 open
/// question, not "fixed" here, just generalised).
pub fn step_and_period(bands: &[FlowAdjustBand], error_pct: f64) -> (f64, f64) {
    debug_assert!(!bands.is_empty());
    for band in bands {
        if error_pct <= band.threshold_pct {
            return (band.step_size, band.step_period_s);
        }
    }
    let last = bands.last().unwrap();
    (last.step_size, last.step_period_s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pv_const_is_product() {
        assert_eq!(pv_const(300.0, 2.0), 600.0);
    }

    #[test]
    fn pressure_leak_matches_slope() {
        assert_eq!(pressure_leak(100.0, 120.0, 10.0, 0.0), -2.0);
    }

    #[test]
    fn convert_air_to_liquid_round_trips_calibration_points() {
        let air = [155.0, 170.0, 185.0];
        let liquid = [175.0, 180.0, 185.0];
        for (a, l) in air.iter().zip(liquid.iter()) {
            assert!((convert_air_to_liquid(&air, &liquid, *a) - l).abs() < 1e-9);
        }
    }

    #[test]
    fn distill_progress_saturates_when_time_estimate_exceeded() {
        let (pct, eta) = distill_progress(100_000.0, 0.9);
        assert_eq!((pct, eta), (0.99, 1.0));
    }

    #[test]
    fn distill_progress_monotone_in_elapsed() {
        let (p1, _) = distill_progress(1000.0, 0.8);
        let (p2, _) = distill_progress(2000.0, 0.8);
        assert!(p2 >= p1);
    }

    #[test]
    fn distill_progress_monotone_in_power() {
        let (p_low, _) = distill_progress(5000.0, 0.5);
        let (p_high, _) = distill_progress(5000.0, 0.9);
        assert!(p_high >= p_low);
    }

    fn default_bands() -> Vec<FlowAdjustBand> {
        // Mirrors the FLOW_ADJ defaults: staircase from 25% to 600% error.
        let thresholds = [25.0, 50.0, 75.0, 100.0, 150.0, 200.0, 300.0, 400.0, 500.0, 600.0];
        thresholds
            .iter()
            .enumerate()
            .map(|(i, t)| FlowAdjustBand {
                threshold_pct: *t,
                step_size: (i + 1) as f64,
                step_period_s: 1.0,
            })
            .collect()
    }

    #[test]
    fn step_and_period_picks_first_satisfying_band() {
        let bands = default_bands();
        assert_eq!(step_and_period(&bands, 0.0), (1.0, 1.0));
    }

    #[test]
    fn step_and_period_falls_back_to_last_band_past_table() {
        let bands = default_bands();
        assert_eq!(step_and_period(&bands, 6000.0), (10.0, 1.0));
    }
}
