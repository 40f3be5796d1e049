//! Bounded-output PID controller with anti-windup, an initial delay before
//! the rolling power average publishes, and a trailing window average used
//! to detect distillation end-of-run.
//!
//! Expanded from a minimal proportional/integral/derivative core in this
//! crate's lineage into the fuller interface DistillBulk/CleanPump/
//! AfterDistill/FinalSolventRemoval/Decarb/MixOil all drive through.

use std::collections::VecDeque;

/// Proportional, integral, and derivative contributions from the most
/// recent fire — exposed for diagnostics and tests, not used internally
/// beyond their sum.
pub type Components = (f64, f64, f64);

pub struct PidController {
    kp: f64,
    ki: f64,
    kd: f64,
    sample_time_s: f64,
    output_min: f64,
    output_max: f64,
    initial_delay_s: f64,
    window_size_s: f64,
    windup: f64,

    setpoint: f64,
    running: bool,

    integral: f64,
    prev_error: Option<f64>,
    last_components: Components,

    /// Seconds accumulated since the last fire; reset to 0 on fire.
    time_since_fire: f64,
    /// Seconds accumulated since the last `reset()`.
    time_since_reset: f64,

    /// `(elapsed_since_reset, output)` pairs within the trailing window.
    window: VecDeque<(f64, f64)>,
}

impl PidController {
    pub fn new(
        kp: f64,
        ki: f64,
        kd: f64,
        sample_time_s: f64,
        output_limits: (f64, f64),
        initial_delay_s: f64,
        window_size_s: f64,
    ) -> Self {
        let (output_min, output_max) = output_limits;
        Self {
            kp,
            ki,
            kd,
            sample_time_s,
            output_min,
            output_max,
            initial_delay_s,
            window_size_s,
            windup: f64::MAX,
            setpoint: 0.0,
            running: false,
            integral: 0.0,
            prev_error: None,
            last_components: (0.0, 0.0, 0.0),
            time_since_fire: 0.0,
            time_since_reset: 0.0,
            window: VecDeque::new(),
        }
    }

    pub fn set_windup(&mut self, windup: f64) {
        self.windup = windup;
    }

    pub fn set_output_limits(&mut self, lo: f64, hi: f64) {
        self.output_min = lo;
        self.output_max = hi;
    }

    pub fn set_setpoint(&mut self, setpoint: f64) {
        self.setpoint = setpoint;
    }

    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Enable firing. Does not clear accumulated integral/window state —
    /// callers that want a clean start call [`reset`](Self::reset) first.
    pub fn pid_on(&mut self) {
        self.running = true;
    }

    /// Disable firing; subsequent `update` calls return `(0.0, false)`
    /// until [`pid_on`](Self::pid_on) is called again.
    pub fn pid_off(&mut self) {
        self.running = false;
    }

    /// Clear integral, derivative history, and the rolling window, and
    /// restart the initial-delay timer. Does not change `running`.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = None;
        self.last_components = (0.0, 0.0, 0.0);
        self.time_since_fire = 0.0;
        self.time_since_reset = 0.0;
        self.window.clear();
    }

    /// Advance the controller by `dt_s` seconds with the latest
    /// measurement. Returns `(output, did_fire)`; `did_fire` is `false`
    /// when sampling hasn't accumulated `sample_time_s` yet, or when the
    /// controller is off.
    pub fn update(&mut self, measurement: f64, dt_s: f64) -> (f64, bool) {
        self.time_since_reset += dt_s;

        if !self.running {
            return (0.0, false);
        }

        self.time_since_fire += dt_s;
        if self.time_since_fire < self.sample_time_s {
            return (self.clamped_output(), false);
        }
        let elapsed = self.time_since_fire;
        self.time_since_fire = 0.0;

        let error = self.setpoint - measurement;

        self.integral += error * elapsed;
        self.integral = self.integral.clamp(-self.windup, self.windup);

        let derivative = match self.prev_error {
            Some(prev) => (error - prev) / elapsed,
            None => 0.0,
        };
        self.prev_error = Some(error);

        let p = self.kp * error;
        let i = self.ki * self.integral;
        let d = self.kd * derivative;
        self.last_components = (p, i, d);

        let output = (p + i + d).clamp(self.output_min, self.output_max);

        self.window.push_back((self.time_since_reset, output));
        let cutoff = self.time_since_reset - self.window_size_s;
        while matches!(self.window.front(), Some((t, _)) if *t < cutoff) {
            self.window.pop_front();
        }

        (output, true)
    }

    fn clamped_output(&self) -> f64 {
        let (p, i, d) = self.last_components;
        (p + i + d).clamp(self.output_min, self.output_max)
    }

    /// Arithmetic mean of fired outputs within the trailing window, or
    /// `None` while the initial delay since the last `reset()` has not
    /// yet elapsed.
    pub fn current_window_power_average(&self) -> Option<f64> {
        if self.time_since_reset < self.initial_delay_s {
            return None;
        }
        if self.window.is_empty() {
            return Some(0.0);
        }
        let sum: f64 = self.window.iter().map(|(_, v)| v).sum();
        Some(sum / self.window.len() as f64)
    }

    pub fn components(&self) -> Components {
        self.last_components
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> PidController {
        let mut pid = PidController::new(1.0, 0.25, 0.05, 1.0, (0.0, 100.0), 5.0, 20.0);
        pid.set_windup(200.0);
        pid.set_setpoint(100.0);
        pid.pid_on();
        pid
    }

    #[test]
    fn does_not_fire_before_sample_time_elapses() {
        let mut pid = fresh();
        let (_, fired) = pid.update(20.0, 0.5);
        assert!(!fired);
    }

    #[test]
    fn fires_once_sample_time_elapses() {
        let mut pid = fresh();
        pid.update(20.0, 0.5);
        let (_, fired) = pid.update(20.0, 0.6);
        assert!(fired);
    }

    #[test]
    fn average_is_none_before_initial_delay() {
        let mut pid = fresh();
        pid.update(20.0, 1.0);
        assert_eq!(pid.current_window_power_average(), None);
    }

    #[test]
    fn average_is_some_after_initial_delay() {
        let mut pid = fresh();
        for _ in 0..6 {
            pid.update(20.0, 1.0);
        }
        assert!(pid.current_window_power_average().is_some());
    }

    #[test]
    fn off_forces_zero_output_and_suppresses_firing() {
        let mut pid = fresh();
        pid.pid_off();
        let (output, fired) = pid.update(20.0, 2.0);
        assert_eq!(output, 0.0);
        assert!(!fired);
    }

    #[test]
    fn output_stays_within_limits() {
        let mut pid = fresh();
        for _ in 0..50 {
            let (output, _) = pid.update(0.0, 1.0);
            assert!(output >= 0.0 && output <= 100.0);
        }
    }
}
