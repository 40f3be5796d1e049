//! On-disk configuration: a keyed, INI-shaped bag of tunables (§6).
//!
//! Loaded with the `ini` crate and persisted atomically (temp file +
//! rename) the way this crate's lineage debounced and flushed its flat
//! `SystemConfig` through a config port — generalised here from one
//! section to the seven below. The control loop polls the file's mtime
//! and rebuilds this bag on change (hot reload); an in-flight state keeps
//! its already-cached thresholds until its next `Enter`.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use ini::Ini;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq)]
pub struct SystemSection {
    pub pressure_slope_sample_time_ms: u32,
    pub soak_time_seconds: u32,
}

impl Default for SystemSection {
    fn default() -> Self {
        Self { pressure_slope_sample_time_ms: 2000, soak_time_seconds: 10 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FsmExSection {
    pub maximum_vacuum_pressure: f64,
    pub maximum_vacuum_time: u32,
    pub tube_filling_vacuum: f64,
    pub max_pressure_loss_evc: f64,
    pub leak_sample_time: u32,
    pub leak_delay_time: u32,
    pub pressure_eq_time: u32,
    pub evc_volume: f64,
    pub valve_last_known_setting: u8,
    pub valve_start_close_value: u8,
    pub valve_adjust_hysteresis: f64,
    pub valve_adjust_delay: u32,
    pub calculated_exc_volume_calibration_data: [f64; 3],
    pub calculated_aspirated_volume_calibration_data: [f64; 3],
    pub top_up_time: u32,
    pub top_up_afterfill_valve_setting: u8,
    pub aspirate_volume: f64,
    pub aspirate_speed: u8,
    pub number_of_flushes: u32,
    pub flush_time: u32,
    pub flowrate_fall_limit: f64,
}

impl Default for FsmExSection {
    fn default() -> Self {
        Self {
            maximum_vacuum_pressure: 300.0,
            maximum_vacuum_time: 120,
            tube_filling_vacuum: 300.0,
            max_pressure_loss_evc: 2.5,
            leak_sample_time: 3,
            leak_delay_time: 10,
            pressure_eq_time: 4,
            evc_volume: 290.0,
            valve_last_known_setting: 28,
            valve_start_close_value: 40,
            valve_adjust_hysteresis: 0.1,
            valve_adjust_delay: 1,
            calculated_exc_volume_calibration_data: [155.0, 170.0, 185.0],
            calculated_aspirated_volume_calibration_data: [175.0, 180.0, 185.0],
            top_up_time: 8,
            top_up_afterfill_valve_setting: 60,
            aspirate_volume: 150.0,
            aspirate_speed: 2,
            number_of_flushes: 1,
            flush_time: 10,
            flowrate_fall_limit: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FsmEvSection {
    pub min_temp: f64,
    pub max_temp: f64,
    pub error_pressure_during_distill: f64,
    pub time_delay_before_pressure_check: u32,
    pub distillation_temperature: f64,
    pub after_heat_time: u32,
    pub after_heat_temp: f64,
    pub final_air_cycles: u32,
    pub final_air_cycles_time_open: u32,
    pub final_air_cycles_time_closed: u32,
    pub temperature_critical_level: f64,
    pub temperature_critical_level_max_interval: u32,
    pub temperature_check_interval: u32,
    pub temperature_increase_threshold: f64,
    pub temperature_check_threshold: f64,
    pub error_pressure_increase_threshold: f64,
    pub ambient_pressure_upper_bound: f64,
    pub ambient_pressure_lower_bound: f64,
    pub peak_pressure_detection_interval_seconds: u32,
    pub peak_pressure_during_distill: f64,
    pub pressure_peak_handle_time_seconds: u32,
    pub pressure_peak_max_pressure: f64,
}

impl Default for FsmEvSection {
    fn default() -> Self {
        Self {
            min_temp: 0.0,
            max_temp: 160.0,
            error_pressure_during_distill: 375.0,
            time_delay_before_pressure_check: 90,
            distillation_temperature: 125.0,
            after_heat_time: 240,
            after_heat_temp: 107.0,
            final_air_cycles: 16,
            final_air_cycles_time_open: 2,
            final_air_cycles_time_closed: 88,
            temperature_critical_level: 150.0,
            temperature_critical_level_max_interval: 30,
            temperature_check_interval: 20,
            temperature_increase_threshold: 5.0,
            temperature_check_threshold: 100.0,
            error_pressure_increase_threshold: 4.0,
            ambient_pressure_upper_bound: 1100.0,
            ambient_pressure_lower_bound: 750.0,
            peak_pressure_detection_interval_seconds: 20,
            peak_pressure_during_distill: 300.0,
            pressure_peak_handle_time_seconds: 600,
            pressure_peak_max_pressure: 600.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecarbSection {
    pub temperature: f64,
    pub time_minutes: u32,
}

impl Default for DecarbSection {
    fn default() -> Self {
        Self { temperature: 125.0, time_minutes: 30 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OilMixSection {
    pub temperature: f64,
    pub time_minutes: u32,
}

impl Default for OilMixSection {
    fn default() -> Self {
        Self { temperature: 60.0, time_minutes: 10 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidSection {
    pub p_term: f64,
    pub i_term: f64,
    pub d_term: f64,
    pub sample_time_s: f64,
    pub windup: f64,
    pub initial_window_delay_s: f64,
    pub current_window_s: f64,
    pub wattage_decrease_limit: f64,
}

impl Default for PidSection {
    fn default() -> Self {
        Self {
            p_term: 1.0,
            i_term: 0.25,
            d_term: 0.05,
            sample_time_s: 1.0,
            windup: 200.0,
            initial_window_delay_s: 300.0,
            current_window_s: 100.0,
            wattage_decrease_limit: 35.0,
        }
    }
}

/// One step of the flow-adjustment staircase (§4.A `step_and_period`):
/// once the flow-rate error exceeds `pct_stage`, the valve nudges by
/// `step_size` every `step_period` seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowAdjustBand {
    pub pct_stage: f64,
    pub step_size: f64,
    pub step_period_s: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlowAdjSection {
    pub bands: Vec<FlowAdjustBand>,
}

impl FlowAdjSection {
    /// Project the configured staircase into the shape `domain::math::step_and_period`
    /// consumes.
    pub fn math_bands(&self) -> Vec<crate::domain::math::FlowAdjustBand> {
        self.bands
            .iter()
            .map(|b| crate::domain::math::FlowAdjustBand {
                threshold_pct: b.pct_stage,
                step_size: b.step_size,
                step_period_s: b.step_period_s,
            })
            .collect()
    }
}

impl Default for FlowAdjSection {
    fn default() -> Self {
        // Staircase from 25% to 600% error, ten stages, each step finer
        // and more frequent as the error widens.
        let stages = [
            (25.0, 1.0, 10.0),
            (50.0, 1.0, 8.0),
            (75.0, 2.0, 8.0),
            (100.0, 2.0, 6.0),
            (150.0, 3.0, 6.0),
            (200.0, 3.0, 4.0),
            (300.0, 4.0, 4.0),
            (400.0, 5.0, 3.0),
            (500.0, 6.0, 2.0),
            (600.0, 8.0, 1.0),
        ];
        Self {
            bands: stages
                .into_iter()
                .map(|(pct_stage, step_size, step_period_s)| FlowAdjustBand { pct_stage, step_size, step_period_s })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Config {
    pub system: SystemSection,
    pub fsm_ex: FsmExSection,
    pub fsm_ev: FsmEvSection,
    pub decarb: DecarbSection,
    pub oil_mix: OilMixSection,
    pub pid: PidSection,
    pub flow_adj: FlowAdjSection,
}

fn get_f64(section: &ini::Properties, key: &str, default: f64) -> Result<f64, ConfigError> {
    match section.get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::ValidationFailed(format!("{key}={raw}"))),
    }
}

fn get_u32(section: &ini::Properties, key: &str, default: u32) -> Result<u32, ConfigError> {
    match section.get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::ValidationFailed(format!("{key}={raw}"))),
    }
}

fn get_u8(section: &ini::Properties, key: &str, default: u8) -> Result<u8, ConfigError> {
    match section.get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::ValidationFailed(format!("{key}={raw}"))),
    }
}

fn get_triplet(section: &ini::Properties, key: &str, default: [f64; 3]) -> Result<[f64; 3], ConfigError> {
    match section.get(key) {
        None => Ok(default),
        Some(raw) => {
            let parts: Vec<f64> = raw
                .split(',')
                .map(|p| p.trim().parse::<f64>())
                .collect::<Result<_, _>>()
                .map_err(|_| ConfigError::ValidationFailed(format!("{key}={raw}")))?;
            if parts.len() != 3 {
                return Err(ConfigError::ValidationFailed(format!("{key} needs exactly 3 values, got {}", parts.len())));
            }
            Ok([parts[0], parts[1], parts[2]])
        }
    }
}

impl Config {
    /// Load from `path`, falling back to all-defaults if the file is
    /// absent (first boot). Present-but-unparseable values are a hard
    /// [`ConfigError::ValidationFailed`] — a typo in the file should not
    /// silently run with a wrong threshold.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Corrupted(e.to_string()))?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let empty = ini::Properties::new();
        let system = ini.section(Some("SYSTEM")).unwrap_or(&empty);
        let fsm_ex = ini.section(Some("FSM_EX")).unwrap_or(&empty);
        let fsm_ev = ini.section(Some("FSM_EV")).unwrap_or(&empty);
        let decarb = ini.section(Some("DECARB")).unwrap_or(&empty);
        let oil_mix = ini.section(Some("OIL_MIX")).unwrap_or(&empty);
        let pid = ini.section(Some("PID")).unwrap_or(&empty);
        let flow_adj = ini.section(Some("FLOW_ADJ"));

        let d = Self::default();
        Ok(Self {
            system: SystemSection {
                pressure_slope_sample_time_ms: get_u32(system, "pressure_slope_sample_time", d.system.pressure_slope_sample_time_ms)?,
                soak_time_seconds: get_u32(system, "soak_time_seconds", d.system.soak_time_seconds)?,
            },
            fsm_ex: FsmExSection {
                maximum_vacuum_pressure: get_f64(fsm_ex, "maximum_vacuum_pressure", d.fsm_ex.maximum_vacuum_pressure)?,
                maximum_vacuum_time: get_u32(fsm_ex, "maximum_vacuum_time", d.fsm_ex.maximum_vacuum_time)?,
                tube_filling_vacuum: get_f64(fsm_ex, "tube_filling_vacuum", d.fsm_ex.tube_filling_vacuum)?,
                max_pressure_loss_evc: get_f64(fsm_ex, "max_pressure_loss_evc", d.fsm_ex.max_pressure_loss_evc)?,
                leak_sample_time: get_u32(fsm_ex, "leak_sample_time", d.fsm_ex.leak_sample_time)?,
                leak_delay_time: get_u32(fsm_ex, "leak_delay_time", d.fsm_ex.leak_delay_time)?,
                pressure_eq_time: get_u32(fsm_ex, "pressure_eq_time", d.fsm_ex.pressure_eq_time)?,
                evc_volume: get_f64(fsm_ex, "evc_volume", d.fsm_ex.evc_volume)?,
                valve_last_known_setting: get_u8(fsm_ex, "valve_last_known_setting", d.fsm_ex.valve_last_known_setting)?,
                valve_start_close_value: get_u8(fsm_ex, "valve_start_close_value", d.fsm_ex.valve_start_close_value)?,
                valve_adjust_hysteresis: get_f64(fsm_ex, "valve_adjust_hysteresis", d.fsm_ex.valve_adjust_hysteresis)?,
                valve_adjust_delay: get_u32(fsm_ex, "valve_adjust_delay", d.fsm_ex.valve_adjust_delay)?,
                calculated_exc_volume_calibration_data: get_triplet(
                    fsm_ex,
                    "calculated_exc_volume_calibration_data",
                    d.fsm_ex.calculated_exc_volume_calibration_data,
                )?,
                calculated_aspirated_volume_calibration_data: get_triplet(
                    fsm_ex,
                    "calculated_aspirated_volume_calibration_data",
                    d.fsm_ex.calculated_aspirated_volume_calibration_data,
                )?,
                top_up_time: get_u32(fsm_ex, "top_up_time", d.fsm_ex.top_up_time)?,
                top_up_afterfill_valve_setting: get_u8(fsm_ex, "top_up_afterfill_valve_setting", d.fsm_ex.top_up_afterfill_valve_setting)?,
                aspirate_volume: get_f64(fsm_ex, "aspirate_volume", d.fsm_ex.aspirate_volume)?,
                aspirate_speed: get_u8(fsm_ex, "aspirate_speed", d.fsm_ex.aspirate_speed)?,
                number_of_flushes: get_u32(fsm_ex, "number_of_flushes", d.fsm_ex.number_of_flushes)?,
                flush_time: get_u32(fsm_ex, "flush_time", d.fsm_ex.flush_time)?,
                flowrate_fall_limit: get_f64(fsm_ex, "flowrate_fall_limit", d.fsm_ex.flowrate_fall_limit)?,
            },
            fsm_ev: FsmEvSection {
                min_temp: get_f64(fsm_ev, "min_temp", d.fsm_ev.min_temp)?,
                max_temp: get_f64(fsm_ev, "max_temp", d.fsm_ev.max_temp)?,
                error_pressure_during_distill: get_f64(fsm_ev, "error_pressure_during_distill", d.fsm_ev.error_pressure_during_distill)?,
                time_delay_before_pressure_check: get_u32(
                    fsm_ev,
                    "time_delay_before_pressure_check",
                    d.fsm_ev.time_delay_before_pressure_check,
                )?,
                distillation_temperature: get_f64(fsm_ev, "distillation_temperature", d.fsm_ev.distillation_temperature)?,
                after_heat_time: get_u32(fsm_ev, "after_heat_time", d.fsm_ev.after_heat_time)?,
                after_heat_temp: get_f64(fsm_ev, "after_heat_temp", d.fsm_ev.after_heat_temp)?,
                final_air_cycles: get_u32(fsm_ev, "final_air_cycles", d.fsm_ev.final_air_cycles)?,
                final_air_cycles_time_open: get_u32(fsm_ev, "final_air_cycles_time_open", d.fsm_ev.final_air_cycles_time_open)?,
                final_air_cycles_time_closed: get_u32(fsm_ev, "final_air_cycles_time_closed", d.fsm_ev.final_air_cycles_time_closed)?,
                temperature_critical_level: get_f64(fsm_ev, "temperature_critical_level", d.fsm_ev.temperature_critical_level)?,
                temperature_critical_level_max_interval: get_u32(
                    fsm_ev,
                    "temperature_critical_level_max_interval",
                    d.fsm_ev.temperature_critical_level_max_interval,
                )?,
                temperature_check_interval: get_u32(fsm_ev, "temperature_check_interval", d.fsm_ev.temperature_check_interval)?,
                temperature_increase_threshold: get_f64(
                    fsm_ev,
                    "temperature_increase_threshold",
                    d.fsm_ev.temperature_increase_threshold,
                )?,
                temperature_check_threshold: get_f64(fsm_ev, "temperature_check_threshold", d.fsm_ev.temperature_check_threshold)?,
                error_pressure_increase_threshold: get_f64(
                    fsm_ev,
                    "error_pressure_increase_threshold",
                    d.fsm_ev.error_pressure_increase_threshold,
                )?,
                ambient_pressure_upper_bound: get_f64(fsm_ev, "ambient_pressure_upper_bound", d.fsm_ev.ambient_pressure_upper_bound)?,
                ambient_pressure_lower_bound: get_f64(fsm_ev, "ambient_pressure_lower_bound", d.fsm_ev.ambient_pressure_lower_bound)?,
                peak_pressure_detection_interval_seconds: get_u32(
                    fsm_ev,
                    "peak_pressure_detection_interval_seconds",
                    d.fsm_ev.peak_pressure_detection_interval_seconds,
                )?,
                peak_pressure_during_distill: get_f64(fsm_ev, "peak_pressure_during_distill", d.fsm_ev.peak_pressure_during_distill)?,
                pressure_peak_handle_time_seconds: get_u32(
                    fsm_ev,
                    "pressure_peak_handle_time_seconds",
                    d.fsm_ev.pressure_peak_handle_time_seconds,
                )?,
                pressure_peak_max_pressure: get_f64(fsm_ev, "pressure_peak_max_pressure", d.fsm_ev.pressure_peak_max_pressure)?,
            },
            decarb: DecarbSection {
                temperature: get_f64(decarb, "temperature", d.decarb.temperature)?,
                time_minutes: get_u32(decarb, "time_minutes", d.decarb.time_minutes)?,
            },
            oil_mix: OilMixSection {
                temperature: get_f64(oil_mix, "temperature", d.oil_mix.temperature)?,
                time_minutes: get_u32(oil_mix, "time_minutes", d.oil_mix.time_minutes)?,
            },
            pid: PidSection {
                p_term: get_f64(pid, "Pterm", d.pid.p_term)?,
                i_term: get_f64(pid, "Iterm", d.pid.i_term)?,
                d_term: get_f64(pid, "Dterm", d.pid.d_term)?,
                sample_time_s: get_f64(pid, "sample_time", d.pid.sample_time_s)?,
                windup: get_f64(pid, "windup", d.pid.windup)?,
                initial_window_delay_s: get_f64(pid, "initial_window_delay", d.pid.initial_window_delay_s)?,
                current_window_s: get_f64(pid, "current_window", d.pid.current_window_s)?,
                wattage_decrease_limit: get_f64(pid, "wattage_decrease_limit", d.pid.wattage_decrease_limit)?,
            },
            flow_adj: match flow_adj {
                None => d.flow_adj,
                Some(section) => {
                    let mut bands = Vec::with_capacity(10);
                    for n in 1..=10 {
                        let pct_stage = get_f64(section, &format!("pct_stage_{n}"), d.flow_adj.bands[n - 1].pct_stage)?;
                        let step_size = get_f64(section, &format!("step_size_stage_{n}"), d.flow_adj.bands[n - 1].step_size)?;
                        let step_period_s = get_f64(section, &format!("step_period_stage_{n}"), d.flow_adj.bands[n - 1].step_period_s)?;
                        bands.push(FlowAdjustBand { pct_stage, step_size, step_period_s });
                    }
                    FlowAdjSection { bands }
                }
            },
        })
    }

    /// Serialise back to INI sections and persist via temp-file-then-rename
    /// so a concurrent reader (or a crash mid-write) never observes a
    /// half-written file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let mut ini = Ini::new();
        ini.with_section(Some("SYSTEM"))
            .set("pressure_slope_sample_time", self.system.pressure_slope_sample_time_ms.to_string())
            .set("soak_time_seconds", self.system.soak_time_seconds.to_string());

        ini.with_section(Some("FSM_EX"))
            .set("maximum_vacuum_pressure", self.fsm_ex.maximum_vacuum_pressure.to_string())
            .set("maximum_vacuum_time", self.fsm_ex.maximum_vacuum_time.to_string())
            .set("tube_filling_vacuum", self.fsm_ex.tube_filling_vacuum.to_string())
            .set("max_pressure_loss_evc", self.fsm_ex.max_pressure_loss_evc.to_string())
            .set("leak_sample_time", self.fsm_ex.leak_sample_time.to_string())
            .set("leak_delay_time", self.fsm_ex.leak_delay_time.to_string())
            .set("pressure_eq_time", self.fsm_ex.pressure_eq_time.to_string())
            .set("evc_volume", self.fsm_ex.evc_volume.to_string())
            .set("valve_last_known_setting", self.fsm_ex.valve_last_known_setting.to_string())
            .set("valve_start_close_value", self.fsm_ex.valve_start_close_value.to_string())
            .set("valve_adjust_hysteresis", self.fsm_ex.valve_adjust_hysteresis.to_string())
            .set("valve_adjust_delay", self.fsm_ex.valve_adjust_delay.to_string())
            .set(
                "calculated_exc_volume_calibration_data",
                join_triplet(self.fsm_ex.calculated_exc_volume_calibration_data),
            )
            .set(
                "calculated_aspirated_volume_calibration_data",
                join_triplet(self.fsm_ex.calculated_aspirated_volume_calibration_data),
            )
            .set("top_up_time", self.fsm_ex.top_up_time.to_string())
            .set("top_up_afterfill_valve_setting", self.fsm_ex.top_up_afterfill_valve_setting.to_string())
            .set("aspirate_volume", self.fsm_ex.aspirate_volume.to_string())
            .set("aspirate_speed", self.fsm_ex.aspirate_speed.to_string())
            .set("number_of_flushes", self.fsm_ex.number_of_flushes.to_string())
            .set("flush_time", self.fsm_ex.flush_time.to_string())
            .set("flowrate_fall_limit", self.fsm_ex.flowrate_fall_limit.to_string());

        ini.with_section(Some("FSM_EV"))
            .set("min_temp", self.fsm_ev.min_temp.to_string())
            .set("max_temp", self.fsm_ev.max_temp.to_string())
            .set("error_pressure_during_distill", self.fsm_ev.error_pressure_during_distill.to_string())
            .set("time_delay_before_pressure_check", self.fsm_ev.time_delay_before_pressure_check.to_string())
            .set("distillation_temperature", self.fsm_ev.distillation_temperature.to_string())
            .set("after_heat_time", self.fsm_ev.after_heat_time.to_string())
            .set("after_heat_temp", self.fsm_ev.after_heat_temp.to_string())
            .set("final_air_cycles", self.fsm_ev.final_air_cycles.to_string())
            .set("final_air_cycles_time_open", self.fsm_ev.final_air_cycles_time_open.to_string())
            .set("final_air_cycles_time_closed", self.fsm_ev.final_air_cycles_time_closed.to_string())
            .set("temperature_critical_level", self.fsm_ev.temperature_critical_level.to_string())
            .set(
                "temperature_critical_level_max_interval",
                self.fsm_ev.temperature_critical_level_max_interval.to_string(),
            )
            .set("temperature_check_interval", self.fsm_ev.temperature_check_interval.to_string())
            .set("temperature_increase_threshold", self.fsm_ev.temperature_increase_threshold.to_string())
            .set("temperature_check_threshold", self.fsm_ev.temperature_check_threshold.to_string())
            .set("error_pressure_increase_threshold", self.fsm_ev.error_pressure_increase_threshold.to_string())
            .set("ambient_pressure_upper_bound", self.fsm_ev.ambient_pressure_upper_bound.to_string())
            .set("ambient_pressure_lower_bound", self.fsm_ev.ambient_pressure_lower_bound.to_string())
            .set(
                "peak_pressure_detection_interval_seconds",
                self.fsm_ev.peak_pressure_detection_interval_seconds.to_string(),
            )
            .set("peak_pressure_during_distill", self.fsm_ev.peak_pressure_during_distill.to_string())
            .set("pressure_peak_handle_time_seconds", self.fsm_ev.pressure_peak_handle_time_seconds.to_string())
            .set("pressure_peak_max_pressure", self.fsm_ev.pressure_peak_max_pressure.to_string());

        ini.with_section(Some("DECARB"))
            .set("temperature", self.decarb.temperature.to_string())
            .set("time_minutes", self.decarb.time_minutes.to_string());

        ini.with_section(Some("OIL_MIX"))
            .set("temperature", self.oil_mix.temperature.to_string())
            .set("time_minutes", self.oil_mix.time_minutes.to_string());

        ini.with_section(Some("PID"))
            .set("Pterm", self.pid.p_term.to_string())
            .set("Iterm", self.pid.i_term.to_string())
            .set("Dterm", self.pid.d_term.to_string())
            .set("sample_time", self.pid.sample_time_s.to_string())
            .set("windup", self.pid.windup.to_string())
            .set("initial_window_delay", self.pid.initial_window_delay_s.to_string())
            .set("current_window", self.pid.current_window_s.to_string())
            .set("wattage_decrease_limit", self.pid.wattage_decrease_limit.to_string());

        {
            let mut section = ini.with_section(Some("FLOW_ADJ"));
            for (n, band) in self.flow_adj.bands.iter().enumerate() {
                let n = n + 1;
                section
                    .set(format!("pct_stage_{n}"), band.pct_stage.to_string())
                    .set(format!("step_size_stage_{n}"), band.step_size.to_string())
                    .set(format!("step_period_stage_{n}"), band.step_period_s.to_string());
            }
        }

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let tmp = tempfile::NamedTempFile::new_in(dir)?;
        ini.write_to(&mut tmp.as_file()).map_err(|e| ConfigError::Io(e.to_string()))?;
        tmp.persist(path).map_err(|e| ConfigError::Io(e.error.to_string()))?;
        Ok(())
    }

    /// mtime of `path`, or `None` if it doesn't exist yet — used by the
    /// control loop's hot-reload poll.
    pub fn mtime(path: &Path) -> Option<SystemTime> {
        std::fs::metadata(path).and_then(|m| m.modified()).ok()
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from("/etc/merlin/config.ini")
    }
}

fn join_triplet(values: [f64; 3]) -> String {
    format!("{},{},{}", values[0], values[1], values[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = Config::load(Path::new("/nonexistent/path/does-not-exist.ini")).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ini");
        let mut cfg = Config::default();
        cfg.fsm_ex.evc_volume = 301.5;
        cfg.pid.p_term = 2.5;
        cfg.flow_adj.bands[0].step_size = 9.0;
        cfg.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn corrupted_value_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, "[FSM_EX]\nevc_volume=not-a-number\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::ValidationFailed(_))));
    }

    #[test]
    fn flow_adj_defaults_span_ten_bands_ascending() {
        let cfg = Config::default();
        assert_eq!(cfg.flow_adj.bands.len(), 10);
        assert_eq!(cfg.flow_adj.bands.first().unwrap().pct_stage, 25.0);
        assert_eq!(cfg.flow_adj.bands.last().unwrap().pct_stage, 600.0);
    }
}
