//! The cooperative 10 ms control loop (§4.F): the only thread that ever
//! touches hardware, Machine, FsmData, Config, or the PID.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{error, info, warn};

use crate::commands::CommandQueue;
use crate::config::Config;
use crate::error::FailureMode;
use crate::fsm::{Machine, State};
use crate::hardware::{AlcoholLevel, HardwareFacade};
use crate::panel::PanelMediator;
use crate::stats::{StatsStore, MODE_DISTILL};
use crate::status::{DeviceInfo, DeviceStatus, StatusPublisher};

pub const TICK_PERIOD: Duration = Duration::from_millis(10);
const LOOP_ALIVE_LOG_INTERVAL: Duration = Duration::from_secs(600);
const STATUS_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

pub struct ControlLoop {
    machine: Machine,
    config: Config,
    config_path: PathBuf,
    config_mtime: Option<SystemTime>,
    hw: Box<dyn HardwareFacade + Send>,
    panel: PanelMediator,
    commands: Arc<CommandQueue>,
    stats: Option<StatsStore>,
    status: Arc<StatusPublisher>,
    device_info: DeviceInfo,
    heartbeat: Arc<AtomicU64>,

    last_alive_log: Instant,
    last_status_publish: Instant,
    last_credited_run_minutes: f64,
    distill_run_start: Option<Instant>,
    alcohol_checked_this_boot: bool,
    on_own_wifi: bool,
}

impl ControlLoop {
    pub fn new(
        machine: Machine,
        config: Config,
        config_path: PathBuf,
        hw: Box<dyn HardwareFacade + Send>,
        commands: Arc<CommandQueue>,
        stats: Option<StatsStore>,
        status: Arc<StatusPublisher>,
        device_info: DeviceInfo,
        heartbeat: Arc<AtomicU64>,
    ) -> Self {
        let config_mtime = Config::mtime(&config_path);
        Self {
            machine,
            config,
            config_path,
            config_mtime,
            hw,
            panel: PanelMediator::new(),
            commands,
            stats,
            status,
            device_info,
            heartbeat,
            last_alive_log: Instant::now(),
            last_status_publish: Instant::now(),
            last_credited_run_minutes: 0.0,
            distill_run_start: None,
            alcohol_checked_this_boot: false,
            on_own_wifi: false,
        }
    }

    /// Run until `shutdown` is observed. Each iteration is one tick of
    /// §4.F's 12 steps, finishing with a ~10 ms sleep.
    pub fn run(&mut self, shutdown: &std::sync::atomic::AtomicBool) {
        while !shutdown.load(Ordering::Relaxed) {
            self.tick();
            std::thread::sleep(TICK_PERIOD);
        }
    }

    fn tick(&mut self) {
        self.signal_heartbeat();
        self.log_alive_if_due();
        self.reload_config_if_changed();

        let panel_outcome = self.panel.poll(self.hw.as_mut(), &mut self.machine, self.on_own_wifi);
        if let Some(cmd) = panel_outcome.command.clone() {
            self.commands.submit(cmd);
        }

        self.run_alcohol_supervision();
        self.credit_distill_run_minutes();

        let command_just_ran = self.drain_one_command();

        self.execute_fsm_step();

        if self.machine.state.is_ready() && self.machine.pid.is_running() {
            let temp = self.hw.bottom_temperature().unwrap_or(0.0);
            let (output, _) = self.machine.pid.update(temp, TICK_PERIOD.as_secs_f64());
            let _ = self.hw.set_bottom_heater_percent(output as u8);
        }

        crate::panel::update_leds(self.hw.as_mut(), &self.machine, &panel_outcome);

        if command_just_ran || self.last_status_publish.elapsed() >= STATUS_REFRESH_INTERVAL {
            self.publish_status();
            self.last_status_publish = Instant::now();
        }
    }

    fn signal_heartbeat(&self) {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        self.heartbeat.store(now, Ordering::Relaxed);
    }

    fn log_alive_if_due(&mut self) {
        if self.last_alive_log.elapsed() >= LOOP_ALIVE_LOG_INTERVAL {
            info!("control loop alive: state={} pause={}", self.machine.state.label(), self.machine.data.pause_flag);
            self.last_alive_log = Instant::now();
        }
    }

    fn reload_config_if_changed(&mut self) {
        let mtime = Config::mtime(&self.config_path);
        if mtime.is_some() && mtime != self.config_mtime {
            match Config::load(&self.config_path) {
                Ok(cfg) => {
                    self.config = cfg;
                    self.config_mtime = mtime;
                }
                Err(e) => error!("config reload failed, keeping previous config: {e}"),
            }
        }
    }

    fn run_alcohol_supervision(&mut self) {
        if self.alcohol_checked_this_boot && self.machine.state.is_ready() {
            return;
        }
        let level = match self.hw.alcohol_level() {
            Ok(l) => l,
            Err(_) => return,
        };
        self.alcohol_checked_this_boot = true;
        if level == AlcoholLevel::Danger {
            let _ = self.hw.set_pump_pwm(0);
            let _ = self.hw.set_bottom_heater_percent(0);
            let _ = self.hw.set_valves_in_relax_position();
            let _ = self.hw.alcohol_sensor_off();
            self.machine.data.enter_failure(FailureMode::AlcoholGasLevelError, "alcohol sensor reported danger level");
            self.machine.force_state(State::Error(crate::fsm::states::misc::ErrorData::default()));
        }
    }

    fn credit_distill_run_minutes(&mut self) {
        let Some(store) = &self.stats else { return };
        if self.machine.state.is_distill_bulk() {
            let start = *self.distill_run_start.get_or_insert_with(Instant::now);
            let minutes = start.elapsed().as_secs_f64() / 60.0;
            if minutes > self.last_credited_run_minutes {
                let delta = minutes - self.last_credited_run_minutes;
                let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64;
                if let Err(e) = store.credit("distill", MODE_DISTILL, delta, now) {
                    warn!("failed crediting distill run-minutes: {e}");
                }
                self.last_credited_run_minutes = minutes;
            }
        } else {
            self.distill_run_start = None;
            self.last_credited_run_minutes = 0.0;
        }
    }

    fn drain_one_command(&mut self) -> bool {
        let Some(command) = self.commands.drain() else { return false };
        if let Err(e) = command.validate(&self.machine) {
            warn!("command rejected at execute time: {e}");
            return false;
        }
        command.execute(&mut self.machine, self.hw.as_mut(), &mut self.config, &self.config_path);
        true
    }

    fn execute_fsm_step(&mut self) {
        let previous_state_was_aspirate = matches!(self.machine.state, State::Aspirate(_));
        self.machine.tick(self.hw.as_mut(), &self.config, TICK_PERIOD.as_secs_f64());

        if previous_state_was_aspirate {
            if let State::Aspirate(d) = &mut self.machine.state {
                if let Some(opening) = d.persist_valve_setting.take() {
                    self.config.fsm_ex.valve_last_known_setting = opening;
                    if let Err(e) = self.config.save(&self.config_path) {
                        error!("failed persisting valve_last_known_setting: {e}");
                    } else {
                        self.config_mtime = Config::mtime(&self.config_path);
                    }
                }
            }
        }
    }

    fn publish_status(&mut self) {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64;
        let lifetime_minutes = self.stats.as_ref().and_then(|s| s.lifetime_minutes("distill").ok()).unwrap_or(0.0);
        let mut info = self.device_info.clone();
        info.lifetime_distill_minutes = lifetime_minutes;
        let snapshot = DeviceStatus::snapshot(&self.machine, &self.config, self.hw.as_mut(), info, now);
        self.status.publish(snapshot);
    }
}
