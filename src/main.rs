//! Entry point: parse CLI flags, load config and stats, build the
//! hardware façade, and hand off to the supervisor.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use merlinctl::config::Config;
use merlinctl::control::pid::PidController;
use merlinctl::control_loop::ControlLoop;
use merlinctl::commands::CommandQueue;
use merlinctl::fsm::Machine;
use merlinctl::hardware::sim::SimulatedHardware;
use merlinctl::hardware::HardwareFacade;
use merlinctl::stats::StatsStore;
use merlinctl::status::{DeviceInfo, StatusPublisher};
use merlinctl::supervisor::Supervisor;

/// Process controller for a botanical extraction and distillation appliance.
#[derive(Parser, Debug)]
#[command(name = "merlinctld", version)]
struct Cli {
    /// Path to the INI config file.
    #[arg(long, default_value_os_t = Config::default_path())]
    config: PathBuf,

    /// Path to the SQLite stats database.
    #[arg(long, default_value = "/var/lib/merlinctl/stats.db")]
    stats_db: PathBuf,

    /// Run with the simulated hardware façade even when built with the
    /// `hardware` feature — useful for rehearsing a config on a dev host.
    #[arg(long)]
    foreground: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    info!("merlinctld v{} starting", env!("CARGO_PKG_VERSION"));

    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("config load failed ({e}), running with defaults");
            Config::default()
        }
    };

    let today = chrono::Local::now().format("%Y-%m-%d").to_string();
    let stats = match StatsStore::open(&cli.stats_db, &today) {
        Ok(store) => Some(store),
        Err(e) => {
            warn!("stats store unavailable ({e}), lifetime totals will not be tracked this run");
            None
        }
    };

    let hw = build_hardware(cli.foreground).context("hardware initialisation failed")?;

    let pid = PidController::new(
        config.pid.p_term,
        config.pid.i_term,
        config.pid.d_term,
        config.pid.sample_time_s,
        (0.0, 100.0),
        config.pid.initial_window_delay_s,
        config.pid.current_window_s,
    );
    let machine = Machine::new(pid);

    let device_info = DeviceInfo {
        machine_id: "merlin".to_string(),
        unique_id: machine_unique_id(),
        firmware_version: env!("CARGO_PKG_VERSION").to_string(),
        lifetime_distill_minutes: 0.0,
        since_date: today,
    };

    let supervisor = Supervisor::new();
    let control_loop = ControlLoop::new(
        machine,
        config,
        cli.config,
        hw,
        Arc::new(CommandQueue::new()),
        stats,
        Arc::new(StatusPublisher::new()),
        device_info,
        supervisor.heartbeat_handle(),
    );

    supervisor.run(control_loop)?;
    info!("merlinctld exiting cleanly");
    Ok(())
}

#[cfg(feature = "hardware")]
fn build_hardware(foreground: bool) -> Result<Box<dyn HardwareFacade + Send>> {
    if foreground {
        return Ok(Box::new(SimulatedHardware::new()));
    }
    let hw = merlinctl::hardware::linux::LinuxHardware::open().context("failed to open Linux hardware façade")?;
    Ok(Box::new(hw))
}

#[cfg(not(feature = "hardware"))]
fn build_hardware(_foreground: bool) -> Result<Box<dyn HardwareFacade + Send>> {
    Ok(Box::new(SimulatedHardware::new()))
}

fn machine_unique_id() -> String {
    std::env::var("MERLIN_UNIQUE_ID").unwrap_or_else(|_| "unknown".to_string())
}
