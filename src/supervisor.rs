//! Process supervisor (§4.H): owns the control loop thread, a heartbeat
//! watchdog, and cooperative shutdown on POSIX termination signals.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{error, info, warn};
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::flag;

use crate::control_loop::ControlLoop;

const HEARTBEAT_TIMEOUT_SECONDS: u64 = 30;
const HEARTBEAT_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct Supervisor {
    heartbeat: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self { heartbeat: Arc::new(AtomicU64::new(0)), shutdown: Arc::new(AtomicBool::new(false)) }
    }

    pub fn heartbeat_handle(&self) -> Arc<AtomicU64> {
        self.heartbeat.clone()
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Install SIGHUP/SIGINT/SIGTERM handlers that flip the shared shutdown
    /// flag, spawn the control loop on its own thread, and block on a
    /// watchdog poll that exits (and lets `main` release hardware handles
    /// in reverse acquisition order) if the loop stops heartbeating.
    pub fn run(self, mut control_loop: ControlLoop) -> anyhow::Result<()> {
        for signal in [SIGHUP, SIGINT, SIGTERM] {
            flag::register(signal, self.shutdown.clone())?;
        }

        let loop_shutdown = self.shutdown.clone();
        let handle = std::thread::spawn(move || {
            control_loop.run(&loop_shutdown);
        });

        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        self.heartbeat.store(now, Ordering::Relaxed);

        while !self.shutdown.load(Ordering::Relaxed) {
            std::thread::sleep(HEARTBEAT_POLL_INTERVAL);
            let last = self.heartbeat.load(Ordering::Relaxed);
            let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
            if now.saturating_sub(last) > HEARTBEAT_TIMEOUT_SECONDS {
                error!("control loop heartbeat stale by {}s, requesting shutdown", now.saturating_sub(last));
                self.shutdown.store(true, Ordering::Relaxed);
                break;
            }
        }

        info!("supervisor shutting down, waiting for control loop thread to exit");
        if handle.join().is_err() {
            warn!("control loop thread panicked during shutdown");
        }
        Ok(())
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_supervisor_has_zero_heartbeat_and_is_not_shutting_down() {
        let sup = Supervisor::new();
        assert_eq!(sup.heartbeat_handle().load(Ordering::Relaxed), 0);
        assert!(!sup.shutdown_handle().load(Ordering::Relaxed));
    }

    #[test]
    fn shutdown_handle_is_shared_with_heartbeat_handle_owner() {
        let sup = Supervisor::new();
        let handle = sup.shutdown_handle();
        handle.store(true, Ordering::Relaxed);
        assert!(sup.shutdown_handle().load(Ordering::Relaxed));
    }
}
