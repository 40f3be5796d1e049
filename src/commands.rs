//! The command layer (§4.G): a value type with `validate`/`execute`, and
//! the single-slot queue that gives last-writer-wins submission semantics.

use std::path::Path;
use std::sync::Mutex;

use log::{error, warn};

use crate::config::Config;
use crate::error::CommandError;
use crate::fsm::states::{distill, misc, prep, system_check};
use crate::fsm::{Machine, State};
use crate::hardware::{DeviceState, HardwareFacade, ValveId};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    StartExtraction { run_full: bool, soak_time: Option<u32> },
    StartDecarb,
    StartHeatOil,
    StartDistill,
    StartVentPump,
    StartCleanPump,
    PauseProgram,
    ResumeProgram,
    Reset,
    CleanValve(u8),
}

impl Command {
    pub fn validate(&self, machine: &Machine) -> Result<(), CommandError> {
        match self {
            Self::StartExtraction { .. }
            | Self::StartDecarb
            | Self::StartHeatOil
            | Self::StartDistill
            | Self::StartVentPump
            | Self::StartCleanPump => {
                if machine.data.pause_flag || machine.data.running_flag {
                    return Err(CommandError::RejectedWhilePausedOrRunning);
                }
                Ok(())
            }
            Self::PauseProgram | Self::ResumeProgram => {
                if !machine.state.is_distill_bulk() {
                    return Err(CommandError::WrongStateForPauseResume);
                }
                Ok(())
            }
            Self::CleanValve(id) => {
                if !(1..=4).contains(id) {
                    return Err(CommandError::InvalidValveId(*id));
                }
                if !machine.state.is_ready() {
                    return Err(CommandError::WrongStateForCleanValve);
                }
                Ok(())
            }
            Self::Reset => Ok(()),
        }
    }

    /// Apply the command's effect. Assumes `validate` already passed — the
    /// control loop re-validates immediately before calling this (§4.G).
    pub fn execute(&self, machine: &mut Machine, hw: &mut dyn HardwareFacade, cfg: &mut Config, cfg_path: &Path) {
        match self {
            Self::StartExtraction { run_full, soak_time } => {
                machine.data.run_full_extraction = *run_full;
                machine.data.start_flag = true;
                if let Some(s) = soak_time {
                    cfg.system.soak_time_seconds = *s;
                }
                machine.force_state(State::SystemCheck(system_check::SystemCheckData::default()));
            }
            Self::StartDecarb => machine.force_state(State::Decarb(prep::TimedData::default())),
            Self::StartHeatOil => machine.force_state(State::MixOil(prep::TimedData::default())),
            Self::StartDistill => machine.force_state(State::DistillBulk(distill::DistillData::default())),
            Self::StartVentPump => machine.force_state(State::VentPump(misc::VentPumpData::default())),
            Self::StartCleanPump => machine.force_state(State::CleanPump(prep::TimedData::default())),
            Self::PauseProgram => machine.data.pause_flag = true,
            Self::ResumeProgram => machine.data.pause_flag = false,
            Self::CleanValve(id) => {
                if let Some(valve) = valve_id(*id) {
                    if let Err(e) = hw.set_valve(valve, 100) {
                        error!("clean valve {id} failed: {e}");
                    }
                }
            }
            Self::Reset => reset(machine, hw, cfg, cfg_path),
        }
    }
}

fn reset(machine: &mut Machine, hw: &mut dyn HardwareFacade, cfg: &mut Config, cfg_path: &Path) {
    machine.data.reinit();
    machine.data.selected_program = 1;
    machine.pid.pid_off();
    machine.pid.reset();

    let _ = hw.set_valve(ValveId::V1, 0);
    let _ = hw.set_valve(ValveId::V2, 100);
    let _ = hw.set_valve(ValveId::V3, 100);
    let _ = hw.set_valve(ValveId::V4, 100);
    let _ = hw.set_bottom_heater_percent(0);
    let _ = hw.set_fan_pwm(0);
    hw.set_program(1);
    hw.set_panel_state(DeviceState::Ready);
    hw.light_off();

    if let Err(e) = Config::default().save(cfg_path) {
        error!("failed writing default config on reset: {e}");
    }
    match Config::load(cfg_path) {
        Ok(loaded) => *cfg = loaded,
        Err(e) => {
            warn!("failed reloading config after reset, keeping in-memory defaults: {e}");
            *cfg = Config::default();
        }
    }

    machine.force_state(State::Ready);
}

fn valve_id(id: u8) -> Option<ValveId> {
    match id {
        1 => Some(ValveId::V1),
        2 => Some(ValveId::V2),
        3 => Some(ValveId::V3),
        4 => Some(ValveId::V4),
        _ => None,
    }
}

/// At most one pending command; a new submission overwrites whatever
/// hadn't yet been drained — last-writer-wins on rapid user input, while
/// the loop only ever executes one per tick.
#[derive(Default)]
pub struct CommandQueue {
    slot: Mutex<Option<Command>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&self, command: Command) {
        *self.slot.lock().expect("command queue mutex poisoned") = Some(command);
    }

    pub fn drain(&self) -> Option<Command> {
        self.slot.lock().expect("command queue mutex poisoned").take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::pid::PidController;

    fn fresh_machine() -> Machine {
        Machine::new(PidController::new(1.0, 0.25, 0.05, 1.0, (0.0, 100.0), 300.0, 100.0))
    }

    #[test]
    fn start_rejected_while_running() {
        let mut m = fresh_machine();
        m.data.running_flag = true;
        assert_eq!(Command::StartDecarb.validate(&m), Err(CommandError::RejectedWhilePausedOrRunning));
    }

    #[test]
    fn pause_rejected_outside_distill_bulk() {
        let m = fresh_machine();
        assert_eq!(Command::PauseProgram.validate(&m), Err(CommandError::WrongStateForPauseResume));
    }

    #[test]
    fn clean_valve_rejects_invalid_id() {
        let m = fresh_machine();
        assert_eq!(Command::CleanValve(5).validate(&m), Err(CommandError::InvalidValveId(5)));
    }

    #[test]
    fn reset_always_validates() {
        let mut m = fresh_machine();
        m.data.running_flag = true;
        assert!(Command::Reset.validate(&m).is_ok());
    }

    #[test]
    fn queue_holds_only_latest_submission() {
        let queue = CommandQueue::new();
        queue.submit(Command::StartDecarb);
        queue.submit(Command::StartHeatOil);
        assert_eq!(queue.drain(), Some(Command::StartHeatOil));
        assert_eq!(queue.drain(), None);
    }
}
