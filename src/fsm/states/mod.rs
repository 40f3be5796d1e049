//! Per-state `Execute` implementations and the shared context they run in.

pub mod aspirate;
pub mod distill;
pub mod misc;
pub mod prep;
pub mod system_check;

use crate::config::Config;
use crate::control::pid::PidController;
use crate::error::{FailureMode, HardwareFailure};
use crate::fsm::data::FsmData;
use crate::fsm::State;
use crate::hardware::HardwareFacade;

/// Borrowed machine context threaded through every state's `execute`.
pub struct Ctx<'a> {
    pub hw: &'a mut dyn HardwareFacade,
    pub cfg: &'a Config,
    pub fsm: &'a mut FsmData,
    pub pid: &'a mut PidController,
    pub dt_s: f64,
}

/// Outcome of one `execute` call: stay (`None`) or move on.
pub enum Transition {
    To(State),
    ToError(FailureMode, String),
}

impl Transition {
    pub fn error(mode: FailureMode, description: impl Into<String>) -> Self {
        Self::ToError(mode, description.into())
    }
}

/// Every state's `Execute`: stay (`Ok(None)`), move on (`Ok(Some(_))`), or
/// surface a hardware-write failure for `Machine::tick` to catch centrally
/// (§9 Design Notes) rather than each call site discarding it.
pub type StepResult = Result<Option<Transition>, HardwareFailure>;
