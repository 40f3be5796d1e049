//! The 20-state recipe FSM, expressed as a tagged sum type rather than a
//! per-state class hierarchy (§9 Design Notes): each variant carries its
//! own timers/sub-counters, and shared context (hardware façade, config,
//! [`FsmData`], PID) is borrowed for the duration of one `tick`.

pub mod data;
pub mod states;

pub use data::FsmData;

use crate::config::Config;
use crate::control::pid::PidController;
use crate::error::FailureMode;
use crate::hardware::HardwareFacade;
use states::{aspirate, distill, misc, prep, system_check, Ctx, StepResult, Transition};

#[derive(Debug, Clone, PartialEq)]
pub enum State {
    Ready,
    SystemCheck(system_check::SystemCheckData),
    PreFillTubes(prep::TimedData),
    FirstDepressurize(prep::DepressurizeData),
    MeasureEXCVolume(prep::MeasureData),
    SecondDepressurize(prep::DepressurizeData),
    SecondLeakCheck(prep::LeakCheckData),
    TopUpEXC(prep::TopUpData),
    Soak(prep::TimedData),
    ThirdDepressurize(prep::DepressurizeData),
    Aspirate(aspirate::AspirateData),
    Flush(aspirate::FlushData),
    ExtraFlushDepressurize(aspirate::FlushData),
    DistillBulk(distill::DistillData),
    AfterDistill(prep::TimedData),
    FinalSolventRemoval(distill::FinalAirData),
    Decarb(prep::TimedData),
    MixOil(prep::TimedData),
    VentPump(misc::VentPumpData),
    CleanPump(prep::TimedData),
    Error(misc::ErrorData),
}

impl State {
    /// The user-facing label the status snapshot's `currentAction` echoes.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ready => "Ready",
            Self::SystemCheck(_) => "System check",
            Self::PreFillTubes(_) => "Filling tubes",
            Self::FirstDepressurize(_) => "Depressurizing",
            Self::MeasureEXCVolume(_) => "Measuring extraction volume",
            Self::SecondDepressurize(_) => "Depressurizing",
            Self::SecondLeakCheck(_) => "Leak check",
            Self::TopUpEXC(_) => "Topping up",
            Self::Soak(_) => "Soaking",
            Self::ThirdDepressurize(_) => "Depressurizing",
            Self::Aspirate(_) => "Aspirating",
            Self::Flush(_) => "Flushing",
            Self::ExtraFlushDepressurize(_) => "Depressurizing",
            Self::DistillBulk(_) => "Distilling",
            Self::AfterDistill(_) => "Finishing distillation",
            Self::FinalSolventRemoval(_) => "Removing solvent",
            Self::Decarb(_) => "Decarboxylating",
            Self::MixOil(_) => "Mixing oil",
            Self::VentPump(_) => "Venting pump",
            Self::CleanPump(_) => "Cleaning pump",
            Self::Error(_) => "Error",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn is_distill_bulk(&self) -> bool {
        matches!(self, Self::DistillBulk(_))
    }

    pub fn is_clean_pump(&self) -> bool {
        matches!(self, Self::CleanPump(_))
    }
}

/// Owns the current [`State`], the [`FsmData`] bag, and the PID loop —
/// everything the control loop drives one tick at a time.
pub struct Machine {
    pub state: State,
    pub data: FsmData,
    pub pid: PidController,
}

impl Machine {
    pub fn new(pid: PidController) -> Self {
        Self { state: State::Ready, data: FsmData::default(), pid }
    }

    /// Advance by `dt_s` seconds: run the current state's `Execute`, then
    /// apply any resulting transition (`Exit` → switch → `Enter`). Any
    /// `HardwareFailure` surfaced by a state's writes is caught here,
    /// centrally, rather than at each call site (§9 Design Notes).
    pub fn tick(&mut self, hw: &mut dyn HardwareFacade, cfg: &Config, dt_s: f64) {
        let mut ctx = Ctx { hw, cfg, fsm: &mut self.data, pid: &mut self.pid, dt_s };
        match dispatch(&mut ctx, &mut self.state) {
            Ok(None) => {}
            Ok(Some(Transition::To(new_state))) => {
                ctx.fsm.warning = None;
                self.state = new_state;
                ctx.fsm.running_flag = !self.state.is_ready() && !self.state.is_error();
            }
            Ok(Some(Transition::ToError(mode, description))) => {
                ctx.fsm.enter_failure(mode, description);
                self.state = State::Error(misc::ErrorData::default());
                ctx.fsm.running_flag = false;
            }
            Err(failure) => {
                ctx.hw.blink_fault();
                let mode = FailureMode::from_hardware_kind(failure.kind);
                ctx.fsm.enter_failure(mode, failure.to_string());
                self.state = State::Error(misc::ErrorData::default());
                ctx.fsm.running_flag = false;
            }
        }
    }

    /// Jump directly to a new state outside of a normal `Execute`-driven
    /// transition — used by the command layer (§4.G), which decides
    /// transitions itself rather than waiting for Ready's `Execute` to
    /// notice a flag.
    pub fn force_state(&mut self, state: State) {
        self.data.warning = None;
        self.data.running_flag = !state.is_ready() && !state.is_error();
        self.state = state;
    }
}

fn dispatch(ctx: &mut Ctx, state: &mut State) -> StepResult {
    match state {
        State::Ready => Ok(None),
        State::SystemCheck(d) => system_check::execute(ctx, d),
        State::PreFillTubes(d) => prep::pre_fill_tubes(ctx, d),
        State::FirstDepressurize(d) => prep::first_depressurize(ctx, d),
        State::MeasureEXCVolume(d) => prep::measure_exc_volume(ctx, d),
        State::SecondDepressurize(d) => prep::second_depressurize(ctx, d),
        State::SecondLeakCheck(d) => prep::second_leak_check(ctx, d),
        State::TopUpEXC(d) => prep::top_up_exc(ctx, d),
        State::Soak(d) => prep::soak(ctx, d),
        State::ThirdDepressurize(d) => prep::third_depressurize(ctx, d),
        State::Aspirate(d) => aspirate::execute(ctx, d),
        State::Flush(d) => aspirate::flush(ctx, d),
        State::ExtraFlushDepressurize(d) => aspirate::extra_flush_depressurize(ctx, d),
        State::DistillBulk(d) => distill::execute(ctx, d),
        State::AfterDistill(d) => distill::after_distill(ctx, d),
        State::FinalSolventRemoval(d) => distill::final_solvent_removal(ctx, d),
        State::Decarb(d) => misc::decarb(ctx, d),
        State::MixOil(d) => misc::mix_oil(ctx, d),
        State::VentPump(d) => misc::vent_pump(ctx, d),
        State::CleanPump(d) => misc::clean_pump(ctx, d),
        State::Error(d) => misc::error(ctx, d),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::sim::SimulatedHardware;

    fn fresh_machine() -> Machine {
        let pid = PidController::new(1.0, 0.25, 0.05, 1.0, (0.0, 100.0), 300.0, 100.0);
        Machine::new(pid)
    }

    #[test]
    fn starts_in_ready_with_no_run_flags() {
        let m = fresh_machine();
        assert!(m.state.is_ready());
        assert!(!m.data.running_flag);
    }

    #[test]
    fn ready_never_transitions_on_its_own() {
        let mut m = fresh_machine();
        let mut hw = SimulatedHardware::new();
        let cfg = Config::default();
        for _ in 0..100 {
            m.tick(&mut hw, &cfg, 0.01);
        }
        assert!(m.state.is_ready());
    }

    #[test]
    fn force_state_sets_running_flag() {
        let mut m = fresh_machine();
        m.force_state(State::SystemCheck(system_check::SystemCheckData::default()));
        assert!(m.data.running_flag);
    }

    #[test]
    fn hardware_failure_during_execute_routes_to_error() {
        let mut m = fresh_machine();
        m.force_state(State::SystemCheck(system_check::SystemCheckData::default()));
        let mut hw = SimulatedHardware::new();
        hw.pressure_failures_remaining = 100;
        hw.pressure_retry_budget = 0;
        let cfg = Config::default();
        for _ in 0..5 {
            m.tick(&mut hw, &cfg, 1.0);
        }
        assert!(m.state.is_error());
        assert_ne!(m.data.failure_mode, crate::error::FailureMode::None);
    }
}
