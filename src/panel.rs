//! Panel/UI mediator (§4.D): translates raw button edges and forced-read
//! hold durations into semantic events the control loop and commands act
//! on, and maps `DeviceState`/`FailureMode` into LED patterns.

use crate::commands::Command;
use crate::error::FailureMode;
use crate::fsm::{Machine, State};
use crate::hardware::{DeviceState, HardwareFacade, PanelButton};

const RESET_HOLD_TICKS: u32 = 30;
const SELECT_HOLD_TICKS: u32 = 30;
const PLAY_HOLD_TICKS: u32 = 50;
const PAUSE_HOLD_TICKS: u32 = 10;

#[derive(Debug, Default)]
pub struct PanelMediator {
    reset_ticks: u32,
    select_ticks: u32,
    play_ticks: u32,
    pause_ticks: u32,
}

/// What the mediator decided this tick, for the control loop to act on.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PanelOutcome {
    pub command: Option<Command>,
    pub show_connectivity: bool,
    pub print_label: bool,
    pub toggle_white: bool,
    /// Reset hold is in progress but hasn't reached the commit threshold
    /// yet — the panel should show the cancellable warning display.
    pub reset_warning: bool,
    /// Play hold during DistillBulk/CleanPump just committed
    /// `force_afterstill` this tick.
    pub force_afterstill_committed: bool,
}

impl PanelMediator {
    pub fn new() -> Self {
        Self::default()
    }

    /// One tick's worth of panel handling: drain the edge-detected press
    /// for single-click semantics, and the forced (level) read for the
    /// long-press counters.
    pub fn poll(&mut self, hw: &mut dyn HardwareFacade, machine: &mut Machine, on_own_wifi: bool) -> PanelOutcome {
        let mut outcome = PanelOutcome::default();
        let held = hw.button_press_force();
        self.advance_hold_counters(held, on_own_wifi, &mut outcome, machine);

        let edge = hw.button_press();
        match edge {
            PanelButton::Select => self.on_select_edge(machine),
            PanelButton::Play => self.on_play_edge(machine, &mut outcome),
            PanelButton::Pause => self.on_pause_edge(machine),
            PanelButton::Reset | PanelButton::None => {}
        }
        outcome
    }

    fn advance_hold_counters(&mut self, held: PanelButton, on_own_wifi: bool, outcome: &mut PanelOutcome, machine: &mut Machine) {
        self.reset_ticks = if held == PanelButton::Reset { self.reset_ticks + 1 } else { 0 };
        if self.reset_ticks == RESET_HOLD_TICKS {
            outcome.command = Some(Command::Reset);
        } else if self.reset_ticks > 0 {
            outcome.reset_warning = true;
        }

        self.select_ticks = if held == PanelButton::Select && machine.state.is_ready() { self.select_ticks + 1 } else { 0 };
        if self.select_ticks == SELECT_HOLD_TICKS {
            outcome.show_connectivity = true;
        }

        let eligible_for_force_afterstill = machine.state.is_distill_bulk() || machine.state.is_clean_pump();
        self.play_ticks = if held == PanelButton::Play && eligible_for_force_afterstill { self.play_ticks + 1 } else { 0 };
        if self.play_ticks == PLAY_HOLD_TICKS {
            machine.data.force_afterstill = true;
            outcome.force_afterstill_committed = true;
        }

        self.pause_ticks = if held == PanelButton::Pause && on_own_wifi { self.pause_ticks + 1 } else { 0 };
        if self.pause_ticks == PAUSE_HOLD_TICKS {
            outcome.print_label = true;
        }
    }

    fn on_select_edge(&self, machine: &mut Machine) {
        if machine.state.is_ready() {
            machine.data.selected_program = (machine.data.selected_program % 4) + 1;
        }
    }

    fn on_play_edge(&self, machine: &Machine, outcome: &mut PanelOutcome) {
        if machine.state.is_ready() {
            outcome.command = Some(Command::StartExtraction { run_full: true, soak_time: None });
        } else if machine.data.running_flag {
            outcome.toggle_white = true;
        }
    }

    fn on_pause_edge(&self, machine: &mut Machine) {
        if machine.state.is_distill_bulk() || machine.state.is_clean_pump() {
            machine.data.pause_flag = true;
        }
    }
}

/// Display state the LEDs should reflect this tick, derived from the
/// current FSM state and any active failure.
pub fn display_state(machine: &Machine) -> DeviceState {
    match &machine.state {
        State::Error(_) => DeviceState::Error,
        State::Ready => DeviceState::Ready,
        _ if machine.data.pause_flag => DeviceState::Pause,
        State::DistillBulk(_) | State::CleanPump(_) => DeviceState::RunningPauseEnabled,
        _ => DeviceState::RunningPauseDisabled,
    }
}

/// Drive the panel LEDs/program indicator to reflect the current state;
/// on Error, encode `FailureMode::led_code` into the four program LEDs.
/// A reset hold in progress overrides the normal display with the
/// cancellable warning state.
pub fn update_leds(hw: &mut dyn HardwareFacade, machine: &Machine, outcome: &PanelOutcome) {
    if outcome.reset_warning {
        hw.set_panel_state(DeviceState::ResetWarning);
        hw.blink_reset();
    } else {
        hw.set_panel_state(display_state(machine));
    }
    if outcome.show_connectivity {
        hw.blink_disconnected();
    }
    if outcome.print_label {
        hw.blink_label_print();
    }
    if outcome.toggle_white {
        hw.toggle_white();
    }
    if outcome.force_afterstill_committed {
        hw.blink_force_afterstill();
    }
    if let State::Error(_) = &machine.state {
        hw.set_program(machine.data.failure_mode.led_code());
    } else {
        hw.set_program(machine.data.selected_program);
    }
}

pub fn failure_led_code(mode: FailureMode) -> u8 {
    mode.led_code()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::pid::PidController;
    use crate::hardware::sim::SimulatedHardware;

    fn fresh_machine() -> Machine {
        Machine::new(PidController::new(1.0, 0.25, 0.05, 1.0, (0.0, 100.0), 300.0, 100.0))
    }

    #[test]
    fn select_edge_advances_program_in_ready() {
        let mut m = fresh_machine();
        let mut hw = SimulatedHardware::new();
        let mut panel = PanelMediator::new();
        hw.pending_button = Some(PanelButton::Select);
        panel.poll(&mut hw, &mut m, false);
        assert_eq!(m.data.selected_program, 2);
    }

    #[test]
    fn select_hold_is_ignored_outside_ready() {
        let mut m = fresh_machine();
        m.force_state(State::DistillBulk(crate::fsm::states::distill::DistillData::default()));
        let mut panel = PanelMediator::new();
        let mut outcome = PanelOutcome::default();
        for _ in 0..SELECT_HOLD_TICKS {
            panel.advance_hold_counters(PanelButton::Select, false, &mut outcome, &mut m);
        }
        assert!(!outcome.show_connectivity);
    }

    #[test]
    fn play_hold_in_distill_sets_force_afterstill() {
        let mut m = fresh_machine();
        m.force_state(State::DistillBulk(crate::fsm::states::distill::DistillData::default()));
        let mut panel = PanelMediator::new();
        let mut outcome = PanelOutcome::default();
        for _ in 0..PLAY_HOLD_TICKS {
            panel.advance_hold_counters(PanelButton::Play, false, &mut outcome, &mut m);
        }
        assert!(m.data.force_afterstill);
        assert!(outcome.force_afterstill_committed);
    }

    #[test]
    fn update_leds_drives_blink_helpers_from_outcome() {
        let m = fresh_machine();
        let mut hw = SimulatedHardware::new();
        let outcome = PanelOutcome {
            show_connectivity: true,
            print_label: true,
            force_afterstill_committed: true,
            reset_warning: true,
            ..PanelOutcome::default()
        };
        update_leds(&mut hw, &m, &outcome);
        assert_eq!(hw.blink_disconnected_count, 1);
        assert_eq!(hw.blink_label_print_count, 1);
        assert_eq!(hw.blink_force_afterstill_count, 1);
        assert_eq!(hw.blink_reset_count, 1);
    }

    #[test]
    fn display_state_reflects_error() {
        let mut m = fresh_machine();
        m.data.enter_failure(FailureMode::EvcLeak, "leak");
        m.force_state(State::Error(crate::fsm::states::misc::ErrorData::default()));
        assert_eq!(display_state(&m), DeviceState::Error);
    }
}
