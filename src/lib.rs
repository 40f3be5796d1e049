//! Process controller for a botanical extraction and distillation
//! appliance: vacuum pumping, four proportional valves, a bottom heater,
//! a cooling fan, and a front panel, orchestrated by a 20-state recipe
//! state machine under PID heating/flow control.

#![deny(unused_must_use)]

pub mod commands;
pub mod config;
pub mod control;
pub mod control_loop;
pub mod domain;
pub mod error;
pub mod fsm;
pub mod hardware;
pub mod panel;
pub mod stats;
pub mod status;
pub mod supervisor;
