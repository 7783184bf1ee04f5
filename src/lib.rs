//! Control core of a radio-controlled combat robot.
//!
//! Tasks share one [`state::SharedState`]: RC input is published into the
//! controls region, the control task turns commands and controls into gated
//! ESC speeds, the output task writes them through the selected
//! [`comms::EscComms`] backend and the watchdog forces everything safe if the
//! control task stalls.

#![cfg_attr(not(test), no_std)]

#[macro_use]
pub mod logging;

pub mod arming;
pub mod attitude;
pub mod command;
pub mod comms;
pub mod config;
pub mod control;
pub mod drivers;
pub mod error;
pub mod input;
pub mod output;
pub mod startup;
pub mod state;
pub mod telemetry;
pub mod watchdog;

#[cfg(test)]
mod tests;
