//! Command modules for the ghh CLI

pub mod mother_ship;
pub mod output;
pub mod wings;

pub use mother_ship::{clean, land, launch, run_mother_ship, run_wing, status};
pub use wings::{info, list, logs, remove, restart, start, stop};
