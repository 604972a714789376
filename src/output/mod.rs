//! Output module
//!
//! Everything that leaves the process:
//! - OSC parameters and trackers sent to the avatar client
//! - Periodic parameter log for debug runs
//! - Camera-free demo signal

pub mod debug;
pub mod demo;
pub mod osc;

pub use debug::ParameterLogger;
pub use demo::{demo_parameters, run_demo, DemoReport};
pub use osc::{Emission, OscSender, RateGate, SendStats};
