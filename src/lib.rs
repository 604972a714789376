//! vrcam - Webcam Avatar Tracker
//!
//! Turns webcam frames into avatar parameters and streams them over OSC:
//! - Face heuristics (mouth, blinks, smile, optional head pose) from Haar cascades
//! - Arm raise estimates from background-subtracted motion
//! - Per-parameter exponential smoothing
//! - Rate-limited OSC output with optional tracker messages

pub mod config;
pub mod error;
pub mod frame;
pub mod output;
pub mod source;
pub mod tracking;
pub mod vision;

pub use config::Config;
pub use error::{Result, VrcamError};
pub use frame::Frame;
pub use output::{Emission, OscSender};
pub use tracking::{Parameter, ParameterMap, TrackerHandle, TrackingLoop};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
