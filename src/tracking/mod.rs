//! Tracking module
//!
//! Turns camera frames into avatar parameters:
//! - Face heuristics (mouth, blink, smile, head pose)
//! - Hand/arm heuristics from background motion
//! - Per-parameter smoothing
//! - The frame loop that ties them to the OSC sender

pub mod face;
pub mod hand;
pub mod params;
pub mod pipeline;
pub mod smoothing;

use crate::error::TrackingError;
use crate::frame::Frame;

pub use face::FaceExtractor;
pub use hand::HandExtractor;
pub use params::{Parameter, ParameterMap};
pub use pipeline::{LoopCommand, LoopState, TrackerHandle, TrackingLoop, TrackingSnapshot};
pub use smoothing::ParameterSmoother;

/// Produces a fixed set of parameters from each frame
pub trait FeatureExtractor: Send {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Every parameter this extractor emits, all at 0.0
    fn default_parameters(&self) -> ParameterMap;

    /// Extract parameters from one frame.
    ///
    /// Missing detections yield default values, never an error. Errors are
    /// reserved for frames the extractor cannot accept.
    fn extract(&mut self, frame: &Frame) -> Result<ParameterMap, TrackingError>;

    /// Drop internal per-frame state
    fn reset(&mut self) {}
}
