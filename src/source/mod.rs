//! Frame sources
//!
//! Everything the tracking loop can pull frames from:
//! - Synthetic frames (testing, demos)
//! - A directory of still images
//! - A local V4L2 camera (feature: camera-v4l2)
//!
//! `read_frame` distinguishes a transient miss (`Ok(None)`, retried on the
//! next iteration) from a source that cannot continue (`Err`).

pub mod sequence;
pub mod synthetic;
#[cfg(feature = "camera-v4l2")]
pub mod v4l2;

pub use sequence::ImageSequenceSource;
pub use synthetic::{SyntheticPattern, SyntheticSource};
#[cfg(feature = "camera-v4l2")]
pub use v4l2::V4l2Camera;

use crate::config::{Config, SourceKind};
use crate::error::SourceError;
use crate::frame::Frame;

/// A supplier of fixed-size color frames
pub trait FrameSource: Send {
    /// Human readable name for logs and errors
    fn describe(&self) -> String;

    /// Acquire the underlying resource
    fn open(&mut self) -> Result<(), SourceError>;

    /// Next frame, `Ok(None)` when none is available right now
    fn read_frame(&mut self) -> Result<Option<Frame>, SourceError>;

    /// Release the underlying resource. Safe to call more than once.
    fn release(&mut self);

    fn is_open(&self) -> bool;
}

/// Build the source selected by the configuration
pub fn from_config(config: &Config) -> Result<Box<dyn FrameSource>, SourceError> {
    match config.source.kind {
        SourceKind::Synthetic => Ok(Box::new(SyntheticSource::new(
            config.camera.width,
            config.camera.height,
            SyntheticPattern::MovingBlock,
        ))),
        SourceKind::Sequence => {
            let path = config.source.path.clone().ok_or_else(|| SourceError::Open {
                source_name: "image sequence".to_string(),
                message: "no directory configured".to_string(),
            })?;
            Ok(Box::new(
                ImageSequenceSource::new(path).looping(config.source.looping),
            ))
        }
        SourceKind::Camera => camera(config),
    }
}

#[cfg(feature = "camera-v4l2")]
fn camera(config: &Config) -> Result<Box<dyn FrameSource>, SourceError> {
    Ok(Box::new(V4l2Camera::new(&config.camera)))
}

#[cfg(not(feature = "camera-v4l2"))]
fn camera(config: &Config) -> Result<Box<dyn FrameSource>, SourceError> {
    Err(SourceError::Open {
        source_name: format!("camera {}", config.camera.index),
        message: "camera capture requires the camera-v4l2 feature; use --frames or --synthetic"
            .to_string(),
    })
}
