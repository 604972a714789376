//! Generated frames for running without a camera

use image::{Rgb, RgbImage};

use crate::error::SourceError;
use crate::frame::Frame;
use crate::source::FrameSource;

/// What the generated frames show
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticPattern {
    /// Every frame is one color
    Solid([u8; 3]),
    /// A bright block sweeping across a dark background
    MovingBlock,
}

/// Frame source that renders frames on demand
pub struct SyntheticSource {
    width: u32,
    height: u32,
    pattern: SyntheticPattern,
    limit: Option<u64>,
    produced: u64,
    open: bool,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, pattern: SyntheticPattern) -> Self {
        Self {
            width,
            height,
            pattern,
            limit: None,
            produced: 0,
            open: false,
        }
    }

    /// Stop with [`SourceError::Exhausted`] after `frames` frames
    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    pub fn produced(&self) -> u64 {
        self.produced
    }

    fn render(&self, index: u64) -> RgbImage {
        match self.pattern {
            SyntheticPattern::Solid(rgb) => RgbImage::from_pixel(self.width, self.height, Rgb(rgb)),
            SyntheticPattern::MovingBlock => {
                let block = (self.width / 8).max(1);
                let travel = (self.width - block).max(1) as u64;
                let x0 = ((index * 4) % travel) as u32;
                let y0 = self.height / 3;
                let y1 = (y0 + self.height / 3).max(y0 + 1);

                RgbImage::from_fn(self.width, self.height, |x, y| {
                    if x >= x0 && x < x0 + block && y >= y0 && y < y1 {
                        Rgb([230, 230, 230])
                    } else {
                        Rgb([20, 24, 28])
                    }
                })
            }
        }
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        format!("synthetic {}x{}", self.width, self.height)
    }

    fn open(&mut self) -> Result<(), SourceError> {
        if self.width == 0 || self.height == 0 {
            return Err(SourceError::Open {
                source_name: self.describe(),
                message: "frame size must be non-zero".to_string(),
            });
        }
        self.open = true;
        self.produced = 0;
        tracing::info!("Opened {}", self.describe());
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        if !self.open {
            return Err(SourceError::NotOpen(self.describe()));
        }
        if self.limit.is_some_and(|limit| self.produced >= limit) {
            return Err(SourceError::Exhausted(self.describe()));
        }

        let index = self.produced;
        self.produced += 1;

        let frame = Frame::from_image(self.render(index)).map_err(|e| SourceError::Device {
            source_name: self.describe(),
            message: e.to_string(),
        })?;
        Ok(Some(frame.with_index(index)))
    }

    fn release(&mut self) {
        if self.open {
            tracing::debug!("Released {}", self.describe());
        }
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
