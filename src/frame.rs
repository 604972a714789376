//! Color frames handed from a frame source to the feature extractors.

use image::{GrayImage, Rgb, RgbImage};
use std::time::Instant;

use crate::error::TrackingError;

/// Number of interleaved channels every frame carries (RGB8).
pub const FRAME_CHANNELS: u8 = 3;

/// A single RGB8 frame.
///
/// Construction validates the shape, so downstream code can rely on
/// non-zero dimensions and three channels.
#[derive(Debug, Clone)]
pub struct Frame {
    image: RgbImage,
    index: u64,
    captured_at: Instant,
}

impl Frame {
    /// Wrap an already decoded image.
    pub fn from_image(image: RgbImage) -> Result<Self, TrackingError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(TrackingError::InvalidFrame(format!(
                "zero-sized frame {}x{}",
                image.width(),
                image.height()
            )));
        }

        Ok(Self {
            image,
            index: 0,
            captured_at: Instant::now(),
        })
    }

    /// Build a frame from interleaved pixel bytes.
    pub fn from_raw(
        width: u32,
        height: u32,
        channels: u8,
        data: Vec<u8>,
    ) -> Result<Self, TrackingError> {
        if channels != FRAME_CHANNELS {
            return Err(TrackingError::InvalidFrame(format!(
                "expected {} channels, got {}",
                FRAME_CHANNELS, channels
            )));
        }

        let expected = (width as usize) * (height as usize) * FRAME_CHANNELS as usize;
        if data.len() != expected {
            return Err(TrackingError::InvalidFrame(format!(
                "pixel buffer length mismatch: expected {}, got {}",
                expected,
                data.len()
            )));
        }

        let image = RgbImage::from_raw(width, height, data).ok_or_else(|| {
            TrackingError::InvalidFrame(format!("cannot build {}x{} image", width, height))
        })?;

        Self::from_image(image)
    }

    /// A frame where every pixel has the same color.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self, TrackingError> {
        Self::from_image(RgbImage::from_pixel(width, height, Rgb(rgb)))
    }

    /// Attach the sequence number assigned by the source.
    pub fn with_index(mut self, index: u64) -> Self {
        self.index = index;
        self
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn rgb(&self) -> &RgbImage {
        &self.image
    }

    /// Luma conversion used by every detector.
    pub fn to_gray(&self) -> GrayImage {
        image::imageops::grayscale(&self.image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw_validates_channels() {
        let data = vec![0u8; 4 * 4 * 4];
        assert!(matches!(
            Frame::from_raw(4, 4, 4, data),
            Err(TrackingError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_from_raw_validates_length() {
        let data = vec![0u8; 10];
        assert!(Frame::from_raw(4, 4, 3, data).is_err());
    }

    #[test]
    fn test_zero_sized_frame_rejected() {
        assert!(Frame::filled(0, 10, [0, 0, 0]).is_err());
        assert!(Frame::filled(10, 0, [0, 0, 0]).is_err());
    }

    #[test]
    fn test_gray_conversion() {
        let frame = Frame::filled(8, 6, [255, 255, 255]).unwrap().with_index(7);
        let gray = frame.to_gray();
        assert_eq!(gray.dimensions(), (8, 6));
        assert!(gray.pixels().all(|p| p.0[0] == 255));
        assert_eq!(frame.index(), 7);
    }
}
