//! Vision primitives
//!
//! Small, self-contained image analysis building blocks used by the
//! feature extractors:
//! - Haar cascade object detection (OpenCV model files)
//! - Edge contours for the mouth heuristic
//! - Adaptive per-pixel background model for motion detection

pub mod background;
pub mod cascade;
pub mod contours;

use image::GrayImage;

pub use background::BackgroundModel;
pub use cascade::CascadeClassifier;

/// Axis-aligned region in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Center point as floating point coordinates
    pub fn center(&self) -> (f32, f32) {
        (
            self.x as f32 + self.width as f32 / 2.0,
            self.y as f32 + self.height as f32 / 2.0,
        )
    }

    /// Width divided by height
    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            return 0.0;
        }
        self.width as f32 / self.height as f32
    }

    /// Clip the region so it lies inside a `width` x `height` image
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Rect> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(Rect::new(self.x, self.y, w, h))
    }
}

/// Multi-scale search settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
    /// Ratio between two consecutive pyramid levels, must exceed 1.0
    pub scale_factor: f64,
    /// Candidates a group needs beyond this count to be reported
    pub min_neighbors: u32,
    /// Smallest reported object size
    pub min_size: (u32, u32),
}

impl DetectParams {
    pub const fn new(scale_factor: f64, min_neighbors: u32) -> Self {
        Self {
            scale_factor,
            min_neighbors,
            min_size: (0, 0),
        }
    }
}

/// Face search settings
pub const FACE_PARAMS: DetectParams = DetectParams::new(1.1, 4);
/// Eye search settings, applied inside a face region
pub const EYE_PARAMS: DetectParams = DetectParams::new(1.1, 3);
/// Smile search settings, applied inside a face region
pub const SMILE_PARAMS: DetectParams = DetectParams::new(1.8, 20);

/// Finds object regions in a grayscale image
pub trait RegionDetector: Send {
    /// Detect regions. Never fails; no match is an empty list.
    fn detect(&self, image: &GrayImage, params: &DetectParams) -> Vec<Rect>;
}

/// Largest region by area; the first one wins a tie
pub fn largest_region(regions: &[Rect]) -> Option<Rect> {
    let mut best: Option<Rect> = None;
    for region in regions {
        match best {
            Some(b) if region.area() <= b.area() => {}
            _ => best = Some(*region),
        }
    }
    best
}
