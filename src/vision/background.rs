//! Adaptive background model
//!
//! Per-pixel Gaussian mixture with a variable number of components
//! (Zivkovic, "Improved adaptive Gaussian mixture model for background
//! subtraction", 2004), using the same defaults as OpenCV's MOG2 without
//! shadow detection.

use image::{GrayImage, Luma};

use crate::error::TrackingError;
use crate::frame::Frame;

const CHANNELS: usize = 3;

/// Mixture model tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixtureParams {
    /// Frames after which the learning rate stops decaying
    pub history: u32,
    /// Squared Mahalanobis distance for a pixel to count as background
    pub var_threshold: f32,
    /// Squared Mahalanobis distance for a pixel to update an existing component
    pub var_threshold_gen: f32,
    /// Weight share of the components that make up the background
    pub background_ratio: f32,
    pub var_init: f32,
    pub var_min: f32,
    pub var_max: f32,
    /// Weight decay that lets unsupported components disappear
    pub complexity_reduction: f32,
    pub max_modes: usize,
}

impl Default for MixtureParams {
    fn default() -> Self {
        Self {
            history: 500,
            var_threshold: 16.0,
            var_threshold_gen: 9.0,
            background_ratio: 0.9,
            var_init: 15.0,
            var_min: 4.0,
            var_max: 75.0,
            complexity_reduction: 0.05,
            max_modes: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Component {
    weight: f32,
    variance: f32,
    mean: [f32; CHANNELS],
}

/// Running background statistics for a fixed frame size
#[derive(Debug, Clone)]
pub struct BackgroundModel {
    params: MixtureParams,
    dimensions: Option<(u32, u32)>,
    frames: u64,
    modes_used: Vec<usize>,
    components: Vec<Component>,
}

impl Default for BackgroundModel {
    fn default() -> Self {
        Self::new(MixtureParams::default())
    }
}

impl BackgroundModel {
    pub fn new(params: MixtureParams) -> Self {
        Self {
            params,
            dimensions: None,
            frames: 0,
            modes_used: Vec::new(),
            components: Vec::new(),
        }
    }

    /// Frames absorbed since the last reset
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Size the model was initialized with, if any
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.dimensions
    }

    /// Drop all statistics; the next frame starts a new model
    pub fn reset(&mut self) {
        self.dimensions = None;
        self.frames = 0;
        self.modes_used.clear();
        self.components.clear();
    }

    fn initialize(&mut self, width: u32, height: u32) {
        let pixels = width as usize * height as usize;
        self.dimensions = Some((width, height));
        self.frames = 0;
        self.modes_used = vec![0; pixels];
        self.components = vec![Component::default(); pixels * self.params.max_modes];
    }

    /// Update the model with `frame` and return its foreground mask
    /// (0 = background, 255 = foreground).
    pub fn apply(&mut self, frame: &Frame) -> Result<GrayImage, TrackingError> {
        let (width, height) = frame.dimensions();
        match self.dimensions {
            None => self.initialize(width, height),
            Some(expected) if expected != (width, height) => {
                return Err(TrackingError::FrameShape {
                    expected,
                    actual: (width, height),
                });
            }
            Some(_) => {}
        }

        self.frames += 1;
        let span = (2 * self.frames).min(self.params.history.max(1) as u64);
        let alpha = 1.0 / span as f32;

        let mut mask = GrayImage::new(width, height);
        let max_modes = self.params.max_modes;
        for (idx, (pixel, out)) in frame.rgb().pixels().zip(mask.pixels_mut()).enumerate() {
            let data = [pixel.0[0] as f32, pixel.0[1] as f32, pixel.0[2] as f32];
            let modes = &mut self.components[idx * max_modes..(idx + 1) * max_modes];
            let background =
                update_pixel(&self.params, alpha, modes, &mut self.modes_used[idx], data);
            *out = Luma([if background { 0 } else { 255 }]);
        }

        Ok(mask)
    }
}

/// Update one pixel's mixture; returns whether it matched the background
fn update_pixel(
    params: &MixtureParams,
    alpha: f32,
    modes: &mut [Component],
    modes_used: &mut usize,
    data: [f32; CHANNELS],
) -> bool {
    let prune = -alpha * params.complexity_reduction;
    let decay = 1.0 - alpha;

    let mut background = false;
    let mut fits = false;
    let mut total_weight = 0.0f32;
    let mut n_modes = *modes_used;

    for mode in 0..*modes_used {
        let mut weight = decay * modes[mode].weight + prune;
        let mut swaps = 0;

        if !fits {
            let variance = modes[mode].variance;
            let mut diff = [0.0f32; CHANNELS];
            let mut dist2 = 0.0f32;
            for c in 0..CHANNELS {
                diff[c] = modes[mode].mean[c] - data[c];
                dist2 += diff[c] * diff[c];
            }

            if total_weight < params.background_ratio && dist2 < params.var_threshold * variance {
                background = true;
            }

            if dist2 < params.var_threshold_gen * variance {
                fits = true;
                weight += alpha;
                let k = alpha / weight;
                for c in 0..CHANNELS {
                    modes[mode].mean[c] -= k * diff[c];
                }
                let updated = variance + k * (dist2 - variance);
                modes[mode].variance = updated.clamp(params.var_min, params.var_max);

                // keep components ordered by weight
                let mut i = mode;
                while i > 0 && weight >= modes[i - 1].weight {
                    modes.swap(i, i - 1);
                    swaps += 1;
                    i -= 1;
                }
            }
        }

        if weight < -prune {
            weight = 0.0;
            n_modes -= 1;
        }

        modes[mode - swaps].weight = weight;
        total_weight += weight;
    }

    if total_weight > 0.0 {
        let inv = 1.0 / total_weight;
        for component in modes.iter_mut().take(n_modes) {
            component.weight *= inv;
        }
    }

    if !fits {
        let mode = if n_modes == params.max_modes {
            params.max_modes - 1
        } else {
            n_modes += 1;
            n_modes - 1
        };

        if n_modes == 1 {
            modes[mode].weight = 1.0;
        } else {
            modes[mode].weight = alpha;
            for component in modes.iter_mut().take(n_modes - 1) {
                component.weight *= decay;
            }
        }
        modes[mode].mean = data;
        modes[mode].variance = params.var_init;

        let mut i = mode;
        while i > 0 && alpha >= modes[i - 1].weight {
            modes.swap(i, i - 1);
            i -= 1;
        }
    }

    *modes_used = n_modes;
    background
}

/// Fraction of non-zero pixels in the columns `[x0, x1)` of a mask
pub fn foreground_density(mask: &GrayImage, x0: u32, x1: u32) -> f32 {
    let x1 = x1.min(mask.width());
    if x0 >= x1 || mask.height() == 0 {
        return 0.0;
    }

    let mut count = 0u64;
    for y in 0..mask.height() {
        for x in x0..x1 {
            if mask.get_pixel(x, y).0[0] > 0 {
                count += 1;
            }
        }
    }
    count as f32 / ((x1 - x0) as u64 * mask.height() as u64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_foreground(mask: &GrayImage) -> usize {
        mask.pixels().filter(|p| p.0[0] > 0).count()
    }

    #[test]
    fn test_first_frame_is_foreground() {
        let mut model = BackgroundModel::default();
        let mask = model.apply(&Frame::filled(16, 8, [40, 40, 40]).unwrap()).unwrap();
        assert_eq!(count_foreground(&mask), 16 * 8);
        assert_eq!(model.frames(), 1);
    }

    #[test]
    fn test_static_scene_becomes_background() {
        let mut model = BackgroundModel::default();
        let frame = Frame::filled(16, 8, [90, 120, 30]).unwrap();
        model.apply(&frame).unwrap();
        for _ in 0..5 {
            let mask = model.apply(&frame).unwrap();
            assert_eq!(count_foreground(&mask), 0);
        }
    }

    #[test]
    fn test_sudden_change_is_foreground() {
        let mut model = BackgroundModel::default();
        let black = Frame::filled(16, 8, [0, 0, 0]).unwrap();
        for _ in 0..10 {
            model.apply(&black).unwrap();
        }
        let mask = model.apply(&Frame::filled(16, 8, [255, 255, 255]).unwrap()).unwrap();
        assert_eq!(count_foreground(&mask), 16 * 8);
    }

    #[test]
    fn test_small_noise_stays_background() {
        let mut model = BackgroundModel::default();
        for i in 0..20u8 {
            let level = 100 + (i % 2);
            model.apply(&Frame::filled(8, 8, [level, level, level]).unwrap()).unwrap();
        }
        let mask = model.apply(&Frame::filled(8, 8, [101, 101, 101]).unwrap()).unwrap();
        assert_eq!(count_foreground(&mask), 0);
    }

    #[test]
    fn test_shape_change_is_rejected() {
        let mut model = BackgroundModel::default();
        model.apply(&Frame::filled(16, 8, [0, 0, 0]).unwrap()).unwrap();
        let result = model.apply(&Frame::filled(8, 8, [0, 0, 0]).unwrap());
        assert!(matches!(result, Err(TrackingError::FrameShape { .. })));

        model.reset();
        assert!(model.apply(&Frame::filled(8, 8, [0, 0, 0]).unwrap()).is_ok());
    }

    #[test]
    fn test_foreground_density() {
        let mask = GrayImage::from_fn(10, 4, |x, _| if x < 5 { Luma([255]) } else { Luma([0]) });
        assert!((foreground_density(&mask, 0, 5) - 1.0).abs() < 1e-6);
        assert_eq!(foreground_density(&mask, 5, 10), 0.0);
        assert!((foreground_density(&mask, 0, 10) - 0.5).abs() < 1e-6);
        assert_eq!(foreground_density(&mask, 3, 3), 0.0);
    }
}
