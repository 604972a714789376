//! Hand/arm heuristics
//!
//! Motion against an adaptive background model, measured separately for the
//! left and right halves of the frame, stands in for raised arms.

use crate::error::TrackingError;
use crate::frame::Frame;
use crate::tracking::params::{Parameter, ParameterMap, HAND_PARAMETERS};
use crate::tracking::smoothing::blend;
use crate::tracking::FeatureExtractor;
use crate::vision::background::{foreground_density, MixtureParams};
use crate::vision::BackgroundModel;

/// Default motion density above which a hand counts as open
pub const DEFAULT_MOTION_THRESHOLD: f32 = 0.01;

/// Density multiplier for the arm raise estimate
const ARM_GAIN: f32 = 10.0;
const ARM_INERTIA: f32 = 0.7;
const HAND_OPEN_VALUE: f32 = 0.5;

/// Fraction of foreground pixels per half of the frame
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotionDensity {
    pub left: f32,
    pub right: f32,
}

/// Smoothed arm raise per side
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ArmState {
    pub left: f32,
    pub right: f32,
}

/// Arm raise and hand open extractor
pub struct HandExtractor {
    background: BackgroundModel,
    motion_threshold: f32,
    arms: ArmState,
}

impl Default for HandExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MOTION_THRESHOLD)
    }
}

impl HandExtractor {
    pub fn new(motion_threshold: f32) -> Self {
        Self::with_background(BackgroundModel::new(MixtureParams::default()), motion_threshold)
    }

    pub fn with_background(background: BackgroundModel, motion_threshold: f32) -> Self {
        Self {
            background,
            motion_threshold,
            arms: ArmState::default(),
        }
    }

    pub fn arms(&self) -> ArmState {
        self.arms
    }

    pub fn motion_threshold(&self) -> f32 {
        self.motion_threshold
    }

    /// Update the background model and measure motion on each side of the
    /// vertical midline
    pub fn measure_motion(&mut self, frame: &Frame) -> Result<MotionDensity, TrackingError> {
        let mask = self.background.apply(frame)?;
        let mid = mask.width() / 2;

        Ok(MotionDensity {
            left: foreground_density(&mask, 0, mid),
            right: foreground_density(&mask, mid, mask.width()),
        })
    }

    fn hand_open(&self, density: f32) -> f32 {
        if density > self.motion_threshold {
            HAND_OPEN_VALUE
        } else {
            0.0
        }
    }
}

impl FeatureExtractor for HandExtractor {
    fn name(&self) -> &'static str {
        "hand"
    }

    fn default_parameters(&self) -> ParameterMap {
        ParameterMap::with_defaults(&HAND_PARAMETERS)
    }

    fn extract(&mut self, frame: &Frame) -> Result<ParameterMap, TrackingError> {
        let density = self.measure_motion(frame)?;

        let left_raw = (density.left * ARM_GAIN).min(1.0);
        let right_raw = (density.right * ARM_GAIN).min(1.0);
        self.arms.left = blend(self.arms.left, left_raw, ARM_INERTIA);
        self.arms.right = blend(self.arms.right, right_raw, ARM_INERTIA);

        let mut params = self.default_parameters();
        params.set(Parameter::LeftArmRaise, self.arms.left);
        params.set(Parameter::RightArmRaise, self.arms.right);
        params.set(Parameter::LeftHandOpen, self.hand_open(density.left));
        params.set(Parameter::RightHandOpen, self.hand_open(density.right));

        tracing::trace!(
            "Motion density left={:.3} right={:.3}",
            density.left,
            density.right
        );
        Ok(params)
    }

    fn reset(&mut self) {
        self.background.reset();
        self.arms = ArmState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_identical_frames_have_no_motion() {
        let mut hand = HandExtractor::default();
        let frame = Frame::filled(32, 24, [80, 80, 80]).unwrap();
        hand.measure_motion(&frame).unwrap();

        for _ in 0..3 {
            let density = hand.measure_motion(&frame).unwrap();
            assert!(density.left < 0.01);
            assert!(density.right < 0.01);
        }
    }

    #[test]
    fn test_black_then_white_raises_arms() {
        let mut hand = HandExtractor::default();
        hand.extract(&Frame::filled(32, 24, [0, 0, 0]).unwrap()).unwrap();
        let params = hand
            .extract(&Frame::filled(32, 24, [255, 255, 255]).unwrap())
            .unwrap();

        let total = params.value(Parameter::LeftArmRaise) + params.value(Parameter::RightArmRaise);
        assert!(total > 0.0);
        assert!((params.value(Parameter::LeftHandOpen) - 0.5).abs() < 0.001);
        assert!(params.value(Parameter::LeftArmRaise) <= 1.0);
    }

    #[test]
    fn test_arm_raise_is_blended() {
        let mut hand = HandExtractor::default();
        // first frame is all foreground: raw 1.0 on both sides
        let params = hand.extract(&Frame::filled(32, 24, [0, 0, 0]).unwrap()).unwrap();
        assert!((params.value(Parameter::LeftArmRaise) - 0.3).abs() < 0.001);

        // static scene: raw 0.0, previous decays
        let params = hand.extract(&Frame::filled(32, 24, [0, 0, 0]).unwrap()).unwrap();
        assert!((params.value(Parameter::LeftArmRaise) - 0.21).abs() < 0.001);
        assert_eq!(params.value(Parameter::LeftHandOpen), 0.0);
        assert!((hand.arms().right - 0.21).abs() < 0.001);
    }

    #[test]
    fn test_motion_on_one_side() {
        let mut hand = HandExtractor::default();
        let still = Frame::filled(32, 24, [50, 50, 50]).unwrap();
        for _ in 0..5 {
            hand.measure_motion(&still).unwrap();
        }

        let mut image = RgbImage::from_pixel(32, 24, Rgb([50, 50, 50]));
        for y in 0..24 {
            for x in 0..8 {
                image.put_pixel(x, y, Rgb([250, 250, 250]));
            }
        }
        let density = hand.measure_motion(&Frame::from_image(image).unwrap()).unwrap();
        assert!((density.left - 0.5).abs() < 0.001);
        assert_eq!(density.right, 0.0);
    }

    #[test]
    fn test_fist_and_point_stay_zero() {
        let mut hand = HandExtractor::default();
        let params = hand.extract(&Frame::filled(16, 16, [10, 10, 10]).unwrap()).unwrap();
        assert_eq!(params.len(), 8);
        for p in [
            Parameter::LeftHandFist,
            Parameter::RightHandFist,
            Parameter::LeftHandPoint,
            Parameter::RightHandPoint,
        ] {
            assert_eq!(params.value(p), 0.0);
        }
    }

    #[test]
    fn test_frame_size_change_is_an_error() {
        let mut hand = HandExtractor::default();
        hand.extract(&Frame::filled(16, 16, [0, 0, 0]).unwrap()).unwrap();
        let result = hand.extract(&Frame::filled(8, 16, [0, 0, 0]).unwrap());
        assert!(matches!(result, Err(TrackingError::FrameShape { .. })));

        hand.reset();
        assert_eq!(hand.arms(), ArmState::default());
        assert!(hand.extract(&Frame::filled(8, 16, [0, 0, 0]).unwrap()).is_ok());
    }

    #[test]
    fn test_single_column_frame() {
        let mut hand = HandExtractor::default();
        let density = hand.measure_motion(&Frame::filled(1, 4, [0, 0, 0]).unwrap()).unwrap();
        assert_eq!(density.left, 0.0);
        assert!((density.right - 1.0).abs() < 0.001);
    }
}
