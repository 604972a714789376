//! Face heuristics
//!
//! Finds the largest face in the frame and derives expression parameters
//! from it:
//! - mouth opening from edge contours in the lower part of the face
//! - blink from the absence of detected eyes (both eyes share one value)
//! - smile from a smile detector hit
//! - head turn/tilt from where the face sits in the frame
//!
//! Eyebrow parameters are always 0.0.

use image::imageops;
use image::GrayImage;

use crate::config::TrackingConfig;
use crate::error::{DetectorError, TrackingError};
use crate::frame::Frame;
use crate::tracking::params::{Parameter, ParameterMap, FACE_PARAMETERS, HEAD_POSE_PARAMETERS};
use crate::tracking::smoothing::blend;
use crate::tracking::FeatureExtractor;
use crate::vision::contours::edge_contour_area;
use crate::vision::{
    largest_region, CascadeClassifier, Rect, RegionDetector, EYE_PARAMS, FACE_PARAMS, SMILE_PARAMS,
};

/// Fraction of the face height above the mouth region
const MOUTH_REGION_START: f32 = 0.6;
/// Contour area mapped to a fully open mouth
const MOUTH_AREA_DIVISOR: f64 = 100.0;
const MOUTH_INERTIA: f32 = 0.7;

const BLINK_VALUE: f32 = 0.8;
const BLINK_INERTIA: f32 = 0.8;

const SMILE_VALUE: f32 = 0.8;

/// Normalized offset from the frame center below which the head is level
const HEAD_OFFSET_DEADZONE: f32 = 0.1;
/// Face aspect ratio above which the head counts as rolled
const HEAD_ROLL_ASPECT: f32 = 1.2;

/// Heuristic-internal filters, independent of the parameter smoother
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaceSmoothingState {
    pub mouth_open: f32,
    pub eye_blink: f32,
}

/// Face expression and head pose extractor
pub struct FaceExtractor {
    face: Box<dyn RegionDetector>,
    eyes: Box<dyn RegionDetector>,
    smile: Box<dyn RegionDetector>,
    head_pose: bool,
    state: FaceSmoothingState,
}

impl FaceExtractor {
    /// Load the three cascades named in the configuration
    pub fn from_config(config: &TrackingConfig) -> Result<Self, DetectorError> {
        let face = CascadeClassifier::from_file(config.face_cascade_path())?;
        let eyes = CascadeClassifier::from_file(config.eye_cascade_path())?;
        let smile = CascadeClassifier::from_file(config.smile_cascade_path())?;

        Ok(Self::with_detectors(
            Box::new(face),
            Box::new(eyes),
            Box::new(smile),
            config.head_pose,
        ))
    }

    pub fn with_detectors(
        face: Box<dyn RegionDetector>,
        eyes: Box<dyn RegionDetector>,
        smile: Box<dyn RegionDetector>,
        head_pose: bool,
    ) -> Self {
        Self {
            face,
            eyes,
            smile,
            head_pose,
            state: FaceSmoothingState::default(),
        }
    }

    pub fn head_pose_enabled(&self) -> bool {
        self.head_pose
    }

    pub fn state(&self) -> &FaceSmoothingState {
        &self.state
    }

    fn mouth_open(&mut self, face: &GrayImage) -> f32 {
        let start = (face.height() as f32 * MOUTH_REGION_START) as u32;
        if start >= face.height() {
            return 0.0;
        }

        let mouth =
            imageops::crop_imm(face, 0, start, face.width(), face.height() - start).to_image();
        match edge_contour_area(&mouth) {
            Some(area) => {
                let ratio = (area / MOUTH_AREA_DIVISOR).min(1.0) as f32;
                let smoothed = blend(self.state.mouth_open, ratio, MOUTH_INERTIA);
                self.state.mouth_open = smoothed;
                smoothed
            }
            None => 0.0,
        }
    }

    fn eye_blink(&mut self, face: &GrayImage) -> f32 {
        let eyes = self.eyes.detect(face, &EYE_PARAMS);
        let raw = if eyes.is_empty() { BLINK_VALUE } else { 0.0 };
        let smoothed = blend(self.state.eye_blink, raw, BLINK_INERTIA);
        self.state.eye_blink = smoothed;
        smoothed
    }

    fn smile(&self, face: &GrayImage) -> f32 {
        if self.smile.detect(face, &SMILE_PARAMS).is_empty() {
            0.0
        } else {
            SMILE_VALUE
        }
    }
}

/// Head turn/tilt/roll from the face position within a frame
pub fn head_pose(face: &Rect, frame_width: u32, frame_height: u32) -> ParameterMap {
    let mut params = ParameterMap::with_defaults(&HEAD_POSE_PARAMETERS);

    let (cx, cy) = face.center();
    let half_w = frame_width as f32 / 2.0;
    let half_h = frame_height as f32 / 2.0;
    let offset_x = (cx - half_w) / half_w;
    let offset_y = (cy - half_h) / half_h;

    let strength = |offset: f32| (offset.abs() * 2.0).min(1.0);

    if offset_x < -HEAD_OFFSET_DEADZONE {
        params.set(Parameter::HeadTurnLeft, strength(offset_x));
    } else if offset_x > HEAD_OFFSET_DEADZONE {
        params.set(Parameter::HeadTurnRight, strength(offset_x));
    }

    if offset_y < -HEAD_OFFSET_DEADZONE {
        params.set(Parameter::HeadTiltUp, strength(offset_y));
    } else if offset_y > HEAD_OFFSET_DEADZONE {
        params.set(Parameter::HeadTiltDown, strength(offset_y));
    }

    let aspect = face.aspect();
    if aspect > HEAD_ROLL_ASPECT {
        let roll = ((aspect - 1.0) * 2.0).min(1.0);
        if offset_x < 0.0 {
            params.set(Parameter::HeadTiltLeft, roll);
        } else {
            params.set(Parameter::HeadTiltRight, roll);
        }
    }

    params
}

impl FeatureExtractor for FaceExtractor {
    fn name(&self) -> &'static str {
        "face"
    }

    fn default_parameters(&self) -> ParameterMap {
        let mut params = ParameterMap::with_defaults(&FACE_PARAMETERS);
        if self.head_pose {
            params.merge(&ParameterMap::with_defaults(&HEAD_POSE_PARAMETERS));
        }
        params
    }

    fn extract(&mut self, frame: &Frame) -> Result<ParameterMap, TrackingError> {
        let mut params = self.default_parameters();
        let gray = frame.to_gray();
        let (width, height) = gray.dimensions();

        let faces = self.face.detect(&gray, &FACE_PARAMS);
        let face = match largest_region(&faces).and_then(|r| r.clamp_to(width, height)) {
            Some(face) => face,
            None => {
                tracing::trace!("No face in frame {}", frame.index());
                return Ok(params);
            }
        };

        let roi = imageops::crop_imm(&gray, face.x, face.y, face.width, face.height).to_image();

        params.set(Parameter::MouthOpen, self.mouth_open(&roi));

        let blink = self.eye_blink(&roi);
        params.set(Parameter::LeftEyeBlink, blink);
        params.set(Parameter::RightEyeBlink, blink);

        params.set(Parameter::MouthSmile, self.smile(&roi));

        if self.head_pose {
            params.merge(&head_pose(&face, width, height));
        }

        Ok(params)
    }

    fn reset(&mut self) {
        self.state = FaceSmoothingState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    /// Reports the same regions for every image
    struct FixedDetector(Vec<Rect>);

    impl RegionDetector for FixedDetector {
        fn detect(&self, _image: &GrayImage, _params: &crate::vision::DetectParams) -> Vec<Rect> {
            self.0.clone()
        }
    }

    fn extractor(faces: Vec<Rect>, eyes: Vec<Rect>, smiles: Vec<Rect>) -> FaceExtractor {
        FaceExtractor::with_detectors(
            Box::new(FixedDetector(faces)),
            Box::new(FixedDetector(eyes)),
            Box::new(FixedDetector(smiles)),
            true,
        )
    }

    #[test]
    fn test_no_face_gives_defaults() {
        let mut face = extractor(vec![], vec![], vec![]);
        let frame = Frame::filled(64, 48, [0, 0, 0]).unwrap();
        let params = face.extract(&frame).unwrap();

        assert_eq!(params.len(), 12);
        assert!(params.iter().all(|(_, &v)| v == 0.0));
        assert_eq!(face.state(), &FaceSmoothingState::default());
    }

    #[test]
    fn test_black_frame_with_loaded_cascades() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrackingConfig {
            cascade_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        for path in [
            config.face_cascade_path(),
            config.eye_cascade_path(),
            config.smile_cascade_path(),
        ] {
            std::fs::write(path, crate::vision::cascade::EDGE_CASCADE).unwrap();
        }

        let mut face = FaceExtractor::from_config(&config).unwrap();
        let frame = Frame::filled(64, 48, [0, 0, 0]).unwrap();
        let params = face.extract(&frame).unwrap();

        assert_eq!(params.len(), 12);
        assert!(params.iter().all(|(_, &v)| v == 0.0));
    }

    #[test]
    fn test_default_key_set_without_head_pose() {
        let face = FaceExtractor::with_detectors(
            Box::new(FixedDetector(vec![])),
            Box::new(FixedDetector(vec![])),
            Box::new(FixedDetector(vec![])),
            false,
        );
        let defaults = face.default_parameters();
        assert_eq!(defaults.len(), 6);
        assert!(!defaults.contains(Parameter::HeadTurnLeft));
    }

    #[test]
    fn test_head_pose_from_offset() {
        let mut face = extractor(vec![Rect::new(60, 10, 30, 30)], vec![], vec![]);
        let frame = Frame::filled(100, 100, [0, 0, 0]).unwrap();
        let params = face.extract(&frame).unwrap();

        assert!((params.value(Parameter::HeadTurnRight) - 1.0).abs() < 0.01);
        assert!((params.value(Parameter::HeadTiltUp) - 1.0).abs() < 0.01);
        assert_eq!(params.value(Parameter::HeadTurnLeft), 0.0);
        assert_eq!(params.value(Parameter::HeadTiltDown), 0.0);
        assert_eq!(params.value(Parameter::HeadTiltLeft), 0.0);
        assert_eq!(params.value(Parameter::HeadTiltRight), 0.0);
    }

    #[test]
    fn test_centered_face_is_level() {
        let pose = head_pose(&Rect::new(45, 45, 10, 10), 100, 100);
        assert!(pose.iter().all(|(_, &v)| v == 0.0));
        assert_eq!(pose.len(), 6);
    }

    #[test]
    fn test_small_offset_is_proportional() {
        // center x = 35 -> offset -0.3
        let pose = head_pose(&Rect::new(30, 45, 10, 10), 100, 100);
        assert!((pose.value(Parameter::HeadTurnLeft) - 0.6).abs() < 0.01);
    }

    #[test]
    fn test_roll_is_clamped() {
        let pose = head_pose(&Rect::new(0, 40, 90, 30), 100, 100);
        let roll = pose.value(Parameter::HeadTiltLeft);
        assert!((0.0..=1.0).contains(&roll));
        assert!((roll - 1.0).abs() < 0.01);
        assert_eq!(pose.value(Parameter::HeadTiltRight), 0.0);
    }

    #[test]
    fn test_blink_when_no_eyes() {
        let mut face = extractor(vec![Rect::new(10, 10, 40, 40)], vec![], vec![]);
        let frame = Frame::filled(64, 64, [0, 0, 0]).unwrap();

        let params = face.extract(&frame).unwrap();
        assert!((params.value(Parameter::LeftEyeBlink) - 0.16).abs() < 0.001);
        assert_eq!(
            params.value(Parameter::LeftEyeBlink),
            params.value(Parameter::RightEyeBlink)
        );

        let params = face.extract(&frame).unwrap();
        assert!((params.value(Parameter::LeftEyeBlink) - 0.288).abs() < 0.001);
    }

    #[test]
    fn test_open_eyes_do_not_blink() {
        let eye = Rect::new(5, 5, 8, 8);
        let mut face = extractor(vec![Rect::new(10, 10, 40, 40)], vec![eye], vec![]);
        let params = face.extract(&Frame::filled(64, 64, [0, 0, 0]).unwrap()).unwrap();
        assert_eq!(params.value(Parameter::LeftEyeBlink), 0.0);
    }

    #[test]
    fn test_smile_detected() {
        let mut face = extractor(
            vec![Rect::new(10, 10, 40, 40)],
            vec![],
            vec![Rect::new(10, 25, 20, 10)],
        );
        let params = face.extract(&Frame::filled(64, 64, [0, 0, 0]).unwrap()).unwrap();
        assert!((params.value(Parameter::MouthSmile) - 0.8).abs() < 0.001);
        assert_eq!(params.value(Parameter::LeftEyebrowRaise), 0.0);
        assert_eq!(params.value(Parameter::RightEyebrowRaise), 0.0);
    }

    #[test]
    fn test_mouth_open_from_contours() {
        // bright block in the lower part of the face region
        let mut image = RgbImage::from_pixel(80, 80, Rgb([0, 0, 0]));
        for y in 55..75 {
            for x in 20..60 {
                image.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let frame = Frame::from_image(image).unwrap();
        let mut face = extractor(vec![Rect::new(10, 10, 60, 70)], vec![], vec![]);

        let first = face.extract(&frame).unwrap().value(Parameter::MouthOpen);
        assert!((first - 0.3).abs() < 0.001);
        let second = face.extract(&frame).unwrap().value(Parameter::MouthOpen);
        assert!((second - 0.51).abs() < 0.001);
    }

    #[test]
    fn test_flat_face_has_closed_mouth() {
        let mut face = extractor(vec![Rect::new(10, 10, 40, 40)], vec![], vec![]);
        let params = face.extract(&Frame::filled(64, 64, [30, 30, 30]).unwrap()).unwrap();
        assert_eq!(params.value(Parameter::MouthOpen), 0.0);
        assert_eq!(face.state().mouth_open, 0.0);
    }

    #[test]
    fn test_missing_cascade_is_fatal() {
        let config = TrackingConfig {
            cascade_dir: std::path::PathBuf::from("/nonexistent"),
            ..Default::default()
        };
        assert!(FaceExtractor::from_config(&config).is_err());
    }
}
