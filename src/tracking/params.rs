//! Avatar parameter vocabulary
//!
//! Every value emitted to the avatar client is keyed by a [`Parameter`].
//! The set is closed, so a misspelled parameter name is a compile error
//! rather than a silently ignored OSC address.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

/// A named avatar parameter, conventionally in `[0.0, 1.0]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Parameter {
    MouthOpen,
    LeftEyeBlink,
    RightEyeBlink,
    LeftEyebrowRaise,
    RightEyebrowRaise,
    MouthSmile,
    HeadTiltUp,
    HeadTiltDown,
    HeadTiltLeft,
    HeadTiltRight,
    HeadTurnLeft,
    HeadTurnRight,
    LeftArmRaise,
    RightArmRaise,
    LeftHandOpen,
    RightHandOpen,
    LeftHandFist,
    RightHandFist,
    LeftHandPoint,
    RightHandPoint,
}

/// Expression parameters produced by the face extractor
pub const FACE_PARAMETERS: [Parameter; 6] = [
    Parameter::MouthOpen,
    Parameter::LeftEyeBlink,
    Parameter::RightEyeBlink,
    Parameter::LeftEyebrowRaise,
    Parameter::RightEyebrowRaise,
    Parameter::MouthSmile,
];

/// Head pose parameters, present only when head pose estimation is enabled
pub const HEAD_POSE_PARAMETERS: [Parameter; 6] = [
    Parameter::HeadTiltUp,
    Parameter::HeadTiltDown,
    Parameter::HeadTiltLeft,
    Parameter::HeadTiltRight,
    Parameter::HeadTurnLeft,
    Parameter::HeadTurnRight,
];

/// Limb parameters produced by the hand extractor
pub const HAND_PARAMETERS: [Parameter; 8] = [
    Parameter::LeftArmRaise,
    Parameter::RightArmRaise,
    Parameter::LeftHandOpen,
    Parameter::RightHandOpen,
    Parameter::LeftHandFist,
    Parameter::RightHandFist,
    Parameter::LeftHandPoint,
    Parameter::RightHandPoint,
];

impl Parameter {
    /// Name used as the last OSC address segment
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MouthOpen => "MouthOpen",
            Self::LeftEyeBlink => "LeftEyeBlink",
            Self::RightEyeBlink => "RightEyeBlink",
            Self::LeftEyebrowRaise => "LeftEyebrowRaise",
            Self::RightEyebrowRaise => "RightEyebrowRaise",
            Self::MouthSmile => "MouthSmile",
            Self::HeadTiltUp => "HeadTiltUp",
            Self::HeadTiltDown => "HeadTiltDown",
            Self::HeadTiltLeft => "HeadTiltLeft",
            Self::HeadTiltRight => "HeadTiltRight",
            Self::HeadTurnLeft => "HeadTurnLeft",
            Self::HeadTurnRight => "HeadTurnRight",
            Self::LeftArmRaise => "LeftArmRaise",
            Self::RightArmRaise => "RightArmRaise",
            Self::LeftHandOpen => "LeftHandOpen",
            Self::RightHandOpen => "RightHandOpen",
            Self::LeftHandFist => "LeftHandFist",
            Self::RightHandFist => "RightHandFist",
            Self::LeftHandPoint => "LeftHandPoint",
            Self::RightHandPoint => "RightHandPoint",
        }
    }

    /// Every parameter in emission order
    pub fn all() -> impl Iterator<Item = Parameter> {
        FACE_PARAMETERS
            .into_iter()
            .chain(HEAD_POSE_PARAMETERS)
            .chain(HAND_PARAMETERS)
    }

    /// Look up a parameter by its wire name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().find(|p| p.as_str() == name)
    }

    pub fn is_face(&self) -> bool {
        FACE_PARAMETERS.contains(self) || HEAD_POSE_PARAMETERS.contains(self)
    }

    pub fn is_hand(&self) -> bool {
        HAND_PARAMETERS.contains(self)
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One value per parameter for a single frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterMap(BTreeMap<Parameter, f32>);

impl ParameterMap {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Map holding `0.0` for every given parameter
    pub fn with_defaults(parameters: &[Parameter]) -> Self {
        parameters.iter().map(|&p| (p, 0.0)).collect()
    }

    pub fn set(&mut self, parameter: Parameter, value: f32) {
        self.0.insert(parameter, value);
    }

    pub fn get(&self, parameter: Parameter) -> Option<f32> {
        self.0.get(&parameter).copied()
    }

    /// Value of a parameter, `0.0` when absent
    pub fn value(&self, parameter: Parameter) -> f32 {
        self.get(parameter).unwrap_or(0.0)
    }

    pub fn contains(&self, parameter: Parameter) -> bool {
        self.0.contains_key(&parameter)
    }

    /// Copy every entry of `other` into this map, replacing duplicates
    pub fn merge(&mut self, other: &ParameterMap) {
        for (&parameter, &value) in other.iter() {
            self.set(parameter, value);
        }
    }

    pub fn iter(&self) -> btree_map::Iter<'_, Parameter, f32> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(Parameter, f32)> for ParameterMap {
    fn from_iter<I: IntoIterator<Item = (Parameter, f32)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ParameterMap {
    type Item = (&'a Parameter, &'a f32);
    type IntoIter = btree_map::Iter<'a, Parameter, f32>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
