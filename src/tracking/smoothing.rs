//! Per-parameter exponential moving average
//!
//! Holds the last smoothed value of every parameter it has seen. The first
//! observation passes through unchanged; later ones are blended with the
//! stored value.

use std::collections::HashMap;

use crate::error::ConfigError;
use crate::tracking::params::ParameterMap;

/// Blend a new sample into a previous value.
///
/// `inertia` is the weight of `previous`.
#[inline]
pub fn blend(previous: f32, raw: f32, inertia: f32) -> f32 {
    inertia * previous + (1.0 - inertia) * raw
}

/// Exponential smoothing keyed by parameter name
#[derive(Debug, Clone)]
pub struct ParameterSmoother {
    factor: f32,
    previous: HashMap<String, f32>,
}

impl ParameterSmoother {
    /// Create a smoother. `factor` must lie strictly between 0 and 1.
    pub fn new(factor: f32) -> Result<Self, ConfigError> {
        if !(factor > 0.0 && factor < 1.0) {
            return Err(ConfigError::invalid(
                "smoothing_factor",
                format!("{} is not strictly between 0.0 and 1.0", factor),
            ));
        }

        Ok(Self {
            factor,
            previous: HashMap::new(),
        })
    }

    /// Smooth one value and record the result under `key`
    pub fn smooth(&mut self, value: f32, key: &str) -> f32 {
        let output = match self.previous.get(key) {
            Some(&previous) => blend(previous, value, self.factor),
            None => value,
        };
        self.previous.insert(key.to_string(), output);
        output
    }

    /// Smooth every entry of a map independently
    pub fn smooth_parameters(&mut self, parameters: &ParameterMap) -> ParameterMap {
        parameters
            .iter()
            .map(|(&parameter, &value)| (parameter, self.smooth(value, parameter.as_str())))
            .collect()
    }

    /// Forget all recorded values
    pub fn reset(&mut self) {
        tracing::debug!("Resetting {} smoothed parameters", self.previous.len());
        self.previous.clear();
    }

    pub fn factor(&self) -> f32 {
        self.factor
    }

    pub fn tracked_keys(&self) -> usize {
        self.previous.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::params::Parameter;
    use proptest::prelude::*;

    #[test]
    fn test_rejects_factor_out_of_range() {
        assert!(ParameterSmoother::new(0.0).is_err());
        assert!(ParameterSmoother::new(1.0).is_err());
        assert!(ParameterSmoother::new(-0.5).is_err());
        assert!(ParameterSmoother::new(f32::NAN).is_err());
        assert!(ParameterSmoother::new(0.8).is_ok());
    }

    #[test]
    fn test_first_value_passes_through() {
        let mut smoother = ParameterSmoother::new(0.8).unwrap();
        assert_eq!(smoother.smooth(0.37, "MouthOpen"), 0.37);
    }

    #[test]
    fn test_second_value_is_blended() {
        let mut smoother = ParameterSmoother::new(0.8).unwrap();
        smoother.smooth(1.0, "MouthOpen");
        let out = smoother.smooth(0.0, "MouthOpen");
        assert!((out - 0.8).abs() < 1e-6);

        let out = smoother.smooth(0.0, "MouthOpen");
        assert!((out - 0.64).abs() < 1e-6);
    }

    #[test]
    fn test_keys_are_independent() {
        let mut smoother = ParameterSmoother::new(0.5).unwrap();
        smoother.smooth(1.0, "A");
        assert_eq!(smoother.smooth(0.2, "B"), 0.2);
        assert_eq!(smoother.tracked_keys(), 2);
    }

    #[test]
    fn test_reset_forgets_history() {
        let mut smoother = ParameterSmoother::new(0.8).unwrap();
        smoother.smooth(1.0, "MouthOpen");
        smoother.smooth(0.5, "LeftEyeBlink");
        smoother.reset();
        assert_eq!(smoother.tracked_keys(), 0);
        assert_eq!(smoother.smooth(0.1, "MouthOpen"), 0.1);
        assert_eq!(smoother.smooth(0.3, "LeftEyeBlink"), 0.3);
    }

    #[test]
    fn test_smooth_parameters_keeps_key_set() {
        let mut smoother = ParameterSmoother::new(0.8).unwrap();
        let mut map = ParameterMap::new();
        map.set(Parameter::MouthOpen, 1.0);
        map.set(Parameter::LeftArmRaise, 0.5);

        let first = smoother.smooth_parameters(&map);
        assert_eq!(first, map);

        map.set(Parameter::MouthOpen, 0.0);
        let second = smoother.smooth_parameters(&map);
        assert_eq!(second.len(), 2);
        assert!((second.value(Parameter::MouthOpen) - 0.8).abs() < 1e-6);
        assert!((second.value(Parameter::LeftArmRaise) - 0.5).abs() < 1e-6);
    }

    proptest! {
        #[test]
        fn smoothed_output_stays_in_unit_range(
            factor in 0.01f32..0.99,
            values in proptest::collection::vec(0.0f32..=1.0, 1..64),
        ) {
            let mut smoother = ParameterSmoother::new(factor).unwrap();
            for value in values {
                let out = smoother.smooth(value, "MouthOpen");
                prop_assert!(out >= -1e-6 && out <= 1.0 + 1e-6);
            }
        }

        #[test]
        fn second_call_is_convex_combination(
            factor in 0.01f32..0.99,
            v1 in 0.0f32..=1.0,
            v2 in 0.0f32..=1.0,
        ) {
            let mut smoother = ParameterSmoother::new(factor).unwrap();
            prop_assert_eq!(smoother.smooth(v1, "k"), v1);
            let out = smoother.smooth(v2, "k");
            prop_assert!((out - (factor * v1 + (1.0 - factor) * v2)).abs() < 1e-6);
        }
    }
}
