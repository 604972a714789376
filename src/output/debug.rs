//! Periodic parameter log for debug runs

use std::time::{Duration, Instant};

use crate::output::osc::Emission;
use crate::tracking::params::{Parameter, ParameterMap};
use crate::tracking::pipeline::FrameObserver;

/// Values at or below this are left out of the report
pub const REPORT_THRESHOLD: f32 = 0.1;

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Logs active parameters at most once per interval
#[derive(Debug, Clone)]
pub struct ParameterLogger {
    interval: Duration,
    last_report: Option<Instant>,
    emissions: u64,
    reports: u64,
}

impl Default for ParameterLogger {
    fn default() -> Self {
        Self::new(REPORT_INTERVAL)
    }
}

impl ParameterLogger {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_report: None,
            emissions: 0,
            reports: 0,
        }
    }

    /// Batches sent so far
    pub fn emissions(&self) -> u64 {
        self.emissions
    }

    pub fn reports(&self) -> u64 {
        self.reports
    }

    /// Record one frame; logs a report if the interval has passed.
    /// Returns whether a report was written.
    pub fn observe(&mut self, parameters: &ParameterMap, emission: Emission, now: Instant) -> bool {
        if emission.is_sent() {
            self.emissions += 1;
        }

        let due = match self.last_report {
            Some(last) => now.saturating_duration_since(last) >= self.interval,
            None => true,
        };
        if !due {
            return false;
        }

        tracing::info!("Facial: {}", format_section(&active(parameters, Parameter::is_face)));
        tracing::info!("Hand/arm: {}", format_section(&active(parameters, Parameter::is_hand)));
        tracing::info!("OSC batches sent: {}", self.emissions);

        self.last_report = Some(now);
        self.reports += 1;
        true
    }
}

impl FrameObserver for ParameterLogger {
    fn on_frame(&mut self, parameters: &ParameterMap, emission: Emission) {
        self.observe(parameters, emission, Instant::now());
    }
}

/// Parameters in one group whose value exceeds [`REPORT_THRESHOLD`]
pub fn active(parameters: &ParameterMap, group: fn(&Parameter) -> bool) -> Vec<(Parameter, f32)> {
    parameters
        .iter()
        .filter(|&(p, &v)| group(p) && v > REPORT_THRESHOLD)
        .map(|(&p, &v)| (p, v))
        .collect()
}

fn format_section(entries: &[(Parameter, f32)]) -> String {
    if entries.is_empty() {
        return "-".to_string();
    }
    entries
        .iter()
        .map(|(p, v)| format!("{}={:.3}", p, v))
        .collect::<Vec<_>>()
        .join(" ")
}
