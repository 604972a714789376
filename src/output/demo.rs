//! Camera-free demo signal
//!
//! Drives a handful of expression parameters with slow sine waves so an
//! avatar setup can be checked without a camera. Values bypass the rate
//! gate and go out through [`OscSender::send_custom_parameter`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::output::osc::OscSender;
use crate::tracking::params::{Parameter, ParameterMap};
use crate::tracking::smoothing::ParameterSmoother;

/// Demo send rate (10 Hz)
pub const DEMO_INTERVAL: Duration = Duration::from_millis(100);

/// Demo values at `t` seconds
pub fn demo_parameters(t: f64) -> ParameterMap {
    let wave = |speed: f64, phase: f64| ((t * speed + phase).sin() + 1.0) / 2.0;
    let pulse = |speed: f64, phase: f64| (t * speed + phase).sin().max(0.0);

    [
        (Parameter::MouthOpen, wave(2.0, 0.0)),
        (Parameter::MouthSmile, wave(1.5, 1.0)),
        (Parameter::LeftEyeBlink, pulse(3.0, 0.0)),
        (Parameter::RightEyeBlink, pulse(3.0, 0.1)),
        (Parameter::LeftEyebrowRaise, wave(0.8, 0.0)),
        (Parameter::RightEyebrowRaise, wave(0.6, 2.0)),
    ]
    .into_iter()
    .map(|(p, v)| (p, v as f32))
    .collect()
}

/// Summary of a finished demo run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemoReport {
    pub ticks: u64,
    pub sent: u64,
    pub failed: u64,
}

/// Send smoothed demo values every `interval` until `duration` elapses
/// or `stop` is set
pub fn run_demo(
    sender: &mut OscSender,
    smoother: &mut ParameterSmoother,
    duration: Duration,
    interval: Duration,
    stop: &AtomicBool,
) -> DemoReport {
    tracing::info!(
        "Sending demo parameters to {} for {:.0}s",
        sender.target(),
        duration.as_secs_f64()
    );

    let start = Instant::now();
    let mut report = DemoReport::default();

    while !stop.load(Ordering::SeqCst) && start.elapsed() < duration {
        let tick_start = Instant::now();
        let smoothed = smoother.smooth_parameters(&demo_parameters(start.elapsed().as_secs_f64()));

        for (parameter, &value) in smoothed.iter() {
            if sender.send_custom_parameter(parameter.as_str(), value) {
                report.sent += 1;
            } else {
                report.failed += 1;
            }
        }
        report.ticks += 1;

        tracing::debug!(
            "{}",
            smoothed
                .iter()
                .map(|(p, v)| format!("{}: {:.3}", p, v))
                .collect::<Vec<_>>()
                .join(" | ")
        );

        let elapsed = tick_start.elapsed();
        if elapsed < interval {
            std::thread::sleep(interval - elapsed);
        }
    }

    tracing::info!(
        "Demo finished: {} ticks, {} messages sent, {} failed",
        report.ticks,
        report.sent,
        report.failed
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OscConfig;
    use std::net::UdpSocket;

    #[test]
    fn test_demo_values_in_range() {
        for step in 0..200 {
            let params = demo_parameters(step as f64 * 0.05);
            assert_eq!(params.len(), 6);
            for (_, &value) in params.iter() {
                assert!((0.0..=1.0).contains(&value));
            }
        }
    }

    #[test]
    fn test_demo_values_at_zero() {
        let params = demo_parameters(0.0);
        assert!((params.value(Parameter::MouthOpen) - 0.5).abs() < 1e-6);
        assert_eq!(params.value(Parameter::LeftEyeBlink), 0.0);
        assert!(params.value(Parameter::RightEyeBlink) > 0.0);
    }

    #[test]
    fn test_run_demo_sends_until_duration() {
        let rx = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut sender = OscSender::connect(&OscConfig {
            target_port: rx.local_addr().unwrap().port(),
            ..Default::default()
        })
        .unwrap();
        let mut smoother = ParameterSmoother::new(0.8).unwrap();
        let stop = AtomicBool::new(false);

        let report = run_demo(
            &mut sender,
            &mut smoother,
            Duration::from_millis(50),
            Duration::from_millis(10),
            &stop,
        );

        assert!(report.ticks >= 1);
        assert_eq!(report.sent, report.ticks * 6);
        assert_eq!(report.failed, 0);
    }

    #[test]
    fn test_run_demo_honours_stop() {
        let rx = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut sender = OscSender::connect(&OscConfig {
            target_port: rx.local_addr().unwrap().port(),
            ..Default::default()
        })
        .unwrap();
        let mut smoother = ParameterSmoother::new(0.8).unwrap();
        let stop = AtomicBool::new(true);

        let report = run_demo(
            &mut sender,
            &mut smoother,
            Duration::from_secs(30),
            DEMO_INTERVAL,
            &stop,
        );
        assert_eq!(report, DemoReport::default());
    }
}
