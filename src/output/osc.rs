//! OSC output to the avatar client
//!
//! Parameters go out as one message per parameter,
//! `<prefix>/<Name>` with a single float. The optional tracker batch uses
//! `/tracking/trackers/{head,1..8}/{position,rotation}` with three floats.
//!
//! Every gated emission passes through one [`RateGate`]: a call that comes
//! too soon after the last successful emission is dropped, not queued.
//! Send failures are logged and reported, never raised.

use rosc::{OscMessage, OscPacket, OscType};
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use crate::config::OscConfig;
use crate::error::OutputError;
use crate::tracking::params::{Parameter, ParameterMap};

/// Number of generic tracker slots
pub const TRACKER_SLOTS: usize = 8;

/// Address used by the connectivity self-test
pub const TEST_CONNECTION_PARAMETER: &str = "TestConnection";

const TRACKER_ROOT: &str = "/tracking/trackers";

/// Minimum-interval throttle
#[derive(Debug, Clone)]
pub struct RateGate {
    interval: Duration,
    last: Option<Instant>,
}

impl RateGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether an emission at `now` is allowed
    pub fn is_open_at(&self, now: Instant) -> bool {
        match self.last {
            Some(last) => now.saturating_duration_since(last) >= self.interval,
            None => true,
        }
    }

    /// Record a successful emission
    pub fn mark(&mut self, now: Instant) {
        self.last = Some(now);
    }
}

/// Outcome of one gated emission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emission {
    /// Messages sent
    Sent(usize),
    /// Rate gate closed, nothing sent
    Throttled,
    /// Transport failure, logged
    Dropped,
}

impl Emission {
    pub fn is_sent(&self) -> bool {
        matches!(self, Emission::Sent(_))
    }
}

/// Running totals, mostly for debug output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendStats {
    pub batches: u64,
    pub messages: u64,
    pub throttled: u64,
    pub dropped: u64,
}

/// UDP sender for avatar parameters and trackers
pub struct OscSender {
    socket: UdpSocket,
    target: SocketAddr,
    prefix: String,
    send_trackers: bool,
    gate: RateGate,
    stats: SendStats,
}

impl OscSender {
    /// Bind an ephemeral local socket aimed at the configured target
    pub fn connect(config: &OscConfig) -> Result<Self, OutputError> {
        let ip: IpAddr = config
            .target_ip
            .parse()
            .map_err(|e| OutputError::InvalidTarget(format!("{}: {}", config.target_ip, e)))?;
        let target = SocketAddr::new(ip, config.target_port);

        let bind_addr = if ip.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
        let socket = UdpSocket::bind(bind_addr)
            .map_err(|e| OutputError::Bind(format!("{}: {}", bind_addr, e)))?;

        // fire-and-forget, never stall the frame loop
        socket
            .set_nonblocking(true)
            .map_err(|e| OutputError::Bind(format!("Failed to set non-blocking: {}", e)))?;

        let gate = RateGate::new(config.send_interval());
        tracing::info!(
            "OSC sender targeting {} (at most one batch every {:?})",
            target,
            gate.interval()
        );

        Ok(Self {
            socket,
            target,
            prefix: config.address_prefix.trim_end_matches('/').to_string(),
            send_trackers: config.send_trackers,
            gate,
            stats: SendStats::default(),
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn stats(&self) -> SendStats {
        self.stats
    }

    pub fn sends_trackers(&self) -> bool {
        self.send_trackers
    }

    /// Gated: one message per parameter under `prefix`
    pub fn emit_parameters(&mut self, params: &ParameterMap, prefix: &str) -> Emission {
        let messages = parameter_messages(params, prefix.trim_end_matches('/'));
        self.emit_gated(messages, "parameter")
    }

    /// Gated: the head tracker synthesized from `face`, then eight tracker
    /// slots filled from `body` (missing slots are zero)
    pub fn emit_tracking(&mut self, face: &ParameterMap, body: Option<&[[f32; 3]]>) -> Emission {
        self.emit_gated(tracker_messages(face, body), "tracker")
    }

    /// Gated: the full per-frame batch, parameters plus trackers when enabled
    pub fn emit_frame(&mut self, params: &ParameterMap) -> Emission {
        let mut messages = parameter_messages(params, &self.prefix);
        if self.send_trackers {
            messages.extend(tracker_messages(params, None));
        }
        self.emit_gated(messages, "frame")
    }

    /// Ungated: a single named parameter
    pub fn send_custom_parameter(&mut self, name: &str, value: f32) -> bool {
        let message = float_message(format!("{}/{}", self.prefix, name), &[value]);
        match self.send_all(&[message]) {
            Ok(count) => {
                self.stats.messages += count as u64;
                true
            }
            Err(e) => {
                tracing::warn!("Custom parameter {} not sent: {}", name, e);
                self.stats.dropped += 1;
                false
            }
        }
    }

    /// Send one diagnostic message and report whether the send succeeded
    pub fn test_connection(&mut self) -> bool {
        let ok = self.send_custom_parameter(TEST_CONNECTION_PARAMETER, 1.0);
        if ok {
            tracing::info!("OSC connection test sent to {}", self.target);
        } else {
            tracing::warn!("OSC connection test to {} failed", self.target);
        }
        ok
    }

    fn emit_gated(&mut self, messages: Vec<OscMessage>, kind: &str) -> Emission {
        let now = Instant::now();
        if !self.gate.is_open_at(now) {
            self.stats.throttled += 1;
            return Emission::Throttled;
        }

        match self.send_all(&messages) {
            Ok(count) => {
                self.gate.mark(now);
                self.stats.batches += 1;
                self.stats.messages += count as u64;
                Emission::Sent(count)
            }
            Err(e) => {
                tracing::warn!("{} batch dropped: {}", kind, e);
                self.stats.dropped += 1;
                Emission::Dropped
            }
        }
    }

    fn send_all(&self, messages: &[OscMessage]) -> Result<usize, OutputError> {
        for message in messages {
            let packet = OscPacket::Message(message.clone());
            let bytes = rosc::encoder::encode(&packet)
                .map_err(|e| OutputError::Encode(format!("{}: {}", message.addr, e)))?;
            self.socket
                .send_to(&bytes, self.target)
                .map_err(|e| OutputError::Send(format!("{}: {}", message.addr, e)))?;
        }
        Ok(messages.len())
    }
}

fn float_message(addr: String, values: &[f32]) -> OscMessage {
    OscMessage {
        addr,
        args: values.iter().map(|&v| OscType::Float(v)).collect(),
    }
}

fn parameter_messages(params: &ParameterMap, prefix: &str) -> Vec<OscMessage> {
    params
        .iter()
        .map(|(parameter, &value)| float_message(format!("{}/{}", prefix, parameter), &[value]))
        .collect()
}

/// Head position derived from the head pose parameters
pub fn head_position(face: &ParameterMap) -> [f32; 3] {
    [
        face.value(Parameter::HeadTurnRight) - face.value(Parameter::HeadTurnLeft),
        face.value(Parameter::HeadTiltUp) - face.value(Parameter::HeadTiltDown),
        0.0,
    ]
}

fn tracker_messages(face: &ParameterMap, body: Option<&[[f32; 3]]>) -> Vec<OscMessage> {
    let zero = [0.0f32; 3];
    let mut messages = Vec::with_capacity(2 * (TRACKER_SLOTS + 1));

    messages.push(float_message(
        format!("{}/head/position", TRACKER_ROOT),
        &head_position(face),
    ));
    messages.push(float_message(format!("{}/head/rotation", TRACKER_ROOT), &zero));

    let body = body.unwrap_or(&[]);
    if body.len() > TRACKER_SLOTS {
        tracing::debug!(
            "Ignoring {} body points beyond {} trackers",
            body.len() - TRACKER_SLOTS,
            TRACKER_SLOTS
        );
    }
    for slot in 0..TRACKER_SLOTS {
        let position = body.get(slot).copied().unwrap_or(zero);
        messages.push(float_message(
            format!("{}/{}/position", TRACKER_ROOT, slot + 1),
            &position,
        ));
        messages.push(float_message(
            format!("{}/{}/rotation", TRACKER_ROOT, slot + 1),
            &zero,
        ));
    }

    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receiver() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        socket
    }

    fn sender_for(receiver: &UdpSocket, send_rate_hz: f64, send_trackers: bool) -> OscSender {
        let config = OscConfig {
            target_ip: "127.0.0.1".to_string(),
            target_port: receiver.local_addr().unwrap().port(),
            send_rate_hz,
            send_trackers,
            ..Default::default()
        };
        OscSender::connect(&config).unwrap()
    }

    fn recv_message(socket: &UdpSocket) -> OscMessage {
        let mut buf = [0u8; 1024];
        let size = socket.recv(&mut buf).unwrap();
        match rosc::decoder::decode_udp(&buf[..size]).unwrap().1 {
            OscPacket::Message(msg) => msg,
            OscPacket::Bundle(_) => panic!("unexpected bundle"),
        }
    }

    fn no_more_messages(socket: &UdpSocket) -> bool {
        socket
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        let mut buf = [0u8; 1024];
        socket.recv(&mut buf).is_err()
    }

    #[test]
    fn test_rate_gate() {
        let mut gate = RateGate::new(Duration::from_secs_f64(1.0 / 60.0));
        let start = Instant::now();
        assert!(gate.is_open_at(start));

        gate.mark(start);
        assert!(!gate.is_open_at(start + Duration::from_millis(5)));
        assert!(gate.is_open_at(start + Duration::from_secs_f64(1.0 / 60.0)));
        assert!(gate.is_open_at(start + Duration::from_millis(20)));
    }

    #[test]
    fn test_invalid_target_rejected() {
        let config = OscConfig {
            target_ip: "vrchat.local".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            OscSender::connect(&config),
            Err(OutputError::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_send_custom_parameter() {
        let rx = receiver();
        let mut sender = sender_for(&rx, 60.0, false);

        assert!(sender.send_custom_parameter("TestParam", 0.8));
        let msg = recv_message(&rx);
        assert_eq!(msg.addr, "/avatar/parameters/TestParam");
        assert_eq!(msg.args, vec![OscType::Float(0.8)]);
        assert!(no_more_messages(&rx));
    }

    #[test]
    fn test_connection_message() {
        let rx = receiver();
        let mut sender = sender_for(&rx, 60.0, false);

        assert!(sender.test_connection());
        let msg = recv_message(&rx);
        assert_eq!(msg.addr, "/avatar/parameters/TestConnection");
        assert_eq!(msg.args, vec![OscType::Float(1.0)]);
    }

    #[test]
    fn test_second_emission_is_throttled() {
        let rx = receiver();
        let mut sender = sender_for(&rx, 1.0, false);

        let mut params = ParameterMap::new();
        params.set(Parameter::MouthOpen, 0.5);
        params.set(Parameter::LeftEyeBlink, 0.25);

        assert_eq!(sender.emit_frame(&params), Emission::Sent(2));
        assert_eq!(sender.emit_frame(&params), Emission::Throttled);

        let first = recv_message(&rx);
        let second = recv_message(&rx);
        assert_eq!(first.addr, "/avatar/parameters/MouthOpen");
        assert_eq!(first.args, vec![OscType::Float(0.5)]);
        assert_eq!(second.addr, "/avatar/parameters/LeftEyeBlink");
        assert!(no_more_messages(&rx));

        let stats = sender.stats();
        assert_eq!(stats.batches, 1);
        assert_eq!(stats.throttled, 1);
    }

    #[test]
    fn test_spaced_emissions_both_send() {
        let rx = receiver();
        let mut sender = sender_for(&rx, 200.0, false);

        let mut params = ParameterMap::new();
        params.set(Parameter::MouthSmile, 0.8);

        assert!(sender.emit_frame(&params).is_sent());
        std::thread::sleep(Duration::from_millis(10));
        assert!(sender.emit_frame(&params).is_sent());

        recv_message(&rx);
        recv_message(&rx);
    }

    #[test]
    fn test_custom_parameter_ignores_gate() {
        let rx = receiver();
        let mut sender = sender_for(&rx, 1.0, false);
        let params = ParameterMap::with_defaults(&[Parameter::MouthOpen]);

        assert!(sender.emit_frame(&params).is_sent());
        assert!(sender.send_custom_parameter("Extra", 0.1));
        assert!(sender.send_custom_parameter("Extra", 0.2));
    }

    #[test]
    fn test_emit_parameters_uses_given_prefix() {
        let rx = receiver();
        let mut sender = sender_for(&rx, 60.0, false);
        let mut params = ParameterMap::new();
        params.set(Parameter::LeftArmRaise, 0.4);

        assert_eq!(sender.emit_parameters(&params, "/custom/"), Emission::Sent(1));
        assert_eq!(recv_message(&rx).addr, "/custom/LeftArmRaise");
    }

    #[test]
    fn test_tracker_batch() {
        let rx = receiver();
        let mut sender = sender_for(&rx, 60.0, false);

        let mut face = ParameterMap::new();
        face.set(Parameter::HeadTurnRight, 0.6);
        face.set(Parameter::HeadTiltDown, 0.2);
        let body = [[1.0, 2.0, 3.0]];

        assert_eq!(sender.emit_tracking(&face, Some(&body)), Emission::Sent(18));

        let head = recv_message(&rx);
        assert_eq!(head.addr, "/tracking/trackers/head/position");
        assert_eq!(
            head.args,
            vec![OscType::Float(0.6), OscType::Float(-0.2), OscType::Float(0.0)]
        );
        let rotation = recv_message(&rx);
        assert_eq!(rotation.addr, "/tracking/trackers/head/rotation");
        assert_eq!(rotation.args, vec![OscType::Float(0.0); 3]);

        let first = recv_message(&rx);
        assert_eq!(first.addr, "/tracking/trackers/1/position");
        assert_eq!(
            first.args,
            vec![OscType::Float(1.0), OscType::Float(2.0), OscType::Float(3.0)]
        );
        assert_eq!(recv_message(&rx).addr, "/tracking/trackers/1/rotation");

        let second = recv_message(&rx);
        assert_eq!(second.addr, "/tracking/trackers/2/position");
        assert_eq!(second.args, vec![OscType::Float(0.0); 3]);
    }

    #[test]
    fn test_frame_with_trackers() {
        let rx = receiver();
        let mut sender = sender_for(&rx, 60.0, true);
        let params = ParameterMap::with_defaults(&[Parameter::MouthOpen]);

        assert_eq!(sender.emit_frame(&params), Emission::Sent(19));
        assert_eq!(recv_message(&rx).addr, "/avatar/parameters/MouthOpen");
        assert_eq!(recv_message(&rx).addr, "/tracking/trackers/head/position");
    }
}
