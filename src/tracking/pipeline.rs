//! Tracking loop
//!
//! Pulls frames from a source, runs the face and hand extractors, smooths
//! the merged parameters and hands them to the OSC sender, paced to a
//! target frame rate.
//!
//! The loop is driven from a single thread. Other threads talk to it only
//! through a [`TrackerHandle`]: a cooperative stop flag, a command queue
//! that is drained once per iteration, and a snapshot of the latest
//! parameters.

use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::config::Config;
use crate::error::{SourceError, TrackingError, VrcamError};
use crate::frame::Frame;
use crate::output::osc::{Emission, OscSender};
use crate::source::{self, FrameSource};
use crate::tracking::face::FaceExtractor;
use crate::tracking::hand::HandExtractor;
use crate::tracking::params::ParameterMap;
use crate::tracking::smoothing::ParameterSmoother;
use crate::tracking::FeatureExtractor;

/// Lifecycle of the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopState {
    #[default]
    Idle,
    Running,
    Stopping,
}

/// Latest loop output, published once per processed frame
#[derive(Debug, Clone, Default)]
pub struct TrackingSnapshot {
    pub state: LoopState,
    /// Smoothed parameters of the last processed frame
    pub parameters: ParameterMap,
    pub frames: u64,
    pub fps: f32,
    pub last_emission: Option<Emission>,
}

/// Replacement output stage, swapped in between two iterations
pub struct Reconfiguration {
    pub sender: OscSender,
    pub smoother: ParameterSmoother,
}

impl Reconfiguration {
    /// Build a new sender and smoother from configuration
    pub fn from_config(config: &Config) -> Result<Self, VrcamError> {
        config.validate()?;
        Ok(Self {
            sender: OscSender::connect(&config.osc)?,
            smoother: ParameterSmoother::new(config.tracking.smoothing_factor)?,
        })
    }
}

/// Requests handled at the start of an iteration
pub enum LoopCommand {
    Reconfigure(Box<Reconfiguration>),
    ResetSmoothing,
}

/// Called with every emitted frame
pub trait FrameObserver: Send {
    fn on_frame(&mut self, parameters: &ParameterMap, emission: Emission);
}

/// Frames per second over one-second windows
#[derive(Debug, Clone)]
pub struct FpsCounter {
    window_start: Instant,
    frames: u32,
    fps: f32,
}

impl FpsCounter {
    pub fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            frames: 0,
            fps: 0.0,
        }
    }

    /// Count a frame; returns the new rate when a window closes
    pub fn tick(&mut self, now: Instant) -> Option<f32> {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < Duration::from_secs(1) {
            return None;
        }

        self.fps = self.frames as f32 / elapsed.as_secs_f32();
        self.frames = 0;
        self.window_start = now;
        Some(self.fps)
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }
}

/// Control surface for a loop running on another thread
#[derive(Clone)]
pub struct TrackerHandle {
    stop: Arc<AtomicBool>,
    commands: Sender<LoopCommand>,
    snapshot: watch::Receiver<TrackingSnapshot>,
}

impl TrackerHandle {
    /// Ask the loop to stop after the current iteration
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Queue a new sender and smoother; false if the loop is gone
    pub fn reconfigure(&self, reconfiguration: Reconfiguration) -> bool {
        self.commands
            .send(LoopCommand::Reconfigure(Box::new(reconfiguration)))
            .is_ok()
    }

    /// Queue a smoother reset; false if the loop is gone
    pub fn reset_smoothing(&self) -> bool {
        self.commands.send(LoopCommand::ResetSmoothing).is_ok()
    }

    pub fn snapshot(&self) -> TrackingSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver for awaiting snapshot changes
    pub fn subscribe(&self) -> watch::Receiver<TrackingSnapshot> {
        self.snapshot.clone()
    }
}

/// The frame loop
pub struct TrackingLoop {
    source: Box<dyn FrameSource>,
    face: Box<dyn FeatureExtractor>,
    hand: Box<dyn FeatureExtractor>,
    smoother: ParameterSmoother,
    sender: OscSender,
    frame_interval: Duration,
    state: LoopState,
    frames: u64,
    fps: FpsCounter,
    stop: Arc<AtomicBool>,
    command_tx: Sender<LoopCommand>,
    command_rx: Receiver<LoopCommand>,
    snapshot: watch::Sender<TrackingSnapshot>,
    observers: Vec<Box<dyn FrameObserver>>,
}

impl TrackingLoop {
    pub fn new(
        source: Box<dyn FrameSource>,
        face: Box<dyn FeatureExtractor>,
        hand: Box<dyn FeatureExtractor>,
        smoother: ParameterSmoother,
        sender: OscSender,
        frame_interval: Duration,
    ) -> Self {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (snapshot, _) = watch::channel(TrackingSnapshot::default());

        Self {
            source,
            face,
            hand,
            smoother,
            sender,
            frame_interval,
            state: LoopState::Idle,
            frames: 0,
            fps: FpsCounter::new(Instant::now()),
            stop: Arc::new(AtomicBool::new(false)),
            command_tx,
            command_rx,
            snapshot,
            observers: Vec::new(),
        }
    }

    /// Build every stage from configuration. Model, socket and source
    /// construction errors surface here, before the loop starts.
    pub fn from_config(config: &Config) -> Result<Self, VrcamError> {
        config.validate()?;

        let face = FaceExtractor::from_config(&config.tracking)?;
        tracing::info!(
            "Face extractor ready (head pose {})",
            if face.head_pose_enabled() { "on" } else { "off" }
        );
        let hand = HandExtractor::new(config.tracking.motion_threshold);
        tracing::info!(
            "Hand extractor ready (motion threshold {})",
            hand.motion_threshold()
        );
        let smoother = ParameterSmoother::new(config.tracking.smoothing_factor)?;
        let sender = OscSender::connect(&config.osc)?;
        let source = source::from_config(config)?;

        Ok(Self::new(
            source,
            Box::new(face),
            Box::new(hand),
            smoother,
            sender,
            config.camera.frame_interval(),
        ))
    }

    pub fn add_observer(&mut self, observer: Box<dyn FrameObserver>) {
        self.observers.push(observer);
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn handle(&self) -> TrackerHandle {
        TrackerHandle {
            stop: Arc::clone(&self.stop),
            commands: self.command_tx.clone(),
            snapshot: self.snapshot.subscribe(),
        }
    }

    /// Idle -> Running. On failure the loop stays idle.
    pub fn start(&mut self) -> Result<(), VrcamError> {
        if self.state != LoopState::Idle {
            return Err(TrackingError::AlreadyRunning.into());
        }

        if let Err(e) = self.source.open() {
            tracing::error!("Failed to open {}: {}", self.source.describe(), e);
            return Err(e.into());
        }

        self.set_state(LoopState::Running);
        self.fps = FpsCounter::new(Instant::now());
        tracing::info!("Tracking started on {}", self.source.describe());
        Ok(())
    }

    /// Run until stopped or the source fails, then release the source.
    /// Returns the number of frames processed in this run.
    pub fn run(&mut self) -> Result<u64, VrcamError> {
        if self.state == LoopState::Idle {
            self.start()?;
        }

        let first_frame = self.frames;
        let mut result = Ok(());

        while !self.stop.load(Ordering::SeqCst) {
            let iteration_start = Instant::now();
            self.drain_commands();

            match self.source.read_frame() {
                Ok(Some(frame)) => {
                    self.process_frame(&frame);
                }
                Ok(None) => {
                    tracing::debug!("No frame from {}, retrying", self.source.describe());
                }
                Err(SourceError::Exhausted(name)) => {
                    tracing::info!("{} has no more frames", name);
                    break;
                }
                Err(e) => {
                    tracing::error!("Frame source failed: {}", e);
                    result = Err(e.into());
                    break;
                }
            }

            let elapsed = iteration_start.elapsed();
            if elapsed < self.frame_interval {
                std::thread::sleep(self.frame_interval - elapsed);
            }
        }

        self.shutdown();
        result.map(|_| self.frames - first_frame)
    }

    /// Running -> Stopping -> Idle, releasing the source
    fn shutdown(&mut self) {
        self.set_state(LoopState::Stopping);
        self.source.release();
        // a stop request ends one run only
        self.stop.store(false, Ordering::SeqCst);
        self.set_state(LoopState::Idle);
        tracing::info!(
            "Tracking stopped after {} frames ({} OSC batches)",
            self.frames,
            self.sender.stats().batches
        );
    }

    /// Extract, smooth and emit one frame. Returns `None` when the frame
    /// had to be dropped.
    pub fn process_frame(&mut self, frame: &Frame) -> Option<(ParameterMap, Emission)> {
        let face = run_extractor(self.face.as_mut(), frame)?;
        let hand = run_extractor(self.hand.as_mut(), frame)?;

        let (smoothed, emission) = self.smooth_and_emit(&face, &hand);

        self.frames += 1;
        if let Some(fps) = self.fps.tick(Instant::now()) {
            tracing::debug!("Tracking at {:.1} fps", fps);
        }

        for observer in &mut self.observers {
            observer.on_frame(&smoothed, emission);
        }

        self.publish(Some(&smoothed), Some(emission));
        Some((smoothed, emission))
    }

    /// Merge the two maps, smooth every key and emit one batch
    pub fn smooth_and_emit(
        &mut self,
        face: &ParameterMap,
        hand: &ParameterMap,
    ) -> (ParameterMap, Emission) {
        let mut combined = face.clone();
        combined.merge(hand);

        let smoothed = self.smoother.smooth_parameters(&combined);
        let emission = self.sender.emit_frame(&smoothed);
        (smoothed, emission)
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.command_rx.try_recv() {
            match command {
                LoopCommand::Reconfigure(reconfiguration) => {
                    let Reconfiguration { sender, smoother } = *reconfiguration;
                    tracing::info!(
                        "Reconfigured: OSC target {}, trackers {}, smoothing factor {}",
                        sender.target(),
                        if sender.sends_trackers() { "on" } else { "off" },
                        smoother.factor()
                    );
                    self.sender = sender;
                    self.smoother = smoother;
                }
                LoopCommand::ResetSmoothing => {
                    self.smoother.reset();
                    tracing::info!("Smoothing state reset");
                }
            }
        }
    }

    fn set_state(&mut self, state: LoopState) {
        self.state = state;
        self.publish(None, None);
    }

    fn publish(&self, parameters: Option<&ParameterMap>, emission: Option<Emission>) {
        let state = self.state;
        let frames = self.frames;
        let fps = self.fps.fps();
        self.snapshot.send_modify(|snapshot| {
            snapshot.state = state;
            snapshot.frames = frames;
            snapshot.fps = fps;
            if let Some(parameters) = parameters {
                snapshot.parameters = parameters.clone();
            }
            if emission.is_some() {
                snapshot.last_emission = emission;
            }
        });
    }
}

/// Run one extractor; frames it rejects are dropped and its state reset
fn run_extractor(extractor: &mut dyn FeatureExtractor, frame: &Frame) -> Option<ParameterMap> {
    match extractor.extract(frame) {
        Ok(params) => Some(params),
        Err(e) => {
            tracing::warn!(
                "Dropping frame {} ({} extractor): {}",
                frame.index(),
                extractor.name(),
                e
            );
            extractor.reset();
            None
        }
    }
}
