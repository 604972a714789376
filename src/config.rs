//! Configuration parsing and management for vrcam

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, VrcamError};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub osc: OscConfig,
    pub camera: CameraConfig,
    pub source: SourceConfig,
    pub tracking: TrackingConfig,
    /// Verbose parameter logging
    pub debug: bool,
    /// Show the video preview when a renderer is attached
    pub display: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            osc: OscConfig::default(),
            camera: CameraConfig::default(),
            source: SourceConfig::default(),
            tracking: TrackingConfig::default(),
            debug: false,
            display: true,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, VrcamError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigError::ReadFile(format!("{}: {}", path.as_ref().display(), e))
        })?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, VrcamError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()).into())
    }

    /// Load configuration from default paths
    pub fn load() -> Result<Self, VrcamError> {
        let paths = [
            PathBuf::from("vrcam.toml"),
            PathBuf::from("config/vrcam.toml"),
            dirs_path().join("config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), VrcamError> {
        if self.osc.target_ip.parse::<IpAddr>().is_err() {
            return Err(ConfigError::invalid(
                "osc.target_ip",
                format!("'{}' is not an IP address", self.osc.target_ip),
            )
            .into());
        }

        if self.osc.target_port == 0 {
            return Err(
                ConfigError::invalid("osc.target_port", "Port must be greater than 0").into(),
            );
        }

        if !self.osc.address_prefix.starts_with('/') {
            return Err(ConfigError::invalid(
                "osc.address_prefix",
                "OSC addresses must start with '/'",
            )
            .into());
        }

        if !(self.osc.send_rate_hz.is_finite() && self.osc.send_rate_hz > 0.0) {
            return Err(ConfigError::invalid(
                "osc.send_rate_hz",
                "Emission rate must be a positive number",
            )
            .into());
        }

        if self.camera.fps == 0 {
            return Err(
                ConfigError::invalid("camera.fps", "Frame rate must be greater than 0").into(),
            );
        }

        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::invalid(
                "camera.width/height",
                "Frame dimensions must be greater than 0",
            )
            .into());
        }

        let factor = self.tracking.smoothing_factor;
        if !(factor > 0.0 && factor < 1.0) {
            return Err(ConfigError::invalid(
                "tracking.smoothing_factor",
                "Smoothing factor must be strictly between 0.0 and 1.0",
            )
            .into());
        }

        if !(0.0..=1.0).contains(&self.tracking.motion_threshold) {
            return Err(ConfigError::invalid(
                "tracking.motion_threshold",
                "Threshold must be between 0.0 and 1.0",
            )
            .into());
        }

        if self.source.kind == SourceKind::Sequence && self.source.path.is_none() {
            return Err(ConfigError::invalid(
                "source.path",
                "An image sequence source needs a directory path",
            )
            .into());
        }

        Ok(())
    }
}

/// OSC output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OscConfig {
    /// Address of the machine running the avatar client
    pub target_ip: String,
    /// OSC input port of the avatar client
    pub target_port: u16,
    /// Namespace prepended to every parameter name
    pub address_prefix: String,
    /// Maximum emission rate in Hz
    pub send_rate_hz: f64,
    /// Also emit the positional tracker batch
    pub send_trackers: bool,
}

impl OscConfig {
    /// Minimum spacing between two emissions
    pub fn send_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.send_rate_hz)
    }
}

impl Default for OscConfig {
    fn default() -> Self {
        Self {
            target_ip: "127.0.0.1".to_string(),
            target_port: 9000,
            address_prefix: "/avatar/parameters".to_string(),
            send_rate_hz: 60.0,
            send_trackers: false,
        }
    }
}

/// Camera capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Camera device index
    pub index: u32,
    /// Requested capture width
    pub width: u32,
    /// Requested capture height
    pub height: u32,
    /// Target loop rate in frames per second
    pub fps: u32,
}

impl CameraConfig {
    /// Duration of one loop iteration at the target rate
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

/// Where frames come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Local capture device
    #[default]
    Camera,
    /// Directory of still images
    Sequence,
    /// Generated frames
    Synthetic,
}

/// Frame source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Image directory for the sequence source
    pub path: Option<PathBuf>,
    /// Restart the sequence after the last image
    pub looping: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Camera,
            path: None,
            looping: true,
        }
    }
}

/// Feature extraction and smoothing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Weight of the previous value in the per-parameter moving average
    pub smoothing_factor: f32,
    /// Emit head turn/tilt parameters
    pub head_pose: bool,
    /// Directory holding the Haar cascade files
    pub cascade_dir: PathBuf,
    pub face_cascade: String,
    pub eye_cascade: String,
    pub smile_cascade: String,
    /// Motion density above which a hand counts as open
    pub motion_threshold: f32,
}

impl TrackingConfig {
    pub fn face_cascade_path(&self) -> PathBuf {
        self.cascade_dir.join(&self.face_cascade)
    }

    pub fn eye_cascade_path(&self) -> PathBuf {
        self.cascade_dir.join(&self.eye_cascade)
    }

    pub fn smile_cascade_path(&self) -> PathBuf {
        self.cascade_dir.join(&self.smile_cascade)
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            smoothing_factor: 0.8,
            head_pose: true,
            cascade_dir: PathBuf::from("/usr/share/opencv4/haarcascades"),
            face_cascade: "haarcascade_frontalface_default.xml".to_string(),
            eye_cascade: "haarcascade_eye.xml".to_string(),
            smile_cascade: "haarcascade_smile.xml".to_string(),
            motion_threshold: 0.01,
        }
    }
}

/// Get the platform-specific configuration directory
fn dirs_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        if let Some(config_dir) = std::env::var_os("XDG_CONFIG_HOME") {
            return PathBuf::from(config_dir).join("vrcam");
        }
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(".config/vrcam");
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join("Library/Application Support/vrcam");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("vrcam");
        }
    }

    PathBuf::from(".")
}
