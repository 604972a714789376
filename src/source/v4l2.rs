//! V4L2 camera source.
//!
//! Opens `/dev/video<index>`, asks for RGB3 at the configured size and
//! rate, and falls back to converting YUYV when the driver refuses RGB.

use ouroboros::self_referencing;
use std::io;
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::FourCC;

use crate::config::CameraConfig;
use crate::error::SourceError;
use crate::frame::Frame;
use crate::source::FrameSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelLayout {
    Rgb3,
    Yuyv,
}

/// Transient dequeue failures tolerated in a row before the device is
/// treated as lost
const MAX_CONSECUTIVE_MISSES: u32 = 30;

#[self_referencing]
struct CameraState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

/// Local capture device
pub struct V4l2Camera {
    config: CameraConfig,
    state: Option<CameraState>,
    layout: PixelLayout,
    active_width: u32,
    active_height: u32,
    frame_count: u64,
    missed: u32,
}

impl V4l2Camera {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            config: config.clone(),
            state: None,
            layout: PixelLayout::Rgb3,
            active_width: config.width,
            active_height: config.height,
            frame_count: 0,
            missed: 0,
        }
    }

    fn device_path(&self) -> String {
        format!("/dev/video{}", self.config.index)
    }

    fn device_error(&self, message: impl std::fmt::Display) -> SourceError {
        SourceError::Device {
            source_name: self.describe(),
            message: message.to_string(),
        }
    }
}

impl FrameSource for V4l2Camera {
    fn describe(&self) -> String {
        format!("camera {}", self.device_path())
    }

    fn open(&mut self) -> Result<(), SourceError> {
        let open_error = |message: String| SourceError::Open {
            source_name: format!("camera /dev/video{}", self.config.index),
            message,
        };

        let device = v4l::Device::new(self.config.index as usize)
            .map_err(|e| open_error(format!("open device: {}", e)))?;
        let mut format = device
            .format()
            .map_err(|e| open_error(format!("read format: {}", e)))?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(e) => {
                tracing::warn!("Failed to set RGB3 format on {}: {}", self.device_path(), e);
                device
                    .format()
                    .map_err(|e| open_error(format!("read format: {}", e)))?
            }
        };

        let layout = if format.fourcc == FourCC::new(b"RGB3") {
            PixelLayout::Rgb3
        } else if format.fourcc == FourCC::new(b"YUYV") {
            PixelLayout::Yuyv
        } else {
            return Err(open_error(format!("unsupported pixel format {}", format.fourcc)));
        };

        let params = v4l::video::capture::Parameters::with_fps(self.config.fps);
        if let Err(e) = device.set_params(&params) {
            tracing::warn!(
                "Failed to set {} fps on {}: {}",
                self.config.fps,
                self.device_path(),
                e
            );
        }

        let state = CameraStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
            },
        }
        .try_build()
        .map_err(|e| open_error(format!("create buffer stream: {}", e)))?;

        self.layout = layout;
        self.active_width = format.width;
        self.active_height = format.height;
        self.frame_count = 0;
        self.missed = 0;
        self.state = Some(state);

        tracing::info!(
            "Opened {} ({}x{}, {:?})",
            self.describe(),
            self.active_width,
            self.active_height,
            self.layout
        );
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let (width, height, layout) = (self.active_width, self.active_height, self.layout);
        let state = match self.state.as_mut() {
            Some(state) => state,
            None => return Err(SourceError::NotOpen(self.describe())),
        };

        let data = state.with_mut(|fields| match fields.stream.next() {
            Ok((buf, meta)) => {
                let used = (meta.bytesused as usize).min(buf.len());
                let used = if used == 0 { buf.len() } else { used };
                Ok(buf[..used].to_vec())
            }
            Err(e) => Err(e),
        });
        let data = match data {
            Ok(data) => {
                self.missed = 0;
                data
            }
            Err(e) if is_transient(e.kind()) && self.missed < MAX_CONSECUTIVE_MISSES => {
                self.missed += 1;
                tracing::debug!(
                    "Capture on {} did not complete ({}), retrying",
                    self.describe(),
                    e
                );
                return Ok(None);
            }
            Err(e) => return Err(self.device_error(format!("capture frame: {}", e))),
        };

        let rgb = match layout {
            PixelLayout::Rgb3 => {
                let expected = width as usize * height as usize * 3;
                if data.len() < expected {
                    tracing::debug!("Short frame ({} of {} bytes), skipping", data.len(), expected);
                    return Ok(None);
                }
                data[..expected].to_vec()
            }
            PixelLayout::Yuyv => match yuyv_to_rgb(&data, width, height) {
                Some(rgb) => rgb,
                None => {
                    tracing::debug!("Short YUYV frame ({} bytes), skipping", data.len());
                    return Ok(None);
                }
            },
        };

        let frame = Frame::from_raw(width, height, 3, rgb).map_err(|e| self.device_error(e))?;
        let index = self.frame_count;
        self.frame_count += 1;
        Ok(Some(frame.with_index(index)))
    }

    fn release(&mut self) {
        if self.state.take().is_some() {
            tracing::info!("Released {}", self.describe());
        }
    }

    fn is_open(&self) -> bool {
        self.state.is_some()
    }
}

/// Dequeue errors worth retrying on the next iteration
fn is_transient(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Convert packed YUYV 4:2:2 to RGB8 (BT.601)
fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Option<Vec<u8>> {
    let pixels = width as usize * height as usize;
    if pixels % 2 != 0 || data.len() < pixels * 2 {
        return None;
    }

    let mut rgb = Vec::with_capacity(pixels * 3);
    for chunk in data[..pixels * 2].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0] as f32, chunk[2] as f32] {
            let r = y + 1.402 * v;
            let g = y - 0.344 * u - 0.714 * v;
            let b = y + 1.772 * u;
            rgb.push(r.clamp(0.0, 255.0) as u8);
            rgb.push(g.clamp(0.0, 255.0) as u8);
            rgb.push(b.clamp(0.0, 255.0) as u8);
        }
    }
    Some(rgb)
}
