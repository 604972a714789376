//! Still images from a directory, played back in file name order

use std::path::{Path, PathBuf};

use crate::error::SourceError;
use crate::frame::Frame;
use crate::source::FrameSource;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Plays back the images of one directory
pub struct ImageSequenceSource {
    dir: PathBuf,
    looping: bool,
    files: Vec<PathBuf>,
    position: usize,
    produced: u64,
    open: bool,
}

impl ImageSequenceSource {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            looping: false,
            files: Vec::new(),
            position: 0,
            produced: 0,
            open: false,
        }
    }

    /// Restart from the first image after the last one
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn open_error(&self, message: String) -> SourceError {
        SourceError::Open {
            source_name: self.describe(),
            message,
        }
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for ImageSequenceSource {
    fn describe(&self) -> String {
        format!("image sequence {}", self.dir.display())
    }

    fn open(&mut self) -> Result<(), SourceError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| self.open_error(e.to_string()))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_image(path))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(self.open_error("no images found".to_string()));
        }

        tracing::info!("Opened {} ({} images)", self.describe(), files.len());
        self.files = files;
        self.position = 0;
        self.produced = 0;
        self.open = true;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        if !self.open {
            return Err(SourceError::NotOpen(self.describe()));
        }

        if self.position >= self.files.len() {
            if !self.looping {
                return Err(SourceError::Exhausted(self.describe()));
            }
            self.position = 0;
        }

        let path = &self.files[self.position];
        self.position += 1;

        let image = match image::open(path) {
            Ok(image) => image.to_rgb8(),
            Err(e) => {
                tracing::warn!("Skipping unreadable image {}: {}", path.display(), e);
                return Ok(None);
            }
        };

        match Frame::from_image(image) {
            Ok(frame) => {
                let index = self.produced;
                self.produced += 1;
                Ok(Some(frame.with_index(index)))
            }
            Err(e) => {
                tracing::warn!("Skipping {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    fn release(&mut self) {
        self.open = false;
        self.files.clear();
        self.position = 0;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_png(dir: &Path, name: &str, color: [u8; 3]) {
        RgbImage::from_pixel(12, 10, Rgb(color))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn test_plays_images_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "b.png", [0, 255, 0]);
        write_png(dir.path(), "a.png", [255, 0, 0]);
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut source = ImageSequenceSource::new(dir.path());
        source.open().unwrap();
        assert_eq!(source.len(), 2);

        let first = source.read_frame().unwrap().unwrap();
        assert_eq!(first.rgb().get_pixel(0, 0).0, [255, 0, 0]);
        let second = source.read_frame().unwrap().unwrap();
        assert_eq!(second.rgb().get_pixel(0, 0).0, [0, 255, 0]);
        assert_eq!(second.index(), 1);

        assert!(matches!(source.read_frame(), Err(SourceError::Exhausted(_))));
    }

    #[test]
    fn test_looping_restarts() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "only.png", [9, 9, 9]);

        let mut source = ImageSequenceSource::new(dir.path()).looping(true);
        source.open().unwrap();
        for _ in 0..3 {
            assert!(source.read_frame().unwrap().is_some());
        }
    }

    #[test]
    fn test_corrupt_image_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.png"), b"not a png").unwrap();

        let mut source = ImageSequenceSource::new(dir.path());
        source.open().unwrap();
        assert!(source.read_frame().unwrap().is_none());
    }

    #[test]
    fn test_empty_directory_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = ImageSequenceSource::new(dir.path());
        assert!(matches!(source.open(), Err(SourceError::Open { .. })));
    }

    #[test]
    fn test_missing_directory_fails_to_open() {
        let mut source = ImageSequenceSource::new("/nonexistent/frames");
        assert!(source.open().is_err());
        assert!(!source.is_open());
    }
}
