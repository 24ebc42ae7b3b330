//! Frame sources.

use std::path::{Path, PathBuf};
use thiserror::Error;
use watchpost_core::Frame;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("source not found: {0}")]
    NotFound(String),
    #[error("failed to read {path}: {reason}")]
    ReadFailed { path: PathBuf, reason: String },
}

/// Anything that yields grayscale frames in order.
///
/// `Ok(None)` means the source is exhausted.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;
}

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "pgm"];

/// Plays the images in a directory as frames, in file-name order.
pub struct ImageDirSource {
    files: Vec<PathBuf>,
    position: usize,
    /// Start over when the last image has been read.
    looping: bool,
    sequence: u64,
}

impl ImageDirSource {
    pub fn open(dir: &Path) -> Result<Self, SourceError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| SourceError::NotFound(format!("{}: {e}", dir.display())))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && has_image_extension(path))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(SourceError::NotFound(format!(
                "{}: no images",
                dir.display()
            )));
        }

        tracing::info!(dir = %dir.display(), images = files.len(), "opened image directory");

        Ok(Self {
            files,
            position: 0,
            looping: false,
            sequence: 0,
        })
    }

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
}

impl FrameSource for ImageDirSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        if self.position >= self.files.len() {
            if !self.looping {
                return Ok(None);
            }
            self.position = 0;
        }

        let path = &self.files[self.position];
        self.position += 1;

        let gray = image::open(path)
            .map_err(|e| SourceError::ReadFailed {
                path: path.clone(),
                reason: e.to_string(),
            })?
            .to_luma8();
        let (width, height) = gray.dimensions();

        self.sequence += 1;
        Ok(Some(Frame::new(gray.into_raw(), width, height, self.sequence)))
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Emits `count` uniform frames of the given size. Used for dry runs where
/// the provider ignores pixel content.
pub struct BlankSource {
    width: u32,
    height: u32,
    brightness: u8,
    remaining: u64,
    sequence: u64,
}

impl BlankSource {
    pub fn new(width: u32, height: u32, count: u64) -> Self {
        Self {
            width,
            height,
            brightness: 128,
            remaining: count,
            sequence: 0,
        }
    }

    pub fn brightness(mut self, brightness: u8) -> Self {
        self.brightness = brightness;
        self
    }
}

impl FrameSource for BlankSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        self.sequence += 1;
        let pixels = (self.width * self.height) as usize;
        Ok(Some(Frame::new(
            vec![self.brightness; pixels],
            self.width,
            self.height,
            self.sequence,
        )))
    }
}
