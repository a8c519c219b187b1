//! Frame sources.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use image::RgbImage;
use tracing::debug;

use crate::error::{Error, Result};
use crate::frame::SourceId;

/// Produces raw frames on demand.
pub trait FrameSource: Send + 'static {
    /// `Ok(Some)` is a frame, `Ok(None)` the end of the stream. An error is a
    /// failed read; the caller may try again.
    fn next(&mut self) -> Result<Option<RgbImage>>;

    /// Release the underlying capture. Called once, after reading stopped.
    fn close(&mut self) {}
}

/// Opens a frame source for a registered `host:port` endpoint.
pub trait SourceFactory: Send + Sync + 'static {
    fn open(&self, host: &str, port: u16) -> Result<(SourceId, Box<dyn FrameSource>)>;
}

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "ppm"];

/// Plays the images of a directory in file-name order, once.
#[derive(Debug)]
pub struct ImageDirSource {
    dir: PathBuf,
    files: VecDeque<PathBuf>,
}

impl ImageDirSource {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            })
            .collect();
        if files.is_empty() {
            return Err(Error::Source(format!("no images in {}", dir.display())));
        }
        files.sort();
        debug!(dir = %dir.display(), frames = files.len(), "opened image directory");
        Ok(Self {
            dir: dir.to_path_buf(),
            files: files.into(),
        })
    }

    pub fn remaining(&self) -> usize {
        self.files.len()
    }
}

impl FrameSource for ImageDirSource {
    fn next(&mut self) -> Result<Option<RgbImage>> {
        let Some(path) = self.files.pop_front() else {
            return Ok(None);
        };
        let image = image::open(&path)?;
        Ok(Some(image.to_rgb8()))
    }

    fn close(&mut self) {
        debug!(dir = %self.dir.display(), skipped = self.files.len(), "closing image directory");
        self.files.clear();
    }
}

/// Serves every registered endpoint from the same image directory. The
/// source id follows the endpoint's stream URL.
#[derive(Debug, Clone)]
pub struct DirSourceFactory {
    dir: PathBuf,
}

impl DirSourceFactory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl SourceFactory for DirSourceFactory {
    fn open(&self, host: &str, port: u16) -> Result<(SourceId, Box<dyn FrameSource>)> {
        let source = ImageDirSource::open(&self.dir)?;
        Ok((stream_url(host, port), Box::new(source)))
    }
}

pub fn stream_url(host: &str, port: u16) -> SourceId {
    format!("rtsp://{host}:{port}/stream")
}
