use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use opencv::{
    core::{self, Mat},
    prelude::*,
    videoio,
};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Sequential decoded-frame iterator.
pub trait FrameSource {
    fn fps(&self) -> f64;

    /// Next frame in presentation order, `None` at the end of the stream.
    fn read(&mut self) -> Result<Option<Mat>>;
}

/// Ordered frame consumer.
pub trait FrameSink {
    fn write(&mut self, frame: &Mat) -> Result<()>;
}

impl FrameSink for Vec<Mat> {
    #[inline]
    fn write(&mut self, frame: &Mat) -> Result<()> {
        self.push(frame.try_clone()?);
        Ok(())
    }
}

pub struct VideoReader {
    cap: videoio::VideoCapture,
    fps: f64,
}

impl VideoReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let name = path.to_string_lossy();

        let cap = videoio::VideoCapture::from_file(&name, videoio::CAP_ANY)?;
        if !cap.is_opened()? {
            return Err(Error::VideoOpen(path.to_path_buf()));
        }

        let fps = cap.get(videoio::CAP_PROP_FPS)?;
        let width = cap.get(videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        let height = cap.get(videoio::CAP_PROP_FRAME_HEIGHT)? as i32;
        let frame_count = cap.get(videoio::CAP_PROP_FRAME_COUNT)? as i64;

        debug!(path = %name, fps, width, height, frame_count, "Video opened");

        Ok(Self { cap, fps })
    }
}

impl FrameSource for VideoReader {
    #[inline]
    fn fps(&self) -> f64 {
        self.fps
    }

    fn read(&mut self) -> Result<Option<Mat>> {
        let mut frame = Mat::default();
        if !self.cap.read(&mut frame)? || frame.empty() {
            return Ok(None);
        }

        Ok(Some(frame))
    }
}

/// In-memory frames, for already decoded clips.
pub struct MemorySource {
    fps: f64,
    frames: VecDeque<Mat>,
}

impl MemorySource {
    pub fn new(fps: f64, frames: Vec<Mat>) -> Self {
        Self {
            fps,
            frames: frames.into(),
        }
    }
}

impl FrameSource for MemorySource {
    #[inline]
    fn fps(&self) -> f64 {
        self.fps
    }

    #[inline]
    fn read(&mut self) -> Result<Option<Mat>> {
        Ok(self.frames.pop_front())
    }
}

/// Encodes frames to a file, opening the underlying writer lazily at the first
/// frame's size. Every later frame must have that size.
pub struct VideoWriter {
    writer: Option<videoio::VideoWriter>,
    size: Option<(i32, i32)>,
    fps: f64,
    out_file: PathBuf,
    written: usize,
}

impl VideoWriter {
    pub fn new<P: Into<PathBuf>>(out_file: P, fps: f64) -> Self {
        Self {
            writer: None,
            size: None,
            fps,
            out_file: out_file.into(),
            written: 0,
        }
    }

    fn release(&mut self) -> Result<()> {
        if let Some(mut w) = self.writer.take() {
            w.release()?;
        }

        Ok(())
    }

    fn open(&mut self, size: (i32, i32)) -> Result<videoio::VideoWriter> {
        let writer = videoio::VideoWriter::new(
            &self.out_file.to_string_lossy(),
            videoio::VideoWriter::fourcc(b'm' as _, b'p' as _, b'4' as _, b'v' as _)?,
            self.fps,
            core::Size::new(size.0, size.1),
            true,
        )?;

        if !writer.is_opened()? {
            return Err(Error::VideoOpen(self.out_file.clone()));
        }

        debug!(path = %self.out_file.display(), ?size, fps = self.fps, "Video writer opened");

        Ok(writer)
    }

    /// Flushes and closes the file.
    pub fn finish(mut self) -> Result<usize> {
        self.release()?;
        Ok(self.written)
    }
}

impl FrameSink for VideoWriter {
    fn write(&mut self, frame: &Mat) -> Result<()> {
        let size = (frame.cols(), frame.rows());

        match self.size {
            Some(expected) if expected != size => {
                return Err(Error::FrameSize {
                    expected,
                    got: size,
                })
            }
            Some(_) => {}
            None => {
                let writer = self.open(size)?;
                self.writer = Some(writer);
                self.size = Some(size);
            }
        }

        if let Some(writer) = self.writer.as_mut() {
            writer.write(frame)?;
            self.written += 1;
        }

        Ok(())
    }
}

impl Drop for VideoWriter {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!(%err, path = %self.out_file.display(), "Failed to close video writer");
        }
    }
}
