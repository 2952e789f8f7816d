use std::path::PathBuf;

use thiserror::Error;

use crate::frame::TrackId;
use crate::session::SessionId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum AlignmentError {
    #[error("video has {video} frames, box stream has {boxes}")]
    FrameCount { video: usize, boxes: usize },

    #[error("video runs at {video} fps, box stream at {boxes} fps")]
    FrameRate { video: f64, boxes: f64 },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Alignment Error: {0}")]
    Alignment(#[from] AlignmentError),

    #[error("Parameter Coverage Error: missing ids {missing:?}, unexpected ids {unexpected:?}")]
    ParameterCoverage {
        missing: Vec<TrackId>,
        unexpected: Vec<TrackId>,
    },

    #[error("Unknown Track: {0}")]
    UnknownTrack(TrackId),

    #[error("Uninitialized Session: {0}")]
    UninitializedSession(SessionId),

    #[error("Unknown Detector: {0}")]
    UnknownDetector(String),

    #[error("Unknown GMC Method: {0}")]
    UnknownGmc(String),

    #[error("Invalid Frame Rate: {0}")]
    InvalidFrameRate(f64),

    #[error("Frame Size Error: expected {expected:?}, got {got:?}")]
    FrameSize { expected: (i32, i32), got: (i32, i32) },

    #[error("Unable to open video: {0}")]
    VideoOpen(PathBuf),

    #[error("Model not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("Model Error: {0}")]
    Model(String),

    #[error("OpenCV Error: {0}")]
    OpenCv(#[from] opencv::Error),

    #[error("Ort Error: {0}")]
    Ort(#[from] ort::Error),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),
}
