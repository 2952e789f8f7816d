pub mod analytics;
pub mod bbox;
pub mod config;
pub mod detection;
pub mod detector;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod gmc;
pub mod math;
pub mod pipeline;
pub mod render;
pub mod session;
pub mod tracker;
pub mod tracking;
pub mod video;

pub use analytics::{player_times, PlayerTimes};
pub use config::PipelineConfig;
pub use detection::Detection;
pub use detector::{Detect, DetectorConfig, YoloDetector};
pub use error::{AlignmentError, Error, Result};
pub use frame::{BoxStream, FrameBoxes, TrackId, TrackedBox};
pub use geometry::{fit_interval, pad_to_size, Rect};
pub use gmc::{GmcConfig, MotionEstimator, Warp};
pub use pipeline::{InferOutput, Pipeline};
pub use render::{ParamsById, PlayerParams, RenderStyle};
pub use session::{SessionArtifact, SessionId, SessionStore};
pub use tracker::{IouTracker, TrackerConfig, Tracking};
pub use tracking::TrackingAdapter;
pub use video::{FrameSink, FrameSource, MemorySource, VideoReader, VideoWriter};
