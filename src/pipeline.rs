//! The three entry points of a tracking session: `infer` tracks a video and
//! renders the defaults, `make_video` re-renders with custom labels and
//! `make_focused_video` follows a single player.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::analytics::PlayerTimes;
use crate::config::PipelineConfig;
use crate::detector::{Detect, YoloDetector};
use crate::error::{Error, Result};
use crate::frame::{BoxStream, TrackId};
use crate::gmc::GmcConfig;
use crate::render::{self, ParamsById};
use crate::session::{SessionArtifact, SessionId, SessionStore};
use crate::tracking::TrackingAdapter;
use crate::video::{FrameSource, VideoReader, VideoWriter};

const ANNOTATED: &str = "annotated.mp4";
const IMAGES: &str = "images";

#[derive(Debug, Clone)]
pub struct InferOutput {
    pub session: SessionId,
    pub track_ids: BTreeSet<TrackId>,
    pub times: PlayerTimes,
    pub annotated: PathBuf,
    /// `{id}.jpg` thumbnails, ascending id
    pub images: Vec<PathBuf>,
}

pub struct Pipeline {
    config: PipelineConfig,
    sessions: SessionStore,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let sessions = SessionStore::new(config.session_ttl());

        Self { config, sessions }
    }

    #[inline]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn session_dir(&self, session: SessionId) -> PathBuf {
        self.config.results_dir.join(session.to_string())
    }

    /// Tracks `video` with the named detector and motion estimator in a new session.
    pub fn infer(&self, video: &Path, detector_name: &str, gmc_name: &str) -> Result<InferOutput> {
        let detector = self.config.detector(detector_name)?;
        let gmc = self.config.gmc(gmc_name)?.clone();

        info!(video = %video.display(), detector = detector_name, gmc = gmc_name, "Inference requested");

        self.infer_with(video, YoloDetector::new(detector.clone())?, gmc)
    }

    /// Same as [`infer`](Self::infer) with a caller supplied detector. Expired
    /// sessions are purged first; a failed run leaves nothing on disk.
    pub fn infer_with<D: Detect>(&self, video: &Path, detector: D, gmc: GmcConfig) -> Result<InferOutput> {
        self.purge_expired();

        let session = SessionId::new();
        match self.run(session, video, detector, gmc) {
            Ok(out) => Ok(out),
            Err(err) => {
                warn!(%session, %err, "Inference failed");
                self.remove_session_dir(session);
                Err(err)
            }
        }
    }

    fn run<D: Detect>(&self, session: SessionId, video: &Path, detector: D, gmc: GmcConfig) -> Result<InferOutput> {
        let dir = self.session_dir(session);
        std::fs::create_dir_all(&dir)?;

        // sessions render from their own copy of the input
        let original = match video.extension() {
            Some(ext) => dir.join("original").with_extension(ext),
            None => dir.join("original"),
        };
        std::fs::copy(video, &original)?;

        let mut reader = VideoReader::open(&original)?;
        let mut adapter = TrackingAdapter::new(detector, gmc, self.config.tracker.clone());
        let boxes = adapter.track(&mut reader)?;

        let track_ids = boxes.track_ids();
        let times = boxes.player_times();

        let annotated = dir.join(ANNOTATED);
        self.render_annotated(&original, &boxes, &render::default_params(&track_ids), &annotated)?;

        let thumbs = render::thumbnails(&mut VideoReader::open(&original)?, &boxes)?;
        let images = render::save_thumbnails(&thumbs, &dir.join(IMAGES))?;

        self.sessions.replace(session, SessionArtifact::new(original, boxes));

        info!(%session, tracks = track_ids.len(), "Inference completed");

        Ok(InferOutput {
            session,
            track_ids,
            times,
            annotated,
            images,
        })
    }

    /// Drops expired sessions together with their output directories. Returns
    /// how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let purged = self.sessions.purge_expired();
        for &session in &purged {
            self.remove_session_dir(session);
        }

        purged.len()
    }

    /// Forgets `session` and deletes its outputs.
    pub fn close_session(&self, session: SessionId) -> Result<()> {
        self.sessions
            .remove(session)
            .ok_or(Error::UninitializedSession(session))?;
        self.remove_session_dir(session);

        Ok(())
    }

    fn remove_session_dir(&self, session: SessionId) {
        let dir = self.session_dir(session);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => debug!(%session, "Session directory removed"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(%session, %err, dir = %dir.display(), "Failed to remove session directory"),
        }
    }

    /// Re-renders the session's video with `params`, which must name every track id.
    pub fn make_video(&self, session: SessionId, params: &ParamsById) -> Result<PathBuf> {
        let artifact = self.sessions.get(session)?;
        render::validate_params(params, &artifact.track_ids)?;

        let out = self.session_dir(session).join(ANNOTATED);
        self.render_annotated(&artifact.video, &artifact.boxes, params, &out)?;

        Ok(out)
    }

    /// Video cropped around track `id`, skipping the frames it is absent from.
    pub fn make_focused_video(&self, session: SessionId, id: TrackId) -> Result<PathBuf> {
        let artifact = self.sessions.get(session)?;
        if !artifact.track_ids.contains(&id) {
            warn!(%session, id, "Focused video requested for an unknown track");
            return Err(Error::UnknownTrack(id));
        }

        let out = self.session_dir(session).join(format!("focused_{}.mp4", id));

        let mut reader = VideoReader::open(&artifact.video)?;
        let mut writer = VideoWriter::new(&out, reader.fps());
        render::crop_to_track(&mut reader, &mut writer, &artifact.boxes, id)?;
        writer.finish()?;

        Ok(out)
    }

    fn render_annotated(&self, video: &Path, boxes: &BoxStream, params: &ParamsById, out: &Path) -> Result<()> {
        let mut reader = VideoReader::open(video)?;
        let mut writer = VideoWriter::new(out, reader.fps());

        render::annotate(&mut reader, &mut writer, boxes, params, &self.config.style)?;
        writer.finish()?;

        Ok(())
    }
}
