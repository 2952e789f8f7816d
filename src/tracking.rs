use tracing::{debug, info};

use crate::detector::Detect;
use crate::error::{Error, Result};
use crate::frame::{BoxStream, FrameBoxes};
use crate::gmc::GmcConfig;
use crate::tracker::{IouTracker, TrackerConfig, Tracking};
use crate::video::FrameSource;

/// Runs detector and tracker over a whole video, one decoded frame at a time.
pub struct TrackingAdapter<D> {
    detector: D,
    gmc: GmcConfig,
    tracker: TrackerConfig,
}

impl<D: Detect> TrackingAdapter<D> {
    pub fn new(detector: D, gmc: GmcConfig, tracker: TrackerConfig) -> Self {
        Self {
            detector,
            gmc,
            tracker,
        }
    }

    /// Tracks `source` with a fresh motion estimator and tracker, so runs never
    /// share state.
    pub fn track<S>(&mut self, source: &mut S) -> Result<BoxStream>
    where
        S: FrameSource + ?Sized,
    {
        let estimator = self.gmc.build()?;
        let mut tracker = IouTracker::new(self.tracker.clone(), estimator);

        self.track_with(source, &mut tracker)
    }

    /// Same as [`track`](Self::track) with a caller supplied tracker. The source
    /// must report a positive finite frame rate.
    pub fn track_with<S, T>(&mut self, source: &mut S, tracker: &mut T) -> Result<BoxStream>
    where
        S: FrameSource + ?Sized,
        T: Tracking + ?Sized,
    {
        let fps = source.fps();
        if !(fps.is_finite() && fps > 0.0) {
            return Err(Error::InvalidFrameRate(fps));
        }
        info!(fps, "Tracking started");

        let mut frames = Vec::new();
        while let Some(frame) = source.read()? {
            let detections = self.detector.detect(&frame)?;
            let boxes = tracker.update(&frame, &detections)?;
            frames.push(FrameBoxes::new(boxes));

            if frames.len() % 500 == 0 {
                debug!(frames = frames.len(), "Tracking in progress");
            }
        }

        let stream = BoxStream::new(fps, frames);
        info!(
            frames = stream.len(),
            tracks = stream.track_ids().len(),
            "Tracking completed"
        );

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Detection;
    use crate::gmc::{self, MotionEstimator, SparseGmcConfig, Warp};
    use crate::video::MemorySource;
    use opencv::{core, core::Mat};

    /// Reports the same detections on every frame.
    struct Fixed(Vec<Detection>);

    impl Detect for Fixed {
        fn detect(&mut self, _frame: &Mat) -> Result<Vec<Detection>> {
            Ok(self.0.clone())
        }
    }

    struct Still;

    impl MotionEstimator for Still {
        fn estimate(&mut self, _frame: &Mat) -> Result<Warp> {
            Ok(gmc::identity())
        }

        fn reset(&mut self) {}
    }

    fn source(n: usize) -> MemorySource {
        let frames = (0..n)
            .map(|_| Mat::new_rows_cols_with_default(48, 64, core::CV_8UC3, core::Scalar::all(0.0)).unwrap())
            .collect();

        MemorySource::new(25.0, frames)
    }

    fn adapter(dets: Vec<Detection>) -> TrackingAdapter<Fixed> {
        TrackingAdapter::new(
            Fixed(dets),
            GmcConfig::SparseFlow(SparseGmcConfig::default()),
            TrackerConfig::default(),
        )
    }

    #[test]
    fn test_one_entry_per_frame() {
        let mut adapter = adapter(vec![Detection::from_ltrb(10.0, 10.0, 20.0, 30.0, 0.9, 0)]);
        let stream = adapter.track(&mut source(6)).unwrap();

        assert_eq!(stream.len(), 6);
        assert_eq!(stream.fps, 25.0);
        assert!(stream.iter().all(|f| f.len() == 1));
        // confirmed after the default three hits
        assert_eq!(stream.frames[1].tracked().count(), 0);
        assert_eq!(stream.frames[2].find(1), Some(crate::geometry::Rect::new(10, 10, 20, 30)));
        assert_eq!(stream.track_ids().into_iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_runs_do_not_share_ids() {
        let mut adapter = adapter(vec![Detection::from_ltrb(10.0, 10.0, 20.0, 30.0, 0.9, 0)]);

        let first = adapter.track(&mut source(4)).unwrap();
        let second = adapter.track(&mut source(4)).unwrap();

        assert_eq!(first.track_ids(), second.track_ids());
    }

    #[test]
    fn test_empty_video() {
        let stream = adapter(vec![]).track(&mut source(0)).unwrap();

        assert!(stream.is_empty());
        assert!(stream.player_times().is_empty());
    }

    #[test]
    fn test_custom_tracker() {
        let config = TrackerConfig {
            min_hits: 1,
            ..Default::default()
        };
        let mut tracker = IouTracker::new(config, Still);
        let mut adapter = adapter(vec![
            Detection::from_ltrb(0.0, 0.0, 10.0, 10.0, 0.9, 0),
            Detection::from_ltrb(30.0, 30.0, 40.0, 40.0, 0.8, 0),
        ]);

        let stream = adapter.track_with(&mut source(3), &mut tracker).unwrap();

        assert_eq!(stream.frames[0].tracked().map(|(id, _)| id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(stream.player_times().iter().collect::<Vec<_>>(), vec![(1, 0, 0), (2, 0, 0)]);
    }

    #[test]
    fn test_rejects_invalid_frame_rate() {
        let mut adapter = adapter(vec![Detection::from_ltrb(10.0, 10.0, 20.0, 30.0, 0.9, 0)]);

        for fps in [0.0, -25.0, f64::NAN] {
            let frames = vec![Mat::new_rows_cols_with_default(48, 64, core::CV_8UC3, core::Scalar::all(0.0)).unwrap()];
            let err = adapter.track(&mut MemorySource::new(fps, frames)).unwrap_err();

            assert!(matches!(err, Error::InvalidFrameRate(_)));
        }
    }
}
