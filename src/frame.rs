use std::collections::BTreeSet;

use serde_derive::{Deserialize, Serialize};

use crate::analytics::{self, PlayerTimes};
use crate::geometry::Rect;

/// Persistent identity assigned by the tracker.
pub type TrackId = u32;

/// A detected rectangle, with a track id once the tracker has confirmed it.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedBox {
    pub rect: Rect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<TrackId>,
}

impl TrackedBox {
    #[inline]
    pub fn new(rect: Rect, track_id: Option<TrackId>) -> Self {
        Self { rect, track_id }
    }

    #[inline]
    pub fn tracked(rect: Rect, id: TrackId) -> Self {
        Self::new(rect, Some(id))
    }
}

/// All boxes of one video frame.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct FrameBoxes {
    pub boxes: Vec<TrackedBox>,
}

impl FrameBoxes {
    #[inline]
    pub fn new(boxes: Vec<TrackedBox>) -> Self {
        Self { boxes }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &TrackedBox> {
        self.boxes.iter()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Boxes carrying a track id; id-less detections are never rendered or counted.
    #[inline]
    pub fn tracked(&self) -> impl Iterator<Item = (TrackId, Rect)> + '_ {
        self.boxes
            .iter()
            .filter_map(|b| b.track_id.map(|id| (id, b.rect)))
    }

    /// First box of the frame carrying `id`.
    #[inline]
    pub fn find(&self, id: TrackId) -> Option<Rect> {
        self.tracked().find(|&(i, _)| i == id).map(|(_, r)| r)
    }
}

impl FromIterator<TrackedBox> for FrameBoxes {
    fn from_iter<I: IntoIterator<Item = TrackedBox>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Frame-aligned box stream: entry `i` belongs to decoded frame `i` of the video.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct BoxStream {
    pub fps: f64,
    pub frames: Vec<FrameBoxes>,
}

impl BoxStream {
    pub fn new(fps: f64, frames: Vec<FrameBoxes>) -> Self {
        Self { fps, frames }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &FrameBoxes> {
        self.frames.iter()
    }

    /// The known track-id set: every id observed anywhere in the stream.
    pub fn track_ids(&self) -> BTreeSet<TrackId> {
        self.frames
            .iter()
            .flat_map(|f| f.tracked().map(|(id, _)| id))
            .collect()
    }

    /// `(frame index, box)` for every frame in which `id` appears.
    pub fn appearances(&self, id: TrackId) -> Vec<(usize, Rect)> {
        self.frames
            .iter()
            .enumerate()
            .filter_map(|(idx, f)| f.find(id).map(|r| (idx, r)))
            .collect()
    }

    #[inline]
    pub fn player_times(&self) -> PlayerTimes {
        analytics::player_times(&self.frames, self.fps)
    }
}
