use std::collections::BTreeMap;

use serde_derive::{Deserialize, Serialize};

use crate::frame::{FrameBoxes, TrackId};

/// Whole seconds at which every track is first and last seen.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerTimes {
    pub start: BTreeMap<TrackId, u64>,
    pub end: BTreeMap<TrackId, u64>,
}

impl PlayerTimes {
    #[inline]
    pub fn len(&self) -> usize {
        self.start.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start.is_empty()
    }

    /// `(id, start, end)` in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (TrackId, u64, u64)> + '_ {
        self.start
            .iter()
            .filter_map(|(&id, &start)| self.end.get(&id).map(|&end| (id, start, end)))
    }
}

#[inline]
fn to_seconds(frame_idx: usize, fps: f64) -> u64 {
    if fps > 0.0 {
        (frame_idx as f64 / fps).floor() as u64
    } else {
        0
    }
}

/// First and last appearance of every track id, floored to whole seconds.
pub fn player_times(frames: &[FrameBoxes], fps: f64) -> PlayerTimes {
    let mut first: BTreeMap<TrackId, usize> = BTreeMap::new();
    let mut last: BTreeMap<TrackId, usize> = BTreeMap::new();

    for (idx, boxes) in frames.iter().enumerate() {
        for (id, _) in boxes.tracked() {
            first.entry(id).or_insert(idx);
            last.insert(id, idx);
        }
    }

    PlayerTimes {
        start: first
            .into_iter()
            .map(|(id, idx)| (id, to_seconds(idx, fps)))
            .collect(),
        end: last
            .into_iter()
            .map(|(id, idx)| (id, to_seconds(idx, fps)))
            .collect(),
    }
}
