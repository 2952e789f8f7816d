use opencv::core::Mat;
use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb};
use crate::detection::Detection;
use crate::error::Result;
use crate::frame::{TrackId, TrackedBox};
use crate::gmc::MotionEstimator;

/// Extension point of a multi-object tracker.
///
/// Implementations own their motion estimator (handed over at construction)
/// and are fed every decoded frame in presentation order.
pub trait Tracking {
    /// One box per detection, in detection order; detections not yet bound to
    /// a confirmed track carry no id.
    fn update(&mut self, frame: &Mat, detections: &[Detection]) -> Result<Vec<TrackedBox>>;
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    /// Minimum IoU between a motion-compensated track and a detection
    pub match_iou: f32,
    /// Consecutive matches before a track gets an id
    pub min_hits: u32,
    /// Frames a track survives without a match
    pub max_age: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            match_iou: 0.3,
            min_hits: 3,
            max_age: 30,
        }
    }
}

#[derive(Debug)]
struct Object {
    id: Option<TrackId>,
    bbox: BBox<Ltrb>,
    hits: u32,
    misses: u32,
}

/// Greedy IoU association over motion-compensated boxes.
pub struct IouTracker<G> {
    config: TrackerConfig,
    gmc: G,
    objects: Vec<Object>,
    next_id: TrackId,
}

impl<G: MotionEstimator> IouTracker<G> {
    pub fn new(config: TrackerConfig, gmc: G) -> Self {
        Self {
            config,
            gmc,
            objects: Vec::with_capacity(64),
            next_id: 1,
        }
    }

    /// Pairs `(object, detection)` in descending IoU order, each side used once.
    fn associate(&self, dets: &[BBox<Ltrb>]) -> Vec<(usize, usize)> {
        let mut candidates = Vec::new();
        for (i, obj) in self.objects.iter().enumerate() {
            for (j, det) in dets.iter().enumerate() {
                let iou = obj.bbox.iou(det);
                if iou >= self.config.match_iou {
                    candidates.push((iou, i, j));
                }
            }
        }

        candidates.sort_unstable_by(|a, b| b.0.total_cmp(&a.0));

        let mut used_obj = vec![false; self.objects.len()];
        let mut used_det = vec![false; dets.len()];
        let mut pairs = Vec::new();

        for (_, i, j) in candidates {
            if !used_obj[i] && !used_det[j] {
                used_obj[i] = true;
                used_det[j] = true;
                pairs.push((i, j));
            }
        }

        pairs
    }
}

impl<G: MotionEstimator> Tracking for IouTracker<G> {
    fn update(&mut self, frame: &Mat, detections: &[Detection]) -> Result<Vec<TrackedBox>> {
        let warp = self.gmc.estimate(frame)?;
        for obj in &mut self.objects {
            obj.bbox = obj.bbox.warp(&warp);
        }

        let dets: Vec<BBox<Ltrb>> = detections.iter().map(Detection::ltrb).collect();
        let pairs = self.associate(&dets);

        let mut assigned: Vec<Option<usize>> = vec![None; dets.len()];
        let mut matched = vec![false; self.objects.len()];
        for (i, j) in pairs {
            matched[i] = true;
            assigned[j] = Some(i);
        }

        for (obj, hit) in self.objects.iter_mut().zip(&matched) {
            if !hit {
                obj.misses += 1;
                // an unconfirmed track has to start its streak over
                if obj.id.is_none() {
                    obj.hits = 0;
                }
            }
        }

        for (j, slot) in assigned.iter_mut().enumerate() {
            let idx = match *slot {
                Some(i) => {
                    let obj = &mut self.objects[i];
                    obj.bbox = dets[j].clone();
                    obj.hits += 1;
                    obj.misses = 0;
                    i
                }
                None => {
                    self.objects.push(Object {
                        id: None,
                        bbox: dets[j].clone(),
                        hits: 1,
                        misses: 0,
                    });
                    self.objects.len() - 1
                }
            };

            let obj = &mut self.objects[idx];
            if obj.id.is_none() && obj.hits >= self.config.min_hits {
                obj.id = Some(self.next_id);
                self.next_id += 1;
            }

            *slot = Some(idx);
        }

        let out = assigned
            .iter()
            .zip(&dets)
            .map(|(slot, det)| {
                let id = slot.and_then(|i| self.objects[i].id);
                TrackedBox::new(det.round(), id)
            })
            .collect();

        let max_age = self.config.max_age;
        self.objects.retain(|o| o.misses <= max_age);

        Ok(out)
    }
}
