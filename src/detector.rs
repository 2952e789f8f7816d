use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ndarray::prelude::*;
use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use serde_derive::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::detection::Detection;
use crate::error::{Error, Result};

/// Produces raw per-frame detections; the tracker assigns identities later.
pub trait Detect {
    fn detect(&mut self, frame: &Mat) -> Result<Vec<Detection>>;
}

impl<T: Detect + ?Sized> Detect for Box<T> {
    #[inline]
    fn detect(&mut self, frame: &Mat) -> Result<Vec<Detection>> {
        (**self).detect(frame)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DetectorConfig {
    pub model_path: PathBuf,
    /// Human readable name shown to users
    pub ui_name: String,
    /// Square network input, in px
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Kept classes; empty keeps all
    pub classes: Vec<i32>,
}

impl DetectorConfig {
    pub fn new<P: Into<PathBuf>>(model_path: P, ui_name: &str) -> Self {
        Self {
            model_path: model_path.into(),
            ui_name: ui_name.to_string(),
            ..Default::default()
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/baseline.onnx"),
            ui_name: String::new(),
            input_size: 640,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            classes: Vec::new(),
        }
    }
}

/// YOLO detector exported to ONNX (`[1, 4 + classes, candidates]` output, boxes in
/// network input pixels).
pub struct YoloDetector {
    session: Session,
    output: String,
    config: DetectorConfig,
}

impl YoloDetector {
    pub fn new(config: DetectorConfig) -> Result<Self> {
        let model_path: &Path = &config.model_path;
        if !model_path.exists() {
            return Err(Error::ModelNotFound(model_path.to_path_buf()));
        }

        let model_bytes = std::fs::read(model_path)?;
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_memory(&model_bytes)?;

        let output = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| Error::Model("detector has no outputs".to_string()))?;

        info!(
            model_path = %model_path.display(),
            input_size = config.input_size,
            "Detector initialized"
        );

        Ok(Self {
            session,
            output,
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    fn preprocess(&self, frame: &Mat) -> Result<Value> {
        let size = self.config.input_size as i32;

        let mut resized = Mat::default();
        imgproc::resize(
            frame,
            &mut resized,
            core::Size::new(size, size),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;

        let mut rgb = Mat::default();
        imgproc::cvt_color_def(&resized, &mut rgb, imgproc::COLOR_BGR2RGB)?;

        let data = rgb.data_bytes()?;
        let n = (size * size) as usize;
        let mut chw = vec![0.0f32; 3 * n];
        for (idx, px) in data.chunks_exact(3).enumerate() {
            for c in 0..3 {
                chw[c * n + idx] = px[c] as f32 / 255.0;
            }
        }

        let shape = vec![1usize, 3, size as usize, size as usize];
        Ok(Tensor::from_array((shape, chw.into_boxed_slice())).map(Value::from)?)
    }
}

impl Detect for YoloDetector {
    fn detect(&mut self, frame: &Mat) -> Result<Vec<Detection>> {
        let input = self.preprocess(frame)?;
        let outputs = self.session.run(ort::inputs![input])?;

        let output = outputs
            .get(self.output.as_str())
            .ok_or_else(|| Error::Model(format!("missing output tensor `{}`", self.output)))?;
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();

        let (features, candidates) = match dims.as_slice() {
            [1, f, n] => (*f, *n),
            other => return Err(Error::Model(format!("unexpected detector output {:?}", other))),
        };

        let view = ArrayView2::from_shape((features, candidates), data)
            .map_err(|e| Error::Model(e.to_string()))?;

        let input = self.config.input_size as f32;
        let scale = (frame.cols() as f32 / input, frame.rows() as f32 / input);
        let dets = postprocess(view.t(), scale, &self.config);

        debug!(count = dets.len(), "Detection completed");

        Ok(dets)
    }
}

/// Decodes `[candidates, 4 + classes]` rows (center box first) into frame-space
/// detections and applies per-class NMS.
pub fn postprocess(
    view: ArrayView2<'_, f32>,
    (scale_x, scale_y): (f32, f32),
    config: &DetectorConfig,
) -> Vec<Detection> {
    // The bounding boxes grouped by (maximum) class index.
    let mut bboxes: BTreeMap<i32, Vec<Detection>> = BTreeMap::new();

    for row in view.axis_iter(Axis(0)) {
        if row.len() < 5 {
            continue;
        }

        let mut class_index = -1;
        let mut confidence = 0.0;

        for (idx, val) in row.iter().skip(4).copied().enumerate() {
            if val > confidence {
                class_index = idx as i32;
                confidence = val;
            }
        }

        if class_index < 0 || confidence <= config.confidence_threshold {
            continue;
        }

        if !config.classes.is_empty() && !config.classes.contains(&class_index) {
            continue;
        }

        bboxes.entry(class_index).or_default().push(Detection {
            x: row[0] * scale_x,
            y: row[1] * scale_y,
            w: row[2] * scale_x,
            h: row[3] * scale_y,
            confidence,
            class: class_index,
        });
    }

    let mut results = Vec::new();
    for (_, mut dets) in bboxes {
        let indices = non_maximum_supression(&mut dets, config.iou_threshold);

        results.extend(
            dets.into_iter()
                .enumerate()
                .filter_map(|(idx, item)| indices.contains(&idx).then_some(item)),
        );
    }

    results
}

/// Sorts `dets` by confidence and returns the indices that survive suppression.
fn non_maximum_supression(dets: &mut [Detection], iou_threshold: f32) -> Vec<usize> {
    dets.sort_unstable_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut retain: Vec<Option<usize>> = (0..dets.len()).map(Some).collect();
    for idx in 0..dets.len() {
        if retain[idx].is_none() {
            continue;
        }

        for r in retain[idx + 1..].iter_mut() {
            if let Some(other) = *r {
                if dets[idx].iou(&dets[other]) > iou_threshold {
                    *r = None;
                }
            }
        }
    }

    retain.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cx: f32, cy: f32, w: f32, h: f32, scores: [f32; 3]) -> Vec<f32> {
        let mut r = vec![cx, cy, w, h];
        r.extend(scores);
        r
    }

    fn rows(rows: Vec<Vec<f32>>) -> Array2<f32> {
        let n = rows.len();
        Array2::from_shape_vec((n, 7), rows.concat()).unwrap()
    }

    #[test]
    fn test_postprocess_scales_and_thresholds() {
        let preds = rows(vec![
            row(100.0, 100.0, 20.0, 40.0, [0.9, 0.05, 0.0]),
            row(300.0, 300.0, 20.0, 20.0, [0.1, 0.2, 0.1]),
        ]);

        let dets = postprocess(preds.view(), (2.0, 0.5), &DetectorConfig::default());
        assert_eq!(dets.len(), 1);
        assert_eq!((dets[0].x, dets[0].y, dets[0].w, dets[0].h), (200.0, 50.0, 40.0, 20.0));
        assert_eq!(dets[0].class, 0);
    }

    #[test]
    fn test_nms_is_per_class() {
        let preds = rows(vec![
            row(100.0, 100.0, 50.0, 50.0, [0.8, 0.0, 0.0]),
            row(102.0, 101.0, 50.0, 50.0, [0.9, 0.0, 0.0]),
            row(101.0, 100.0, 50.0, 50.0, [0.0, 0.7, 0.0]),
            row(400.0, 400.0, 50.0, 50.0, [0.6, 0.0, 0.0]),
        ]);

        let dets = postprocess(preds.view(), (1.0, 1.0), &DetectorConfig::default());
        assert_eq!(dets.len(), 3);
        assert_eq!(dets.iter().filter(|d| d.class == 0).count(), 2);
        assert!(dets.iter().any(|d| d.class == 0 && d.confidence == 0.9));
        assert!(!dets.iter().any(|d| d.confidence == 0.8));
    }

    #[test]
    fn test_class_filter() {
        let preds = rows(vec![
            row(100.0, 100.0, 50.0, 50.0, [0.8, 0.0, 0.0]),
            row(300.0, 300.0, 50.0, 50.0, [0.0, 0.0, 0.9]),
        ]);
        let config = DetectorConfig {
            classes: vec![2],
            ..Default::default()
        };

        let dets = postprocess(preds.view(), (1.0, 1.0), &config);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class, 2);
    }
}
