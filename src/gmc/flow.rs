//! Learned optical-flow motion estimation.
//!
//! Frames are cropped, downsampled and fed pairwise to a dense flow network;
//! the per-axis median of the flow field gives the camera translation.

use std::path::{Path, PathBuf};

use ndarray::{Array3, Axis};
use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use serde_derive::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{MotionEstimator, Warp};
use crate::error::{Error, Result};
use crate::math;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct FlowGmcConfig {
    /// ONNX export of the flow network
    pub model_path: PathBuf,
    /// Shorter side of the downsampled frame, in px
    pub short_side: u32,
    /// Columns cropped from the left and right edges before downsampling
    pub border: i32,
    /// Refinement iterations, passed when the network takes them as an input
    pub iterations: u32,
    /// Network flow units to pixels of the downsampled frame
    pub flow_scale: f32,
    /// Name of the flow output tensor
    pub output: String,
}

impl Default for FlowGmcConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/raft_small.onnx"),
            short_side: 256,
            border: 0,
            iterations: 12,
            flow_scale: 1.0,
            output: "flow".to_string(),
        }
    }
}

pub trait FlowModel: Send {
    /// Dense flow from `prev` to `curr`. Inputs are `(3, h, w)` RGB in `[-1, 1]`,
    /// the result is `(2, h, w)` with x displacement first.
    fn flow(&mut self, prev: &Array3<f32>, curr: &Array3<f32>) -> Result<Array3<f32>>;
}

pub struct OnnxFlowModel {
    session: Session,
    iterations: u32,
    output: String,
}

impl OnnxFlowModel {
    pub fn new(model_path: &Path, iterations: u32, output: &str) -> Result<Self> {
        if !model_path.exists() {
            return Err(Error::ModelNotFound(model_path.to_path_buf()));
        }

        let model_bytes = std::fs::read(model_path)?;
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_memory(&model_bytes)?;

        info!(
            model_path = %model_path.display(),
            iterations,
            "Optical flow model loaded"
        );

        Ok(Self {
            session,
            iterations,
            output: output.to_string(),
        })
    }
}

fn to_tensor(image: &Array3<f32>) -> Result<Value> {
    let (c, h, w) = image.dim();
    let data: Vec<f32> = image.iter().copied().collect();

    Ok(Tensor::from_array((vec![1usize, c, h, w], data.into_boxed_slice())).map(Value::from)?)
}

impl FlowModel for OnnxFlowModel {
    fn flow(&mut self, prev: &Array3<f32>, curr: &Array3<f32>) -> Result<Array3<f32>> {
        let (_, h, w) = prev.dim();
        let prev = to_tensor(prev)?;
        let curr = to_tensor(curr)?;

        let outputs = if self.session.inputs.len() > 2 {
            let iters = Tensor::from_array((vec![1usize], vec![self.iterations as i64].into_boxed_slice()))
                .map(Value::from)?;
            self.session.run(ort::inputs![prev, curr, iters])?
        } else {
            self.session.run(ort::inputs![prev, curr])?
        };

        let output = outputs
            .get(self.output.as_str())
            .ok_or_else(|| Error::Model(format!("missing output tensor `{}`", self.output)))?;
        let (_, data) = output.try_extract_tensor::<f32>()?;

        let len = 2 * h * w;
        if data.len() < len || data.len() % len != 0 {
            return Err(Error::Model(format!(
                "flow output has {} values, expected a multiple of {}",
                data.len(),
                len
            )));
        }

        // stacked refinement outputs end with the final estimate
        let tail = data[data.len() - len..].to_vec();

        Array3::from_shape_vec((2, h, w), tail).map_err(|e| Error::Model(e.to_string()))
    }
}

/// Pure-translation estimator driven by a dense optical-flow network.
pub struct FlowGmc<M = OnnxFlowModel> {
    model: M,
    config: FlowGmcConfig,
    prev: Option<Array3<f32>>,
}

impl FlowGmc<OnnxFlowModel> {
    pub fn from_config(config: FlowGmcConfig) -> Result<Self> {
        let model = OnnxFlowModel::new(&config.model_path, config.iterations, &config.output)?;

        Ok(Self::with_model(model, config))
    }
}

#[inline]
fn round_to_8(v: f64) -> i32 {
    ((v / 8.0).round() as i32 * 8).max(8)
}

impl<M: FlowModel> FlowGmc<M> {
    pub fn with_model(model: M, config: FlowGmcConfig) -> Self {
        Self {
            model,
            config,
            prev: None,
        }
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.prev.is_some()
    }

    /// Cropped, downsampled network input plus the per-axis ratio back to frame pixels.
    fn preprocess(&self, frame: &Mat) -> Result<(Array3<f32>, (f64, f64))> {
        let (fw, fh) = (frame.cols(), frame.rows());
        let border = self.config.border.min((fw - 1) / 2).max(0);

        let roi = Mat::roi(frame, core::Rect::new(border, 0, fw - 2 * border, fh))?;
        let mut cropped = Mat::default();
        roi.copy_to(&mut cropped)?;

        let (cw, ch) = (cropped.cols(), cropped.rows());
        let scale = self.config.short_side.max(8) as f64 / cw.min(ch) as f64;
        let (nw, nh) = (round_to_8(cw as f64 * scale), round_to_8(ch as f64 * scale));

        let mut small = Mat::default();
        imgproc::resize(
            &cropped,
            &mut small,
            core::Size::new(nw, nh),
            0.0,
            0.0,
            imgproc::INTER_AREA,
        )?;

        let code = if small.channels() == 1 {
            imgproc::COLOR_GRAY2RGB
        } else {
            imgproc::COLOR_BGR2RGB
        };
        let mut rgb = Mat::default();
        imgproc::cvt_color_def(&small, &mut rgb, code)?;

        let data = rgb.data_bytes()?;
        let (nw, nh) = (nw as usize, nh as usize);
        let image = Array3::from_shape_fn((3, nh, nw), |(c, y, x)| {
            data[(y * nw + x) * 3 + c] as f32 / 127.5 - 1.0
        });

        Ok((image, (cw as f64 / nw as f64, ch as f64 / nh as f64)))
    }
}

impl<M: FlowModel> MotionEstimator for FlowGmc<M> {
    fn estimate(&mut self, frame: &Mat) -> Result<Warp> {
        let (curr, (rx, ry)) = self.preprocess(frame)?;

        let Some(prev) = self.prev.take() else {
            self.prev = Some(curr);
            return Ok(super::identity());
        };

        if prev.dim() != curr.dim() {
            warn!(prev = ?prev.dim(), curr = ?curr.dim(), "Frame size changed, flow reset");
            self.prev = Some(curr);
            return Ok(super::identity());
        }

        let flow = self.model.flow(&prev, &curr);
        self.prev = Some(curr);
        let flow = flow?;

        let axis_median = |axis: usize| {
            let mut values: Vec<f32> = flow.index_axis(Axis(0), axis).iter().copied().collect();
            math::median(&mut values).unwrap_or(0.0) as f64
        };

        let scale = self.config.flow_scale as f64;
        let dx = axis_median(0) * scale * rx;
        let dy = axis_median(1) * scale * ry;

        debug!(dx, dy, "Optical flow translation");

        Ok(super::translation(dx, dy))
    }

    fn reset(&mut self) {
        self.prev = None;
    }
}
