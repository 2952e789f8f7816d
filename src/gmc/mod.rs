//! Global motion compensation.
//!
//! A [`MotionEstimator`] turns a stream of raw frames into frame-to-frame 2x3
//! transforms mapping the previous frame's coordinates onto the current one.
//! Trackers receive an estimator at construction and call it once per frame,
//! in order.

pub mod flow;
pub mod sparse;

use nalgebra as na;
use opencv::core::Mat;
use serde_derive::{Deserialize, Serialize};

use crate::error::Result;

pub use flow::{FlowGmc, FlowGmcConfig, FlowModel, OnnxFlowModel};
pub use sparse::{SparseGmc, SparseGmcConfig};

/// Affine transform `[a b tx; c d ty]` from previous to current frame coordinates.
pub type Warp = na::Matrix2x3<f64>;

#[inline]
pub fn identity() -> Warp {
    Warp::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0)
}

#[inline]
pub fn translation(dx: f64, dy: f64) -> Warp {
    Warp::new(1.0, 0.0, dx, 0.0, 1.0, dy)
}

pub trait MotionEstimator: Send {
    /// Transform from the previous frame to `frame`. Identity on the first call
    /// after construction or [`reset`](MotionEstimator::reset). Always remembers
    /// `frame` as the new previous frame.
    fn estimate(&mut self, frame: &Mat) -> Result<Warp>;

    /// Forgets the previous frame. Idempotent.
    fn reset(&mut self);
}

impl<T: MotionEstimator + ?Sized> MotionEstimator for Box<T> {
    #[inline]
    fn estimate(&mut self, frame: &Mat) -> Result<Warp> {
        (**self).estimate(frame)
    }

    #[inline]
    fn reset(&mut self) {
        (**self).reset()
    }
}

/// Selects and configures a motion estimator for one tracking run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum GmcConfig {
    OpticalFlow(FlowGmcConfig),
    SparseFlow(SparseGmcConfig),
}

impl GmcConfig {
    /// Fresh estimator with no previous frame.
    pub fn build(&self) -> Result<Box<dyn MotionEstimator>> {
        Ok(match self {
            GmcConfig::OpticalFlow(config) => Box::new(FlowGmc::from_config(config.clone())?),
            GmcConfig::SparseFlow(config) => Box::new(SparseGmc::new(config.clone())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_and_translation() {
        assert_eq!(identity(), translation(0.0, 0.0));

        let t = translation(2.5, -1.0);
        assert_eq!((t[(0, 2)], t[(1, 2)]), (2.5, -1.0));
        assert_eq!((t[(0, 0)], t[(1, 1)], t[(0, 1)], t[(1, 0)]), (1.0, 1.0, 0.0, 0.0));
    }

    #[test]
    fn test_config_tags() {
        let sparse: GmcConfig = serde_json::from_str(r#"{"method": "sparse_flow"}"#).unwrap();
        assert_eq!(sparse, GmcConfig::SparseFlow(SparseGmcConfig::default()));

        let flow: GmcConfig =
            serde_json::from_str(r#"{"method": "optical_flow", "model_path": "raft.onnx", "border": 16}"#)
                .unwrap();
        match flow {
            GmcConfig::OpticalFlow(c) => {
                assert_eq!(c.border, 16);
                assert_eq!(c.short_side, FlowGmcConfig::default().short_side);
            }
            other => panic!("unexpected config {:?}", other),
        }
    }

    #[test]
    fn test_build_sparse_is_fresh() {
        let mut gmc = GmcConfig::SparseFlow(SparseGmcConfig::default()).build().unwrap();
        let frame = Mat::new_rows_cols_with_default(
            32,
            32,
            opencv::core::CV_8UC3,
            opencv::core::Scalar::all(0.0),
        )
        .unwrap();

        assert_eq!(gmc.estimate(&frame).unwrap(), identity());
    }
}
