//! Classical sparse-feature motion estimation: Shi-Tomasi corners tracked with
//! pyramidal Lucas-Kanade, then a RANSAC partial-affine fit.

use opencv::{
    calib3d,
    core::{self, Mat, Point2f, Size, TermCriteria, Vector},
    imgproc,
    prelude::*,
    video,
};
use serde_derive::{Deserialize, Serialize};
use tracing::debug;

use super::{MotionEstimator, Warp};
use crate::error::Result;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SparseGmcConfig {
    /// Frames are shrunk by this factor before feature tracking
    pub downscale: u32,
    pub max_corners: i32,
    pub quality_level: f64,
    pub min_distance: f64,
    pub block_size: i32,
    pub win_size: i32,
    pub max_level: i32,
    /// Max reprojection error for a RANSAC inlier, in downscaled px
    pub ransac_threshold: f64,
}

impl Default for SparseGmcConfig {
    fn default() -> Self {
        Self {
            downscale: 2,
            max_corners: 1000,
            quality_level: 0.01,
            min_distance: 1.0,
            block_size: 3,
            win_size: 21,
            max_level: 3,
            ransac_threshold: 3.0,
        }
    }
}

struct Previous {
    gray: Mat,
    points: Vector<Point2f>,
}

pub struct SparseGmc {
    config: SparseGmcConfig,
    prev: Option<Previous>,
}

impl SparseGmc {
    pub fn new(config: SparseGmcConfig) -> Self {
        Self { config, prev: None }
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.prev.is_some()
    }

    fn grayscale(&self, frame: &Mat) -> Result<Mat> {
        let mut gray = Mat::default();
        if frame.channels() == 1 {
            frame.copy_to(&mut gray)?;
        } else {
            imgproc::cvt_color_def(frame, &mut gray, imgproc::COLOR_BGR2GRAY)?;
        }

        let factor = self.config.downscale.max(1) as i32;
        if factor == 1 {
            return Ok(gray);
        }

        let mut small = Mat::default();
        imgproc::resize(
            &gray,
            &mut small,
            Size::new((gray.cols() / factor).max(1), (gray.rows() / factor).max(1)),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;

        Ok(small)
    }

    fn corners(&self, gray: &Mat) -> Result<Vector<Point2f>> {
        let mut corners = Vector::<Point2f>::new();
        imgproc::good_features_to_track(
            gray,
            &mut corners,
            self.config.max_corners,
            self.config.quality_level,
            self.config.min_distance,
            &Mat::default(),
            self.config.block_size,
            false,
            0.04,
        )?;

        Ok(corners)
    }

    fn fit(&self, prev: &Previous, gray: &Mat) -> Result<Option<Warp>> {
        if prev.points.len() < 4 || prev.gray.size()? != gray.size()? {
            return Ok(None);
        }

        let mut next_points = Vector::<Point2f>::new();
        let mut status = Vector::<u8>::new();
        let mut err = Vector::<f32>::new();

        video::calc_optical_flow_pyr_lk(
            &prev.gray,
            gray,
            &prev.points,
            &mut next_points,
            &mut status,
            &mut err,
            Size::new(self.config.win_size, self.config.win_size),
            self.config.max_level,
            TermCriteria::new(
                core::TermCriteria_Type::COUNT as i32 | core::TermCriteria_Type::EPS as i32,
                30,
                0.01,
            )?,
            0,
            1e-4,
        )?;

        let mut from = Vector::<Point2f>::new();
        let mut to = Vector::<Point2f>::new();
        for ((p, q), ok) in prev.points.iter().zip(next_points.iter()).zip(status.iter()) {
            if ok != 0 {
                from.push(p);
                to.push(q);
            }
        }

        if from.len() < 4 {
            return Ok(None);
        }

        let mut inliers = Mat::default();
        let affine = calib3d::estimate_affine_partial_2d(
            &from,
            &to,
            &mut inliers,
            calib3d::RANSAC,
            self.config.ransac_threshold,
            2000,
            0.99,
            10,
        )?;

        if affine.empty() {
            return Ok(None);
        }

        let mut warp = super::identity();
        for r in 0..2 {
            for c in 0..3 {
                warp[(r, c)] = *affine.at_2d::<f64>(r as i32, c as i32)?;
            }
        }

        let factor = self.config.downscale.max(1) as f64;
        warp[(0, 2)] *= factor;
        warp[(1, 2)] *= factor;

        Ok(Some(warp))
    }
}

impl MotionEstimator for SparseGmc {
    fn estimate(&mut self, frame: &Mat) -> Result<Warp> {
        let gray = self.grayscale(frame)?;
        let points = self.corners(&gray)?;

        let warp = match self.prev.take() {
            Some(prev) => self.fit(&prev, &gray),
            None => Ok(Some(super::identity())),
        };

        self.prev = Some(Previous { gray, points });

        Ok(warp?.unwrap_or_else(|| {
            debug!("Not enough tracked features, assuming no camera motion");
            super::identity()
        }))
    }

    fn reset(&mut self) {
        self.prev = None;
    }
}
