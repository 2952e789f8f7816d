use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_derive::{Deserialize, Serialize};
use tracing::warn;

use crate::detector::DetectorConfig;
use crate::error::{Error, Result};
use crate::gmc::{FlowGmcConfig, GmcConfig, SparseGmcConfig};
use crate::render::RenderStyle;
use crate::tracker::TrackerConfig;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Detector models by name
    pub detectors: BTreeMap<String, DetectorConfig>,
    /// Motion estimators by name
    pub gmc: BTreeMap<String, GmcConfig>,
    pub tracker: TrackerConfig,
    pub style: RenderStyle,
    /// Every session writes into its own subdirectory
    pub results_dir: PathBuf,
    pub session_ttl_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let detectors = [
            ("march-best", "models/march-best.onnx", "best yolo11l"),
            ("march-best-s", "models/march-best-s.onnx", "best yolo11s"),
            ("baseline", "models/baseline.onnx", "baseline yolo11s"),
        ]
        .into_iter()
        .map(|(name, path, ui_name)| (name.to_string(), DetectorConfig::new(path, ui_name)))
        .collect();

        let gmc = [
            ("raft".to_string(), GmcConfig::OpticalFlow(FlowGmcConfig::default())),
            ("sparse".to_string(), GmcConfig::SparseFlow(SparseGmcConfig::default())),
        ]
        .into_iter()
        .collect();

        Self {
            detectors,
            gmc,
            tracker: TrackerConfig::default(),
            style: RenderStyle::default(),
            results_dir: PathBuf::from("results"),
            session_ttl_secs: 3600,
        }
    }
}

impl PipelineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;

        Ok(serde_json::from_str(&data)?)
    }

    pub fn detector(&self, name: &str) -> Result<&DetectorConfig> {
        self.detectors.get(name).ok_or_else(|| {
            warn!(name, available = ?self.detectors.keys().collect::<Vec<_>>(), "Detector not found");
            Error::UnknownDetector(name.to_string())
        })
    }

    pub fn gmc(&self, name: &str) -> Result<&GmcConfig> {
        self.gmc.get(name).ok_or_else(|| {
            warn!(name, available = ?self.gmc.keys().collect::<Vec<_>>(), "GMC method not found");
            Error::UnknownGmc(name.to_string())
        })
    }

    #[inline]
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}
