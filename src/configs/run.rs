use std::{collections::BTreeMap, fs, path::Path};

use serde::{Deserialize, Serialize};

use super::{ProjectionConfig, SelectionParams, SuperstimulusConfig};
use crate::{DissectErr, Result};

/// What the command line runs against: the reference convnet built from `seed` and a random
/// batch of `batch_size` inputs.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RunConfig {
    pub seed: u64,
    pub batch_size: usize,
    /// The node to dissect, rank by, or synthesize superstimuli for.
    pub node: String,
    /// The amount of top activations to report.
    pub k: usize,
    pub selection: SelectionParams,
    pub superstimulus: SuperstimulusConfig,
    /// The fully connected node whose activations get projected.
    pub projection_node: String,
    pub projections: Vec<ProjectionConfig>,
    pub atlas_path: String,
    pub input_description: Option<BTreeMap<usize, String>>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            batch_size: 16,
            node: "conv2".into(),
            k: 8,
            selection: SelectionParams::channel(0),
            superstimulus: SuperstimulusConfig::default(),
            projection_node: "fc4".into(),
            projections: vec![ProjectionConfig::pca(8), ProjectionConfig::tsne(3)],
            atlas_path: "atlas.png".into(),
            input_description: None,
        }
    }
}

impl RunConfig {
    /// Reads a config from a JSON file, missing keys take their default.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(DissectErr::InvalidConfig("batch_size must be positive".into()));
        }

        if self.k == 0 {
            return Err(DissectErr::InvalidConfig("k must be positive".into()));
        }

        if self.node.is_empty() || self.projection_node.is_empty() {
            return Err(DissectErr::InvalidConfig("node names must not be empty".into()));
        }

        Ok(())
    }

    /// The outer channel the run is about.
    pub fn outer_idx(&self) -> Result<usize> {
        self.selection
            .outer_idx
            .ok_or(DissectErr::MissingParam("outer_idx"))
    }
}
