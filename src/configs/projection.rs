use serde::{Deserialize, Serialize};

const DEFAULT_PERPLEXITY: f32 = 30.;
const DEFAULT_TSNE_ITERATIONS: usize = 1000;

/// One step of a projection pipe, deserializable from `{"type": "pca", "n_components": 3}`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ProjectionConfig {
    #[serde(rename = "pca")]
    Pca { n_components: usize },
    #[serde(rename = "t-sne")]
    Tsne {
        n_components: usize,
        #[serde(default = "default_perplexity")]
        perplexity: f32,
        #[serde(default = "default_tsne_iterations")]
        iterations: usize,
        /// Derived from the number of points when missing.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        learning_rate: Option<f32>,
    },
}

impl ProjectionConfig {
    pub fn pca(n_components: usize) -> Self {
        Self::Pca { n_components }
    }

    /// A t-SNE step with the usual hyperparameters.
    pub fn tsne(n_components: usize) -> Self {
        Self::Tsne {
            n_components,
            perplexity: DEFAULT_PERPLEXITY,
            iterations: DEFAULT_TSNE_ITERATIONS,
            learning_rate: None,
        }
    }

    pub fn n_components(&self) -> usize {
        match *self {
            Self::Pca { n_components } | Self::Tsne { n_components, .. } => n_components,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Pca { .. } => "pca",
            Self::Tsne { .. } => "t-sne",
        }
    }
}

fn default_perplexity() -> f32 {
    DEFAULT_PERPLEXITY
}

fn default_tsne_iterations() -> usize {
    DEFAULT_TSNE_ITERATIONS
}
