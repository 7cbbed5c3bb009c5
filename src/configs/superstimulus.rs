use serde::{Deserialize, Serialize};

use crate::optimization::{Adam, GradientDescent, Optimizer};

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptimizerConfig {
    Adam {
        lr: f32,
        b1: f32,
        b2: f32,
        eps: f32,
        weight_decay: f32,
    },
    GradientDescent {
        lr: f32,
    },
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::Adam {
            lr: 0.1,
            b1: 0.9,
            b2: 0.999,
            eps: 1e-8,
            weight_decay: 1e-6,
        }
    }
}

impl OptimizerConfig {
    /// Builds an optimizer for a buffer of `len` values.
    pub fn build(&self, len: usize) -> Box<dyn Optimizer> {
        match *self {
            Self::Adam {
                lr,
                b1,
                b2,
                eps,
                weight_decay,
            } => Box::new(Adam::new(len, lr, b1, b2, eps, weight_decay)),
            Self::GradientDescent { lr } => Box::new(GradientDescent::new(lr)),
        }
    }
}

/// Settings of the superstimulus search.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SuperstimulusConfig {
    pub iterations: usize,
    /// Whether to penalize the total variation of the input, for smoother superstimuli.
    pub total_variation: bool,
    pub tv_coefficient: f32,
    pub optimizer: OptimizerConfig,
}

impl Default for SuperstimulusConfig {
    fn default() -> Self {
        Self {
            iterations: 100,
            total_variation: true,
            tv_coefficient: 0.0005,
            optimizer: OptimizerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: SuperstimulusConfig =
            serde_json::from_str(r#"{"iterations": 20, "total_variation": false}"#).unwrap();

        assert_eq!(config.iterations, 20);
        assert!(!config.total_variation);
        assert_eq!(config.optimizer, OptimizerConfig::default());
    }

    #[test]
    fn parses_gradient_descent() {
        let config: OptimizerConfig =
            serde_json::from_str(r#"{"type": "gradient_descent", "lr": 0.5}"#).unwrap();
        assert_eq!(config, OptimizerConfig::GradientDescent { lr: 0.5 });
    }
}
