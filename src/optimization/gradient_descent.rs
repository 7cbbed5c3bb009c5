use super::Optimizer;
use crate::{Result, error::expect_size};

#[derive(Debug)]
pub struct GradientDescent {
    learning_rate: f32,
}

impl GradientDescent {
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for GradientDescent {
    fn update_weights(&mut self, grad: &[f32], weights: &mut [f32]) -> Result<()> {
        expect_size("gradient", grad.len(), weights.len())?;

        let lr = self.learning_rate;

        for (w, g) in weights.iter_mut().zip(grad) {
            *w -= lr * g;
        }

        Ok(())
    }
}
