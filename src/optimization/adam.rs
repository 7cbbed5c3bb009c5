use super::Optimizer;
use crate::{Result, error::expect_size};

/// Adam with an optional L2 penalty added to the gradient before the moment estimates.
#[derive(Debug)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    v: Box<[f32]>,
    s: Box<[f32]>,
    epsilon: f32,
    weight_decay: f32,
}

impl Adam {
    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `len` - The length of the buffer it will update.
    /// * `learning_rate` - The step size.
    /// * `beta1` - The decay rate of the first moment.
    /// * `beta2` - The decay rate of the second moment.
    /// * `epsilon` - Added to the denominator for numerical stability.
    /// * `weight_decay` - The L2 penalty coefficient.
    pub fn new(
        len: usize,
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
        weight_decay: f32,
    ) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            beta1_t: 1.,
            beta2_t: 1.,
            v: vec![0.; len].into_boxed_slice(),
            s: vec![0.; len].into_boxed_slice(),
            epsilon,
            weight_decay,
        }
    }
}

impl Optimizer for Adam {
    fn update_weights(&mut self, grad: &[f32], weights: &mut [f32]) -> Result<()> {
        expect_size("gradient", grad.len(), weights.len())?;
        expect_size("adam weights", weights.len(), self.v.len())?;

        let Self {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            weight_decay: wd,
            ..
        } = *self;

        self.beta1_t *= b1;
        self.beta2_t *= b2;

        let bc1 = 1. - self.beta1_t;
        let bc2 = 1. - self.beta2_t;
        let step_size = lr * (bc2.sqrt() / bc1);

        weights
            .iter_mut()
            .zip(grad)
            .zip(self.v.iter_mut())
            .zip(self.s.iter_mut())
            .for_each(|(((w, g), v), s)| {
                let g = g + wd * *w;
                *v = b1 * *v + (1. - b1) * g;
                *s = b2 * *s + (1. - b2) * g.powi(2);
                *w -= step_size * *v / (s.sqrt() + eps);
            });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_moves_by_learning_rate() {
        let mut adam = Adam::new(2, 0.1, 0.9, 0.999, 1e-8, 0.);
        let mut w = [0., 0.];
        adam.update_weights(&[3., -0.01], &mut w).unwrap();

        // After bias correction the first step is lr * sign(g).
        assert!((w[0] + 0.1).abs() < 1e-4);
        assert!((w[1] - 0.1).abs() < 1e-3);
    }

    #[test]
    fn weight_decay_pulls_towards_zero() {
        let mut adam = Adam::new(1, 0.1, 0.9, 0.999, 1e-8, 1.);
        let mut w = [5.];
        adam.update_weights(&[0.], &mut w).unwrap();
        assert!(w[0] < 5.);
    }

    #[test]
    fn rejects_buffers_of_another_size() {
        let mut adam = Adam::new(2, 0.1, 0.9, 0.999, 1e-8, 0.);

        assert!(adam.update_weights(&[1.], &mut [0., 0.]).is_err());
        assert!(adam.update_weights(&[1., 1., 1.], &mut [0., 0., 0.]).is_err());
        assert!(adam.update_weights(&[1., 1.], &mut [0., 0.]).is_ok());
    }
}
