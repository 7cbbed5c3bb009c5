use ndarray::{Array1, Array2, ArrayView2};
use rand::Rng;

use crate::{DissectErr, Result, error::expect_size, nn::init};

/// A fully connected layer: `y = x·Wᵀ + b`.
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Array2<f32>,
    bias: Option<Array1<f32>>,
}

impl Linear {
    /// Creates a new `Linear`.
    ///
    /// # Arguments
    /// * `weight` - The weights, shaped `[out_features, in_features]`.
    /// * `bias` - One bias per output feature, if any.
    ///
    /// # Returns
    /// A new `Linear` or an error if the bias doesn't match the weights.
    pub fn new(weight: Array2<f32>, bias: Option<Array1<f32>>) -> Result<Self> {
        if weight.ncols() == 0 {
            return Err(DissectErr::InvalidConfig(
                "linear layer must have at least one input feature".into(),
            ));
        }

        if let Some(bias) = &bias {
            expect_size("linear bias", bias.len(), weight.nrows())?;
        }

        Ok(Self { weight, bias })
    }

    /// Creates a new `Linear` with parameters sampled uniformly in `±1/sqrt(in_features)`.
    pub fn random<R: Rng>(in_features: usize, out_features: usize, rng: &mut R) -> Result<Self> {
        let weight = init::uniform((out_features, in_features), in_features, rng)?;
        let bias = init::uniform(out_features, in_features, rng)?;
        Self::new(weight, Some(bias))
    }

    pub fn weight(&self) -> &Array2<f32> {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Array1<f32>> {
        self.bias.as_ref()
    }

    pub fn in_features(&self) -> usize {
        self.weight.ncols()
    }

    pub fn out_features(&self) -> usize {
        self.weight.nrows()
    }

    /// Makes a forward pass.
    ///
    /// # Arguments
    /// * `x` - The input, shaped `[B, in_features]`.
    ///
    /// # Returns
    /// The output, shaped `[B, out_features]`.
    pub fn forward(&self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        expect_size("linear input features", x.ncols(), self.in_features())?;

        let mut y = x.dot(&self.weight.t());
        if let Some(bias) = &self.bias {
            y += bias;
        }

        Ok(y)
    }

    /// Backpropagates `d`, the gradient with respect to the output, to the input.
    pub fn backward(&self, d: ArrayView2<f32>) -> Result<Array2<f32>> {
        expect_size("linear delta features", d.ncols(), self.out_features())?;
        Ok(d.dot(&self.weight))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn forward_adds_bias_to_each_row() {
        let linear = Linear::new(array![[1., 2.], [0., -1.]], Some(array![0.5, 1.])).unwrap();
        let y = linear.forward(array![[1., 1.], [2., 0.]].view()).unwrap();

        assert_eq!(y, array![[3.5, 0.], [2.5, 1.]]);
    }

    #[test]
    fn backward_weights_the_delta_by_each_input() {
        let linear = Linear::new(array![[1., 2.], [0., -1.], [3., 0.]], None).unwrap();
        let dx = linear.backward(array![[1., 0., 0.], [0., 2., 1.]].view()).unwrap();

        assert_eq!(dx, array![[1., 2.], [3., -2.]]);
        assert!(linear.backward(array![[1., 0.]].view()).is_err());
    }

    #[test]
    fn forward_rejects_wrong_feature_count() {
        let linear = Linear::new(Array2::zeros((2, 3)), None).unwrap();
        assert!(linear.forward(Array2::zeros((1, 2)).view()).is_err());
    }
}
