use ndarray::{Array, Dimension, ShapeBuilder};
use ndarray_rand::{RandomExt, rand_distr::Uniform};
use rand::Rng;

use crate::{DissectErr, Result};

/// Samples a tensor uniformly in `±1/sqrt(fan_in)`, the default initialization of trained
/// convnets' layers.
///
/// # Arguments
/// * `shape` - The shape of the tensor.
/// * `fan_in` - The number of inputs feeding each output unit.
/// * `rng` - A random number generator.
pub(crate) fn uniform<Sh, D, R>(shape: Sh, fan_in: usize, rng: &mut R) -> Result<Array<f32, D>>
where
    Sh: ShapeBuilder<Dim = D>,
    D: Dimension,
    R: Rng,
{
    let bound = 1. / (fan_in.max(1) as f32).sqrt();
    let distribution = Uniform::new_inclusive(-bound, bound)
        .map_err(|e| DissectErr::InvalidConfig(format!("invalid init range: {e}")))?;

    Ok(Array::random_using(shape, distribution, rng))
}
