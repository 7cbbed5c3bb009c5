//! Rank conversions between dynamic and fixed dimension views.
use ndarray::{ArrayView2, ArrayView4, ArrayViewD, Ix2, Ix4};

use crate::{DissectErr, Result};

/// Views a dynamic tensor as `[B, C, H, W]`.
///
/// # Arguments
/// * `what` - What the tensor is, used in the error.
/// * `x` - The tensor.
///
/// # Returns
/// The rank 4 view or `UnsupportedShape` if the rank isn't 4.
pub fn view4<'a>(what: &'static str, x: ArrayViewD<'a, f32>) -> Result<ArrayView4<'a, f32>> {
    let rank = x.ndim();
    x.into_dimensionality::<Ix4>()
        .map_err(|_| DissectErr::UnsupportedShape { what, rank })
}

/// Views a dynamic tensor as `[B, N]`.
pub fn view2<'a>(what: &'static str, x: ArrayViewD<'a, f32>) -> Result<ArrayView2<'a, f32>> {
    let rank = x.ndim();
    x.into_dimensionality::<Ix2>()
        .map_err(|_| DissectErr::UnsupportedShape { what, rank })
}

/// Returns the size of the leading (batch) dimension.
pub fn batch_size(what: &'static str, x: &ArrayViewD<f32>) -> Result<usize> {
    x.shape()
        .first()
        .copied()
        .ok_or(DissectErr::UnsupportedShape { what, rank: 0 })
}
