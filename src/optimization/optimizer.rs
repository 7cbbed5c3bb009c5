use crate::Result;

/// Defines the strategy for updating a flat buffer of values from its gradient.
///
/// The optimizers *descend*: to maximize a scalar, feed them the gradient of its negation.
pub trait Optimizer {
    /// Updates the provided slice of values using the gradient.
    ///
    /// # Arguments
    /// * `grad` - The gradient corresponding to the `weights` slice.
    /// * `weights` - A mutable slice of the current values.
    ///
    /// # Returns
    /// An error if there's a mismatch in the sizes of `grad` and `weights`.
    fn update_weights(&mut self, grad: &[f32], weights: &mut [f32]) -> Result<()>;
}
