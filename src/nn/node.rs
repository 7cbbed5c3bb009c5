use ndarray::{ArrayD, ArrayViewD};

use super::{Conv2d, Linear, MaxPool2d, pool};
use crate::{Result, tensor};

/// The closed set of layer kinds that can be inspected.
#[derive(Debug, Clone)]
pub enum Node {
    Conv2d(Conv2d),
    Linear(Linear),
    Relu,
    MaxPool2d(MaxPool2d),
    Flatten,
    LogSoftmax,
}

impl Node {
    /// The name of this node's kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Conv2d(_) => "Conv2d",
            Self::Linear(_) => "Linear",
            Self::Relu => "Relu",
            Self::MaxPool2d(_) => "MaxPool2d",
            Self::Flatten => "Flatten",
            Self::LogSoftmax => "LogSoftmax",
        }
    }

    /// Makes a forward pass through this node.
    ///
    /// # Arguments
    /// * `x` - The input, its rank must be the one the node's kind expects.
    ///
    /// # Returns
    /// The node's output or an error if the input doesn't fit the node.
    pub fn forward(&self, x: ArrayViewD<f32>) -> Result<ArrayD<f32>> {
        let y = match self {
            Self::Conv2d(l) => l.forward(tensor::view4("conv2d input", x)?)?.into_dyn(),
            Self::Linear(l) => l.forward(tensor::view2("linear input", x)?)?.into_dyn(),
            Self::Relu => pool::relu(x),
            Self::MaxPool2d(l) => l.forward(tensor::view4("max pool input", x)?)?.into_dyn(),
            Self::Flatten => pool::flatten(x)?.into_dyn(),
            Self::LogSoftmax => {
                pool::log_softmax(tensor::view2("log softmax input", x)?).into_dyn()
            }
        };

        Ok(y)
    }

    /// Backpropagates through this node.
    ///
    /// # Arguments
    /// * `x` - The input the node received in the forward pass.
    /// * `d` - The gradient of some scalar with respect to the node's output.
    ///
    /// # Returns
    /// The gradient of that scalar with respect to `x`.
    pub fn backward(&self, x: ArrayViewD<f32>, d: ArrayViewD<f32>) -> Result<ArrayD<f32>> {
        let dx = match self {
            Self::Conv2d(l) => l
                .backward(
                    tensor::view4("conv2d input", x)?,
                    tensor::view4("conv2d delta", d)?,
                )?
                .into_dyn(),
            Self::Linear(l) => l.backward(tensor::view2("linear delta", d)?)?.into_dyn(),
            Self::Relu => pool::relu_backward(x, d)?,
            Self::MaxPool2d(l) => l
                .backward(
                    tensor::view4("max pool input", x)?,
                    tensor::view4("max pool delta", d)?,
                )?
                .into_dyn(),
            Self::Flatten => pool::flatten_backward(x, d)?,
            Self::LogSoftmax => pool::log_softmax_backward(
                tensor::view2("log softmax input", x)?,
                tensor::view2("log softmax delta", d)?,
            )?
            .into_dyn(),
        };

        Ok(dx)
    }
}

impl From<Conv2d> for Node {
    fn from(value: Conv2d) -> Self {
        Self::Conv2d(value)
    }
}

impl From<Linear> for Node {
    fn from(value: Linear) -> Self {
        Self::Linear(value)
    }
}

impl From<MaxPool2d> for Node {
    fn from(value: MaxPool2d) -> Self {
        Self::MaxPool2d(value)
    }
}
