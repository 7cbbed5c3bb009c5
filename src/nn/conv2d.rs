use log::debug;
use ndarray::{Array1, Array4, ArrayView1, ArrayView4, s};
use rand::Rng;

use crate::{
    DissectErr, Result,
    error::{expect_shape, expect_size},
    nn::{init, pair},
};

/// A 2D convolution (cross-correlation with zero padding).
#[derive(Debug, Clone)]
pub struct Conv2d {
    weight: Array4<f32>,
    bias: Option<Array1<f32>>,
    stride: (usize, usize),
    padding: (usize, usize),
}

impl Conv2d {
    /// Creates a new `Conv2d`.
    ///
    /// # Arguments
    /// * `weight` - The kernels, shaped `[out_channels, in_channels, kh, kw]`.
    /// * `bias` - One bias per output channel, if any.
    /// * `stride` - The vertical and horizontal stride.
    /// * `padding` - The vertical and horizontal zero padding.
    ///
    /// # Returns
    /// A new `Conv2d` or an error if the parameters are inconsistent.
    pub fn new(
        weight: Array4<f32>,
        bias: Option<Array1<f32>>,
        stride: (usize, usize),
        padding: (usize, usize),
    ) -> Result<Self> {
        let (out_channels, in_channels, kh, kw) = weight.dim();

        if stride.0 == 0 || stride.1 == 0 {
            return Err(DissectErr::InvalidConfig(format!(
                "conv stride must be positive, got {stride:?}"
            )));
        }

        if in_channels == 0 || kh == 0 || kw == 0 {
            return Err(DissectErr::InvalidConfig(format!(
                "conv weight has an empty dimension: {:?}",
                weight.shape()
            )));
        }

        if let Some(bias) = &bias {
            expect_size("conv bias", bias.len(), out_channels)?;
        }

        Ok(Self {
            weight,
            bias,
            stride,
            padding,
        })
    }

    /// Creates a new `Conv2d` with square kernels and parameters sampled uniformly in
    /// `±1/sqrt(fan_in)`.
    pub fn random<R: Rng>(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
        rng: &mut R,
    ) -> Result<Self> {
        let fan_in = in_channels * kernel * kernel;
        let weight = init::uniform((out_channels, in_channels, kernel, kernel), fan_in, rng)?;
        let bias = init::uniform(out_channels, fan_in, rng)?;
        Self::new(weight, Some(bias), pair(stride), pair(padding))
    }

    pub fn weight(&self) -> &Array4<f32> {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Array1<f32>> {
        self.bias.as_ref()
    }

    pub fn stride(&self) -> (usize, usize) {
        self.stride
    }

    pub fn padding(&self) -> (usize, usize) {
        self.padding
    }

    pub fn in_channels(&self) -> usize {
        self.weight.dim().1
    }

    pub fn out_channels(&self) -> usize {
        self.weight.dim().0
    }

    pub fn kernel_size(&self) -> (usize, usize) {
        let (_, _, kh, kw) = self.weight.dim();
        (kh, kw)
    }

    /// Convolves `x` with every kernel of this node.
    ///
    /// # Arguments
    /// * `x` - The input, shaped `[B, in_channels, H, W]`.
    ///
    /// # Returns
    /// The activation, shaped `[B, out_channels, oH, oW]`.
    pub fn forward(&self, x: ArrayView4<f32>) -> Result<Array4<f32>> {
        conv2d(
            x,
            self.weight.view(),
            self.bias.as_ref().map(|b| b.view()),
            self.stride,
            self.padding,
        )
    }

    /// Backpropagates through this node.
    ///
    /// # Arguments
    /// * `x` - The input the node received, `[B, in_channels, H, W]`.
    /// * `d` - The gradient with respect to the node's output, `[B, out_channels, oH, oW]`.
    ///
    /// # Returns
    /// The gradient with respect to `x`.
    pub fn backward(&self, x: ArrayView4<f32>, d: ArrayView4<f32>) -> Result<Array4<f32>> {
        let (batch, channels, h, w) = x.dim();
        expect_size("conv input channels", channels, self.in_channels())?;

        let (oh, ow) = output_size((h, w), self.kernel_size(), self.stride, self.padding)?;
        expect_shape("conv delta", d.shape(), &[batch, self.out_channels(), oh, ow])?;

        Ok(conv2d_input_grad(
            self.weight.view(),
            d,
            (h, w),
            self.stride,
            self.padding,
        ))
    }
}

/// Computes the spatial size of a sliding window's output.
///
/// # Returns
/// The output height and width or `ShapeMismatch` if the window doesn't fit in the padded
/// input.
pub(crate) fn output_size(
    input: (usize, usize),
    kernel: (usize, usize),
    stride: (usize, usize),
    padding: (usize, usize),
) -> Result<(usize, usize)> {
    let h = input.0 + 2 * padding.0;
    let w = input.1 + 2 * padding.1;

    if h < kernel.0 {
        return Err(DissectErr::ShapeMismatch {
            what: "padded input height",
            got: h,
            expected: kernel.0,
        });
    }

    if w < kernel.1 {
        return Err(DissectErr::ShapeMismatch {
            what: "padded input width",
            got: w,
            expected: kernel.1,
        });
    }

    Ok(((h - kernel.0) / stride.0 + 1, (w - kernel.1) / stride.1 + 1))
}

/// Surrounds the spatial dimensions of `x` with `value`.
pub(crate) fn pad(x: ArrayView4<f32>, padding: (usize, usize), value: f32) -> Array4<f32> {
    let (b, c, h, w) = x.dim();
    let (ph, pw) = padding;

    let mut padded = Array4::from_elem((b, c, h + 2 * ph, w + 2 * pw), value);
    padded
        .slice_mut(s![.., .., ph..ph + h, pw..pw + w])
        .assign(&x);

    padded
}

/// Cross-correlates a batch with a set of kernels.
///
/// # Arguments
/// * `x` - The input, shaped `[B, C, H, W]`.
/// * `weight` - The kernels, shaped `[O, C, kh, kw]`.
/// * `bias` - One bias per kernel, if any.
/// * `stride` - The vertical and horizontal stride.
/// * `padding` - The vertical and horizontal zero padding.
///
/// # Returns
/// The activation, shaped `[B, O, oH, oW]`.
pub fn conv2d(
    x: ArrayView4<f32>,
    weight: ArrayView4<f32>,
    bias: Option<ArrayView1<f32>>,
    stride: (usize, usize),
    padding: (usize, usize),
) -> Result<Array4<f32>> {
    let (batch, channels, h, w) = x.dim();
    let (out_channels, in_channels, kh, kw) = weight.dim();

    expect_size("conv input channels", channels, in_channels)?;
    if let Some(bias) = &bias {
        expect_size("conv bias", bias.len(), out_channels)?;
    }

    let (oh, ow) = output_size((h, w), (kh, kw), stride, padding)?;
    debug!("conv2d [{batch}, {channels}, {h}, {w}] -> [{batch}, {out_channels}, {oh}, {ow}]");

    let padded = pad(x, padding, 0.0);
    let out = Array4::from_shape_fn((batch, out_channels, oh, ow), |(b, o, i, j)| {
        let (y0, x0) = (i * stride.0, j * stride.1);
        let window = padded.slice(s![b, .., y0..y0 + kh, x0..x0 + kw]);
        let kernel = weight.slice(s![o, .., .., ..]);

        let acc: f32 = window.iter().zip(kernel.iter()).map(|(v, k)| v * k).sum();
        acc + bias.map_or(0.0, |bias| bias[o])
    });

    Ok(out)
}

/// Spreads each output delta back over the input window it was computed from.
///
/// `d` has to be shaped `[B, O, oH, oW]` for an input of spatial size `input`.
pub(crate) fn conv2d_input_grad(
    weight: ArrayView4<f32>,
    d: ArrayView4<f32>,
    input: (usize, usize),
    stride: (usize, usize),
    padding: (usize, usize),
) -> Array4<f32> {
    let (batch, ..) = d.dim();
    let (_, channels, kh, kw) = weight.dim();
    let (h, w) = input;
    let (ph, pw) = padding;

    let mut padded = Array4::zeros((batch, channels, h + 2 * ph, w + 2 * pw));
    for ((b, o, i, j), &delta) in d.indexed_iter() {
        if delta == 0. {
            continue;
        }

        let (y0, x0) = (i * stride.0, j * stride.1);
        padded
            .slice_mut(s![b, .., y0..y0 + kh, x0..x0 + kw])
            .scaled_add(delta, &weight.slice(s![o, .., .., ..]));
    }

    padded.slice(s![.., .., ph..ph + h, pw..pw + w]).to_owned()
}

#[cfg(test)]
mod tests {
    use ndarray::{Array, array};

    use super::*;

    #[test]
    fn conv2d_matches_hand_computed_values() {
        let x = Array::from_shape_vec((1, 1, 3, 3), (1..=9).map(|v| v as f32).collect()).unwrap();
        let w = Array::from_shape_vec((1, 1, 2, 2), vec![1., 0., 0., -1.]).unwrap();

        let y = conv2d(x.view(), w.view(), Some(array![0.5].view()), (1, 1), (0, 0)).unwrap();

        // Each output is x[i][j] - x[i+1][j+1] + 0.5 = -4 + 0.5.
        assert_eq!(y.dim(), (1, 1, 2, 2));
        assert!(y.iter().all(|&v| (v + 3.5).abs() < 1e-6));
    }

    #[test]
    fn conv2d_applies_stride_and_zero_padding() {
        let x = Array4::<f32>::ones((2, 1, 4, 4));
        let w = Array4::<f32>::ones((3, 1, 3, 3));

        let y = conv2d(x.view(), w.view(), None, (2, 2), (1, 1)).unwrap();

        assert_eq!(y.dim(), (2, 3, 2, 2));
        // Top-left window only overlaps a 2x2 block of the input.
        assert_eq!(y[[0, 0, 0, 0]], 4.);
        assert_eq!(y[[1, 2, 1, 1]], 9.);
    }

    #[test]
    fn conv2d_rejects_channel_mismatch() {
        let x = Array4::<f32>::zeros((1, 2, 4, 4));
        let w = Array4::<f32>::zeros((1, 3, 3, 3));

        let err = conv2d(x.view(), w.view(), None, (1, 1), (0, 0)).unwrap_err();
        assert!(matches!(
            err,
            DissectErr::ShapeMismatch {
                got: 2,
                expected: 3,
                ..
            }
        ));
    }

    #[test]
    fn conv2d_rejects_kernel_larger_than_input() {
        let x = Array4::<f32>::zeros((1, 1, 2, 2));
        let w = Array4::<f32>::zeros((1, 1, 3, 3));

        assert!(conv2d(x.view(), w.view(), None, (1, 1), (0, 0)).is_err());
    }

    #[test]
    fn backward_matches_finite_differences() {
        let weight = Array::from_shape_fn((2, 2, 3, 3), |(o, c, i, j)| {
            ((o * 18 + c * 9 + i * 3 + j) as f32 * 0.37).sin()
        });
        let conv = Conv2d::new(weight, Some(array![0.1, -0.3]), (2, 1), (1, 0)).unwrap();
        let x = Array::from_shape_fn((1, 2, 5, 4), |(_, c, i, j)| {
            ((c * 20 + i * 4 + j) as f32 * 0.61).cos()
        });

        // The scalar is the sum of the output weighted by `d`.
        let y = conv.forward(x.view()).unwrap();
        let d = Array::from_shape_fn(y.raw_dim(), |(_, o, i, j)| (o + i + 2 * j) as f32 * 0.1);
        let dx = conv.backward(x.view(), d.view()).unwrap();
        assert_eq!(dx.dim(), x.dim());

        // Linear in x, so a wide step keeps rounding out of the difference.
        let scalar = |x: &Array4<f32>| (conv.forward(x.view()).unwrap() * &d).sum();
        let eps = 0.5;
        for (ix, &g) in dx.indexed_iter() {
            let mut plus = x.clone();
            plus[ix] += eps;
            let mut minus = x.clone();
            minus[ix] -= eps;

            let numeric = (scalar(&plus) - scalar(&minus)) / (2. * eps);
            assert!((numeric - g).abs() < 1e-3, "{ix:?}: {numeric} vs {g}");
        }
    }

    #[test]
    fn backward_rejects_wrong_delta_shape() {
        let conv = Conv2d::new(Array4::ones((2, 1, 3, 3)), None, (1, 1), (0, 0)).unwrap();
        let x = Array4::<f32>::zeros((1, 1, 4, 4));

        assert!(conv.backward(x.view(), Array4::zeros((1, 2, 3, 3)).view()).is_err());
        assert!(conv.backward(x.view(), Array4::zeros((1, 2, 2, 2)).view()).is_ok());
    }

    #[test]
    fn new_rejects_bad_bias_and_stride() {
        let w = Array4::<f32>::zeros((2, 1, 3, 3));

        assert!(Conv2d::new(w.clone(), Some(Array1::zeros(3)), (1, 1), (0, 0)).is_err());
        assert!(Conv2d::new(w, None, (0, 1), (0, 0)).is_err());
    }
}
