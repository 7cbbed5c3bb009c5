use ndarray::{Array2, Array4, ArrayD, ArrayView2, ArrayView4, ArrayViewD, Axis, Zip, s};

use crate::{
    DissectErr, Result,
    error::expect_shape,
    nn::conv2d::{output_size, pad},
    tensor,
};

/// 2D max pooling over each channel.
#[derive(Debug, Clone, Copy)]
pub struct MaxPool2d {
    kernel: (usize, usize),
    stride: (usize, usize),
    padding: (usize, usize),
}

impl MaxPool2d {
    /// Creates a new `MaxPool2d`.
    ///
    /// # Returns
    /// A new `MaxPool2d` or an error if the kernel or stride is zero.
    pub fn new(
        kernel: (usize, usize),
        stride: (usize, usize),
        padding: (usize, usize),
    ) -> Result<Self> {
        if kernel.0 == 0 || kernel.1 == 0 || stride.0 == 0 || stride.1 == 0 {
            return Err(DissectErr::InvalidConfig(format!(
                "max pool kernel and stride must be positive, got {kernel:?} and {stride:?}"
            )));
        }

        Ok(Self {
            kernel,
            stride,
            padding,
        })
    }

    pub fn forward(&self, x: ArrayView4<f32>) -> Result<Array4<f32>> {
        let (batch, channels, h, w) = x.dim();
        let (kh, kw) = self.kernel;
        let (oh, ow) = output_size((h, w), self.kernel, self.stride, self.padding)?;

        let padded = pad(x, self.padding, f32::NEG_INFINITY);
        let out = Array4::from_shape_fn((batch, channels, oh, ow), |(b, c, i, j)| {
            let (y0, x0) = (i * self.stride.0, j * self.stride.1);
            padded
                .slice(s![b, c, y0..y0 + kh, x0..x0 + kw])
                .fold(f32::NEG_INFINITY, |acc, &v| acc.max(v))
        });

        Ok(out)
    }

    /// Routes each output delta to the position of its window's maximum, the first one on
    /// ties.
    pub fn backward(&self, x: ArrayView4<f32>, d: ArrayView4<f32>) -> Result<Array4<f32>> {
        let (batch, channels, h, w) = x.dim();
        let (kh, kw) = self.kernel;
        let (ph, pw) = self.padding;
        let (oh, ow) = output_size((h, w), self.kernel, self.stride, self.padding)?;
        expect_shape("max pool delta", d.shape(), &[batch, channels, oh, ow])?;

        let padded = pad(x, self.padding, f32::NEG_INFINITY);
        let mut grad = Array4::zeros(padded.raw_dim());
        for ((b, c, i, j), &delta) in d.indexed_iter() {
            let (y0, x0) = (i * self.stride.0, j * self.stride.1);
            let argmax = padded
                .slice(s![b, c, y0..y0 + kh, x0..x0 + kw])
                .indexed_iter()
                .fold(None, |best: Option<((usize, usize), f32)>, (ij, &v)| match best {
                    Some((_, m)) if m >= v => best,
                    _ => Some((ij, v)),
                });

            if let Some(((di, dj), _)) = argmax {
                grad[[b, c, y0 + di, x0 + dj]] += delta;
            }
        }

        Ok(grad.slice(s![.., .., ph..ph + h, pw..pw + w]).to_owned())
    }
}

pub fn relu(x: ArrayViewD<f32>) -> ArrayD<f32> {
    x.mapv(|v| v.max(0.))
}

/// Lets `d` through where the input was positive.
pub fn relu_backward(x: ArrayViewD<f32>, d: ArrayViewD<f32>) -> Result<ArrayD<f32>> {
    expect_shape("relu delta", d.shape(), x.shape())?;
    Ok(Zip::from(&x)
        .and(&d)
        .map_collect(|&x, &d| if x > 0. { d } else { 0. }))
}

/// Collapses every dimension but the batch one.
pub fn flatten(x: ArrayViewD<f32>) -> Result<Array2<f32>> {
    let batch = tensor::batch_size("flatten input", &x)?;
    let features = x.shape()[1..].iter().product::<usize>();
    Ok(x.to_shape((batch, features))?.into_owned())
}

/// Gives `d` back the shape of the input that was flattened.
pub fn flatten_backward(x: ArrayViewD<f32>, d: ArrayViewD<f32>) -> Result<ArrayD<f32>> {
    let batch = tensor::batch_size("flatten input", &x)?;
    expect_shape("flatten delta", d.shape(), &[batch, x.len() / batch.max(1)])?;
    Ok(d.to_shape(x.shape())?.into_owned())
}

/// Row-wise `log(softmax(x))`.
pub fn log_softmax(x: ArrayView2<f32>) -> Array2<f32> {
    let mut out = x.to_owned();
    for mut row in out.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
        let lse = max + row.mapv(|v| (v - max).exp()).sum().ln();
        row.mapv_inplace(|v| v - lse);
    }

    out
}

pub fn log_softmax_backward(x: ArrayView2<f32>, d: ArrayView2<f32>) -> Result<Array2<f32>> {
    expect_shape("log softmax delta", d.shape(), x.shape())?;

    let softmax = log_softmax(x).mapv(f32::exp);
    let total = d.sum_axis(Axis(1)).insert_axis(Axis(1));
    Ok(&d - &(softmax * &total))
}

#[cfg(test)]
mod tests {
    use ndarray::{Array, IxDyn, array};

    use super::*;

    #[test]
    fn max_pool_takes_window_maximum() {
        let x = Array::from_shape_vec((1, 1, 4, 4), (0..16).map(|v| v as f32).collect()).unwrap();
        let pool = MaxPool2d::new((2, 2), (2, 2), (0, 0)).unwrap();

        let y = pool.forward(x.view()).unwrap();
        assert_eq!(y.into_shape_with_order((2, 2)).unwrap(), array![[5., 7.], [13., 15.]]);
    }

    #[test]
    fn max_pool_backward_routes_to_the_maximum() {
        let x = array![[[[1., 3., 0.], [2., 3., 9.], [4., 0., 1.]]]];
        let pool = MaxPool2d::new((2, 2), (1, 1), (0, 0)).unwrap();

        let d = array![[[[1., 10.], [100., 1000.]]]];
        let dx = pool.backward(x.view(), d.view()).unwrap();

        // The first window has two 3s, the earliest one takes the delta.
        let expected = array![[[[0., 1., 0.], [0., 0., 1010.], [100., 0., 0.]]]];
        assert_eq!(dx, expected);
        assert!(pool.backward(x.view(), array![[[[1.]]]].view()).is_err());
    }

    #[test]
    fn max_pool_backward_skips_padding() {
        let x = array![[[[-1., -2.], [-3., -4.]]]];
        let pool = MaxPool2d::new((2, 2), (2, 2), (1, 1)).unwrap();

        let y = pool.forward(x.view()).unwrap();
        let dx = pool.backward(x.view(), Array4::ones(y.raw_dim()).view()).unwrap();
        assert_eq!(dx, Array4::<f32>::ones((1, 1, 2, 2)));
    }

    #[test]
    fn relu_backward_masks_negative_inputs() {
        let x = array![[-1., 0., 2.]].into_dyn();
        let d = array![[5., 5., 5.]].into_dyn();
        assert_eq!(relu_backward(x.view(), d.view()).unwrap(), array![[0., 0., 5.]].into_dyn());
    }

    #[test]
    fn flatten_backward_restores_the_shape() {
        let x = ArrayD::<f32>::zeros(IxDyn(&[2, 3, 2]));
        let d = Array::from_shape_fn((2, 6), |(b, k)| (b * 6 + k) as f32).into_dyn();

        let dx = flatten_backward(x.view(), d.view()).unwrap();
        assert_eq!(dx.shape(), &[2, 3, 2]);
        assert_eq!(dx[[1, 2, 0]], 10.);
    }

    #[test]
    fn log_softmax_backward_matches_finite_differences() {
        let x = array![[0.5, -1., 2.]];
        let d = array![[1., 0.5, -2.]];
        let dx = log_softmax_backward(x.view(), d.view()).unwrap();

        let eps = 1e-2;
        for k in 0..3 {
            let mut plus = x.clone();
            plus[[0, k]] += eps;
            let mut minus = x.clone();
            minus[[0, k]] -= eps;

            let scalar = |x: &Array2<f32>| (log_softmax(x.view()) * &d).sum();
            let numeric = (scalar(&plus) - scalar(&minus)) / (2. * eps);
            assert!((numeric - dx[[0, k]]).abs() < 1e-2, "{k}: {numeric}");
        }
    }

    #[test]
    fn flatten_keeps_batch() {
        let x = ArrayD::<f32>::zeros(IxDyn(&[3, 2, 2, 5]));
        assert_eq!(flatten(x.view()).unwrap().dim(), (3, 20));
    }

    #[test]
    fn log_softmax_rows_exponentiate_to_one() {
        let y = log_softmax(array![[1., 2., 3.], [-10., 0., 10.]].view());
        for row in y.rows() {
            let total: f32 = row.mapv(f32::exp).sum();
            assert!((total - 1.).abs() < 1e-5);
        }
    }
}
