//! Decomposition of a convolution's output channel into the contribution of each input
//! channel.
//!
//! For an outer index `o`, the activation of a `Conv2d` is
//!
//! `activation[b, o] = Σ_c conv(input[b, c], weight[o, c]) + bias[o]`
//!
//! so each term of the sum, the *intermediate activation* of inner channel `c`, can be shown
//! on its own, together with the running (*cumulative*) sum that ends in the activation.
use log::{debug, info, warn};
use ndarray::{Array4, ArrayViewD, Axis, Zip, concatenate, s};

use crate::{
    DissectErr, Result,
    error::expect_size,
    nn::{Node, conv2d},
    tensor,
};

/// Everything needed to explain how one output channel of a convolution is composed.
#[derive(Debug, Clone)]
pub struct ConvDissection {
    /// `[B, C_in, H, W]`
    pub input: Array4<f32>,
    /// The kernels of the outer channel, `[1, C_in, kH, kW]`.
    pub weights: Array4<f32>,
    /// The bias of the outer channel, `0` if the node has none.
    pub bias: f32,
    /// One convolution per inner channel without bias, `[B, C_in, oH, oW]`.
    pub intermediate: Array4<f32>,
    /// Running sums of `intermediate`, the last one plus the bias, `[B, C_in + 1, oH, oW]`.
    pub cumulative: Array4<f32>,
    /// The node's output for the outer channel, `[B, 1, oH, oW]`.
    pub activation: Array4<f32>,
}

impl ConvDissection {
    pub fn num_images(&self) -> usize {
        self.input.dim().0
    }

    pub fn num_inner_channels(&self) -> usize {
        self.input.dim().1
    }

    /// Returns the largest absolute difference between the last cumulative map and the
    /// activation computed directly by the node.
    pub fn residual(&self) -> f32 {
        let last = self.num_inner_channels();
        let total = self.cumulative.slice(s![.., last..=last, .., ..]);

        let mut max = 0f32;
        Zip::from(total)
            .and(&self.activation)
            .for_each(|&a, &b| max = max.max((a - b).abs()));
        max
    }

    /// Checks that the intermediate activations add up to the activation.
    ///
    /// # Arguments
    /// * `tol` - The tolerance, relative to the largest activation magnitude (at least 1).
    pub fn is_consistent(&self, tol: f32) -> bool {
        let scale = self.activation.fold(1f32, |acc, &v| acc.max(v.abs()));
        self.residual() <= tol * scale
    }
}

/// Dissects one output channel of a convolutional node.
///
/// # Arguments
/// * `input` - The input to the node, `[B, C_in, H, W]`.
/// * `node` - The node, must be a `Conv2d`.
/// * `outer_idx` - The output channel to dissect.
///
/// # Returns
/// The dissection or an error if the node isn't a convolution or the shapes don't match.
pub fn dissect_conv(
    input: ArrayViewD<f32>,
    node: &Node,
    outer_idx: usize,
) -> Result<ConvDissection> {
    let Node::Conv2d(conv) = node else {
        return Err(DissectErr::UnsupportedNode { kind: node.kind() });
    };

    let input = tensor::view4("conv input", input)?;
    let num_inner_channels = input.dim().1;
    expect_size("conv input channels", num_inner_channels, conv.in_channels())?;

    if outer_idx >= conv.out_channels() {
        return Err(DissectErr::IndexOutOfRange {
            what: "outer_idx",
            got: outer_idx,
            bound: conv.out_channels(),
        });
    }

    info!("dissecting outer channel {outer_idx} over {num_inner_channels} inner channel(s)");

    let (stride, padding) = (conv.stride(), conv.padding());
    let weights = conv.weight().slice(s![outer_idx..=outer_idx, .., .., ..]);
    let bias = conv.bias().map_or(0., |b| b[outer_idx]);

    let intermediate = (0..num_inner_channels)
        .map(|c| {
            let x = input.slice(s![.., c..=c, .., ..]);
            let w = weights.slice(s![.., c..=c, .., ..]);
            conv2d(x, w, None, stride, padding)
        })
        .collect::<Result<Vec<_>>>()?;
    let intermediate_views: Vec<_> = intermediate.iter().map(|a| a.view()).collect();
    let intermediate = concatenate(Axis(1), &intermediate_views)?;
    debug!("intermediate activations {:?}", intermediate.shape());

    let cumulative = cumulative_sums(&intermediate, bias);

    let activation = conv2d(
        input,
        weights,
        conv.bias().map(|b| b.slice(s![outer_idx..=outer_idx])),
        stride,
        padding,
    )?;

    let dissection = ConvDissection {
        input: input.to_owned(),
        weights: weights.to_owned(),
        bias,
        intermediate,
        cumulative,
        activation,
    };

    let residual = dissection.residual();
    if !dissection.is_consistent(1e-4) {
        warn!("intermediate activations don't add up to the activation, residual {residual}");
    } else {
        debug!("decomposition residual {residual}");
    }

    Ok(dissection)
}

/// Computes the running sum over the channel axis, with one extra trailing channel that adds
/// the bias to the total.
fn cumulative_sums(intermediate: &Array4<f32>, bias: f32) -> Array4<f32> {
    let (b, c, h, w) = intermediate.dim();
    let mut cumulative = Array4::zeros((b, c + 1, h, w));

    let mut running = Array4::<f32>::zeros((b, 1, h, w));
    for i in 0..c {
        running += &intermediate.slice(s![.., i..=i, .., ..]);
        cumulative.slice_mut(s![.., i..=i, .., ..]).assign(&running);
    }

    running += bias;
    cumulative.slice_mut(s![.., c..=c, .., ..]).assign(&running);

    cumulative
}

#[cfg(test)]
mod tests {
    use ndarray::{Array1, ArrayD, IxDyn};
    use ndarray_rand::{RandomExt, rand_distr::Uniform};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::nn::{Conv2d, Linear};

    fn random_conv(
        rng: &mut StdRng,
        in_ch: usize,
        out_ch: usize,
        stride: usize,
        padding: usize,
    ) -> Conv2d {
        Conv2d::random(in_ch, out_ch, 3, stride, padding, rng).unwrap()
    }

    fn random_input(rng: &mut StdRng, shape: &[usize]) -> ArrayD<f32> {
        ArrayD::random_using(IxDyn(shape), Uniform::new(-1f32, 1f32).unwrap(), rng)
    }

    #[test]
    fn partial_sums_plus_bias_equal_direct_convolution() {
        let mut rng = StdRng::seed_from_u64(42);

        for (stride, padding) in [(1, 0), (1, 1), (2, 1), (2, 2)] {
            let conv = random_conv(&mut rng, 4, 5, stride, padding);
            let input = random_input(&mut rng, &[3, 4, 9, 9]);
            let node = Node::Conv2d(conv.clone());

            for outer_idx in 0..5 {
                let d = dissect_conv(input.view(), &node, outer_idx).unwrap();
                assert!(d.is_consistent(1e-5), "residual {}", d.residual());

                // The dissected activation is the node's own output channel.
                let full = conv.forward(tensor::view4("x", input.view()).unwrap()).unwrap();
                let expected = full.slice(s![.., outer_idx..=outer_idx, .., ..]);
                Zip::from(&d.activation)
                    .and(&expected)
                    .for_each(|a, b| assert!((a - b).abs() < 1e-5));
            }
        }
    }

    #[test]
    fn output_shapes() {
        let mut rng = StdRng::seed_from_u64(1);
        let node = Node::Conv2d(random_conv(&mut rng, 3, 2, 1, 0));
        let input = random_input(&mut rng, &[2, 3, 6, 5]);

        let d = dissect_conv(input.view(), &node, 1).unwrap();

        assert_eq!(d.input.dim(), (2, 3, 6, 5));
        assert_eq!(d.weights.dim(), (1, 3, 3, 3));
        assert_eq!(d.intermediate.dim(), (2, 3, 4, 3));
        assert_eq!(d.cumulative.dim(), (2, 4, 4, 3));
        assert_eq!(d.activation.dim(), (2, 1, 4, 3));
    }

    #[test]
    fn first_cumulative_is_first_intermediate() {
        let mut rng = StdRng::seed_from_u64(3);
        let node = Node::Conv2d(random_conv(&mut rng, 2, 1, 1, 1));
        let input = random_input(&mut rng, &[1, 2, 4, 4]);

        let d = dissect_conv(input.view(), &node, 0).unwrap();
        assert_eq!(
            d.cumulative.slice(s![.., 0, .., ..]),
            d.intermediate.slice(s![.., 0, .., ..])
        );
    }

    #[test]
    fn missing_bias_defaults_to_zero() {
        let weight = Array4::from_elem((1, 2, 1, 1), 1.);
        let node = Node::Conv2d(Conv2d::new(weight, None, (1, 1), (0, 0)).unwrap());
        let input = ArrayD::from_elem(IxDyn(&[1, 2, 2, 2]), 2.);

        let d = dissect_conv(input.view(), &node, 0).unwrap();

        assert_eq!(d.bias, 0.);
        assert!(d.activation.iter().all(|&v| v == 4.));
        assert!(d.cumulative.slice(s![.., 2, .., ..]).iter().all(|&v| v == 4.));
    }

    #[test]
    fn bias_only_enters_last_cumulative_map() {
        let weight = Array4::from_elem((1, 1, 1, 1), 1.);
        let bias = Some(Array1::from_elem(1, 10.));
        let node = Node::Conv2d(Conv2d::new(weight, bias, (1, 1), (0, 0)).unwrap());
        let input = ArrayD::from_elem(IxDyn(&[1, 1, 1, 1]), 1.);

        let d = dissect_conv(input.view(), &node, 0).unwrap();

        assert_eq!(d.cumulative[[0, 0, 0, 0]], 1.);
        assert_eq!(d.cumulative[[0, 1, 0, 0]], 11.);
        assert_eq!(d.activation[[0, 0, 0, 0]], 11.);
    }

    #[test]
    fn rejects_channel_mismatch() {
        let mut rng = StdRng::seed_from_u64(5);
        let node = Node::Conv2d(random_conv(&mut rng, 3, 2, 1, 0));
        let input = random_input(&mut rng, &[1, 4, 5, 5]);

        let err = dissect_conv(input.view(), &node, 0).unwrap_err();
        assert!(matches!(
            err,
            DissectErr::ShapeMismatch {
                got: 4,
                expected: 3,
                ..
            }
        ));
    }

    #[test]
    fn rejects_non_convolutional_nodes_and_bad_inputs() {
        let mut rng = StdRng::seed_from_u64(9);
        let input = random_input(&mut rng, &[1, 3, 5, 5]);

        let linear = Node::Linear(Linear::random(3, 2, &mut rng).unwrap());
        assert!(matches!(
            dissect_conv(input.view(), &linear, 0),
            Err(DissectErr::UnsupportedNode { kind: "Linear" })
        ));

        let conv = Node::Conv2d(random_conv(&mut rng, 3, 2, 1, 0));
        assert!(matches!(
            dissect_conv(input.view(), &conv, 2),
            Err(DissectErr::IndexOutOfRange { got: 2, bound: 2, .. })
        ));

        let flat = random_input(&mut rng, &[1, 3]);
        assert!(matches!(
            dissect_conv(flat.view(), &conv, 0),
            Err(DissectErr::UnsupportedShape { rank: 2, .. })
        ));
    }
}
