//! Synthesis of inputs that maximize a chosen activation.
//!
//! The term comes from <https://distill.pub/2020/circuits/curve-detectors/#feature-visualization>.
use log::{debug, info};
use ndarray::{Array2, Array4, ArrayView2, ArrayView4, Axis, s};

use crate::{
    DissectErr, Result,
    configs::{Reduce, SuperstimulusConfig},
    error::expect_size,
    image,
    nn::{Conv2d, Linear, Node, Sequential, conv2d, conv2d_input_grad},
    tensor,
};

/// A scalar function of an input that a superstimulus should maximize.
pub trait Objective {
    /// Evaluates the objective.
    ///
    /// # Arguments
    /// * `x` - The input, `[1, C, H, W]`.
    ///
    /// # Returns
    /// The value of the objective and its gradient with respect to `x`.
    fn value_and_grad(&self, x: ArrayView4<f32>) -> Result<(f32, Array4<f32>)>;
}

impl<F> Objective for F
where
    F: Fn(ArrayView4<f32>) -> Result<(f32, Array4<f32>)>,
{
    fn value_and_grad(&self, x: ArrayView4<f32>) -> Result<(f32, Array4<f32>)> {
        self(x)
    }
}

/// The mean or max of one output channel of a convolution applied to the input.
#[derive(Debug, Clone, Copy)]
pub struct ConvChannelObjective<'a> {
    conv: &'a Conv2d,
    outer_idx: usize,
    reduce: Reduce,
}

impl<'a> ConvChannelObjective<'a> {
    pub fn new(node: &'a Node, outer_idx: usize, reduce: Reduce) -> Result<Self> {
        let Node::Conv2d(conv) = node else {
            return Err(DissectErr::UnsupportedNode { kind: node.kind() });
        };

        check_channel(outer_idx, conv.out_channels())?;

        Ok(Self {
            conv,
            outer_idx,
            reduce,
        })
    }
}

impl Objective for ConvChannelObjective<'_> {
    fn value_and_grad(&self, x: ArrayView4<f32>) -> Result<(f32, Array4<f32>)> {
        let (batch, _, h, w) = x.dim();
        expect_size("objective batch", batch, 1)?;

        let o = self.outer_idx;
        let kernel = self.conv.weight().slice(s![o..=o, .., .., ..]);
        let y = conv2d(
            x,
            kernel,
            self.conv.bias().map(|b| b.slice(s![o..=o])),
            self.conv.stride(),
            self.conv.padding(),
        )?;

        let (value, d) = reduce_with_grad(y.slice(s![0, 0, .., ..]), self.reduce)?;
        let d = d.insert_axis(Axis(0)).insert_axis(Axis(0));
        let grad = conv2d_input_grad(
            kernel,
            d.view(),
            (h, w),
            self.conv.stride(),
            self.conv.padding(),
        );
        Ok((value, grad))
    }
}

/// One output unit of a fully connected layer applied to the flattened input.
#[derive(Debug, Clone, Copy)]
pub struct LinearUnitObjective<'a> {
    linear: &'a Linear,
    unit: usize,
}

impl<'a> LinearUnitObjective<'a> {
    pub fn new(node: &'a Node, unit: usize) -> Result<Self> {
        let Node::Linear(linear) = node else {
            return Err(DissectErr::UnsupportedNode { kind: node.kind() });
        };

        if unit >= linear.out_features() {
            return Err(DissectErr::IndexOutOfRange {
                what: "unit",
                got: unit,
                bound: linear.out_features(),
            });
        }

        Ok(Self { linear, unit })
    }
}

impl Objective for LinearUnitObjective<'_> {
    fn value_and_grad(&self, x: ArrayView4<f32>) -> Result<(f32, Array4<f32>)> {
        expect_size("objective batch", x.dim().0, 1)?;
        expect_size("linear input features", x.len(), self.linear.in_features())?;

        let row = self.linear.weight().row(self.unit);
        let bias = self.linear.bias().map_or(0., |b| b[self.unit]);
        let value = x.iter().zip(row.iter()).map(|(a, b)| a * b).sum::<f32>() + bias;

        let grad = row.to_shape(x.raw_dim())?.into_owned();
        Ok((value, grad))
    }
}

/// A channel of any node of a model, as a function of the model's input.
///
/// Spatial activations are reduced to a scalar with the mean or the max of the channel, flat
/// ones take the unit's value.
#[derive(Debug, Clone)]
pub struct NodeObjective<'a> {
    net: &'a Sequential,
    node: String,
    outer_idx: usize,
    reduce: Reduce,
}

impl<'a> NodeObjective<'a> {
    /// Creates a new `NodeObjective`.
    ///
    /// # Arguments
    /// * `net` - The model the input goes through.
    /// * `node` - The name of the node whose activation is maximized.
    /// * `outer_idx` - The channel, or unit, of that activation.
    /// * `reduce` - How a spatial channel is reduced to a scalar.
    ///
    /// # Returns
    /// A new `NodeObjective` or an error if the node is unknown or, for the nodes that know
    /// their channel count, `outer_idx` is out of range.
    pub fn new(net: &'a Sequential, node: &str, outer_idx: usize, reduce: Reduce) -> Result<Self> {
        let channels = match net.node(node)? {
            Node::Conv2d(conv) => Some(conv.out_channels()),
            Node::Linear(linear) => Some(linear.out_features()),
            _ => None,
        };
        if let Some(bound) = channels {
            check_channel(outer_idx, bound)?;
        }

        Ok(Self {
            net,
            node: node.to_string(),
            outer_idx,
            reduce,
        })
    }
}

impl Objective for NodeObjective<'_> {
    fn value_and_grad(&self, x: ArrayView4<f32>) -> Result<(f32, Array4<f32>)> {
        expect_size("objective batch", x.dim().0, 1)?;

        let trace = self.net.trace(x.into_dyn(), &self.node)?;
        let activation = trace.output();
        let o = self.outer_idx;

        let (value, d) = match activation.ndim() {
            4 => {
                let activation = tensor::view4("objective activation", activation)?;
                check_channel(o, activation.dim().1)?;

                let channel = activation.slice(s![0, o, .., ..]);
                let (value, map) = reduce_with_grad(channel, self.reduce)?;
                let mut d = Array4::zeros(activation.raw_dim());
                d.slice_mut(s![0, o, .., ..]).assign(&map);
                (value, d.into_dyn())
            }
            2 => {
                let activation = tensor::view2("objective activation", activation)?;
                check_channel(o, activation.ncols())?;

                let mut d = Array2::zeros(activation.raw_dim());
                d[[0, o]] = 1.;
                (activation[[0, o]], d.into_dyn())
            }
            rank => {
                return Err(DissectErr::UnsupportedShape {
                    what: "objective activation",
                    rank,
                });
            }
        };

        let grad = trace.backward(d.view())?;
        Ok((value, tensor::view4("objective gradient", grad.view())?.to_owned()))
    }
}

/// Gets a superstimulus for each objective.
///
/// Each one starts from a copy of `initial` and follows the optimizer to maximize its
/// objective, optionally penalizing the total variation of the input.
///
/// # Arguments
/// * `objectives` - The scalars to maximize.
/// * `initial` - The starting point, `[1, C, H, W]`, usually noise from the training
///   distribution.
/// * `config` - The search settings.
///
/// # Returns
/// One superstimulus per objective, in order.
pub fn superstimuli(
    objectives: &[&dyn Objective],
    initial: ArrayView4<f32>,
    config: &SuperstimulusConfig,
) -> Result<Vec<Array4<f32>>> {
    expect_size("superstimulus batch", initial.dim().0, 1)?;
    let dim = initial.raw_dim();

    objectives
        .iter()
        .enumerate()
        .map(|(i, objective)| {
            info!("optimizing superstimulus {i} for {} iteration(s)", config.iterations);

            let mut values: Vec<f32> = initial.iter().copied().collect();
            let mut grad = vec![0.; values.len()];
            let mut optimizer = config.optimizer.build(values.len());

            for step in 0..config.iterations {
                let x = ArrayView4::from_shape(dim, &values)?;
                let (value, objective_grad) = objective.value_and_grad(x)?;
                expect_size("objective gradient", objective_grad.len(), values.len())?;

                grad.iter_mut()
                    .zip(objective_grad.iter())
                    .for_each(|(g, og)| *g = -og);

                if config.total_variation {
                    let tv_grad = image::total_variation_grad(x.index_axis(Axis(0), 0));
                    grad.iter_mut()
                        .zip(tv_grad.iter())
                        .for_each(|(g, t)| *g += config.tv_coefficient * t);
                }

                if step == 0 || step + 1 == config.iterations {
                    debug!("superstimulus {i} step {step}: objective {value}");
                }

                optimizer.update_weights(&grad, &mut values)?;
            }

            Ok(Array4::from_shape_vec(dim, values)?)
        })
        .collect()
}

/// Reduces a channel to a scalar, with the gradient of that scalar with respect to the channel.
fn reduce_with_grad(map: ArrayView2<f32>, reduce: Reduce) -> Result<(f32, Array2<f32>)> {
    if map.is_empty() {
        return Err(DissectErr::EmptyDim {
            what: "activation spatial extent",
        });
    }

    match reduce {
        Reduce::Mean => {
            let coef = 1. / map.len() as f32;
            Ok((map.sum() * coef, Array2::from_elem(map.raw_dim(), coef)))
        }
        Reduce::Max => {
            let (ij, max) = map
                .indexed_iter()
                .fold(None, |best: Option<((usize, usize), f32)>, (ij, &v)| match best {
                    Some((_, b)) if b >= v => best,
                    _ => Some((ij, v)),
                })
                .ok_or(DissectErr::EmptyDim {
                    what: "activation spatial extent",
                })?;

            let mut grad = Array2::zeros(map.raw_dim());
            grad[ij] = 1.;
            Ok((max, grad))
        }
    }
}

fn check_channel(outer_idx: usize, bound: usize) -> Result<()> {
    if outer_idx >= bound {
        return Err(DissectErr::IndexOutOfRange {
            what: "outer_idx",
            got: outer_idx,
            bound,
        });
    }

    Ok(())
}
