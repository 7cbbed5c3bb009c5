use log::debug;
use ndarray::{ArrayD, ArrayViewD};

use super::Node;
use crate::{DissectErr, Result, error::expect_shape};

/// A sequential model whose nodes can be addressed by name, so that the activation of any
/// intermediate node can be inspected.
#[derive(Debug, Clone)]
pub struct Sequential {
    nodes: Vec<(String, Node)>,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `nodes` - The named nodes the sequential is composed of, in forward order.
    ///
    /// # Returns
    /// A new `Sequential` instance.
    pub fn new<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = (S, Node)>,
        S: Into<String>,
    {
        Self {
            nodes: nodes
                .into_iter()
                .map(|(name, node)| (name.into(), node))
                .collect(),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|(name, _)| name.as_str())
    }

    /// Looks a node up by name.
    pub fn node(&self, name: &str) -> Result<&Node> {
        let i = self.position(name)?;
        Ok(&self.nodes[i].1)
    }

    /// Makes a forward pass through every node.
    pub fn forward(&self, x: ArrayViewD<f32>) -> Result<ArrayD<f32>> {
        self.run(x, self.nodes.len())
    }

    /// Makes a forward pass that stops right after the named node.
    ///
    /// # Arguments
    /// * `x` - The input to the model.
    /// * `name` - The node whose output is wanted.
    ///
    /// # Returns
    /// The activation of the named node or `UnknownNode` if there's no such node.
    pub fn partial_forward(&self, x: ArrayViewD<f32>, name: &str) -> Result<ArrayD<f32>> {
        let i = self.position(name)?;
        self.run(x, i + 1)
    }

    /// Makes a forward pass that stops right before the named node.
    ///
    /// # Returns
    /// The input the named node receives.
    pub fn input_to(&self, x: ArrayViewD<f32>, name: &str) -> Result<ArrayD<f32>> {
        let i = self.position(name)?;
        self.run(x, i)
    }

    /// Makes a forward pass that stops right after the named node, keeping what every node
    /// received so the pass can be backpropagated.
    pub fn trace(&self, x: ArrayViewD<f32>, name: &str) -> Result<Trace<'_>> {
        let i = self.position(name)?;
        let nodes = &self.nodes[..=i];

        let mut inputs = Vec::with_capacity(nodes.len());
        let mut y = x.to_owned();
        for (name, node) in nodes {
            let next = node.forward(y.view())?;
            debug!("{name} -> {:?}", next.shape());
            inputs.push(y);
            y = next;
        }

        Ok(Trace {
            nodes,
            inputs,
            output: y,
        })
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.nodes
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| DissectErr::UnknownNode(name.to_string()))
    }

    fn run(&self, x: ArrayViewD<f32>, count: usize) -> Result<ArrayD<f32>> {
        let mut y = x.to_owned();
        for (name, node) in &self.nodes[..count] {
            y = node.forward(y.view())?;
            debug!("{name} -> {:?}", y.shape());
        }

        Ok(y)
    }
}

/// A forward pass up to some node, with the input of every node on the way.
#[derive(Debug)]
pub struct Trace<'a> {
    nodes: &'a [(String, Node)],
    inputs: Vec<ArrayD<f32>>,
    output: ArrayD<f32>,
}

impl Trace<'_> {
    /// The activation of the last traced node.
    pub fn output(&self) -> ArrayViewD<'_, f32> {
        self.output.view()
    }

    /// Backpropagates a gradient on the traced output down to the model's input.
    ///
    /// # Arguments
    /// * `d` - The gradient of some scalar with respect to the output, shaped like it.
    ///
    /// # Returns
    /// The gradient of that scalar with respect to the model's input.
    pub fn backward(&self, d: ArrayViewD<f32>) -> Result<ArrayD<f32>> {
        expect_shape("traced output delta", d.shape(), self.output.shape())?;

        self.nodes
            .iter()
            .zip(&self.inputs)
            .rev()
            .try_fold(d.to_owned(), |d, ((name, node), x)| {
                debug!("{name} <- {:?}", d.shape());
                node.backward(x.view(), d.view())
            })
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array, Array1, Array2, Array4, IxDyn};

    use super::*;
    use crate::nn::{Conv2d, Linear, MaxPool2d};

    fn smooth_net() -> Sequential {
        let kernels = Array::from_shape_fn((3, 1, 2, 2), |(o, _, i, j)| {
            ((o * 4 + i * 2 + j) as f32 * 0.9).sin()
        });
        let weight = Array2::from_shape_fn((2, 27), |(u, k)| ((u * 27 + k) as f32 * 0.3).cos());

        Sequential::new([
            ("conv", Conv2d::new(kernels, None, (1, 1), (0, 0)).unwrap().into()),
            ("flatten", Node::Flatten),
            ("fc", Linear::new(weight, Some(Array1::zeros(2))).unwrap().into()),
            ("log_softmax", Node::LogSoftmax),
        ])
    }

    #[test]
    fn trace_output_matches_partial_forward() {
        let net = smooth_net();
        let x = ArrayD::from_shape_fn(IxDyn(&[2, 1, 4, 4]), |ix| (ix[2] * 4 + ix[3]) as f32);

        let trace = net.trace(x.view(), "fc").unwrap();
        assert_eq!(trace.output(), net.partial_forward(x.view(), "fc").unwrap());
        assert!(net.trace(x.view(), "missing").is_err());
    }

    #[test]
    fn backward_matches_finite_differences() {
        let net = smooth_net();
        let x = ArrayD::from_shape_fn(IxDyn(&[1, 1, 4, 4]), |ix| {
            ((ix[2] * 4 + ix[3]) as f32 * 0.4).sin() * 0.2
        });

        // The scalar is the log probability of the first class.
        let mut d = ArrayD::zeros(IxDyn(&[1, 2]));
        d[[0, 0]] = 1.;
        let dx = net.trace(x.view(), "log_softmax").unwrap().backward(d.view()).unwrap();
        assert_eq!(dx.shape(), x.shape());

        let scalar = |x: &ArrayD<f32>| net.forward(x.view()).unwrap()[[0, 0]];
        let eps = 1e-2;
        for (ix, &g) in dx.indexed_iter() {
            let mut plus = x.clone();
            plus[&ix] += eps;
            let mut minus = x.clone();
            minus[&ix] -= eps;

            let numeric = (scalar(&plus) - scalar(&minus)) / (2. * eps);
            assert!((numeric - g).abs() < 1e-2, "{ix:?}: {numeric} vs {g}");
        }
    }

    #[test]
    fn backward_goes_through_relu_and_pooling() {
        let net = Sequential::new([
            ("relu", Node::Relu),
            ("pool", MaxPool2d::new((2, 2), (2, 2), (0, 0)).unwrap().into()),
        ]);
        let x = Array::from_shape_vec((1, 1, 2, 4), vec![-1., 3., -2., -5., 0., 1., -2., -3.])
            .unwrap()
            .into_dyn();

        let trace = net.trace(x.view(), "pool").unwrap();
        let dx = trace.backward(Array4::ones((1, 1, 1, 2)).into_dyn().view()).unwrap();

        // The second window is all negative: its maximum is a zero the relu gives no gradient.
        let expected = Array::from_shape_vec((1, 1, 2, 4), vec![0., 1., 0., 0., 0., 0., 0., 0.])
            .unwrap()
            .into_dyn();
        assert_eq!(dx, expected);
    }
}
