use rand::Rng;

use super::{Conv2d, Linear, MaxPool2d, Node, Sequential};
use crate::Result;

/// Builds the reference MNIST convnet, randomly initialized.
///
/// Expects `[B, 1, 28, 28]` inputs. Its nodes are named `conv1`, `conv1_relu`, `conv1_pool`,
/// `conv2`, `conv2_relu`, `conv2_pool`, `conv3`, `conv3_relu`, `conv3_pool`, `conv3_flattened`,
/// `fc4`, `fc4_relu`, `fc5` and `fc5_softmax`.
pub fn simple_convnet<R: Rng>(rng: &mut R) -> Result<Sequential> {
    let nodes: Vec<(&str, Node)> = vec![
        // [1, 28, 28]
        ("conv1", Conv2d::random(1, 8, 5, 1, 2, rng)?.into()),
        ("conv1_relu", Node::Relu),
        ("conv1_pool", MaxPool2d::new((2, 2), (2, 2), (0, 0))?.into()),
        // [8, 14, 14]
        ("conv2", Conv2d::random(8, 16, 5, 1, 2, rng)?.into()),
        ("conv2_relu", Node::Relu),
        ("conv2_pool", MaxPool2d::new((2, 2), (2, 2), (0, 0))?.into()),
        // [16, 7, 7]
        ("conv3", Conv2d::random(16, 24, 5, 1, 0, rng)?.into()),
        ("conv3_relu", Node::Relu),
        ("conv3_pool", MaxPool2d::new((3, 3), (3, 3), (0, 0))?.into()),
        // [24, 1, 1]
        ("conv3_flattened", Node::Flatten),
        ("fc4", Linear::random(24, 16, rng)?.into()),
        ("fc4_relu", Node::Relu),
        ("fc5", Linear::random(16, 10, rng)?.into()),
        ("fc5_softmax", Node::LogSoftmax),
    ];

    Ok(Sequential::new(nodes))
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::DissectErr;

    #[test]
    fn partial_forward_yields_documented_shapes() {
        let net = simple_convnet(&mut StdRng::seed_from_u64(7)).unwrap();
        let x = ArrayD::<f32>::ones(IxDyn(&[2, 1, 28, 28]));

        let expected: [(&str, &[usize]); 6] = [
            ("conv1", &[2, 8, 28, 28]),
            ("conv1_pool", &[2, 8, 14, 14]),
            ("conv2_pool", &[2, 16, 7, 7]),
            ("conv3", &[2, 24, 3, 3]),
            ("conv3_flattened", &[2, 24]),
            ("fc5_softmax", &[2, 10]),
        ];

        for (name, shape) in expected {
            let y = net.partial_forward(x.view(), name).unwrap();
            assert_eq!(y.shape(), shape, "{name}");
        }
    }

    #[test]
    fn input_to_returns_previous_activation() {
        let net = simple_convnet(&mut StdRng::seed_from_u64(7)).unwrap();
        let x = ArrayD::<f32>::ones(IxDyn(&[1, 1, 28, 28]));

        let before = net.input_to(x.view(), "conv2").unwrap();
        let after_pool = net.partial_forward(x.view(), "conv1_pool").unwrap();
        assert_eq!(before, after_pool);
    }

    #[test]
    fn unknown_node_is_an_error() {
        let net = simple_convnet(&mut StdRng::seed_from_u64(7)).unwrap();
        let x = ArrayD::<f32>::ones(IxDyn(&[1, 1, 28, 28]));

        let err = net.partial_forward(x.view(), "conv4").unwrap_err();
        assert!(matches!(err, DissectErr::UnknownNode(name) if name == "conv4"));
    }
}
