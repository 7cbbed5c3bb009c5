mod conv2d;
mod convnet;
mod init;
mod linear;
mod node;
mod pool;
mod sequential;

pub use conv2d::{Conv2d, conv2d};
pub use convnet::simple_convnet;
pub use linear::Linear;
pub use node::Node;
pub use pool::{MaxPool2d, flatten, log_softmax, relu};
pub use sequential::{Sequential, Trace};

pub(crate) use conv2d::{conv2d_input_grad, output_size};

fn pair(v: usize) -> (usize, usize) {
    (v, v)
}
