use log::debug;
use ndarray::{Array1, Array3, Array4, s};

use crate::{
    DissectErr, Result,
    image::{self, GRID_PADDING},
    nn::Node,
};

/// The kernels of a convolution as one channel tiles.
#[derive(Debug, Clone)]
pub struct KernelTiles {
    /// `[N, 1, kH, kW]`, outer channel major.
    pub tiles: Array4<f32>,
    /// The whole bias vector, or the single bias of the selected outer channel.
    pub bias: Option<Array1<f32>>,
}

impl KernelTiles {
    /// Tiles the kernels into a normalized grid, `num_cols` kernels per row.
    pub fn grid(&self, num_cols: usize) -> Result<Array3<f32>> {
        let grid = image::make_grid(self.tiles.view(), num_cols, GRID_PADDING)?;
        Ok(image::normalize(grid.view()))
    }
}

/// Gets the kernels of a node so that each one can be looked at on its own.
///
/// # Arguments
/// * `node` - The node, must be a `Conv2d`.
/// * `outer_idx` - Only take the kernels of this output channel, if given.
pub fn kernel_tiles(node: &Node, outer_idx: Option<usize>) -> Result<KernelTiles> {
    let Node::Conv2d(conv) = node else {
        return Err(DissectErr::UnsupportedNode { kind: node.kind() });
    };

    let (out_channels, in_channels, kh, kw) = conv.weight().dim();
    let (weight, bias) = match outer_idx {
        Some(o) if o >= out_channels => {
            return Err(DissectErr::IndexOutOfRange {
                what: "outer_idx",
                got: o,
                bound: out_channels,
            });
        }
        Some(o) => (
            conv.weight().slice(s![o..=o, .., .., ..]),
            conv.bias().map(|b| b.slice(s![o..=o]).to_owned()),
        ),
        None => (conv.weight().view(), conv.bias().cloned()),
    };

    let n = weight.dim().0 * in_channels;
    debug!("{n} kernel tile(s) of {kh}x{kw}");

    Ok(KernelTiles {
        tiles: weight.to_shape((n, 1, kh, kw))?.into_owned(),
        bias,
    })
}
