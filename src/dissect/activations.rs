use std::cmp::Ordering;

use log::{debug, info};
use ndarray::{Array3, Array4, ArrayD, ArrayView2, ArrayView4, ArrayViewD, Axis, s, stack};

use crate::{
    DissectErr, Result,
    configs::{Reduce, SelectionParams},
    error::expect_size,
    image::{self, GRID_PADDING},
    tensor,
};

/// An input together with the score its activation got.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivationRecord {
    /// The position of the input in the batch.
    pub index: usize,
    /// `[C, H, W]`
    pub input: ArrayD<f32>,
    pub score: f32,
}

/// Gets the `k` inputs whose activation at `params.outer_idx` is the largest.
///
/// Flat activations score an input by the activation of the selected channel, spatial ones by
/// reducing the selected channel's map with `params.reduce`.
///
/// # Arguments
/// * `inputs` - The inputs, `[B, C, H, W]`.
/// * `activations` - The activations of the inputs, `[B, C]` or `[B, C, H, W]`.
/// * `k` - The amount of records to return.
/// * `params` - Which channel to rank by and how to reduce spatial activations.
///
/// # Returns
/// The `min(k, B)` best records sorted by descending score, equal scores keep the batch order.
pub fn max_activations(
    inputs: ArrayViewD<f32>,
    activations: ArrayViewD<f32>,
    k: usize,
    params: &SelectionParams,
) -> Result<Vec<ActivationRecord>> {
    let batch = tensor::batch_size("inputs", &inputs)?;
    expect_size(
        "activations batch",
        tensor::batch_size("activations", &activations)?,
        batch,
    )?;
    let inputs = tensor::view4("inputs", inputs)?;

    let scores = match activations.ndim() {
        2 => flat_scores(tensor::view2("activations", activations)?, params)?,
        4 => spatial_scores(tensor::view4("activations", activations)?, params)?,
        rank => {
            return Err(DissectErr::UnsupportedShape {
                what: "activations",
                rank,
            });
        }
    };

    let mut ranked: Vec<(usize, f32)> = scores.into_iter().enumerate().collect();
    // `sort_by` is stable, so ties stay in batch order.
    ranked.sort_by(|a, b| descending(a.1, b.1));
    ranked.truncate(k);
    info!("selected {} of {batch} input(s)", ranked.len());

    let records = ranked
        .into_iter()
        .map(|(index, score)| ActivationRecord {
            index,
            input: inputs.index_axis(Axis(0), index).to_owned().into_dyn(),
            score,
        })
        .collect();

    Ok(records)
}

/// Tiles the inputs of the given records into a normalized grid.
pub fn records_grid(records: &[ActivationRecord], num_cols: usize) -> Result<Array3<f32>> {
    let views: Vec<_> = records.iter().map(|r| r.input.view()).collect();
    if views.is_empty() {
        return Err(DissectErr::EmptyDim { what: "records" });
    }

    let stacked = stack(Axis(0), &views)?;
    let grid = image::make_grid(
        tensor::view4("record inputs", stacked.view())?,
        num_cols,
        GRID_PADDING,
    )?;
    Ok(image::normalize(grid.view()))
}

/// The two grids that show a batch of inputs next to their activations.
#[derive(Debug, Clone)]
pub struct ActivationGrids {
    /// One input per grid row group, `[C_in, H', W']`.
    pub inputs: Array3<f32>,
    /// Every channel of every activation as a one channel tile, `[1, H'', W'']`.
    pub activations: Array3<f32>,
    /// The amount of grid rows each input spans.
    pub rows_per_input: usize,
}

/// Lays a batch of inputs and their activations out so that each input lines up with the
/// rows that hold its activation channels.
///
/// # Arguments
/// * `inputs` - The inputs, `[B, C_in, H, W]`.
/// * `activations` - The activations, `[B, C, aH, aW]`.
/// * `num_cols` - The maximum amount of activation channels per row.
pub fn activation_grids(
    inputs: ArrayView4<f32>,
    activations: ArrayView4<f32>,
    num_cols: usize,
) -> Result<ActivationGrids> {
    let (batch, in_channels, h, w) = inputs.dim();
    let (act_batch, channels, ah, aw) = activations.dim();
    expect_size("activations batch", act_batch, batch)?;

    if channels == 0 {
        return Err(DissectErr::EmptyDim {
            what: "activation channels",
        });
    }

    let num_cols = num_cols.min(channels);
    if num_cols == 0 {
        return Err(DissectErr::InvalidConfig(
            "activation grid must have at least one column".into(),
        ));
    }

    let rows_per_input = channels.div_ceil(num_cols);
    debug!("{rows_per_input} row(s) of {num_cols} activation(s) per input");

    let mut inputs_padded = Array4::zeros((batch * rows_per_input, in_channels, h, w));
    for (i, input) in inputs.outer_iter().enumerate() {
        inputs_padded
            .index_axis_mut(Axis(0), i * rows_per_input)
            .assign(&input);
    }

    let cells = rows_per_input * num_cols;
    let mut activations_padded = Array4::zeros((batch * cells, 1, ah, aw));
    for (i, activation) in activations.outer_iter().enumerate() {
        let first = i * cells;
        activations_padded
            .slice_mut(s![first..first + channels, 0, .., ..])
            .assign(&activation);
    }

    Ok(ActivationGrids {
        inputs: image::make_grid(inputs_padded.view(), 1, GRID_PADDING)?,
        activations: image::make_grid(activations_padded.view(), num_cols, GRID_PADDING)?,
        rows_per_input,
    })
}

fn outer_idx(params: &SelectionParams, channels: usize) -> Result<usize> {
    let idx = params.outer_idx.ok_or(DissectErr::MissingParam("outer_idx"))?;

    if idx >= channels {
        return Err(DissectErr::IndexOutOfRange {
            what: "outer_idx",
            got: idx,
            bound: channels,
        });
    }

    Ok(idx)
}

fn flat_scores(activations: ArrayView2<f32>, params: &SelectionParams) -> Result<Vec<f32>> {
    let idx = outer_idx(params, activations.ncols())?;
    Ok(activations.column(idx).to_vec())
}

fn spatial_scores(activations: ArrayView4<f32>, params: &SelectionParams) -> Result<Vec<f32>> {
    let (_, channels, h, w) = activations.dim();
    let idx = outer_idx(params, channels)?;

    let extent = h * w;
    if extent == 0 {
        return Err(DissectErr::EmptyDim {
            what: "activation spatial extent",
        });
    }

    let scores = activations
        .index_axis(Axis(1), idx)
        .outer_iter()
        .map(|map| match params.reduce {
            Reduce::Mean => map.sum() / extent as f32,
            // A NaN anywhere in the map makes the score NaN.
            Reduce::Max => map.fold(f32::NEG_INFINITY, |acc, &v| {
                if v > acc || v.is_nan() { v } else { acc }
            }),
        })
        .collect();

    Ok(scores)
}

/// Orders scores from greatest to lowest, NaN last.
fn descending(a: f32, b: f32) -> Ordering {
    let key = |v: f32| if v.is_nan() { f32::NEG_INFINITY } else { v };
    key(b).partial_cmp(&key(a)).unwrap_or(Ordering::Equal)
}
