//! Small image helpers shared by the visualizations: normalization, tiling, total variation.
use ndarray::{Array, Array3, Array4, ArrayView, ArrayView3, ArrayView4, Dimension, s};

use crate::{DissectErr, Result, error::expect_size};

/// The padding between tiles of a grid, in pixels.
pub const GRID_PADDING: usize = 2;

/// Maps `x` linearly so that its minimum becomes 0 and its maximum 1.
///
/// A constant `x` maps to zeros.
pub fn normalize<D: Dimension>(x: ArrayView<f32, D>) -> Array<f32, D> {
    let min = x.fold(f32::INFINITY, |acc, &v| acc.min(v));
    let max = x.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
    let range = max - min;

    if !range.is_finite() || range == 0. {
        return Array::zeros(x.raw_dim());
    }

    x.mapv(|v| (v - min) / range)
}

/// Tiles a batch of images into a single image.
///
/// Tiles are laid out left to right, then top to bottom, `nrow` per row, each surrounded by
/// `padding` zero pixels. A single tile is returned as is.
///
/// # Arguments
/// * `tiles` - The images, `[N, C, H, W]`.
/// * `nrow` - The amount of tiles per row.
/// * `padding` - The space between tiles.
///
/// # Returns
/// The grid, `[C, ymaps * (H + padding) + padding, xmaps * (W + padding) + padding]`.
pub fn make_grid(tiles: ArrayView4<f32>, nrow: usize, padding: usize) -> Result<Array3<f32>> {
    let (n, c, h, w) = tiles.dim();

    if nrow == 0 {
        return Err(DissectErr::InvalidConfig(
            "grid must have at least one column".into(),
        ));
    }

    if n == 0 {
        return Err(DissectErr::EmptyDim { what: "grid tiles" });
    }

    if n == 1 {
        return Ok(tiles.index_axis(ndarray::Axis(0), 0).to_owned());
    }

    let xmaps = nrow.min(n);
    let ymaps = n.div_ceil(xmaps);
    let (cell_h, cell_w) = (h + padding, w + padding);

    let mut grid = Array3::zeros((c, ymaps * cell_h + padding, xmaps * cell_w + padding));
    for (k, tile) in tiles.outer_iter().enumerate() {
        let (y, x) = ((k / xmaps) * cell_h + padding, (k % xmaps) * cell_w + padding);
        grid.slice_mut(s![.., y..y + h, x..x + w]).assign(&tile);
    }

    Ok(grid)
}

/// Sums the absolute differences between horizontally and vertically adjacent pixels.
///
/// # Arguments
/// * `img` - The image, `[C, H, W]`.
pub fn total_variation(img: ArrayView3<f32>) -> f32 {
    let dx = &img.slice(s![.., .., ..-1]) - &img.slice(s![.., .., 1..]);
    let dy = &img.slice(s![.., ..-1, ..]) - &img.slice(s![.., 1.., ..]);
    dx.mapv(f32::abs).sum() + dy.mapv(f32::abs).sum()
}

/// Returns the (sub)gradient of [`total_variation`] with respect to each pixel.
///
/// Equal neighbours contribute nothing.
pub fn total_variation_grad(img: ArrayView3<f32>) -> Array3<f32> {
    let mut grad = Array3::zeros(img.raw_dim());
    let (_, h, w) = img.dim();

    if w > 1 {
        let dx = (&img.slice(s![.., .., ..-1]) - &img.slice(s![.., .., 1..])).mapv(sign);
        grad.slice_mut(s![.., .., ..-1]).zip_mut_with(&dx, |g, &d| *g += d);
        grad.slice_mut(s![.., .., 1..]).zip_mut_with(&dx, |g, &d| *g -= d);
    }

    if h > 1 {
        let dy = (&img.slice(s![.., ..-1, ..]) - &img.slice(s![.., 1.., ..])).mapv(sign);
        grad.slice_mut(s![.., ..-1, ..]).zip_mut_with(&dy, |g, &d| *g += d);
        grad.slice_mut(s![.., 1.., ..]).zip_mut_with(&dy, |g, &d| *g -= d);
    }

    grad
}

/// Converts an RGBA image with values in `[0, 1]` to interleaved bytes.
///
/// # Arguments
/// * `img` - The image, `[4, H, W]`.
///
/// # Returns
/// The pixels, `[H, W, 4]`.
pub fn to_rgba8(img: ArrayView3<f32>) -> Result<Array3<u8>> {
    expect_size("rgba channels", img.dim().0, 4)?;

    let hwc = img.permuted_axes([1, 2, 0]);
    Ok(hwc.mapv(|v| (v.clamp(0., 1.) * 255.) as u8))
}

/// Converts a batch of grayscale, RGB or RGBA images to opaque RGBA.
///
/// # Arguments
/// * `images` - The images, `[B, C, H, W]` with `C` in 1, 3 or 4.
///
/// # Returns
/// The images, `[B, 4, H, W]`.
pub fn to_rgba(images: ArrayView4<f32>) -> Result<Array4<f32>> {
    let (b, c, h, w) = images.dim();
    let mut rgba = Array4::ones((b, 4, h, w));

    match c {
        1 => {
            for k in 0..3 {
                rgba.slice_mut(s![.., k..=k, .., ..]).assign(&images);
            }
        }
        3 | 4 => rgba.slice_mut(s![.., ..c, .., ..]).assign(&images),
        _ => {
            return Err(DissectErr::ShapeMismatch {
                what: "image channels",
                got: c,
                expected: 4,
            });
        }
    }

    Ok(rgba)
}

fn sign(v: f32) -> f32 {
    if v > 0. {
        1.
    } else if v < 0. {
        -1.
    } else {
        0.
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn normalize_maps_to_unit_range() {
        let x = array![[-1., 0.], [1., 3.]];
        assert_eq!(normalize(x.view()), array![[0., 0.25], [0.5, 1.]]);
    }

    #[test]
    fn normalize_constant_is_zero() {
        let x = array![2., 2., 2.];
        assert_eq!(normalize(x.view()), array![0., 0., 0.]);
    }

    #[test]
    fn make_grid_places_tiles_row_major() {
        let mut tiles = Array4::<f32>::zeros((5, 1, 2, 3));
        for (k, mut tile) in tiles.outer_iter_mut().enumerate() {
            tile.fill(k as f32 + 1.);
        }

        let grid = make_grid(tiles.view(), 3, 2).unwrap();

        // 3 columns, 2 rows.
        assert_eq!(grid.dim(), (1, 2 * 4 + 2, 3 * 5 + 2));
        assert_eq!(grid[[0, 2, 2]], 1.);
        assert_eq!(grid[[0, 2, 7]], 2.);
        assert_eq!(grid[[0, 6, 7]], 5.);
        // Padding and the unused last cell stay empty.
        assert_eq!(grid[[0, 0, 0]], 0.);
        assert_eq!(grid[[0, 6, 12]], 0.);
    }

    #[test]
    fn make_grid_single_tile_is_unpadded() {
        let tiles = Array4::<f32>::ones((1, 3, 4, 4));
        assert_eq!(make_grid(tiles.view(), 8, 2).unwrap().dim(), (3, 4, 4));
    }

    #[test]
    fn make_grid_rejects_zero_columns() {
        let tiles = Array4::<f32>::ones((2, 1, 4, 4));
        assert!(make_grid(tiles.view(), 0, 2).is_err());
    }

    #[test]
    fn total_variation_of_step() {
        let img = array![[[0., 0., 1.], [0., 0., 1.]]];
        assert_eq!(total_variation(img.view()), 2.);
    }

    #[test]
    fn total_variation_grad_matches_finite_differences() {
        let img = array![[[0.1, 0.7, -0.3], [0.4, -0.2, 0.9]], [[1.0, 0.5, 0.2], [0.3, 0.8, -0.6]]];
        let grad = total_variation_grad(img.view());
        let eps = 1e-3;

        for ((c, i, j), &g) in grad.indexed_iter() {
            let mut plus = img.clone();
            plus[[c, i, j]] += eps;
            let mut minus = img.clone();
            minus[[c, i, j]] -= eps;

            let diff = total_variation(plus.view()) - total_variation(minus.view());
            let numeric = diff / (2. * eps);
            assert!((numeric - g).abs() < 1e-2, "({c}, {i}, {j}): {numeric} vs {g}");
        }
    }

    #[test]
    fn grayscale_to_rgba_is_opaque() {
        let gray = Array4::from_elem((2, 1, 3, 3), 0.25);
        let rgba = to_rgba(gray.view()).unwrap();

        assert_eq!(rgba.dim(), (2, 4, 3, 3));
        assert!(rgba.slice(s![.., ..3, .., ..]).iter().all(|&v| v == 0.25));
        assert!(rgba.slice(s![.., 3, .., ..]).iter().all(|&v| v == 1.));
        assert!(to_rgba(Array4::zeros((1, 2, 1, 1)).view()).is_err());
    }

    #[test]
    fn to_rgba8_interleaves_channels() {
        let img = Array3::from_shape_fn((4, 1, 2), |(c, _, x)| if c == x { 1. } else { 0.5 });
        let bytes = to_rgba8(img.view()).unwrap();

        assert_eq!(bytes.dim(), (1, 2, 4));
        assert_eq!(bytes[[0, 0, 0]], 255);
        assert_eq!(bytes[[0, 0, 1]], 127);
        assert_eq!(bytes[[0, 1, 1]], 255);
    }
}
