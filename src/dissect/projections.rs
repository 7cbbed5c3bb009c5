//! Projection of fully connected activations into a 3D sprite scene.
//!
//! Activations of a fully connected node are treated as embeddings of the inputs that produced
//! them. A pipe of projections maps them down to two or three dimensions and each input is
//! drawn as a sprite at its projected position.
use log::{debug, info};
use ndarray::{
    Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView4, ArrayViewD, Axis, Zip, s,
};
use ndarray_rand::RandomExt;
use rand_distr::Normal;
use rand::Rng;

use crate::{
    DissectErr, Result,
    configs::ProjectionConfig,
    error::expect_size,
    image,
    payload::{AtlasDescriptor, GridShape, Size, SpriteScenePayload},
    tensor,
};

const POWER_ITERATIONS: usize = 1000;
const POWER_TOLERANCE: f32 = 1e-7;

const EXAGGERATION: f32 = 12.;
const EXAGGERATION_ITERATIONS: usize = 250;
const PERPLEXITY_SEARCH_STEPS: usize = 50;

/// The inputs tiled into a square grid, one sprite per input.
#[derive(Debug, Clone)]
pub struct Atlas {
    /// `[4, rows * H, cols * W]`
    pub pixels: Array3<f32>,
    pub rows: usize,
    pub cols: usize,
    pub num_sprites: usize,
    pub sprite_size: (usize, usize),
}

impl Atlas {
    /// Places `inputs` (`[B, 4, H, W]`) left to right, then top to bottom.
    pub fn build(inputs: ArrayView4<f32>) -> Result<Self> {
        let (num_sprites, channels, h, w) = inputs.dim();
        expect_size("atlas channels (RGBA)", channels, 4)?;

        if num_sprites == 0 {
            return Err(DissectErr::EmptyDim { what: "atlas sprites" });
        }

        let cols = (num_sprites as f64).sqrt().ceil() as usize;
        let rows = cols;

        let mut pixels = Array3::zeros((4, rows * h, cols * w));
        for (k, sprite) in inputs.outer_iter().enumerate() {
            let (y, x) = ((k / cols) * h, (k % cols) * w);
            pixels.slice_mut(s![.., y..y + h, x..x + w]).assign(&sprite);
        }
        debug!("atlas of {rows}x{cols} sprite(s) of {h}x{w}");

        Ok(Self {
            pixels,
            rows,
            cols,
            num_sprites,
            sprite_size: (h, w),
        })
    }

    /// The atlas as `[H, W, 4]` bytes, ready to be encoded as an image.
    pub fn to_rgba8(&self) -> Result<Array3<u8>> {
        image::to_rgba8(self.pixels.view())
    }

    pub fn descriptor(&self, path: impl Into<String>) -> AtlasDescriptor {
        AtlasDescriptor {
            path: path.into(),
            shape: GridShape {
                rows: self.rows,
                cols: self.cols,
            },
            num_sprites: self.num_sprites,
            sprite_size: Size {
                height: self.sprite_size.0,
                width: self.sprite_size.1,
            },
        }
    }
}

/// Runs each projection of `pipe` on the output of the previous one.
///
/// # Arguments
/// * `embedding` - The embedding, `[B, D]`.
/// * `pipe` - The projections, in order.
/// * `rng` - Seeds the stochastic projections.
pub fn project<R: Rng>(
    embedding: ArrayView2<f32>,
    pipe: &[ProjectionConfig],
    rng: &mut R,
) -> Result<Array2<f32>> {
    info!("initial embedding {:?}", embedding.shape());

    pipe.iter().try_fold(embedding.to_owned(), |embedding, projection| {
        let (n, d) = embedding.dim();
        let k = projection.n_components();

        if k == 0 || k > d {
            return Err(DissectErr::InvalidConfig(format!(
                "n_components for {} has to be in 1..={d}, the dimensionality of the previous \
                 projection, got {k}",
                projection.name()
            )));
        }

        let projected = match *projection {
            ProjectionConfig::Pca { n_components } => pca(embedding.view(), n_components),
            ProjectionConfig::Tsne {
                n_components,
                perplexity,
                iterations,
                learning_rate,
            } => {
                let params = TsneParams {
                    n_components,
                    perplexity,
                    iterations,
                    learning_rate,
                };
                tsne(embedding.view(), &params, rng)
            }
        };

        info!("embedding after {}: [{n}, {k}]", projection.name());
        Ok(projected)
    })
}

/// Projects onto the top `k` principal components.
///
/// Each component's largest loading is made positive so that the result doesn't depend on
/// the sign the power iteration lands on.
pub fn pca(x: ArrayView2<f32>, k: usize) -> Array2<f32> {
    let (n, d) = x.dim();
    let Some(mean) = x.mean_axis(Axis(0)) else {
        return Array2::zeros((0, k));
    };
    let centered = &x - &mean;

    let mut cov = centered.t().dot(&centered) / (n.max(2) - 1) as f32;
    let mut components = Array2::zeros((d, k));

    for i in 0..k {
        let mut v = Array1::from_shape_fn(d, |j| 1. + j as f32 / d as f32);
        v /= v.dot(&v).sqrt();

        let mut eigenvalue = 0.;
        for _ in 0..POWER_ITERATIONS {
            let next = cov.dot(&v);
            let norm = next.dot(&next).sqrt();
            if norm == 0. {
                break;
            }

            let next = next / norm;
            let delta = (&next - &v).mapv(f32::abs).sum();
            v = next;
            eigenvalue = norm;
            if delta < POWER_TOLERANCE {
                break;
            }
        }

        let largest = v.iter().fold(0f32, |best, &l| if l.abs() > best.abs() { l } else { best });
        if largest < 0. {
            v.mapv_inplace(|l| -l);
        }

        debug!("principal component {i}: eigenvalue {eigenvalue}");

        let outer = v
            .view()
            .insert_axis(Axis(1))
            .dot(&v.view().insert_axis(Axis(0)));
        cov.scaled_add(-eigenvalue, &outer);
        components.column_mut(i).assign(&v);
    }

    centered.dot(&components)
}

/// Settings of an exact t-SNE run.
#[derive(Debug, Clone, Copy)]
pub struct TsneParams {
    pub n_components: usize,
    pub perplexity: f32,
    pub iterations: usize,
    /// The step size, `N / (4 · exaggeration)` for `N` points when `None`.
    pub learning_rate: Option<f32>,
}

impl Default for TsneParams {
    fn default() -> Self {
        Self {
            n_components: 2,
            perplexity: 30.,
            iterations: 1000,
            learning_rate: None,
        }
    }
}

/// Embeds `x` with exact t-SNE.
///
/// The perplexity is clamped to `(B - 1) / 3` so that small batches still have enough
/// neighbours. The first iterations exaggerate the input affinities.
pub fn tsne<R: Rng>(x: ArrayView2<f32>, params: &TsneParams, rng: &mut R) -> Array2<f32> {
    let n = x.dim().0;
    let k = params.n_components;

    if n < 2 {
        return Array2::zeros((n, k));
    }

    let perplexity = params.perplexity.min((n - 1) as f32 / 3.);
    // Keeps the exaggerated attraction step, 4 · exaggeration · lr / N, at one.
    let learning_rate = params.learning_rate.unwrap_or(n as f32 / (4. * EXAGGERATION));
    debug!("t-SNE on {n} point(s), perplexity {perplexity}, learning rate {learning_rate}");

    let p = joint_probabilities(x, perplexity);

    let init = Normal::new(0f32, 1e-4).ok();
    let mut y = match init {
        Some(normal) => Array2::random_using((n, k), normal, rng),
        None => Array2::zeros((n, k)),
    };
    let mut update = Array2::<f32>::zeros((n, k));
    let mut gains = Array2::<f32>::ones((n, k));

    for iter in 0..params.iterations {
        let exaggeration = if iter < EXAGGERATION_ITERATIONS { EXAGGERATION } else { 1. };
        let momentum: f32 = if iter < EXAGGERATION_ITERATIONS { 0.5 } else { 0.8 };

        // Student-t affinities of the embedding.
        let num = Array2::from_shape_fn((n, n), |(i, j)| {
            if i == j {
                return 0.;
            }
            let d = &y.row(i) - &y.row(j);
            1. / (1. + d.dot(&d))
        });
        let sum = num.sum().max(f32::MIN_POSITIVE);

        let mut grad = Array2::<f32>::zeros((n, k));
        for i in 0..n {
            for j in 0..n {
                let q = (num[[i, j]] / sum).max(1e-12);
                let coef = 4. * (exaggeration * p[[i, j]] - q) * num[[i, j]];
                let d = &y.row(i) - &y.row(j);
                grad.row_mut(i).scaled_add(coef, &d);
            }
        }

        Zip::from(&mut gains)
            .and(&grad)
            .and(&update)
            .for_each(|g, &dy, &u| {
                *g = if (dy > 0.) != (u > 0.) { *g + 0.2 } else { *g * 0.8 };
                *g = g.max(0.01);
            });

        update = momentum * &update - learning_rate * &(&gains * &grad);
        y += &update;

        if let Some(mean) = y.mean_axis(Axis(0)) {
            y -= &mean;
        }

        if iter == 0 || iter + 1 == params.iterations {
            let norm = grad.mapv(|g| g * g).sum().sqrt();
            debug!("t-SNE iteration {iter}: gradient norm {norm}");
        }
    }

    y
}

/// Computes the symmetric input affinities, each row searched for the given perplexity.
fn joint_probabilities(x: ArrayView2<f32>, perplexity: f32) -> Array2<f32> {
    let n = x.dim().0;
    let distances = Array2::from_shape_fn((n, n), |(i, j)| {
        let d = &x.row(i) - &x.row(j);
        d.dot(&d)
    });

    let target = perplexity.ln();
    let mut p = Array2::<f32>::zeros((n, n));

    for i in 0..n {
        let (mut beta, mut lo, mut hi) = (1f32, f32::NEG_INFINITY, f32::INFINITY);
        let row = distances.row(i);

        for _ in 0..PERPLEXITY_SEARCH_STEPS {
            let (entropy, conditional) = row_affinities(row.view(), i, beta);
            p.row_mut(i).assign(&conditional);

            let diff = entropy - target;
            if diff.abs() < 1e-5 {
                break;
            }

            // Too much entropy means the kernel is too wide.
            if diff > 0. {
                lo = beta;
                beta = if hi.is_finite() { (beta + hi) / 2. } else { beta * 2. };
            } else {
                hi = beta;
                beta = if lo.is_finite() { (beta + lo) / 2. } else { beta / 2. };
            }
        }
    }

    let p = (&p + &p.t()) / (2. * n as f32);
    p.mapv(|v| v.max(1e-12))
}

/// Returns the entropy of the conditional distribution of point `i` and the distribution.
fn row_affinities(distances: ArrayView1<f32>, i: usize, beta: f32) -> (f32, Array1<f32>) {
    // Shifting by the nearest neighbour keeps the exponentials from underflowing.
    let min = distances
        .indexed_iter()
        .filter(|&(j, _)| j != i)
        .fold(f32::INFINITY, |acc, (_, &d)| acc.min(d));

    let mut affinities = Array1::from_shape_fn(distances.len(), |j| {
        if j == i {
            0.
        } else {
            (-(distances[j] - min) * beta).exp()
        }
    });
    let sum = affinities.sum().max(f32::MIN_POSITIVE);

    let weighted: f32 = affinities.iter().zip(distances.iter()).map(|(a, d)| a * (d - min)).sum();
    let entropy = sum.ln() + beta * weighted / sum;

    affinities /= sum;
    (entropy, affinities)
}

/// Places each embedded input in a 3D scene.
///
/// 2D embeddings get a zero third coordinate. The sprite size and camera distance are
/// calibrated on the distance of a random point from the origin.
pub fn sprite_scene<R: Rng>(
    embedding: ArrayView2<f32>,
    atlas: AtlasDescriptor,
    rng: &mut R,
) -> Result<SpriteScenePayload> {
    let (n, d) = embedding.dim();
    expect_size("embedding rows", n, atlas.num_sprites)?;

    if n == 0 {
        return Err(DissectErr::EmptyDim { what: "embedding" });
    }

    let embedding = match d {
        2 => {
            let mut padded = Array2::zeros((n, 3));
            padded.slice_mut(s![.., ..2]).assign(&embedding);
            padded
        }
        3 => embedding.to_owned(),
        _ => {
            return Err(DissectErr::UnsupportedShape {
                what: "embedding components",
                rank: d,
            });
        }
    };

    let row = embedding.row(rng.random_range(0..n));
    let norm = row.dot(&row).sqrt();
    let (sprite, camera_z) = if norm > 0. && norm.is_finite() {
        (norm / 5., 3. * norm)
    } else {
        (
            SpriteScenePayload::DEFAULT_SPRITE_SIZE,
            SpriteScenePayload::DEFAULT_CAMERA_Z,
        )
    };

    Ok(SpriteScenePayload {
        embedding: SpriteScenePayload::positions(&embedding),
        atlas,
        sprite_size_in_3d: Size {
            height: sprite,
            width: sprite,
        },
        initial_camera_z: camera_z,
    })
}

/// Builds the sprite scene of the activations of a fully connected node.
///
/// # Arguments
/// * `inputs` - The RGBA inputs, `[B, 4, H, W]`.
/// * `activations` - Their activations, `[B, C]`.
/// * `pipe` - The projections to apply to the activations.
/// * `atlas_path` - Where the visualization will find the atlas image.
/// * `rng` - Seeds the projections and the calibration.
///
/// # Returns
/// The atlas, to be saved at `atlas_path`, and the scene.
pub fn project_fc_activations<R: Rng>(
    inputs: ArrayViewD<f32>,
    activations: ArrayViewD<f32>,
    pipe: &[ProjectionConfig],
    atlas_path: &str,
    rng: &mut R,
) -> Result<(Atlas, SpriteScenePayload)> {
    let inputs = tensor::view4("inputs", inputs)?;
    let activations = tensor::view2("fully connected activations", activations)?;
    expect_size("activations batch", activations.dim().0, inputs.dim().0)?;

    let atlas = Atlas::build(inputs)?;
    let embedding = project(activations, pipe, rng)?;
    let scene = sprite_scene(embedding.view(), atlas.descriptor(atlas_path), rng)?;

    Ok((atlas, scene))
}
