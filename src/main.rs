use std::env;

use anyhow::{Context, Result, bail};
use dlight::{
    configs::RunConfig,
    dissect::{self, NodeObjective, Objective},
    image,
    nn::{self, Sequential},
    payload::{ConvDissectionPayload, Payload},
    tensor,
};
use log::{info, warn};
use ndarray::{Array4, ArrayD, Axis, s};
use ndarray_rand::RandomExt;
use rand::{SeedableRng, rngs::StdRng};
use rand_distr::Uniform;
use serde_json::json;

const USAGE: &str = "usage: dlight <dissect|top-k|superstimulus|project> [config.json]";

fn main() -> Result<()> {
    env_logger::init();

    let mut args = env::args().skip(1);
    let Some(command) = args.next() else {
        bail!(USAGE);
    };

    let config = match args.next() {
        Some(path) => RunConfig::from_path(&path).with_context(|| format!("loading {path}"))?,
        None => RunConfig::default(),
    };
    config.validate()?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let net = nn::simple_convnet(&mut rng)?;
    let batch = Array4::random_using(
        (config.batch_size, 1, 28, 28),
        Uniform::new(0f32, 1f32)?,
        &mut rng,
    )
    .into_dyn();
    info!("running {command} on node {} with {} input(s)", config.node, config.batch_size);

    let json = match command.as_str() {
        "dissect" => run_dissect(&net, &batch, &config)?,
        "top-k" => run_top_k(&net, &batch, &config)?,
        "superstimulus" => run_superstimulus(&net, &batch, &config)?,
        "project" => run_project(&net, &batch, &config, &mut rng)?,
        other => bail!("unknown command {other:?}\n{USAGE}"),
    };

    println!("{json}");
    Ok(())
}

fn run_dissect(net: &Sequential, batch: &ArrayD<f32>, config: &RunConfig) -> Result<String> {
    let node = net.node(&config.node)?;
    let input = net.input_to(batch.view(), &config.node)?;

    let dissection = dissect::dissect_conv(input.view(), node, config.outer_idx()?)?;
    let payload = ConvDissectionPayload::new(&dissection, config.input_description.clone())?;
    Ok(payload.to_json()?)
}

fn run_top_k(net: &Sequential, batch: &ArrayD<f32>, config: &RunConfig) -> Result<String> {
    let activations = net.partial_forward(batch.view(), &config.node)?;
    let records =
        dissect::max_activations(batch.view(), activations.view(), config.k, &config.selection)?;

    let ranking: Vec<_> = records
        .iter()
        .map(|r| json!({ "index": r.index, "score": r.score }))
        .collect();
    Ok(serde_json::to_string(&ranking)?)
}

fn run_superstimulus(net: &Sequential, batch: &ArrayD<f32>, config: &RunConfig) -> Result<String> {
    let first = batch.slice_axis(Axis(0), (0..1).into());
    let initial = tensor::view4("superstimulus input", first)?;

    let objective =
        NodeObjective::new(net, &config.node, config.outer_idx()?, config.selection.reduce)?;
    let found = dissect::superstimuli(&[&objective], initial, &config.superstimulus)?;

    let results = found
        .iter()
        .map(|x| {
            let (before, _) = objective.value_and_grad(initial)?;
            let (after, _) = objective.value_and_grad(x.view())?;
            let img = image::normalize(x.slice(s![0, .., .., ..]));
            Ok(json!({
                "shape": img.shape(),
                "objective_before": before,
                "objective_after": after,
                "pixels": img.iter().copied().collect::<Vec<f32>>(),
            }))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(serde_json::to_string(&results)?)
}

fn run_project(
    net: &Sequential,
    batch: &ArrayD<f32>,
    config: &RunConfig,
    rng: &mut StdRng,
) -> Result<String> {
    let activations = net.partial_forward(batch.view(), &config.projection_node)?;
    let inputs = image::to_rgba(tensor::view4("inputs", batch.view())?)?.into_dyn();

    let (atlas, scene) = dissect::project_fc_activations(
        inputs.view(),
        activations.view(),
        &config.projections,
        &config.atlas_path,
        rng,
    )?;
    info!("atlas of {}x{} sprite(s)", atlas.rows, atlas.cols);
    warn!(
        "the atlas is not written, the scene expects its RGBA8 pixels at {}",
        config.atlas_path
    );

    Ok(scene.to_json()?)
}
