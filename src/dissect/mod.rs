//! The inspection operations, each working on a node and the activations around it.
mod activations;
mod conv;
mod projections;
mod superstimulus;
mod weights;

pub use activations::{
    ActivationGrids, ActivationRecord, activation_grids, max_activations, records_grid,
};
pub use conv::{ConvDissection, dissect_conv};
pub use projections::{Atlas, TsneParams, pca, project, project_fc_activations, sprite_scene, tsne};
pub use superstimulus::{
    ConvChannelObjective, LinearUnitObjective, NodeObjective, Objective, superstimuli,
};
pub use weights::{KernelTiles, kernel_tiles};
