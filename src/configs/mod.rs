mod projection;
mod run;
mod selection;
mod superstimulus;

pub use projection::ProjectionConfig;
pub use run::RunConfig;
pub use selection::{Reduce, SelectionParams};
pub use superstimulus::{OptimizerConfig, SuperstimulusConfig};
