use serde::{Deserialize, Serialize};

/// How a spatial activation map is reduced to a single score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduce {
    #[default]
    Mean,
    Max,
}

/// Parameters of a max activation selection, deserializable from `{"outer_idx": 3,
/// "reduce_func": "max"}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
pub struct SelectionParams {
    /// The channel to rank the inputs by. Required, but kept optional so that a missing
    /// key surfaces as an error of the selection and not of the parsing.
    pub outer_idx: Option<usize>,
    /// Only used for spatial activations.
    #[serde(default, rename = "reduce_func")]
    pub reduce: Reduce,
}

impl SelectionParams {
    pub fn channel(outer_idx: usize) -> Self {
        Self {
            outer_idx: Some(outer_idx),
            reduce: Reduce::Mean,
        }
    }

    pub fn with_reduce(self, reduce: Reduce) -> Self {
        Self { reduce, ..self }
    }
}
