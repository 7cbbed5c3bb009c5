use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use ndarray::ShapeError;

/// The result type used in the entire crate.
pub type Result<T> = std::result::Result<T, DissectErr>;

/// The crate's error type.
#[derive(Debug)]
pub enum DissectErr {
    /// A dimension doesn't have the size another tensor or node requires.
    ShapeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    /// A tensor has a rank the operation doesn't handle.
    UnsupportedShape {
        what: &'static str,
        rank: usize,
    },
    /// The node kind can't be used for the requested operation.
    UnsupportedNode {
        kind: &'static str,
    },
    /// A required parameter is missing.
    MissingParam(&'static str),
    IndexOutOfRange {
        what: &'static str,
        got: usize,
        bound: usize,
    },
    /// A dimension that must be reduced over is empty.
    EmptyDim {
        what: &'static str,
    },
    UnknownNode(String),
    InvalidConfig(String),
    Shape(ShapeError),
    Json(serde_json::Error),
    Io(io::Error),
}

impl Display for DissectErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DissectErr::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(f, "shape mismatch for {what}: got {got}, expected {expected}"),
            DissectErr::UnsupportedShape { what, rank } => {
                write!(f, "unsupported rank {rank} for {what}")
            }
            DissectErr::UnsupportedNode { kind } => {
                write!(f, "node of type {kind} is not supported for this operation")
            }
            DissectErr::MissingParam(name) => write!(f, "missing required parameter {name}"),
            DissectErr::IndexOutOfRange { what, got, bound } => {
                write!(f, "{what} out of range: got {got}, must be lower than {bound}")
            }
            DissectErr::EmptyDim { what } => write!(f, "{what} is empty"),
            DissectErr::UnknownNode(name) => write!(f, "unknown node name {name}"),
            DissectErr::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            DissectErr::Shape(e) => write!(f, "shape error: {e}"),
            DissectErr::Json(e) => write!(f, "json error: {e}"),
            DissectErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for DissectErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DissectErr::Shape(e) => Some(e),
            DissectErr::Json(e) => Some(e),
            DissectErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShapeError> for DissectErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}

impl From<serde_json::Error> for DissectErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<io::Error> for DissectErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Checks that a dimension has the expected size.
pub(crate) fn expect_size(what: &'static str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(DissectErr::ShapeMismatch {
            what,
            got,
            expected,
        });
    }

    Ok(())
}

/// Checks that a tensor has the expected shape, axis by axis.
pub(crate) fn expect_shape(what: &'static str, got: &[usize], expected: &[usize]) -> Result<()> {
    expect_size(what, got.len(), expected.len())?;
    got.iter()
        .zip(expected)
        .try_for_each(|(&g, &e)| expect_size(what, g, e))
}
