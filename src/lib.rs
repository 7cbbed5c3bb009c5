//! Tools to look inside small convolutional networks, one node at a time.
pub mod configs;
pub mod dissect;
pub mod error;
pub mod image;
pub mod nn;
pub mod optimization;
pub mod payload;
pub mod tensor;

pub use error::{DissectErr, Result};
