//! The JSON documents handed to the browser side visualizations.
use std::collections::BTreeMap;

use ndarray::{Array2, Array4};
use serde::{Deserialize, Serialize};

use crate::{DissectErr, Result, dissect::ConvDissection};

/// A document that can be serialized for a visualization script.
pub trait Payload: Serialize {
    fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

type Nested4 = Vec<Vec<Vec<Vec<f32>>>>;

/// What the convolution dissection view draws.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConvDissectionPayload {
    pub input_to_conv: Nested4,
    pub weights: Nested4,
    pub bias: f32,
    pub intermediate_activations: Nested4,
    pub cumulative_activations: Nested4,
    pub activation: Nested4,
    /// Labels for the inner channels, keyed from 1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_description: Option<BTreeMap<usize, String>>,
}

impl ConvDissectionPayload {
    /// # Arguments
    /// * `dissection` - The dissected channel.
    /// * `input_description` - Optional labels of the inner channels, keyed from 1.
    pub fn new(
        dissection: &ConvDissection,
        input_description: Option<BTreeMap<usize, String>>,
    ) -> Result<Self> {
        let bound = dissection.num_inner_channels();
        if let Some(&key) = input_description
            .iter()
            .flat_map(|d| d.keys())
            .find(|&&k| k == 0 || k > bound)
        {
            return Err(DissectErr::IndexOutOfRange {
                what: "input_description key",
                got: key,
                bound: bound + 1,
            });
        }

        Ok(Self {
            input_description,
            ..Self::from(dissection)
        })
    }
}

impl Payload for ConvDissectionPayload {}

impl From<&ConvDissection> for ConvDissectionPayload {
    fn from(dissection: &ConvDissection) -> Self {
        Self {
            input_to_conv: nested(&dissection.input),
            weights: nested(&dissection.weights),
            bias: dissection.bias,
            intermediate_activations: nested(&dissection.intermediate),
            cumulative_activations: nested(&dissection.cumulative),
            activation: nested(&dissection.activation),
            input_description: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct GridShape {
    pub rows: usize,
    pub cols: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Size<T> {
    pub height: T,
    pub width: T,
}

/// Where the sprites of a scene live and how they are laid out.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AtlasDescriptor {
    pub path: String,
    pub shape: GridShape,
    pub num_sprites: usize,
    pub sprite_size: Size<usize>,
}

/// A 3D scene with one sprite per embedded input.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SpriteScenePayload {
    /// One `[x, y, z]` position per sprite, in atlas order.
    pub embedding: Vec<[f32; 3]>,
    pub atlas: AtlasDescriptor,
    #[serde(rename = "sprite_size_in_3D")]
    pub sprite_size_in_3d: Size<f32>,
    pub initial_camera_z: f32,
}

impl SpriteScenePayload {
    pub const DEFAULT_SPRITE_SIZE: f32 = 4.0;
    pub const DEFAULT_CAMERA_Z: f32 = 60.0;

    pub(crate) fn positions(embedding: &Array2<f32>) -> Vec<[f32; 3]> {
        embedding
            .outer_iter()
            .map(|row| [row[0], row[1], row[2]])
            .collect()
    }
}

impl Payload for SpriteScenePayload {}

/// The drawing canvas used to feed hand made inputs to a model.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CanvasPayload {
    pub image_height: usize,
    pub image_width: usize,
    /// The global function the canvas calls with the drawn pixels.
    pub callback_name: String,
}

impl CanvasPayload {
    pub fn new(
        image_height: usize,
        image_width: usize,
        callback_name: impl Into<String>,
    ) -> Result<Self> {
        let callback_name = callback_name.into();

        if image_height == 0 || image_width == 0 {
            return Err(DissectErr::InvalidConfig(format!(
                "canvas must not be empty, got {image_height}x{image_width}"
            )));
        }

        if !is_js_identifier(&callback_name) {
            return Err(DissectErr::InvalidConfig(format!(
                "{callback_name:?} is not a valid callback name"
            )));
        }

        Ok(Self {
            image_height,
            image_width,
            callback_name,
        })
    }
}

impl Payload for CanvasPayload {}

fn is_js_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    let head = |c: char| c.is_ascii_alphabetic() || c == '_' || c == '$';
    head(first) && chars.all(|c| head(c) || c.is_ascii_digit())
}

fn nested(a: &Array4<f32>) -> Nested4 {
    a.outer_iter()
        .map(|b| {
            b.outer_iter()
                .map(|c| c.outer_iter().map(|row| row.to_vec()).collect())
                .collect()
        })
        .collect()
}
