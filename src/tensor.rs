//! Tensor values and shapes shared between heterogeneous layer types.
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// 3-D feature map: channels, then rows, then columns.
pub type Map3 = Vec<Vec<Vec<f64>>>;

/// Shape of a tensor flowing between layers: either a flat vector length
/// (Dense) or channels/height/width (Input, Conv2d, Pooling2d, Flatten input).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TensorShape {
    Flat(usize),
    Dim3 {
        channels: usize,
        height: usize,
        width: usize,
    },
}

impl TensorShape {
    /// Total number of scalar elements.
    pub fn size(&self) -> usize {
        match *self {
            TensorShape::Flat(n) => n,
            TensorShape::Dim3 {
                channels,
                height,
                width,
            } => channels * height * width,
        }
    }
}

impl std::fmt::Display for TensorShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            TensorShape::Flat(n) => write!(f, "({})", n),
            TensorShape::Dim3 {
                channels,
                height,
                width,
            } => write!(f, "({}, {}, {})", channels, height, width),
        }
    }
}

/// A value passed through the layer stack.
#[derive(Debug, Clone, PartialEq)]
pub enum Tensor {
    Flat(Vec<f64>),
    Map3(Map3),
}

impl Tensor {
    pub fn shape(&self) -> TensorShape {
        match self {
            Tensor::Flat(v) => TensorShape::Flat(v.len()),
            Tensor::Map3(m) => TensorShape::Dim3 {
                channels: m.len(),
                height: m.first().map_or(0, |c| c.len()),
                width: m.first().and_then(|c| c.first()).map_or(0, |r| r.len()),
            },
        }
    }

    pub fn zeros(shape: TensorShape) -> Tensor {
        match shape {
            TensorShape::Flat(n) => Tensor::Flat(vec![0.0; n]),
            TensorShape::Dim3 {
                channels,
                height,
                width,
            } => Tensor::Map3(zeros_map3(channels, height, width)),
        }
    }

    pub fn into_flat(self) -> Result<Vec<f64>> {
        match self {
            Tensor::Flat(v) => Ok(v),
            Tensor::Map3(_) => Err(anyhow!("expected a flat tensor, got a 3-D feature map")),
        }
    }

    pub fn into_map3(self) -> Result<Map3> {
        match self {
            Tensor::Map3(m) => Ok(m),
            Tensor::Flat(_) => Err(anyhow!("expected a 3-D feature map, got a flat tensor")),
        }
    }
}

/// Allocate a zero-filled channels × height × width map.
pub fn zeros_map3(channels: usize, height: usize, width: usize) -> Map3 {
    vec![vec![vec![0.0; width]; height]; channels]
}
