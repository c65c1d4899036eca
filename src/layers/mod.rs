//! The five layer kinds and the flat parameter buffers shared by the
//! trainable ones.
//!
//! Layers form a strictly linear pipeline owned by the network, so dispatch
//! is a tagged enum with pattern matching rather than trait objects, and no
//! layer holds a reference to its neighbours.
pub mod conv2d;
pub mod dense;
pub mod flatten;
pub mod pooling;

pub use conv2d::Conv2d;
pub use dense::Dense;
pub use flatten::Flatten;
pub use pooling::{PoolMethod, Pooling2d};

use crate::tensor::{Tensor, TensorShape};
use anyhow::{bail, Result};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

/// Weights and biases of a trainable layer, stored as contiguous flat
/// buffers. The owning layer defines the index math (output-major for
/// dense, filter/channel/row/col for conv), so optimizers can treat every
/// layer's parameters as one addressable sequence.
///
/// The same struct doubles as the per-batch gradient accumulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    pub weights: Vec<f64>,
    pub biases: Vec<f64>,
}

impl Parameters {
    pub fn zeros(weight_len: usize, bias_len: usize) -> Self {
        Self {
            weights: vec![0.0; weight_len],
            biases: vec![0.0; bias_len],
        }
    }

    /// A zero-filled accumulator with this buffer's exact shape.
    pub fn zeros_like(&self) -> Self {
        Self::zeros(self.weights.len(), self.biases.len())
    }

    /// In-place `acc += grad` over both buffers.
    pub fn accumulate(&mut self, gradient: &Parameters) -> Result<()> {
        if self.weights.len() != gradient.weights.len()
            || self.biases.len() != gradient.biases.len()
        {
            bail!(
                "gradient shape mismatch: accumulator has {}+{} entries, gradient has {}+{}",
                self.weights.len(),
                self.biases.len(),
                gradient.weights.len(),
                gradient.biases.len()
            );
        }
        for (a, g) in self.weights.iter_mut().zip(&gradient.weights) {
            *a += g;
        }
        for (a, g) in self.biases.iter_mut().zip(&gradient.biases) {
            *a += g;
        }
        Ok(())
    }

    /// Divide the accumulated sum by the batch size.
    pub fn average(&mut self, batch_size: usize) -> Result<()> {
        if batch_size == 0 {
            bail!("cannot average a gradient over an empty batch");
        }
        let n = batch_size as f64;
        for w in &mut self.weights {
            *w /= n;
        }
        for b in &mut self.biases {
            *b /= n;
        }
        Ok(())
    }
}

/// Result of a backward pass through one layer: the gradient handed to the
/// previous layer, plus the parameter gradient for trainable layers.
#[derive(Debug)]
pub struct BackwardOutput {
    pub input_gradient: Tensor,
    pub parameter_gradient: Option<Parameters>,
}

/// Identity layer anchoring the head of the stack. It declares the shape
/// samples arrive in; gradients never flow back past it.
#[derive(Debug, Clone)]
pub struct Input {
    shape: TensorShape,
}

impl Input {
    pub fn new(shape: TensorShape) -> Self {
        Self { shape }
    }

    pub fn shape(&self) -> TensorShape {
        self.shape
    }
}

/// One layer in the pipeline.
#[derive(Debug, Clone)]
pub enum Layer {
    Input(Input),
    Flatten(Flatten),
    Pooling2d(Pooling2d),
    Dense(Dense),
    Conv2d(Conv2d),
}

impl Layer {
    /// Propagate the previous layer's output shape into this layer,
    /// validating kind and dimensions and initializing parameters where the
    /// layer has any.
    pub fn initialize(&mut self, previous: TensorShape, rng: &mut StdRng) -> Result<()> {
        match self {
            Layer::Input(_) => Ok(()),
            Layer::Flatten(l) => l.initialize(previous),
            Layer::Pooling2d(l) => l.initialize(previous),
            Layer::Dense(l) => l.initialize(previous, rng),
            Layer::Conv2d(l) => l.initialize(previous, rng),
        }
    }

    pub fn output_shape(&self) -> TensorShape {
        match self {
            Layer::Input(l) => l.shape(),
            Layer::Flatten(l) => l.output_shape(),
            Layer::Pooling2d(l) => l.output_shape(),
            Layer::Dense(l) => l.output_shape(),
            Layer::Conv2d(l) => l.output_shape(),
        }
    }

    /// Forward inference. Trainable layers cache the values the backward
    /// pass needs.
    pub fn forward(&mut self, input: Tensor) -> Result<Tensor> {
        match self {
            Layer::Input(_) => Ok(input),
            Layer::Flatten(l) => Ok(Tensor::Flat(l.forward(&input.into_map3()?))),
            Layer::Pooling2d(l) => Ok(Tensor::Map3(l.forward(&input.into_map3()?)?)),
            Layer::Dense(l) => Ok(Tensor::Flat(l.forward(input.into_flat()?)?)),
            Layer::Conv2d(l) => Ok(Tensor::Map3(l.forward(input.into_map3()?)?)),
        }
    }

    /// Backward-mode differentiation, consuming the gradient with respect to
    /// this layer's output.
    pub fn backward(&mut self, upstream: Tensor) -> Result<BackwardOutput> {
        match self {
            Layer::Input(_) => bail!("the input layer has no backward pass"),
            Layer::Flatten(l) => Ok(BackwardOutput {
                input_gradient: Tensor::Map3(l.backward(&upstream.into_flat()?)?),
                parameter_gradient: None,
            }),
            Layer::Pooling2d(l) => Ok(BackwardOutput {
                input_gradient: Tensor::Map3(l.backward(&upstream.into_map3()?)?),
                parameter_gradient: None,
            }),
            Layer::Dense(l) => {
                let (input_gradient, gradient) = l.backward(&upstream.into_flat()?)?;
                Ok(BackwardOutput {
                    input_gradient: Tensor::Flat(input_gradient),
                    parameter_gradient: Some(gradient),
                })
            }
            Layer::Conv2d(l) => {
                let (input_gradient, gradient) = l.backward(&upstream.into_map3()?)?;
                Ok(BackwardOutput {
                    input_gradient: Tensor::Map3(input_gradient),
                    parameter_gradient: Some(gradient),
                })
            }
        }
    }

    pub fn is_trainable(&self) -> bool {
        matches!(self, Layer::Dense(_) | Layer::Conv2d(_))
    }

    pub fn parameters(&self) -> Option<&Parameters> {
        match self {
            Layer::Dense(l) => Some(&l.parameters),
            Layer::Conv2d(l) => Some(&l.parameters),
            _ => None,
        }
    }

    pub fn parameters_mut(&mut self) -> Option<&mut Parameters> {
        match self {
            Layer::Dense(l) => Some(&mut l.parameters),
            Layer::Conv2d(l) => Some(&mut l.parameters),
            _ => None,
        }
    }

    /// A fresh zero gradient shaped like this layer's parameters, or `None`
    /// for non-trainable layers.
    pub fn init_gradient(&self) -> Option<Parameters> {
        self.parameters().map(Parameters::zeros_like)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Layer::Input(_) => "Input",
            Layer::Flatten(_) => "Flatten",
            Layer::Pooling2d(_) => "Pooling2d",
            Layer::Dense(_) => "Dense",
            Layer::Conv2d(_) => "Conv2d",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulate_rejects_mismatched_shapes() {
        let mut acc = Parameters::zeros(4, 2);
        let grad = Parameters::zeros(6, 2);
        assert!(acc.accumulate(&grad).is_err());
    }

    #[test]
    fn accumulate_sums_weights_and_biases() {
        let mut acc = Parameters::zeros(2, 1);
        let grad = Parameters {
            weights: vec![1.0, 2.0],
            biases: vec![3.0],
        };
        acc.accumulate(&grad).unwrap();
        acc.accumulate(&grad).unwrap();
        assert_eq!(acc.weights, vec![2.0, 4.0]);
        assert_eq!(acc.biases, vec![6.0]);
    }

    #[test]
    fn average_guards_empty_batch() {
        let mut acc = Parameters::zeros(2, 1);
        assert!(acc.average(0).is_err());
        assert!(acc.average(4).is_ok());
    }
}
