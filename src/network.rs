//! Network orchestrator: shape propagation, forward inference, mini-batch
//! gradient computation, optimizer dispatch, and the epoch training loop.
use crate::activations::Activation;
use crate::layers::{Conv2d, Dense, Flatten, Input, Layer, Parameters, PoolMethod, Pooling2d};
use crate::metrics::accuracy;
use crate::optimizers::Optimizer;
use crate::tensor::{Tensor, TensorShape};
use crate::train::{FitEvent, FitParams};
use anyhow::{anyhow, bail, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{Read, Write};

/// One labeled training example.
#[derive(Debug, Clone)]
pub struct Sample {
    pub data: Tensor,
    pub target: Vec<f64>,
}

pub struct Network {
    pub layers: Vec<Layer>,
    optimizer: Box<dyn Optimizer>,
    rng: StdRng,
    initialized: bool,
}

impl Network {
    /// Build a network from an ordered layer stack and one optimizer. The
    /// first layer must be Input and the last must be Dense (predictions
    /// are always a flat score vector).
    pub fn new(layers: Vec<Layer>, optimizer: Box<dyn Optimizer>) -> Result<Self> {
        Self::build(layers, optimizer, StdRng::from_entropy())
    }

    /// Same as [`Network::new`] but with deterministic weight
    /// initialization and shuffling.
    pub fn with_seed(layers: Vec<Layer>, optimizer: Box<dyn Optimizer>, seed: u64) -> Result<Self> {
        Self::build(layers, optimizer, StdRng::seed_from_u64(seed))
    }

    fn build(layers: Vec<Layer>, optimizer: Box<dyn Optimizer>, rng: StdRng) -> Result<Self> {
        if layers.len() < 2 {
            bail!("a network needs at least an Input and a Dense layer");
        }
        if !matches!(layers.first(), Some(Layer::Input(_))) {
            bail!("the first layer must be Input");
        }
        if layers[1..].iter().any(|l| matches!(l, Layer::Input(_))) {
            bail!("only the first layer may be Input");
        }
        if !matches!(layers.last(), Some(Layer::Dense(_))) {
            bail!("the last layer must be Dense");
        }
        Ok(Self {
            layers,
            optimizer,
            rng,
            initialized: false,
        })
    }

    /// Walk the stack feeding each layer's output shape into the next
    /// layer's input shape. Must be called once before `predict` or `fit`;
    /// any kind or dimension inconsistency surfaces here instead of
    /// corrupting a forward pass later.
    pub fn initialize(&mut self) -> Result<()> {
        let mut previous = match &self.layers[0] {
            Layer::Input(input) => input.shape(),
            _ => bail!("the first layer must be Input"),
        };
        for (index, layer) in self.layers.iter_mut().enumerate() {
            layer
                .initialize(previous, &mut self.rng)
                .map_err(|e| anyhow!("layer {} ({}): {}", index, layer.kind_name(), e))?;
            previous = layer.output_shape();
        }
        self.initialized = true;
        Ok(())
    }

    fn require_initialized(&self) -> Result<()> {
        if !self.initialized {
            bail!("network is not initialized; call initialize() first");
        }
        Ok(())
    }

    /// Ordinals of the trainable layers, in stack order.
    pub fn trainable_indices(&self) -> Vec<usize> {
        self.layers
            .iter()
            .enumerate()
            .filter(|(_, l)| l.is_trainable())
            .map(|(i, _)| i)
            .collect()
    }

    /// Forward pass through every layer; the final Dense layer yields the
    /// prediction vector.
    pub fn predict(&mut self, input: &Tensor) -> Result<Vec<f64>> {
        self.require_initialized()?;
        let declared = match &self.layers[0] {
            Layer::Input(l) => l.shape(),
            _ => bail!("the first layer must be Input"),
        };
        if input.shape() != declared {
            bail!(
                "input shape {} does not match the declared input shape {}",
                input.shape(),
                declared
            );
        }
        let mut current = input.clone();
        for layer in &mut self.layers {
            current = layer.forward(current)?;
        }
        current.into_flat()
    }

    /// Average gradient of the loss over one batch, one `Parameters` per
    /// trainable layer in stack order. The loss delta is the simplified
    /// `prediction - target` vector (softmax + cross-entropy form).
    pub fn gradient(&mut self, batch: &[Sample]) -> Result<Vec<Parameters>> {
        self.require_initialized()?;
        if batch.is_empty() {
            bail!("cannot compute a gradient over an empty batch");
        }
        let mut sums: Vec<Parameters> = self
            .layers
            .iter()
            .filter_map(Layer::init_gradient)
            .collect();

        for sample in batch {
            let prediction = self.predict(&sample.data)?;
            if prediction.len() != sample.target.len() {
                bail!(
                    "target has {} entries but the network produces {}",
                    sample.target.len(),
                    prediction.len()
                );
            }
            let losses: Vec<f64> = prediction
                .iter()
                .zip(&sample.target)
                .map(|(&p, &t)| p - t)
                .collect();

            // Output layer first, through its specialized gradient pair.
            let last = self.layers.len() - 1;
            let (output_gradient, deltas) = match &self.layers[last] {
                Layer::Dense(dense) => dense.output_gradient(&losses),
                _ => bail!("the last layer must be Dense"),
            };
            let mut upstream = match &self.layers[last] {
                Layer::Dense(dense) => Tensor::Flat(dense.input_gradient(&deltas)),
                _ => unreachable!(),
            };

            // Walk the intermediate layers in reverse, threading the
            // gradient; the Input layer is never reached.
            let mut reversed: Vec<Parameters> = vec![output_gradient];
            for index in (1..last).rev() {
                let out = self.layers[index].backward(upstream)?;
                upstream = out.input_gradient;
                if let Some(parameter_gradient) = out.parameter_gradient {
                    reversed.push(parameter_gradient);
                }
            }
            reversed.reverse();

            for (sum, gradient) in sums.iter_mut().zip(&reversed) {
                sum.accumulate(gradient)?;
            }
        }

        for sum in &mut sums {
            sum.average(batch.len())?;
        }
        Ok(sums)
    }

    /// Hand each trainable layer's averaged gradient to the optimizer,
    /// paired by trainable ordinal.
    pub fn apply_gradient(&mut self, gradients: &[Parameters]) -> Result<()> {
        let trainable = self.trainable_indices();
        if gradients.len() != trainable.len() {
            bail!(
                "got {} gradients for {} trainable layers",
                gradients.len(),
                trainable.len()
            );
        }
        let Network {
            layers, optimizer, ..
        } = self;
        for (ordinal, &layer_index) in trainable.iter().enumerate() {
            let parameters = layers[layer_index]
                .parameters_mut()
                .ok_or_else(|| anyhow!("layer {} is not trainable", layer_index))?;
            optimizer.apply_gradient(parameters, &gradients[ordinal], ordinal)?;
        }
        Ok(())
    }

    /// One pass over the training set: Fisher-Yates shuffle, partition into
    /// batches (the last may be short), compute and apply a gradient per
    /// batch, announcing each batch to the observer.
    pub fn run_epoch(
        &mut self,
        training: &[Sample],
        batch_size: usize,
        observer: &mut dyn FnMut(FitEvent),
    ) -> Result<()> {
        if batch_size == 0 {
            bail!("batch size must be at least 1");
        }
        if training.is_empty() {
            bail!("cannot run an epoch over an empty training set");
        }
        let mut order: Vec<usize> = (0..training.len()).collect();
        order.shuffle(&mut self.rng);
        let total_batches = (training.len() + batch_size - 1) / batch_size;
        for (batch_index, chunk) in order.chunks(batch_size).enumerate() {
            observer(FitEvent::BatchStart {
                batch: batch_index,
                total_batches,
            });
            let batch: Vec<Sample> = chunk.iter().map(|&i| training[i].clone()).collect();
            let gradients = self.gradient(&batch)?;
            self.apply_gradient(&gradients)?;
        }
        Ok(())
    }

    /// Mini-batch training over parallel input/target arrays. Shuffles
    /// once, holds out the last `validation_split` fraction for accuracy
    /// reporting, then runs the configured number of epochs, announcing
    /// lifecycle events to the observer.
    pub fn fit(
        &mut self,
        inputs: &[Tensor],
        targets: &[Vec<f64>],
        params: &FitParams,
        observer: &mut dyn FnMut(FitEvent),
    ) -> Result<()> {
        self.require_initialized()?;
        params.validate()?;
        if inputs.len() != targets.len() {
            bail!(
                "got {} inputs but {} targets",
                inputs.len(),
                targets.len()
            );
        }
        if inputs.is_empty() {
            bail!("cannot fit on an empty dataset");
        }

        self.optimizer.initialize_states(&self.layers);

        let mut samples: Vec<Sample> = inputs
            .iter()
            .zip(targets)
            .map(|(data, target)| Sample {
                data: data.clone(),
                target: target.clone(),
            })
            .collect();
        samples.shuffle(&mut self.rng);

        let validation_len = (samples.len() as f64 * params.validation_split).floor() as usize;
        if validation_len == 0 || validation_len == samples.len() {
            bail!(
                "validation split {} leaves no training or validation data for {} samples",
                params.validation_split,
                samples.len()
            );
        }
        let split = samples.len() - validation_len;
        let (training, validation) = samples.split_at(split);
        let training = training.to_vec();
        let validation = validation.to_vec();

        for epoch in 0..params.epochs {
            observer(FitEvent::EpochStart {
                epoch,
                total_epochs: params.epochs,
            });
            self.run_epoch(&training, params.batch_size, observer)?;
            let val_accuracy = accuracy(self, &validation)?;
            observer(FitEvent::EpochEnd {
                epoch,
                val_accuracy,
            });
        }
        Ok(())
    }

    /// Overwrite one trainable layer's parameters with externally produced
    /// weights. Idempotent; the buffers must match the layer's parameter
    /// shape exactly or the call fails.
    pub fn import_layer_weights(
        &mut self,
        layer_index: usize,
        weights: Vec<f64>,
        biases: Vec<f64>,
    ) -> Result<()> {
        self.require_initialized()?;
        let layer = self
            .layers
            .get_mut(layer_index)
            .ok_or_else(|| anyhow!("no layer at index {}", layer_index))?;
        let parameters = layer
            .parameters_mut()
            .ok_or_else(|| anyhow!("layer {} has no importable parameters", layer_index))?;
        if weights.len() != parameters.weights.len() || biases.len() != parameters.biases.len() {
            bail!(
                "imported blob has {}+{} entries, layer {} expects {}+{}",
                weights.len(),
                biases.len(),
                layer_index,
                parameters.weights.len(),
                parameters.biases.len()
            );
        }
        parameters.weights = weights;
        parameters.biases = biases;
        Ok(())
    }

    /// Save the model as gzipped JSON.
    pub fn save(&self, path: &str) -> Result<()> {
        let dto = NetworkDto::from_network(self)?;
        let json = serde_json::to_vec(&dto)?;
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(&json)?;
        encoder.finish()?;
        Ok(())
    }

    /// Load a model from gzipped JSON, pairing it with a fresh optimizer.
    pub fn load(path: &str, optimizer: Box<dyn Optimizer>) -> Result<Self> {
        let file = File::open(path)?;
        let mut decoder = GzDecoder::new(file);
        let mut buf = Vec::new();
        decoder.read_to_end(&mut buf)?;
        let dto: NetworkDto = serde_json::from_slice(&buf)?;
        dto.into_network(optimizer)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Network:")?;
        for layer in &self.layers {
            write!(f, " {}{}", layer.kind_name(), layer.output_shape())?;
        }
        Ok(())
    }
}

// ============ Persistence DTOs ============

#[derive(Debug, Serialize, Deserialize)]
enum LayerDto {
    Input {
        shape: TensorShape,
    },
    Flatten,
    Pooling2d {
        pool_size: (usize, usize),
        stride: usize,
        method: PoolMethod,
    },
    Dense {
        output_size: usize,
        activation: Activation,
        parameters: Parameters,
    },
    Conv2d {
        filters: usize,
        kernel_size: (usize, usize),
        padding: usize,
        stride: usize,
        parameters: Parameters,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct NetworkDto {
    layers: Vec<LayerDto>,
}

fn sanitize(values: &[f64]) -> Vec<f64> {
    values
        .iter()
        .map(|&x| if x.is_finite() { x } else { 0.0 })
        .collect()
}

impl NetworkDto {
    fn from_network(network: &Network) -> Result<Self> {
        network.require_initialized()?;
        let layers = network
            .layers
            .iter()
            .map(|layer| match layer {
                Layer::Input(l) => LayerDto::Input { shape: l.shape() },
                Layer::Flatten(_) => LayerDto::Flatten,
                Layer::Pooling2d(l) => LayerDto::Pooling2d {
                    pool_size: l.pool_size(),
                    stride: l.stride(),
                    method: l.method(),
                },
                Layer::Dense(l) => LayerDto::Dense {
                    output_size: l.output_size(),
                    activation: l.activation(),
                    parameters: Parameters {
                        weights: sanitize(&l.parameters.weights),
                        biases: sanitize(&l.parameters.biases),
                    },
                },
                Layer::Conv2d(l) => LayerDto::Conv2d {
                    filters: l.filters(),
                    kernel_size: l.kernel_size(),
                    padding: l.padding(),
                    stride: l.stride(),
                    parameters: Parameters {
                        weights: sanitize(&l.parameters.weights),
                        biases: sanitize(&l.parameters.biases),
                    },
                },
            })
            .collect();
        Ok(Self { layers })
    }

    fn into_network(self, optimizer: Box<dyn Optimizer>) -> Result<Network> {
        let mut layers = Vec::with_capacity(self.layers.len());
        let mut stored: Vec<Option<Parameters>> = Vec::with_capacity(self.layers.len());
        for dto in self.layers {
            let (layer, parameters) = match dto {
                LayerDto::Input { shape } => (Layer::Input(Input::new(shape)), None),
                LayerDto::Flatten => (Layer::Flatten(Flatten::new()), None),
                LayerDto::Pooling2d {
                    pool_size,
                    stride,
                    method,
                } => (
                    Layer::Pooling2d(Pooling2d::new(pool_size, stride, method)),
                    None,
                ),
                LayerDto::Dense {
                    output_size,
                    activation,
                    parameters,
                } => (
                    Layer::Dense(Dense::new(output_size, activation)),
                    Some(parameters),
                ),
                LayerDto::Conv2d {
                    filters,
                    kernel_size,
                    padding,
                    stride,
                    parameters,
                } => (
                    Layer::Conv2d(Conv2d::new(
                        filters,
                        kernel_size,
                        padding,
                        stride,
                        Activation::Relu,
                    )?),
                    Some(parameters),
                ),
            };
            layers.push(layer);
            stored.push(parameters);
        }
        let mut network = Network::new(layers, optimizer)?;
        network.initialize()?;
        for (index, parameters) in stored.into_iter().enumerate() {
            if let Some(p) = parameters {
                network.import_layer_weights(index, p.weights, p.biases)?;
            }
        }
        Ok(network)
    }
}
