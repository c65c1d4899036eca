//! Fully connected layer with a configurable activation function.
use crate::activations::Activation;
use crate::layers::Parameters;
use crate::tensor::TensorShape;
use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::Rng;

/// Weights are one flat output-major buffer: `weights[j * input_size + i]`
/// is the connection from input `i` to output `j`.
#[derive(Debug, Clone)]
pub struct Dense {
    input_size: usize,
    output_size: usize,
    activation: Activation,
    pub parameters: Parameters,
    last_input: Vec<f64>,
    last_preactivations: Vec<f64>,
    last_activations: Vec<f64>,
}

impl Dense {
    pub fn new(output_size: usize, activation: Activation) -> Self {
        Self {
            input_size: 0,
            output_size,
            activation,
            parameters: Parameters::zeros(0, 0),
            last_input: Vec::new(),
            last_preactivations: Vec::new(),
            last_activations: Vec::new(),
        }
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    pub fn output_shape(&self) -> TensorShape {
        TensorShape::Flat(self.output_size)
    }

    /// Initialize weights uniformly in [-limit, limit]; the limit comes
    /// from the activation's paired initializer. Biases start at zero.
    pub fn initialize(&mut self, previous: TensorShape, rng: &mut StdRng) -> Result<()> {
        let input_size = match previous {
            TensorShape::Flat(n) => n,
            TensorShape::Dim3 { .. } => {
                bail!("Dense expects a flat input, previous layer produces a 3-D feature map")
            }
        };
        if input_size == 0 || self.output_size == 0 {
            bail!("Dense layer sizes must be non-zero");
        }
        self.input_size = input_size;
        let limit = self
            .activation
            .initializer()
            .limit(input_size, self.output_size);
        self.parameters.weights = (0..self.output_size * input_size)
            .map(|_| rng.gen_range(-limit..limit))
            .collect();
        self.parameters.biases = vec![0.0; self.output_size];
        Ok(())
    }

    pub fn forward(&mut self, input: Vec<f64>) -> Result<Vec<f64>> {
        if input.len() != self.input_size {
            bail!(
                "dense input has {} entries, expected {}",
                input.len(),
                self.input_size
            );
        }
        let preactivations: Vec<f64> = (0..self.output_size)
            .map(|j| {
                let row = &self.parameters.weights[j * self.input_size..(j + 1) * self.input_size];
                row.iter().zip(&input).map(|(&w, &x)| w * x).sum::<f64>()
                    + self.parameters.biases[j]
            })
            .collect();
        let activations = self.activation.apply_vec(&preactivations);
        self.last_input = input;
        self.last_preactivations = preactivations;
        self.last_activations = activations.clone();
        Ok(activations)
    }

    /// Elementwise activation derivative at output unit `j`, evaluated on
    /// the cached forward values. Sigmoid uses the activation, relu the
    /// preactivation; softmax has no standalone derivative here because it
    /// only ever appears in the output layer.
    fn activation_derivative(&self, j: usize) -> f64 {
        match self.activation {
            Activation::Sigmoid => {
                let a = self.last_activations[j];
                a * (1.0 - a)
            }
            Activation::Relu => {
                if self.last_preactivations[j] > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Softmax => 0.0,
        }
    }

    /// Hidden-layer backward pass: delta through the activation derivative,
    /// outer product against the cached input, and the gradient to hand to
    /// the previous layer.
    pub fn backward(&mut self, upstream: &[f64]) -> Result<(Vec<f64>, Parameters)> {
        if upstream.len() != self.output_size {
            bail!(
                "dense gradient has {} entries, expected {}",
                upstream.len(),
                self.output_size
            );
        }
        if self.last_input.len() != self.input_size {
            bail!("dense backward called before forward");
        }
        let deltas: Vec<f64> = (0..self.output_size)
            .map(|j| upstream[j] * self.activation_derivative(j))
            .collect();
        let gradient = self.gradient_from_deltas(&deltas);
        let input_gradient = self.input_gradient(&deltas);
        Ok((input_gradient, gradient))
    }

    /// Output-layer specialization: the caller supplies the simplified loss
    /// vector (prediction - target). The sigmoid path still applies its
    /// derivative; softmax assumes cross-entropy already folded into the
    /// losses and takes them as-is.
    pub fn output_gradient(&self, losses: &[f64]) -> (Parameters, Vec<f64>) {
        let deltas: Vec<f64> = (0..self.output_size)
            .map(|j| match self.activation {
                Activation::Sigmoid => losses[j] * self.activation_derivative(j),
                _ => losses[j],
            })
            .collect();
        (self.gradient_from_deltas(&deltas), deltas)
    }

    /// Gradient with respect to this layer's input: `sum_j w[j][i] * delta[j]`.
    pub fn input_gradient(&self, deltas: &[f64]) -> Vec<f64> {
        let mut result = vec![0.0; self.input_size];
        for (j, &delta) in deltas.iter().enumerate() {
            let row = &self.parameters.weights[j * self.input_size..(j + 1) * self.input_size];
            for (i, &w) in row.iter().enumerate() {
                result[i] += w * delta;
            }
        }
        result
    }

    fn gradient_from_deltas(&self, deltas: &[f64]) -> Parameters {
        let mut gradient = self.parameters.zeros_like();
        for (j, &delta) in deltas.iter().enumerate() {
            for (i, &x) in self.last_input.iter().enumerate() {
                gradient.weights[j * self.input_size + i] = delta * x;
            }
            gradient.biases[j] = delta;
        }
        gradient
    }
}
