//! Pluggable optimizers over flat parameter buffers.
//!
//! Every trainable layer exposes its parameters as two contiguous `f64`
//! buffers (`Parameters`), so optimizer state is just a mirror of those
//! buffers and no optimizer needs to know which layer kind it is updating.
use crate::layers::{Layer, Parameters};
use anyhow::{bail, Result};

/// Per-layer update rule. `initialize_states` runs once before training;
/// `apply_gradient` mutates one trainable layer's parameters in place,
/// identified by its ordinal among the trainable layers.
pub trait Optimizer: Send {
    fn initialize_states(&mut self, layers: &[Layer]);

    fn apply_gradient(
        &mut self,
        parameters: &mut Parameters,
        gradient: &Parameters,
        layer_index: usize,
    ) -> Result<()>;
}

fn check_shapes(parameters: &Parameters, gradient: &Parameters) -> Result<()> {
    if parameters.weights.len() != gradient.weights.len()
        || parameters.biases.len() != gradient.biases.len()
    {
        bail!(
            "gradient shape does not match layer parameters ({}+{} vs {}+{})",
            gradient.weights.len(),
            gradient.biases.len(),
            parameters.weights.len(),
            parameters.biases.len()
        );
    }
    Ok(())
}

fn check_state(states: &[Parameters], parameters: &Parameters, layer_index: usize) -> Result<()> {
    match states.get(layer_index) {
        None => bail!("optimizer has no state for trainable layer {}", layer_index),
        Some(state) => {
            if state.weights.len() != parameters.weights.len()
                || state.biases.len() != parameters.biases.len()
            {
                bail!(
                    "optimizer state for trainable layer {} does not mirror its parameter shape",
                    layer_index
                );
            }
            Ok(())
        }
    }
}

fn zero_states(layers: &[Layer]) -> Vec<Parameters> {
    layers.iter().filter_map(Layer::init_gradient).collect()
}

/// Plain gradient descent: `p -= lr * g`. Stateless.
#[derive(Debug, Clone)]
pub struct Sgd {
    learning_rate: f64,
}

impl Sgd {
    pub fn new(learning_rate: f64) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for Sgd {
    fn initialize_states(&mut self, _layers: &[Layer]) {}

    fn apply_gradient(
        &mut self,
        parameters: &mut Parameters,
        gradient: &Parameters,
        _layer_index: usize,
    ) -> Result<()> {
        check_shapes(parameters, gradient)?;
        for (p, &g) in parameters.weights.iter_mut().zip(&gradient.weights) {
            *p -= self.learning_rate * g;
        }
        for (p, &g) in parameters.biases.iter_mut().zip(&gradient.biases) {
            *p -= self.learning_rate * g;
        }
        Ok(())
    }
}

/// Gradient descent with momentum: `v = momentum * v + lr * g; p -= v`.
#[derive(Debug, Clone)]
pub struct SgdMomentum {
    learning_rate: f64,
    momentum: f64,
    velocities: Vec<Parameters>,
}

impl SgdMomentum {
    pub fn new(learning_rate: f64, momentum: f64) -> Self {
        Self {
            learning_rate,
            momentum,
            velocities: Vec::new(),
        }
    }
}

impl Optimizer for SgdMomentum {
    fn initialize_states(&mut self, layers: &[Layer]) {
        self.velocities = zero_states(layers);
    }

    fn apply_gradient(
        &mut self,
        parameters: &mut Parameters,
        gradient: &Parameters,
        layer_index: usize,
    ) -> Result<()> {
        check_shapes(parameters, gradient)?;
        check_state(&self.velocities, parameters, layer_index)?;
        let velocity = &mut self.velocities[layer_index];
        for ((p, v), &g) in parameters
            .weights
            .iter_mut()
            .zip(&mut velocity.weights)
            .zip(&gradient.weights)
        {
            *v = self.momentum * *v + self.learning_rate * g;
            *p -= *v;
        }
        for ((p, v), &g) in parameters
            .biases
            .iter_mut()
            .zip(&mut velocity.biases)
            .zip(&gradient.biases)
        {
            *v = self.momentum * *v + self.learning_rate * g;
            *p -= *v;
        }
        Ok(())
    }
}

/// RMSProp: running average of squared gradients scales the step.
#[derive(Debug, Clone)]
pub struct RmsProp {
    learning_rate: f64,
    decay_rate: f64,
    stabilizer: f64,
    avg_square_gradients: Vec<Parameters>,
}

impl RmsProp {
    pub fn new(learning_rate: f64) -> Self {
        Self::with_decay(learning_rate, 0.9, 1e-8)
    }

    pub fn with_decay(learning_rate: f64, decay_rate: f64, stabilizer: f64) -> Self {
        Self {
            learning_rate,
            decay_rate,
            stabilizer,
            avg_square_gradients: Vec::new(),
        }
    }
}

impl Optimizer for RmsProp {
    fn initialize_states(&mut self, layers: &[Layer]) {
        self.avg_square_gradients = zero_states(layers);
    }

    fn apply_gradient(
        &mut self,
        parameters: &mut Parameters,
        gradient: &Parameters,
        layer_index: usize,
    ) -> Result<()> {
        check_shapes(parameters, gradient)?;
        check_state(&self.avg_square_gradients, parameters, layer_index)?;
        let state = &mut self.avg_square_gradients[layer_index];
        for ((p, avg), &g) in parameters
            .weights
            .iter_mut()
            .zip(&mut state.weights)
            .zip(&gradient.weights)
        {
            let new_avg = self.decay_rate * *avg + (1.0 - self.decay_rate) * g * g;
            *avg = new_avg;
            *p -= self.learning_rate * g / (new_avg.sqrt() + self.stabilizer);
        }
        for ((p, avg), &g) in parameters
            .biases
            .iter_mut()
            .zip(&mut state.biases)
            .zip(&gradient.biases)
        {
            let new_avg = self.decay_rate * *avg + (1.0 - self.decay_rate) * g * g;
            *avg = new_avg;
            *p -= self.learning_rate * g / (new_avg.sqrt() + self.stabilizer);
        }
        Ok(())
    }
}

/// Adam: bias-corrected first and second moment estimates with a single
/// timestep shared across all layers, incremented once per batch (when the
/// first trainable layer is updated).
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f64,
    first_moment_decay: f64,
    second_moment_decay: f64,
    stabilizer: f64,
    first_moments: Vec<Parameters>,
    second_moments: Vec<Parameters>,
    timestep: u64,
}

impl Adam {
    pub fn new(learning_rate: f64) -> Self {
        Self::with_decay(learning_rate, 0.9, 0.999, 1e-8)
    }

    pub fn with_decay(
        learning_rate: f64,
        first_moment_decay: f64,
        second_moment_decay: f64,
        stabilizer: f64,
    ) -> Self {
        Self {
            learning_rate,
            first_moment_decay,
            second_moment_decay,
            stabilizer,
            first_moments: Vec::new(),
            second_moments: Vec::new(),
            timestep: 0,
        }
    }

    pub fn timestep(&self) -> u64 {
        self.timestep
    }
}

impl Optimizer for Adam {
    fn initialize_states(&mut self, layers: &[Layer]) {
        self.first_moments = zero_states(layers);
        self.second_moments = zero_states(layers);
        self.timestep = 0;
    }

    fn apply_gradient(
        &mut self,
        parameters: &mut Parameters,
        gradient: &Parameters,
        layer_index: usize,
    ) -> Result<()> {
        check_shapes(parameters, gradient)?;
        check_state(&self.first_moments, parameters, layer_index)?;
        check_state(&self.second_moments, parameters, layer_index)?;
        if layer_index == 0 {
            self.timestep += 1;
        }
        let t = self.timestep as i32;
        let beta1 = self.first_moment_decay;
        let beta2 = self.second_moment_decay;
        let lr = self.learning_rate;
        let eps = self.stabilizer;
        let first_correction = 1.0 - beta1.powi(t);
        let second_correction = 1.0 - beta2.powi(t);
        let first = &mut self.first_moments[layer_index];
        let second = &mut self.second_moments[layer_index];

        let update = |p: &mut f64, m: &mut f64, v: &mut f64, g: f64| {
            *m = beta1 * *m + (1.0 - beta1) * g;
            *v = beta2 * *v + (1.0 - beta2) * g * g;
            let m_hat = *m / first_correction;
            let v_hat = *v / second_correction;
            *p -= lr * m_hat / (v_hat.sqrt() + eps);
        };
        for ((p, (m, v)), &g) in parameters
            .weights
            .iter_mut()
            .zip(first.weights.iter_mut().zip(&mut second.weights))
            .zip(&gradient.weights)
        {
            update(p, m, v, g);
        }
        for ((p, (m, v)), &g) in parameters
            .biases
            .iter_mut()
            .zip(first.biases.iter_mut().zip(&mut second.biases))
            .zip(&gradient.biases)
        {
            update(p, m, v, g);
        }
        Ok(())
    }
}
