//! Activation functions and their paired weight initializers.
use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Sigmoid: 1 / (1 + exp(-x))
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// ReLU: max(0, x)
pub fn relu(x: f64) -> f64 {
    x.max(0.0)
}

/// Softmax with max-shifting for stability (vector-only).
pub fn softmax(z: &[f64]) -> Vec<f64> {
    if z.is_empty() {
        return Vec::new();
    }
    let max = z.iter().fold(f64::MIN, |a, &b| a.max(b));
    let exps: Vec<f64> = z.iter().map(|&x| (x - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Activation functions available to trainable layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    Sigmoid,
    Relu,
    Softmax,
}

/// Weight initialization scheme, fixed per activation function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initializer {
    Xavier,
    He,
}

impl Initializer {
    /// Uniform sampling limit derived from fan-in/fan-out.
    pub fn limit(&self, fan_in: usize, fan_out: usize) -> f64 {
        match self {
            Initializer::Xavier => (6.0 / (fan_in + fan_out) as f64).sqrt(),
            Initializer::He => (6.0 / fan_in as f64).sqrt(),
        }
    }
}

impl Activation {
    pub fn apply_vec(&self, z: &[f64]) -> Vec<f64> {
        match self {
            Activation::Sigmoid => z.iter().map(|&x| sigmoid(x)).collect(),
            Activation::Relu => z.iter().map(|&x| relu(x)).collect(),
            Activation::Softmax => softmax(z),
        }
    }

    /// The initializer paired with this activation: xavier for
    /// sigmoid/softmax, he for relu.
    pub fn initializer(&self) -> Initializer {
        match self {
            Activation::Sigmoid | Activation::Softmax => Initializer::Xavier,
            Activation::Relu => Initializer::He,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Activation::Sigmoid => "sigmoid",
            Activation::Relu => "relu",
            Activation::Softmax => "softmax",
        }
    }
}

impl FromStr for Activation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sigmoid" => Ok(Activation::Sigmoid),
            "relu" => Ok(Activation::Relu),
            "softmax" => Ok(Activation::Softmax),
            other => Err(anyhow!("unsupported activation function: {:?}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softmax_sums_to_one_and_is_shift_invariant() {
        let a = softmax(&[1.0, 2.0, 3.0]);
        let b = softmax(&[1001.0, 1002.0, 1003.0]);
        assert!((a.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-12);
        }
    }

    #[test]
    fn unknown_activation_name_is_rejected() {
        assert!("tanh".parse::<Activation>().is_err());
    }

    #[test]
    fn initializer_pairing_is_fixed() {
        assert_eq!(Activation::Relu.initializer(), Initializer::He);
        assert_eq!(Activation::Sigmoid.initializer(), Initializer::Xavier);
        assert_eq!(Activation::Softmax.initializer(), Initializer::Xavier);
    }
}
