//! Console helpers and synthetic data for demos and tests.
use crate::network::{Network, Sample};
use crate::tensor::{Tensor, TensorShape};
use crate::train::FitEvent;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Print one fit lifecycle event in the conventional training-log format.
pub fn print_fit_event(event: &FitEvent) {
    match event {
        FitEvent::EpochStart {
            epoch,
            total_epochs,
        } => println!("Epoch {}/{}", epoch + 1, total_epochs),
        FitEvent::BatchStart {
            batch,
            total_batches,
        } => println!("batch {}/{}", batch + 1, total_batches),
        FitEvent::EpochEnd { val_accuracy, .. } => {
            println!("val_accuracy: {:.4}", val_accuracy)
        }
        FitEvent::Completed => println!("training complete"),
        FitEvent::Failed(message) => println!("training failed: {}", message),
    }
}

/// Print the layer stack with output shapes.
pub fn print_network_summary(network: &Network) {
    println!("Model Summary:\n{}", network);
}

/// Generate random samples of the given shape with one-hot targets,
/// deterministically from the seed.
pub fn generate_synthetic_data(
    n_samples: usize,
    input_shape: TensorShape,
    num_classes: usize,
    seed: u64,
) -> Vec<Sample> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n_samples)
        .map(|_| {
            let data = match input_shape {
                TensorShape::Flat(n) => {
                    Tensor::Flat((0..n).map(|_| rng.gen_range(-1.0..1.0)).collect())
                }
                TensorShape::Dim3 {
                    channels,
                    height,
                    width,
                } => Tensor::Map3(
                    (0..channels)
                        .map(|_| {
                            (0..height)
                                .map(|_| {
                                    (0..width).map(|_| rng.gen_range(-1.0..1.0)).collect()
                                })
                                .collect()
                        })
                        .collect(),
                ),
            };
            let class = rng.gen_range(0..num_classes);
            let mut target = vec![0.0; num_classes];
            target[class] = 1.0;
            Sample { data, target }
        })
        .collect()
}
