//! Fit lifecycle events and the background training stream.
use crate::network::Network;
use crate::tensor::Tensor;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::sync::mpsc;
use std::thread;

/// Training hyperparameters for one `fit` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitParams {
    pub epochs: usize,
    pub batch_size: usize,
    /// Fraction of the dataset held out for validation accuracy, in (0, 1).
    pub validation_split: f64,
}

impl FitParams {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            bail!("epochs must be at least 1");
        }
        if self.batch_size == 0 {
            bail!("batch size must be at least 1");
        }
        if !(self.validation_split > 0.0 && self.validation_split < 1.0) {
            bail!(
                "validation split must lie strictly between 0 and 1, got {}",
                self.validation_split
            );
        }
        Ok(())
    }
}

/// Lifecycle events produced by the training loop. The three progress
/// variants match the loop structure; `Completed` and `Failed` are the
/// stream terminals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FitEvent {
    EpochStart { epoch: usize, total_epochs: usize },
    BatchStart { batch: usize, total_batches: usize },
    EpochEnd { epoch: usize, val_accuracy: f64 },
    Completed,
    Failed(String),
}

/// Run `fit` on a worker thread, streaming events over an unbounded
/// channel. The loop never waits for the consumer: if the receiver is
/// dropped, events are discarded and training keeps going. The network is
/// handed back through the join handle once the stream has terminated.
pub fn fit_stream(
    mut network: Network,
    inputs: Vec<Tensor>,
    targets: Vec<Vec<f64>>,
    params: FitParams,
) -> (mpsc::Receiver<FitEvent>, thread::JoinHandle<Network>) {
    let (sender, receiver) = mpsc::channel();
    let handle = thread::spawn(move || {
        let events = sender.clone();
        let result = network.fit(&inputs, &targets, &params, &mut |event| {
            let _ = events.send(event);
        });
        let terminal = match result {
            Ok(()) => FitEvent::Completed,
            Err(err) => FitEvent::Failed(err.to_string()),
        };
        let _ = sender.send(terminal);
        network
    });
    (receiver, handle)
}
