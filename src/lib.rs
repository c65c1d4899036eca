//! A hand-written neural-network training engine: a linear stack of layers
//! (Input, Dense, Conv2d, Pooling2d, Flatten) with manual backward-mode
//! differentiation, trained by mini-batch gradient descent through
//! pluggable optimizers.
//!
//! - Five layer kinds with shape inference validated at `initialize()`
//! - Sgd, SgdMomentum, RmsProp, and Adam over flat parameter buffers
//! - Epoch/batch training loop with a streamed lifecycle-event feed
//! - Argmax accuracy metric and gzipped-JSON model persistence

pub mod activations;
pub mod layers;
pub mod metrics;
pub mod network;
pub mod optimizers;
pub mod tensor;
pub mod train;
pub mod utils;

pub use activations::Activation;
pub use layers::{Conv2d, Dense, Flatten, Input, Layer, Parameters, PoolMethod, Pooling2d};
pub use metrics::{accuracy, confusion_matrix};
pub use network::{Network, Sample};
pub use optimizers::{Adam, Optimizer, RmsProp, Sgd, SgdMomentum};
pub use tensor::{Tensor, TensorShape};
pub use train::{fit_stream, FitEvent, FitParams};
pub use utils::{generate_synthetic_data, print_fit_event, print_network_summary};
