// Optimizer update rules on hand-picked parameter/gradient buffers.
use convnet::{
    Activation, Adam, Dense, Layer, Optimizer, Parameters, RmsProp, Sgd, SgdMomentum, TensorShape,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

const TOLERANCE: f64 = 1e-12;

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < TOLERANCE,
        "expected {expected}, got {actual}"
    );
}

/// One initialized trainable layer whose parameter buffers hold two
/// weights and one bias, so optimizer states mirror that shape.
fn single_dense_layer() -> Layer {
    let mut rng = StdRng::seed_from_u64(0);
    let mut layer = Layer::Dense(Dense::new(1, Activation::Sigmoid));
    layer.initialize(TensorShape::Flat(2), &mut rng).unwrap();
    layer
}

fn parameters() -> Parameters {
    Parameters {
        weights: vec![1.0, -2.0],
        biases: vec![0.5],
    }
}

fn gradient() -> Parameters {
    Parameters {
        weights: vec![0.4, -0.2],
        biases: vec![0.1],
    }
}

#[test]
fn sgd_subtracts_scaled_gradient() {
    let mut optimizer = Sgd::new(0.1);
    let mut params = parameters();
    optimizer.apply_gradient(&mut params, &gradient(), 0).unwrap();
    assert_close(params.weights[0], 1.0 - 0.1 * 0.4);
    assert_close(params.weights[1], -2.0 - 0.1 * -0.2);
    assert_close(params.biases[0], 0.5 - 0.1 * 0.1);
}

#[test]
fn sgd_momentum_accumulates_velocity() {
    let layer = single_dense_layer();
    let mut optimizer = SgdMomentum::new(0.1, 0.9);
    optimizer.initialize_states(&[layer]);
    let mut params = parameters();
    let grad = gradient();

    // First step: velocity starts at zero, so v = lr * g.
    optimizer.apply_gradient(&mut params, &grad, 0).unwrap();
    let v1 = 0.1 * 0.4;
    assert_close(params.weights[0], 1.0 - v1);

    // Second step with the same gradient: v = momentum * v + lr * g.
    optimizer.apply_gradient(&mut params, &grad, 0).unwrap();
    let v2 = 0.9 * v1 + 0.1 * 0.4;
    assert_close(params.weights[0], 1.0 - v1 - v2);
    let b1 = 0.1 * 0.1;
    let b2 = 0.9 * b1 + 0.1 * 0.1;
    assert_close(params.biases[0], 0.5 - b1 - b2);
}

#[test]
fn rmsprop_scales_by_running_average() {
    let layer = single_dense_layer();
    let mut optimizer = RmsProp::new(0.01);
    optimizer.initialize_states(&[layer]);
    let mut params = parameters();
    optimizer.apply_gradient(&mut params, &gradient(), 0).unwrap();

    // avg = 0.9 * 0 + 0.1 * g^2; p -= lr * g / (sqrt(avg) + 1e-8)
    let g = 0.4;
    let avg: f64 = 0.1 * g * g;
    assert_close(params.weights[0], 1.0 - 0.01 * g / (avg.sqrt() + 1e-8));
}

#[test]
fn adam_first_step_is_bias_corrected() {
    let layer = single_dense_layer();
    let mut optimizer = Adam::new(0.001);
    optimizer.initialize_states(&[layer]);
    let mut params = parameters();
    optimizer.apply_gradient(&mut params, &gradient(), 0).unwrap();

    // At t = 1 the corrections cancel the decay factors exactly, so the
    // step is lr * g / (|g| + eps) regardless of the gradient scale.
    let g = 0.4_f64;
    let m_hat = (1.0 - 0.9) * g / (1.0 - 0.9_f64.powi(1));
    let v_hat = (1.0 - 0.999) * g * g / (1.0 - 0.999_f64.powi(1));
    assert_close(params.weights[0], 1.0 - 0.001 * m_hat / (v_hat.sqrt() + 1e-8));
}

#[test]
fn adam_timestep_advances_once_per_batch() {
    let layers = vec![single_dense_layer(), single_dense_layer()];
    let mut optimizer = Adam::new(0.001);
    optimizer.initialize_states(&layers);
    assert_eq!(optimizer.timestep(), 0);

    let mut params = parameters();
    let grad = gradient();

    // One batch touches every trainable layer; only the first bumps t.
    optimizer.apply_gradient(&mut params, &grad, 0).unwrap();
    optimizer.apply_gradient(&mut params, &grad, 1).unwrap();
    assert_eq!(optimizer.timestep(), 1);

    optimizer.apply_gradient(&mut params, &grad, 0).unwrap();
    optimizer.apply_gradient(&mut params, &grad, 1).unwrap();
    assert_eq!(optimizer.timestep(), 2);
}

#[test]
fn mismatched_gradient_shape_is_rejected() {
    let mut optimizer = Sgd::new(0.1);
    let mut params = parameters();
    let wrong = Parameters {
        weights: vec![0.1, 0.2, 0.3],
        biases: vec![0.0],
    };
    assert!(optimizer.apply_gradient(&mut params, &wrong, 0).is_err());
}

#[test]
fn stateful_optimizer_without_states_is_rejected() {
    let mut optimizer = SgdMomentum::new(0.1, 0.9);
    let mut params = parameters();
    assert!(optimizer.apply_gradient(&mut params, &gradient(), 0).is_err());

    let mut optimizer = Adam::new(0.001);
    assert!(optimizer.apply_gradient(&mut params, &gradient(), 0).is_err());
}

#[test]
fn layer_index_beyond_states_is_rejected() {
    let layer = single_dense_layer();
    let mut optimizer = RmsProp::new(0.01);
    optimizer.initialize_states(&[layer]);
    let mut params = parameters();
    assert!(optimizer.apply_gradient(&mut params, &gradient(), 5).is_err());
}
