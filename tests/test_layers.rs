// Per-layer forward/backward behavior on small hand-checked inputs.
use convnet::{Activation, Conv2d, Flatten, PoolMethod, Pooling2d, TensorShape};
use rand::rngs::StdRng;
use rand::SeedableRng;

const TOLERANCE: f64 = 1e-12;

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < TOLERANCE,
        "expected {expected}, got {actual}"
    );
}

fn shape(channels: usize, height: usize, width: usize) -> TensorShape {
    TensorShape::Dim3 {
        channels,
        height,
        width,
    }
}

#[test]
fn max_pool_picks_window_maxima() {
    let mut pool = Pooling2d::new((2, 2), 2, PoolMethod::Max);
    pool.initialize(shape(1, 4, 4)).unwrap();
    let input = vec![vec![
        vec![1.0, 2.0, 5.0, 6.0],
        vec![3.0, 4.0, 7.0, 8.0],
        vec![9.0, 10.0, 13.0, 14.0],
        vec![11.0, 12.0, 15.0, 16.0],
    ]];
    let output = pool.forward(&input).unwrap();
    assert_eq!(output, vec![vec![vec![4.0, 8.0], vec![12.0, 16.0]]]);
}

#[test]
fn max_pool_backward_routes_to_argmax() {
    let mut pool = Pooling2d::new((2, 2), 2, PoolMethod::Max);
    pool.initialize(shape(1, 4, 4)).unwrap();
    let input = vec![vec![
        vec![1.0, 2.0, 5.0, 6.0],
        vec![3.0, 4.0, 7.0, 8.0],
        vec![9.0, 10.0, 13.0, 14.0],
        vec![11.0, 12.0, 15.0, 16.0],
    ]];
    pool.forward(&input).unwrap();
    let upstream = vec![vec![vec![1.0, 2.0], vec![3.0, 4.0]]];
    let routed = pool.backward(&upstream).unwrap();

    // Each window's gradient lands exactly on its recorded maximum.
    let mut expected = vec![vec![0.0; 4]; 4];
    expected[1][1] = 1.0;
    expected[1][3] = 2.0;
    expected[3][1] = 3.0;
    expected[3][3] = 4.0;
    assert_eq!(routed, vec![expected]);
}

#[test]
fn overlapping_max_windows_sum_their_gradients() {
    // Stride 1 with a 2x2 window over a 3x3 image: the center cell is the
    // maximum of all four windows, so it must collect all four gradients.
    let mut pool = Pooling2d::new((2, 2), 1, PoolMethod::Max);
    pool.initialize(shape(1, 3, 3)).unwrap();
    let input = vec![vec![
        vec![0.0, 0.0, 0.0],
        vec![0.0, 9.0, 0.0],
        vec![0.0, 0.0, 0.0],
    ]];
    pool.forward(&input).unwrap();
    let upstream = vec![vec![vec![1.0, 2.0], vec![3.0, 4.0]]];
    let routed = pool.backward(&upstream).unwrap();
    assert_close(routed[0][1][1], 10.0);
    let total: f64 = routed[0].iter().flatten().sum();
    assert_close(total, 10.0);
}

#[test]
fn avg_pool_forward_and_backward() {
    let mut pool = Pooling2d::new((2, 2), 2, PoolMethod::Avg);
    pool.initialize(shape(1, 2, 2)).unwrap();
    let input = vec![vec![vec![1.0, 2.0], vec![3.0, 4.0]]];
    let output = pool.forward(&input).unwrap();
    assert_close(output[0][0][0], 2.5);

    let routed = pool.backward(&vec![vec![vec![8.0]]]).unwrap();
    for row in &routed[0] {
        for &cell in row {
            assert_close(cell, 2.0);
        }
    }
}

#[test]
fn flatten_emits_channel_then_row_order() {
    let mut flatten = Flatten::new();
    flatten.initialize(shape(2, 2, 2)).unwrap();
    let input = vec![
        vec![vec![1.0, 2.0], vec![3.0, 4.0]],
        vec![vec![5.0, 6.0], vec![7.0, 8.0]],
    ];
    let flat = flatten.forward(&input);
    assert_eq!(flat, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
}

#[test]
fn flatten_backward_inverts_forward() {
    let mut flatten = Flatten::new();
    flatten.initialize(shape(2, 3, 2)).unwrap();
    let input = vec![
        vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]],
        vec![vec![7.0, 8.0], vec![9.0, 10.0], vec![11.0, 12.0]],
    ];
    let flat = flatten.forward(&input);
    let rebuilt = flatten.backward(&flat).unwrap();
    assert_eq!(rebuilt, input);
}

#[test]
fn flatten_backward_rejects_wrong_length() {
    let mut flatten = Flatten::new();
    flatten.initialize(shape(1, 2, 2)).unwrap();
    assert!(flatten.backward(&[1.0, 2.0, 3.0]).is_err());
}

#[test]
fn conv_forward_hand_checked() {
    let mut rng = StdRng::seed_from_u64(0);
    let mut conv = Conv2d::new(1, (2, 2), 0, 1, Activation::Relu).unwrap();
    conv.initialize(shape(1, 3, 3), &mut rng).unwrap();
    conv.parameters.weights = vec![1.0, 0.0, 0.0, 1.0];
    conv.parameters.biases = vec![0.5];

    let input = vec![vec![
        vec![1.0, 2.0, 3.0],
        vec![4.0, 5.0, 6.0],
        vec![7.0, 8.0, 9.0],
    ]];
    let output = conv.forward(input).unwrap();
    // Cross-correlation with an identity-diagonal kernel sums each cell
    // with its lower-right neighbor, plus the bias.
    assert_close(output[0][0][0], 1.0 + 5.0 + 0.5);
    assert_close(output[0][0][1], 2.0 + 6.0 + 0.5);
    assert_close(output[0][1][0], 4.0 + 8.0 + 0.5);
    assert_close(output[0][1][1], 5.0 + 9.0 + 0.5);
}

#[test]
fn conv_forward_applies_relu() {
    let mut rng = StdRng::seed_from_u64(0);
    let mut conv = Conv2d::new(1, (1, 1), 0, 1, Activation::Relu).unwrap();
    conv.initialize(shape(1, 1, 2), &mut rng).unwrap();
    conv.parameters.weights = vec![1.0];
    conv.parameters.biases = vec![0.0];
    let output = conv.forward(vec![vec![vec![-3.0, 2.0]]]).unwrap();
    assert_eq!(output, vec![vec![vec![0.0, 2.0]]]);
}

#[test]
fn conv_forward_zero_padding_extends_borders() {
    let mut rng = StdRng::seed_from_u64(0);
    let mut conv = Conv2d::new(1, (3, 3), 1, 1, Activation::Relu).unwrap();
    conv.initialize(shape(1, 2, 2), &mut rng).unwrap();
    conv.parameters.weights = vec![1.0; 9];
    conv.parameters.biases = vec![0.0];
    let output = conv.forward(vec![vec![vec![1.0, 1.0], vec![1.0, 1.0]]]).unwrap();
    // Top-left window covers the whole 2x2 image plus padding zeros.
    assert_close(output[0][0][0], 4.0);
    assert_eq!(output[0].len(), 2);
    assert_eq!(output[0][0].len(), 2);
}

#[test]
fn conv_backward_hand_checked() {
    let mut rng = StdRng::seed_from_u64(0);
    let mut conv = Conv2d::new(1, (2, 2), 0, 1, Activation::Relu).unwrap();
    conv.initialize(shape(1, 3, 3), &mut rng).unwrap();
    conv.parameters.weights = vec![1.0, 0.0, 0.0, 1.0];
    conv.parameters.biases = vec![0.5];
    let input = vec![vec![
        vec![1.0, 2.0, 3.0],
        vec![4.0, 5.0, 6.0],
        vec![7.0, 8.0, 9.0],
    ]];
    conv.forward(input).unwrap();

    let upstream = vec![vec![vec![1.0, 0.0], vec![0.0, 0.0]]];
    let (input_gradient, gradient) = conv.backward(&upstream).unwrap();

    // All preactivations are positive, so relu passes the delta through.
    // Weight gradient correlates the delta against the input window.
    assert_eq!(gradient.weights, vec![1.0, 2.0, 4.0, 5.0]);
    assert_eq!(gradient.biases, vec![1.0]);

    // Input gradient scatters the delta through the kernel.
    assert_close(input_gradient[0][0][0], 1.0);
    assert_close(input_gradient[0][1][1], 1.0);
    assert_close(input_gradient[0][0][1], 0.0);
    assert_close(input_gradient[0][2][2], 0.0);
}

#[test]
fn conv_backward_rejects_stride_above_one() {
    let mut rng = StdRng::seed_from_u64(0);
    let mut conv = Conv2d::new(1, (2, 2), 0, 2, Activation::Relu).unwrap();
    conv.initialize(shape(1, 4, 4), &mut rng).unwrap();
    let input = vec![vec![vec![1.0; 4]; 4]];
    conv.forward(input).unwrap();
    let upstream = vec![vec![vec![1.0, 1.0], vec![1.0, 1.0]]];
    assert!(conv.backward(&upstream).is_err());
}

#[test]
fn conv_backward_rejects_padding_at_kernel_size() {
    let mut rng = StdRng::seed_from_u64(0);
    let mut conv = Conv2d::new(1, (2, 2), 2, 1, Activation::Relu).unwrap();
    conv.initialize(shape(1, 3, 3), &mut rng).unwrap();
    let input = vec![vec![vec![1.0; 3]; 3]];
    let output = conv.forward(input).unwrap();
    assert!(conv.backward(&output).is_err());
}
