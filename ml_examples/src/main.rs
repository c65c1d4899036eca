// ml_examples/src/main.rs
use anyhow::Result;
use convnet::{
    accuracy, fit_stream, generate_synthetic_data, print_fit_event, print_network_summary,
    Activation, Conv2d, Dense, FitParams, Flatten, Input, Layer, Network, PoolMethod, Pooling2d,
    Sgd, TensorShape,
};

fn main() -> Result<()> {
    println!("=== Synthetic 8x8 image classification ===");
    let input_shape = TensorShape::Dim3 {
        channels: 1,
        height: 8,
        width: 8,
    };
    let data = generate_synthetic_data(200, input_shape, 3, 7);

    let layers = vec![
        Layer::Input(Input::new(input_shape)),
        Layer::Conv2d(Conv2d::new(4, (3, 3), 1, 1, Activation::Relu)?),
        Layer::Pooling2d(Pooling2d::new((2, 2), 2, PoolMethod::Max)),
        Layer::Flatten(Flatten::new()),
        Layer::Dense(Dense::new(16, Activation::Relu)),
        Layer::Dense(Dense::new(3, Activation::Softmax)),
    ];
    let mut network = Network::with_seed(layers, Box::new(Sgd::new(0.05)), 42)?;
    network.initialize()?;
    print_network_summary(&network);

    let inputs: Vec<_> = data.iter().map(|s| s.data.clone()).collect();
    let targets: Vec<_> = data.iter().map(|s| s.target.clone()).collect();
    let params = FitParams {
        epochs: 3,
        batch_size: 16,
        validation_split: 0.2,
    };

    let (events, handle) = fit_stream(network, inputs, targets, params);
    for event in events {
        print_fit_event(&event);
    }
    let mut network = handle
        .join()
        .map_err(|_| anyhow::anyhow!("training thread panicked"))?;

    let final_accuracy = accuracy(&mut network, &data)?;
    println!("Accuracy on the full set: {:.2}%", final_accuracy * 100.0);

    // Demo: save and reload the model
    network.save("models/synthetic_cnn.json.gz")?;
    let mut reloaded = Network::load("models/synthetic_cnn.json.gz", Box::new(Sgd::new(0.05)))?;
    let reloaded_accuracy = accuracy(&mut reloaded, &data)?;
    println!("Accuracy (reloaded): {:.2}%", reloaded_accuracy * 100.0);

    Ok(())
}
