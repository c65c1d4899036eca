//! 2-D convolutional layer: cross-correlation forward, transposed/flipped
//! correlation backward.
use crate::activations::Activation;
use crate::layers::Parameters;
use crate::tensor::{zeros_map3, Map3, TensorShape};
use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::Rng;

/// Weights are one flat buffer indexed
/// `[((f * in_channels + c) * kernel_h + ki) * kernel_w + kj]`;
/// biases hold one entry per filter.
#[derive(Debug, Clone)]
pub struct Conv2d {
    filters: usize,
    kernel_size: (usize, usize),
    padding: usize,
    stride: usize,
    activation: Activation,
    in_channels: usize,
    input_height: usize,
    input_width: usize,
    output_height: usize,
    output_width: usize,
    pub parameters: Parameters,
    last_input: Map3,
    last_preactivations: Map3,
}

impl Conv2d {
    /// Only relu has a derivative path in the backward pass, so any other
    /// activation is a configuration error.
    pub fn new(
        filters: usize,
        kernel_size: (usize, usize),
        padding: usize,
        stride: usize,
        activation: Activation,
    ) -> Result<Self> {
        if activation != Activation::Relu {
            bail!(
                "Conv2d only supports the relu activation, got {}",
                activation.name()
            );
        }
        Ok(Self {
            filters,
            kernel_size,
            padding,
            stride,
            activation,
            in_channels: 0,
            input_height: 0,
            input_width: 0,
            output_height: 0,
            output_width: 0,
            parameters: Parameters::zeros(0, 0),
            last_input: Vec::new(),
            last_preactivations: Vec::new(),
        })
    }

    pub fn filters(&self) -> usize {
        self.filters
    }

    pub fn kernel_size(&self) -> (usize, usize) {
        self.kernel_size
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn padding(&self) -> usize {
        self.padding
    }

    pub fn output_shape(&self) -> TensorShape {
        TensorShape::Dim3 {
            channels: self.filters,
            height: self.output_height,
            width: self.output_width,
        }
    }

    pub fn initialize(&mut self, previous: TensorShape, rng: &mut StdRng) -> Result<()> {
        let (channels, height, width) = match previous {
            TensorShape::Dim3 {
                channels,
                height,
                width,
            } => (channels, height, width),
            TensorShape::Flat(_) => {
                bail!("Conv2d expects a 3-D input, previous layer produces a flat vector")
            }
        };
        if self.filters == 0 || self.kernel_size.0 == 0 || self.kernel_size.1 == 0 {
            bail!("Conv2d filters and kernel dimensions must be non-zero");
        }
        if self.stride == 0 {
            bail!("Conv2d stride must be at least 1");
        }
        let padded_h = height + 2 * self.padding;
        let padded_w = width + 2 * self.padding;
        if self.kernel_size.0 > padded_h || self.kernel_size.1 > padded_w {
            bail!(
                "kernel {}x{} larger than padded input {}x{}",
                self.kernel_size.0,
                self.kernel_size.1,
                padded_h,
                padded_w
            );
        }
        self.in_channels = channels;
        self.input_height = height;
        self.input_width = width;
        self.output_height = (padded_h - self.kernel_size.0) / self.stride + 1;
        self.output_width = (padded_w - self.kernel_size.1) / self.stride + 1;

        let fan_in = channels * self.kernel_size.0 * self.kernel_size.1;
        let fan_out = self.filters * self.kernel_size.0 * self.kernel_size.1;
        let limit = self.activation.initializer().limit(fan_in, fan_out);
        let weight_count = self.filters * channels * self.kernel_size.0 * self.kernel_size.1;
        self.parameters.weights = (0..weight_count)
            .map(|_| rng.gen_range(-limit..limit))
            .collect();
        self.parameters.biases = vec![0.0; self.filters];
        Ok(())
    }

    /// Extract the kernel for (filter, channel) from the flat buffer.
    fn kernel(&self, filter: usize, channel: usize) -> Vec<Vec<f64>> {
        let (kh, kw) = self.kernel_size;
        let base = (filter * self.in_channels + channel) * kh * kw;
        (0..kh)
            .map(|ki| self.parameters.weights[base + ki * kw..base + (ki + 1) * kw].to_vec())
            .collect()
    }

    fn flip(kernel: &[Vec<f64>]) -> Vec<Vec<f64>> {
        kernel
            .iter()
            .rev()
            .map(|row| row.iter().rev().copied().collect())
            .collect()
    }

    fn pad(image: &[Vec<f64>], pad_h: usize, pad_w: usize) -> Vec<Vec<f64>> {
        let width = image.first().map_or(0, |r| r.len()) + 2 * pad_w;
        let mut result = Vec::with_capacity(image.len() + 2 * pad_h);
        for _ in 0..pad_h {
            result.push(vec![0.0; width]);
        }
        for row in image {
            let mut padded = vec![0.0; pad_w];
            padded.extend_from_slice(row);
            padded.extend(std::iter::repeat(0.0).take(pad_w));
            result.push(padded);
        }
        for _ in 0..pad_h {
            result.push(vec![0.0; width]);
        }
        result
    }

    /// Sliding-window dot product without kernel flipping.
    fn correlate(&self, kernel: &[Vec<f64>], image: &[Vec<f64>]) -> Vec<Vec<f64>> {
        let kernel_h = kernel.len();
        let kernel_w = kernel.first().map_or(0, |r| r.len());
        let out_h = (image.len() - kernel_h) / self.stride + 1;
        let out_w = (image[0].len() - kernel_w) / self.stride + 1;
        let mut result = vec![vec![0.0; out_w]; out_h];
        for i in 0..out_h {
            for j in 0..out_w {
                let mut sum = 0.0;
                for (ki, kernel_row) in kernel.iter().enumerate() {
                    for (kj, &k) in kernel_row.iter().enumerate() {
                        sum += image[i * self.stride + ki][j * self.stride + kj] * k;
                    }
                }
                result[i][j] = sum;
            }
        }
        result
    }

    pub fn forward(&mut self, input: Map3) -> Result<Map3> {
        if input.len() != self.in_channels {
            bail!(
                "conv input has {} channels, expected {}",
                input.len(),
                self.in_channels
            );
        }
        let mut preactivations = Vec::with_capacity(self.filters);
        for filter in 0..self.filters {
            let mut filter_result = vec![vec![0.0; self.output_width]; self.output_height];
            for (channel, image) in input.iter().enumerate() {
                let padded = Self::pad(image, self.padding, self.padding);
                let channel_result = self.correlate(&self.kernel(filter, channel), &padded);
                for (acc_row, row) in filter_result.iter_mut().zip(&channel_result) {
                    for (acc, &v) in acc_row.iter_mut().zip(row) {
                        *acc += v;
                    }
                }
            }
            let bias = self.parameters.biases[filter];
            for row in &mut filter_result {
                for cell in row {
                    *cell += bias;
                }
            }
            preactivations.push(filter_result);
        }
        let activations: Map3 = preactivations
            .iter()
            .map(|map| {
                map.iter()
                    .map(|row| row.iter().map(|&x| x.max(0.0)).collect())
                    .collect()
            })
            .collect();
        self.last_input = input;
        self.last_preactivations = preactivations;
        Ok(activations)
    }

    /// Weight gradient correlates each padded input channel with the delta
    /// map used as a sliding kernel; the input gradient is the full
    /// convolution: the delta map padded by `kernel - 1 - padding`,
    /// correlated with the 180-degree-flipped kernel, summed over filters.
    /// Both identities assume stride 1.
    pub fn backward(&mut self, upstream: &Map3) -> Result<(Map3, Parameters)> {
        if self.stride != 1 {
            bail!("Conv2d backward pass supports stride 1 only");
        }
        if self.last_input.len() != self.in_channels {
            bail!("conv backward called before forward");
        }
        if upstream.len() != self.filters
            || upstream.first().map_or(0, |m| m.len()) != self.output_height
        {
            bail!("conv gradient does not match the declared output shape");
        }
        let (kh, kw) = self.kernel_size;
        if self.padding >= kh || self.padding >= kw {
            bail!("Conv2d backward pass requires padding smaller than the kernel");
        }

        let mut gradient = self.parameters.zeros_like();

        // deltas and bias gradient
        let mut deltas = zeros_map3(self.filters, self.output_height, self.output_width);
        for filter in 0..self.filters {
            let mut delta_sum = 0.0;
            for i in 0..self.output_height {
                for j in 0..self.output_width {
                    let derivative = if self.last_preactivations[filter][i][j] > 0.0 {
                        1.0
                    } else {
                        0.0
                    };
                    let delta = upstream[filter][i][j] * derivative;
                    deltas[filter][i][j] = delta;
                    delta_sum += delta;
                }
            }
            gradient.biases[filter] = delta_sum;
        }

        // weight gradient
        for filter in 0..self.filters {
            for channel in 0..self.in_channels {
                let padded = Self::pad(&self.last_input[channel], self.padding, self.padding);
                let channel_result = self.correlate(&deltas[filter], &padded);
                let base = (filter * self.in_channels + channel) * kh * kw;
                for (ki, row) in channel_result.iter().enumerate() {
                    for (kj, &v) in row.iter().enumerate() {
                        gradient.weights[base + ki * kw + kj] = v;
                    }
                }
            }
        }

        // gradient w.r.t. input, summed across filters per channel
        let mut input_gradient = zeros_map3(self.in_channels, self.input_height, self.input_width);
        let pad_h = kh - 1 - self.padding;
        let pad_w = kw - 1 - self.padding;
        for filter in 0..self.filters {
            let padded_deltas = Self::pad(&deltas[filter], pad_h, pad_w);
            for channel in 0..self.in_channels {
                let flipped = Self::flip(&self.kernel(filter, channel));
                let channel_result = self.correlate(&flipped, &padded_deltas);
                for (acc_row, row) in input_gradient[channel].iter_mut().zip(&channel_result) {
                    for (acc, &v) in acc_row.iter_mut().zip(row) {
                        *acc += v;
                    }
                }
            }
        }

        Ok((input_gradient, gradient))
    }
}
