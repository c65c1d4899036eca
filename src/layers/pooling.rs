//! 2-D pooling with max and average modes.
use crate::tensor::{zeros_map3, Map3, TensorShape};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolMethod {
    Max,
    Avg,
}

#[derive(Debug, Clone)]
pub struct Pooling2d {
    pool_size: (usize, usize),
    stride: usize,
    method: PoolMethod,
    channels: usize,
    input_height: usize,
    input_width: usize,
    output_height: usize,
    output_width: usize,
    /// Per output cell, input coordinates of the forward-pass maximum.
    /// Only populated in max mode.
    argmax: Vec<Vec<Vec<(usize, usize)>>>,
}

impl Pooling2d {
    pub fn new(pool_size: (usize, usize), stride: usize, method: PoolMethod) -> Self {
        Self {
            pool_size,
            stride,
            method,
            channels: 0,
            input_height: 0,
            input_width: 0,
            output_height: 0,
            output_width: 0,
            argmax: Vec::new(),
        }
    }

    pub fn initialize(&mut self, previous: TensorShape) -> Result<()> {
        let (channels, height, width) = match previous {
            TensorShape::Dim3 {
                channels,
                height,
                width,
            } => (channels, height, width),
            TensorShape::Flat(_) => {
                bail!("Pooling2d expects a 3-D input, previous layer produces a flat vector")
            }
        };
        if self.stride == 0 {
            bail!("pooling stride must be at least 1");
        }
        if self.pool_size.0 == 0 || self.pool_size.1 == 0 {
            bail!("pooling window must be non-empty");
        }
        if self.pool_size.0 > height || self.pool_size.1 > width {
            bail!(
                "pooling window {}x{} larger than input {}x{}",
                self.pool_size.0,
                self.pool_size.1,
                height,
                width
            );
        }
        self.channels = channels;
        self.input_height = height;
        self.input_width = width;
        self.output_height = (height - self.pool_size.0) / self.stride + 1;
        self.output_width = (width - self.pool_size.1) / self.stride + 1;
        Ok(())
    }

    pub fn pool_size(&self) -> (usize, usize) {
        self.pool_size
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn method(&self) -> PoolMethod {
        self.method
    }

    pub fn output_shape(&self) -> TensorShape {
        TensorShape::Dim3 {
            channels: self.channels,
            height: self.output_height,
            width: self.output_width,
        }
    }

    pub fn input_shape(&self) -> TensorShape {
        TensorShape::Dim3 {
            channels: self.channels,
            height: self.input_height,
            width: self.input_width,
        }
    }

    fn window_max(&self, image: &[Vec<f64>], top: usize, left: usize) -> (f64, (usize, usize)) {
        let mut max = f64::NEG_INFINITY;
        let mut position = (top, left);
        for i in 0..self.pool_size.0 {
            for j in 0..self.pool_size.1 {
                let value = image[top + i][left + j];
                if value > max {
                    max = value;
                    position = (top + i, left + j);
                }
            }
        }
        (max, position)
    }

    fn window_average(&self, image: &[Vec<f64>], top: usize, left: usize) -> f64 {
        let mut sum = 0.0;
        for i in 0..self.pool_size.0 {
            for j in 0..self.pool_size.1 {
                sum += image[top + i][left + j];
            }
        }
        sum / (self.pool_size.0 * self.pool_size.1) as f64
    }

    pub fn forward(&mut self, input: &Map3) -> Result<Map3> {
        if input.len() != self.channels {
            bail!(
                "pooling input has {} channels, expected {}",
                input.len(),
                self.channels
            );
        }
        self.argmax = vec![
            vec![vec![(0, 0); self.output_width]; self.output_height];
            self.channels
        ];
        let mut result = zeros_map3(self.channels, self.output_height, self.output_width);
        for (c, image) in input.iter().enumerate() {
            for i in 0..self.output_height {
                for j in 0..self.output_width {
                    let top = i * self.stride;
                    let left = j * self.stride;
                    result[c][i][j] = match self.method {
                        PoolMethod::Max => {
                            let (max, position) = self.window_max(image, top, left);
                            self.argmax[c][i][j] = position;
                            max
                        }
                        PoolMethod::Avg => self.window_average(image, top, left),
                    };
                }
            }
        }
        Ok(result)
    }

    /// Route each output-cell gradient back into the input. Max mode sends
    /// the whole gradient to the recorded argmax coordinate; avg mode
    /// spreads it uniformly over the window. Overlapping windows sum their
    /// contributions.
    pub fn backward(&self, gradient: &Map3) -> Result<Map3> {
        if gradient.len() != self.channels
            || gradient.first().map_or(0, |c| c.len()) != self.output_height
        {
            bail!("pooling gradient does not match the declared output shape");
        }
        if self.method == PoolMethod::Max && self.argmax.is_empty() {
            bail!("pooling backward called before forward");
        }
        let mut result = zeros_map3(self.channels, self.input_height, self.input_width);
        let share = 1.0 / (self.pool_size.0 * self.pool_size.1) as f64;
        for c in 0..self.channels {
            for i in 0..self.output_height {
                for j in 0..self.output_width {
                    let g = gradient[c][i][j];
                    match self.method {
                        PoolMethod::Max => {
                            let (mi, mj) = self.argmax[c][i][j];
                            result[c][mi][mj] += g;
                        }
                        PoolMethod::Avg => {
                            let top = i * self.stride;
                            let left = j * self.stride;
                            for pi in 0..self.pool_size.0 {
                                for pj in 0..self.pool_size.1 {
                                    result[c][top + pi][left + pj] += g * share;
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(result)
    }
}
