//! Flatten: 3-D feature map to flat vector, channel-major then row-major.
use crate::tensor::{zeros_map3, Map3, TensorShape};
use anyhow::{bail, Result};

#[derive(Debug, Clone, Default)]
pub struct Flatten {
    channels: usize,
    height: usize,
    width: usize,
}

impl Flatten {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(&mut self, previous: TensorShape) -> Result<()> {
        match previous {
            TensorShape::Dim3 {
                channels,
                height,
                width,
            } => {
                self.channels = channels;
                self.height = height;
                self.width = width;
                Ok(())
            }
            TensorShape::Flat(_) => {
                bail!("Flatten expects a 3-D input, previous layer produces a flat vector")
            }
        }
    }

    pub fn input_shape(&self) -> TensorShape {
        TensorShape::Dim3 {
            channels: self.channels,
            height: self.height,
            width: self.width,
        }
    }

    pub fn output_shape(&self) -> TensorShape {
        TensorShape::Flat(self.channels * self.height * self.width)
    }

    /// Concatenate channel-major, then row-major. The backward pass relies
    /// on exactly this traversal order.
    pub fn forward(&self, input: &Map3) -> Vec<f64> {
        let mut result = Vec::with_capacity(self.channels * self.height * self.width);
        for channel in input {
            for row in channel {
                result.extend_from_slice(row);
            }
        }
        result
    }

    /// Rebuild the 3-D gradient by consuming the flat gradient in the same
    /// channel -> row -> column nesting `forward` emitted it in.
    pub fn backward(&self, gradient: &[f64]) -> Result<Map3> {
        if gradient.len() != self.channels * self.height * self.width {
            bail!(
                "flat gradient has {} entries, expected {}",
                gradient.len(),
                self.channels * self.height * self.width
            );
        }
        let mut result = zeros_map3(self.channels, self.height, self.width);
        let mut values = gradient.iter();
        for channel in &mut result {
            for row in channel {
                for cell in row {
                    *cell = *values.next().unwrap_or(&0.0);
                }
            }
        }
        Ok(result)
    }
}
