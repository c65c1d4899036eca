//! Metrics for evaluating network performance.
use crate::network::{Network, Sample};
use anyhow::{bail, Result};

fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold(0usize, |best, (i, &v)| if v > values[best] { i } else { best })
}

/// Fraction of samples whose predicted argmax class matches the target's
/// argmax class.
pub fn accuracy(network: &mut Network, data: &[Sample]) -> Result<f64> {
    if data.is_empty() {
        bail!("cannot compute accuracy over an empty sample set");
    }
    let mut correct = 0usize;
    for sample in data {
        let prediction = network.predict(&sample.data)?;
        if argmax(&prediction) == argmax(&sample.target) {
            correct += 1;
        }
    }
    Ok(correct as f64 / data.len() as f64)
}

/// Confusion matrix over argmax classes (for small class counts).
pub fn confusion_matrix(
    network: &mut Network,
    data: &[Sample],
    num_classes: usize,
) -> Result<Vec<Vec<usize>>> {
    let mut matrix = vec![vec![0usize; num_classes]; num_classes];
    for sample in data {
        let prediction = network.predict(&sample.data)?;
        let predicted = argmax(&prediction);
        let actual = argmax(&sample.target);
        if predicted < num_classes && actual < num_classes {
            matrix[actual][predicted] += 1;
        }
    }
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::argmax;

    #[test]
    fn argmax_picks_first_maximum() {
        assert_eq!(argmax(&[0.1, 0.9, 0.9]), 1);
        assert_eq!(argmax(&[1.0]), 0);
    }
}
