//! In-memory datasets of `(input, expected)` pairs.
//!
//! A [`Dataset`] is checked once on construction (every sample has the same
//! input and target length, and every value is finite) through `briny`'s
//! [`Validate`]/[`TrustedData`] gate, so the trainer never re-checks shapes
//! per step.

use briny::prelude::*;

use crate::error::{NetError, Result};

struct RawDataset {
    inputs: Vec<Vec<f64>>,
    expected: Vec<Vec<f64>>,
}

impl RawDataset {
    fn problem(&self) -> Option<String> {
        if self.inputs.len() != self.expected.len() {
            return Some(format!(
                "{} inputs but {} targets",
                self.inputs.len(),
                self.expected.len()
            ));
        }
        let input_len = self.inputs.first().map_or(0, Vec::len);
        let output_len = self.expected.first().map_or(0, Vec::len);
        for (i, (x, y)) in self.inputs.iter().zip(&self.expected).enumerate() {
            if x.len() != input_len || y.len() != output_len {
                return Some(format!(
                    "sample {i} has shape ({}, {}), expected ({input_len}, {output_len})",
                    x.len(),
                    y.len()
                ));
            }
            if x.iter().chain(y).any(|v| !v.is_finite()) {
                return Some(format!("sample {i} contains a non-finite value"));
            }
        }
        None
    }
}

impl Validate for RawDataset {
    fn validate(&self) -> Result<(), ValidationError> {
        match self.problem() {
            Some(_) => Err(ValidationError),
            None => Ok(()),
        }
    }
}

/// Validated samples, stored in order.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    inputs: Vec<Vec<f64>>,
    expected: Vec<Vec<f64>>,
}

impl Dataset {
    /// # Errors
    ///
    /// [`NetError::InvalidDataset`] when lengths disagree or a value is not finite.
    pub fn new(inputs: Vec<Vec<f64>>, expected: Vec<Vec<f64>>) -> Result<Self> {
        let raw = RawDataset { inputs, expected };
        let reason = raw.problem();
        let trusted = TrustedData::new(raw).map_err(|_| NetError::InvalidDataset {
            reason: reason.unwrap_or_else(|| "rejected by validation".into()),
        })?;
        let RawDataset { inputs, expected } = trusted.into_inner();
        Ok(Self { inputs, expected })
    }

    /// Builds a classification dataset, one-hot encoding each label.
    ///
    /// # Errors
    ///
    /// As [`Dataset::new`], plus labels outside `0..classes`.
    pub fn from_labels(inputs: Vec<Vec<f64>>, labels: &[usize], classes: usize) -> Result<Self> {
        let expected = labels
            .iter()
            .map(|&label| {
                if label < classes {
                    Ok(one_hot(label, classes))
                } else {
                    Err(NetError::InvalidDataset {
                        reason: format!("label {label} outside 0..{classes}"),
                    })
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(inputs, expected)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Length of every input vector (0 when empty).
    #[must_use]
    pub fn input_len(&self) -> usize {
        self.inputs.first().map_or(0, Vec::len)
    }

    /// Length of every target vector (0 when empty).
    #[must_use]
    pub fn output_len(&self) -> usize {
        self.expected.first().map_or(0, Vec::len)
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<(&[f64], &[f64])> {
        let input = self.inputs.get(index)?;
        let expected = self.expected.get(index)?;
        Some((input.as_slice(), expected.as_slice()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[f64], &[f64])> {
        self.inputs
            .iter()
            .zip(&self.expected)
            .map(|(x, y)| (x.as_slice(), y.as_slice()))
    }
}

/// `classes`-long vector with a single 1 at `label`.
///
/// # Panics
///
/// Panics if `label >= classes`.
#[must_use]
pub fn one_hot(label: usize, classes: usize) -> Vec<f64> {
    assert!(label < classes, "label {label} out of range for {classes} classes");
    let mut v = vec![0.0; classes];
    v[label] = 1.0;
    v
}

/// Index of the first largest value.
#[must_use]
pub fn argmax(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, top)) if top >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ragged_samples_are_rejected() {
        let err = Dataset::new(vec![vec![1.0, 2.0], vec![1.0]], vec![vec![0.0], vec![1.0]])
            .unwrap_err();
        assert!(matches!(err, NetError::InvalidDataset { ref reason } if reason.contains("sample 1")));
    }

    #[test]
    fn non_finite_values_are_rejected() {
        assert!(Dataset::new(vec![vec![f64::NAN]], vec![vec![0.0]]).is_err());
    }

    #[test]
    fn labels_become_one_hot_targets() {
        let data = Dataset::from_labels(vec![vec![0.0], vec![1.0]], &[2, 0], 3).unwrap();
        assert_eq!(data.output_len(), 3);
        assert_eq!(data.get(0).unwrap().1, &[0.0, 0.0, 1.0]);
        assert!(Dataset::from_labels(vec![vec![0.0]], &[3], 3).is_err());
    }

    #[test]
    fn argmax_prefers_the_first_maximum() {
        assert_eq!(argmax(&[0.1, 0.7, 0.7, 0.2]), Some(1));
        assert_eq!(argmax(&[]), None);
    }
}
