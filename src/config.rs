//! Training hyperparameters.

use crate::error::{NetError, Result};
use crate::init::Distribution;

/// Knobs for [`Trainer`](crate::train::Trainer).
///
/// Defaults: learning rate `0.003`, batch size `32`, `10` epochs, a progress
/// report every `100` batches, uniform weight initialisation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingConfig {
    pub learning_rate: f64,
    pub batch_size: usize,
    pub epochs: usize,
    /// Batches between two progress reports.
    pub report_every: usize,
    pub distribution: Distribution,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.003,
            batch_size: 32,
            epochs: 10,
            report_every: 100,
            distribution: Distribution::Uniform,
        }
    }
}

impl TrainingConfig {
    #[must_use]
    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    #[must_use]
    pub fn with_report_every(mut self, report_every: usize) -> Self {
        self.report_every = report_every;
        self
    }

    #[must_use]
    pub fn with_distribution(mut self, distribution: Distribution) -> Self {
        self.distribution = distribution;
        self
    }

    /// # Errors
    ///
    /// [`NetError::InvalidConfig`] for a non-positive or non-finite learning
    /// rate, or a zero batch size or report interval.
    pub fn validate(&self) -> Result<()> {
        let reason = if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            format!("learning rate must be finite and positive, got {}", self.learning_rate)
        } else if self.batch_size == 0 {
            "batch size must be at least 1".to_owned()
        } else if self.report_every == 0 {
            "report interval must be at least 1".to_owned()
        } else {
            return Ok(());
        };
        Err(NetError::InvalidConfig { reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = TrainingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_size, 32);
        assert!((config.learning_rate - 0.003).abs() < 1e-15);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let config = TrainingConfig::default().with_batch_size(0);
        assert!(matches!(config.validate(), Err(NetError::InvalidConfig { .. })));
    }

    #[test]
    fn negative_learning_rate_is_rejected() {
        assert!(TrainingConfig::default().with_learning_rate(-1.0).validate().is_err());
    }
}
