//! Mini-batch SGD over a [`Dataset`].
//!
//! ## Loop
//!
//! For every epoch the dataset is walked in order, one full batch at a time
//! (a trailing partial batch is skipped). Each sample gets its own batch
//! slot, a forward pass and a backward pass; the batch is then applied as
//! the mean of the per-slot updates.
//!
//! Progress goes through a [`Reporter`]. [`LogReporter`] forwards to the
//! `log` facade, `()` discards everything, and a `Vec<Report>` collects.

use log::{debug, info};

use crate::config::TrainingConfig;
use crate::data::{Dataset, argmax};
use crate::error::{NetError, Result};
use crate::init::Sampler;
use crate::network::NeuralNetwork;

/// Running averages over the batches since the previous report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Report {
    pub epoch: usize,
    /// Batches completed in this epoch.
    pub step: usize,
    pub average_loss: f64,
    pub accuracy: f64,
}

/// Receives periodic progress.
pub trait Reporter {
    fn report(&mut self, report: &Report);
}

impl Reporter for () {
    fn report(&mut self, _: &Report) {}
}

impl Reporter for Vec<Report> {
    fn report(&mut self, report: &Report) {
        self.push(*report);
    }
}

/// Writes each report at `info` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&mut self, report: &Report) {
        info!(
            "epoch {} step {}: loss {:.6}, accuracy {:.4}",
            report.epoch, report.step, report.average_loss, report.accuracy
        );
    }
}

/// Totals for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatchStats {
    pub examples: usize,
    pub loss_sum: f64,
    pub correct: usize,
}

impl BatchStats {
    fn merge(&mut self, other: Self) {
        self.examples += other.examples;
        self.loss_sum += other.loss_sum;
        self.correct += other.correct;
    }

    #[must_use]
    pub fn average_loss(&self) -> f64 {
        if self.examples == 0 { 0.0 } else { self.loss_sum / self.examples as f64 }
    }

    /// Fraction of samples whose predicted argmax matched the target's.
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        if self.examples == 0 { 0.0 } else { self.correct as f64 / self.examples as f64 }
    }
}

/// Outcome of [`Trainer::fit`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrainingSummary {
    pub epochs: usize,
    /// Batches applied across all epochs.
    pub steps: usize,
    /// Totals over the final epoch.
    pub last_epoch: BatchStats,
}

/// Drives a [`NeuralNetwork`] with a [`TrainingConfig`].
#[derive(Debug, Clone, Default)]
pub struct Trainer {
    config: TrainingConfig,
}

impl Trainer {
    #[must_use]
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Initialises every weight using the configured distribution.
    ///
    /// # Errors
    ///
    /// As [`NeuralNetwork::initialize_weights`].
    pub fn initialize<S: Sampler + ?Sized>(
        &self,
        network: &mut NeuralNetwork,
        sampler: &mut S,
    ) -> Result<()> {
        network.initialize_weights(sampler, self.config.distribution)
    }

    /// Runs every configured epoch.
    ///
    /// The network takes the configured learning rate and gets fresh batch
    /// buffers before the first step.
    ///
    /// # Errors
    ///
    /// Invalid configuration, a dataset whose shapes do not fit the network,
    /// or any error from the passes themselves.
    pub fn fit<R: Reporter + ?Sized>(
        &self,
        network: &mut NeuralNetwork,
        dataset: &Dataset,
        reporter: &mut R,
    ) -> Result<TrainingSummary> {
        self.config.validate()?;
        check_shapes(network, dataset)?;
        network.set_learning_rate(self.config.learning_rate)?;
        network.prepare_batches(self.config.batch_size)?;

        let batch_size = self.config.batch_size;
        let mut summary = TrainingSummary::default();
        for epoch in 0..self.config.epochs {
            let mut epoch_stats = BatchStats::default();
            let mut window = BatchStats::default();
            let mut step = 0;
            let mut start = 0;
            while start + batch_size <= dataset.len() {
                let stats = self.train_batch(network, dataset, start)?;
                epoch_stats.merge(stats);
                window.merge(stats);
                step += 1;
                start += batch_size;

                if step % self.config.report_every == 0 {
                    reporter.report(&Report {
                        epoch,
                        step,
                        average_loss: window.average_loss(),
                        accuracy: window.accuracy(),
                    });
                    window = BatchStats::default();
                }
            }
            debug!(
                "epoch {epoch} finished after {step} batches, mean loss {:.6}",
                epoch_stats.average_loss()
            );
            summary.epochs += 1;
            summary.steps += step;
            summary.last_epoch = epoch_stats;
        }
        Ok(summary)
    }

    /// Trains on `batch_size` consecutive samples starting at `start`, then
    /// applies the batch.
    ///
    /// # Errors
    ///
    /// [`NetError::InvalidDataset`] if the batch runs past the end of the
    /// dataset, plus any error from the passes.
    pub fn train_batch(
        &self,
        network: &mut NeuralNetwork,
        dataset: &Dataset,
        start: usize,
    ) -> Result<BatchStats> {
        if network.batch_size() != self.config.batch_size {
            network.prepare_batches(self.config.batch_size)?;
        }

        let mut stats = BatchStats::default();
        for slot in 0..self.config.batch_size {
            let index = start + slot;
            let (input, expected) = dataset.get(index).ok_or_else(|| NetError::InvalidDataset {
                reason: format!("sample {index} out of range for {} samples", dataset.len()),
            })?;

            network.set_batch_slot(slot)?;
            let predicted = argmax(network.forward(input)?);
            stats.loss_sum += network.backpropagate(expected)?;
            stats.examples += 1;
            if predicted.is_some() && predicted == argmax(expected) {
                stats.correct += 1;
            }
        }
        network.apply_batch()?;
        Ok(stats)
    }
}

fn check_shapes(network: &NeuralNetwork, dataset: &Dataset) -> Result<()> {
    if dataset.is_empty() {
        return Ok(());
    }
    let sizes = |id| network.layer(id).map_or(0, |layer| layer.size());
    let input = sizes(network.input());
    if dataset.input_len() != input {
        return Err(NetError::ShapeMismatch {
            what: "dataset input",
            expected: input,
            got: dataset.input_len(),
        });
    }
    let output = sizes(network.output());
    if dataset.output_len() != output {
        return Err(NetError::ShapeMismatch {
            what: "dataset target",
            expected: output,
            got: dataset.output_len(),
        });
    }
    Ok(())
}
