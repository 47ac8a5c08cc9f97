//! Forward and backward passes over a validated [`LayerGraph`].
//!
//! # Traversal
//!
//! Both passes walk the graph level by level. A layer joins the next level
//! once every layer feeding it (forward) or fed by it (backward) has been
//! processed, so on graphs with skip connections:
//!
//! - biases and activations are applied exactly once per layer;
//! - every gradient contribution is summed exactly once.
//!
//! # Batches
//!
//! [`NeuralNetwork::prepare_batches`] allocates one update buffer per batch
//! slot. Each backward pass writes `-learning_rate * gradient` into the slot
//! selected with [`NeuralNetwork::set_batch_slot`], and
//! [`NeuralNetwork::apply_batch`] adds the mean over slots to the parameters.
//!
//! # Example
//!
//! ```rust
//! use atomgrad::functions::Loss;
//! use atomgrad::init::{Distribution, RandomSampler};
//! use atomgrad::layers::{Activation, LayerGraph};
//! use atomgrad::network::NeuralNetwork;
//!
//! let mut graph = LayerGraph::new();
//! let input = graph.add_layer(2, Activation::Relu)?;
//! let output = graph.add_layer(2, Activation::Softmax)?;
//! graph.connect_dense(input, output)?;
//!
//! let mut net = NeuralNetwork::new(graph, input, output, Loss::cross_entropy(), 0.01)?;
//! net.initialize_weights(&mut RandomSampler::seeded(1), Distribution::Uniform)?;
//! net.prepare_batches(1)?;
//!
//! let probabilities = net.forward(&[0.5, -0.5])?.to_vec();
//! assert!((probabilities.iter().sum::<f64>() - 1.0).abs() < 1e-9);
//! let loss = net.backpropagate(&[1.0, 0.0])?;
//! assert!(loss > 0.0);
//! net.apply_batch()?;
//! # Ok::<(), atomgrad::NetError>(())
//! ```

use log::{debug, trace};
use rayon::prelude::*;

use crate::atoms::IndexedVariable;
use crate::error::{NetError, Result};
use crate::functions::Loss;
use crate::init::{Distribution, InitScheme, Sampler};
use crate::layers::{Activation, Layer, LayerGraph, LayerId, split_pair};

/// A layer graph with designated input and output layers and a loss.
#[derive(Debug, Clone)]
pub struct NeuralNetwork {
    graph: LayerGraph,
    input: LayerId,
    output: LayerId,
    loss: Loss,
    learning_rate: f64,
    current_loss: f64,
    batch_slot: usize,
    batch_size: usize,
}

impl NeuralNetwork {
    /// Wraps `graph` after checking it can be trained.
    ///
    /// # Errors
    ///
    /// - [`NetError::UnknownLayer`] if `input` or `output` is foreign;
    /// - [`NetError::Unconnected`] for a non-input layer with no incoming edge;
    /// - [`NetError::DeadEnd`] for a non-output layer with no outgoing edge;
    /// - [`NetError::InvalidConfig`] for a non-positive learning rate or when
    ///   input and output coincide.
    pub fn new(
        graph: LayerGraph,
        input: LayerId,
        output: LayerId,
        loss: Loss,
        learning_rate: f64,
    ) -> Result<Self> {
        let net = Self {
            graph,
            input,
            output,
            loss,
            learning_rate,
            current_loss: 0.0,
            batch_slot: 0,
            batch_size: 0,
        };
        net.validate()?;
        check_learning_rate(learning_rate)?;
        debug!(
            "network ready: {} layers, input {input}, output {output}, loss {}",
            net.graph.len(),
            net.loss.name()
        );
        Ok(net)
    }

    fn validate(&self) -> Result<()> {
        self.graph.check(self.input)?;
        self.graph.check(self.output)?;
        if self.input == self.output {
            return Err(NetError::InvalidConfig {
                reason: "input and output must be different layers".into(),
            });
        }
        for (id, layer) in self.graph.ids().zip(self.graph.layers()) {
            if id != self.input && layer.backward_edges().is_empty() {
                return Err(NetError::Unconnected { layer: id.index() });
            }
            if id != self.output && layer.forward_edges().is_empty() {
                return Err(NetError::DeadEnd { layer: id.index() });
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn graph(&self) -> &LayerGraph {
        &self.graph
    }

    #[must_use]
    pub fn input(&self) -> LayerId {
        self.input
    }

    #[must_use]
    pub fn output(&self) -> LayerId {
        self.output
    }

    #[must_use]
    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.graph.layer(id)
    }

    /// Mutable access for hand-set weights and biases.
    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.graph.layer_mut(id)
    }

    #[must_use]
    pub fn loss(&self) -> &Loss {
        &self.loss
    }

    #[must_use]
    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// # Errors
    ///
    /// [`NetError::InvalidConfig`] unless `learning_rate` is finite and positive.
    pub fn set_learning_rate(&mut self, learning_rate: f64) -> Result<()> {
        check_learning_rate(learning_rate)?;
        self.learning_rate = learning_rate;
        Ok(())
    }

    /// Loss computed by the most recent [`backpropagate`](Self::backpropagate).
    #[must_use]
    pub fn current_loss(&self) -> f64 {
        self.current_loss
    }

    #[must_use]
    pub fn batch_slot(&self) -> usize {
        self.batch_slot
    }

    /// Zero until [`prepare_batches`](Self::prepare_batches) has run.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Fills every weight from `sampler`.
    ///
    /// Each layer with incoming edges requests one block of
    /// `fan_in * size` values, where `fan_in` sums the sizes of its source
    /// layers. The output layer and softmax layers use [`InitScheme::Xavier`],
    /// everything else [`InitScheme::He`]. Blocks are consumed in source
    /// layer order, then source slot, then edge, then target slot.
    ///
    /// # Errors
    ///
    /// Sampler failures, or [`NetError::ShapeMismatch`] if a block has the
    /// wrong length.
    pub fn initialize_weights<S: Sampler + ?Sized>(
        &mut self,
        sampler: &mut S,
        distribution: Distribution,
    ) -> Result<()> {
        let layers = self.graph.layers_mut();

        let mut blocks: Vec<Vec<f64>> = Vec::with_capacity(layers.len());
        for (index, layer) in layers.iter().enumerate() {
            if layer.backward_edges.is_empty() {
                blocks.push(Vec::new());
                continue;
            }
            let fan_in: usize = layer
                .backward_edges
                .iter()
                .map(|source| layers[source.index()].size())
                .sum();
            let fan_out = layer.size();
            let scheme = if index == self.output.index()
                || matches!(layer.activation(), Activation::Softmax)
            {
                InitScheme::Xavier
            } else {
                InitScheme::He
            };

            let block = sampler.sample(fan_in, fan_out, scheme, distribution)?;
            if block.len() != fan_in * fan_out {
                return Err(NetError::ShapeMismatch {
                    what: "initial weight block",
                    expected: fan_in * fan_out,
                    got: block.len(),
                });
            }
            debug!("layer #{index}: {scheme:?} {distribution:?} init, fan_in {fan_in}, fan_out {fan_out}");
            blocks.push(block);
        }

        let mut cursors = vec![0usize; layers.len()];
        for layer in layers.iter_mut() {
            let Layer {
                weights,
                forward_edges,
                ..
            } = layer;
            for edges in weights.iter_mut() {
                for (row, target) in edges.iter_mut().zip(forward_edges.iter()) {
                    let t = target.index();
                    let start = cursors[t];
                    let len = row.len();
                    row.copy_from_slice(&blocks[t][start..start + len]);
                    cursors[t] += len;
                }
            }
        }
        Ok(())
    }

    /// Allocates zeroed update buffers for `batch_size` slots on every layer,
    /// mirroring the weight shapes exactly, and selects slot 0.
    ///
    /// # Errors
    ///
    /// [`NetError::InvalidConfig`] for a zero batch size; structural errors
    /// as in [`new`](Self::new).
    pub fn prepare_batches(&mut self, batch_size: usize) -> Result<()> {
        if batch_size == 0 {
            return Err(NetError::InvalidConfig {
                reason: "batch size must be at least 1".into(),
            });
        }
        self.validate()?;
        for layer in self.graph.layers_mut() {
            layer.allocate_updates(batch_size);
        }
        self.batch_size = batch_size;
        self.batch_slot = 0;
        debug!("allocated update buffers for batch size {batch_size}");
        Ok(())
    }

    /// Selects which batch slot the next backward pass writes into.
    ///
    /// # Errors
    ///
    /// [`NetError::BatchNotPrepared`] or [`NetError::BatchSlotOutOfRange`].
    pub fn set_batch_slot(&mut self, slot: usize) -> Result<()> {
        if self.batch_size == 0 {
            return Err(NetError::BatchNotPrepared);
        }
        if slot >= self.batch_size {
            return Err(NetError::BatchSlotOutOfRange {
                slot,
                batch_size: self.batch_size,
            });
        }
        self.batch_slot = slot;
        Ok(())
    }

    /// Runs one forward pass and returns the output layer's activations.
    ///
    /// Every buffer is zeroed first, `input` becomes the input layer's
    /// post-activation as-is, then each level accumulates
    /// `post[i] * weights[i][edge][j]` into its targets before the targets
    /// add their bias and activate.
    ///
    /// # Errors
    ///
    /// [`NetError::ShapeMismatch`] if `input` does not match the input layer,
    /// or any error raised by a custom activation expression.
    pub fn forward(&mut self, input: &[f64]) -> Result<&[f64]> {
        let input_id = self.input.index();
        let layers = self.graph.layers_mut();
        let expected = layers[input_id].size();
        if input.len() != expected {
            return Err(NetError::ShapeMismatch {
                what: "forward input",
                expected,
                got: input.len(),
            });
        }

        for layer in layers.iter_mut() {
            layer.reset();
        }
        layers[input_id].post_activation.copy_from_slice(input);

        let mut waiting: Vec<usize> = layers.iter().map(|l| l.backward_edges.len()).collect();
        let mut level = vec![input_id];
        while !level.is_empty() {
            let mut next = Vec::new();
            for &source in &level {
                for edge in 0..layers[source].forward_edges.len() {
                    let target = layers[source].forward_edges[edge].index();
                    let (from, to) = split_pair(layers, source, target);
                    accumulate(from, edge, to);

                    waiting[target] -= 1;
                    if waiting[target] == 0 {
                        next.push(target);
                    }
                }
            }
            for &id in &next {
                layers[id].activate()?;
            }
            trace!("forward level done: {next:?}");
            level = next;
        }

        Ok(&self.graph.layers()[self.output.index()].post_activation)
    }

    /// Backward pass for the most recent forward pass.
    ///
    /// Builds the loss over the output activations and `expected`, records it
    /// as [`current_loss`](Self::current_loss), seeds the output gradient one
    /// slot at a time from the loss derivative, then walks back towards the
    /// input. Weight and bias updates land in the current batch slot; the
    /// live parameters are untouched until [`apply_batch`](Self::apply_batch).
    /// The input layer's bias is never trained.
    ///
    /// # Errors
    ///
    /// [`NetError::BatchNotPrepared`], [`NetError::ShapeMismatch`] for a
    /// mis-sized `expected`, or any expression evaluation error.
    pub fn backpropagate(&mut self, expected: &[f64]) -> Result<f64> {
        if self.batch_size == 0 {
            return Err(NetError::BatchNotPrepared);
        }
        let (input_id, output_id) = (self.input.index(), self.output.index());
        let (slot, learning_rate) = (self.batch_slot, self.learning_rate);

        let output_size = self.graph.layers()[output_id].size();
        if expected.len() != output_size {
            return Err(NetError::ShapeMismatch {
                what: "expected output",
                expected: output_size,
                got: expected.len(),
            });
        }

        let predicted = IndexedVariable::new(
            "predicted",
            self.graph.layers()[output_id].post_activation.clone(),
        );
        let target = IndexedVariable::new("expected", expected);
        let loss = self.loss.build(&target, &predicted);
        predicted.set_in_respect_to(true);
        self.current_loss = loss.eval()?;

        let derivative = loss.derivative();
        let seed = (0..output_size)
            .map(|k| {
                predicted.set_current_index(k);
                derivative.eval()
            })
            .collect::<Result<Vec<f64>>>()?;

        let layers = self.graph.layers_mut();
        layers[output_id].gradient_post_activation.copy_from_slice(&seed);

        let mut waiting: Vec<usize> = layers.iter().map(|l| l.forward_edges.len()).collect();
        let mut level = vec![output_id];
        while !level.is_empty() {
            for &id in &level {
                if id == input_id {
                    continue;
                }
                layers[id].activation_gradient()?;
                layers[id].record_bias_update(slot, learning_rate);
            }

            let mut previous = Vec::new();
            for &id in &level {
                for edge in 0..layers[id].backward_edges.len() {
                    let source = layers[id].backward_edges[edge].index();
                    waiting[source] -= 1;
                    if waiting[source] == 0 {
                        previous.push(source);
                    }
                }
            }
            for &source in &previous {
                for edge in 0..layers[source].forward_edges.len() {
                    let target = layers[source].forward_edges[edge].index();
                    let (from, to) = split_pair(layers, source, target);
                    propagate(from, edge, to, slot, learning_rate);
                }
            }
            trace!("backward level done: {previous:?}");
            level = previous;
        }

        Ok(self.current_loss)
    }

    /// Adds the per-slot mean of every pending update to weights and biases.
    ///
    /// The buffers keep their contents; the next batch overwrites them slot
    /// by slot.
    ///
    /// # Errors
    ///
    /// [`NetError::BatchNotPrepared`].
    pub fn apply_batch(&mut self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(NetError::BatchNotPrepared);
        }
        for layer in self.graph.layers_mut() {
            layer.apply_updates();
        }
        debug!("applied batch of {}", self.batch_size);
        Ok(())
    }
}

fn check_learning_rate(learning_rate: f64) -> Result<()> {
    if learning_rate.is_finite() && learning_rate > 0.0 {
        Ok(())
    } else {
        Err(NetError::InvalidConfig {
            reason: format!("learning rate must be finite and positive, got {learning_rate}"),
        })
    }
}

/// `to.pre[j] += Σ_i from.post[i] * from.weights[i][edge][j]`
fn accumulate(from: &Layer, edge: usize, to: &mut Layer) {
    let post = &from.post_activation;
    let weights = &from.weights;
    to.pre_activation
        .par_iter_mut()
        .enumerate()
        .for_each(|(j, pre)| {
            *pre += post
                .iter()
                .zip(weights)
                .map(|(&a, w)| a * w[edge][j])
                .sum::<f64>();
        });
}

/// Records weight updates for one edge and pushes the target's gradient back.
fn propagate(from: &mut Layer, edge: usize, to: &Layer, slot: usize, learning_rate: f64) {
    let grad_pre = &to.gradient_pre_activation;
    let Layer {
        weights,
        post_activation,
        gradient_post_activation,
        weight_updates,
        ..
    } = from;
    let (weights, post_activation) = (&*weights, &*post_activation);

    weight_updates[slot]
        .par_iter_mut()
        .zip(gradient_post_activation.par_iter_mut())
        .enumerate()
        .for_each(|(i, (updates, grad_post))| {
            let a = post_activation[i];
            let row = &weights[i][edge];
            for (j, (update, &g)) in updates[edge].iter_mut().zip(grad_pre).enumerate() {
                *update = -learning_rate * a * g;
                *grad_post += row[j] * g;
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> (NeuralNetwork, LayerId, LayerId) {
        let mut graph = LayerGraph::new();
        let a = graph.add_layer(2, Activation::Relu).unwrap();
        let b = graph.add_layer(2, Activation::Relu).unwrap();
        graph.connect_dense(a, b).unwrap();
        let net = NeuralNetwork::new(graph, a, b, Loss::mean_squared_error(), 0.1).unwrap();
        (net, a, b)
    }

    #[test]
    fn backpropagate_requires_prepared_batches() {
        let (mut net, _, _) = chain();
        net.forward(&[1.0, 1.0]).unwrap();
        assert_eq!(net.backpropagate(&[0.0, 0.0]), Err(NetError::BatchNotPrepared));
        assert_eq!(net.set_batch_slot(0), Err(NetError::BatchNotPrepared));
    }

    #[test]
    fn batch_slot_bounds_are_checked() {
        let (mut net, _, _) = chain();
        net.prepare_batches(2).unwrap();
        assert!(net.set_batch_slot(1).is_ok());
        assert_eq!(
            net.set_batch_slot(2),
            Err(NetError::BatchSlotOutOfRange {
                slot: 2,
                batch_size: 2
            })
        );
    }

    #[test]
    fn forward_rejects_wrong_input_length() {
        let (mut net, _, _) = chain();
        assert!(matches!(
            net.forward(&[1.0]),
            Err(NetError::ShapeMismatch { expected: 2, got: 1, .. })
        ));
    }

    #[test]
    fn input_bias_is_never_trained() {
        let (mut net, a, _) = chain();
        net.prepare_batches(1).unwrap();
        net.forward(&[1.0, 2.0]).unwrap();
        net.backpropagate(&[5.0, 5.0]).unwrap();
        net.apply_batch().unwrap();
        assert_eq!(net.layer(a).unwrap().bias(), &[0.0, 0.0]);
    }

    #[test]
    fn invalid_learning_rates_are_rejected() {
        let (mut net, _, _) = chain();
        assert!(matches!(
            net.set_learning_rate(0.0),
            Err(NetError::InvalidConfig { .. })
        ));
        assert!(net.set_learning_rate(f64::NAN).is_err());
        assert!(net.set_learning_rate(0.5).is_ok());
    }
}
