//! Layers and the directed acyclic graph that connects them.
//!
//! Layers live in an arena ([`LayerGraph`]) and refer to each other through
//! [`LayerId`] handles, so forward and backward adjacency never form
//! ownership cycles.
//!
//! Weights are stored on the *source* layer as a ragged structure:
//! `weights[slot][edge][target_slot]`, with one `edge` entry per outgoing
//! connection, each sized to that target layer.

use core::fmt;

use log::debug;
use rayon::prelude::*;

use crate::atoms::IndexedVariable;
use crate::error::{NetError, Result};
use crate::functions::{
    ActivationFn, relu, relu_derivative, softmax, softmax_jacobian,
};

/// Handle to a layer inside a [`LayerGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(usize);

impl LayerId {
    /// Position in the arena.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Activation applied after the bias.
#[derive(Debug, Clone)]
pub enum Activation {
    /// Closed-form ReLU on both passes.
    Relu,
    /// Closed-form softmax; the backward pass uses the full Jacobian.
    Softmax,
    /// Any expression-tree activation, differentiated symbolically.
    Custom(ActivationFn),
}

/// A vector of neurons with its buffers and outgoing weights.
#[derive(Debug, Clone)]
pub struct Layer {
    activation: Activation,
    pub(crate) pre_activation: Vec<f64>,
    pub(crate) post_activation: Vec<f64>,
    pub(crate) bias: Vec<f64>,
    pub(crate) gradient_pre_activation: Vec<f64>,
    pub(crate) gradient_post_activation: Vec<f64>,
    pub(crate) weights: Vec<Vec<Vec<f64>>>,
    pub(crate) forward_edges: Vec<LayerId>,
    pub(crate) backward_edges: Vec<LayerId>,
    pub(crate) weight_updates: Vec<Vec<Vec<Vec<f64>>>>,
    pub(crate) bias_updates: Vec<Vec<f64>>,
}

impl Layer {
    fn new(size: usize, activation: Activation) -> Self {
        Self {
            activation,
            pre_activation: vec![0.0; size],
            post_activation: vec![0.0; size],
            bias: vec![0.0; size],
            gradient_pre_activation: vec![0.0; size],
            gradient_post_activation: vec![0.0; size],
            weights: vec![Vec::new(); size],
            forward_edges: Vec::new(),
            backward_edges: Vec::new(),
            weight_updates: Vec::new(),
            bias_updates: Vec::new(),
        }
    }

    /// Number of neurons.
    #[must_use]
    pub fn size(&self) -> usize {
        self.bias.len()
    }

    #[must_use]
    pub fn activation(&self) -> &Activation {
        &self.activation
    }

    #[must_use]
    pub fn pre_activation(&self) -> &[f64] {
        &self.pre_activation
    }

    #[must_use]
    pub fn post_activation(&self) -> &[f64] {
        &self.post_activation
    }

    #[must_use]
    pub fn bias(&self) -> &[f64] {
        &self.bias
    }

    #[must_use]
    pub fn gradient_pre_activation(&self) -> &[f64] {
        &self.gradient_pre_activation
    }

    #[must_use]
    pub fn gradient_post_activation(&self) -> &[f64] {
        &self.gradient_post_activation
    }

    /// `weights[slot][edge][target_slot]`.
    #[must_use]
    pub fn weights(&self) -> &[Vec<Vec<f64>>] {
        &self.weights
    }

    #[must_use]
    pub fn forward_edges(&self) -> &[LayerId] {
        &self.forward_edges
    }

    #[must_use]
    pub fn backward_edges(&self) -> &[LayerId] {
        &self.backward_edges
    }

    /// Pending weight updates, one entry per batch slot.
    #[must_use]
    pub fn weight_updates(&self) -> &[Vec<Vec<Vec<f64>>>] {
        &self.weight_updates
    }

    /// Pending bias updates, one entry per batch slot.
    #[must_use]
    pub fn bias_updates(&self) -> &[Vec<f64>] {
        &self.bias_updates
    }

    /// Overwrites one weight.
    ///
    /// # Panics
    ///
    /// Panics if any index is out of range.
    pub fn set_weight(&mut self, slot: usize, edge: usize, target_slot: usize, value: f64) {
        self.weights[slot][edge][target_slot] = value;
    }

    /// Overwrites one bias.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is out of range.
    pub fn set_bias(&mut self, slot: usize, value: f64) {
        self.bias[slot] = value;
    }

    /// Zeroes activations and gradients before a forward pass.
    pub(crate) fn reset(&mut self) {
        for buffer in [
            &mut self.pre_activation,
            &mut self.post_activation,
            &mut self.gradient_pre_activation,
            &mut self.gradient_post_activation,
        ] {
            buffer.fill(0.0);
        }
    }

    pub(crate) fn allocate_updates(&mut self, batch_size: usize) {
        let shape: Vec<Vec<Vec<f64>>> = self
            .weights
            .iter()
            .map(|edges| edges.iter().map(|row| vec![0.0; row.len()]).collect())
            .collect();
        self.weight_updates = vec![shape; batch_size];
        self.bias_updates = vec![vec![0.0; self.size()]; batch_size];
    }

    /// Adds the bias, then fills `post_activation`.
    pub(crate) fn activate(&mut self) -> Result<()> {
        for (pre, bias) in self.pre_activation.iter_mut().zip(&self.bias) {
            *pre += bias;
        }

        match &self.activation {
            Activation::Relu => {
                for (post, &pre) in self.post_activation.iter_mut().zip(&self.pre_activation) {
                    *post = relu(pre);
                }
            }
            Activation::Softmax => {
                self.post_activation = softmax(&self.pre_activation);
            }
            Activation::Custom(function) => {
                let x = IndexedVariable::new("pre_activation", self.pre_activation.clone());
                let expression = function.build(&x);
                for (slot, post) in self.post_activation.iter_mut().enumerate() {
                    x.set_current_index(slot);
                    *post = expression.eval()?;
                }
            }
        }
        Ok(())
    }

    /// Turns `gradient_post_activation` into `gradient_pre_activation`.
    pub(crate) fn activation_gradient(&mut self) -> Result<()> {
        match &self.activation {
            Activation::Relu => {
                for ((grad_pre, &pre), &grad_post) in self
                    .gradient_pre_activation
                    .iter_mut()
                    .zip(&self.pre_activation)
                    .zip(&self.gradient_post_activation)
                {
                    *grad_pre = relu_derivative(pre) * grad_post;
                }
            }
            Activation::Softmax => {
                let s = softmax(&self.pre_activation);
                let grad_post = &self.gradient_post_activation;
                for (i, grad_pre) in self.gradient_pre_activation.iter_mut().enumerate() {
                    *grad_pre = grad_post
                        .iter()
                        .enumerate()
                        .map(|(o, &g)| softmax_jacobian(&s, o, i) * g)
                        .sum();
                }
            }
            Activation::Custom(function) => {
                let x = IndexedVariable::new("pre_activation", self.pre_activation.clone());
                x.set_in_respect_to(true);
                let derivative = function.build(&x).derivative();
                for (slot, (grad_pre, &grad_post)) in self
                    .gradient_pre_activation
                    .iter_mut()
                    .zip(&self.gradient_post_activation)
                    .enumerate()
                {
                    x.set_current_index(slot);
                    *grad_pre = derivative.eval()? * grad_post;
                }
            }
        }
        Ok(())
    }

    /// Stores `-learning_rate * gradient_pre_activation` into a batch slot.
    pub(crate) fn record_bias_update(&mut self, batch_slot: usize, learning_rate: f64) {
        for (update, &grad) in self.bias_updates[batch_slot]
            .iter_mut()
            .zip(&self.gradient_pre_activation)
        {
            *update = -learning_rate * grad;
        }
    }

    /// Adds the per-slot mean of every pending update to the live parameters.
    pub(crate) fn apply_updates(&mut self) {
        let Self {
            weights,
            weight_updates,
            bias,
            bias_updates,
            ..
        } = self;

        if weight_updates.is_empty() {
            return;
        }
        let batch = weight_updates.len() as f64;
        let weight_updates = &*weight_updates;

        weights.par_iter_mut().enumerate().for_each(|(slot, edges)| {
            for (edge, row) in edges.iter_mut().enumerate() {
                for (target, weight) in row.iter_mut().enumerate() {
                    let total: f64 = weight_updates.iter().map(|u| u[slot][edge][target]).sum();
                    *weight += total / batch;
                }
            }
        });

        for (slot, b) in bias.iter_mut().enumerate() {
            let total: f64 = bias_updates.iter().map(|u| u[slot]).sum();
            *b += total / batch;
        }
    }
}

/// Arena of layers plus their adjacency.
#[derive(Debug, Clone, Default)]
pub struct LayerGraph {
    layers: Vec<Layer>,
}

impl LayerGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an unconnected layer of `size` neurons with zero biases.
    ///
    /// # Errors
    ///
    /// [`NetError::EmptyLayer`] if `size` is zero.
    pub fn add_layer(&mut self, size: usize, activation: Activation) -> Result<LayerId> {
        if size == 0 {
            return Err(NetError::EmptyLayer);
        }
        let id = LayerId(self.layers.len());
        self.layers.push(Layer::new(size, activation));
        Ok(id)
    }

    /// Fully connects `from` to `to`.
    ///
    /// Appends `to` to `from`'s forward edges, `from` to `to`'s backward edges,
    /// and one zeroed weight row sized to `to` under every slot of `from`.
    /// Branching (one source, many targets) and merging (many sources, one
    /// target) are both allowed.
    ///
    /// # Errors
    ///
    /// [`NetError::UnknownLayer`] for foreign handles and [`NetError::Cycle`]
    /// if `from` is reachable from `to`.
    pub fn connect_dense(&mut self, from: LayerId, to: LayerId) -> Result<()> {
        self.check(from)?;
        self.check(to)?;
        if from == to || self.reaches(to, from) {
            return Err(NetError::Cycle {
                from: from.0,
                to: to.0,
            });
        }

        let target_size = self.layers[to.0].size();
        let source = &mut self.layers[from.0];
        source.forward_edges.push(to);
        for edges in &mut source.weights {
            edges.push(vec![0.0; target_size]);
        }
        self.layers[to.0].backward_edges.push(from);

        debug!("connected layer {from} -> {to} ({target_size} targets per source slot)");
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    #[must_use]
    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(id.0)
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.get_mut(id.0)
    }

    /// Every handle in arena order.
    pub fn ids(&self) -> impl Iterator<Item = LayerId> + use<> {
        (0..self.layers.len()).map(LayerId)
    }

    pub(crate) fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub(crate) fn layers_mut(&mut self) -> &mut [Layer] {
        &mut self.layers
    }

    pub(crate) fn check(&self, id: LayerId) -> Result<()> {
        if id.0 < self.layers.len() {
            Ok(())
        } else {
            Err(NetError::UnknownLayer { layer: id.0 })
        }
    }

    fn reaches(&self, start: LayerId, goal: LayerId) -> bool {
        let mut seen = vec![false; self.layers.len()];
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if id == goal {
                return true;
            }
            if !std::mem::replace(&mut seen[id.0], true) {
                stack.extend(self.layers[id.0].forward_edges.iter().copied());
            }
        }
        false
    }
}

/// Borrows two distinct layers, the first mutably.
pub(crate) fn split_pair(layers: &mut [Layer], first: usize, second: usize) -> (&mut Layer, &mut Layer) {
    assert_ne!(first, second, "a layer cannot be paired with itself");
    if first < second {
        let (head, tail) = layers.split_at_mut(second);
        (&mut head[first], &mut tail[0])
    } else {
        let (head, tail) = layers.split_at_mut(first);
        (&mut tail[0], &mut head[second])
    }
}
