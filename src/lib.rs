//! atomgrad: symbolic differentiation and a small DAG neural network engine.
//!
//! Two layers share one numeric core:
//!
//! - expression trees ([`atoms`]) that evaluate against bound variables and
//!   differentiate symbolically, including reductions over indexed vectors;
//! - a layer graph ([`layers`], [`network`]) trained with mini-batch SGD,
//!   where closed-form gradients are used when available and expression
//!   trees fill in for everything else.
//!
//! # Features
//!
//! - Arbitrary directed acyclic layer graphs, skip connections included.
//! - ReLU and softmax in closed form; any other activation as an expression.
//! - Cross-entropy and mean squared error losses, or your own.
//! - He/Xavier initialisation behind a pluggable [`init::Sampler`].
//! - Mini-batch SGD with averaged updates and pluggable progress reporting.
//!
//! # Modules
//!
//! - [`atoms`]: expression nodes, variables, derivatives.
//! - [`functions`]: activations, losses, numeric guards.
//! - [`layers`]: layers and the graph connecting them.
//! - [`network`]: forward and backward passes, batch buffers.
//! - [`init`]: weight initialisation.
//! - [`data`], [`config`], [`train`]: datasets, hyperparameters, the SGD loop.
//!
//! # Example
//!
//! ```rust
//! use atomgrad::atoms::{Atom, ScalarVariable};
//!
//! let x = ScalarVariable::new("x");
//! let y = ScalarVariable::new("y");
//! x.set_in_respect_to(true);
//!
//! let ratio = Atom::from(&x) / Atom::from(&y);
//! let slope = ratio.derivative().eval_with(&[(&x, 2.0), (&y, 3.0)])?;
//! assert!((slope - 1.0 / 3.0).abs() < 1e-12);
//! # Ok::<(), atomgrad::NetError>(())
//! ```

pub mod atoms;
pub mod config;
pub mod data;
pub mod error;
pub mod functions;
pub mod init;
pub mod layers;
pub mod network;
pub mod train;

pub use error::{NetError, Result};
