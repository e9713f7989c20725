//! Reverse-mode automatic differentiation over scalars, and the tiny
//! feed-forward network trainer built on it.
//!
//! ```
//! use microdiff::Graph;
//!
//! let graph = Graph::new();
//! let a = graph.leaf(3.0);
//! let c = a * a;
//! c.backward();
//! assert_eq!(a.grad(), 6.0);
//! ```
//!
//! Gradients are written only by backward passes and reset through
//! [`Graph::zero_grad`]; there is no public setter.
//!
//! ```compile_fail
//! use microdiff::Graph;
//!
//! let graph = Graph::new();
//! let a = graph.leaf(1.0);
//! graph.set_grad(a.id(), 5.0);
//! ```

pub mod backwards;
pub mod config;
pub mod error;
pub mod nn;
mod rules;
pub mod train;

pub use backwards::{Checkpoint, Graph, NodeId, Op, Var};
pub use config::TrainConfig;
pub use error::{ConfigError, Error, Result};
pub use nn::{Layer, Mlp, Module, Neuron};
pub use train::{sum_squared_error, Dataset, Sgd, Snapshot, TrainReport, Trainer};
