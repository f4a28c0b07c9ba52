//! # retrace-torch
//!
//! Loads programs recorded by the PyTorch tracer into a
//! [`retrace_core::model::Graph`]. The graph still holds framework operators
//! ([`retrace_core::ops::traced::TracedOp`]); run the
//! [`retrace_core::normalize::Normalizer`] to get canonical ones.
//!
//! ```no_run
//! use retrace_torch::prelude::*;
//!
//! let graph = retrace_torch::torch().model_for_path("conv1d.trace.tar").unwrap();
//! println!("{} nodes", graph.nodes.len());
//! ```
#[macro_use]
extern crate log;

pub mod ast;
pub mod framework;
pub mod model;

pub use retrace_core;

pub use framework::Torch;

pub fn torch() -> Torch {
    Torch::default()
}

pub mod prelude {
    pub use crate::framework::Torch;
    pub use retrace_core::prelude::*;
}
