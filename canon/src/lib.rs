//! # retrace-canon
//!
//! Serialization of canonical graphs, and loading of the modules produced
//! that way.
//!
//! A converted program is written as two artifacts: a structural
//! description (`<prefix>.retrace.graph`, human readable) and a module
//! archive (`<prefix>.retrace.tar`) bundling the same description with one
//! tensor file per constant.
//!
//! ```no_run
//! use retrace_canon::prelude::*;
//!
//! let module = retrace_canon::canon().module_for_path("conv1d.retrace.tar").unwrap();
//! let input = Tensor::zeros(vec![1, 12, 64]);
//! let outputs = module.run(tvec!(input)).unwrap();
//! println!("{:?}", outputs[0].shape());
//! ```
#[macro_use]
extern crate log;

pub mod ast;
pub mod deser;
pub mod framework;
pub mod module;
pub mod ser;

pub use retrace_core;

pub use framework::{Artifacts, Canon};
pub use module::InferenceModule;

pub fn canon() -> Canon {
    Canon::default()
}

pub mod prelude {
    pub use crate::framework::{Artifacts, Canon};
    pub use crate::module::InferenceModule;
    pub use retrace_core::prelude::*;
}
