//! # retrace
//!
//! Command line driver: loads a traced program, converts it, writes the
//! artifacts and optionally checks the result against the trace.
#[macro_use]
extern crate log;

pub mod check;
pub mod convert;
pub mod params;

pub use retrace_canon;
pub use retrace_core;
pub use retrace_torch;
