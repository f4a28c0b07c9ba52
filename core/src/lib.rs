//! # retrace-core
//!
//! In-memory graph representation shared by the loaders and the serializer,
//! the canonical operator set, and the passes that bring a freshly loaded
//! traced program into canonical form:
//!
//! * [`normalize::Normalizer`] maps framework operators onto canonical ones
//!   and fuses explicit padding into convolutions,
//! * [`infer::Inferencer`] propagates and checks shapes,
//! * [`plan::SimplePlan`] evaluates a graph, traced or canonical, on concrete
//!   tensors.
//!
//! ```
//! use retrace_core::internal::*;
//! use retrace_core::ops::array::{Pad, PadMode};
//!
//! let mut graph = Graph::default();
//! let input = graph.add_source("input", Fact::shape(ShapeFact::known(&[1, 3]))).unwrap();
//! let padded = graph.wire_node("pad", Pad::new(1, 1, PadMode::Replicate), &[input]).unwrap();
//! graph.set_output_outlets(&[padded]).unwrap();
//! Inferencer::default().infer(&mut graph).unwrap();
//!
//! let plan = SimplePlan::new(&graph).unwrap();
//! let x = ndarray::arr2(&[[1f32, 2., 3.]]).into_dyn();
//! let y = plan.run(tvec!(x)).unwrap();
//! assert_eq!(y[0], ndarray::arr2(&[[1f32, 1., 2., 3., 3.]]).into_dyn());
//! ```

#[macro_use]
extern crate derive_new;
#[macro_use]
extern crate log;

pub mod errors;
pub mod framework;
pub mod infer;
pub mod model;
pub mod normalize;
pub mod ops;
pub mod plan;
pub mod tensor;

pub use anyhow;
pub use itertools;
pub use ndarray;
pub use smallvec;

/// A Smallvec instantiation with 4 embeddable values.
///
/// Used for node outputs, evaluation inputs and shapes.
pub type TVec<T> = smallvec::SmallVec<[T; 4]>;

#[macro_export]
macro_rules! tvec {
    // count helper: transform any expression into 1
    (@one $x:expr) => (1usize);
    ($elem:expr; $n:expr) => ({
        $crate::TVec::from_elem($elem, $n)
    });
    ($($x:expr),*$(,)*) => ({
        let count = 0usize $(+ $crate::tvec!(@one $x))*;
        #[allow(unused_mut)]
        let mut vec = $crate::TVec::new();
        if count <= vec.inline_size() {
            $(vec.push($x);)*
            vec
        } else {
            $crate::TVec::from_vec(vec![$($x,)*])
        }
    });
}

pub mod prelude {
    pub use crate::errors::{ConvertError, RetraceError, RetraceResult};
    pub use crate::framework::Framework;
    pub use crate::infer::Inferencer;
    pub use crate::model::{Dim, Fact, Graph, InletId, Node, Outlet, OutletId, ShapeFact};
    pub use crate::normalize::{NormalizeOptions, Normalizer};
    pub use crate::ops::Op;
    pub use crate::plan::SimplePlan;
    pub use crate::tensor::Tensor;
    pub use crate::tvec;
    pub use crate::TVec;
    pub use std::sync::Arc;
}

pub mod internal {
    pub use crate::framework::ArtifactFiles;
    pub use crate::ops::attr::Attr;
    pub use crate::ops::traced::{TracedKind, TracedOp};
    pub use crate::prelude::*;
    pub use anyhow::{anyhow, bail, ensure, format_err, Context as _};
    pub use itertools::Itertools;
    pub use ndarray;
    pub use std::borrow::Cow;
    pub use std::collections::{BTreeMap, HashMap};
}

#[cfg(test)]
fn setup_test_logger() {
    let _ = env_logger::Builder::from_env("RETRACE_LOG").try_init();
}
