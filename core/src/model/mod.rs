//! The graph structure: nodes, operands and the facts known about them.
mod fact;
mod graph;
mod node;
pub mod order;

pub use self::fact::{Dim, Fact, ShapeFact};
pub use self::graph::Graph;
pub use self::node::{InletId, Node, Outlet, OutletId};

impl Graph {
    /// Computes an evaluation order for the graph outputs.
    pub fn eval_order(&self) -> crate::errors::RetraceResult<Vec<usize>> {
        order::eval_order(self)
    }
}
