use std::fmt;

use crate::internal::*;

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: usize,
    /// Node name, also the name of its (only) output operand.
    pub name: String,
    pub inputs: Vec<OutletId>,
    pub op: Op,
    pub outputs: TVec<Outlet>,
}

impl Node {
    pub fn op(&self) -> &Op {
        &self.op
    }
}

impl fmt::Display for Node {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "#{} \"{}\" {}", self.id, self.name, self.op.name())
    }
}

/// An operand: the output slot of a node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Outlet {
    pub fact: Fact,
    /// Consumers of this operand. Back-references only.
    pub successors: TVec<InletId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, new)]
pub struct OutletId {
    pub node: usize,
    pub slot: usize,
}

impl fmt::Display for OutletId {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}/{}>", self.node, self.slot)
    }
}

impl From<usize> for OutletId {
    fn from(node: usize) -> OutletId {
        OutletId::new(node, 0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, new)]
pub struct InletId {
    pub node: usize,
    pub slot: usize,
}

impl fmt::Display for InletId {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, ">{}/{}", self.node, self.slot)
    }
}
