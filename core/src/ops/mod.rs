//! Ops
use std::fmt;

use crate::internal::*;

pub mod array;
pub mod attr;
pub mod cnn;
pub mod traced;

use self::array::Pad;
use self::cnn::Conv1d;

/// Every operator a graph can hold: graph inputs, constants, framework
/// operators awaiting normalization, and the canonical set.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Source,
    Const(Arc<Tensor>),
    Traced(TracedOp),
    Conv1d(Conv1d),
    Pad(Pad),
}

impl Op {
    pub fn name(&self) -> Cow<'_, str> {
        match self {
            Op::Source => "Source".into(),
            Op::Const(_) => "Const".into(),
            Op::Traced(t) => t.kind.symbol().into(),
            Op::Conv1d(_) => "Conv1d".into(),
            Op::Pad(_) => "Pad".into(),
        }
    }

    /// True for operators the serializer can write.
    pub fn is_canonical(&self) -> bool {
        !matches!(self, Op::Traced(_))
    }

    pub fn output_facts(&self, node: &Node, inputs: &[&Fact]) -> RetraceResult<TVec<Fact>> {
        match self {
            Op::Source => Ok(node.outputs.iter().map(|o| o.fact.clone()).collect()),
            Op::Const(t) => Ok(tvec!(Fact::for_tensor(t))),
            Op::Traced(t) => t.canonical(&node.name, inputs)?.output_facts(node, inputs),
            Op::Conv1d(c) => c.output_facts(&node.name, inputs),
            Op::Pad(p) => p.output_facts(&node.name, inputs),
        }
    }

    pub fn eval(&self, node: &str, inputs: &[&Tensor]) -> RetraceResult<Tensor> {
        match self {
            Op::Source => bail!("Source {} has no value of its own", node),
            Op::Const(t) => Ok(Tensor::clone(t)),
            Op::Traced(t) => t.eval(node, inputs),
            Op::Conv1d(c) => c.eval(inputs),
            Op::Pad(p) => {
                ensure!(inputs.len() == 1, "Pad expects 1 input, got {}", inputs.len());
                p.eval(inputs[0])
            }
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Op::Source => write!(f, "Source"),
            Op::Const(t) => write!(f, "Const{:?}", t.shape()),
            Op::Traced(t) => write!(f, "{t}"),
            Op::Conv1d(c) => write!(f, "{c}"),
            Op::Pad(p) => write!(f, "{p}"),
        }
    }
}

impl From<TracedOp> for Op {
    fn from(op: TracedOp) -> Op {
        Op::Traced(op)
    }
}

impl From<Conv1d> for Op {
    fn from(op: Conv1d) -> Op {
        Op::Conv1d(op)
    }
}

impl From<Pad> for Op {
    fn from(op: Pad) -> Op {
        Op::Pad(op)
    }
}
