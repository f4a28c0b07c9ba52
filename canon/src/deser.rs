//! Rebuilds a graph from its canonical description.
//!
//! Every failure here is a `LoadError`: the description was written by the
//! serializer, so anything it does not accept is a damaged or foreign file.
use retrace_core::internal::*;
use retrace_core::ops::array::{Pad, PadMode};
use retrace_core::ops::cnn::{Conv1d, PaddingMode};

use crate::ast::*;
use crate::ser::FORMAT_VERSION;

fn load_error(reason: impl Into<String>) -> RetraceError {
    ConvertError::load(reason).into()
}

pub struct GraphBuilder<'a> {
    proto: &'a ProtoModule,
    graph: Graph,
    mapping: HashMap<String, OutletId>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(proto: &'a ProtoModule) -> GraphBuilder<'a> {
        GraphBuilder { proto, graph: Graph::default(), mapping: HashMap::default() }
    }

    pub fn into_graph(mut self) -> RetraceResult<Graph> {
        let proto = self.proto;
        let doc = &proto.doc;
        if doc.version != FORMAT_VERSION {
            return Err(load_error(format!(
                "unsupported graph description version {} (expected {})",
                doc.version, FORMAT_VERSION
            )));
        }
        for assignment in &doc.graph_def.body {
            self.assignment(assignment).with_context(|| {
                format!("Loading {} = {}(..)", assignment.left, assignment.right.id)
            })?;
        }
        let inputs = self.outlets(&doc.graph_def.parameters)?;
        let sources = self.graph.nodes().iter().filter(|n| n.op == Op::Source).count();
        if inputs.len() != sources
            || inputs.iter().any(|i| self.graph.node(i.node).op != Op::Source)
        {
            return Err(load_error("graph parameters must list every external() exactly once"));
        }
        self.graph.inputs = inputs;
        let outputs = self.outlets(&doc.graph_def.results)?;
        self.graph.set_output_outlets(&outputs)?;
        self.graph.check_consistency().map_err(|e| load_error(format!("{e:#}")))?;
        Ok(self.graph)
    }

    fn outlets(&self, ids: &[String]) -> RetraceResult<Vec<OutletId>> {
        ids.iter().map(|id| self.resolve(id)).collect()
    }

    fn resolve(&self, id: &str) -> RetraceResult<OutletId> {
        self.mapping
            .get(id)
            .copied()
            .ok_or_else(|| load_error(format!("unresolved operand {id:?}")))
    }

    fn assignment(&mut self, assignment: &Assignment) -> RetraceResult<()> {
        let name = &*assignment.left;
        if self.mapping.contains_key(name) {
            return Err(load_error(format!("operand {name:?} is assigned twice")));
        }
        let inv = &assignment.right;
        let inputs = inv
            .positional()
            .map(|rv| match rv {
                RValue::Identifier(id) => self.resolve(id),
                RValue::Literal(lit) => {
                    Err(load_error(format!("expected an operand, got {lit:?}")))
                }
            })
            .collect::<RetraceResult<TVec<OutletId>>>()?;
        let fact = assignment.shape.clone().map(Fact::shape).unwrap_or_default();
        let outlet = match &*inv.id {
            "external" => {
                expect_inputs(&inputs, 0)?;
                self.graph.add_source(name, fact)?
            }
            "variable" => {
                expect_inputs(&inputs, 0)?;
                let label = string(inv, "label")?;
                let tensor = self
                    .proto
                    .tensors
                    .get(label)
                    .ok_or_else(|| load_error(format!("tensor {label:?} not found in module")))?;
                if !fact.shape.as_ref().map(|s| s.matches(tensor.shape())).unwrap_or(true) {
                    return Err(load_error(format!(
                        "tensor {label:?} has shape {:?}, declared {fact}",
                        tensor.shape()
                    )));
                }
                self.graph.add_const(name, tensor.clone())?
            }
            "conv1d" => {
                let op = conv1d(name, inv)?;
                expect_inputs(&inputs, if op.bias { 3 } else { 2 })?;
                self.wire(name, op, &inputs, fact)?
            }
            "pad" => {
                expect_inputs(&inputs, 1)?;
                let op = pad(inv)?;
                self.wire(name, op, &inputs, fact)?
            }
            other => return Err(load_error(format!("unknown operator {other}"))),
        };
        self.mapping.insert(name.to_string(), outlet);
        Ok(())
    }

    fn wire(
        &mut self,
        name: &str,
        op: impl Into<Op>,
        inputs: &[OutletId],
        fact: Fact,
    ) -> RetraceResult<OutletId> {
        let outlet = self.graph.wire_node(name, op, inputs)?;
        self.graph.set_outlet_fact(outlet, fact)?;
        Ok(outlet)
    }
}

fn expect_inputs(inputs: &[OutletId], count: usize) -> RetraceResult<()> {
    if inputs.len() != count {
        return Err(load_error(format!("expected {count} operands, got {}", inputs.len())));
    }
    Ok(())
}

fn conv1d(name: &str, inv: &Invocation) -> RetraceResult<Conv1d> {
    let padding = ints(inv, "padding")?;
    let &[before, after] = &*padding else {
        return Err(load_error(format!("padding must hold 2 values, got {padding:?}")));
    };
    let padding_mode = string(inv, "padding_mode")?;
    let op = Conv1d {
        in_channels: int(inv, "in_channels")?,
        out_channels: int(inv, "out_channels")?,
        kernel_size: int(inv, "kernel_size")?,
        stride: int(inv, "stride")?,
        padding: (before, after),
        dilation: int(inv, "dilation")?,
        groups: int(inv, "groups")?,
        bias: logical(inv, "bias")?,
        padding_mode: padding_mode
            .parse::<PaddingMode>()
            .map_err(|e| load_error(format!("padding_mode: {e:#}")))?,
    };
    op.validate(name).map_err(|e| load_error(format!("{e:#}")))?;
    Ok(op)
}

fn pad(inv: &Invocation) -> RetraceResult<Pad> {
    let mode = match string(inv, "mode")? {
        "constant" => PadMode::Constant(float(inv, "value")?),
        "reflect" => PadMode::Reflect,
        "replicate" => PadMode::Replicate,
        "circular" => PadMode::Circular,
        other => return Err(load_error(format!("unknown pad mode {other:?}"))),
    };
    Ok(Pad::new(int(inv, "before")?, int(inv, "after")?, mode))
}

fn literal<'i>(inv: &'i Invocation, name: &str) -> RetraceResult<&'i Literal> {
    match inv.named(name) {
        Some(RValue::Literal(lit)) => Ok(lit),
        Some(RValue::Identifier(id)) => {
            Err(load_error(format!("attribute {name} must be a literal, got operand {id:?}")))
        }
        None => Err(load_error(format!("missing attribute {name}"))),
    }
}

fn parse_usize(name: &str, lit: &Literal) -> RetraceResult<usize> {
    match lit {
        Literal::Numeric(n) => n.parse::<usize>().map_err(|_| {
            load_error(format!("attribute {name} must be a non-negative integer, got {n}"))
        }),
        other => Err(load_error(format!("attribute {name} must be an integer, got {other:?}"))),
    }
}

fn int(inv: &Invocation, name: &str) -> RetraceResult<usize> {
    parse_usize(name, literal(inv, name)?)
}

fn ints(inv: &Invocation, name: &str) -> RetraceResult<TVec<usize>> {
    match literal(inv, name)? {
        Literal::Array(items) => items.iter().map(|it| parse_usize(name, it)).collect(),
        other => Err(load_error(format!("attribute {name} must be an array, got {other:?}"))),
    }
}

fn float(inv: &Invocation, name: &str) -> RetraceResult<f32> {
    match literal(inv, name)? {
        Literal::Numeric(n) => {
            let invalid = |_| load_error(format!("attribute {name}: invalid number {n}"));
            n.parse::<f32>().map_err(invalid)
        }
        other => Err(load_error(format!("attribute {name} must be a number, got {other:?}"))),
    }
}

fn logical(inv: &Invocation, name: &str) -> RetraceResult<bool> {
    match literal(inv, name)? {
        Literal::Logical(b) => Ok(*b),
        other => Err(load_error(format!("attribute {name} must be true or false, got {other:?}"))),
    }
}

fn string<'i>(inv: &'i Invocation, name: &str) -> RetraceResult<&'i str> {
    match literal(inv, name)? {
        Literal::String(s) => Ok(s),
        other => Err(load_error(format!("attribute {name} must be a string, got {other:?}"))),
    }
}
