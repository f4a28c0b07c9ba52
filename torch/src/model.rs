//! Translation of a traced program into a graph.
//!
//! `prim::*` statements are folded away: constants and lists become
//! attributes of the operators consuming them, parameters become constant
//! nodes. Every `aten::*` statement becomes one node, in trace order.
use retrace_core::internal::*;

use crate::ast::*;

pub const SUPPORTED_VERSION: i64 = 1;

/// What a trace value resolves to.
#[derive(Clone, Debug, PartialEq)]
enum Value {
    Attr(Attr),
    Tensor(OutletId),
}

fn load_error(reason: impl Into<String>) -> RetraceError {
    ConvertError::load(reason).into()
}

pub struct ModelBuilder<'a> {
    proto: &'a ProtoTrace,
    graph: Graph,
    values: HashMap<String, Value>,
}

impl<'a> ModelBuilder<'a> {
    pub fn new(proto: &'a ProtoTrace) -> ModelBuilder<'a> {
        ModelBuilder { proto, graph: Graph::default(), values: HashMap::default() }
    }

    pub fn into_graph(mut self) -> RetraceResult<Graph> {
        let proto = self.proto;
        let doc = &proto.doc;
        if doc.version != SUPPORTED_VERSION {
            return Err(load_error(format!(
                "unsupported trace format version {} (expected {})",
                doc.version, SUPPORTED_VERSION
            )));
        }
        for param in &doc.graph.parameters {
            let TypeSpec::Tensor(shape) = &param.spec else {
                return Err(load_error(format!(
                    "graph input %{} must be a tensor, found {:?}",
                    param.id, param.spec
                )));
            };
            let fact = shape.clone().map(Fact::shape).unwrap_or_default();
            let outlet = self.graph.add_source(&param.id, fact)?;
            self.define(&param.id, Value::Tensor(outlet))?;
        }
        for st in &doc.graph.statements {
            let value = self
                .statement(st)
                .with_context(|| format!("Loading statement %{} = {}", st.output.id, st.kind))?;
            self.define(&st.output.id, value)?;
        }
        let mut outputs = vec![];
        for result in &doc.graph.results {
            match self.resolve(result)? {
                Value::Tensor(outlet) => outputs.push(outlet),
                Value::Attr(_) => {
                    return Err(load_error(format!("returned value %{result} is not a tensor")))
                }
            }
        }
        self.graph.set_output_outlets(&outputs)?;
        let unused = proto.tensors.keys().filter(|k| self.graph.node_by_name(k).is_err()).count();
        if unused > 0 {
            debug!("{} tensors of the archive are not referenced by the trace", unused);
        }
        Ok(self.graph)
    }

    fn define(&mut self, id: &str, value: Value) -> RetraceResult<()> {
        if self.values.insert(id.to_string(), value).is_some() {
            return Err(load_error(format!("value %{id} is defined twice")));
        }
        Ok(())
    }

    fn resolve(&self, id: &str) -> RetraceResult<Value> {
        self.values
            .get(id)
            .cloned()
            .ok_or_else(|| load_error(format!("unresolved operand reference %{id}")))
    }

    fn statement(&mut self, st: &Statement) -> RetraceResult<Value> {
        match &*st.kind {
            "prim::Constant" => constant(st).map(Value::Attr),
            "prim::ListConstruct" => {
                let ints = st
                    .arguments
                    .iter()
                    .map(|arg| match self.resolve(arg)? {
                        Value::Attr(Attr::Int(i)) => Ok(i),
                        other => Err(load_error(format!(
                            "list item %{arg} is not an int constant: {other:?}"
                        ))),
                    })
                    .collect::<RetraceResult<TVec<i64>>>()?;
                Ok(Value::Attr(Attr::Ints(ints)))
            }
            "prim::Param" => {
                let Some(Literal::Str(label)) = st.attribute("name") else {
                    return Err(load_error("prim::Param needs a string name attribute"));
                };
                if let Ok(node) = self.graph.node_by_name(label) {
                    return Ok(Value::Tensor(OutletId::new(node.id, 0)));
                }
                let tensor = self
                    .proto
                    .tensors
                    .get(label)
                    .ok_or_else(|| load_error(format!("weight {label:?} not found in archive")))?;
                Ok(Value::Tensor(self.graph.add_const(label, tensor.clone())?))
            }
            symbol => {
                let Some(kind) = TracedKind::from_symbol(symbol) else {
                    return Err(load_error(format!("unknown operator kind {symbol}")));
                };
                self.operator(st, kind)
            }
        }
    }

    fn operator(&mut self, st: &Statement, kind: TracedKind) -> RetraceResult<Value> {
        let names = kind.argument_names();
        if st.arguments.len() < kind.required_arguments() || st.arguments.len() > names.len() {
            return Err(load_error(format!(
                "{} takes {} to {} arguments, got {}",
                kind,
                kind.required_arguments(),
                names.len(),
                st.arguments.len()
            )));
        }
        let mut inputs = tvec!();
        let mut params = BTreeMap::new();
        for (ix, (name, arg)) in names.iter().zip(st.arguments.iter()).enumerate() {
            match (TracedKind::is_tensor_argument(name), self.resolve(arg)?) {
                (true, Value::Tensor(outlet)) => {
                    if inputs.len() != ix {
                        return Err(load_error(format!("{name} follows a missing tensor argument")));
                    }
                    inputs.push(outlet)
                }
                (true, Value::Attr(Attr::None)) if *name == "bias" => (),
                (true, Value::Attr(attr)) => {
                    return Err(load_error(format!("argument {name} must be a tensor, got {attr}")))
                }
                (false, Value::Attr(attr)) => {
                    params.insert(name.to_string(), attr);
                }
                (false, Value::Tensor(_)) => {
                    return Err(load_error(format!(
                        "argument {name} must be a constant, got tensor %{arg}"
                    )))
                }
            }
        }
        let op = TracedOp::new(kind, params);
        trace!("%{} = {}", st.output.id, op);
        let outlet = self.graph.wire_node(&st.output.id, op, &inputs)?;
        if let TypeSpec::Tensor(Some(shape)) = &st.output.spec {
            self.graph.set_outlet_fact(outlet, Fact::shape(shape.clone()))?;
        }
        Ok(Value::Tensor(outlet))
    }
}

/// Constant literals are interpreted according to their declared type.
fn constant(st: &Statement) -> RetraceResult<Attr> {
    let ty = match &st.output.spec {
        TypeSpec::Scalar(s) => s.as_str(),
        TypeSpec::List(s) if s == "int" => "int[]",
        other => return Err(load_error(format!("unsupported constant type {other:?}"))),
    };
    let value = st.attribute("value");
    let attr = match (ty, value) {
        ("NoneType", None) => Attr::None,
        ("bool", Some(Literal::Bool(b))) => Attr::Bool(*b),
        ("bool", Some(Literal::Int(i @ (0 | 1)))) => Attr::Bool(*i == 1),
        ("int", Some(Literal::Int(i))) => Attr::Int(*i),
        ("float", Some(Literal::Float(f))) => Attr::Float(*f),
        ("float", Some(Literal::Int(i))) => Attr::Float(*i as f32),
        ("str", Some(Literal::Str(s))) => Attr::Str(s.clone()),
        ("int[]", Some(Literal::Ints(is))) => Attr::Ints(is.iter().copied().collect()),
        (ty, value) => {
            return Err(load_error(format!("constant of type {ty} can not hold {value:?}")))
        }
    };
    Ok(attr)
}
