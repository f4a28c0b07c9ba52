use retrace_core::internal::*;
use retrace_core::ops::array::{Pad, PadMode};
use retrace_core::ops::cnn::Conv1d;

use crate::ast::*;

pub const GRAPH_ID: &str = "main";
pub const FORMAT_VERSION: &str = "1.0";

/// Translate a canonical graph into a document and its tensor table.
pub fn to_proto_module(graph: &Graph) -> RetraceResult<ProtoModule> {
    let mut into_ast = IntoAst::new(graph);
    into_ast.translate()?;
    Ok(into_ast.into_proto_module())
}

pub struct IntoAst<'a> {
    pub graph: &'a Graph,
    pub parameters: Vec<String>,
    pub results: Vec<String>,
    pub tensors: HashMap<String, Arc<Tensor>>,
    pub body: Vec<Assignment>,
}

impl<'a> IntoAst<'a> {
    pub fn new(graph: &'a Graph) -> IntoAst<'a> {
        IntoAst {
            graph,
            parameters: vec![],
            results: vec![],
            tensors: HashMap::default(),
            body: vec![],
        }
    }

    fn translate(&mut self) -> RetraceResult<()> {
        let graph = self.graph;
        self.parameters =
            graph.input_outlets()?.iter().map(|o| graph.outlet_name(*o).to_string()).collect();
        for node in graph.nodes() {
            let right = self.node(node).with_context(|| format!("Serializing {node}"))?;
            let shape = node.outputs.first().and_then(|o| o.fact.shape.clone());
            self.body.push(Assignment { left: node.name.clone(), shape, right });
        }
        self.results =
            graph.output_outlets()?.iter().map(|o| graph.outlet_name(*o).to_string()).collect();
        Ok(())
    }

    fn into_proto_module(self) -> ProtoModule {
        let graph_def = GraphDef {
            id: GRAPH_ID.to_string(),
            parameters: self.parameters,
            results: self.results,
            body: self.body,
        };
        let doc = Document { version: FORMAT_VERSION.to_string(), graph_def };
        ProtoModule { doc, tensors: self.tensors }
    }

    fn node(&mut self, node: &Node) -> RetraceResult<Invocation> {
        let inputs: Vec<Argument> = node
            .inputs
            .iter()
            .map(|i| self.graph.outlet_name(*i).to_string())
            .map(|id| Argument::positional(RValue::Identifier(id)))
            .collect();
        let invocation = match &node.op {
            Op::Source => invocation("external", vec![]),
            Op::Const(tensor) => {
                self.tensors.insert(node.name.clone(), tensor.clone());
                invocation("variable", vec![Argument::named("label", &*node.name)])
            }
            Op::Conv1d(conv) => invocation("conv1d", inputs).with(conv1d_attributes(conv)),
            Op::Pad(pad) => invocation("pad", inputs).with(pad_attributes(&node.name, pad)?),
            Op::Traced(op) => bail!(ConvertError::serialization(
                &node.name,
                None,
                format!("framework operator {} has no canonical form", op.kind)
            )),
        };
        Ok(invocation)
    }
}

fn invocation(id: &str, arguments: Vec<Argument>) -> Invocation {
    Invocation { id: id.to_string(), arguments }
}

impl Invocation {
    fn with(mut self, named: Vec<Argument>) -> Invocation {
        self.arguments.extend(named);
        self
    }
}

fn conv1d_attributes(conv: &Conv1d) -> Vec<Argument> {
    vec![
        Argument::named("in_channels", conv.in_channels),
        Argument::named("out_channels", conv.out_channels),
        Argument::named("kernel_size", conv.kernel_size),
        Argument::named("stride", conv.stride),
        Argument::named("padding", vec![conv.padding.0, conv.padding.1]),
        Argument::named("dilation", conv.dilation),
        Argument::named("groups", conv.groups),
        Argument::named("bias", conv.bias),
        Argument::named("padding_mode", conv.padding_mode.as_str()),
    ]
}

fn pad_attributes(node: &str, pad: &Pad) -> RetraceResult<Vec<Argument>> {
    let mut attrs = vec![
        Argument::named("before", pad.before),
        Argument::named("after", pad.after),
        Argument::named("mode", pad.mode.name()),
    ];
    if let PadMode::Constant(value) = pad.mode {
        if !value.is_finite() {
            bail!(ConvertError::serialization(
                node,
                Some("value"),
                format!("pad value {value} can not be represented")
            ));
        }
        attrs.push(Argument::named("value", value));
    }
    Ok(attrs)
}
