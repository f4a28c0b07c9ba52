use retrace_core::internal::*;

/// A converted program, ready to run.
#[derive(Debug, Clone)]
pub struct InferenceModule {
    plan: SimplePlan<Graph>,
}

impl InferenceModule {
    pub fn new(graph: Graph) -> RetraceResult<InferenceModule> {
        if let Some(node) = graph.nodes().iter().find(|n| !n.op.is_canonical()) {
            bail!("Module holds non canonical operator {}", node);
        }
        Ok(InferenceModule { plan: SimplePlan::new(graph)? })
    }

    pub fn graph(&self) -> &Graph {
        self.plan.model()
    }

    /// Declared input facts, in input order.
    pub fn input_facts(&self) -> RetraceResult<TVec<Fact>> {
        let graph = self.graph();
        (0..graph.inputs.len()).map(|ix| graph.input_fact(ix).cloned()).collect()
    }

    /// One tensor per input, in order. Returns one tensor per output.
    pub fn run(&self, inputs: TVec<Tensor>) -> RetraceResult<TVec<Tensor>> {
        self.plan.run(inputs)
    }
}
