//! Shape propagation and attribute checking.
use crate::internal::*;

#[derive(Debug, Clone, Default)]
pub struct Inferencer;

impl Inferencer {
    /// Bind the graph inputs, in order, to declared shapes. A declared
    /// shape must agree with what the graph already knows.
    pub fn bind_input_shapes(&self, graph: &mut Graph, shapes: &[ShapeFact]) -> RetraceResult<()> {
        if shapes.len() > graph.inputs.len() {
            bail!(ConvertError::shape(
                "inputs",
                format!("{} shapes declared for {} graph inputs", shapes.len(), graph.inputs.len())
            ));
        }
        for (ix, declared) in shapes.iter().enumerate() {
            let outlet = graph.inputs[ix];
            let name = graph.outlet_name(outlet).to_string();
            let current = graph.outlet_fact(outlet)?;
            if let Some(traced) = &current.shape {
                if !traced.compatible_with(declared) {
                    bail!(ConvertError::shape(
                        name,
                        format!("declared shape {declared} contradicts traced shape {traced}")
                    ));
                }
            }
            debug!("Binding input {} to {}", name, declared);
            graph.set_outlet_fact(outlet, Fact::shape(declared.clone()))?;
        }
        Ok(())
    }

    /// Compute every node output fact. Nodes are stored in topological
    /// order, so one forward sweep is enough.
    pub fn infer(&self, graph: &mut Graph) -> RetraceResult<()> {
        for id in 0..graph.nodes.len() {
            let node = graph.node(id);
            let inputs: TVec<Fact> = node
                .inputs
                .iter()
                .map(|i| graph.outlet_fact(*i).cloned())
                .collect::<RetraceResult<_>>()?;
            let inputs: TVec<&Fact> = inputs.iter().collect();
            let facts = node.op.output_facts(node, &inputs)?;
            ensure!(
                facts.len() == node.outputs.len(),
                "{} computes {} outputs, expected {}",
                node,
                facts.len(),
                node.outputs.len()
            );
            trace!("{} => {}", node, facts.iter().join(", "));
            for (slot, fact) in facts.into_iter().enumerate() {
                graph.set_outlet_fact(OutletId::new(id, slot), fact)?;
            }
        }
        Ok(())
    }
}
