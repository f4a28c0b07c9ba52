use crate::internal::*;

/// Main graph class.
///
/// Nodes are kept in topological order: a node only consumes operands
/// produced by nodes with a lower id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Graph {
    /// all nodes in the graph
    pub nodes: Vec<Node>,
    /// graph inputs, in declaration order
    pub inputs: Vec<OutletId>,
    /// graph outputs, in declaration order
    pub outputs: Vec<OutletId>,
}

impl Graph {
    pub fn add_source(&mut self, name: impl Into<String>, fact: Fact) -> RetraceResult<OutletId> {
        let id = self.add_node(name, Op::Source, tvec!(fact))?;
        let id = OutletId::new(id, 0);
        self.inputs.push(id);
        Ok(id)
    }

    pub fn add_const(
        &mut self,
        name: impl Into<String>,
        tensor: Arc<Tensor>,
    ) -> RetraceResult<OutletId> {
        let fact = Fact::for_tensor(&tensor);
        let id = self.add_node(name, Op::Const(tensor), tvec!(fact))?;
        Ok(OutletId::new(id, 0))
    }

    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        op: impl Into<Op>,
        output_facts: TVec<Fact>,
    ) -> RetraceResult<usize> {
        let name = name.into();
        ensure!(
            !self.nodes.iter().any(|n| n.name == name),
            "Operand name {:?} is already used in this graph",
            name
        );
        let id = self.nodes.len();
        let outputs =
            output_facts.into_iter().map(|fact| Outlet { fact, successors: tvec!() }).collect();
        let node = Node { id, name, op: op.into(), inputs: vec![], outputs };
        self.nodes.push(node);
        Ok(id)
    }

    /// Connect a node outlet to a node inlet.
    pub fn add_edge(&mut self, outlet: OutletId, inlet: InletId) -> RetraceResult<()> {
        ensure!(
            outlet.node < inlet.node,
            "Edge {} -> {} would break topological order",
            outlet,
            inlet
        );
        ensure!(
            self.nodes.get(outlet.node).map(|n| outlet.slot < n.outputs.len()).unwrap_or(false),
            "No such outlet {}",
            outlet
        );
        if let Some(previous) = self.nodes[inlet.node].inputs.get(inlet.slot).cloned() {
            self.nodes[previous.node].outputs[previous.slot]
                .successors
                .retain(|succ| *succ != inlet);
        }
        self.nodes[outlet.node].outputs[outlet.slot].successors.push(inlet);
        let succ = &mut self.nodes[inlet.node];
        #[allow(clippy::comparison_chain)]
        if inlet.slot == succ.inputs.len() {
            succ.inputs.push(outlet);
        } else if inlet.slot < succ.inputs.len() {
            succ.inputs[inlet.slot] = outlet;
        } else {
            bail!(
                "Edges must be added in order and consecutive. \
                 Trying to connect input {:?} of node {}",
                inlet.slot,
                succ
            )
        }
        Ok(())
    }

    /// Add a single-output node consuming `inputs`. Its fact is left unknown
    /// until shape inference runs.
    pub fn wire_node(
        &mut self,
        name: impl Into<String>,
        op: impl Into<Op>,
        inputs: &[OutletId],
    ) -> RetraceResult<OutletId> {
        let id = self.add_node(name, op, tvec!(Fact::unknown()))?;
        for (ix, i) in inputs.iter().enumerate() {
            self.add_edge(*i, InletId::new(id, ix))?;
        }
        Ok(OutletId::new(id, 0))
    }

    pub fn node(&self, id: usize) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: usize) -> &mut Node {
        &mut self.nodes[id]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node_by_name(&self, name: impl AsRef<str>) -> RetraceResult<&Node> {
        let name = name.as_ref();
        self.nodes
            .iter()
            .find(|n| n.name == name)
            .with_context(|| format!("No node found for name: {name:?}"))
    }

    // Inputs

    pub fn input_outlets(&self) -> RetraceResult<&[OutletId]> {
        Ok(&self.inputs)
    }

    pub fn input_fact(&self, ix: usize) -> RetraceResult<&Fact> {
        let input = self
            .inputs
            .get(ix)
            .with_context(|| format!("Graph has {} inputs, no input #{ix}", self.inputs.len()))?;
        self.outlet_fact(*input)
    }

    pub fn set_input_fact(&mut self, ix: usize, fact: Fact) -> RetraceResult<()> {
        let input = *self
            .inputs
            .get(ix)
            .with_context(|| format!("Graph has {} inputs, no input #{ix}", self.inputs.len()))?;
        self.set_outlet_fact(input, fact)
    }

    // Outputs

    pub fn output_outlets(&self) -> RetraceResult<&[OutletId]> {
        Ok(&self.outputs)
    }

    pub fn set_output_outlets(&mut self, outputs: &[OutletId]) -> RetraceResult<()> {
        self.outputs = outputs.to_vec();
        Ok(())
    }

    // Operands

    pub fn outlet_fact(&self, outlet: OutletId) -> RetraceResult<&Fact> {
        self.nodes
            .get(outlet.node)
            .and_then(|n| n.outputs.get(outlet.slot))
            .map(|o| &o.fact)
            .with_context(|| format!("Invalid outlet reference {outlet}"))
    }

    pub fn set_outlet_fact(&mut self, outlet: OutletId, fact: Fact) -> RetraceResult<()> {
        let o = self
            .nodes
            .get_mut(outlet.node)
            .and_then(|n| n.outputs.get_mut(outlet.slot))
            .with_context(|| format!("Invalid outlet reference {outlet}"))?;
        o.fact = fact;
        Ok(())
    }

    pub fn outlet_successors(&self, outlet: OutletId) -> &[InletId] {
        &self.nodes[outlet.node].outputs[outlet.slot].successors
    }

    pub fn outlet_name(&self, outlet: OutletId) -> &str {
        &self.nodes[outlet.node].name
    }

    /// Drop nodes that no output depends on, and renumber the survivors.
    /// Graph inputs are always kept. Relative order is preserved.
    pub fn compact(&mut self) -> RetraceResult<()> {
        let mut live = vec![false; self.nodes.len()];
        let mut stack: Vec<usize> =
            self.outputs.iter().chain(self.inputs.iter()).map(|o| o.node).collect();
        while let Some(n) = stack.pop() {
            if !live[n] {
                live[n] = true;
                stack.extend(self.nodes[n].inputs.iter().map(|i| i.node));
            }
        }
        let mut mapping = vec![None; self.nodes.len()];
        let mut nodes = Vec::with_capacity(self.nodes.len());
        for mut node in self.nodes.drain(..) {
            if live[node.id] {
                mapping[node.id] = Some(nodes.len());
                node.id = nodes.len();
                nodes.push(node);
            } else {
                debug!("Dropping dead node {node}");
            }
        }
        let remap = |o: &OutletId| -> RetraceResult<OutletId> {
            mapping[o.node]
                .map(|n| OutletId::new(n, o.slot))
                .with_context(|| format!("Live node depends on dropped outlet {o}"))
        };
        for node in nodes.iter_mut() {
            node.inputs = node.inputs.iter().map(remap).collect::<RetraceResult<_>>()?;
            for outlet in node.outputs.iter_mut() {
                outlet.successors.clear();
            }
        }
        let edges: Vec<(OutletId, InletId)> = nodes
            .iter()
            .flat_map(|n| {
                n.inputs.iter().enumerate().map(move |(slot, i)| (*i, InletId::new(n.id, slot)))
            })
            .collect();
        for (outlet, inlet) in edges {
            nodes[outlet.node].outputs[outlet.slot].successors.push(inlet);
        }
        self.inputs = self.inputs.iter().map(remap).collect::<RetraceResult<_>>()?;
        self.outputs = self.outputs.iter().map(remap).collect::<RetraceResult<_>>()?;
        self.nodes = nodes;
        Ok(())
    }

    /// Check the structural invariants: topological order, unique names,
    /// coherent successor lists, valid inputs and outputs.
    pub fn check_consistency(&self) -> RetraceResult<()> {
        for (ix, node) in self.nodes.iter().enumerate() {
            ensure!(node.id == ix, "Node {} is stored at position {}", node, ix);
            if let Some(other) = self.nodes[..ix].iter().find(|n| n.name == node.name) {
                bail!("Nodes {} and {} share a name", other, node);
            }
            for (slot, input) in node.inputs.iter().enumerate() {
                ensure!(
                    input.node < ix,
                    "Node {} consumes {} which is not produced by a prior node",
                    node,
                    input
                );
                let outlet = self.nodes[input.node]
                    .outputs
                    .get(input.slot)
                    .with_context(|| format!("Node {node} consumes missing outlet {input}"))?;
                ensure!(
                    outlet.successors.contains(&InletId::new(ix, slot)),
                    "Outlet {} does not list consumer {}",
                    input,
                    node
                );
            }
            for (slot, outlet) in node.outputs.iter().enumerate() {
                for succ in &outlet.successors {
                    ensure!(
                        self.nodes.get(succ.node).and_then(|n| n.inputs.get(succ.slot))
                            == Some(&OutletId::new(ix, slot)),
                        "Outlet {}/{} lists {} as a consumer, but it is not",
                        ix,
                        slot,
                        succ
                    );
                }
            }
        }
        for input in &self.inputs {
            ensure!(
                self.nodes.get(input.node).map(|n| n.op == Op::Source).unwrap_or(false),
                "Graph input {} is not a source",
                input
            );
        }
        for output in &self.outputs {
            self.outlet_fact(*output)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::array::{Pad, PadMode};

    fn chain() -> Graph {
        let mut g = Graph::default();
        let x = g.add_source("x", Fact::unknown()).unwrap();
        let a = g.wire_node("a", Pad::new(1, 1, PadMode::Reflect), &[x]).unwrap();
        let b = g.wire_node("b", Pad::new(0, 2, PadMode::Replicate), &[a]).unwrap();
        g.set_output_outlets(&[b]).unwrap();
        g
    }

    #[test]
    fn wiring_tracks_successors() {
        let g = chain();
        g.check_consistency().unwrap();
        assert_eq!(g.outlet_successors(OutletId::new(0, 0)), &[InletId::new(1, 0)]);
        assert_eq!(g.outlet_successors(OutletId::new(1, 0)), &[InletId::new(2, 0)]);
    }

    #[test]
    fn names_are_unique() {
        let mut g = chain();
        let pad = Pad::new(1, 1, PadMode::Reflect);
        assert!(g.wire_node("a", pad, &[OutletId::new(2, 0)]).is_err());
    }

    #[test]
    fn rewire_then_compact() {
        let mut g = chain();
        // bypass "a"
        g.add_edge(OutletId::new(0, 0), InletId::new(2, 0)).unwrap();
        assert!(g.outlet_successors(OutletId::new(1, 0)).is_empty());
        g.compact().unwrap();
        g.check_consistency().unwrap();
        assert_eq!(g.nodes.len(), 2);
        assert_eq!(g.nodes[1].name, "b");
        assert_eq!(g.nodes[1].inputs, vec![OutletId::new(0, 0)]);
        assert_eq!(g.outputs, vec![OutletId::new(1, 0)]);
    }

    #[test]
    fn compact_keeps_unused_inputs() {
        let mut g = Graph::default();
        let x = g.add_source("x", Fact::unknown()).unwrap();
        let _y = g.add_source("y", Fact::unknown()).unwrap();
        let p = g.wire_node("p", Pad::new(1, 0, PadMode::Constant(0.0)), &[x]).unwrap();
        g.set_output_outlets(&[p]).unwrap();
        g.compact().unwrap();
        assert_eq!(g.inputs.len(), 2);
        assert_eq!(g.nodes.len(), 3);
    }
}
