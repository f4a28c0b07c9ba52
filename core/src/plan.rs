use std::borrow::Borrow;

use crate::internal::*;
use crate::model::order::eval_order_for_nodes;

/// Evaluates a graph on concrete inputs, in a precomputed order.
#[derive(Debug, Clone)]
pub struct SimplePlan<M: Borrow<Graph>> {
    pub model: M,
    pub outputs: Vec<OutletId>,
    pub order: Vec<usize>,
    /// For each node, the last step reading its output.
    pub values_needed_until_step: Vec<usize>,
}

impl<M: Borrow<Graph>> SimplePlan<M> {
    /// This contructor returns a plan that will compute all the model default outputs in one pass.
    pub fn new(model: M) -> RetraceResult<SimplePlan<M>> {
        let outputs = model.borrow().output_outlets()?.to_vec();
        Self::new_for_outputs(model, &outputs)
    }

    /// This contructor returns a plan that will compute all specified outputs in one pass.
    pub fn new_for_outputs(model: M, outputs: &[OutletId]) -> RetraceResult<SimplePlan<M>> {
        let graph = model.borrow();
        let inputs = graph.input_outlets()?.iter().map(|n| n.node).collect::<Vec<usize>>();
        let outputs_nodes = outputs.iter().map(|n| n.node).collect::<Vec<usize>>();
        let order = eval_order_for_nodes(graph.nodes(), &inputs, &outputs_nodes)?;
        let mut values_needed_until_step = vec![0; graph.nodes().len()];
        for (step, node) in order.iter().enumerate() {
            for i in &graph.node(*node).inputs {
                values_needed_until_step[i.node] = step;
            }
        }
        for o in outputs.iter() {
            values_needed_until_step[o.node] = order.len();
        }
        Ok(SimplePlan { model, order, outputs: outputs.to_vec(), values_needed_until_step })
    }

    pub fn model(&self) -> &Graph {
        self.model.borrow()
    }

    /// Run the graph. Inputs are given in graph input order, outputs come
    /// back in graph output order.
    pub fn run(&self, inputs: TVec<Tensor>) -> RetraceResult<TVec<Tensor>> {
        let model = self.model();
        ensure!(
            inputs.len() == model.inputs.len(),
            "Graph has {} inputs, got {} tensors",
            model.inputs.len(),
            inputs.len()
        );
        let mut values: Vec<Option<Arc<Tensor>>> = vec![None; model.nodes().len()];
        for (ix, (input, outlet)) in inputs.into_iter().zip(model.inputs.iter()).enumerate() {
            let fact = model.outlet_fact(*outlet)?;
            if let Some(shape) = &fact.shape {
                ensure!(
                    shape.matches(input.shape()),
                    "Input #{} ({}) is expected to be {}, got {:?}",
                    ix,
                    model.outlet_name(*outlet),
                    shape,
                    input.shape()
                );
            }
            values[outlet.node] = Some(Arc::new(input));
        }
        for (step, n) in self.order.iter().enumerate() {
            let node = model.node(*n);
            trace!("Running step {}, node {}", step, node);
            if node.op != Op::Source {
                let inputs: TVec<Arc<Tensor>> = node
                    .inputs
                    .iter()
                    .map(|i| {
                        values[i.node].clone().with_context(|| format!("Missing value for {i}"))
                    })
                    .collect::<RetraceResult<_>>()?;
                let inputs: TVec<&Tensor> = inputs.iter().map(|t| &**t).collect();
                let output = node
                    .op
                    .eval(&node.name, &inputs)
                    .with_context(|| format!("Evaluating {node}"))?;
                values[node.id] = Some(Arc::new(output));
            }
            for i in &node.inputs {
                if self.values_needed_until_step[i.node] == step {
                    values[i.node] = None;
                }
            }
        }
        self.outputs
            .iter()
            .map(|o| {
                let value = values[o.node]
                    .as_ref()
                    .with_context(|| format!("Output {o} was not computed"))?;
                Ok(Tensor::clone(value))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::array::{Pad, PadMode};
    use crate::ops::cnn::Conv1d;
    use ndarray::arr3;

    #[test]
    fn run_pad_then_conv() {
        crate::setup_test_logger();
        let mut g = Graph::default();
        let x = g.add_source("x", Fact::shape(ShapeFact::known(&[1, 1, 3]))).unwrap();
        let w = g.add_const("w", Arc::new(arr3(&[[[1f32, 1.]]]).into_dyn())).unwrap();
        let p = g.wire_node("p", Pad::new(1, 1, PadMode::Replicate), &[x]).unwrap();
        let conv = Conv1d { kernel_size: 2, ..Conv1d::default() };
        let c = g.wire_node("c", conv, &[p, w]).unwrap();
        g.set_output_outlets(&[c, p]).unwrap();
        let plan = SimplePlan::new(&g).unwrap();
        let out = plan.run(tvec!(arr3(&[[[1f32, 2., 3.]]]).into_dyn())).unwrap();
        assert_eq!(out[0], arr3(&[[[2f32, 3., 5., 6.]]]).into_dyn());
        assert_eq!(out[1], arr3(&[[[1f32, 1., 2., 3., 3.]]]).into_dyn());
    }

    #[test]
    fn run_checks_inputs() {
        let mut g = Graph::default();
        let x = g.add_source("x", Fact::shape(ShapeFact::known(&[1, 1, 3]))).unwrap();
        let p = g.wire_node("p", Pad::new(1, 1, PadMode::Replicate), &[x]).unwrap();
        g.set_output_outlets(&[p]).unwrap();
        let plan = SimplePlan::new(g).unwrap();
        assert!(plan.run(tvec!()).is_err());
        assert!(plan.run(tvec!(Tensor::zeros(vec![1, 1, 4]))).is_err());
        assert!(plan.run(tvec!(Tensor::zeros(vec![1, 1, 3]))).is_ok());
    }
}
