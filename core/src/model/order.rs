use crate::internal::*;

pub fn eval_order(graph: &Graph) -> RetraceResult<Vec<usize>> {
    let inputs = graph.input_outlets()?.iter().map(|n| n.node).collect::<Vec<usize>>();
    let targets = graph.output_outlets()?.iter().map(|n| n.node).collect::<Vec<usize>>();
    eval_order_for_nodes(graph.nodes(), &inputs, &targets)
}

pub fn eval_order_for_nodes(
    nodes: &[Node],
    inputs: &[usize],
    targets: &[usize],
) -> RetraceResult<Vec<usize>> {
    let mut done = bit_set::BitSet::with_capacity(nodes.len());
    let mut pending = bit_set::BitSet::with_capacity(nodes.len());
    let mut needed: Vec<usize> = vec![];
    let mut order: Vec<usize> = vec![];
    for &t in targets {
        ensure!(t < nodes.len(), "Output refers to missing node #{}", t);
        needed.push(t);
    }
    while let Some(&node) = needed.last() {
        if done.contains(node) {
            needed.pop();
            continue;
        }
        if inputs.contains(&node) || nodes[node].inputs.iter().all(|i| done.contains(i.node)) {
            order.push(node);
            needed.pop();
            done.insert(node);
        } else {
            ensure!(pending.insert(node), "Cycle detected around node {}", nodes[node]);
            for input in nodes[node].inputs.iter().rev() {
                if !done.contains(input.node) {
                    needed.push(input.node);
                }
            }
        }
    }
    Ok(order)
}
