//! Brings framework operators into canonical form.
//!
//! A single pass in node order: every traced operator is replaced by its
//! canonical counterpart, then each convolution looks at its data input and
//! absorbs the pad operator producing it when the pair is compatible.
use crate::internal::*;
use crate::ops::cnn::{Conv1d, PaddingMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// Fold explicit pad operators into the convolutions they feed.
    pub fuse_padding: bool,
}

impl Default for NormalizeOptions {
    fn default() -> NormalizeOptions {
        NormalizeOptions { fuse_padding: true }
    }
}

impl NormalizeOptions {
    pub fn with_fuse_padding(self, fuse_padding: bool) -> NormalizeOptions {
        NormalizeOptions { fuse_padding, ..self }
    }
}

#[derive(Debug, Clone, Default, new)]
pub struct Normalizer {
    pub options: NormalizeOptions,
}

impl Normalizer {
    pub fn normalize(&self, graph: &mut Graph) -> RetraceResult<()> {
        graph.check_consistency()?;
        let mut lowered = 0;
        let mut fused = 0;
        for id in 0..graph.nodes.len() {
            let Op::Traced(traced) = &graph.nodes[id].op else { continue };
            let node = &graph.nodes[id];
            let facts: TVec<Fact> = node
                .inputs
                .iter()
                .map(|i| graph.outlet_fact(*i).cloned())
                .collect::<RetraceResult<_>>()?;
            let facts: TVec<&Fact> = facts.iter().collect();
            let op = traced
                .canonical(&node.name, &facts)
                .with_context(|| format!("Normalizing {node}"))?;
            debug!("{} becomes {}", node, op);
            graph.nodes[id].op = op;
            lowered += 1;
            if self.options.fuse_padding && self.fuse_pad(graph, id)? {
                fused += 1;
            }
        }
        graph.compact()?;
        info!("Normalized {} operators, fused {} pads", lowered, fused);
        Ok(())
    }

    fn unfusable_reason(graph: &Graph, conv_id: usize, conv: &Conv1d) -> Option<String> {
        let data = graph.node(conv_id).inputs[0];
        let Op::Pad(pad) = &graph.node(data.node).op else { return None };
        if conv.has_padding() {
            return Some("the convolution already pads its input".into());
        }
        if graph.outlet_successors(data) != [InletId::new(conv_id, 0)] {
            return Some("the padded operand has other consumers".into());
        }
        if graph.outputs.contains(&data) {
            return Some("the padded operand is a graph output".into());
        }
        match pad.mode.as_padding_mode() {
            None => Some(format!("{} padding has no convolution counterpart", pad.mode)),
            Some(PaddingMode::Zeros) => None,
            Some(mode) if !pad.is_symmetric() => Some(format!(
                "{} padding of ({}, {}) is asymmetric",
                mode, pad.before, pad.after
            )),
            Some(_) => None,
        }
    }

    /// Absorb the pad operator feeding a convolution. Returns true if the
    /// graph changed.
    fn fuse_pad(&self, graph: &mut Graph, conv_id: usize) -> RetraceResult<bool> {
        let Op::Conv1d(conv) = &graph.node(conv_id).op else { return Ok(false) };
        let Some(data) = graph.node(conv_id).inputs.first().copied() else { return Ok(false) };
        let Op::Pad(pad) = &graph.node(data.node).op else { return Ok(false) };
        if let Some(reason) = Self::unfusable_reason(graph, conv_id, conv) {
            warn!(
                "Keeping {} standalone in front of {}: {}",
                graph.node(data.node),
                graph.node(conv_id),
                reason
            );
            return Ok(false);
        }
        let Some(padding_mode) = pad.mode.as_padding_mode() else { return Ok(false) };
        let fused =
            Conv1d { padding: (pad.before, pad.after), padding_mode, ..conv.clone() };
        let source = graph
            .node(data.node)
            .inputs
            .first()
            .copied()
            .with_context(|| format!("{} has no input", graph.node(data.node)))?;
        debug!("Fusing {} into {}", graph.node(data.node), graph.node(conv_id));
        graph.add_edge(source, InletId::new(conv_id, 0))?;
        graph.node_mut(conv_id).op = Op::Conv1d(fused);
        Ok(true)
    }
}
