use retrace_canon::Artifacts;
use retrace_core::internal::*;
use retrace_torch::prelude::Torch;

use crate::params::Params;

/// Everything a conversion produced.
#[derive(Debug, Clone)]
pub struct Conversion {
    /// The program as loaded, with declared input shapes bound.
    pub traced: Graph,
    /// The canonical graph that was serialized.
    pub graph: Graph,
    pub artifacts: Artifacts,
}

/// Load a traced program and bring it to its canonical, shape-checked form.
/// Returns both the traced and the canonical graphs.
pub fn canonicalize(params: &Params) -> RetraceResult<(Graph, Graph)> {
    let mut traced = Torch::default()
        .model_for_path(&params.input)
        .with_context(|| format!("Loading {:?}", params.input))?;
    let inferencer = Inferencer::default();
    inferencer
        .bind_input_shapes(&mut traced, &params.input_shapes)
        .context("Binding input shapes")?;

    let mut graph = traced.clone();
    Normalizer::default().normalize(&mut graph).context("Normalizing operators")?;
    inferencer.infer(&mut graph).context("Inferring shapes")?;
    info!("Canonical graph: {} nodes", graph.nodes.len());
    for node in graph.nodes() {
        debug!("{} => {}", node, node.outputs.iter().map(|o| &o.fact).join(", "));
    }
    Ok((traced, graph))
}

/// The whole pipeline: load, normalize, infer, write both artifacts.
pub fn convert(params: &Params) -> RetraceResult<Conversion> {
    let (traced, graph) = canonicalize(params)?;
    if let Some(parent) = params.prefix.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs_err::create_dir_all(parent)?;
    }
    let artifacts = retrace_canon::canon()
        .write_artifacts(&graph, &params.prefix)
        .with_context(|| format!("Writing artifacts for {:?}", params.prefix))?;
    Ok(Conversion { traced, graph, artifacts })
}
