use std::io::Read;
use std::path::Path;

use retrace_core::internal::*;

use crate::ast::{parse::parse_document, ProtoTrace};
use crate::model::ModelBuilder;

pub const TRACE_FILENAME: &str = "code.trace";

/// Loads traced programs: a tar archive (possibly gzipped) or a directory
/// holding `code.trace` and one `<label>.dat` file per weight.
#[derive(Debug, Clone, Default)]
pub struct Torch {}

impl Torch {
    fn proto(files: ArtifactFiles) -> RetraceResult<ProtoTrace> {
        let doc = parse_document(&files.document)?;
        Ok(ProtoTrace { doc, tensors: files.tensors })
    }
}

impl Framework<ProtoTrace> for Torch {
    fn proto_model_for_path(&self, path: impl AsRef<Path>) -> RetraceResult<ProtoTrace> {
        Self::proto(ArtifactFiles::for_path(TRACE_FILENAME, path)?)
    }

    fn proto_model_for_read(&self, reader: &mut dyn Read) -> RetraceResult<ProtoTrace> {
        Self::proto(ArtifactFiles::for_read(TRACE_FILENAME, reader)?)
    }

    fn model_for_proto_model(&self, proto: &ProtoTrace) -> RetraceResult<Graph> {
        let graph = ModelBuilder::new(proto).into_graph()?;
        info!(
            "Loaded trace: {} nodes, {} inputs, {} outputs",
            graph.nodes.len(),
            graph.inputs.len(),
            graph.outputs.len()
        );
        Ok(graph)
    }
}
