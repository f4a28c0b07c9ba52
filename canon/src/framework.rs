use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use retrace_core::internal::*;

use crate::ast::dump::Dumper;
use crate::ast::parse::parse_document;
use crate::ast::ProtoModule;
use crate::deser::GraphBuilder;
use crate::module::InferenceModule;
use crate::ser::to_proto_module;

pub const GRAPH_FILENAME: &str = "graph.retrace";
pub const STRUCTURE_SUFFIX: &str = "retrace.graph";
pub const MODULE_SUFFIX: &str = "retrace.tar";

/// Where [`Canon::write_artifacts`] put its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
    pub structure: PathBuf,
    pub module: PathBuf,
}

impl Artifacts {
    /// `P.retrace.graph` and `P.retrace.tar` for prefix `P`.
    pub fn for_prefix(prefix: impl AsRef<Path>) -> Artifacts {
        let with_suffix = |suffix: &str| {
            let mut path = OsString::from(prefix.as_ref().as_os_str());
            path.push(".");
            path.push(suffix);
            PathBuf::from(path)
        };
        Artifacts { structure: with_suffix(STRUCTURE_SUFFIX), module: with_suffix(MODULE_SUFFIX) }
    }
}

/// The canonical format: a textual structural description, and module
/// archives bundling it with the constant tensors.
#[derive(Debug, Clone, Default)]
pub struct Canon {}

impl Canon {
    /// Write the structural description of a canonical graph.
    pub fn write(&self, graph: &Graph, mut w: impl Write) -> RetraceResult<()> {
        let proto = to_proto_module(graph)?;
        Dumper::new(&mut w).document(&proto.doc)
    }

    pub fn write_to_string(&self, graph: &Graph) -> RetraceResult<String> {
        let mut buffer = vec![];
        self.write(graph, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Write a module archive. Identical graphs give identical bytes.
    pub fn write_to_tar<W: Write>(&self, graph: &Graph, w: W) -> RetraceResult<W> {
        let proto = to_proto_module(graph)?;
        write_proto_to_tar(&proto, w)
    }

    /// Write a module as a directory, with the same layout as the archive.
    pub fn write_to_dir(&self, graph: &Graph, path: impl AsRef<Path>) -> RetraceResult<()> {
        let path = path.as_ref();
        if path.exists() {
            bail!("{:?} already exists. Won't overwrite.", path);
        }
        let proto = to_proto_module(graph)?;
        std::fs::create_dir_all(path).with_context(|| format!("Creating {path:?}"))?;
        let mut graph_file = std::fs::File::create(path.join(GRAPH_FILENAME))?;
        Dumper::new(&mut graph_file).document(&proto.doc)?;
        for (label, tensor) in proto.tensors.iter().sorted_by_key(|(label, _)| *label) {
            let filename = path.join(format!("{label}.dat"));
            if let Some(parent) = filename.parent() {
                std::fs::create_dir_all(parent).with_context(|| format!("Creating {parent:?}"))?;
            }
            let mut file = std::fs::File::create(&filename)
                .with_context(|| format!("Creating {filename:?}"))?;
            retrace_core::tensor::write_tensor(&mut file, tensor)?;
        }
        Ok(())
    }

    /// Write both artifacts next to `prefix`. They are staged in temporary
    /// files of the destination directory and only renamed into place once
    /// both are complete. On failure, the files previously at the
    /// destination are left as they were.
    pub fn write_artifacts(
        &self,
        graph: &Graph,
        prefix: impl AsRef<Path>,
    ) -> RetraceResult<Artifacts> {
        let prefix = prefix.as_ref();
        let artifacts = Artifacts::for_prefix(prefix);
        let proto = to_proto_module(graph)?;
        let dir = match prefix.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let mut structure = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Creating temporary file in {dir:?}"))?;
        Dumper::new(structure.as_file_mut()).document(&proto.doc)?;
        let mut module = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Creating temporary file in {dir:?}"))?;
        write_proto_to_tar(&proto, module.as_file_mut())?;
        structure.as_file().sync_all()?;
        module.as_file().sync_all()?;

        // an existing description stays aside until the module is in place
        let previous = if artifacts.structure.is_file() {
            let aside = tempfile::NamedTempFile::new_in(dir)
                .with_context(|| format!("Creating temporary file in {dir:?}"))?
                .into_temp_path();
            std::fs::rename(&artifacts.structure, &aside)
                .with_context(|| format!("Moving {:?} aside", artifacts.structure))?;
            Some(aside)
        } else {
            None
        };
        let restore = |previous: Option<tempfile::TempPath>| {
            let _ = std::fs::remove_file(&artifacts.structure);
            if let Some(aside) = previous {
                if let Err(e) = std::fs::rename(&aside, &artifacts.structure) {
                    warn!("Could not restore {:?}: {}", artifacts.structure, e);
                }
            }
        };

        if let Err(e) = structure.persist(&artifacts.structure) {
            restore(previous);
            return Err(e.error).with_context(|| format!("Writing {:?}", artifacts.structure));
        }
        if let Err(e) = module.persist(&artifacts.module) {
            restore(previous);
            return Err(e.error).with_context(|| format!("Writing {:?}", artifacts.module));
        }
        info!("Wrote {:?} and {:?}", artifacts.structure, artifacts.module);
        Ok(artifacts)
    }

    /// Rebuild a graph from a structural description and the tensors its
    /// variables refer to.
    pub fn parse_structure(
        &self,
        text: &str,
        tensors: HashMap<String, Arc<Tensor>>,
    ) -> RetraceResult<Graph> {
        let doc = parse_document(text)?;
        self.model_for_proto_model(&ProtoModule { doc, tensors })
    }

    /// Load a module archive, or a directory with the same layout.
    pub fn graph_for_path(&self, path: impl AsRef<Path>) -> RetraceResult<Graph> {
        self.model_for_path(path)
    }

    pub fn module_for_path(&self, path: impl AsRef<Path>) -> RetraceResult<InferenceModule> {
        InferenceModule::new(self.graph_for_path(path)?)
    }

    fn proto(files: ArtifactFiles) -> RetraceResult<ProtoModule> {
        let doc = parse_document(&files.document)?;
        Ok(ProtoModule { doc, tensors: files.tensors })
    }
}

fn write_proto_to_tar<W: Write>(proto: &ProtoModule, w: W) -> RetraceResult<W> {
    let mut ar = tar::Builder::new(w);
    let mut graph_data = vec![];
    Dumper::new(&mut graph_data).document(&proto.doc)?;
    append(&mut ar, GRAPH_FILENAME, &graph_data)?;
    for (label, tensor) in proto.tensors.iter().sorted_by_key(|(label, _)| *label) {
        let mut data = vec![];
        retrace_core::tensor::write_tensor(&mut data, tensor)?;
        append(&mut ar, &format!("{label}.dat"), &data)?;
    }
    Ok(ar.into_inner()?)
}

// Entries carry a null mtime so that the archive only depends on its content.
fn append<W: Write>(ar: &mut tar::Builder<W>, filename: &str, data: &[u8]) -> RetraceResult<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();
    ar.append_data(&mut header, filename, data).with_context(|| format!("Appending {filename}"))?;
    Ok(())
}

impl Framework<ProtoModule> for Canon {
    fn proto_model_for_path(&self, path: impl AsRef<Path>) -> RetraceResult<ProtoModule> {
        Self::proto(ArtifactFiles::for_path(GRAPH_FILENAME, path)?)
    }

    fn proto_model_for_read(&self, reader: &mut dyn Read) -> RetraceResult<ProtoModule> {
        Self::proto(ArtifactFiles::for_read(GRAPH_FILENAME, reader)?)
    }

    fn model_for_proto_model(&self, proto: &ProtoModule) -> RetraceResult<Graph> {
        let graph = GraphBuilder::new(proto).into_graph()?;
        debug!("Loaded module: {} nodes", graph.nodes.len());
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_names() {
        let a = Artifacts::for_prefix("out/model");
        assert_eq!(a.structure, PathBuf::from("out/model.retrace.graph"));
        assert_eq!(a.module, PathBuf::from("out/model.retrace.tar"));
        let a = Artifacts::for_prefix("model.v2");
        assert_eq!(a.module, PathBuf::from("model.v2.retrace.tar"));
    }

    #[test]
    fn missing_description() {
        let mut ar = tar::Builder::new(vec![]);
        append(&mut ar, "readme.txt", b"hello").unwrap();
        let data = ar.into_inner().unwrap();
        let e = Canon::default().proto_model_for_read(&mut &*data).unwrap_err();
        assert_eq!(ConvertError::find(&e).map(|e| e.kind()), Some("LoadError"));
    }
}
