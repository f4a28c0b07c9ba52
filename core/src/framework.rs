use std::fmt::Debug;
use std::io::Read;
use std::path::Path;

use crate::internal::*;

/// A file format graphs can be loaded from.
///
/// Loading happens in two steps: the artifact is first read into a
/// `ProtoModel`, a faithful in-memory image of the files, which is then
/// translated into a [`Graph`].
pub trait Framework<ProtoModel: Debug> {
    /// Read a proto model from a reader (an archive stream).
    fn proto_model_for_read(&self, reader: &mut dyn Read) -> RetraceResult<ProtoModel>;

    /// Read a proto model from a filename. Directories are read the same
    /// way archives are.
    fn proto_model_for_path(&self, p: impl AsRef<Path>) -> RetraceResult<ProtoModel> {
        let mut r = fs_open(p.as_ref())?;
        self.proto_model_for_read(&mut r)
    }

    /// Translate a proto model into a graph.
    fn model_for_proto_model(&self, proto: &ProtoModel) -> RetraceResult<Graph>;

    /// Read a graph from a reader.
    fn model_for_read(&self, r: &mut dyn Read) -> RetraceResult<Graph> {
        let proto_model = self.proto_model_for_read(r)?;
        self.model_for_proto_model(&proto_model)
    }

    /// Build a graph from a filename.
    fn model_for_path(&self, p: impl AsRef<Path>) -> RetraceResult<Graph> {
        let proto_model = self.proto_model_for_path(p)?;
        self.model_for_proto_model(&proto_model)
    }
}

fn fs_open(p: &Path) -> RetraceResult<std::fs::File> {
    std::fs::File::open(p).map_err(|e| ConvertError::load(format!("Opening {p:?}: {e}")).into())
}

/// The files of a model artifact: one text document and `<label>.dat`
/// tensors. Artifacts are tar archives (possibly gzipped) or directories
/// with the same layout.
#[derive(Debug, Clone, Default)]
pub struct ArtifactFiles {
    pub document: String,
    pub tensors: HashMap<String, Arc<Tensor>>,
}

impl ArtifactFiles {
    /// Read an archive or a directory. `document` names the text file
    /// expected at the root.
    pub fn for_path(document: &str, path: impl AsRef<Path>) -> RetraceResult<ArtifactFiles> {
        let path = path.as_ref();
        if path.is_file() {
            return ArtifactFiles::for_read(document, &mut fs_open(path)?);
        }
        if !path.is_dir() {
            bail!(ConvertError::load(format!("{path:?} is neither a file nor a directory")));
        }
        let mut reader = FileCollector::new(document);
        // `walkdir::new` will first yield the given path at depth 0, but we don't want to load this
        // entry here: only its descendants at depth >= 1.
        for entry in walkdir::WalkDir::new(path).min_depth(1).sort_by_file_name() {
            let entry = entry
                .map_err(|e| ConvertError::load(format!("Can not walk directory {path:?}: {e}")))?;
            if entry.path().is_dir() {
                continue;
            }
            let subpath = entry
                .path()
                .components()
                .skip(path.components().count())
                .collect::<std::path::PathBuf>();
            let mut stream = fs_open(entry.path())?;
            reader.read_stream(&subpath, &mut stream)?;
        }
        reader.finish()
    }

    /// Read a tar stream, gzipped or not.
    pub fn for_read(document: &str, reader: &mut dyn Read) -> RetraceResult<ArtifactFiles> {
        let archive_error = |e: std::io::Error| ConvertError::load(format!("Reading archive: {e}"));
        let mut buffer = vec![0u8; 2];
        reader.read_exact(&mut buffer).map_err(archive_error)?;
        let header = std::io::Cursor::new(buffer.clone());
        let stream = header.chain(reader);
        let mut tar = if buffer == [0x1f, 0x8b] {
            let f = flate2::read::GzDecoder::new(stream);
            tar::Archive::new(Box::new(f) as Box<dyn Read + '_>)
        } else {
            tar::Archive::new(Box::new(stream) as Box<dyn Read + '_>)
        };
        let mut collector = FileCollector::new(document);
        for entry in tar.entries().map_err(archive_error)? {
            let mut entry = entry.map_err(archive_error)?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let path = entry.path().map_err(archive_error)?.to_path_buf();
            collector.read_stream(&path, &mut entry)?;
        }
        collector.finish()
    }
}

struct FileCollector<'a> {
    document_name: &'a str,
    document: Option<String>,
    tensors: HashMap<String, Arc<Tensor>>,
}

impl<'a> FileCollector<'a> {
    fn new(document_name: &'a str) -> FileCollector<'a> {
        FileCollector { document_name, document: None, tensors: HashMap::default() }
    }

    fn read_stream(&mut self, path: &Path, reader: &mut impl Read) -> RetraceResult<()> {
        // ignore path with any component starting with "." (because OSX's tar is weird)
        if path.components().any(|c| c.as_os_str().to_string_lossy().starts_with('.')) {
            return Ok(());
        }
        let id = path
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if id == self.document_name {
            let mut text = String::new();
            reader
                .read_to_string(&mut text)
                .map_err(|e| ConvertError::load(format!("Reading {id}: {e}")))?;
            self.document = Some(text);
        } else if let Some(label) = id.strip_suffix(".dat") {
            let tensor = crate::tensor::read_tensor(reader)
                .map_err(|e| ConvertError::load(format!("Reading {id}: {e:#}")))?;
            debug!("Loaded tensor {} {:?}", label, tensor.shape());
            self.tensors.insert(label.to_string(), Arc::new(tensor));
        } else {
            debug!("Ignoring {}", id);
        }
        Ok(())
    }

    fn finish(self) -> RetraceResult<ArtifactFiles> {
        let Some(document) = self.document else {
            bail!(ConvertError::load(format!("Could not find {}", self.document_name)))
        };
        Ok(ArtifactFiles { document, tensors: self.tensors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::write_tensor;

    fn append(ar: &mut tar::Builder<Vec<u8>>, name: &str, data: &[u8]) {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        ar.append_data(&mut header, name, data).unwrap();
    }

    fn archive() -> Vec<u8> {
        let mut ar = tar::Builder::new(vec![]);
        append(&mut ar, "doc.txt", b"hello");
        let mut data = vec![];
        write_tensor(&mut data, &Tensor::from_elem(vec![2], 1.5)).unwrap();
        append(&mut ar, "w/conv.weight.dat", &data);
        append(&mut ar, "._doc.txt", b"resource fork");
        append(&mut ar, "notes.md", b"ignored");
        ar.into_inner().unwrap()
    }

    fn load_kind(r: RetraceResult<ArtifactFiles>) -> Option<&'static str> {
        ConvertError::find(&r.unwrap_err()).map(|e| e.kind())
    }

    #[test]
    fn tar_and_gzip() {
        crate::setup_test_logger();
        let files = ArtifactFiles::for_read("doc.txt", &mut &*archive()).unwrap();
        assert_eq!(files.document, "hello");
        assert_eq!(files.tensors.keys().collect::<Vec<_>>(), vec!["w/conv.weight"]);

        let mut gz = flate2::write::GzEncoder::new(vec![], flate2::Compression::default());
        std::io::Write::write_all(&mut gz, &archive()).unwrap();
        let gz = gz.finish().unwrap();
        let files = ArtifactFiles::for_read("doc.txt", &mut &*gz).unwrap();
        assert_eq!(*files.tensors["w/conv.weight"], Tensor::from_elem(vec![2], 1.5));
    }

    #[test]
    fn directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("doc.txt"), "hello").unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/junk.dat"), "junk").unwrap();
        let mut data = vec![];
        write_tensor(&mut data, &Tensor::from_elem(vec![3], 2.0)).unwrap();
        std::fs::write(dir.path().join("bias.dat"), data).unwrap();
        let files = ArtifactFiles::for_path("doc.txt", dir.path()).unwrap();
        assert_eq!(files.document, "hello");
        assert_eq!(files.tensors.len(), 1);
    }

    #[test]
    fn load_errors() {
        let no_document = ArtifactFiles::for_read("other.txt", &mut &*archive());
        assert_eq!(load_kind(no_document), Some("LoadError"));
        let truncated = ArtifactFiles::for_read("doc.txt", &mut &b"x"[..]);
        assert_eq!(load_kind(truncated), Some("LoadError"));
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.tar");
        assert_eq!(load_kind(ArtifactFiles::for_path("doc.txt", missing)), Some("LoadError"));
    }

    #[test]
    fn overflowing_tensor_header() {
        let mut header = vec![0x4E, 0xEF, 1, 0];
        header.extend(0u32.to_le_bytes());
        header.extend(8u32.to_le_bytes());
        for _ in 0..8 {
            header.extend(u32::MAX.to_le_bytes());
        }
        header.extend(32u32.to_le_bytes());
        header.extend(0u32.to_le_bytes());
        header.resize(128, 0);
        let mut ar = tar::Builder::new(vec![]);
        append(&mut ar, "doc.txt", b"hello");
        append(&mut ar, "w.dat", &header);
        let data = ar.into_inner().unwrap();
        let files = ArtifactFiles::for_read("doc.txt", &mut &*data);
        assert_eq!(load_kind(files), Some("LoadError"));
    }
}
