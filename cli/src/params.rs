use std::path::{Path, PathBuf};

use retrace_core::internal::*;

/// What the positional arguments of the command line ask for.
#[derive(Debug, Clone, PartialEq)]
pub struct Params {
    pub input: PathBuf,
    /// Artifacts are written to `<prefix>.retrace.graph` and
    /// `<prefix>.retrace.tar`.
    pub prefix: PathBuf,
    /// Declared input shapes, binding graph inputs in order.
    pub input_shapes: Vec<ShapeFact>,
}

impl Params {
    /// `rest` holds an optional output prefix and `inputshapeN=...` items,
    /// in any order. Shapes bind inputs in order of appearance.
    pub fn from_args(input: impl Into<PathBuf>, rest: &[String]) -> RetraceResult<Params> {
        let input = input.into();
        let mut prefix = None;
        let mut input_shapes = vec![];
        for arg in rest {
            if let Some((key, value)) = arg.split_once('=') {
                if !is_input_shape_key(key) {
                    bail!("Unknown parameter {:?} (expected inputshape=, inputshape2=, ...)", key);
                }
                input_shapes.extend(
                    parse_shapes(value).with_context(|| format!("Parsing {key}={value}"))?,
                );
            } else if prefix.is_none() {
                prefix = Some(PathBuf::from(arg));
            } else {
                bail!("Unexpected argument {:?}: output prefix is already {:?}", arg, prefix);
            }
        }
        let prefix = prefix.unwrap_or_else(|| default_prefix(&input));
        Ok(Params { input, prefix, input_shapes })
    }
}

fn is_input_shape_key(key: &str) -> bool {
    key.strip_prefix("inputshape").is_some_and(|n| n.chars().all(|c| c.is_ascii_digit()))
}

/// The input path with every extension of its file name removed:
/// `dir/model.trace.tar` gives `dir/model`.
pub fn default_prefix(input: &Path) -> PathBuf {
    let Some(name) = input.file_name() else { return input.to_path_buf() };
    let name = name.to_string_lossy();
    let stem = match name.find('.') {
        Some(0) | None => &*name,
        Some(ix) => &name[..ix],
    };
    input.with_file_name(stem)
}

/// Parses `[1,12,64]`, `[1,12,64]f32`, `[1,?,64],[1,4]` or `1,12,64`.
pub fn parse_shapes(spec: &str) -> RetraceResult<Vec<ShapeFact>> {
    let spec = spec.trim();
    if !spec.starts_with('[') {
        return Ok(vec![spec.parse::<ShapeFact>()?]);
    }
    let mut shapes = vec![];
    let mut rest = spec;
    loop {
        let Some(body) = rest.trim_start().strip_prefix('[') else {
            bail!("Expected a bracketed shape, found {:?}", rest);
        };
        let Some(end) = body.find(']') else { bail!("Unclosed bracket in {:?}", spec) };
        let shape = body[..end].parse::<ShapeFact>()?;
        let after = &body[end + 1..];
        let (suffix, next) = match after.split_once(',') {
            Some((suffix, next)) => (suffix, Some(next)),
            None => (after, None),
        };
        match suffix.trim() {
            "" | "f32" => (),
            other => bail!("Only f32 inputs are supported, got {:?}", other),
        }
        shapes.push(shape);
        match next {
            Some(next) => rest = next,
            None => break,
        }
    }
    Ok(shapes)
}
