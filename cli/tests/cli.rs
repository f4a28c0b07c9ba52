use std::path::Path;
use std::process::{Command, Output};

use retrace_core::internal::*;
use retrace_core::tensor::write_tensor;

const CODE: &str = r#"version 1
graph(%input.1 : Float(1, 2, 8)):
  %none : NoneType = prim::Constant()
  %w : Tensor = prim::Param[name="conv.weight"]()
  %stride : int[] = prim::Constant[value=[1]]()
  %padding : int[] = prim::Constant[value=[1]]()
  %dilation : int[] = prim::Constant[value=[1]]()
  %groups : int = prim::Constant[value=1]()
  %y : Float(1, 3, 8) = aten::conv1d(%input.1, %w, %none, %stride, %padding, %dilation, %groups)
  return (%y)
"#;

fn write_trace(dir: &Path, code: &str) -> std::path::PathBuf {
    let trace = dir.join("net.trace");
    std::fs::create_dir(&trace).unwrap();
    std::fs::write(trace.join("code.trace"), code).unwrap();
    let weight = Tensor::from_shape_simple_fn(&[3usize, 2, 3][..], || 0.25f32);
    let mut file = std::fs::File::create(trace.join("conv.weight.dat")).unwrap();
    write_tensor(&mut file, &weight).unwrap();
    trace
}

fn retrace(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_retrace")).args(args).output().unwrap()
}

#[test]
fn converts_and_checks() {
    let dir = tempfile::tempdir().unwrap();
    let trace = write_trace(dir.path(), CODE);
    let prefix = dir.path().join("nested").join("out");
    let output = retrace(&[
        "--check",
        trace.to_str().unwrap(),
        prefix.to_str().unwrap(),
        "inputshape=[1,2,8]",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(dir.path().join("nested/out.retrace.graph").is_file());
    assert!(dir.path().join("nested/out.retrace.tar").is_file());
}

#[test]
fn default_prefix_and_dump() {
    let dir = tempfile::tempdir().unwrap();
    let trace = write_trace(dir.path(), CODE);
    let output = retrace(&["--dump", trace.to_str().unwrap()]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.starts_with("version 1.0;"));
    assert!(stdout.contains("padding = [1, 1]"));
    assert_eq!(stdout, std::fs::read_to_string(dir.path().join("net.retrace.graph")).unwrap());
}

#[test]
fn missing_input_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = retrace(&[dir.path().join("missing.trace.tar").to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("LoadError:"));
}

#[test]
fn contradicting_shape_is_a_shape_error() {
    let dir = tempfile::tempdir().unwrap();
    let trace = write_trace(dir.path(), CODE);
    let output = retrace(&[trace.to_str().unwrap(), "inputshape=[1,2,9]"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("ShapeError:"));
    assert!(!dir.path().join("net.retrace.tar").exists());
}

#[test]
fn bad_argument_fails() {
    let dir = tempfile::tempdir().unwrap();
    let trace = write_trace(dir.path(), CODE);
    let output = retrace(&[trace.to_str().unwrap(), "inputsize=[1,2,8]"]);
    assert!(!output.status.success());
}
