use retrace_canon::prelude::*;
use retrace_core::internal::*;
use retrace_core::ops::array::{Pad, PadMode};
use retrace_core::ops::cnn::{Conv1d, PaddingMode};

fn setup_test_logger() {
    let _ = env_logger::Builder::from_env("RETRACE_LOG").try_init();
}

fn tensor(shape: &[usize], seed: usize) -> Arc<Tensor> {
    let len = shape.iter().product::<usize>();
    let data = (0..len).map(|i| ((i * 7 + seed * 13) % 17) as f32 / 8.0 - 1.0).collect();
    Arc::new(Tensor::from_shape_vec(shape.to_vec(), data).unwrap())
}

/// input -> asymmetric reflect pad -> conv(bias) -> conv(groups, replicate)
fn graph() -> Graph {
    let mut g = Graph::default();
    let x = g.add_source("input.1", Fact::shape(ShapeFact::known(&[1, 4, 16]))).unwrap();
    let p = g.wire_node("p.1", Pad::new(2, 1, PadMode::Reflect), &[x]).unwrap();
    let w0 = g.add_const("conv_0.weight", tensor(&[6, 4, 3], 0)).unwrap();
    let b0 = g.add_const("conv_0.bias", tensor(&[6], 1)).unwrap();
    let c0 = Conv1d {
        in_channels: 4,
        out_channels: 6,
        kernel_size: 3,
        stride: 2,
        bias: true,
        ..Conv1d::default()
    };
    let y0 = g.wire_node("x.3", c0, &[p, w0, b0]).unwrap();
    let w1 = g.add_const("conv_1.weight", tensor(&[4, 3, 2], 2)).unwrap();
    let c1 = Conv1d {
        in_channels: 6,
        out_channels: 4,
        kernel_size: 2,
        padding: (1, 1),
        dilation: 2,
        groups: 2,
        padding_mode: PaddingMode::Replicate,
        ..Conv1d::default()
    };
    let y1 = g.wire_node("y", c1, &[y0, w1]).unwrap();
    g.set_output_outlets(&[y1]).unwrap();
    Inferencer::default().infer(&mut g).unwrap();
    g
}

fn input() -> Tensor {
    Tensor::clone(&tensor(&[1, 4, 16], 3))
}

#[test]
fn structure_roundtrip() {
    let g = graph();
    let canon = retrace_canon::canon();
    let text = canon.write_to_string(&g).unwrap();
    let tensors = g
        .nodes()
        .iter()
        .filter_map(|n| match &n.op {
            Op::Const(t) => Some((n.name.clone(), t.clone())),
            _ => None,
        })
        .collect();
    let back = canon.parse_structure(&text, tensors).unwrap();
    assert_eq!(back, g);
}

#[test]
fn structure_text() {
    let text = retrace_canon::canon().write_to_string(&graph()).unwrap();
    assert!(text.starts_with("version 1.0;\n\ngraph main( i\"input.1\" ) -> ( y )\n{\n"));
    assert!(text.contains("  i\"input.1\" : [1, 4, 16] = external();\n"));
    assert!(text.contains(
        "  i\"conv_0.weight\" : [6, 4, 3] = variable(label = 'conv_0.weight');\n"
    ));
    assert!(text.contains(
        "  i\"p.1\" : [1, 4, 19] = pad(i\"input.1\", before = 2, after = 1, mode = 'reflect');\n"
    ));
    assert!(text.contains(
        "  i\"x.3\" : [1, 6, 9] = conv1d(i\"p.1\", i\"conv_0.weight\", i\"conv_0.bias\", \
         in_channels = 4, out_channels = 6, kernel_size = 3, stride = 2, padding = [0, 0], \
         dilation = 1, groups = 1, bias = true, padding_mode = 'zeros');\n"
    ));
    assert!(text.contains("  y : [1, 4, 9] = conv1d("));
}

#[test]
fn archive_roundtrip_and_run() {
    setup_test_logger();
    let g = graph();
    let dir = tempfile::tempdir().unwrap();
    let artifacts = retrace_canon::canon().write_artifacts(&g, dir.path().join("model")).unwrap();
    assert!(artifacts.structure.is_file());
    assert!(artifacts.module.is_file());

    let back = retrace_canon::canon().graph_for_path(&artifacts.module).unwrap();
    assert_eq!(back, g);

    let module = retrace_canon::canon().module_for_path(&artifacts.module).unwrap();
    let expected = SimplePlan::new(&g).unwrap().run(tvec!(input())).unwrap();
    let found = module.run(tvec!(input())).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].shape(), &[1, 4, 9]);
    assert_eq!(found, expected);
}

#[test]
fn directory_layout() {
    let g = graph();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("module");
    retrace_canon::canon().write_to_dir(&g, &path).unwrap();
    assert!(path.join("graph.retrace").is_file());
    assert!(path.join("conv_1.weight.dat").is_file());
    assert_eq!(retrace_canon::canon().graph_for_path(&path).unwrap(), g);
}

#[test]
fn archives_are_deterministic() {
    let canon = retrace_canon::canon();
    let a = canon.write_to_tar(&graph(), vec![]).unwrap();
    let b = canon.write_to_tar(&graph(), vec![]).unwrap();
    assert_eq!(a, b);

    let dir = tempfile::tempdir().unwrap();
    let first = canon.write_artifacts(&graph(), dir.path().join("a")).unwrap();
    let second = canon.write_artifacts(&graph(), dir.path().join("b")).unwrap();
    assert_eq!(std::fs::read(first.module).unwrap(), std::fs::read(second.module).unwrap());
    assert_eq!(std::fs::read(first.structure).unwrap(), std::fs::read(second.structure).unwrap());
}

#[test]
fn failed_write_leaves_nothing() {
    let mut g = graph();
    let pad = g.node_by_name("p.1").unwrap().id;
    g.node_mut(pad).op = Op::Pad(Pad::new(2, 1, PadMode::Constant(f32::NAN)));
    let dir = tempfile::tempdir().unwrap();
    let e = retrace_canon::canon().write_artifacts(&g, dir.path().join("model")).unwrap_err();
    let e = ConvertError::find(&e).unwrap();
    assert_eq!(e.kind(), "SerializationError");
    assert_eq!(e.node(), Some("p.1"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn unknown_rank_has_no_annotation() {
    let mut g = Graph::default();
    let x = g.add_source("x", Fact::unknown()).unwrap();
    let y = g.wire_node("y", Pad::new(1, 0, PadMode::Constant(-0.25)), &[x]).unwrap();
    g.set_output_outlets(&[y]).unwrap();
    Inferencer::default().infer(&mut g).unwrap();
    let text = retrace_canon::canon().write_to_string(&g).unwrap();
    assert!(text.contains("  x = external();\n"));
    let pad = "  y = pad(x, before = 1, after = 0, mode = 'constant', value = -0.25);\n";
    assert!(text.contains(pad));
    assert_eq!(retrace_canon::canon().parse_structure(&text, HashMap::default()).unwrap(), g);
}

#[test]
fn failed_write_keeps_previous_artifacts() {
    setup_test_logger();
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("model");
    let artifacts = Artifacts::for_prefix(&prefix);
    std::fs::write(&artifacts.structure, "previous description").unwrap();
    // the module can not be renamed over a non-empty directory
    std::fs::create_dir(&artifacts.module).unwrap();
    std::fs::write(artifacts.module.join("keep"), "previous module").unwrap();

    assert!(retrace_canon::canon().write_artifacts(&graph(), &prefix).is_err());
    assert_eq!(std::fs::read_to_string(&artifacts.structure).unwrap(), "previous description");
    assert_eq!(std::fs::read_to_string(artifacts.module.join("keep")).unwrap(), "previous module");
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);

    std::fs::remove_dir_all(&artifacts.module).unwrap();
    retrace_canon::canon().write_artifacts(&graph(), &prefix).unwrap();
    assert!(std::fs::read_to_string(&artifacts.structure).unwrap().starts_with("version 1.0;"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
}
