use std::path::{Path, PathBuf};

use conv1d_roundtrip::*;
use proptest::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use retrace::convert::{canonicalize, convert};
use retrace::params::Params;
use retrace_core::internal::*;
use retrace_core::ops::cnn::{Conv1d, PaddingMode};

fn write(dir: &Path, net: &TracedNet) -> PathBuf {
    let path = dir.join("conv1d.trace.tar");
    net.write_tar(&path, 0).unwrap();
    path
}

fn params(input: &Path, shapes: &[&str]) -> Params {
    let rest: Vec<String> = shapes.iter().map(|s| format!("inputshape={s}")).collect();
    Params::from_args(input, &rest).unwrap()
}

fn random_input(shape: [usize; 3], seed: u64) -> Tensor {
    let mut rng = SmallRng::seed_from_u64(seed);
    Tensor::from_shape_simple_fn(&shape[..], || rng.gen_range(-1.0f32..1.0))
}

fn bits(t: &Tensor) -> Vec<u32> {
    t.iter().map(|x| x.to_bits()).collect()
}

fn convs(graph: &Graph) -> Vec<&Conv1d> {
    graph
        .nodes()
        .iter()
        .filter_map(|n| match &n.op {
            Op::Conv1d(c) => Some(c),
            _ => None,
        })
        .collect()
}

fn error_kind(e: &RetraceError) -> Option<&'static str> {
    ConvertError::find(e).map(|e| e.kind())
}

#[test]
fn reference_roundtrip_is_bit_exact() {
    setup_test_logger();
    let dir = tempfile::tempdir().unwrap();
    let net = TracedNet::reference();
    let trace = write(dir.path(), &net);
    let conversion = convert(&params(&trace, &["[1,12,64]"])).unwrap();
    assert_eq!(conversion.artifacts.structure, dir.path().join("conv1d.retrace.graph"));
    assert_eq!(conversion.artifacts.module, dir.path().join("conv1d.retrace.tar"));

    let module = retrace_canon::canon().module_for_path(&conversion.artifacts.module).unwrap();
    let input = random_input(net.input_shape, 42);
    let expected = net.reference_run(&input, 0).unwrap();
    let traced = SimplePlan::new(&conversion.traced).unwrap().run(tvec!(input.clone())).unwrap();
    let found = module.run(tvec!(input)).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].shape(), &net.output_shape()[..]);
    assert_eq!(bits(&found[0]), bits(&expected));
    assert_eq!(bits(&traced[0]), bits(&expected));

    retrace::check::check(&conversion.traced, &module, 7).unwrap();
}

#[test]
fn reference_shapes_and_fusions() {
    let dir = tempfile::tempdir().unwrap();
    let net = TracedNet::reference();
    let conversion = convert(&params(&write(dir.path(), &net), &[])).unwrap();
    let graph = &conversion.graph;
    assert!(graph.nodes().iter().all(|n| n.op.is_canonical()));
    assert!(!graph.nodes().iter().any(|n| matches!(n.op, Op::Pad(_))));

    let convs = convs(graph);
    assert_eq!(convs.len(), 7);
    assert_eq!(convs[1].padding, (2, 2));
    assert_eq!(convs[3].groups, 4);
    assert_eq!(convs[3].padding, (0, 0));
    assert_eq!(convs[4].padding, (2, 2));
    assert!(!convs[4].bias);
    assert_eq!((convs[5].padding, convs[5].padding_mode), ((3, 3), PaddingMode::Reflect));
    assert_eq!((convs[6].padding, convs[6].padding_mode), ((2, 2), PaddingMode::Replicate));

    let shapes: Vec<ShapeFact> = graph
        .nodes()
        .iter()
        .filter(|n| matches!(n.op, Op::Conv1d(_)))
        .filter_map(|n| n.outputs[0].fact.shape.clone())
        .collect();
    let expected: Vec<ShapeFact> = net.shapes().iter().map(|s| ShapeFact::known(s)).collect();
    assert_eq!(shapes, expected);
    assert_eq!(expected[0], ShapeFact::known(&[1, 16, 62]));
    assert_eq!(expected[1], ShapeFact::known(&[1, 20, 33]));

    let text = std::fs::read_to_string(&conversion.artifacts.structure).unwrap();
    let grouped = "kernel_size = 5, stride = 1, padding = [0, 0], dilation = 1, groups = 4";
    assert!(text.contains(grouped));
    assert!(text.contains("padding_mode = 'reflect'"));
}

#[test]
fn conversions_are_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let trace = write(dir.path(), &TracedNet::reference());
    let mut first = params(&trace, &["[1,12,64]"]);
    first.prefix = dir.path().join("first");
    let mut second = first.clone();
    second.prefix = dir.path().join("second");
    let a = convert(&first).unwrap().artifacts;
    let b = convert(&second).unwrap().artifacts;
    assert_eq!(std::fs::read(a.module).unwrap(), std::fs::read(b.module).unwrap());
    assert_eq!(std::fs::read(a.structure).unwrap(), std::fs::read(b.structure).unwrap());
}

#[test]
fn unknown_length_propagates() {
    let dir = tempfile::tempdir().unwrap();
    let net = TracedNet::reference();
    let trace = write(dir.path(), &net);
    let (_, graph) = canonicalize(&params(&trace, &["[1,12,?]"])).unwrap();
    let output = graph.outlet_fact(graph.outputs[0]).unwrap();
    assert_eq!(output.shape, Some(ShapeFact(tvec!(Dim::Known(1), Dim::Known(28), Dim::Unknown))));
}

#[test]
fn asymmetric_pad_stays_standalone() {
    let dir = tempfile::tempdir().unwrap();
    // 'same' with an even kernel pads 1 before and 2 after
    let net = TracedNet::new(
        [1, 4, 16],
        vec![ConvLayer::new(4, 6, 4).same().mode(PaddingMode::Reflect), ConvLayer::new(6, 2, 1)],
    );
    let conversion = convert(&params(&write(dir.path(), &net), &[])).unwrap();
    let pads = conversion.graph.nodes().iter().filter(|n| matches!(n.op, Op::Pad(_))).count();
    assert_eq!(pads, 1);
    assert!(convs(&conversion.graph).iter().all(|c| !c.has_padding()));

    let module = retrace_canon::canon().module_for_path(&conversion.artifacts.module).unwrap();
    let output = module.graph().outlet_fact(module.graph().outputs[0]).unwrap();
    assert_eq!(output.concrete_shape().unwrap().to_vec(), vec![1, 2, 16]);
    retrace::check::check(&conversion.traced, &module, 3).unwrap();
}

#[test]
fn circular_padding() {
    let dir = tempfile::tempdir().unwrap();
    let net = TracedNet::new(
        [2, 3, 9],
        vec![ConvLayer::new(3, 3, 3).padding(2).groups(3).mode(PaddingMode::Circular).dilation(2)],
    );
    let conversion = convert(&params(&write(dir.path(), &net), &[])).unwrap();
    assert_eq!(convs(&conversion.graph)[0].padding_mode, PaddingMode::Circular);
    let module = retrace_canon::canon().module_for_path(&conversion.artifacts.module).unwrap();
    retrace::check::check(&conversion.traced, &module, 0).unwrap();
}

#[test]
fn same_padding_with_stride_is_unsupported() {
    let dir = tempfile::tempdir().unwrap();
    let net = TracedNet::new([1, 2, 8], vec![ConvLayer::new(2, 2, 3).same().stride(2)]);
    let trace = write(dir.path(), &net);
    let e = convert(&params(&trace, &[])).unwrap_err();
    assert_eq!(error_kind(&e), Some("UnsupportedConfigError"));
    assert_eq!(ConvertError::find(&e).and_then(|e| e.node()), Some("x.3"));
    // only the trace is left in the directory
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn groups_must_divide_out_channels() {
    let dir = tempfile::tempdir().unwrap();
    let net = TracedNet::new([1, 8, 8], vec![ConvLayer::new(8, 6, 3).groups(4)]);
    let e = convert(&params(&write(dir.path(), &net), &[])).unwrap_err();
    assert_eq!(error_kind(&e), Some("InvalidAttributeError"));
}

#[test]
fn declared_shape_must_match_trace() {
    let dir = tempfile::tempdir().unwrap();
    let trace = write(dir.path(), &TracedNet::reference());
    let e = convert(&params(&trace, &["[1,8,64]"])).unwrap_err();
    assert_eq!(error_kind(&e), Some("ShapeError"));
}

#[test]
fn input_shorter_than_kernel_is_a_shape_error() {
    let dir = tempfile::tempdir().unwrap();
    let net = TracedNet::new([1, 2, 16], vec![ConvLayer::new(2, 2, 5)]);
    let code = net.code().replace("Float(1, 2, 16)", "Float(1, 2, 3)");
    let trace = dir.path().join("short");
    std::fs::create_dir(&trace).unwrap();
    std::fs::write(trace.join("code.trace"), code).unwrap();
    for (label, tensor) in net.weights(0) {
        let mut file = std::fs::File::create(trace.join(format!("{label}.dat"))).unwrap();
        retrace_core::tensor::write_tensor(&mut file, &tensor).unwrap();
    }
    let e = convert(&params(&trace, &[])).unwrap_err();
    assert_eq!(error_kind(&e), Some("ShapeError"));
}

#[test]
fn unsupported_version_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut net = TracedNet::reference();
    net.version = 2;
    let e = convert(&params(&write(dir.path(), &net), &[])).unwrap_err();
    assert_eq!(error_kind(&e), Some("LoadError"));
}

#[test]
fn missing_trace_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let e = convert(&params(&dir.path().join("nope.trace.tar"), &[])).unwrap_err();
    assert_eq!(error_kind(&e), Some("LoadError"));
}

fn layer() -> impl Strategy<Value = (ConvLayer, usize)> {
    (1usize..4, 1usize..4, 1usize..4, 1usize..3, 0usize..3, 0usize..4, any::<bool>(), 0usize..4)
        .prop_flat_map(|(groups, in_per_group, out_per_group, stride, padding, mode, bias, k)| {
            let kernel_size = k + 1;
            let mode = [
                PaddingMode::Zeros,
                PaddingMode::Reflect,
                PaddingMode::Replicate,
                PaddingMode::Circular,
            ][mode];
            let layer = ConvLayer::new(in_per_group * groups, out_per_group * groups, kernel_size)
                .groups(groups)
                .stride(stride)
                .padding(padding)
                .mode(mode);
            let layer = if bias { layer } else { layer.no_bias() };
            (Just(layer), 1usize..3, 0usize..6)
        })
        .prop_map(|(layer, dilation, extra)| {
            let layer = layer.dilation(dilation);
            // long enough for every padding mode and a positive output length
            let len = layer.dilation * (layer.kernel_size - 1) + 4 + extra;
            (layer, len)
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]
    #[test]
    fn single_layer_roundtrip((layer, len) in layer(), seed in 0u64..1000) {
        let dir = tempfile::tempdir().unwrap();
        let net = TracedNet::new([1, layer.in_channels, len], vec![layer]);
        let conversion = convert(&params(&write(dir.path(), &net), &[])).unwrap();
        let output = conversion.graph.outlet_fact(conversion.graph.outputs[0]).unwrap();
        prop_assert_eq!(output.concrete_shape().unwrap().to_vec(), net.output_shape().to_vec());
        let module = retrace_canon::canon().module_for_path(&conversion.artifacts.module).unwrap();
        let input = random_input(net.input_shape, seed);
        let expected = net.reference_run(&input, 0).unwrap();
        let found = module.run(tvec!(input)).unwrap();
        prop_assert_eq!(bits(&found[0]), bits(&expected));
        prop_assert!(retrace::check::check(&conversion.traced, &module, seed).is_ok());
    }
}
