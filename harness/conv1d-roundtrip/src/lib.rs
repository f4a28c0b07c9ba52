//! Traced programs for end-to-end conversion tests.
//!
//! [`TracedNet`] writes what the PyTorch tracer records for a stack of
//! `nn.Conv1d` layers: convolutions with a non-zero padding mode are
//! recorded as an explicit `aten::pad` followed by an unpadded convolution,
//! string paddings (`'same'`, `'valid'`) are kept as strings.
use std::fmt::Write as _;
use std::path::Path;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use retrace_core::internal::*;
use retrace_core::ndarray::{Array3, Ix1, Ix3};
use retrace_core::ops::cnn::PaddingMode;
use retrace_core::tensor::write_tensor;

pub fn setup_test_logger() {
    let _ = env_logger::Builder::from_env("RETRACE_LOG").try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerPadding {
    Amount(usize),
    Same,
    Valid,
}

/// The constructor arguments of a `nn.Conv1d`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvLayer {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: LayerPadding,
    pub dilation: usize,
    pub groups: usize,
    pub bias: bool,
    pub padding_mode: PaddingMode,
    /// Record the call as `aten::_convolution` instead of `aten::conv1d`.
    pub low_level: bool,
}

impl ConvLayer {
    pub fn new(in_channels: usize, out_channels: usize, kernel_size: usize) -> ConvLayer {
        ConvLayer {
            in_channels,
            out_channels,
            kernel_size,
            stride: 1,
            padding: LayerPadding::Amount(0),
            dilation: 1,
            groups: 1,
            bias: true,
            padding_mode: PaddingMode::Zeros,
            low_level: false,
        }
    }

    pub fn stride(self, stride: usize) -> ConvLayer {
        ConvLayer { stride, ..self }
    }

    pub fn padding(self, padding: usize) -> ConvLayer {
        ConvLayer { padding: LayerPadding::Amount(padding), ..self }
    }

    pub fn same(self) -> ConvLayer {
        ConvLayer { padding: LayerPadding::Same, ..self }
    }

    pub fn valid(self) -> ConvLayer {
        ConvLayer { padding: LayerPadding::Valid, ..self }
    }

    pub fn dilation(self, dilation: usize) -> ConvLayer {
        ConvLayer { dilation, ..self }
    }

    pub fn groups(self, groups: usize) -> ConvLayer {
        ConvLayer { groups, ..self }
    }

    pub fn no_bias(self) -> ConvLayer {
        ConvLayer { bias: false, ..self }
    }

    pub fn mode(self, padding_mode: PaddingMode) -> ConvLayer {
        ConvLayer { padding_mode, ..self }
    }

    pub fn low_level(self) -> ConvLayer {
        ConvLayer { low_level: true, ..self }
    }

    /// Amounts padded before and after, as `nn.Conv1d` computes them.
    pub fn pads(&self) -> (usize, usize) {
        match self.padding {
            LayerPadding::Amount(p) => (p, p),
            LayerPadding::Valid => (0, 0),
            LayerPadding::Same => {
                let total = self.dilation * (self.kernel_size - 1);
                (total / 2, total - total / 2)
            }
        }
    }

    pub fn output_len(&self, len: usize) -> usize {
        let (before, after) = self.pads();
        (len + before + after - self.dilation * (self.kernel_size - 1) - 1) / self.stride + 1
    }

    pub fn weight_shape(&self) -> [usize; 3] {
        [self.out_channels, self.in_channels / self.groups, self.kernel_size]
    }
}

/// A stack of convolutions over a `[N, C, L]` input.
#[derive(Debug, Clone, PartialEq)]
pub struct TracedNet {
    pub input_shape: [usize; 3],
    pub layers: Vec<ConvLayer>,
    pub version: usize,
}

impl TracedNet {
    pub fn new(input_shape: [usize; 3], layers: Vec<ConvLayer>) -> TracedNet {
        TracedNet { input_shape, layers, version: 1 }
    }

    /// Seven layers covering stride, explicit and string padding, grouped
    /// and depthwise convolutions, dilation, missing biases, reflect and
    /// replicate padding.
    pub fn reference() -> TracedNet {
        TracedNet::new(
            [1, 12, 64],
            vec![
                ConvLayer::new(12, 16, 3),
                ConvLayer::new(16, 20, 2).stride(2).padding(2),
                ConvLayer::new(20, 24, 3).padding(4).no_bias(),
                ConvLayer::new(24, 28, 5).valid().groups(4).low_level(),
                ConvLayer::new(28, 32, 3).same().dilation(2).groups(2).no_bias(),
                ConvLayer::new(32, 32, 2)
                    .stride(2)
                    .padding(3)
                    .groups(32)
                    .mode(PaddingMode::Reflect),
                ConvLayer::new(32, 28, 2).padding(2).mode(PaddingMode::Replicate).no_bias(),
            ],
        )
    }

    /// Shape after every layer.
    pub fn shapes(&self) -> Vec<[usize; 3]> {
        let mut shape = self.input_shape;
        self.layers
            .iter()
            .map(|layer| {
                shape = [shape[0], layer.out_channels, layer.output_len(shape[2])];
                shape
            })
            .collect()
    }

    pub fn output_shape(&self) -> [usize; 3] {
        self.shapes().last().copied().unwrap_or(self.input_shape)
    }

    /// The `code.trace` text.
    pub fn code(&self) -> String {
        let mut code = String::new();
        let [n, c, l] = self.input_shape;
        let _ = writeln!(code, "version {}", self.version);
        let _ = writeln!(code, "graph(%input.1 : Float({n}, {c}, {l})):");
        let _ = writeln!(code, "  %none : NoneType = prim::Constant()");
        let _ = writeln!(code, "  %false : bool = prim::Constant[value=0]()");
        let _ = writeln!(code, "  %true : bool = prim::Constant[value=1]()");
        let mut current = "input.1".to_string();
        let mut counter = 1;
        for ((ix, layer), shape) in self.layers.iter().enumerate().zip(self.shapes()) {
            let name = format!("conv_{ix}");
            let _ = writeln!(code, "  %{name}.w : Tensor = {}", param(&format!("{name}.weight")));
            let bias = if layer.bias {
                let _ = writeln!(code, "  %{name}.b : Tensor = {}", param(&format!("{name}.bias")));
                format!("%{name}.b")
            } else {
                "%none".to_string()
            };
            let _ = writeln!(code, "  %{name}.s : int = {}", int_constant(layer.stride));
            let _ = writeln!(code, "  %{name}.stride : int[] = prim::ListConstruct(%{name}.s)");
            let dilation = ints_constant(&[layer.dilation]);
            let _ = writeln!(code, "  %{name}.dilation : int[] = {dilation}");
            let _ = writeln!(code, "  %{name}.groups : int = {}", int_constant(layer.groups));
            let padding = match (layer.padding_mode, layer.padding) {
                (PaddingMode::Zeros, LayerPadding::Amount(p)) => {
                    format!("int[] = {}", ints_constant(&[p]))
                }
                (PaddingMode::Zeros, LayerPadding::Same) => {
                    format!("str = {}", str_constant("same"))
                }
                (PaddingMode::Zeros, LayerPadding::Valid) if layer.low_level => {
                    format!("int[] = {}", ints_constant(&[0]))
                }
                (PaddingMode::Zeros, LayerPadding::Valid) => {
                    format!("str = {}", str_constant("valid"))
                }
                (mode, _) => {
                    let (before, after) = layer.pads();
                    counter += 2;
                    let padded = format!("x.{counter}");
                    let pads = ints_constant(&[before, after]);
                    let _ = writeln!(code, "  %{name}.pads : int[] = {pads}");
                    let mode = str_constant(mode.as_str());
                    let _ = writeln!(code, "  %{name}.mode : str = {mode}");
                    let _ = writeln!(
                        code,
                        "  %{padded} : Tensor = \
                         aten::pad(%{current}, %{name}.pads, %{name}.mode, %none)"
                    );
                    current = padded;
                    format!("int[] = {}", ints_constant(&[0]))
                }
            };
            let _ = writeln!(code, "  %{name}.padding : {padding}");
            counter += 2;
            let out = format!("x.{counter}");
            let [n, c, l] = shape;
            let args = format!(
                "%{current}, %{name}.w, {bias}, %{name}.stride, %{name}.padding, %{name}.dilation"
            );
            if layer.low_level {
                let output_padding = ints_constant(&[0]);
                let _ = writeln!(code, "  %{name}.output_padding : int[] = {output_padding}");
                let _ = writeln!(
                    code,
                    "  %{out} : Float({n}, {c}, {l}) = aten::_convolution({args}, %false, \
                     %{name}.output_padding, %{name}.groups, %false, %false, %true, %true)"
                );
            } else {
                let _ = writeln!(
                    code,
                    "  %{out} : Float({n}, {c}, {l}) = aten::conv1d({args}, %{name}.groups)"
                );
            }
            current = out;
        }
        let _ = writeln!(code, "  return (%{current})");
        code
    }

    /// Seeded weights and biases, by label.
    pub fn weights(&self, seed: u64) -> Vec<(String, Tensor)> {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut weights = vec![];
        for (ix, layer) in self.layers.iter().enumerate() {
            let shape = layer.weight_shape();
            let bound = 1.0 / ((shape[1] * shape[2]) as f32).sqrt();
            let w = Tensor::from_shape_simple_fn(&shape[..], || rng.gen_range(-bound..bound));
            weights.push((format!("conv_{ix}.weight"), w));
            if layer.bias {
                let b = Tensor::from_shape_simple_fn(vec![layer.out_channels], || {
                    rng.gen_range(-bound..bound)
                });
                weights.push((format!("conv_{ix}.bias"), b));
            }
        }
        weights
    }

    /// Run the whole stack with [`reference_conv1d`], with the weights
    /// [`TracedNet::weights`] gives for `seed`.
    pub fn reference_run(&self, input: &Tensor, seed: u64) -> RetraceResult<Tensor> {
        let weights: HashMap<String, Tensor> = self.weights(seed).into_iter().collect();
        let mut current = input.clone();
        for (ix, layer) in self.layers.iter().enumerate() {
            let weight = weights
                .get(&format!("conv_{ix}.weight"))
                .with_context(|| format!("No weight for layer {ix}"))?;
            let bias = weights.get(&format!("conv_{ix}.bias"));
            current = reference_conv1d(layer, &current, weight, bias)?;
        }
        Ok(current)
    }

    /// Write the traced program as a tar archive.
    pub fn write_tar(&self, path: impl AsRef<Path>, seed: u64) -> RetraceResult<()> {
        let file = std::fs::File::create(path.as_ref())
            .with_context(|| format!("Creating {:?}", path.as_ref()))?;
        let mut ar = tar::Builder::new(file);
        append(&mut ar, "code.trace", self.code().as_bytes())?;
        for (label, tensor) in self.weights(seed) {
            let mut data = vec![];
            write_tensor(&mut data, &tensor)?;
            append(&mut ar, &format!("{label}.dat"), &data)?;
        }
        ar.into_inner()?;
        Ok(())
    }
}

/// Direct evaluation of one layer: the input is padded the way `nn.Conv1d`
/// pads it, then products are summed in a plain loop nest, input channels
/// outermost and the bias last.
pub fn reference_conv1d(
    layer: &ConvLayer,
    input: &Tensor,
    weight: &Tensor,
    bias: Option<&Tensor>,
) -> RetraceResult<Tensor> {
    let input = input.view().into_dimensionality::<Ix3>()?;
    let weight = weight.view().into_dimensionality::<Ix3>()?;
    let bias = bias.map(|b| b.view().into_dimensionality::<Ix1>()).transpose()?;
    ensure!(weight.shape() == layer.weight_shape(), "Weight shape mismatch");
    let (batch, len) = (input.shape()[0], input.shape()[2]);
    let (before, _) = layer.pads();
    let value = |n: usize, c: usize, ix: usize| -> f32 {
        let (i, l) = (ix as isize - before as isize, len as isize);
        let src = match layer.padding_mode {
            _ if (0..l).contains(&i) => i,
            PaddingMode::Zeros => return 0.0,
            PaddingMode::Reflect if i < 0 => -i,
            PaddingMode::Reflect => 2 * (l - 1) - i,
            PaddingMode::Replicate => i.clamp(0, l - 1),
            PaddingMode::Circular => i.rem_euclid(l),
        };
        input[(n, c, src as usize)]
    };
    let out_len = layer.output_len(len);
    let in_per_group = layer.in_channels / layer.groups;
    let out_per_group = layer.out_channels / layer.groups;
    let mut output = Array3::<f32>::zeros((batch, layer.out_channels, out_len));
    for n in 0..batch {
        for oc in 0..layer.out_channels {
            let first = oc / out_per_group * in_per_group;
            for t in 0..out_len {
                let mut acc = 0f32;
                for ic in 0..in_per_group {
                    for k in 0..layer.kernel_size {
                        let ix = t * layer.stride + k * layer.dilation;
                        acc += weight[(oc, ic, k)] * value(n, first + ic, ix);
                    }
                }
                if let Some(bias) = &bias {
                    acc += bias[oc];
                }
                output[(n, oc, t)] = acc;
            }
        }
    }
    Ok(output.into_dyn())
}

fn param(name: &str) -> String {
    format!("prim::Param[name=\"{name}\"]()")
}

fn int_constant(value: usize) -> String {
    format!("prim::Constant[value={value}]()")
}

fn ints_constant(values: &[usize]) -> String {
    format!("prim::Constant[value=[{}]]()", values.iter().join(", "))
}

fn str_constant(value: &str) -> String {
    format!("prim::Constant[value=\"{value}\"]()")
}

fn append<W: std::io::Write>(
    ar: &mut tar::Builder<W>,
    name: &str,
    data: &[u8],
) -> RetraceResult<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    ar.append_data(&mut header, name, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_shapes() {
        let lens: Vec<usize> = TracedNet::reference().shapes().iter().map(|s| s[2]).collect();
        assert_eq!(lens, vec![62, 33, 39, 35, 35, 20, 23]);
        assert_eq!(TracedNet::reference().output_shape(), [1, 28, 23]);
    }

    #[test]
    fn same_padding_split() {
        assert_eq!(ConvLayer::new(1, 1, 3).same().dilation(2).pads(), (2, 2));
        assert_eq!(ConvLayer::new(1, 1, 4).same().pads(), (1, 2));
    }

    #[test]
    fn reflect_layer_is_recorded_as_pad() {
        let code = TracedNet::reference().code();
        assert!(code.contains("aten::pad(%x.11, %conv_5.pads, %conv_5.mode, %none)"));
        assert!(code.contains("%conv_5.mode : str = prim::Constant[value=\"reflect\"]()"));
        assert!(code.contains("%conv_4.padding : str = prim::Constant[value=\"same\"]()"));
        assert!(code.contains("aten::_convolution(%x.7, %conv_3.w, %conv_3.b,"));
        assert!(code.ends_with("  return (%x.19)\n"));
    }

    #[test]
    fn weights_are_seeded() {
        let net = TracedNet::reference();
        let a = net.weights(1);
        assert_eq!(a, net.weights(1));
        assert_ne!(a, net.weights(2));
        assert_eq!(a.len(), 7 + 4);
        assert_eq!(a[0].1.shape(), &[16, 12, 3]);
    }

    #[test]
    fn reference_conv1d_by_hand() {
        use retrace_core::ndarray::{arr1, arr3};
        let x = arr3(&[[[1f32, 2., 3., 4.]]]).into_dyn();
        let w = arr3(&[[[1f32, 10.]]]).into_dyn();
        let b = arr1(&[0.5f32]).into_dyn();
        let run = |layer: ConvLayer, bias: Option<&Tensor>| {
            reference_conv1d(&layer, &x, &w, bias).unwrap().iter().cloned().collect::<Vec<f32>>()
        };
        assert_eq!(run(ConvLayer::new(1, 1, 2), Some(&b)), vec![21.5, 32.5, 43.5]);
        let padded = ConvLayer::new(1, 1, 2).padding(1).no_bias();
        // 0 1 2 3 4 0
        assert_eq!(run(padded.clone(), None), vec![10., 21., 32., 43., 4.]);
        // 2 1 2 3 4 3
        let reflect = padded.clone().mode(PaddingMode::Reflect);
        assert_eq!(run(reflect, None), vec![12., 21., 32., 43., 34.]);
        // 1 1 2 3 4 4
        let replicate = padded.clone().mode(PaddingMode::Replicate);
        assert_eq!(run(replicate, None), vec![11., 21., 32., 43., 44.]);
        // 4 1 2 3 4 1
        assert_eq!(run(padded.mode(PaddingMode::Circular), None), vec![14., 21., 32., 43., 14.]);
        let strided = ConvLayer::new(1, 1, 2).stride(2).dilation(2).no_bias();
        assert_eq!(run(strided, None), vec![31.]);
    }

    #[test]
    fn reference_run_shapes() {
        let net = TracedNet::reference();
        let input = Tensor::from_elem(net.input_shape.to_vec(), 0.5);
        let output = net.reference_run(&input, 3).unwrap();
        assert_eq!(output.shape(), &net.output_shape()[..]);
    }
}
