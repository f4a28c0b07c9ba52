//! Operators as they appear in a traced program, before normalization.

use std::fmt;

use crate::internal::*;
use crate::ops::array::{Pad, PadMode};
use crate::ops::cnn::{Conv1d, PaddingMode, PaddingSpec};

/// The closed set of framework operators the loader accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TracedKind {
    Conv1d,
    Convolution,
    Pad,
    ConstantPadNd,
    ReflectionPad1d,
    ReplicationPad1d,
    PadCircular,
}

impl TracedKind {
    pub const ALL: [TracedKind; 7] = [
        TracedKind::Conv1d,
        TracedKind::Convolution,
        TracedKind::Pad,
        TracedKind::ConstantPadNd,
        TracedKind::ReflectionPad1d,
        TracedKind::ReplicationPad1d,
        TracedKind::PadCircular,
    ];

    pub fn symbol(&self) -> &'static str {
        match self {
            TracedKind::Conv1d => "aten::conv1d",
            TracedKind::Convolution => "aten::_convolution",
            TracedKind::Pad => "aten::pad",
            TracedKind::ConstantPadNd => "aten::constant_pad_nd",
            TracedKind::ReflectionPad1d => "aten::reflection_pad1d",
            TracedKind::ReplicationPad1d => "aten::replication_pad1d",
            TracedKind::PadCircular => "aten::_pad_circular",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<TracedKind> {
        Self::ALL.iter().copied().find(|k| k.symbol() == symbol)
    }

    /// Positional argument names.
    pub fn argument_names(&self) -> &'static [&'static str] {
        match self {
            TracedKind::Conv1d => {
                &["input", "weight", "bias", "stride", "padding", "dilation", "groups"]
            }
            TracedKind::Convolution => &[
                "input",
                "weight",
                "bias",
                "stride",
                "padding",
                "dilation",
                "transposed",
                "output_padding",
                "groups",
                "benchmark",
                "deterministic",
                "cudnn_enabled",
                "allow_tf32",
            ],
            TracedKind::Pad => &["input", "pad", "mode", "value"],
            TracedKind::ConstantPadNd => &["input", "pad", "value"],
            TracedKind::ReflectionPad1d
            | TracedKind::ReplicationPad1d
            | TracedKind::PadCircular => &["input", "pad"],
        }
    }

    /// Number of leading arguments a call site must provide.
    pub fn required_arguments(&self) -> usize {
        match self {
            TracedKind::Conv1d => 2,
            TracedKind::Convolution => 9,
            _ => 2,
        }
    }

    /// Arguments wired as graph edges rather than folded into attributes.
    pub fn is_tensor_argument(name: &str) -> bool {
        matches!(name, "input" | "weight" | "bias")
    }

    pub fn is_conv(&self) -> bool {
        matches!(self, TracedKind::Conv1d | TracedKind::Convolution)
    }
}

impl fmt::Display for TracedKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// A framework operator with its folded scalar arguments.
#[derive(Debug, Clone, PartialEq, new)]
pub struct TracedOp {
    pub kind: TracedKind,
    pub params: BTreeMap<String, Attr>,
}

impl TracedOp {
    /// Present and non-none parameter.
    pub fn param(&self, name: &str) -> Option<&Attr> {
        self.params.get(name).filter(|a| !a.is_none())
    }

    fn ints(&self, node: &str, name: &str, default: Option<&[i64]>) -> RetraceResult<TVec<i64>> {
        match (self.param(name), default) {
            (Some(attr), _) => attr.to_ints().ok_or_else(|| {
                let message = format!("expected ints, got {}", attr.kind());
                ConvertError::invalid(node, Some(name), message).into()
            }),
            (None, Some(default)) => Ok(default.into()),
            (None, None) => bail!(ConvertError::invalid(node, Some(name), "missing")),
        }
    }

    fn bool(&self, node: &str, name: &str, default: bool) -> RetraceResult<bool> {
        self.param(name).map_or(Ok(default), |attr| {
            attr.to_bool().ok_or_else(|| {
                let message = format!("expected a bool, got {attr}");
                ConvertError::invalid(node, Some(name), message).into()
            })
        })
    }

    fn float(&self, node: &str, name: &str, default: f32) -> RetraceResult<f32> {
        self.param(name).map_or(Ok(default), |attr| {
            attr.to_float().ok_or_else(|| {
                let message = format!("expected a float, got {attr}");
                ConvertError::invalid(node, Some(name), message).into()
            })
        })
    }

    /// One strictly positive value, as stride, dilation and groups are.
    fn positive(&self, node: &str, name: &str) -> RetraceResult<usize> {
        let values = self.ints(node, name, Some(&[1]))?;
        if values.len() != 1 {
            bail!(ConvertError::invalid(
                node,
                Some(name),
                format!("expected one value for a 1-D convolution, got {}", values.len())
            ));
        }
        if values[0] < 1 {
            bail!(ConvertError::invalid(
                node,
                Some(name),
                format!("must be at least 1, got {}", values[0])
            ));
        }
        usize::try_from(values[0]).map_err(|_| {
            ConvertError::invalid(node, Some(name), format!("{} is too large", values[0])).into()
        })
    }

    fn padding_spec(&self, node: &str) -> RetraceResult<PaddingSpec> {
        match self.param("padding") {
            None => Ok(PaddingSpec::Valid),
            Some(Attr::Str(s)) => match &**s {
                "same" => Ok(PaddingSpec::Same),
                "valid" => Ok(PaddingSpec::Valid),
                _ => bail!(ConvertError::invalid(
                    node,
                    Some("padding"),
                    format!("unknown padding {s:?}")
                )),
            },
            Some(_) => {
                let pads = self.ints(node, "padding", None)?;
                match &*pads {
                    [p] if *p < 0 => bail!(ConvertError::invalid(
                        node,
                        Some("padding"),
                        format!("padding must be positive, got {p}")
                    )),
                    [p] => {
                        let p = usize::try_from(*p).map_err(|_| {
                            let message = format!("{p} is too large");
                            ConvertError::invalid(node, Some("padding"), message)
                        })?;
                        Ok(PaddingSpec::Explicit(p, p))
                    }
                    _ => bail!(ConvertError::invalid(
                        node,
                        Some("padding"),
                        format!("expected one value for a 1-D convolution, got {}", pads.len())
                    )),
                }
            }
        }
    }

    fn lower_conv(&self, node: &str, inputs: &[&Fact]) -> RetraceResult<Conv1d> {
        if self.kind == TracedKind::Convolution && self.bool(node, "transposed", false)? {
            bail!(ConvertError::unsupported(
                node,
                Some("transposed"),
                "transposed convolutions are not supported"
            ));
        }
        if inputs.len() != 2 && inputs.len() != 3 {
            bail!(ConvertError::shape(
                node,
                format!("expected data, weight and optional bias, got {} inputs", inputs.len())
            ));
        }
        let Some(weight) = inputs[1].concrete_shape().filter(|s| s.len() == 3) else {
            bail!(ConvertError::shape(
                node,
                format!("weight must be a known rank 3 tensor, got {}", inputs[1])
            ));
        };
        let stride = self.positive(node, "stride")?;
        let dilation = self.positive(node, "dilation")?;
        let groups = self.positive(node, "groups")?;
        let padding = self.padding_spec(node)?;
        let (out_channels, in_per_group, kernel_size) = (weight[0], weight[1], weight[2]);
        if padding == PaddingSpec::Same && stride != 1 {
            bail!(ConvertError::unsupported(
                node,
                Some("padding"),
                format!("'same' padding needs stride 1, got {stride}")
            ));
        }
        let Some(resolved) = padding.resolve(kernel_size, dilation) else {
            bail!(ConvertError::invalid(
                node,
                Some("dilation"),
                format!("kernel of {kernel_size} dilated by {dilation} does not fit in memory")
            ));
        };
        let Some(in_channels) = in_per_group.checked_mul(groups) else {
            bail!(ConvertError::invalid(node, Some("groups"), format!("{groups} is too large")));
        };
        let conv = Conv1d {
            in_channels,
            out_channels,
            kernel_size,
            stride,
            padding: resolved,
            dilation,
            groups,
            bias: inputs.len() == 3,
            padding_mode: PaddingMode::Zeros,
        };
        conv.validate(node)?;
        Ok(conv)
    }

    fn lower_pad(&self, node: &str, inputs: &[&Fact]) -> RetraceResult<Pad> {
        let pads = self.ints(node, "pad", None)?;
        if pads.is_empty() || pads.len() % 2 != 0 {
            bail!(ConvertError::invalid(
                node,
                Some("pad"),
                format!("expected an even, non-zero number of amounts, got {}", pads.len())
            ));
        }
        if let Some(p) = pads.iter().find(|p| **p < 0) {
            let message = format!("amounts must be positive, got {p}");
            bail!(ConvertError::invalid(node, Some("pad"), message));
        }
        if let Some(rank) = inputs.first().and_then(|f| f.rank()) {
            if pads.len() / 2 > rank {
                bail!(ConvertError::invalid(
                    node,
                    Some("pad"),
                    format!("{} axes padded on a rank {} input", pads.len() / 2, rank)
                ));
            }
        }
        if pads[2..].iter().any(|p| *p != 0) {
            bail!(ConvertError::unsupported(node, Some("pad"), "only the last axis can be padded"));
        }
        let mode = match self.kind {
            TracedKind::Pad => {
                let mode = match self.param("mode") {
                    None => "constant",
                    Some(attr) => attr.to_str().ok_or_else(|| {
                        let message = format!("expected a string, got {attr}");
                        ConvertError::invalid(node, Some("mode"), message)
                    })?,
                };
                match mode {
                    "constant" => PadMode::Constant(self.float(node, "value", 0.0)?),
                    "reflect" => PadMode::Reflect,
                    "replicate" => PadMode::Replicate,
                    "circular" => PadMode::Circular,
                    _ => bail!(ConvertError::invalid(
                        node,
                        Some("mode"),
                        format!("unknown pad mode {mode:?}")
                    )),
                }
            }
            TracedKind::ConstantPadNd => PadMode::Constant(self.float(node, "value", 0.0)?),
            TracedKind::ReflectionPad1d => PadMode::Reflect,
            TracedKind::ReplicationPad1d => PadMode::Replicate,
            TracedKind::PadCircular => PadMode::Circular,
            TracedKind::Conv1d | TracedKind::Convolution => {
                bail!("{} is not a padding operator", self.kind)
            }
        };
        let amount = |p: i64| {
            usize::try_from(p)
                .map_err(|_| ConvertError::invalid(node, Some("pad"), format!("{p} is too large")))
        };
        Ok(Pad::new(amount(pads[0])?, amount(pads[1])?, mode))
    }

    /// The canonical operator computing the same thing.
    pub fn canonical(&self, node: &str, inputs: &[&Fact]) -> RetraceResult<Op> {
        if self.kind.is_conv() {
            Ok(Op::Conv1d(self.lower_conv(node, inputs)?))
        } else {
            Ok(Op::Pad(self.lower_pad(node, inputs)?))
        }
    }

    pub fn eval(&self, node: &str, inputs: &[&Tensor]) -> RetraceResult<Tensor> {
        let facts: TVec<Fact> = inputs.iter().map(|t| Fact::for_tensor(t)).collect();
        let facts: TVec<&Fact> = facts.iter().collect();
        self.canonical(node, &facts)?.eval(node, inputs)
    }
}

impl fmt::Display for TracedOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}({})",
            self.kind,
            self.params.iter().map(|(k, v)| format!("{k}={v}")).join(", ")
        )
    }
}
