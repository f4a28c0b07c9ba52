use std::fmt;

use ndarray::{s, Axis, Ix1, Ix3};

use crate::internal::*;
use crate::ops::array::Pad;
use crate::ops::cnn::{PaddingMode, PaddingSpec};

/// One dimensional convolution over `[N, C, L]` (or unbatched `[C, L]`)
/// inputs.
///
/// Inputs are `[data, weight]` or `[data, weight, bias]`, the weight being
/// `[out_channels, in_channels / groups, kernel_size]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Conv1d {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: (usize, usize),
    pub dilation: usize,
    pub groups: usize,
    pub bias: bool,
    pub padding_mode: PaddingMode,
}

impl Default for Conv1d {
    fn default() -> Conv1d {
        Conv1d {
            in_channels: 1,
            out_channels: 1,
            kernel_size: 1,
            stride: 1,
            padding: (0, 0),
            dilation: 1,
            groups: 1,
            bias: false,
            padding_mode: PaddingMode::Zeros,
        }
    }
}

impl Conv1d {
    pub fn has_padding(&self) -> bool {
        self.padding != (0, 0)
    }

    pub fn weight_shape(&self) -> [usize; 3] {
        [self.out_channels, self.in_channels / self.groups, self.kernel_size]
    }

    /// The padding operator this convolution applies before its sliding
    /// windows.
    pub fn pad(&self) -> Pad {
        Pad::new(self.padding.0, self.padding.1, self.padding_mode.into())
    }

    /// Check attributes against each other.
    pub fn validate(&self, node: &str) -> RetraceResult<()> {
        for (name, value) in [
            ("stride", self.stride),
            ("dilation", self.dilation),
            ("groups", self.groups),
            ("kernel_size", self.kernel_size),
            ("in_channels", self.in_channels),
            ("out_channels", self.out_channels),
        ] {
            if value == 0 {
                bail!(ConvertError::invalid(node, Some(name), "must be at least 1"));
            }
        }
        let channels = [("in_channels", self.in_channels), ("out_channels", self.out_channels)];
        for (name, value) in channels {
            if value % self.groups != 0 {
                bail!(ConvertError::invalid(
                    node,
                    Some("groups"),
                    format!("{} groups do not divide {} ({})", self.groups, name, value)
                ));
            }
        }
        Ok(())
    }

    pub fn output_facts(&self, node: &str, inputs: &[&Fact]) -> RetraceResult<TVec<Fact>> {
        self.validate(node)?;
        let expected = 2 + self.bias as usize;
        if inputs.len() != expected {
            bail!(ConvertError::shape(
                node,
                format!("expected {} inputs, got {}", expected, inputs.len())
            ));
        }
        let weight = self.weight_shape();
        if let Some(shape) = &inputs[1].shape {
            if !shape.compatible_with(&ShapeFact::known(&weight)) {
                bail!(ConvertError::shape(
                    node,
                    format!("weight is {shape}, expected {}", ShapeFact::known(&weight))
                ));
            }
        }
        if self.bias {
            if let Some(shape) = &inputs[2].shape {
                if !shape.matches(&[self.out_channels]) {
                    bail!(ConvertError::shape(
                        node,
                        format!("bias is {shape}, expected [{}]", self.out_channels)
                    ));
                }
            }
        }
        let Some(shape) = &inputs[0].shape else { return Ok(tvec!(Fact::unknown())) };
        if shape.rank() != 2 && shape.rank() != 3 {
            bail!(ConvertError::shape(node, format!("expected a rank 2 or 3 input, got {shape}")));
        }
        let rank = shape.rank();
        if let Dim::Known(c) = shape[rank - 2] {
            if c % self.groups != 0 {
                bail!(ConvertError::invalid(
                    node,
                    Some("groups"),
                    format!("{} groups do not divide the {} input channels", self.groups, c)
                ));
            }
            if c != self.in_channels {
                bail!(ConvertError::shape(
                    node,
                    format!("input has {} channels, expected {}", c, self.in_channels)
                ));
            }
        }
        let len = shape[rank - 1];
        if let Dim::Known(len) = len {
            let (before, after) = self.padding;
            if let Some(reason) = self.pad().mode.check_limits(before, after, len) {
                bail!(ConvertError::shape(node, reason));
            }
        }
        let spec = PaddingSpec::Explicit(self.padding.0, self.padding.1);
        let Some(computed) = spec.compute_one(&len, self.kernel_size, self.dilation, self.stride)
        else {
            bail!(ConvertError::shape(
                node,
                format!(
                    "input length {len} padded by ({}, {}) gives no valid output length",
                    self.padding.0, self.padding.1
                )
            ));
        };
        let mut output = shape.clone();
        output.0[rank - 2] = Dim::Known(self.out_channels);
        output.0[rank - 1] = computed.convoluted;
        Ok(tvec!(Fact::shape(output)))
    }

    /// Pads, then slides the kernel. For a given output element, products
    /// are accumulated by input channel then by kernel tap, and the bias is
    /// added last.
    pub fn eval(&self, inputs: &[&Tensor]) -> RetraceResult<Tensor> {
        ensure!(
            inputs.len() == 2 + self.bias as usize,
            "Conv1d expects {} inputs, got {}",
            2 + self.bias as usize,
            inputs.len()
        );
        let unbatched = inputs[0].ndim() == 2;
        let data = if unbatched { inputs[0].view().insert_axis(Axis(0)) } else { inputs[0].view() };
        let data = data.into_dimensionality::<Ix3>().context("Conv1d input must be rank 2 or 3")?;
        ensure!(
            data.shape()[1] == self.in_channels,
            "Conv1d expects {} input channels, got {}",
            self.in_channels,
            data.shape()[1]
        );
        let padded = if self.has_padding() {
            self.pad().eval(&data.to_owned().into_dyn())?.into_dimensionality::<Ix3>()?
        } else {
            data.to_owned()
        };
        let weight = inputs[1].view().into_dimensionality::<Ix3>()?;
        ensure!(weight.shape() == self.weight_shape(), "Conv1d weight shape mismatch");
        let bias =
            if self.bias { Some(inputs[2].view().into_dimensionality::<Ix1>()?) } else { None };

        let len = padded.shape()[2];
        let out_len =
            PaddingSpec::explicit_usize(len, self.kernel_size, self.dilation, self.stride, 0, 0)
            .with_context(|| format!("Conv1d over {len} padded positions gives an empty output"))?;
        let batch = padded.shape()[0];
        let in_per_group = self.in_channels / self.groups;
        let out_per_group = self.out_channels / self.groups;
        let mut output = ndarray::Array3::<f32>::zeros((batch, self.out_channels, out_len));
        for n in 0..batch {
            for oc in 0..self.out_channels {
                let group = oc / out_per_group;
                let first = group * in_per_group;
                let channels = padded.slice(s![n, first..first + in_per_group, ..]);
                let kernel = weight.slice(s![oc, .., ..]);
                for t in 0..out_len {
                    let start = t * self.stride;
                    let mut acc = 0f32;
                    for ic in 0..in_per_group {
                        for k in 0..self.kernel_size {
                            acc += kernel[(ic, k)] * channels[(ic, start + k * self.dilation)];
                        }
                    }
                    if let Some(bias) = &bias {
                        acc += bias[oc];
                    }
                    output[(n, oc, t)] = acc;
                }
            }
        }
        let output = output.into_dyn();
        Ok(if unbatched { output.index_axis_move(Axis(0), 0) } else { output })
    }
}

impl fmt::Display for Conv1d {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Conv1d({}->{}, k={}, s={}, p={:?}, d={}, g={}, bias={}, {})",
            self.in_channels,
            self.out_channels,
            self.kernel_size,
            self.stride,
            self.padding,
            self.dilation,
            self.groups,
            self.bias,
            self.padding_mode
        )
    }
}
