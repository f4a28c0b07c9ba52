use std::fmt;

use ndarray::{Axis, Zip};

use crate::internal::*;
use crate::ops::cnn::PaddingMode;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PadMode {
    Constant(f32),
    Reflect,
    Replicate,
    Circular,
}

impl Default for PadMode {
    fn default() -> PadMode {
        PadMode::Constant(0.0)
    }
}

impl PadMode {
    pub fn name(&self) -> &'static str {
        match self {
            PadMode::Constant(_) => "constant",
            PadMode::Reflect => "reflect",
            PadMode::Replicate => "replicate",
            PadMode::Circular => "circular",
        }
    }

    /// The convolution padding mode with the same filling, if any.
    pub fn as_padding_mode(&self) -> Option<PaddingMode> {
        match self {
            PadMode::Constant(v) if *v == 0.0 => Some(PaddingMode::Zeros),
            PadMode::Constant(_) => None,
            PadMode::Reflect => Some(PaddingMode::Reflect),
            PadMode::Replicate => Some(PaddingMode::Replicate),
            PadMode::Circular => Some(PaddingMode::Circular),
        }
    }

    /// Reason why padding an axis of length `len` is impossible.
    pub fn check_limits(&self, before: usize, after: usize, len: usize) -> Option<String> {
        let pad = before.max(after);
        if pad == 0 {
            return None;
        }
        match self {
            PadMode::Reflect if pad >= len => {
                Some(format!("reflect padding of {pad} needs an axis longer than {pad}, got {len}"))
            }
            PadMode::Circular if pad > len => Some(format!(
                "circular padding of {pad} needs an axis of at least {pad}, got {len}"
            )),
            PadMode::Replicate if len == 0 => Some("can not replicate an empty axis".to_string()),
            _ => None,
        }
    }

    /// Index into the original axis that position `i` (which may fall
    /// outside of it) reads from. `None` stands for the constant value.
    fn source_index(&self, i: isize, len: isize) -> Option<usize> {
        if (0..len).contains(&i) {
            return Some(i as usize);
        }
        match self {
            PadMode::Constant(_) => None,
            PadMode::Reflect => Some((if i < 0 { -i } else { 2 * (len - 1) - i }) as usize),
            PadMode::Replicate => Some(i.clamp(0, len - 1) as usize),
            PadMode::Circular => Some(i.rem_euclid(len) as usize),
        }
    }
}

impl From<PaddingMode> for PadMode {
    fn from(mode: PaddingMode) -> PadMode {
        match mode {
            PaddingMode::Zeros => PadMode::Constant(0.0),
            PaddingMode::Reflect => PadMode::Reflect,
            PaddingMode::Replicate => PadMode::Replicate,
            PaddingMode::Circular => PadMode::Circular,
        }
    }
}

impl fmt::Display for PadMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PadMode::Constant(v) => write!(f, "constant({v:?})"),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// Pads the last axis of its single input.
#[derive(Debug, Clone, Copy, new, Default, PartialEq)]
pub struct Pad {
    pub before: usize,
    pub after: usize,
    pub mode: PadMode,
}

impl Pad {
    pub fn is_symmetric(&self) -> bool {
        self.before == self.after
    }

    pub fn padded_len(&self, len: usize) -> Option<usize> {
        len.checked_add(self.before)?.checked_add(self.after)
    }

    pub fn output_facts(&self, node: &str, inputs: &[&Fact]) -> RetraceResult<TVec<Fact>> {
        if inputs.len() != 1 {
            bail!(ConvertError::shape(node, format!("expected 1 input, got {}", inputs.len())));
        }
        let Some(shape) = &inputs[0].shape else { return Ok(tvec!(Fact::unknown())) };
        let Some(last) = shape.last() else {
            bail!(ConvertError::shape(node, "can not pad a scalar"));
        };
        let padded = match last {
            Dim::Known(len) => {
                if let Some(reason) = self.mode.check_limits(self.before, self.after, *len) {
                    bail!(ConvertError::shape(node, reason));
                }
                let Some(padded) = self.padded_len(*len) else {
                    bail!(ConvertError::shape(
                        node,
                        format!("padding {len} by ({}, {}) overflows", self.before, self.after)
                    ));
                };
                Dim::Known(padded)
            }
            Dim::Unknown => Dim::Unknown,
        };
        let mut shape = shape.clone();
        let rank = shape.rank();
        shape.0[rank - 1] = padded;
        Ok(tvec!(Fact::shape(shape)))
    }

    pub fn eval(&self, input: &Tensor) -> RetraceResult<Tensor> {
        ensure!(input.ndim() > 0, "Can not pad a scalar");
        let axis = Axis(input.ndim() - 1);
        let len = input.shape()[axis.0];
        if let Some(reason) = self.mode.check_limits(self.before, self.after, len) {
            bail!("{}", reason);
        }
        let mut shape = input.shape().to_vec();
        shape[axis.0] = self
            .padded_len(len)
            .with_context(|| {
                format!("Padding {len} by ({}, {}) overflows", self.before, self.after)
            })?;
        let fill = match self.mode {
            PadMode::Constant(v) => v,
            _ => 0.0,
        };
        let mut output = Tensor::from_elem(shape, fill);
        let before = self.before as isize;
        Zip::from(output.lanes_mut(axis)).and(input.lanes(axis)).for_each(|mut o, i| {
            for (ix, slot) in o.iter_mut().enumerate() {
                if let Some(src) = self.mode.source_index(ix as isize - before, len as isize) {
                    *slot = i[src];
                }
            }
        });
        Ok(output)
    }
}

impl fmt::Display for Pad {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Pad({}, {}, {})", self.before, self.after, self.mode)
    }
}
