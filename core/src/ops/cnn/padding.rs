use std::fmt;
use std::str::FromStr;

use crate::internal::*;

/// Padding as declared on a convolution, before resolution to explicit
/// amounts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum PaddingSpec {
    Explicit(usize, usize),
    #[default]
    Valid,
    Same,
}

use PaddingSpec::*;

#[derive(Debug, Clone, new, PartialEq, Eq)]
pub struct ComputedPaddedDim {
    pub input: Dim,
    pub convoluted: Dim,
    pub pad_before: usize,
    pub pad_after: usize,
}

impl PaddingSpec {
    /// Explicit (before, after) amounts. 'same' splits the total so that
    /// `before = total / 2`; it only preserves length when stride is 1.
    /// `None` if the receptive field does not fit in a `usize`.
    pub fn resolve(&self, kernel: usize, dilation: usize) -> Option<(usize, usize)> {
        match self {
            Explicit(bef, aft) => Some((*bef, *aft)),
            Valid => Some((0, 0)),
            Same => {
                let total = dilation.checked_mul(kernel.saturating_sub(1))?;
                let before = total / 2;
                Some((before, total - before))
            }
        }
    }

    /// Output geometry of one spatial axis. `None` if the output would be
    /// empty or its length overflows.
    pub fn compute_one(
        &self,
        input: &Dim,
        kernel: usize,
        dilation: usize,
        stride: usize,
    ) -> Option<ComputedPaddedDim> {
        let (bef, aft) = self.resolve(kernel, dilation)?;
        let convoluted = match input {
            Dim::Known(i) => {
                Dim::Known(Self::explicit_usize(*i, kernel, dilation, stride, bef, aft)?)
            }
            Dim::Unknown => Dim::Unknown,
        };
        Some(ComputedPaddedDim::new(*input, convoluted, bef, aft))
    }

    /// `floor((input + bef + aft - dilation * (kernel - 1) - 1) / stride) + 1`
    pub fn explicit_usize(
        input: usize,
        kernel: usize,
        dilation: usize,
        stride: usize,
        bef: usize,
        aft: usize,
    ) -> Option<usize> {
        if kernel == 0 || stride == 0 {
            return None;
        }
        let kernel_field = (kernel - 1).checked_mul(dilation)?.checked_add(1)?;
        let padded = input.checked_add(bef)?.checked_add(aft)?;
        let dividend = padded.checked_sub(kernel_field)?;
        Some(dividend / stride + 1)
    }
}

/// How a convolution fills the positions its padding adds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PaddingMode {
    #[default]
    Zeros,
    Reflect,
    Replicate,
    Circular,
}

impl PaddingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaddingMode::Zeros => "zeros",
            PaddingMode::Reflect => "reflect",
            PaddingMode::Replicate => "replicate",
            PaddingMode::Circular => "circular",
        }
    }
}

impl fmt::Display for PaddingMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaddingMode {
    type Err = RetraceError;
    fn from_str(s: &str) -> RetraceResult<PaddingMode> {
        Ok(match s {
            "zeros" => PaddingMode::Zeros,
            "reflect" => PaddingMode::Reflect,
            "replicate" => PaddingMode::Replicate,
            "circular" => PaddingMode::Circular,
            _ => bail!("Unknown padding mode {:?}", s),
        })
    }
}
