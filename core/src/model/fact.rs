use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use crate::internal::*;

/// One dimension of a static shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dim {
    Known(usize),
    Unknown,
}

impl Dim {
    pub fn to_usize(&self) -> Option<usize> {
        match self {
            Dim::Known(d) => Some(*d),
            Dim::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Dim::Known(_))
    }

    /// Two dims are compatible unless both are known and differ.
    pub fn compatible_with(&self, other: &Dim) -> bool {
        match (self, other) {
            (Dim::Known(a), Dim::Known(b)) => a == b,
            _ => true,
        }
    }
}

impl From<usize> for Dim {
    fn from(d: usize) -> Dim {
        Dim::Known(d)
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Dim::Known(d) => write!(f, "{d}"),
            Dim::Unknown => write!(f, "?"),
        }
    }
}

impl FromStr for Dim {
    type Err = RetraceError;
    fn from_str(s: &str) -> RetraceResult<Dim> {
        let s = s.trim();
        if s == "?" || s == "*" {
            Ok(Dim::Unknown)
        } else {
            s.parse::<usize>().map(Dim::Known).with_context(|| format!("Invalid dimension {s:?}"))
        }
    }
}

/// A static shape where some dimensions may be unknown.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct ShapeFact(pub TVec<Dim>);

impl ShapeFact {
    pub fn known(dims: &[usize]) -> ShapeFact {
        ShapeFact(dims.iter().map(|d| Dim::Known(*d)).collect())
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Concrete dimensions, if all are known.
    pub fn as_concrete(&self) -> Option<TVec<usize>> {
        self.0.iter().map(|d| d.to_usize()).collect()
    }

    pub fn is_concrete(&self) -> bool {
        self.0.iter().all(|d| d.is_known())
    }

    pub fn compatible_with(&self, other: &ShapeFact) -> bool {
        self.rank() == other.rank()
            && self.iter().zip(other.iter()).all(|(a, b)| a.compatible_with(b))
    }

    pub fn matches(&self, concrete: &[usize]) -> bool {
        self.rank() == concrete.len()
            && self.iter().zip(concrete.iter()).all(|(a, b)| a.compatible_with(&Dim::Known(*b)))
    }
}

impl Deref for ShapeFact {
    type Target = [Dim];
    fn deref(&self) -> &[Dim] {
        &self.0
    }
}

impl FromIterator<Dim> for ShapeFact {
    fn from_iter<I: IntoIterator<Item = Dim>>(iter: I) -> ShapeFact {
        ShapeFact(iter.into_iter().collect())
    }
}

impl fmt::Display for ShapeFact {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}]", self.0.iter().join(", "))
    }
}

/// Parses `[1,12,64]`, `1,12,64` or `[1,?,64]`.
impl FromStr for ShapeFact {
    type Err = RetraceError;
    fn from_str(s: &str) -> RetraceResult<ShapeFact> {
        let inner = s.trim();
        let inner = inner.strip_prefix('[').unwrap_or(inner);
        let inner = inner.strip_suffix(']').unwrap_or(inner).trim();
        if inner.is_empty() {
            return Ok(ShapeFact::default());
        }
        inner.split(',').map(|d| d.parse::<Dim>()).collect::<RetraceResult<_>>()
    }
}

/// What is statically known about an operand.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct Fact {
    /// `None` when even the rank is unknown.
    pub shape: Option<ShapeFact>,
}

impl Fact {
    pub fn unknown() -> Fact {
        Fact { shape: None }
    }

    pub fn shape(shape: ShapeFact) -> Fact {
        Fact { shape: Some(shape) }
    }

    pub fn for_tensor(tensor: &Tensor) -> Fact {
        Fact::shape(ShapeFact::known(tensor.shape()))
    }

    pub fn rank(&self) -> Option<usize> {
        self.shape.as_ref().map(|s| s.rank())
    }

    pub fn concrete_shape(&self) -> Option<TVec<usize>> {
        self.shape.as_ref().and_then(|s| s.as_concrete())
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.shape {
            Some(shape) => write!(f, "{shape}"),
            None => write!(f, "[..]"),
        }
    }
}
