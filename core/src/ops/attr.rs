use std::fmt;

use crate::internal::*;

/// Value of a framework operator attribute, after constant folding.
#[derive(Debug, Clone, PartialEq)]
pub enum Attr {
    None,
    Bool(bool),
    Int(i64),
    Ints(TVec<i64>),
    Float(f32),
    Str(String),
}

impl Attr {
    pub fn kind(&self) -> &'static str {
        match self {
            Attr::None => "none",
            Attr::Bool(_) => "bool",
            Attr::Int(_) => "int",
            Attr::Ints(_) => "int list",
            Attr::Float(_) => "float",
            Attr::Str(_) => "string",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Attr::None)
    }

    pub fn to_bool(&self) -> Option<bool> {
        match self {
            Attr::Bool(b) => Some(*b),
            Attr::Int(i @ (0 | 1)) => Some(*i == 1),
            _ => None,
        }
    }

    pub fn to_int(&self) -> Option<i64> {
        match self {
            Attr::Int(i) => Some(*i),
            Attr::Ints(is) if is.len() == 1 => Some(is[0]),
            _ => None,
        }
    }

    /// A single int is accepted where a list is expected, as the tracer
    /// sometimes emits scalar arguments for one-element tuples.
    pub fn to_ints(&self) -> Option<TVec<i64>> {
        match self {
            Attr::Int(i) => Some(tvec!(*i)),
            Attr::Ints(is) => Some(is.clone()),
            _ => None,
        }
    }

    pub fn to_float(&self) -> Option<f32> {
        match self {
            Attr::Float(f) => Some(*f),
            Attr::Int(i) => Some(*i as f32),
            _ => None,
        }
    }

    pub fn to_str(&self) -> Option<&str> {
        match self {
            Attr::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Attr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Attr::None => write!(f, "None"),
            Attr::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Attr::Int(i) => write!(f, "{i}"),
            Attr::Ints(is) => write!(f, "[{}]", is.iter().join(", ")),
            Attr::Float(x) => write!(f, "{x:?}"),
            Attr::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for Attr {
    fn from(i: i64) -> Attr {
        Attr::Int(i)
    }
}

impl From<f32> for Attr {
    fn from(x: f32) -> Attr {
        Attr::Float(x)
    }
}

impl From<bool> for Attr {
    fn from(b: bool) -> Attr {
        Attr::Bool(b)
    }
}

impl From<&str> for Attr {
    fn from(s: &str) -> Attr {
        Attr::Str(s.to_string())
    }
}

impl From<&[i64]> for Attr {
    fn from(is: &[i64]) -> Attr {
        Attr::Ints(is.into())
    }
}
