//! In-memory image of a `code.trace` document.
use retrace_core::internal::*;

pub mod parse;

#[derive(Clone, Debug, PartialEq)]
pub struct ProtoTrace {
    pub doc: Document,
    /// Weights, by label.
    pub tensors: HashMap<String, Arc<Tensor>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub version: i64,
    pub graph: GraphDef,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GraphDef {
    pub parameters: Vec<ValueDecl>,
    pub statements: Vec<Statement>,
    pub results: Vec<String>,
}

/// `%name : Type`
#[derive(Clone, Debug, PartialEq)]
pub struct ValueDecl {
    pub id: String,
    pub spec: TypeSpec,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TypeSpec {
    /// `Tensor`, or `Float(1, *, 64)` when the tracer recorded a shape.
    Tensor(Option<ShapeFact>),
    /// `int`, `float`, `str`, `bool`, `NoneType`...
    Scalar(String),
    /// `int[]`...
    List(String),
}

/// `%out : Type = kind[attr=literal, ...](%arg, ...)`
#[derive(Clone, Debug, PartialEq)]
pub struct Statement {
    pub output: ValueDecl,
    pub kind: String,
    pub attributes: Vec<(String, Literal)>,
    pub arguments: Vec<String>,
}

impl Statement {
    pub fn attribute(&self, name: &str) -> Option<&Literal> {
        self.attributes.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f32),
    Str(String),
    Ints(Vec<i64>),
    Bool(bool),
}
