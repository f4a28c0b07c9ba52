use retrace_core::internal::*;

pub mod dump;
pub mod parse;

/// A module as found on disk: the structural description and the tensors
/// it references by label.
#[derive(Clone, Debug)]
pub struct ProtoModule {
    pub doc: Document,
    pub tensors: HashMap<String, Arc<Tensor>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub version: NumericLiteral,
    pub graph_def: GraphDef,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GraphDef {
    pub id: String,
    pub parameters: Vec<String>,
    pub results: Vec<String>,
    pub body: Vec<Assignment>,
}

/// `left : [shape] = right;` The annotation is absent when the rank is
/// unknown.
#[derive(Clone, Debug, PartialEq)]
pub struct Assignment {
    pub left: String,
    pub shape: Option<ShapeFact>,
    pub right: Invocation,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Invocation {
    pub id: String,
    pub arguments: Vec<Argument>,
}

impl Invocation {
    pub fn positional(&self) -> impl Iterator<Item = &RValue> {
        self.arguments.iter().filter(|a| a.id.is_none()).map(|a| &a.rvalue)
    }

    pub fn named(&self, name: &str) -> Option<&RValue> {
        self.arguments.iter().find(|a| a.id.as_deref() == Some(name)).map(|a| &a.rvalue)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Argument {
    pub id: Option<String>,
    pub rvalue: RValue,
}

impl Argument {
    pub fn positional(rvalue: RValue) -> Argument {
        Argument { id: None, rvalue }
    }

    pub fn named(id: impl Into<String>, lit: impl Into<Literal>) -> Argument {
        Argument { id: Some(id.into()), rvalue: RValue::Literal(lit.into()) }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RValue {
    Identifier(String),
    Literal(Literal),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Numeric(NumericLiteral),
    String(StringLiteral),
    Logical(LogicalLiteral),
    Array(Vec<Literal>),
}

impl From<bool> for Literal {
    fn from(b: bool) -> Literal {
        Literal::Logical(b)
    }
}

impl From<usize> for Literal {
    fn from(i: usize) -> Literal {
        Literal::Numeric(i.to_string())
    }
}

impl From<f32> for Literal {
    fn from(f: f32) -> Literal {
        Literal::Numeric(format!("{f:?}"))
    }
}

impl<'a> From<&'a str> for Literal {
    fn from(s: &'a str) -> Literal {
        Literal::String(s.to_string())
    }
}

impl<T: Into<Literal>> From<Vec<T>> for Literal {
    fn from(v: Vec<T>) -> Literal {
        Literal::Array(v.into_iter().map(|t| t.into()).collect())
    }
}

pub type NumericLiteral = String;
pub type StringLiteral = String;
pub type LogicalLiteral = bool;
