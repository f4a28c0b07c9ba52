use retrace_core::internal::*;

use nom::branch::alt;
use nom::combinator::map;
use nom::IResult;
use nom::{bytes::complete::*, character::complete::*, combinator::*, multi::*, sequence::*};

use crate::ast::*;

pub(super) fn translate_error<E: std::fmt::Debug>(e: E) -> RetraceError {
    ConvertError::load(format!("Fail to parse trace: {e:?}")).into()
}

#[inline(never)]
pub fn parse_document(doc: &str) -> RetraceResult<Document> {
    all_consuming(document)(doc).map(|pair| pair.1).map_err(translate_error)
}

// <document> ::= "version" <integer> <graph>
fn document(i: &str) -> IResult<&str, Document> {
    map(pair(version, graph_def), |(version, graph)| Document { version, graph })(i)
}

fn version(i: &str) -> IResult<&str, i64> {
    preceded(stag("version"), spaced(integer))(i)
}

// <graph> ::= "graph" "(" <value-decl-list> ")" ":" <statement>* "return" "(" <value-list> ")"
fn graph_def(i: &str) -> IResult<&str, GraphDef> {
    let (i, _) = stag("graph")(i)?;
    let (i, _) = stag("(")(i)?;
    let (i, parameters) = separated_list0(stag(","), value_decl)(i)?;
    let (i, _) = stag(")")(i)?;
    let (i, _) = stag(":")(i)?;
    let (i, statements) = many0(statement)(i)?;
    let (i, _) = stag("return")(i)?;
    let (i, _) = stag("(")(i)?;
    let (i, results) = separated_list0(stag(","), value_ref)(i)?;
    let (i, _) = stag(")")(i)?;
    Ok((i, GraphDef { parameters, statements, results }))
}

// <statement> ::= <value-decl> "=" <symbol> ["[" <attribute-list> "]"] "(" <value-list> ")"
fn statement(i: &str) -> IResult<&str, Statement> {
    let (i, output) = value_decl(i)?;
    let (i, _) = stag("=")(i)?;
    let (i, kind) = spaced(symbol)(i)?;
    let (i, attributes) =
        map(opt(delimited(stag("["), separated_list0(stag(","), attribute), stag("]"))), |a| {
            a.unwrap_or_default()
        })(i)?;
    let (i, _) = stag("(")(i)?;
    let (i, arguments) = separated_list0(stag(","), value_ref)(i)?;
    let (i, _) = stag(")")(i)?;
    Ok((i, Statement { output, kind, attributes, arguments }))
}

// <attribute> ::= <identifier> "=" <literal>
fn attribute(i: &str) -> IResult<&str, (String, Literal)> {
    separated_pair(map(spaced(identifier), |s| s.to_string()), stag("="), literal)(i)
}

// <value-decl> ::= <value-ref> ":" <type-spec>
fn value_decl(i: &str) -> IResult<&str, ValueDecl> {
    map(separated_pair(value_ref, stag(":"), type_spec), |(id, spec)| ValueDecl { id, spec })(i)
}

// <value-ref> ::= "%" [A-Za-z0-9_.]+
fn value_ref(i: &str) -> IResult<&str, String> {
    let id_char = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '.';
    spaced(map(preceded(tag("%"), take_while1(id_char)), |s: &str| s.to_string()))(i)
}

// <type-spec> ::= "Float" "(" <dim-list> ")" | <identifier> ["[" "]"]
fn type_spec(i: &str) -> IResult<&str, TypeSpec> {
    fn dim(i: &str) -> IResult<&str, Dim> {
        spaced(alt((
            map(tag("*"), |_| Dim::Unknown),
            map(map_res(digit1, |s: &str| s.parse::<usize>()), Dim::Known),
        )))(i)
    }
    spaced(alt((
        map(
            preceded(
                stag("Float"),
                delimited(stag("("), separated_list0(stag(","), dim), stag(")")),
            ),
            |dims| TypeSpec::Tensor(Some(dims.into_iter().collect())),
        ),
        map(terminated(identifier, pair(stag("["), stag("]"))), |s| TypeSpec::List(s.to_string())),
        map(identifier, |s| {
            if s == "Tensor" {
                TypeSpec::Tensor(None)
            } else {
                TypeSpec::Scalar(s.to_string())
            }
        }),
    )))(i)
}

// TERMINALS

// <symbol> ::= <identifier> "::" <identifier>
fn symbol(i: &str) -> IResult<&str, String> {
    map(recognize(tuple((identifier, tag("::"), identifier))), |s: &str| s.to_string())(i)
}

fn identifier(i: &str) -> IResult<&str, &str> {
    recognize(pair(alt((alpha1, tag("_"))), many0(alt((alphanumeric1, tag("_"))))))(i)
}

// <literal> ::= <string> | "[" <integer-list> "]" | <float> | <integer> | "True" | "False"
fn literal(i: &str) -> IResult<&str, Literal> {
    spaced(alt((
        map(string_literal, Literal::Str),
        map(
            delimited(stag("["), separated_list0(stag(","), spaced(integer)), stag("]")),
            Literal::Ints,
        ),
        map(float_literal, Literal::Float),
        map(integer, Literal::Int),
        map(tag("True"), |_| Literal::Bool(true)),
        map(tag("False"), |_| Literal::Bool(false)),
    )))(i)
}

fn integer(i: &str) -> IResult<&str, i64> {
    map_res(recognize(pair(opt(tag("-")), digit1)), |s: &str| s.parse::<i64>())(i)
}

// A float must carry a dot, an exponent, or be one of inf and nan.
fn float_literal(i: &str) -> IResult<&str, f32> {
    fn exp_part(i: &str) -> IResult<&str, &str> {
        recognize(tuple((one_of("eE"), opt(one_of("+-")), digit1)))(i)
    }
    fn frac_part(i: &str) -> IResult<&str, &str> {
        recognize(tuple((tag("."), digit0)))(i)
    }
    map_res(
        alt((
            recognize(tuple((
                opt(tag("-")),
                digit1,
                alt((recognize(pair(frac_part, opt(exp_part))), exp_part)),
            ))),
            recognize(pair(opt(tag("-")), tag("inf"))),
            tag("nan"),
        )),
        |s: &str| s.parse::<f32>(),
    )(i)
}

fn string_literal(i: &str) -> IResult<&str, String> {
    fn inner(i: &str) -> IResult<&str, String> {
        map(
            many0(alt((
                preceded(tag("\\"), nom::character::complete::anychar),
                nom::character::complete::none_of("\\\"'"),
            ))),
            |v: Vec<char>| v.into_iter().collect(),
        )(i)
    }
    alt((delimited(tag("'"), inner, tag("'")), delimited(tag("\""), inner, tag("\""))))(i)
}

// SPACES

fn space_and_comments(i: &str) -> IResult<&str, ()> {
    map(
        many0(alt((
            recognize(one_of(" \t\n\r")),
            recognize(tuple((tag("#"), many0(none_of("\r\n"))))),
        ))),
        |_| (),
    )(i)
}

fn spaced<'s, O, F>(it: F) -> impl FnMut(&'s str) -> IResult<&'s str, O>
where
    F: FnMut(&'s str) -> IResult<&'s str, O>,
{
    delimited(space_and_comments, it, space_and_comments)
}

pub(super) fn stag<'s>(t: &'static str) -> impl FnMut(&'s str) -> IResult<&'s str, &'s str> {
    spaced(tag(t))
}
