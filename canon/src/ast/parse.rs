use retrace_core::internal::*;

use nom::branch::alt;
use nom::combinator::map;
use nom::IResult;
use nom::{bytes::complete::*, character::complete::*, combinator::*, multi::*, sequence::*};

use crate::ast::*;

pub(super) fn translate_error<E: std::fmt::Debug>(e: E) -> RetraceError {
    ConvertError::load(format!("Fail to parse graph description: {e:?}")).into()
}

#[inline(never)]
pub fn parse_document(doc: &str) -> RetraceResult<Document> {
    all_consuming(document)(doc).map(|pair| pair.1).map_err(translate_error)
}

// <document> ::= <version> <graph-definition>
fn document(i: &str) -> IResult<&str, Document> {
    map(pair(version, graph_def), |(version, graph_def)| Document { version, graph_def })(i)
}

// <version> ::= "version" <numeric-literal> ";"
fn version(i: &str) -> IResult<&str, NumericLiteral> {
    delimited(stag("version"), numeric_literal, stag(";"))(i)
}

// GRAPH

// <graph-definition> ::= <graph-declaration> <body>
// <graph-declaration> ::= "graph" <identifier> "(" <identifier-list> ")"
//                         "->" "(" <identifier-list> ")"
fn graph_def(i: &str) -> IResult<&str, GraphDef> {
    let (i, _) = stag("graph")(i)?;
    let (i, id) = spaced(identifier)(i)?;
    let (i, _) = stag("(")(i)?;
    let (i, parameters) = separated_list0(stag(","), spaced(identifier))(i)?;
    let (i, _) = stag(")")(i)?;
    let (i, _) = stag("->")(i)?;
    let (i, _) = stag("(")(i)?;
    let (i, results) = separated_list0(stag(","), spaced(identifier))(i)?;
    let (i, _) = stag(")")(i)?;
    let (i, body) = spaced(body)(i)?;
    Ok((i, GraphDef { id, parameters, results, body }))
}

// BODY

// <body> ::= "{" <assignment>* "}"
fn body(i: &str) -> IResult<&str, Vec<Assignment>> {
    delimited(stag("{"), many0(assignment), stag("}"))(i)
}

// <assignment> ::= <identifier> [":" <shape>] "=" <invocation> ";"
fn assignment(i: &str) -> IResult<&str, Assignment> {
    let (i, left) = spaced(identifier)(i)?;
    let (i, shape) = opt(preceded(stag(":"), shape))(i)?;
    let (i, _) = stag("=")(i)?;
    let (i, right) = invocation(i)?;
    let (i, _) = stag(";")(i)?;
    Ok((i, Assignment { left, shape, right }))
}

// <shape> ::= "[" [<dim> ("," <dim>)*] "]"
// <dim> ::= <integer> | "?"
fn shape(i: &str) -> IResult<&str, ShapeFact> {
    fn dim(i: &str) -> IResult<&str, Dim> {
        spaced(alt((
            map(tag("?"), |_| Dim::Unknown),
            map(map_res(digit1, |s: &str| s.parse::<usize>()), Dim::Known),
        )))(i)
    }
    map(delimited(stag("["), separated_list0(stag(","), dim), stag("]")), |dims| {
        dims.into_iter().collect()
    })(i)
}

// <invocation> ::= <identifier> "(" <argument-list> ")"
fn invocation(i: &str) -> IResult<&str, Invocation> {
    let (i, id) = spaced(identifier)(i)?;
    let (i, _) = stag("(")(i)?;
    let (i, arguments) = argument_list(i)?;
    let (i, _) = stag(")")(i)?;
    Ok((i, Invocation { id, arguments }))
}

// <argument-list> ::= <argument> ("," <argument>)*
fn argument_list(i: &str) -> IResult<&str, Vec<Argument>> {
    separated_list0(stag(","), argument)(i)
}

// <argument> ::= <rvalue-expr> | <identifier> "=" <rvalue-expr>
fn argument(i: &str) -> IResult<&str, Argument> {
    spaced(map(pair(opt(terminated(direct_identifier, stag("="))), rvalue), |(id, rvalue)| {
        Argument { id, rvalue }
    }))(i)
}

// <rvalue-expr> ::= <identifier> | <literal>
fn rvalue(i: &str) -> IResult<&str, RValue> {
    spaced(alt((
        map(escaped_identifier, RValue::Identifier),
        map(direct_identifier, |id| match &*id {
            "true" => RValue::Literal(Literal::Logical(true)),
            "false" => RValue::Literal(Literal::Logical(false)),
            _ => RValue::Identifier(id),
        }),
        map(literal, RValue::Literal),
    )))(i)
}

// TERMINALS

// identifier: identifiers must consist of the following ASCII characters: _, [a-z], [A-Z], [0-9].
// The identifier must not start with a digit. Anything else goes through the i"..." form.
pub(super) fn identifier(i: &str) -> IResult<&str, String> {
    alt((escaped_identifier, direct_identifier))(i)
}

pub(super) fn direct_identifier(i: &str) -> IResult<&str, String> {
    map(recognize(pair(alt((alpha1, tag("_"))), many0(alt((alphanumeric1, tag("_")))))), |s: &str| {
        s.to_string()
    })(i)
}

pub(super) fn escaped_identifier(i: &str) -> IResult<&str, String> {
    preceded(tag("i"), string_literal)(i)
}

// <literal> ::= <numeric-literal> | <string-literal> | <logical-literal> | "[" <literal-list> "]"
fn literal(i: &str) -> IResult<&str, Literal> {
    spaced(alt((
        map(numeric_literal, Literal::Numeric),
        map(string_literal, Literal::String),
        map(logical_literal, Literal::Logical),
        map(delimited(stag("["), separated_list0(stag(","), literal), stag("]")), Literal::Array),
    )))(i)
}

pub(super) fn numeric_literal(i: &str) -> IResult<&str, String> {
    fn exp_part(i: &str) -> IResult<&str, &str> {
        recognize(tuple((one_of("eE"), opt(one_of("+-")), digit1)))(i)
    }
    fn frac_part(i: &str) -> IResult<&str, &str> {
        recognize(tuple((tag("."), digit0)))(i)
    }
    spaced(map(
        recognize(tuple((opt(tag("-")), digit1, opt(frac_part), opt(exp_part)))),
        |s: &str| s.to_owned(),
    ))(i)
}

fn logical_literal(i: &str) -> IResult<&str, bool> {
    spaced(alt((map(tag("true"), |_| true), map(tag("false"), |_| false))))(i)
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
