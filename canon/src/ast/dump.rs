use std::io::Write;

use retrace_core::internal::*;

use crate::ast::*;

/// Writes a [`Document`] in the textual form [`super::parse::parse_document`]
/// reads. The output only depends on the document.
pub struct Dumper<'a> {
    w: &'a mut dyn Write,
}

impl<'a> Dumper<'a> {
    pub fn new(w: &'a mut dyn Write) -> Dumper<'a> {
        Dumper { w }
    }

    pub fn document(mut self, document: &Document) -> RetraceResult<()> {
        writeln!(self.w, "version {};", document.version)?;
        writeln!(self.w)?;
        self.graph_def(&document.graph_def)?;
        Ok(())
    }

    fn graph_def(&mut self, def: &GraphDef) -> RetraceResult<()> {
        write!(self.w, "graph ")?;
        self.identifier(&def.id)?;
        write!(self.w, "( ")?;
        self.identifier_list(&def.parameters)?;
        write!(self.w, " ) -> ( ")?;
        self.identifier_list(&def.results)?;
        writeln!(self.w, " )")?;
        writeln!(self.w, "{{")?;
        for assignment in &def.body {
            self.assignment(assignment)?;
        }
        writeln!(self.w, "}}")?;
        Ok(())
    }

    fn identifier_list(&mut self, ids: &[String]) -> RetraceResult<()> {
        for (ix, id) in ids.iter().enumerate() {
            if ix > 0 {
                write!(self.w, ", ")?;
            }
            self.identifier(id)?;
        }
        Ok(())
    }

    fn assignment(&mut self, assignment: &Assignment) -> RetraceResult<()> {
        write!(self.w, "  ")?;
        self.identifier(&assignment.left)?;
        if let Some(shape) = &assignment.shape {
            write!(self.w, " : {shape}")?;
        }
        write!(self.w, " = ")?;
        self.invocation(&assignment.right)?;
        writeln!(self.w, ";")?;
        Ok(())
    }

    fn invocation(&mut self, invocation: &Invocation) -> RetraceResult<()> {
        self.identifier(&invocation.id)?;
        write!(self.w, "(")?;
        for (ix, arg) in invocation.arguments.iter().enumerate() {
            if ix > 0 {
                write!(self.w, ", ")?;
            }
            if let Some(id) = &arg.id {
                write!(self.w, "{id} = ")?;
            }
            self.rvalue(&arg.rvalue)?;
        }
        write!(self.w, ")")?;
        Ok(())
    }

    fn rvalue(&mut self, rvalue: &RValue) -> RetraceResult<()> {
        match rvalue {
            RValue::Identifier(id) => self.identifier(id),
            RValue::Literal(lit) => self.literal(lit),
        }
    }

    fn literal(&mut self, literal: &Literal) -> RetraceResult<()> {
        match literal {
            Literal::Numeric(num) => write!(self.w, "{num}")?,
            Literal::String(s) => write!(self.w, "'{}'", escape(s))?,
            Literal::Logical(b) => write!(self.w, "{}", if *b { "true" } else { "false" })?,
            Literal::Array(items) => {
                write!(self.w, "[")?;
                for (ix, item) in items.iter().enumerate() {
                    if ix > 0 {
                        write!(self.w, ", ")?;
                    }
                    self.literal(item)?;
                }
                write!(self.w, "]")?;
            }
        }
        Ok(())
    }

    fn identifier(&mut self, id: &str) -> RetraceResult<()> {
        if is_plain_identifier(id) {
            write!(self.w, "{id}")?;
        } else {
            write!(self.w, "i\"{}\"", escape(id))?;
        }
        Ok(())
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`, and not a logical keyword.
pub fn is_plain_identifier(id: &str) -> bool {
    let mut chars = id.chars();
    let Some(first) = chars.next() else { return false };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && id != "true"
        && id != "false"
}

fn escape(s: &str) -> Cow<'_, str> {
    if s.contains(['\\', '"', '\'']) {
        let mut escaped = String::with_capacity(s.len() + 2);
        for c in s.chars() {
            if matches!(c, '\\' | '"' | '\'') {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        escaped.into()
    } else {
        s.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse::parse_document;

    fn dump(doc: &Document) -> String {
        let mut buf = vec![];
        Dumper::new(&mut buf).document(doc).unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn sample() -> Document {
        let conv = Invocation {
            id: "conv1d".into(),
            arguments: vec![
                Argument::positional(RValue::Identifier("input.1".into())),
                Argument::positional(RValue::Identifier("conv_0.weight".into())),
                Argument::named("padding", vec![0usize, 2]),
                Argument::named("bias", false),
                Argument::named("padding_mode", "zeros"),
            ],
        };
        Document {
            version: "1.0".into(),
            graph_def: GraphDef {
                id: "main".into(),
                parameters: vec!["input.1".into()],
                results: vec!["y".into()],
                body: vec![
                    Assignment {
                        left: "input.1".into(),
                        shape: Some(ShapeFact(tvec!(Dim::Known(1), Dim::Unknown, Dim::Known(8)))),
                        right: Invocation { id: "external".into(), arguments: vec![] },
                    },
                    Assignment { left: "y".into(), shape: None, right: conv },
                ],
            },
        }
    }

    #[test]
    fn dump_layout() {
        assert_eq!(
            dump(&sample()),
            "version 1.0;\n\
             \n\
             graph main( i\"input.1\" ) -> ( y )\n\
             {\n  \
             i\"input.1\" : [1, ?, 8] = external();\n  \
             y = conv1d(i\"input.1\", i\"conv_0.weight\", \
             padding = [0, 2], bias = false, padding_mode = 'zeros');\n\
             }\n"
        );
    }

    #[test]
    fn dump_then_parse() {
        let doc = sample();
        assert_eq!(parse_document(&dump(&doc)).unwrap(), doc);
    }

    #[test]
    fn escaping() {
        assert!(is_plain_identifier("x_13"));
        assert!(is_plain_identifier("_x"));
        assert!(!is_plain_identifier("x.13"));
        assert!(!is_plain_identifier("13x"));
        assert!(!is_plain_identifier(""));
        assert!(!is_plain_identifier("true"));
        assert_eq!(escape("it's"), "it\\'s");
        assert_eq!(escape("plain"), "plain");
    }
}
