//! Error types for the conversion pipeline.
//!
//! Functions return `anyhow` results so that every stage can stack context.
//! The failures the pipeline knows how to classify are [`ConvertError`]
//! values carried inside the `anyhow::Error`; [`ConvertError::find`] gets
//! them back out.

pub type RetraceError = anyhow::Error;
pub type RetraceResult<T> = anyhow::Result<T>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConvertError {
    /// Malformed or unsupported input artifact.
    #[error("{0}")]
    Load(String),
    /// Valid in the source framework, but not representable canonically.
    #[error("{}: {reason}", located(.node, .attribute))]
    UnsupportedConfig { node: String, attribute: Option<String>, reason: String },
    /// Attribute value breaking a hard invariant.
    #[error("{}: {reason}", located(.node, .attribute))]
    InvalidAttribute { node: String, attribute: Option<String>, reason: String },
    #[error("{node}: {reason}")]
    Shape { node: String, reason: String },
    /// Value outside of the output format vocabulary.
    #[error("{}: {reason}", located(.node, .attribute))]
    Serialization { node: String, attribute: Option<String>, reason: String },
}

fn located(node: &str, attribute: &Option<String>) -> String {
    match attribute {
        Some(attr) => format!("{node} (attribute {attr})"),
        None => node.to_string(),
    }
}

impl ConvertError {
    pub fn load(reason: impl Into<String>) -> ConvertError {
        ConvertError::Load(reason.into())
    }

    pub fn unsupported(
        node: impl Into<String>,
        attribute: Option<&str>,
        reason: impl Into<String>,
    ) -> ConvertError {
        ConvertError::UnsupportedConfig {
            node: node.into(),
            attribute: attribute.map(|s| s.to_string()),
            reason: reason.into(),
        }
    }

    pub fn invalid(
        node: impl Into<String>,
        attribute: Option<&str>,
        reason: impl Into<String>,
    ) -> ConvertError {
        ConvertError::InvalidAttribute {
            node: node.into(),
            attribute: attribute.map(|s| s.to_string()),
            reason: reason.into(),
        }
    }

    pub fn shape(node: impl Into<String>, reason: impl Into<String>) -> ConvertError {
        ConvertError::Shape { node: node.into(), reason: reason.into() }
    }

    pub fn serialization(
        node: impl Into<String>,
        attribute: Option<&str>,
        reason: impl Into<String>,
    ) -> ConvertError {
        ConvertError::Serialization {
            node: node.into(),
            attribute: attribute.map(|s| s.to_string()),
            reason: reason.into(),
        }
    }

    /// Name of the error class, as reported by the command line.
    pub fn kind(&self) -> &'static str {
        match self {
            ConvertError::Load(_) => "LoadError",
            ConvertError::UnsupportedConfig { .. } => "UnsupportedConfigError",
            ConvertError::InvalidAttribute { .. } => "InvalidAttributeError",
            ConvertError::Shape { .. } => "ShapeError",
            ConvertError::Serialization { .. } => "SerializationError",
        }
    }

    /// Offending node, if the error is attached to one.
    pub fn node(&self) -> Option<&str> {
        match self {
            ConvertError::Load(_) => None,
            ConvertError::UnsupportedConfig { node, .. }
            | ConvertError::InvalidAttribute { node, .. }
            | ConvertError::Shape { node, .. }
            | ConvertError::Serialization { node, .. } => Some(node),
        }
    }

    /// Look for a classified failure anywhere in an error chain.
    pub fn find(error: &RetraceError) -> Option<&ConvertError> {
        error.chain().find_map(|e| e.downcast_ref::<ConvertError>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn display_names_node_and_attribute() {
        let e = ConvertError::invalid("conv_3", Some("groups"), "5 does not divide 24");
        assert_eq!(e.to_string(), "conv_3 (attribute groups): 5 does not divide 24");
        let e = ConvertError::shape("conv_0", "non-positive output length");
        assert_eq!(e.to_string(), "conv_0: non-positive output length");
    }

    #[test]
    fn find_through_context() {
        let e: RetraceResult<()> = Err(ConvertError::unsupported("c", Some("padding"), "same"))
            .context("Normalizing")
            .context("Converting model.pt");
        let e = e.unwrap_err();
        let found = ConvertError::find(&e).unwrap();
        assert_eq!(found.kind(), "UnsupportedConfigError");
        assert_eq!(found.node(), Some("c"));
    }

    #[test]
    fn find_nothing_in_plain_errors() {
        let e = anyhow::anyhow!("some io issue");
        assert!(ConvertError::find(&e).is_none());
    }
}
