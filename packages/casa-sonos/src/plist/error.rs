use std::fmt::Display;

use thiserror::Error;

/// Errors raised while reading, writing or mapping property lists.
#[derive(Debug, Error)]
pub enum PlistError {
    /// A closing tag did not match the element it was meant to close.
    #[error("tag mismatch: expected </{expected}>, found </{found}>")]
    TagMismatch { expected: String, found: String },

    /// An element appeared where only text (or nothing) is allowed.
    #[error("tag <{0}> not allowed here")]
    TagNotAllowed(String),

    /// The stored value cannot be coerced into the requested type.
    #[error("incompatible types: cannot assign {from} to {to}")]
    IncompatibleType {
        from: &'static str,
        to: &'static str,
    },

    /// An element name outside the property-list vocabulary.
    #[error("unknown tag <{0}>")]
    UnknownTag(String),

    /// Scalar text that does not parse as its declared kind.
    #[error("invalid {kind} value {value:?}")]
    InvalidScalar { kind: &'static str, value: String },

    /// The document ended or was malformed at the XML level.
    #[error("XML error: {0}")]
    Xml(String),

    /// No `<plist>` element (or no value inside it).
    #[error("missing <plist> root value")]
    MissingRoot,

    /// Message produced by a serde `Serialize`/`Deserialize` impl.
    #[error("{0}")]
    Custom(String),
}

/// Convenient Result alias for property-list operations.
pub type PlistResult<T> = Result<T, PlistError>;

impl From<quick_xml::Error> for PlistError {
    fn from(err: quick_xml::Error) -> Self {
        Self::Xml(err.to_string())
    }
}

impl serde::ser::Error for PlistError {
    fn custom<T: Display>(msg: T) -> Self {
        Self::Custom(msg.to_string())
    }
}

impl serde::de::Error for PlistError {
    fn custom<T: Display>(msg: T) -> Self {
        Self::Custom(msg.to_string())
    }
}
