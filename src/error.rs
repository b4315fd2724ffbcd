//! Error types
//!
//! Every failure the object model can surface is a variant of [`OmError`].
//! None of them are retried internally: they describe data problems, not
//! transient conditions.

use crate::config::ConfigError;
use crate::om::NodeId;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, OmError>;

/// Main error type
#[derive(Error, Debug)]
pub enum OmError {
    /// Malformed token sequence while building a tree
    #[error("Structural error{}: {message}", node.map(|n| format!(" at node {}", n)).unwrap_or_default())]
    Structural {
        node: Option<NodeId>,
        message: String,
    },

    /// A destructive data source was read a second time
    #[error("Content already consumed")]
    ContentAlreadyConsumed,

    /// Copy requested on a data source that cannot be duplicated
    #[error("Data source is not copyable")]
    NotCopyable,

    /// Binary reference token with no matching attachment
    #[error("Dangling reference: no attachment with content ID '{content_id}'")]
    DanglingReference { content_id: String },

    /// Multipart container could not be parsed
    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    /// Invalid base64 input
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Failure reported by the upstream XML token source
    #[error("XML error: {0}")]
    Xml(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Caller supplied an argument the operation cannot work with
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Node handle refers to a slot that was freed
    #[error("Stale node handle: {0}")]
    StaleNode(NodeId),
}

impl OmError {
    /// Shorthand for a structural error attached to a node
    pub fn structural(node: Option<NodeId>, message: impl Into<String>) -> Self {
        OmError::Structural {
            node,
            message: message.into(),
        }
    }

    /// Check if this error describes broken input
    ///
    /// A builder or store that raises one while pulling stays failed and
    /// repeats it on every later call.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OmError::Structural { .. }
                | OmError::DanglingReference { .. }
                | OmError::MalformedContainer(_)
                | OmError::Encoding(_)
                | OmError::Xml(_)
                | OmError::Io(_)
        )
    }

    /// Same variant and message, for errors that are reported more than once
    pub(crate) fn replicate(&self) -> OmError {
        match self {
            OmError::Structural { node, message } => OmError::Structural {
                node: *node,
                message: message.clone(),
            },
            OmError::ContentAlreadyConsumed => OmError::ContentAlreadyConsumed,
            OmError::NotCopyable => OmError::NotCopyable,
            OmError::DanglingReference { content_id } => OmError::DanglingReference {
                content_id: content_id.clone(),
            },
            OmError::MalformedContainer(message) => OmError::MalformedContainer(message.clone()),
            OmError::Encoding(err) => OmError::Encoding(err.clone()),
            OmError::Xml(message) => OmError::Xml(message.clone()),
            OmError::Io(err) => OmError::Io(std::io::Error::new(err.kind(), err.to_string())),
            OmError::Config(err) => OmError::Config(ConfigError::InvalidValue {
                field: "config".to_string(),
                value: String::new(),
                reason: err.to_string(),
            }),
            OmError::InvalidArgument(message) => OmError::InvalidArgument(message.clone()),
            OmError::StaleNode(id) => OmError::StaleNode(*id),
        }
    }
}

impl From<quick_xml::Error> for OmError {
    fn from(err: quick_xml::Error) -> Self {
        OmError::Xml(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for OmError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        OmError::Xml(err.to_string())
    }
}

/// Base64 decoding failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Invalid character {byte:#04x} at offset {offset}")]
    InvalidCharacter { offset: usize, byte: u8 },

    #[error("Missing padding")]
    MissingPadding,

    #[error("Too much padding")]
    ExcessPadding,

    #[error("Non-zero trailing bits in final symbol")]
    NonZeroTrailingBits,

    #[error("Invalid input length")]
    InvalidLength,
}

impl From<base64::DecodeError> for EncodingError {
    fn from(err: base64::DecodeError) -> Self {
        match err {
            base64::DecodeError::InvalidByte(offset, byte) => {
                if byte == b'=' {
                    EncodingError::ExcessPadding
                } else {
                    EncodingError::InvalidCharacter { offset, byte }
                }
            }
            base64::DecodeError::InvalidLength(_) => EncodingError::InvalidLength,
            base64::DecodeError::InvalidLastSymbol(_, _) => EncodingError::NonZeroTrailingBits,
            base64::DecodeError::InvalidPadding => EncodingError::MissingPadding,
        }
    }
}
