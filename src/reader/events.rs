//! XML Event Types
//!
//! Owned event vocabulary shared by token sources and event sinks. Names are
//! lexical (`prefix:local`); namespace resolution is left to the consumer.
//! Namespace declarations travel separately from ordinary attributes.

use std::fmt;

/// Lexical name, split at the first colon
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RawName {
    pub prefix: Option<String>,
    pub local: String,
}

impl RawName {
    /// Split a lexical name into prefix and local part
    pub fn parse(name: &str) -> Self {
        let (prefix, local) = split_name(name.as_bytes());
        RawName {
            prefix: prefix.map(|p| String::from_utf8_lossy(p).into_owned()),
            local: String::from_utf8_lossy(local).into_owned(),
        }
    }

    pub fn new(prefix: Option<&str>, local: &str) -> Self {
        RawName {
            prefix: prefix.filter(|p| !p.is_empty()).map(str::to_string),
            local: local.to_string(),
        }
    }

    /// Lexical form
    pub fn qualified(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RawName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(p) => write!(f, "{}:{}", p, self.local),
            None => f.write_str(&self.local),
        }
    }
}

/// Attribute with an unescaped value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: RawName,
    pub value: String,
}

impl Attribute {
    pub fn new(name: &str, value: &str) -> Self {
        Attribute {
            name: RawName::parse(name),
            value: value.to_string(),
        }
    }
}

/// `xmlns` / `xmlns:prefix` declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceDecl {
    /// None for the default namespace
    pub prefix: Option<String>,
    pub uri: String,
}

impl NamespaceDecl {
    pub fn new(prefix: Option<&str>, uri: &str) -> Self {
        NamespaceDecl {
            prefix: prefix.map(str::to_string),
            uri: uri.to_string(),
        }
    }
}

/// Start element event data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartElement {
    pub name: RawName,
    pub attributes: Vec<Attribute>,
    pub namespaces: Vec<NamespaceDecl>,
}

impl StartElement {
    /// Create a new start element from a lexical name
    pub fn new(name: &str) -> Self {
        StartElement {
            name: RawName::parse(name),
            attributes: Vec::new(),
            namespaces: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.push(Attribute::new(name, value));
        self
    }

    pub fn with_namespace(mut self, prefix: Option<&str>, uri: &str) -> Self {
        self.namespaces.push(NamespaceDecl::new(prefix, uri));
        self
    }

    /// Get an attribute value by lexical name
    pub fn get_attribute_value(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.qualified() == name)
            .map(|a| a.value.as_str())
    }
}

/// XML parsing event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlEvent {
    /// Start of the document, with the XML declaration if there was one
    StartDocument {
        version: Option<String>,
        encoding: Option<String>,
        standalone: Option<bool>,
    },
    EndDocument,
    StartElement(StartElement),
    EndElement(RawName),
    /// Unescaped character data
    Characters(String),
    CData(String),
    Comment(String),
    ProcessingInstruction { target: String, data: String },
    /// Reference to an entity the source did not expand
    EntityReference(String),
}

/// Split a name into prefix and local name at the colon
fn split_name(name: &[u8]) -> (Option<&[u8]>, &[u8]) {
    if let Some(pos) = memchr::memchr(b':', name) {
        (Some(&name[..pos]), &name[pos + 1..])
    } else {
        (None, name)
    }
}

impl XmlEvent {
    /// Bare start document event
    pub fn start_document() -> Self {
        XmlEvent::StartDocument {
            version: None,
            encoding: None,
            standalone: None,
        }
    }

    /// Check if this is a start element event
    pub fn is_start_element(&self) -> bool {
        matches!(self, XmlEvent::StartElement(_))
    }

    /// Check if this is an end element event
    pub fn is_end_element(&self) -> bool {
        matches!(self, XmlEvent::EndElement(_))
    }

    /// Check for character data made only of XML whitespace
    pub fn is_whitespace(&self) -> bool {
        match self {
            XmlEvent::Characters(t) => t.bytes().all(|b| matches!(b, b' ' | b'\t' | b'\r' | b'\n')),
            _ => false,
        }
    }

    /// Get as start element if applicable
    pub fn as_start_element(&self) -> Option<&StartElement> {
        match self {
            XmlEvent::StartElement(e) => Some(e),
            _ => None,
        }
    }

    /// Get text content if applicable
    pub fn as_text(&self) -> Option<&str> {
        match self {
            XmlEvent::Characters(t) | XmlEvent::CData(t) => Some(t),
            _ => None,
        }
    }
}
