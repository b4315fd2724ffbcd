//! XML Reader Module
//!
//! Pull-side plumbing between an XML parser and the tree builder:
//! - Events: owned XML event vocabulary
//! - TokenSource: the pull interface, with optional skip-ahead
//! - XmlReaderSource: quick-xml backed source with raw subtree capture

pub mod events;
pub mod source;
pub mod xml;

pub use events::{Attribute, NamespaceDecl, RawName, StartElement, XmlEvent};
pub use source::{EventListSource, TokenSource};
pub use xml::XmlReaderSource;
