//! Tree Node representation
//!
//! Nodes are addressed by generation-checked [`NodeId`] handles into the
//! arena owned by a [`Document`](super::Document). A handle to a freed slot
//! never aliases the node that later reuses the slot.

use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::buffer::Blob;
use crate::datasource::DataSource;

/// Node handle (arena index plus slot generation)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    #[inline]
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        NodeId { index, generation }
    }

    /// Arena slot
    #[inline]
    pub fn index(&self) -> usize {
        self.index as usize
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// Type of tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Document root
    Document,
    /// Element node
    Element,
    /// Attribute (owned by an element, outside the child chain)
    Attribute,
    /// Character data, possibly binary
    Text,
    /// CDATA section
    CData,
    /// Comment
    Comment,
    /// Processing instruction
    ProcessingInstruction,
    /// Unexpanded entity reference
    EntityReference,
    /// Namespace declaration (owned by an element, outside the child chain)
    NamespaceDeclaration,
}

/// Namespace-qualified name
///
/// Equality and hashing consider the namespace URI and local name only; the
/// prefix is kept for serialization.
#[derive(Debug, Clone, Default)]
pub struct QName {
    pub namespace: Option<String>,
    pub local: String,
    pub prefix: Option<String>,
}

impl QName {
    /// Create a name in `namespace` (or no namespace)
    pub fn new(namespace: Option<&str>, local: &str) -> Self {
        QName {
            namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string),
            local: local.to_string(),
            prefix: None,
        }
    }

    /// Create a name without a namespace
    pub fn local(local: &str) -> Self {
        Self::new(None, local)
    }

    pub fn with_prefix(mut self, prefix: Option<&str>) -> Self {
        self.prefix = prefix.filter(|p| !p.is_empty()).map(str::to_string);
        self
    }

    /// Check namespace URI and local name
    #[inline]
    pub fn is(&self, namespace: &str, local: &str) -> bool {
        self.local == local && self.namespace.as_deref() == Some(namespace)
    }

    /// Lexical form, `prefix:local` or `local`
    pub fn qualified(&self) -> Cow<'_, str> {
        match &self.prefix {
            Some(p) => Cow::Owned(format!("{}:{}", p, self.local)),
            None => Cow::Borrowed(&self.local),
        }
    }
}

impl PartialEq for QName {
    fn eq(&self, other: &Self) -> bool {
        self.local == other.local && self.namespace == other.namespace
    }
}

impl Eq for QName {}

impl Hash for QName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.namespace.hash(state);
        self.local.hash(state);
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{{{}}}{}", ns, self.local),
            None => f.write_str(&self.local),
        }
    }
}

/// Whether the builder may still append children to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completeness {
    Incomplete,
    Complete,
}

/// Binary content carried as a text node
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryText {
    pub blob: Blob,
    /// Content ID of the attachment the content came from or should go to
    pub content_id: Option<String>,
    /// Hint that the content is worth externalizing
    pub optimize: bool,
    pub content_type: Option<String>,
}

impl BinaryText {
    pub fn new(blob: Blob) -> Self {
        BinaryText {
            blob,
            content_id: None,
            optimize: true,
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_string());
        self
    }

    pub fn with_content_id(mut self, content_id: &str) -> Self {
        self.content_id = Some(content_id.to_string());
        self
    }

    pub fn with_optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }
}

/// Text node value
#[derive(Debug, Clone, PartialEq)]
pub enum TextContent {
    Chars(String),
    Binary(BinaryText),
}

impl TextContent {
    /// Character view; binary content is rendered as base64
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            TextContent::Chars(s) => Cow::Borrowed(s),
            TextContent::Binary(b) => Cow::Owned(crate::codec::encode(&b.blob.to_bytes())),
        }
    }

    #[inline]
    pub fn is_binary(&self) -> bool {
        matches!(self, TextContent::Binary(_))
    }
}

/// Lifecycle of a sourced element
pub enum SourcedState {
    /// Content lives only in the data source
    Opaque(Box<dyn DataSource>),
    /// Content was read into the tree; the source is kept for inspection
    Expanded(Box<dyn DataSource>),
}

impl fmt::Debug for SourcedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourcedState::Opaque(ds) => write!(f, "Opaque(destructive={})", ds.is_destructive()),
            SourcedState::Expanded(_) => f.write_str("Expanded"),
        }
    }
}

/// How an element gets its children
#[derive(Debug)]
pub enum ElementBody {
    Ordinary,
    Sourced(SourcedState),
}

/// Element payload
#[derive(Debug)]
pub struct ElementData {
    pub name: QName,
    /// Attribute nodes in document order
    pub attributes: Vec<NodeId>,
    /// Namespace declaration nodes in document order
    pub namespaces: Vec<NodeId>,
    pub body: ElementBody,
}

impl ElementData {
    pub fn new(name: QName) -> Self {
        ElementData {
            name,
            attributes: Vec::new(),
            namespaces: Vec::new(),
            body: ElementBody::Ordinary,
        }
    }

    pub fn sourced(name: QName, source: Box<dyn DataSource>) -> Self {
        ElementData {
            name,
            attributes: Vec::new(),
            namespaces: Vec::new(),
            body: ElementBody::Sourced(SourcedState::Opaque(source)),
        }
    }

    /// Check if the element still waits for its data source to be read
    #[inline]
    pub fn is_opaque(&self) -> bool {
        matches!(self.body, ElementBody::Sourced(SourcedState::Opaque(_)))
    }

    #[inline]
    pub fn is_sourced(&self) -> bool {
        matches!(self.body, ElementBody::Sourced(_))
    }

    /// The data source of a sourced element, in either state
    pub fn data_source(&self) -> Option<&dyn DataSource> {
        match &self.body {
            ElementBody::Sourced(SourcedState::Opaque(ds))
            | ElementBody::Sourced(SourcedState::Expanded(ds)) => Some(ds.as_ref()),
            ElementBody::Ordinary => None,
        }
    }
}

/// Kind-specific node payload
#[derive(Debug)]
pub enum NodeData {
    Document,
    Element(ElementData),
    Attribute { name: QName, value: String },
    Text(TextContent),
    CData(String),
    Comment(String),
    ProcessingInstruction { target: String, data: String },
    EntityReference(String),
    NamespaceDeclaration { prefix: Option<String>, uri: String },
}

impl NodeData {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeData::Document => NodeKind::Document,
            NodeData::Element(_) => NodeKind::Element,
            NodeData::Attribute { .. } => NodeKind::Attribute,
            NodeData::Text(_) => NodeKind::Text,
            NodeData::CData(_) => NodeKind::CData,
            NodeData::Comment(_) => NodeKind::Comment,
            NodeData::ProcessingInstruction { .. } => NodeKind::ProcessingInstruction,
            NodeData::EntityReference(_) => NodeKind::EntityReference,
            NodeData::NamespaceDeclaration { .. } => NodeKind::NamespaceDeclaration,
        }
    }
}

/// A node in the arena
#[derive(Debug)]
pub struct Node {
    pub(crate) data: NodeData,
    /// Parent node (None for the document root and detached nodes)
    pub(crate) parent: Option<NodeId>,
    pub(crate) first_child: Option<NodeId>,
    pub(crate) last_child: Option<NodeId>,
    pub(crate) prev_sibling: Option<NodeId>,
    pub(crate) next_sibling: Option<NodeId>,
    pub(crate) completeness: Completeness,
}

impl Node {
    pub(crate) fn new(data: NodeData, completeness: Completeness) -> Self {
        Node {
            data,
            parent: None,
            first_child: None,
            last_child: None,
            prev_sibling: None,
            next_sibling: None,
            completeness,
        }
    }

    #[inline]
    pub fn kind(&self) -> NodeKind {
        self.data.kind()
    }

    #[inline]
    pub fn data(&self) -> &NodeData {
        &self.data
    }

    #[inline]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    #[inline]
    pub fn first_child(&self) -> Option<NodeId> {
        self.first_child
    }

    #[inline]
    pub fn last_child(&self) -> Option<NodeId> {
        self.last_child
    }

    #[inline]
    pub fn prev_sibling(&self) -> Option<NodeId> {
        self.prev_sibling
    }

    #[inline]
    pub fn next_sibling(&self) -> Option<NodeId> {
        self.next_sibling
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.completeness == Completeness::Complete
    }

    #[inline]
    pub fn is_element(&self) -> bool {
        matches!(self.data, NodeData::Element(_))
    }

    pub fn as_element(&self) -> Option<&ElementData> {
        match &self.data {
            NodeData::Element(e) => Some(e),
            _ => None,
        }
    }

    pub(crate) fn as_element_mut(&mut self) -> Option<&mut ElementData> {
        match &mut self.data {
            NodeData::Element(e) => Some(e),
            _ => None,
        }
    }

    /// Name of an element or attribute
    pub fn name(&self) -> Option<&QName> {
        match &self.data {
            NodeData::Element(e) => Some(&e.name),
            NodeData::Attribute { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&TextContent> {
        match &self.data {
            NodeData::Text(t) => Some(t),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_qname_ignores_prefix() {
        let a = QName::new(Some("urn:a"), "item").with_prefix(Some("x"));
        let b = QName::new(Some("urn:a"), "item").with_prefix(Some("y"));
        assert_eq!(a, b);

        let set: HashSet<QName> = [a.clone()].into_iter().collect();
        assert!(set.contains(&b));
        assert_eq!(a.qualified(), "x:item");
        assert_eq!(a.to_string(), "{urn:a}item");
    }

    #[test]
    fn test_empty_namespace_is_none() {
        let name = QName::new(Some(""), "plain");
        assert!(name.namespace.is_none());
        assert_eq!(name, QName::local("plain"));
    }

    #[test]
    fn test_node_creation() {
        let node = Node::new(NodeData::Document, Completeness::Incomplete);
        assert_eq!(node.kind(), NodeKind::Document);
        assert!(node.parent().is_none());
        assert!(!node.is_complete());
    }

    #[test]
    fn test_binary_text_as_text() {
        let text = TextContent::Binary(BinaryText::new(Blob::from_slice(b"hi")));
        assert!(text.is_binary());
        assert_eq!(text.as_text(), "aGk=");
    }

    #[test]
    fn test_node_id_display() {
        assert_eq!(NodeId::new(3, 1).to_string(), "#3v1");
    }
}
