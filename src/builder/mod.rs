//! Deferred Tree Builder
//!
//! Materializes a tree from a token source on demand. Navigation pulls only
//! as many tokens as it needs; every node records whether it is complete.
//!
//! Elements matched by a substitution rule are never materialized: the
//! builder asks the token source to skip them and keeps their serialized
//! form behind a data source. Such a sourced element is expanded the first
//! time its children are requested, never by serialization.

mod assemble;
pub mod rules;
pub mod serialize;

pub use rules::{CaptureBytes, CapturedSubtree, SubstitutionRule};
pub use serialize::serialize;

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use percent_encoding::percent_decode_str;
use tracing::{debug, trace, warn};

use self::assemble::Assembler;
use crate::config::{OmConfig, TreeFlavor};
use crate::error::{OmError, Result};
use crate::om::{
    ns, BinaryText, Completeness, Declaration, Document, ElementBody, ElementData, NamespaceResolver,
    NodeData, NodeId, NodeKind, QName, SourcedState, TextContent,
};
use crate::reader::events::{StartElement, XmlEvent};
use crate::reader::source::TokenSource;
use crate::reader::xml::XmlReaderSource;
use crate::writer::sink::EventSink;
use crate::writer::xml::XmlWriterSink;
use crate::xop::AttachmentResolver;

/// Which rule claimed an element
enum RuleMatch {
    Named(QName),
    Payload,
}

/// Pull-driven tree builder
pub struct DeferredBuilder {
    doc: Document,
    source: Option<Box<dyn TokenSource>>,
    assembler: Assembler,
    rules: HashMap<QName, (usize, Box<dyn SubstitutionRule>)>,
    payload_rule: Option<Box<dyn SubstitutionRule>>,
    attachments: Option<Box<dyn AttachmentResolver>>,
    flavor: TreeFlavor,
    /// First error raised while pulling; repeated by every later call
    poisoned: Option<OmError>,
}

impl DeferredBuilder {
    /// Builder over a token source
    pub fn new(source: impl TokenSource + 'static, flavor: TreeFlavor) -> Self {
        let doc = Document::new();
        let assembler = Assembler::new(doc.root(), NamespaceResolver::new());
        DeferredBuilder {
            doc,
            source: Some(Box::new(source)),
            assembler,
            rules: HashMap::new(),
            payload_rule: None,
            attachments: None,
            flavor,
            poisoned: None,
        }
    }

    /// Builder over an in-memory document, with skip-ahead support
    pub fn from_bytes(xml: impl Into<Bytes>, flavor: TreeFlavor) -> Self {
        Self::new(XmlReaderSource::from_bytes(xml), flavor)
    }

    pub fn with_config(source: impl TokenSource + 'static, config: &OmConfig) -> Self {
        Self::new(source, config.flavor)
    }

    /// Wrap an existing tree; nothing is left to pull
    pub fn from_document(doc: Document) -> Self {
        let assembler = Assembler::new(doc.root(), NamespaceResolver::new());
        DeferredBuilder {
            doc,
            source: None,
            assembler,
            rules: HashMap::new(),
            payload_rule: None,
            attachments: None,
            flavor: TreeFlavor::Plain,
            poisoned: None,
        }
    }

    /// Substitute elements named `name` at depth `max_depth` or shallower
    ///
    /// The document element is at depth 0.
    pub fn register_rule(&mut self, name: QName, max_depth: usize, rule: impl SubstitutionRule + 'static) {
        self.rules.insert(name, (max_depth, Box::new(rule)));
    }

    /// Substitute the payload: first element child of a SOAP `Body`
    pub fn register_payload_rule(&mut self, rule: impl SubstitutionRule + 'static) {
        self.payload_rule = Some(Box::new(rule));
    }

    /// Resolve `xop:Include` references through `resolver`
    pub fn set_attachment_resolver(&mut self, resolver: impl AttachmentResolver + 'static) {
        self.attachments = Some(Box::new(resolver));
    }

    pub fn flavor(&self) -> TreeFlavor {
        self.flavor
    }

    /// The tree as built so far
    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn into_document(self) -> Document {
        self.doc
    }

    /// The document node
    pub fn root(&self) -> NodeId {
        self.doc.root()
    }

    /// Check if the token source is exhausted or released
    pub fn is_done(&self) -> bool {
        self.source.is_none()
    }

    /// Release the token source, leaving the partial tree behind
    pub fn close(&mut self) {
        if self.source.take().is_some() {
            debug!(nodes = self.doc.node_count(), "builder closed");
        }
    }

    fn check(&self) -> Result<()> {
        match &self.poisoned {
            Some(err) => Err(err.replicate()),
            None => Ok(()),
        }
    }

    // ========================================================================
    // Pulling
    // ========================================================================

    /// Pull until one node is opened or completed
    ///
    /// Returns None once the input is exhausted.
    pub fn next_node(&mut self) -> Result<Option<NodeId>> {
        self.check()?;
        match self.step() {
            Ok(node) => Ok(node),
            Err(err) => {
                warn!(error = %err, "builder poisoned");
                self.poisoned = Some(err.replicate());
                self.source = None;
                Err(err)
            }
        }
    }

    /// Pull until `target` is complete or the input ends
    pub fn materialize_until(&mut self, target: NodeId) -> Result<()> {
        self.doc.get(target)?;
        while !self.doc.is_complete(target) {
            if self.next_node()?.is_none() {
                break;
            }
        }
        Ok(())
    }

    /// Pull everything; sourced elements stay opaque
    pub fn build_all(&mut self) -> Result<()> {
        while self.next_node()?.is_some() {}
        Ok(())
    }

    fn next_event(&mut self) -> Result<Option<XmlEvent>> {
        match self.source.as_mut() {
            Some(source) => source.next_event(),
            None => Ok(None),
        }
    }

    fn step(&mut self) -> Result<Option<NodeId>> {
        loop {
            if self.source.is_none() {
                return Ok(None);
            }
            let event = self.next_event()?;
            let node = match event {
                None | Some(XmlEvent::EndDocument) => {
                    self.finish()?;
                    return Ok(None);
                }
                Some(XmlEvent::StartDocument {
                    version,
                    encoding,
                    standalone,
                }) => {
                    self.doc.set_declaration(Declaration {
                        version,
                        encoding,
                        standalone,
                    });
                    continue;
                }
                Some(XmlEvent::StartElement(start)) => self.start_element(start)?,
                Some(XmlEvent::EndElement(name)) => {
                    let id = self.assembler.close(&mut self.doc, &name)?;
                    trace!(node = %id, "element complete");
                    id
                }
                Some(event @ XmlEvent::Characters(_)) if self.assembler.depth() == 0 => {
                    if event.is_whitespace() {
                        continue;
                    }
                    return Err(OmError::structural(
                        Some(self.doc.root()),
                        "character data outside the document element",
                    ));
                }
                Some(XmlEvent::CData(_)) | Some(XmlEvent::EntityReference(_)) if self.assembler.depth() == 0 => {
                    return Err(OmError::structural(
                        Some(self.doc.root()),
                        "content outside the document element",
                    ));
                }
                Some(XmlEvent::Characters(text)) => self
                    .assembler
                    .append_leaf(&mut self.doc, NodeData::Text(TextContent::Chars(text)))?,
                Some(XmlEvent::CData(text)) => self.assembler.append_leaf(&mut self.doc, NodeData::CData(text))?,
                Some(XmlEvent::Comment(text)) => self.assembler.append_leaf(&mut self.doc, NodeData::Comment(text))?,
                Some(XmlEvent::ProcessingInstruction { target, data }) => self
                    .assembler
                    .append_leaf(&mut self.doc, NodeData::ProcessingInstruction { target, data })?,
                Some(XmlEvent::EntityReference(name)) => self
                    .assembler
                    .append_leaf(&mut self.doc, NodeData::EntityReference(name))?,
            };
            return Ok(Some(node));
        }
    }

    /// End of input: everything must be closed
    fn finish(&mut self) -> Result<()> {
        if let Some(open) = self.assembler.current() {
            let name = self
                .assembler
                .innermost_name()
                .map(|n| n.to_string())
                .unwrap_or_default();
            return Err(OmError::structural(
                Some(open),
                format!("input ends inside <{}>", name),
            ));
        }
        if self.doc.document_element().is_none() {
            return Err(OmError::structural(Some(self.doc.root()), "no document element"));
        }
        self.doc.set_complete(self.doc.root())?;
        self.source = None;
        debug!(nodes = self.doc.node_count(), "document complete");
        Ok(())
    }

    fn start_element(&mut self, start: StartElement) -> Result<NodeId> {
        let depth = self.assembler.depth();
        let parent = self.assembler.parent();
        if depth == 0 && self.doc.document_element().is_some() {
            return Err(OmError::structural(
                Some(self.doc.root()),
                format!("second document element <{}>", start.name),
            ));
        }

        let inherited = self.assembler.bindings();
        let name = self.assembler.enter(&start)?;

        if depth == 0 && self.flavor == TreeFlavor::Soap && !is_envelope(&name) {
            self.assembler.leave();
            return Err(OmError::structural(
                Some(self.doc.root()),
                format!("document element {} is not a SOAP Envelope", name),
            ));
        }

        if self.attachments.is_some() && name.is(ns::XOP_INCLUDE, "Include") {
            let result = if depth == 0 {
                Err(OmError::structural(
                    Some(self.doc.root()),
                    "xop:Include cannot be the document element",
                ))
            } else {
                self.next_event().and_then(|end| self.include(&start, parent, end))
            };
            self.assembler.leave();
            return result;
        }

        if let Some(rule) = self.match_rule(&name, depth) {
            let result = self.substitute(start, name, rule, inherited, parent);
            self.assembler.leave();
            return result;
        }

        let id = self.doc.create(
            NodeData::Element(ElementData::new(name)),
            Completeness::Incomplete,
        );
        self.doc.append_child(parent, id)?;
        self.assembler.apply_start(&mut self.doc, id, &start)?;
        self.assembler.push(id, start.name);
        Ok(id)
    }

    // ========================================================================
    // Substitution
    // ========================================================================

    fn match_rule(&self, name: &QName, depth: usize) -> Option<RuleMatch> {
        if let Some((max_depth, _)) = self.rules.get(name) {
            if depth <= *max_depth {
                return Some(RuleMatch::Named(name.clone()));
            }
        }
        if self.payload_rule.is_some() && depth == 2 && self.is_payload_position() {
            return Some(RuleMatch::Payload);
        }
        None
    }

    /// The innermost open element is a SOAP Body whose parent is the Envelope
    /// and no element child has been seen yet
    fn is_payload_position(&self) -> bool {
        let (Some(body), Some(envelope)) = (self.assembler.ancestor(0), self.assembler.ancestor(1)) else {
            return false;
        };
        let (Some(body_name), Some(envelope_name)) = (self.doc.name(body), self.doc.name(envelope)) else {
            return false;
        };
        let soap_ns = match body_name.namespace.as_deref() {
            Some(uri @ (ns::SOAP11_ENVELOPE | ns::SOAP12_ENVELOPE)) => uri,
            _ => return false,
        };
        body_name.local == "Body"
            && envelope_name.is(soap_ns, "Envelope")
            && !self
                .doc
                .children(body)
                .any(|c| self.doc.kind(c) == Some(NodeKind::Element))
    }

    fn substitute(
        &mut self,
        start: StartElement,
        name: QName,
        rule: RuleMatch,
        namespaces: Vec<(Option<String>, String)>,
        parent: NodeId,
    ) -> Result<NodeId> {
        let raw = self.capture(&start)?;
        let rule: Option<&mut (dyn SubstitutionRule + 'static)> = match &rule {
            RuleMatch::Named(key) => self.rules.get_mut(key).map(|(_, r)| r.as_mut()),
            RuleMatch::Payload => self.payload_rule.as_deref_mut(),
        };
        let Some(rule) = rule else {
            return Err(OmError::InvalidArgument(format!("no rule registered for {}", name)));
        };

        debug!(element = %name, bytes = raw.len(), "subtree substituted");
        let source = rule.substitute(CapturedSubtree {
            name: name.clone(),
            raw,
            namespaces,
        })?;

        let id = self.doc.create(
            NodeData::Element(ElementData::sourced(name, source)),
            Completeness::Complete,
        );
        self.doc.append_child(parent, id)?;
        Ok(id)
    }

    /// Serialized form of the element whose start was just read
    fn capture(&mut self, start: &StartElement) -> Result<Bytes> {
        let parent = self.assembler.current();
        let Some(source) = self.source.as_mut() else {
            return Err(OmError::structural(parent, "token source released"));
        };
        if let Some(raw) = source.skip_subtree()? {
            return Ok(raw);
        }

        // No skip-ahead: re-encode the events
        let mut sink = XmlWriterSink::new(Vec::new());
        sink.write_event(&XmlEvent::StartElement(start.clone()))?;
        let mut depth = 1usize;
        while depth > 0 {
            let event = match source.next_event()? {
                Some(XmlEvent::EndDocument) | None => {
                    return Err(OmError::structural(
                        parent,
                        format!("input ends inside <{}>", start.name),
                    ));
                }
                Some(XmlEvent::StartDocument { .. }) => continue,
                Some(event) => event,
            };
            match &event {
                XmlEvent::StartElement(_) => depth += 1,
                XmlEvent::EndElement(_) => depth -= 1,
                _ => {}
            }
            sink.write_event(&event)?;
        }
        Ok(Bytes::from(sink.into_inner()))
    }

    // ========================================================================
    // Binary references
    // ========================================================================

    /// Replace an `xop:Include` by the binary content it references
    ///
    /// `end` is the event read after the start tag; it must close the element.
    fn include(&mut self, start: &StartElement, parent: NodeId, end: Option<XmlEvent>) -> Result<NodeId> {
        let href = match start.attributes.as_slice() {
            [attr] if attr.name.prefix.is_none() && attr.name.local == "href" => attr.value.clone(),
            _ => {
                return Err(OmError::structural(
                    Some(parent),
                    "xop:Include must carry exactly one href attribute",
                ))
            }
        };
        match end {
            Some(XmlEvent::EndElement(end)) if end == start.name => {}
            _ => {
                return Err(OmError::structural(Some(parent), "xop:Include must be empty"));
            }
        }

        let content_id = decode_cid(&href).map_err(|message| OmError::structural(Some(parent), message))?;
        let blob = match self.attachments.as_mut() {
            Some(resolver) => resolver.resolve(&content_id)?,
            None => None,
        };
        let Some(blob) = blob else {
            return Err(OmError::DanglingReference { content_id });
        };
        trace!(content_id = %content_id, bytes = blob.len(), "binary reference resolved");

        let binary = BinaryText::new(blob).with_content_id(&content_id);
        let id = self.doc.create(
            NodeData::Text(TextContent::Binary(binary)),
            Completeness::Complete,
        );
        self.doc.append_child(parent, id)?;
        Ok(id)
    }

    // ========================================================================
    // Expansion
    // ========================================================================

    /// Read the data source of an opaque element into the tree
    ///
    /// Does nothing for ordinary or already expanded elements. If reading
    /// fails the element stays opaque.
    pub fn expand(&mut self, id: NodeId) -> Result<()> {
        self.check()?;
        let reader = match self.doc.element(id).map(|e| &e.body) {
            Some(ElementBody::Sourced(SourcedState::Opaque(ds))) => ds.reader()?,
            Some(_) => return Ok(()),
            None => {
                self.doc.get(id)?;
                return Err(OmError::InvalidArgument(format!("node {} is not an element", id)));
            }
        };

        let marks = self
            .doc
            .element(id)
            .map(|e| (e.attributes.len(), e.namespaces.len()))
            .unwrap_or_default();
        if let Err(err) = self.expand_from(id, reader) {
            self.rollback(id, marks)?;
            return Err(err);
        }

        let element = self.doc.element_mut(id)?;
        element.body = match std::mem::replace(&mut element.body, ElementBody::Ordinary) {
            ElementBody::Sourced(SourcedState::Opaque(ds)) => ElementBody::Sourced(SourcedState::Expanded(ds)),
            other => other,
        };
        debug!(node = %id, "sourced element expanded");
        Ok(())
    }

    fn expand_from(&mut self, id: NodeId, mut reader: Box<dyn TokenSource>) -> Result<()> {
        let expected = self.doc.name(id).cloned().unwrap_or_default();
        let resolver = NamespaceResolver::with_bindings(self.doc.in_scope_namespaces(id));
        let mut asm = Assembler::new(id, resolver);
        let mut started = false;

        while let Some(event) = reader.next_event()? {
            match event {
                XmlEvent::StartElement(start) if !started => {
                    let name = asm.enter(&start)?;
                    if name != expected {
                        return Err(OmError::structural(
                            Some(id),
                            format!("data source holds {} instead of {}", name, expected),
                        ));
                    }
                    asm.apply_start(&mut self.doc, id, &start)?;
                    asm.push(id, start.name);
                    started = true;
                }
                XmlEvent::StartElement(start) => {
                    let name = asm.enter(&start)?;
                    if self.attachments.is_some() && name.is(ns::XOP_INCLUDE, "Include") {
                        let end = reader.next_event()?;
                        asm.leave();
                        self.include(&start, asm.parent(), end)?;
                        continue;
                    }
                    let child = self.doc.create(
                        NodeData::Element(ElementData::new(name)),
                        Completeness::Incomplete,
                    );
                    self.doc.append_child(asm.parent(), child)?;
                    asm.apply_start(&mut self.doc, child, &start)?;
                    asm.push(child, start.name);
                }
                XmlEvent::EndElement(name) if started => {
                    if asm.close(&mut self.doc, &name)? == id {
                        return Ok(());
                    }
                }
                // Anything around the content element is dropped
                _ if !started || asm.depth() == 0 => {}
                XmlEvent::Characters(text) => {
                    asm.append_leaf(&mut self.doc, NodeData::Text(TextContent::Chars(text)))?;
                }
                XmlEvent::CData(text) => {
                    asm.append_leaf(&mut self.doc, NodeData::CData(text))?;
                }
                XmlEvent::Comment(text) => {
                    asm.append_leaf(&mut self.doc, NodeData::Comment(text))?;
                }
                XmlEvent::ProcessingInstruction { target, data } => {
                    asm.append_leaf(&mut self.doc, NodeData::ProcessingInstruction { target, data })?;
                }
                XmlEvent::EntityReference(name) => {
                    asm.append_leaf(&mut self.doc, NodeData::EntityReference(name))?;
                }
                XmlEvent::StartDocument { .. } | XmlEvent::EndDocument | XmlEvent::EndElement(_) => {}
            }
        }
        Err(OmError::structural(Some(id), "data source ends before its element is complete"))
    }

    /// Undo a failed expansion
    fn rollback(&mut self, id: NodeId, (attributes, namespaces): (usize, usize)) -> Result<()> {
        let children: Vec<NodeId> = self.doc.children(id).collect();
        for child in children {
            self.doc.remove(child)?;
        }
        let element = self.doc.element_mut(id)?;
        let owned: Vec<NodeId> = element
            .attributes
            .drain(attributes..)
            .chain(element.namespaces.drain(namespaces..))
            .collect();
        for node in owned {
            self.doc.remove(node)?;
        }
        Ok(())
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    fn expand_if_opaque(&mut self, id: NodeId) -> Result<()> {
        if self.doc.element(id).is_some_and(|e| e.is_opaque()) {
            self.expand(id)?;
        }
        Ok(())
    }

    /// Document element, pulling until its start tag has been read
    pub fn document_element(&mut self) -> Result<Option<NodeId>> {
        self.check()?;
        loop {
            if let Some(id) = self.doc.document_element() {
                return Ok(Some(id));
            }
            if self.next_node()?.is_none() {
                return Ok(None);
            }
        }
    }

    /// First child, expanding an opaque element first
    pub fn first_child(&mut self, id: NodeId) -> Result<Option<NodeId>> {
        self.check()?;
        self.expand_if_opaque(id)?;
        loop {
            if let Some(child) = self.doc.first_child(id) {
                return Ok(Some(child));
            }
            if self.doc.get(id)?.is_complete() || self.next_node()?.is_none() {
                return Ok(self.doc.first_child(id));
            }
        }
    }

    /// Next sibling, pulling until it appears or the parent completes
    pub fn next_sibling(&mut self, id: NodeId) -> Result<Option<NodeId>> {
        self.check()?;
        loop {
            if let Some(sibling) = self.doc.get(id)?.next_sibling() {
                return Ok(Some(sibling));
            }
            match self.doc.parent(id) {
                Some(parent) if !self.doc.is_complete(parent) => {}
                _ => return Ok(None),
            }
            if self.next_node()?.is_none() {
                return Ok(self.doc.next_sibling(id));
            }
        }
    }

    /// All children, expanding and materializing as needed
    pub fn children(&mut self, id: NodeId) -> Result<Vec<NodeId>> {
        self.check()?;
        self.expand_if_opaque(id)?;
        self.materialize_until(id)?;
        Ok(self.doc.children(id).collect())
    }

    /// Attributes of an element, expanding it first if it is opaque
    pub fn attributes(&mut self, id: NodeId) -> Result<Vec<(QName, String)>> {
        self.check()?;
        self.expand_if_opaque(id)?;
        Ok(self
            .doc
            .attributes(id)
            .into_iter()
            .map(|(name, value)| (name.clone(), value.to_string()))
            .collect())
    }

    /// Attribute value by namespace and local name, expanding an opaque element first
    pub fn attribute(&mut self, id: NodeId, namespace: Option<&str>, local: &str) -> Result<Option<String>> {
        self.check()?;
        self.expand_if_opaque(id)?;
        Ok(self.doc.attribute(id, namespace, local).map(str::to_string))
    }

    /// Namespace declarations of an element, expanding an opaque element first
    pub fn namespaces(&mut self, id: NodeId) -> Result<Vec<(Option<String>, String)>> {
        self.check()?;
        self.expand_if_opaque(id)?;
        Ok(self
            .doc
            .namespaces(id)
            .into_iter()
            .map(|(prefix, uri)| (prefix.map(str::to_string), uri.to_string()))
            .collect())
    }

    /// Materialize a subtree and unlink it from its parent
    pub fn detach(&mut self, id: NodeId) -> Result<()> {
        if id == self.doc.root() {
            return Err(OmError::InvalidArgument("cannot detach the document node".to_string()));
        }
        self.materialize_until(id)?;
        self.doc.detach(id)
    }

    /// Materialize a subtree and copy it into a new document
    pub fn copy_subtree(&mut self, id: NodeId) -> Result<Document> {
        self.materialize_until(id)?;
        self.doc.copy_subtree(id)
    }

    /// Materialize a subtree and write it to `sink`; opaque elements stay opaque
    pub fn serialize(&mut self, id: NodeId, sink: &mut dyn EventSink) -> Result<()> {
        self.materialize_until(id)?;
        serialize::serialize(&self.doc, id, sink)
    }

    /// Serialize a subtree to XML text
    pub fn to_xml(&mut self, id: NodeId) -> Result<Vec<u8>> {
        let mut sink = XmlWriterSink::new(Vec::new());
        self.serialize(id, &mut sink)?;
        Ok(sink.into_inner())
    }
}

impl fmt::Debug for DeferredBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredBuilder")
            .field("nodes", &self.doc.node_count())
            .field("flavor", &self.flavor)
            .field("done", &self.is_done())
            .field("poisoned", &self.poisoned.is_some())
            .finish()
    }
}

fn is_envelope(name: &QName) -> bool {
    name.is(ns::SOAP11_ENVELOPE, "Envelope") || name.is(ns::SOAP12_ENVELOPE, "Envelope")
}

/// Content ID named by a `cid:` URL
fn decode_cid(href: &str) -> std::result::Result<String, String> {
    let Some(encoded) = href.strip_prefix("cid:") else {
        return Err(format!("href '{}' is not a cid: URL", href));
    };
    if !encoded.is_ascii() {
        return Err(format!("href '{}' contains non-ASCII characters", href));
    }
    percent_decode_str(encoded)
        .decode_utf8()
        .map(|id| id.into_owned())
        .map_err(|e| format!("href '{}' does not decode to UTF-8: {}", href, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Blob;
    use crate::datasource::{DataSource, ReaderSource, XmlBytesSource};
    use crate::mime::AttachmentStore;
    use crate::reader::source::EventListSource;
    use crate::reader::events::RawName;
    use crate::writer::sink::EventRecorder;
    use std::io::Cursor;

    const DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<t:root xmlns:t="urn:test" a="1"><t:first>one</t:first><!-- note --><t:payload id="p"><t:inner>deep &amp; <b>bold</b></t:inner></t:payload><t:last/></t:root>"#;

    fn payload() -> QName {
        QName::new(Some("urn:test"), "payload")
    }

    #[test]
    fn test_incremental_navigation() {
        let mut builder = DeferredBuilder::from_bytes(DOC, TreeFlavor::Plain);
        let root = builder.document_element().unwrap().unwrap();
        assert!(!builder.document().is_complete(root));
        assert_eq!(builder.document().attribute(root, None, "a"), Some("1"));

        let first = builder.first_child(root).unwrap().unwrap();
        assert!(builder.document().name(first).unwrap().is("urn:test", "first"));
        // Nothing beyond the first child has been pulled
        assert!(builder.document().next_sibling(first).is_none());

        let comment = builder.next_sibling(first).unwrap().unwrap();
        assert_eq!(builder.document().kind(comment), Some(NodeKind::Comment));
        assert!(builder.document().is_complete(first));
    }

    #[test]
    fn test_build_all_round_trip() {
        let mut builder = DeferredBuilder::from_bytes(DOC, TreeFlavor::Plain);
        builder.build_all().unwrap();
        assert!(builder.is_done());
        let root = builder.root();
        let first = builder.to_xml(root).unwrap();

        let mut again = DeferredBuilder::from_bytes(first.clone(), TreeFlavor::Plain);
        let mut a = EventRecorder::new();
        let mut b = EventRecorder::new();
        builder.serialize(root, &mut a).unwrap();
        again.serialize(again.root(), &mut b).unwrap();
        assert_eq!(a.events(), b.events());
        assert_eq!(again.to_xml(again.root()).unwrap(), first);
    }

    #[test]
    fn test_substitution_keeps_original_bytes() {
        let mut builder = DeferredBuilder::from_bytes(DOC, TreeFlavor::Plain);
        builder.register_rule(payload(), 1, CaptureBytes);
        builder.build_all().unwrap();

        let root = builder.document().document_element().unwrap();
        let sourced = builder
            .document()
            .children(root)
            .find(|&c| builder.document().name(c) == Some(&payload()))
            .unwrap();
        let element = builder.document().element(sourced).unwrap();
        assert!(element.is_opaque());
        assert!(builder.document().is_complete(sourced));
        assert!(builder.document().first_child(sourced).is_none());

        let xml = String::from_utf8(builder.to_xml(builder.root()).unwrap()).unwrap();
        assert!(xml.contains(r#"<!-- note --><t:payload id="p"><t:inner>deep &amp; <b>bold</b></t:inner></t:payload><t:last"#));
        // Serialization never expands
        assert!(builder.document().element(sourced).unwrap().is_opaque());

        // On its own the element declares the prefix it inherits
        let alone = builder.to_xml(sourced).unwrap();
        assert!(builder.document().element(sourced).unwrap().is_opaque());
        let mut rebuilt = DeferredBuilder::from_bytes(alone, TreeFlavor::Plain);
        rebuilt.build_all().unwrap();
        let top = rebuilt.document().document_element().unwrap();
        assert_eq!(rebuilt.document().name(top), Some(&payload()));
        assert_eq!(rebuilt.document().attribute(top, None, "id"), Some("p"));
    }

    #[test]
    fn test_copied_opaque_element_declares_namespaces() {
        let mut builder = DeferredBuilder::from_bytes(DOC, TreeFlavor::Plain);
        builder.register_rule(payload(), 1, CaptureBytes);
        builder.build_all().unwrap();
        let root = builder.document().document_element().unwrap();
        let sourced = builder.document().children(root).nth(2).unwrap();

        let copy = builder.copy_subtree(sourced).unwrap();
        let copied_id = copy.document_element().unwrap();
        assert!(copy.element(copied_id).unwrap().is_opaque());

        let mut copied = DeferredBuilder::from_document(copy);
        let xml = copied.to_xml(copied.root()).unwrap();
        assert!(String::from_utf8(xml.clone()).unwrap().contains(r#"xmlns:t="urn:test""#));

        let mut rebuilt = DeferredBuilder::from_bytes(xml, TreeFlavor::Plain);
        rebuilt.build_all().unwrap();
        let top = rebuilt.document().document_element().unwrap();
        assert_eq!(rebuilt.document().name(top), Some(&payload()));
        let inner = rebuilt.document().first_child(top).unwrap();
        assert_eq!(rebuilt.document().text_content(inner), "deep & bold");
    }

    #[test]
    fn test_attribute_access_expands_opaque_element() {
        let mut builder = DeferredBuilder::from_bytes(DOC, TreeFlavor::Plain);
        builder.register_rule(payload(), 1, CaptureBytes);
        builder.build_all().unwrap();
        let root = builder.document().document_element().unwrap();
        let sourced = builder.document().children(root).nth(2).unwrap();

        assert_eq!(builder.document().attribute(sourced, None, "id"), None);
        assert_eq!(builder.attribute(sourced, None, "id").unwrap().as_deref(), Some("p"));
        assert!(!builder.document().element(sourced).unwrap().is_opaque());
        assert_eq!(builder.attributes(sourced).unwrap(), vec![(QName::local("id"), "p".to_string())]);
        assert!(builder.namespaces(sourced).unwrap().is_empty());
        assert_eq!(
            builder.namespaces(root).unwrap(),
            vec![(Some("t".to_string()), "urn:test".to_string())]
        );
    }

    #[test]
    fn test_rule_depth_limit() {
        let mut builder = DeferredBuilder::from_bytes(DOC, TreeFlavor::Plain);
        builder.register_rule(QName::new(Some("urn:test"), "inner"), 1, CaptureBytes);
        builder.build_all().unwrap();
        // inner is at depth 2 and stays ordinary
        let root = builder.document().document_element().unwrap();
        let payload_id = builder.document().children(root).nth(2).unwrap();
        let inner = builder.document().first_child(payload_id).unwrap();
        assert!(!builder.document().element(inner).unwrap().is_sourced());
    }

    #[test]
    fn test_substitution_without_skip_support() {
        let events = vec![
            XmlEvent::start_document(),
            XmlEvent::StartElement(StartElement::new("r")),
            XmlEvent::StartElement(StartElement::new("p").with_attribute("k", "v")),
            XmlEvent::Characters("x".to_string()),
            XmlEvent::EndElement(RawName::parse("p")),
            XmlEvent::EndElement(RawName::parse("r")),
            XmlEvent::EndDocument,
        ];
        let mut builder = DeferredBuilder::new(EventListSource::new(events), TreeFlavor::Plain);
        builder.register_rule(QName::local("p"), 1, CaptureBytes);
        let root = builder.document_element().unwrap().unwrap();
        let p = builder.first_child(root).unwrap().unwrap();
        assert!(builder.document().element(p).unwrap().is_opaque());
        assert_eq!(builder.to_xml(p).unwrap(), b"<p k=\"v\">x</p>");
    }

    #[test]
    fn test_expansion_on_child_access() {
        let mut builder = DeferredBuilder::from_bytes(DOC, TreeFlavor::Plain);
        builder.register_rule(payload(), 1, CaptureBytes);
        let root = builder.document_element().unwrap().unwrap();
        let children = builder.children(root).unwrap();
        let sourced = children[2];

        let inner = builder.first_child(sourced).unwrap().unwrap();
        assert!(builder.document().name(inner).unwrap().is("urn:test", "inner"));
        assert_eq!(builder.document().attribute(sourced, None, "id"), Some("p"));
        assert!(matches!(
            builder.document().element(sourced).unwrap().body,
            ElementBody::Sourced(SourcedState::Expanded(_))
        ));
        assert_eq!(builder.document().text_content(inner), "deep & bold");
        assert!(builder.document().is_complete(inner));
    }

    #[test]
    fn test_expansion_inherits_namespaces() {
        let mut doc = Document::new();
        let root = doc.create(
            NodeData::Element(ElementData::new(QName::new(Some("urn:a"), "root").with_prefix(Some("a")))),
            Completeness::Complete,
        );
        doc.append_child(doc.root(), root).unwrap();
        doc.add_namespace(root, Some("a"), "urn:a").unwrap();
        let source: Box<dyn DataSource> = Box::new(XmlBytesSource::new(&b"<a:item><a:sub/></a:item>"[..]));
        let item = doc.create(
            NodeData::Element(ElementData::sourced(QName::new(Some("urn:a"), "item"), source)),
            Completeness::Complete,
        );
        doc.append_child(root, item).unwrap();

        let mut builder = DeferredBuilder::from_document(doc);
        let sub = builder.first_child(item).unwrap().unwrap();
        assert!(builder.document().name(sub).unwrap().is("urn:a", "sub"));
    }

    #[test]
    fn test_consumed_source_stays_opaque() {
        let mut doc = Document::new();
        let source: Box<dyn DataSource> = Box::new(ReaderSource::new(Cursor::new(b"<item>x</item>".to_vec())));
        let item = doc.create(
            NodeData::Element(ElementData::sourced(QName::local("item"), source)),
            Completeness::Complete,
        );
        doc.append_child(doc.root(), item).unwrap();

        // Serialization consumes the destructive source
        let mut sink = XmlWriterSink::new(Vec::new());
        serialize(&doc, item, &mut sink).unwrap();
        assert_eq!(sink.into_inner(), b"<item>x</item>");

        let mut builder = DeferredBuilder::from_document(doc);
        assert!(matches!(builder.first_child(item), Err(OmError::ContentAlreadyConsumed)));
        assert!(builder.document().element(item).unwrap().is_opaque());
    }

    #[test]
    fn test_mismatched_end_tag_poisons() {
        let mut builder = DeferredBuilder::from_bytes("<a><b></c></a>", TreeFlavor::Plain);
        let err = builder.build_all().unwrap_err();
        assert!(matches!(err, OmError::Structural { node: Some(_), .. }), "{:?}", err);
        assert!(matches!(builder.next_node(), Err(OmError::Structural { .. })));
        assert!(matches!(builder.document_element(), Err(OmError::Structural { .. })));
    }

    #[test]
    fn test_premature_end() {
        let mut builder = DeferredBuilder::from_bytes("<a><b>", TreeFlavor::Plain);
        assert!(matches!(builder.build_all(), Err(OmError::Structural { .. })));
    }

    #[test]
    fn test_unexpected_end_tag() {
        let mut builder = DeferredBuilder::from_bytes("<a/></b>", TreeFlavor::Plain);
        assert!(builder.build_all().unwrap_err().is_fatal());
    }

    #[test]
    fn test_unbound_prefix() {
        let mut builder = DeferredBuilder::from_bytes("<x:a/>", TreeFlavor::Plain);
        assert!(matches!(builder.build_all(), Err(OmError::Structural { .. })));
    }

    #[test]
    fn test_text_outside_root() {
        let mut builder = DeferredBuilder::from_bytes("<a/>junk", TreeFlavor::Plain);
        assert!(matches!(builder.build_all(), Err(OmError::Structural { .. })));

        let mut builder = DeferredBuilder::from_bytes("\n<a/>\n", TreeFlavor::Plain);
        builder.build_all().unwrap();
    }

    #[test]
    fn test_two_document_elements() {
        let mut builder = DeferredBuilder::from_bytes("<a/><b/>", TreeFlavor::Plain);
        assert!(matches!(builder.build_all(), Err(OmError::Structural { .. })));
    }

    const ENVELOPE: &str = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Header/><s:Body><m:op xmlns:m="urn:m"><m:arg>1</m:arg></m:op><m:second xmlns:m="urn:m"/></s:Body></s:Envelope>"#;

    #[test]
    fn test_soap_flavor_requires_envelope() {
        let mut builder = DeferredBuilder::from_bytes("<a/>", TreeFlavor::Soap);
        assert!(matches!(builder.build_all(), Err(OmError::Structural { .. })));

        let mut builder = DeferredBuilder::from_bytes(ENVELOPE, TreeFlavor::Soap);
        builder.build_all().unwrap();
    }

    #[test]
    fn test_payload_rule() {
        let mut builder = DeferredBuilder::from_bytes(ENVELOPE, TreeFlavor::Soap);
        builder.register_payload_rule(CaptureBytes);
        builder.build_all().unwrap();

        let doc = builder.document();
        let envelope = doc.document_element().unwrap();
        let body = doc.children(envelope).nth(1).unwrap();
        let mut payloads = doc.children(body);
        let op = payloads.next().unwrap();
        let second = payloads.next().unwrap();
        assert!(doc.element(op).unwrap().is_opaque());
        assert!(!doc.element(second).unwrap().is_sourced());

        let xml = String::from_utf8(builder.to_xml(builder.root()).unwrap()).unwrap();
        assert!(xml.contains(r#"<s:Body><m:op xmlns:m="urn:m"><m:arg>1</m:arg></m:op>"#));
        let alone = String::from_utf8(builder.to_xml(op).unwrap()).unwrap();
        assert!(alone.contains(r#"xmlns:s="http://schemas.xmlsoap.org/soap/envelope/""#));
    }

    #[test]
    fn test_detach_and_copy() {
        let mut builder = DeferredBuilder::from_bytes(DOC, TreeFlavor::Plain);
        let root = builder.document_element().unwrap().unwrap();
        let first = builder.first_child(root).unwrap().unwrap();

        let copy = builder.copy_subtree(first).unwrap();
        let copied = copy.document_element().unwrap();
        assert_eq!(copy.lookup_namespace(copied, Some("t")).as_deref(), Some("urn:test"));
        assert_eq!(copy.text_content(copied), "one");

        builder.detach(first).unwrap();
        assert!(builder.document().contains(first));
        assert!(builder.document().parent(first).is_none());
        builder.build_all().unwrap();
        let remaining = builder.children(root).unwrap();
        assert_eq!(remaining.len(), 3);
    }

    #[test]
    fn test_close_leaves_partial_tree() {
        let mut builder = DeferredBuilder::from_bytes(DOC, TreeFlavor::Plain);
        let root = builder.document_element().unwrap().unwrap();
        builder.close();
        assert!(builder.is_done());
        assert!(builder.next_node().unwrap().is_none());
        assert!(!builder.document().is_complete(root));
    }

    #[test]
    fn test_xop_include_resolved() {
        let xml = r#"<doc xmlns:xop="http://www.w3.org/2004/08/xop/include"><data><xop:Include href="cid:part%201@example.org"/></data></doc>"#;
        let mut attachments = HashMap::new();
        attachments.insert("part 1@example.org".to_string(), Blob::from_slice(b"\x00\x01binary"));

        let mut builder = DeferredBuilder::from_bytes(xml, TreeFlavor::Plain);
        builder.set_attachment_resolver(attachments);
        builder.build_all().unwrap();

        let doc = builder.document();
        let data = doc.first_child(doc.document_element().unwrap()).unwrap();
        let text = doc.first_child(data).unwrap();
        match doc.text(text) {
            Some(TextContent::Binary(b)) => {
                assert_eq!(b.blob.to_vec(), b"\x00\x01binary");
                assert_eq!(b.content_id.as_deref(), Some("part 1@example.org"));
            }
            other => panic!("expected binary text, got {:?}", other),
        }
    }

    #[test]
    fn test_include_inside_substituted_subtree() {
        let xml = r#"<doc xmlns:xop="http://www.w3.org/2004/08/xop/include"><data><xop:Include href="cid:a"/></data></doc>"#;
        let mut attachments = HashMap::new();
        attachments.insert("a".to_string(), Blob::from_slice(b"bin"));
        let mut builder = DeferredBuilder::from_bytes(xml, TreeFlavor::Plain);
        builder.set_attachment_resolver(attachments);
        builder.register_rule(QName::local("data"), 1, CaptureBytes);

        let root = builder.document_element().unwrap().unwrap();
        let data = builder.first_child(root).unwrap().unwrap();
        assert!(builder.document().element(data).unwrap().is_opaque());

        let text = builder.first_child(data).unwrap().unwrap();
        match builder.document().text(text) {
            Some(TextContent::Binary(b)) => {
                assert_eq!(b.blob.to_vec(), b"bin");
                assert_eq!(b.content_id.as_deref(), Some("a"));
            }
            other => panic!("expected binary text, got {:?}", other),
        }
        assert!(builder.document().next_sibling(text).is_none());
    }

    #[test]
    fn test_dangling_reference_inside_substituted_subtree() {
        let xml = r#"<doc xmlns:xop="http://www.w3.org/2004/08/xop/include"><data><xop:Include href="cid:gone"/></data></doc>"#;
        let mut builder = DeferredBuilder::from_bytes(xml, TreeFlavor::Plain);
        builder.set_attachment_resolver(HashMap::<String, Blob>::new());
        builder.register_rule(QName::local("data"), 1, CaptureBytes);
        builder.build_all().unwrap();

        let root = builder.document().document_element().unwrap();
        let data = builder.document().first_child(root).unwrap();
        assert!(matches!(builder.first_child(data), Err(OmError::DanglingReference { .. })));
        // Failed expansion is rolled back; the rest of the tree stays usable
        assert!(builder.document().element(data).unwrap().is_opaque());
        assert!(builder.document().first_child(data).is_none());
        assert_eq!(builder.children(root).unwrap(), vec![data]);
    }

    #[test]
    fn test_resolver_failure_repeats_with_same_type() {
        let xml = r#"<doc xmlns:xop="http://www.w3.org/2004/08/xop/include"><xop:Include href="cid:a"/></doc>"#;
        let container = b"--b\r\nContent-ID: <a>\r\n\r\ntruncated".to_vec();
        let store = AttachmentStore::new(Cursor::new(container), "b", None).unwrap();
        let mut builder = DeferredBuilder::from_bytes(xml, TreeFlavor::Plain);
        builder.set_attachment_resolver(store);

        assert!(matches!(builder.build_all(), Err(OmError::MalformedContainer(_))));
        assert!(matches!(builder.next_node(), Err(OmError::MalformedContainer(_))));
        assert!(matches!(builder.document_element(), Err(OmError::MalformedContainer(_))));
    }

    #[test]
    fn test_dangling_reference() {
        let xml = r#"<doc xmlns:xop="http://www.w3.org/2004/08/xop/include"><xop:Include href="cid:missing"/></doc>"#;
        let mut builder = DeferredBuilder::from_bytes(xml, TreeFlavor::Plain);
        builder.set_attachment_resolver(HashMap::<String, Blob>::new());
        let err = builder.build_all().unwrap_err();
        assert!(matches!(err, OmError::DanglingReference { ref content_id } if content_id == "missing"));
    }

    #[test]
    fn test_include_must_be_empty() {
        let xml = r#"<doc xmlns:xop="http://www.w3.org/2004/08/xop/include"><xop:Include href="cid:a">x</xop:Include></doc>"#;
        let mut attachments = HashMap::new();
        attachments.insert("a".to_string(), Blob::from_slice(b"a"));
        let mut builder = DeferredBuilder::from_bytes(xml, TreeFlavor::Plain);
        builder.set_attachment_resolver(attachments);
        assert!(matches!(builder.build_all(), Err(OmError::Structural { .. })));
    }

    #[test]
    fn test_include_extra_attribute_rejected() {
        let xml = r#"<doc xmlns:xop="http://www.w3.org/2004/08/xop/include"><xop:Include href="cid:a" other="1"/></doc>"#;
        let mut builder = DeferredBuilder::from_bytes(xml, TreeFlavor::Plain);
        builder.set_attachment_resolver(HashMap::<String, Blob>::new());
        assert!(matches!(builder.build_all(), Err(OmError::Structural { .. })));
    }

    #[test]
    fn test_include_without_resolver_is_plain_element() {
        let xml = r#"<doc xmlns:xop="http://www.w3.org/2004/08/xop/include"><xop:Include href="cid:a"/></doc>"#;
        let mut builder = DeferredBuilder::from_bytes(xml, TreeFlavor::Plain);
        builder.build_all().unwrap();
        let doc = builder.document();
        let include = doc.first_child(doc.document_element().unwrap()).unwrap();
        assert_eq!(doc.kind(include), Some(NodeKind::Element));
    }

    #[test]
    fn test_decode_cid() {
        assert_eq!(decode_cid("cid:a%40b").unwrap(), "a@b");
        assert!(decode_cid("http://x").is_err());
        assert!(decode_cid("cid:é").is_err());
    }
}
