//! Tree serialization
//!
//! Walks a subtree and writes it to an event sink. Opaque sourced elements
//! are written through their data source, push path first.
//!
//! A subtree written without its ancestors declares the bindings it
//! inherits on its top element. An opaque element whose data source relies
//! on bindings the output lacks is written through the event path with the
//! missing declarations added to its start tag.

use crate::datasource::DataSource;
use crate::error::{OmError, Result};
use crate::om::{Document, ElementBody, NodeData, NodeId, QName, SourcedState, TextContent};
use crate::reader::events::{Attribute, NamespaceDecl, RawName, StartElement, XmlEvent};
use crate::writer::sink::EventSink;

type Bindings = Vec<(Option<String>, String)>;

/// Write the subtree at `id` to `sink`
///
/// The document node produces the document events around its children.
/// Only the part of the tree built so far is written.
pub fn serialize(doc: &Document, id: NodeId, sink: &mut dyn EventSink) -> Result<()> {
    write_node(doc, id, sink, true)
}

/// Bindings in scope above `id`
fn inherited(doc: &Document, id: NodeId) -> Bindings {
    match doc.parent(id) {
        Some(parent) => doc.in_scope_namespaces(parent),
        None => Vec::new(),
    }
}

/// Add `bindings` to `into`, replacing entries with the same prefix
fn overlay<'a>(into: &mut Bindings, bindings: impl IntoIterator<Item = (Option<&'a str>, &'a str)>) {
    for (prefix, uri) in bindings {
        into.retain(|(p, _)| p.as_deref() != prefix);
        into.push((prefix.map(str::to_string), uri.to_string()));
    }
}

fn write_node(doc: &Document, id: NodeId, sink: &mut dyn EventSink, top: bool) -> Result<()> {
    let node = doc.get(id)?;
    match node.data() {
        NodeData::Document => {
            let decl = doc.declaration();
            sink.write_event(&XmlEvent::StartDocument {
                version: decl.version.clone(),
                encoding: decl.encoding.clone(),
                standalone: decl.standalone,
            })?;
            for child in doc.children(id) {
                write_node(doc, child, sink, false)?;
            }
            sink.write_event(&XmlEvent::EndDocument)
        }
        NodeData::Element(e) => {
            if let ElementBody::Sourced(SourcedState::Opaque(ds)) = &e.body {
                return write_opaque(doc, id, &**ds, sink, top);
            }

            let mut namespaces: Vec<NamespaceDecl> = doc
                .namespaces(id)
                .into_iter()
                .map(|(prefix, uri)| NamespaceDecl::new(prefix, uri))
                .collect();
            if top {
                for (prefix, uri) in inherited(doc, id) {
                    if !namespaces.iter().any(|d| d.prefix == prefix) {
                        namespaces.push(NamespaceDecl::new(prefix.as_deref(), &uri));
                    }
                }
            }

            let name = raw_name(&e.name);
            let start = StartElement {
                name: name.clone(),
                attributes: doc
                    .attributes(id)
                    .into_iter()
                    .map(|(attr, value)| Attribute {
                        name: raw_name(attr),
                        value: value.to_string(),
                    })
                    .collect(),
                namespaces,
            };
            sink.write_event(&XmlEvent::StartElement(start))?;
            for child in doc.children(id) {
                write_node(doc, child, sink, false)?;
            }
            sink.write_event(&XmlEvent::EndElement(name))
        }
        NodeData::Text(TextContent::Chars(text)) => sink.write_event(&XmlEvent::Characters(text.clone())),
        NodeData::Text(TextContent::Binary(binary)) => sink.write_binary(binary),
        NodeData::CData(text) => sink.write_event(&XmlEvent::CData(text.clone())),
        NodeData::Comment(text) => sink.write_event(&XmlEvent::Comment(text.clone())),
        NodeData::ProcessingInstruction { target, data } => sink.write_event(&XmlEvent::ProcessingInstruction {
            target: target.clone(),
            data: data.clone(),
        }),
        NodeData::EntityReference(name) => sink.write_event(&XmlEvent::EntityReference(name.clone())),
        NodeData::Attribute { .. } | NodeData::NamespaceDeclaration { .. } => Err(OmError::InvalidArgument(
            format!("node {} cannot be serialized on its own", id),
        )),
    }
}

fn write_opaque(doc: &Document, id: NodeId, ds: &dyn DataSource, sink: &mut dyn EventSink, top: bool) -> Result<()> {
    let mut required = if top { inherited(doc, id) } else { Vec::new() };
    overlay(&mut required, ds.namespaces().iter().map(|(p, u)| (p.as_deref(), u.as_str())));
    overlay(&mut required, doc.namespaces(id));
    if !top {
        let declared = inherited(doc, id);
        required.retain(|binding| !declared.contains(binding));
    }

    if required.is_empty() && ds.push_to(sink)? {
        return Ok(());
    }

    let mut reader = ds.reader()?;
    let mut started = false;
    while let Some(event) = reader.next_event()? {
        match event {
            XmlEvent::StartDocument { .. } | XmlEvent::EndDocument => {}
            XmlEvent::StartElement(mut start) if !started => {
                for (prefix, uri) in &required {
                    if !start.namespaces.iter().any(|d| d.prefix == *prefix) {
                        start.namespaces.push(NamespaceDecl::new(prefix.as_deref(), uri));
                    }
                }
                started = true;
                sink.write_event(&XmlEvent::StartElement(start))?;
            }
            other => sink.write_event(&other)?,
        }
    }
    Ok(())
}

fn raw_name(name: &QName) -> RawName {
    RawName::new(name.prefix.as_deref(), &name.local)
}
