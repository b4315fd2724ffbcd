//! Event-to-node assembly
//!
//! Shared by the main build loop and by the expansion of sourced elements:
//! keeps the stack of open elements and the namespace scopes, and turns
//! start tags into resolved names, attributes and declarations.

use crate::error::{OmError, Result};
use crate::om::{Completeness, Document, NamespaceResolver, NodeData, NodeId, QName};
use crate::reader::events::{RawName, StartElement};

pub(crate) struct Assembler {
    /// Open elements, innermost last, with their lexical names
    open: Vec<(NodeId, RawName)>,
    resolver: NamespaceResolver,
    /// Parent of content outside every open element
    base: NodeId,
}

impl Assembler {
    pub(crate) fn new(base: NodeId, resolver: NamespaceResolver) -> Self {
        Assembler {
            open: Vec::with_capacity(32),
            resolver,
            base,
        }
    }

    /// Number of open elements
    #[inline]
    pub(crate) fn depth(&self) -> usize {
        self.open.len()
    }

    #[inline]
    pub(crate) fn current(&self) -> Option<NodeId> {
        self.open.last().map(|(id, _)| *id)
    }

    /// Node new content is appended to
    #[inline]
    pub(crate) fn parent(&self) -> NodeId {
        self.current().unwrap_or(self.base)
    }

    /// Open element `levels` above the innermost one
    pub(crate) fn ancestor(&self, levels: usize) -> Option<NodeId> {
        let len = self.open.len();
        if levels < len {
            Some(self.open[len - 1 - levels].0)
        } else {
            None
        }
    }

    /// Bindings in scope outside the element about to be entered
    pub(crate) fn bindings(&self) -> Vec<(Option<String>, String)> {
        self.resolver.active_bindings()
    }

    /// Push the scope of `start` and resolve its name
    ///
    /// On success the scope stays pushed until [`Assembler::close`] or
    /// [`Assembler::leave`].
    pub(crate) fn enter(&mut self, start: &StartElement) -> Result<QName> {
        self.resolver.push_scope();
        for decl in &start.namespaces {
            self.resolver.declare(decl.prefix.as_deref(), &decl.uri);
        }
        match self.resolve(&start.name, true) {
            Ok(name) => Ok(name),
            Err(e) => {
                self.resolver.pop_scope();
                Err(e)
            }
        }
    }

    /// Drop the scope of an entered element that was not opened
    pub(crate) fn leave(&mut self) {
        self.resolver.pop_scope();
    }

    fn resolve(&self, raw: &RawName, is_element: bool) -> Result<QName> {
        let namespace = match raw.prefix.as_deref() {
            Some(prefix) => Some(self.resolver.resolve(Some(prefix)).ok_or_else(|| {
                OmError::structural(
                    self.current(),
                    format!("unbound namespace prefix '{}' on {}", prefix, raw),
                )
            })?),
            // Unprefixed attributes are in no namespace
            None if is_element => self.resolver.resolve_default(),
            None => None,
        };
        Ok(QName::new(namespace, &raw.local).with_prefix(raw.prefix.as_deref()))
    }

    /// Record the declarations and attributes of `start` on `id`
    pub(crate) fn apply_start(&self, doc: &mut Document, id: NodeId, start: &StartElement) -> Result<()> {
        for decl in &start.namespaces {
            doc.add_namespace(id, decl.prefix.as_deref(), &decl.uri)?;
        }
        for attr in &start.attributes {
            let name = self.resolve(&attr.name, false)?;
            doc.add_attribute(id, name, &attr.value)?;
        }
        Ok(())
    }

    /// Make an entered element the innermost open element
    pub(crate) fn push(&mut self, id: NodeId, name: RawName) {
        self.open.push((id, name));
    }

    /// Close the innermost element, checking the end tag against its start
    pub(crate) fn close(&mut self, doc: &mut Document, name: &RawName) -> Result<NodeId> {
        let Some((id, open_name)) = self.open.pop() else {
            return Err(OmError::structural(
                Some(self.base),
                format!("unexpected end tag </{}>", name),
            ));
        };
        if open_name != *name {
            return Err(OmError::structural(
                Some(id),
                format!("<{}> closed by </{}>", open_name, name),
            ));
        }
        self.resolver.pop_scope();
        doc.set_complete(id)?;
        Ok(id)
    }

    /// Append a complete non-element node to the current parent
    pub(crate) fn append_leaf(&self, doc: &mut Document, data: NodeData) -> Result<NodeId> {
        let id = doc.create(data, Completeness::Complete);
        doc.append_child(self.parent(), id)?;
        Ok(id)
    }

    /// Lexical name of the innermost open element
    pub(crate) fn innermost_name(&self) -> Option<&RawName> {
        self.open.last().map(|(_, name)| name)
    }
}
