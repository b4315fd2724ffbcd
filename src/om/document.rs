//! Document - Arena-based tree storage
//!
//! Every node of one tree lives in a single arena:
//! - slots are reused after removal, with a generation bump
//! - children are linked first/last/prev/next, parents are plain handles
//! - attributes and namespace declarations are arena nodes owned by their
//!   element but kept out of the child chain

use super::node::{
    Completeness, ElementBody, ElementData, Node, NodeData, NodeId, NodeKind, QName, SourcedState,
    TextContent,
};
use crate::error::{OmError, Result};

/// XML declaration recorded from the token stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Declaration {
    pub version: Option<String>,
    pub encoding: Option<String>,
    pub standalone: Option<bool>,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// A tree stored in arena format
#[derive(Debug)]
pub struct Document {
    slots: Vec<Slot>,
    /// Freed slot indices available for reuse
    free: Vec<u32>,
    root: NodeId,
    declaration: Declaration,
}

impl Document {
    /// Create a document holding only an incomplete document node
    pub fn new() -> Self {
        let mut doc = Document {
            slots: Vec::with_capacity(64),
            free: Vec::new(),
            root: NodeId::new(0, 0),
            declaration: Declaration::default(),
        };
        doc.root = doc.create(NodeData::Document, Completeness::Incomplete);
        doc
    }

    /// The document node
    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn declaration(&self) -> &Declaration {
        &self.declaration
    }

    pub fn set_declaration(&mut self, declaration: Declaration) {
        self.declaration = declaration;
    }

    /// Allocate an unlinked node
    pub fn create(&mut self, data: NodeData, completeness: Completeness) -> NodeId {
        let node = Node::new(data, completeness);
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            NodeId::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            NodeId::new(index, 0)
        }
    }

    /// Get a node, or None if the handle is stale
    #[inline]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.node.as_ref())
    }

    #[inline]
    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.node.as_mut())
    }

    /// Get a node, failing on a stale handle
    pub fn get(&self, id: NodeId) -> Result<&Node> {
        self.node(id).ok_or(OmError::StaleNode(id))
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.node_mut(id).ok_or(OmError::StaleNode(id))
    }

    #[inline]
    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// Number of live nodes, attributes and namespace declarations included
    pub fn node_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.node(id).map(Node::kind)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.parent)
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.first_child)
    }

    pub fn last_child(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.last_child)
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.next_sibling)
    }

    pub fn prev_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.prev_sibling)
    }

    /// Iterate over the children already attached to a node
    pub fn children(&self, id: NodeId) -> ChildIter<'_> {
        ChildIter {
            doc: self,
            next: self.first_child(id),
        }
    }

    pub fn is_complete(&self, id: NodeId) -> bool {
        self.node(id).map(Node::is_complete).unwrap_or(false)
    }

    pub(crate) fn set_complete(&mut self, id: NodeId) -> Result<()> {
        self.get_mut(id)?.completeness = Completeness::Complete;
        Ok(())
    }

    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        self.node(id).and_then(Node::as_element)
    }

    pub(crate) fn element_mut(&mut self, id: NodeId) -> Result<&mut ElementData> {
        self.get_mut(id)?
            .as_element_mut()
            .ok_or_else(|| OmError::InvalidArgument(format!("node {} is not an element", id)))
    }

    pub fn name(&self, id: NodeId) -> Option<&QName> {
        self.node(id).and_then(Node::name)
    }

    pub fn text(&self, id: NodeId) -> Option<&TextContent> {
        self.node(id).and_then(Node::text)
    }

    /// First element child of the document node
    pub fn document_element(&self) -> Option<NodeId> {
        self.children(self.root).find(|&c| self.kind(c) == Some(NodeKind::Element))
    }

    /// Element depth; the document element is at depth 0
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut current = self.parent(id);
        while let Some(p) = current {
            if self.kind(p) == Some(NodeKind::Element) {
                depth += 1;
            }
            current = self.parent(p);
        }
        depth
    }

    // ========================================================================
    // Linking
    // ========================================================================

    /// Append `child` as the last child of `parent`
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.get(child)?;
        let last = self.get(parent)?.last_child;

        if let Some(last_id) = last {
            self.get_mut(last_id)?.next_sibling = Some(child);
        } else {
            self.get_mut(parent)?.first_child = Some(child);
        }

        let node = self.get_mut(child)?;
        node.parent = Some(parent);
        node.prev_sibling = last;
        node.next_sibling = None;

        self.get_mut(parent)?.last_child = Some(child);
        Ok(())
    }

    /// Unlink a node from its parent and siblings; the subtree stays in the arena
    pub fn detach(&mut self, id: NodeId) -> Result<()> {
        let (parent, prev, next) = {
            let node = self.get(id)?;
            (node.parent, node.prev_sibling, node.next_sibling)
        };
        if let Some(prev_id) = prev {
            self.get_mut(prev_id)?.next_sibling = next;
        } else if let Some(parent_id) = parent {
            self.get_mut(parent_id)?.first_child = next;
        }
        if let Some(next_id) = next {
            self.get_mut(next_id)?.prev_sibling = prev;
        } else if let Some(parent_id) = parent {
            self.get_mut(parent_id)?.last_child = prev;
        }

        let node = self.get_mut(id)?;
        node.parent = None;
        node.prev_sibling = None;
        node.next_sibling = None;
        Ok(())
    }

    /// Detach a subtree and free its slots; outstanding handles become stale
    pub fn remove(&mut self, id: NodeId) -> Result<()> {
        if id == self.root {
            return Err(OmError::InvalidArgument("cannot remove the document node".to_string()));
        }
        self.detach(id)?;
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            let node = self.get(current)?;
            pending.extend(self.children(current));
            if let Some(e) = node.as_element() {
                pending.extend(e.attributes.iter().copied());
                pending.extend(e.namespaces.iter().copied());
            }
            let slot = &mut self.slots[current.index()];
            slot.node = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(current.index() as u32);
        }
        Ok(())
    }

    // ========================================================================
    // Attributes and namespaces
    // ========================================================================

    /// Add an attribute node to an element
    pub fn add_attribute(&mut self, element: NodeId, name: QName, value: &str) -> Result<NodeId> {
        self.element_mut(element)?;
        let attr = self.create(
            NodeData::Attribute {
                name,
                value: value.to_string(),
            },
            Completeness::Complete,
        );
        self.get_mut(attr)?.parent = Some(element);
        self.element_mut(element)?.attributes.push(attr);
        Ok(attr)
    }

    /// Declare a namespace on an element, replacing an existing binding of the same prefix
    pub fn add_namespace(&mut self, element: NodeId, prefix: Option<&str>, uri: &str) -> Result<NodeId> {
        self.element_mut(element)?;
        let existing = self.element(element).and_then(|e| {
            e.namespaces
                .iter()
                .copied()
                .find(|&ns| self.namespace_decl(ns).map(|(p, _)| p) == Some(prefix))
        });
        if let Some(ns) = existing {
            if let NodeData::NamespaceDeclaration { uri: old, .. } = &mut self.get_mut(ns)?.data {
                *old = uri.to_string();
            }
            return Ok(ns);
        }

        let decl = self.create(
            NodeData::NamespaceDeclaration {
                prefix: prefix.map(str::to_string),
                uri: uri.to_string(),
            },
            Completeness::Complete,
        );
        self.get_mut(decl)?.parent = Some(element);
        self.element_mut(element)?.namespaces.push(decl);
        Ok(decl)
    }

    fn namespace_decl(&self, id: NodeId) -> Option<(Option<&str>, &str)> {
        match &self.node(id)?.data {
            NodeData::NamespaceDeclaration { prefix, uri } => Some((prefix.as_deref(), uri.as_str())),
            _ => None,
        }
    }

    /// Attributes of an element as (name, value) pairs
    ///
    /// An opaque sourced element has none until it is expanded; see
    /// `DeferredBuilder::attributes`.
    pub fn attributes(&self, element: NodeId) -> Vec<(&QName, &str)> {
        let Some(e) = self.element(element) else {
            return Vec::new();
        };
        e.attributes
            .iter()
            .filter_map(|&a| match &self.node(a)?.data {
                NodeData::Attribute { name, value } => Some((name, value.as_str())),
                _ => None,
            })
            .collect()
    }

    /// Attribute value by namespace and local name
    pub fn attribute(&self, element: NodeId, namespace: Option<&str>, local: &str) -> Option<&str> {
        self.attributes(element)
            .into_iter()
            .find(|(name, _)| name.local == local && name.namespace.as_deref() == namespace)
            .map(|(_, value)| value)
    }

    /// Namespace declarations made on an element
    pub fn namespaces(&self, element: NodeId) -> Vec<(Option<&str>, &str)> {
        let Some(e) = self.element(element) else {
            return Vec::new();
        };
        e.namespaces.iter().filter_map(|&ns| self.namespace_decl(ns)).collect()
    }

    /// Every binding in scope at `id`, outermost first, nearest declaration winning
    pub fn in_scope_namespaces(&self, id: NodeId) -> Vec<(Option<String>, String)> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current {
            chain.push(node);
            current = self.parent(node);
        }

        let mut out: Vec<(Option<String>, String)> = Vec::new();
        for &node in chain.iter().rev() {
            for (prefix, uri) in self.namespaces(node) {
                out.retain(|(p, _)| p.as_deref() != prefix);
                if !uri.is_empty() {
                    out.push((prefix.map(str::to_string), uri.to_string()));
                }
            }
        }
        out
    }

    /// Resolve a prefix in the scope of `id`
    pub fn lookup_namespace(&self, id: NodeId, prefix: Option<&str>) -> Option<String> {
        self.in_scope_namespaces(id)
            .into_iter()
            .find(|(p, _)| p.as_deref() == prefix)
            .map(|(_, uri)| uri)
    }

    /// Concatenated character content of all descendant text nodes
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match self.node(id).map(Node::data) {
            Some(NodeData::Text(t)) => out.push_str(&t.as_text()),
            Some(NodeData::CData(s)) => out.push_str(s),
            _ => {
                for child in self.children(id) {
                    self.collect_text(child, out);
                }
            }
        }
    }

    // ========================================================================
    // Copying
    // ========================================================================

    /// Deep copy a subtree into a new complete document
    ///
    /// Namespaces in scope at `id` are declared on the copy. Opaque sourced
    /// elements are copied through their data source.
    pub fn copy_subtree(&self, id: NodeId) -> Result<Document> {
        let mut target = Document::new();
        let root = target.root();
        let copy = self.copy_into(id, &mut target, root)?;
        if target.kind(copy) == Some(NodeKind::Element) {
            for (prefix, uri) in self.in_scope_namespaces(id) {
                let declared = target.namespaces(copy).iter().any(|(p, _)| *p == prefix.as_deref());
                if !declared {
                    target.add_namespace(copy, prefix.as_deref(), &uri)?;
                }
            }
        }
        target.declaration = self.declaration.clone();
        target.set_complete(root)?;
        Ok(target)
    }

    fn copy_into(&self, id: NodeId, target: &mut Document, parent: NodeId) -> Result<NodeId> {
        let node = self.get(id)?;
        let data = match &node.data {
            NodeData::Document => {
                for child in self.children(id) {
                    self.copy_into(child, target, parent)?;
                }
                return Ok(parent);
            }
            NodeData::Element(e) => {
                let body = match &e.body {
                    ElementBody::Sourced(SourcedState::Opaque(ds)) => {
                        ElementBody::Sourced(SourcedState::Opaque(ds.copy()?))
                    }
                    _ => ElementBody::Ordinary,
                };
                NodeData::Element(ElementData {
                    name: e.name.clone(),
                    attributes: Vec::new(),
                    namespaces: Vec::new(),
                    body,
                })
            }
            NodeData::Attribute { name, value } => NodeData::Attribute {
                name: name.clone(),
                value: value.clone(),
            },
            NodeData::Text(t) => NodeData::Text(t.clone()),
            NodeData::CData(s) => NodeData::CData(s.clone()),
            NodeData::Comment(s) => NodeData::Comment(s.clone()),
            NodeData::ProcessingInstruction { target: t, data } => NodeData::ProcessingInstruction {
                target: t.clone(),
                data: data.clone(),
            },
            NodeData::EntityReference(name) => NodeData::EntityReference(name.clone()),
            NodeData::NamespaceDeclaration { prefix, uri } => NodeData::NamespaceDeclaration {
                prefix: prefix.clone(),
                uri: uri.clone(),
            },
        };

        let copy = target.create(data, Completeness::Complete);
        target.append_child(parent, copy)?;

        if let Some(e) = node.as_element() {
            for (prefix, uri) in self.namespaces(id) {
                target.add_namespace(copy, prefix, uri)?;
            }
            for (name, value) in self.attributes(id) {
                target.add_attribute(copy, name.clone(), value)?;
            }
            if !e.is_opaque() {
                for child in self.children(id) {
                    self.copy_into(child, target, copy)?;
                }
            }
        }
        Ok(copy)
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over the attached children of a node
pub struct ChildIter<'d> {
    doc: &'d Document,
    next: Option<NodeId>,
}

impl Iterator for ChildIter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = self.doc.next_sibling(current);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(doc: &mut Document, parent: NodeId, local: &str) -> NodeId {
        let id = doc.create(
            NodeData::Element(ElementData::new(QName::local(local))),
            Completeness::Complete,
        );
        doc.append_child(parent, id).unwrap();
        id
    }

    #[test]
    fn test_append_and_iterate() {
        let mut doc = Document::new();
        let top = doc.root();
        let root = element(&mut doc, top, "root");
        let a = element(&mut doc, root, "a");
        let b = element(&mut doc, root, "b");

        assert_eq!(doc.document_element(), Some(root));
        assert_eq!(doc.children(root).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(doc.prev_sibling(b), Some(a));
        assert_eq!(doc.depth(root), 0);
        assert_eq!(doc.depth(b), 1);
    }

    #[test]
    fn test_detach_middle_child() {
        let mut doc = Document::new();
        let top = doc.root();
        let root = element(&mut doc, top, "root");
        let a = element(&mut doc, root, "a");
        let b = element(&mut doc, root, "b");
        let c = element(&mut doc, root, "c");

        doc.detach(b).unwrap();
        assert_eq!(doc.children(root).collect::<Vec<_>>(), vec![a, c]);
        assert!(doc.parent(b).is_none());
        assert!(doc.contains(b));
    }

    #[test]
    fn test_remove_makes_handles_stale() {
        let mut doc = Document::new();
        let top = doc.root();
        let root = element(&mut doc, top, "root");
        let a = element(&mut doc, root, "a");
        let inner = element(&mut doc, a, "inner");

        doc.remove(a).unwrap();
        assert!(matches!(doc.get(a), Err(OmError::StaleNode(_))));
        assert!(!doc.contains(inner));

        let reused = element(&mut doc, root, "b");
        assert!(reused.index() == a.index() || reused.index() == inner.index());
        assert!(!doc.contains(a));
    }

    #[test]
    fn test_in_scope_namespaces() {
        let mut doc = Document::new();
        let top = doc.root();
        let root = element(&mut doc, top, "root");
        doc.add_namespace(root, Some("a"), "urn:a").unwrap();
        doc.add_namespace(root, None, "urn:default").unwrap();
        let child = element(&mut doc, root, "child");
        doc.add_namespace(child, Some("a"), "urn:a2").unwrap();

        let scope = doc.in_scope_namespaces(child);
        assert_eq!(scope.len(), 2);
        assert_eq!(doc.lookup_namespace(child, Some("a")).as_deref(), Some("urn:a2"));
        assert_eq!(doc.lookup_namespace(child, None).as_deref(), Some("urn:default"));
    }

    #[test]
    fn test_attributes() {
        let mut doc = Document::new();
        let top = doc.root();
        let root = element(&mut doc, top, "root");
        doc.add_attribute(root, QName::local("id"), "42").unwrap();
        doc.add_attribute(root, QName::new(Some("urn:x"), "kind"), "k").unwrap();

        assert_eq!(doc.attribute(root, None, "id"), Some("42"));
        assert_eq!(doc.attribute(root, Some("urn:x"), "kind"), Some("k"));
        assert_eq!(doc.attributes(root).len(), 2);
        assert!(doc.children(root).next().is_none());
    }

    #[test]
    fn test_copy_subtree() {
        let mut doc = Document::new();
        let top = doc.root();
        let root = element(&mut doc, top, "root");
        doc.add_namespace(root, Some("p"), "urn:p").unwrap();
        let item = element(&mut doc, root, "item");
        let text = doc.create(
            NodeData::Text(TextContent::Chars("hello".to_string())),
            Completeness::Complete,
        );
        doc.append_child(item, text).unwrap();

        let copy = doc.copy_subtree(item).unwrap();
        let copied = copy.document_element().unwrap();
        assert_eq!(copy.name(copied), Some(&QName::local("item")));
        assert_eq!(copy.text_content(copied), "hello");
        assert_eq!(copy.namespaces(copied), vec![(Some("p"), "urn:p")]);
        assert!(copy.is_complete(copy.root()));
    }
}
