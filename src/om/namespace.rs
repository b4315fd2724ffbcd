//! Namespace Resolution
//!
//! Stack-based namespace resolver used while a token stream is applied to a
//! tree. The `xml` and `xmlns` prefixes are pre-bound and cannot be
//! redeclared.

/// Well-known namespace URIs
pub mod ns {
    pub const XML: &str = "http://www.w3.org/XML/1998/namespace";
    pub const XMLNS: &str = "http://www.w3.org/2000/xmlns/";
    pub const SOAP11_ENVELOPE: &str = "http://schemas.xmlsoap.org/soap/envelope/";
    pub const SOAP12_ENVELOPE: &str = "http://www.w3.org/2003/05/soap-envelope";
    pub const XOP_INCLUDE: &str = "http://www.w3.org/2004/08/xop/include";
}

/// Namespace binding (prefix -> URI); the default namespace has no prefix
#[derive(Debug, Clone)]
struct NsBinding {
    prefix: Option<String>,
    uri: String,
    depth: u16,
}

/// Stack-based namespace resolver
#[derive(Debug, Clone)]
pub struct NamespaceResolver {
    bindings: Vec<NsBinding>,
    depth: u16,
}

impl NamespaceResolver {
    /// Create a new namespace resolver with pre-declared xml and xmlns namespaces
    pub fn new() -> Self {
        let mut resolver = NamespaceResolver {
            bindings: Vec::with_capacity(16),
            depth: 0,
        };
        resolver.bindings.push(NsBinding {
            prefix: Some("xml".to_string()),
            uri: ns::XML.to_string(),
            depth: 0,
        });
        resolver.bindings.push(NsBinding {
            prefix: Some("xmlns".to_string()),
            uri: ns::XMLNS.to_string(),
            depth: 0,
        });
        resolver
    }

    /// Create a resolver whose outermost scope already holds `bindings`
    pub fn with_bindings<I>(bindings: I) -> Self
    where
        I: IntoIterator<Item = (Option<String>, String)>,
    {
        let mut resolver = Self::new();
        for (prefix, uri) in bindings {
            resolver.declare(prefix.as_deref(), &uri);
        }
        resolver
    }

    /// Enter a new element scope
    pub fn push_scope(&mut self) {
        self.depth += 1;
    }

    /// Leave an element scope, removing any bindings declared in it
    pub fn pop_scope(&mut self) {
        while let Some(binding) = self.bindings.last() {
            if binding.depth < self.depth {
                break;
            }
            self.bindings.pop();
        }
        self.depth = self.depth.saturating_sub(1);
    }

    /// Declare a namespace binding for the current scope
    pub fn declare(&mut self, prefix: Option<&str>, uri: &str) {
        if matches!(prefix, Some("xml") | Some("xmlns")) {
            return;
        }
        self.bindings.push(NsBinding {
            prefix: prefix.map(str::to_string),
            uri: uri.to_string(),
            depth: self.depth,
        });
    }

    /// Resolve a prefix (None for the default namespace) to a URI
    ///
    /// An empty URI undeclares the default namespace and resolves to None.
    pub fn resolve(&self, prefix: Option<&str>) -> Option<&str> {
        self.bindings
            .iter()
            .rev()
            .find(|b| b.prefix.as_deref() == prefix)
            .map(|b| b.uri.as_str())
            .filter(|uri| !uri.is_empty())
    }

    /// Resolve the default namespace
    pub fn resolve_default(&self) -> Option<&str> {
        self.resolve(None)
    }

    /// Get current depth
    pub fn depth(&self) -> u16 {
        self.depth
    }

    /// Active bindings, most recent per prefix, excluding the pre-bound ones
    pub fn active_bindings(&self) -> Vec<(Option<String>, String)> {
        let mut seen: Vec<Option<&str>> = Vec::new();
        let mut out = Vec::new();
        for b in self.bindings.iter().skip(2).rev() {
            let prefix = b.prefix.as_deref();
            if seen.contains(&prefix) {
                continue;
            }
            seen.push(prefix);
            if !b.uri.is_empty() {
                out.push((b.prefix.clone(), b.uri.clone()));
            }
        }
        out.reverse();
        out
    }
}

impl Default for NamespaceResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_namespaces() {
        let resolver = NamespaceResolver::new();
        assert_eq!(resolver.resolve(Some("xml")), Some(ns::XML));
        assert!(resolver.resolve_default().is_none());
    }

    #[test]
    fn test_declare_and_resolve() {
        let mut resolver = NamespaceResolver::new();
        resolver.push_scope();
        resolver.declare(Some("svg"), "http://www.w3.org/2000/svg");
        assert_eq!(resolver.resolve(Some("svg")), Some("http://www.w3.org/2000/svg"));
    }

    #[test]
    fn test_scope_pop() {
        let mut resolver = NamespaceResolver::new();
        resolver.push_scope();
        resolver.declare(Some("foo"), "http://example.com/foo");
        assert_eq!(resolver.resolve(Some("foo")), Some("http://example.com/foo"));

        resolver.pop_scope();
        assert_eq!(resolver.resolve(Some("foo")), None);
    }

    #[test]
    fn test_shadow_binding() {
        let mut resolver = NamespaceResolver::new();
        resolver.push_scope();
        resolver.declare(Some("ns"), "http://example.com/ns1");

        resolver.push_scope();
        resolver.declare(Some("ns"), "http://example.com/ns2");
        assert_eq!(resolver.resolve(Some("ns")), Some("http://example.com/ns2"));

        resolver.pop_scope();
        assert_eq!(resolver.resolve(Some("ns")), Some("http://example.com/ns1"));
    }

    #[test]
    fn test_undeclare_default() {
        let mut resolver = NamespaceResolver::new();
        resolver.push_scope();
        resolver.declare(None, "urn:outer");
        resolver.push_scope();
        resolver.declare(None, "");
        assert!(resolver.resolve_default().is_none());
        assert!(resolver.active_bindings().is_empty());
    }

    #[test]
    fn test_seeded_bindings() {
        let resolver = NamespaceResolver::with_bindings(vec![
            (Some("a".to_string()), "urn:a".to_string()),
            (None, "urn:default".to_string()),
        ]);
        assert_eq!(resolver.resolve(Some("a")), Some("urn:a"));
        assert_eq!(resolver.active_bindings().len(), 2);
    }
}
