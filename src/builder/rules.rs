//! Substitution rules
//!
//! A rule turns a subtree the builder skipped into the data source of a
//! sourced element.

use bytes::Bytes;

use crate::datasource::{DataSource, XmlBytesSource};
use crate::error::Result;
use crate::om::QName;

/// A subtree handed to a substitution rule
#[derive(Debug, Clone)]
pub struct CapturedSubtree {
    pub name: QName,
    /// Serialized element, start tag to end tag
    pub raw: Bytes,
    /// Bindings inherited from the ancestors, outermost first
    pub namespaces: Vec<(Option<String>, String)>,
}

/// Produces the data source that replaces a skipped subtree
pub trait SubstitutionRule {
    fn substitute(&mut self, captured: CapturedSubtree) -> Result<Box<dyn DataSource>>;
}

impl<F> SubstitutionRule for F
where
    F: FnMut(CapturedSubtree) -> Result<Box<dyn DataSource>>,
{
    fn substitute(&mut self, captured: CapturedSubtree) -> Result<Box<dyn DataSource>> {
        self(captured)
    }
}

/// Keeps the captured bytes in an [`XmlBytesSource`]
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureBytes;

impl SubstitutionRule for CaptureBytes {
    fn substitute(&mut self, captured: CapturedSubtree) -> Result<Box<dyn DataSource>> {
        Ok(Box::new(XmlBytesSource::with_namespaces(
            captured.raw,
            captured.namespaces,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn captured() -> CapturedSubtree {
        CapturedSubtree {
            name: QName::new(Some("urn:test"), "payload"),
            raw: Bytes::from_static(b"<t:payload>x</t:payload>"),
            namespaces: vec![(Some("t".to_string()), "urn:test".to_string())],
        }
    }

    #[test]
    fn test_capture_bytes_keeps_raw_form() {
        let ds = CaptureBytes.substitute(captured()).unwrap();
        assert!(!ds.is_destructive());
        assert!(ds.copy().is_ok());
    }

    #[test]
    fn test_closure_rule() {
        let mut seen = Vec::new();
        let mut rule = |c: CapturedSubtree| -> Result<Box<dyn DataSource>> {
            seen.push(c.name.to_string());
            Ok(Box::new(XmlBytesSource::new(c.raw)))
        };
        rule.substitute(captured()).unwrap();
        assert_eq!(seen, vec!["{urn:test}payload"]);
    }
}
