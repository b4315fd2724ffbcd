//! Optimization policy
//!
//! Decides per binary text node whether it is written inline as base64 or
//! moved into an attachment.

use serde::{Deserialize, Serialize};

use crate::om::BinaryText;

/// Wire form of one binary text node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Representation {
    /// Base64 character data in the XML
    Inline,
    /// `xop:Include` reference to a separate part
    Externalize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationPolicy {
    /// Content shorter than this many bytes stays inline
    pub inline_threshold: usize,
    /// Media types eligible for externalization; empty means any
    pub content_type_allowlist: Vec<String>,
    /// Keep content inline when its optimize flag is off
    pub respect_optimize_hint: bool,
    /// Overrides every other setting
    pub force: Option<Representation>,
}

impl Default for OptimizationPolicy {
    fn default() -> Self {
        Self {
            inline_threshold: 0,
            content_type_allowlist: Vec::new(),
            respect_optimize_hint: true,
            force: None,
        }
    }
}

impl OptimizationPolicy {
    /// Write every binary node inline
    pub fn inline_all() -> Self {
        Self {
            force: Some(Representation::Inline),
            ..Self::default()
        }
    }

    /// Externalize every binary node
    pub fn externalize_all() -> Self {
        Self {
            force: Some(Representation::Externalize),
            ..Self::default()
        }
    }

    pub fn decide(&self, binary: &BinaryText) -> Representation {
        if let Some(forced) = self.force {
            return forced;
        }
        if self.respect_optimize_hint && !binary.optimize {
            return Representation::Inline;
        }
        if binary.blob.len() < self.inline_threshold {
            return Representation::Inline;
        }
        if !self.content_type_allowlist.is_empty() {
            let media_type = binary
                .content_type
                .as_deref()
                .map(|ct| ct.split(';').next().unwrap_or(ct).trim());
            let allowed = media_type.is_some_and(|mt| {
                self.content_type_allowlist
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(mt))
            });
            if !allowed {
                return Representation::Inline;
            }
        }
        Representation::Externalize
    }
}
