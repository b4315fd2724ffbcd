//! Data Sources
//!
//! Pluggable providers of the content of a sourced element. A source can be
//! pulled (as a token stream) and optionally pushed into a sink; destructive
//! sources can be read only once.

pub mod xml_bytes;
pub mod reader;
pub mod writer;

pub use self::xml_bytes::XmlBytesSource;
pub use self::reader::ReaderSource;
pub use self::writer::WriterSource;

use crate::error::{OmError, Result};
use crate::reader::events::XmlEvent;
use crate::reader::source::TokenSource;
use crate::writer::sink::EventSink;

/// Content provider for a sourced element
///
/// The content is a single element: its start tag supplies the attributes
/// and namespace declarations of the sourced element.
pub trait DataSource {
    /// Check if reading consumes the content
    fn is_destructive(&self) -> bool;

    /// Open the content as a token stream
    fn reader(&self) -> Result<Box<dyn TokenSource>>;

    /// Write the content directly to `sink`.
    ///
    /// Returns false when the source has no push path; the caller then pulls
    /// from [`DataSource::reader`].
    fn push_to(&self, _sink: &mut dyn EventSink) -> Result<bool> {
        Ok(false)
    }

    /// Independent copy of the source
    fn copy(&self) -> Result<Box<dyn DataSource>> {
        Err(OmError::NotCopyable)
    }

    /// Bindings the content uses without declaring them
    fn namespaces(&self) -> &[(Option<String>, String)] {
        &[]
    }
}

/// Forward every event except the document boundaries from `source` to `sink`
pub fn pump_events(source: &mut dyn TokenSource, sink: &mut dyn EventSink) -> Result<()> {
    while let Some(event) = source.next_event()? {
        match event {
            XmlEvent::StartDocument { .. } | XmlEvent::EndDocument => {}
            other => sink.write_event(&other)?,
        }
    }
    Ok(())
}
