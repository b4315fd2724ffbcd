//! XML Writer Module
//!
//! Push-side counterpart of the reader: sinks that accept the event
//! vocabulary, raw pass-through bytes and binary text.

pub mod sink;
pub mod xml;

pub use sink::{EventRecorder, EventSink};
pub use xml::XmlWriterSink;
