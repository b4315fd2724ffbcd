//! Event Sinks

use crate::error::Result;
use crate::om::BinaryText;
use crate::reader::events::XmlEvent;

/// Receiver of serialization events
pub trait EventSink {
    fn write_event(&mut self, event: &XmlEvent) -> Result<()>;

    /// Write already serialized XML verbatim.
    ///
    /// Returns false when the sink only understands events; the caller must
    /// then replay the content as events.
    fn write_raw(&mut self, _xml: &[u8]) -> Result<bool> {
        Ok(false)
    }

    /// Write binary content; plain sinks receive it as base64 characters
    fn write_binary(&mut self, binary: &BinaryText) -> Result<()> {
        let text = crate::codec::encode(&binary.blob.to_bytes());
        self.write_event(&XmlEvent::Characters(text))
    }
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn write_event(&mut self, event: &XmlEvent) -> Result<()> {
        (**self).write_event(event)
    }

    fn write_raw(&mut self, xml: &[u8]) -> Result<bool> {
        (**self).write_raw(xml)
    }

    fn write_binary(&mut self, binary: &BinaryText) -> Result<()> {
        (**self).write_binary(binary)
    }
}

/// Sink that keeps every event it receives
#[derive(Debug, Default, Clone)]
pub struct EventRecorder {
    events: Vec<XmlEvent>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the recorded events as a slice
    pub fn events(&self) -> &[XmlEvent] {
        &self.events
    }

    /// Take the recorded events
    pub fn into_events(self) -> Vec<XmlEvent> {
        self.events
    }
}

impl EventSink for EventRecorder {
    fn write_event(&mut self, event: &XmlEvent) -> Result<()> {
        self.events.push(event.clone());
        Ok(())
    }
}
