//! quick-xml Event Sink
//!
//! Serializes events to bytes. Raw pass-through and binary text bypass the
//! event layer and go straight to the underlying writer; binary text is
//! base64 encoded while streaming.

use std::io::Write;

use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesPI, BytesStart, BytesText, Event};
use quick_xml::Writer;

use super::sink::EventSink;
use crate::codec::Base64Encoder;
use crate::error::Result;
use crate::om::BinaryText;
use crate::reader::events::XmlEvent;

/// Event sink producing XML text
pub struct XmlWriterSink<W: Write> {
    writer: Writer<W>,
}

impl<W: Write> XmlWriterSink<W> {
    pub fn new(inner: W) -> Self {
        XmlWriterSink {
            writer: Writer::new(inner),
        }
    }

    pub fn get_mut(&mut self) -> &mut W {
        self.writer.get_mut()
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write> EventSink for XmlWriterSink<W> {
    fn write_event(&mut self, event: &XmlEvent) -> Result<()> {
        match event {
            XmlEvent::StartDocument {
                version,
                encoding,
                standalone,
            } => {
                // Nothing to write when the input had no declaration
                if let Some(version) = version {
                    let standalone = standalone.map(|s| if s { "yes" } else { "no" });
                    let decl = BytesDecl::new(version, encoding.as_deref(), standalone);
                    self.writer.write_event(Event::Decl(decl))?;
                }
            }
            XmlEvent::EndDocument => {}
            XmlEvent::StartElement(start) => {
                let mut tag = BytesStart::new(start.name.qualified());
                for ns in &start.namespaces {
                    match &ns.prefix {
                        Some(prefix) => {
                            let key = format!("xmlns:{}", prefix);
                            tag.push_attribute((key.as_str(), ns.uri.as_str()));
                        }
                        None => tag.push_attribute(("xmlns", ns.uri.as_str())),
                    }
                }
                for attr in &start.attributes {
                    let key = attr.name.qualified();
                    tag.push_attribute((key.as_str(), attr.value.as_str()));
                }
                self.writer.write_event(Event::Start(tag))?;
            }
            XmlEvent::EndElement(name) => {
                self.writer.write_event(Event::End(BytesEnd::new(name.qualified())))?;
            }
            XmlEvent::Characters(text) => {
                self.writer.write_event(Event::Text(BytesText::new(text)))?;
            }
            XmlEvent::CData(text) => {
                self.writer.write_event(Event::CData(BytesCData::new(text.as_str())))?;
            }
            XmlEvent::Comment(text) => {
                self.writer.write_event(Event::Comment(BytesText::from_escaped(text.as_str())))?;
            }
            XmlEvent::ProcessingInstruction { target, data } => {
                let content = if data.is_empty() {
                    target.clone()
                } else {
                    format!("{} {}", target, data)
                };
                self.writer.write_event(Event::PI(BytesPI::new(content)))?;
            }
            XmlEvent::EntityReference(name) => {
                write!(self.writer.get_mut(), "&{};", name)?;
            }
        }
        Ok(())
    }

    fn write_raw(&mut self, xml: &[u8]) -> Result<bool> {
        self.writer.get_mut().write_all(xml)?;
        Ok(true)
    }

    fn write_binary(&mut self, binary: &BinaryText) -> Result<()> {
        let mut encoder = Base64Encoder::new(self.writer.get_mut());
        binary.blob.write_to(&mut encoder)?;
        encoder.finish()?;
        Ok(())
    }
}
