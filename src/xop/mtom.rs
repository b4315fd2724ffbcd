//! MTOM messages
//!
//! A serialized tree in the root part of a `multipart/related` container,
//! with externalized binary content in the parts that follow.

use std::cell::RefCell;
use std::io::{Read, Write};
use std::rc::Rc;

use tracing::debug;

use super::encoder::XopEncodingSink;
use crate::buffer::{Blob, ChunkedBuffer};
use crate::builder::{serialize, DeferredBuilder};
use crate::config::OmConfig;
use crate::error::{OmError, Result};
use crate::mime::{AttachmentStore, ContentType, MultipartWriter, PartSpec, TransferEncoding};
use crate::om::{ns, Document, NodeId};
use crate::reader::xml::XmlReaderSource;
use crate::uid::IdGenerator;
use crate::writer::xml::XmlWriterSink;

/// Media type of the root part
pub const XOP_MEDIA_TYPE: &str = "application/xop+xml";

const DEFAULT_ATTACHMENT_TYPE: &str = "application/octet-stream";

/// Result of [`write_mtom`]
#[derive(Debug)]
pub struct MtomOutput<W> {
    pub out: W,
    /// `Content-Type` of the whole message
    pub content_type: String,
    /// Number of externalized attachments
    pub attachments: usize,
}

/// Serialize the subtree at `id` as an MTOM message
pub fn write_mtom<W: Write>(doc: &Document, id: NodeId, out: W, config: &OmConfig) -> Result<MtomOutput<W>> {
    let mut ids = IdGenerator::from_config(&config.ids);
    let boundary = ids.generate_boundary();
    let root_id = ids.generate_id();

    let mut root = ChunkedBuffer::with_block_size(config.buffer.block_size);
    let attachments = {
        let mut sink = XopEncodingSink::new(XmlWriterSink::new(&mut root), config.optimization.clone(), ids);
        serialize(doc, id, &mut sink)?;
        let (_, attachments, _) = sink.into_parts();
        attachments
    };

    let start_info = if is_soap12(doc, id) {
        "application/soap+xml"
    } else {
        "text/xml"
    };
    let root_type = ContentType::new(XOP_MEDIA_TYPE)
        .with_parameter("charset", "UTF-8")
        .with_parameter("type", start_info);
    let content_type = ContentType::new("multipart/related")
        .with_parameter("boundary", &boundary)
        .with_parameter("type", XOP_MEDIA_TYPE)
        .with_parameter("start", &format!("<{}>", root_id))
        .with_parameter("start-info", start_info);

    let mut writer = MultipartWriter::new(out, &boundary)?;
    writer.write_part(
        &PartSpec::new(root_id, root_type.to_string()).with_transfer_encoding(TransferEncoding::Binary),
        &root.seal(),
    )?;
    for attachment in &attachments {
        let media_type = attachment
            .content_type
            .clone()
            .unwrap_or_else(|| DEFAULT_ATTACHMENT_TYPE.to_string());
        writer.write_part(
            &PartSpec::new(attachment.content_id.clone(), media_type),
            &attachment.blob,
        )?;
    }
    debug!(attachments = attachments.len(), boundary = %boundary, "MTOM message written");

    Ok(MtomOutput {
        out: writer.complete()?,
        content_type: content_type.to_string(),
        attachments: attachments.len(),
    })
}

/// Check if the subtree is a SOAP 1.2 envelope
fn is_soap12(doc: &Document, id: NodeId) -> bool {
    let element = if id == doc.root() { doc.document_element() } else { Some(id) };
    element
        .and_then(|e| doc.name(e))
        .is_some_and(|name| name.is(ns::SOAP12_ENVELOPE, "Envelope"))
}

/// Incoming MTOM message: a builder over the root part, resolving binary
/// references against the rest of the container
pub struct MtomMessage<R: Read + 'static> {
    builder: DeferredBuilder,
    store: Rc<RefCell<AttachmentStore<R>>>,
}

impl<R: Read + 'static> MtomMessage<R> {
    /// Open a message given the container's `Content-Type`
    pub fn parse(reader: R, content_type: &str, config: &OmConfig) -> Result<Self> {
        let mut store = AttachmentStore::from_content_type(reader, content_type)?.with_config(config);
        if let Some(kind) = store.content_type().and_then(|ct| ct.parameter("type")) {
            if !kind.eq_ignore_ascii_case(XOP_MEDIA_TYPE) {
                return Err(OmError::MalformedContainer(format!(
                    "root part type '{}' is not {}",
                    kind, XOP_MEDIA_TYPE
                )));
            }
        }

        let root = store.root_part()?;
        debug!(bytes = root.len(), root = ?store.root_content_id(), "MTOM root part read");
        let store = Rc::new(RefCell::new(store));
        let mut builder = DeferredBuilder::with_config(XmlReaderSource::from_bytes(root.to_bytes()), config);
        builder.set_attachment_resolver(Rc::clone(&store));
        Ok(MtomMessage { builder, store })
    }

    pub fn builder(&mut self) -> &mut DeferredBuilder {
        &mut self.builder
    }

    pub fn into_builder(self) -> DeferredBuilder {
        self.builder
    }

    /// Attachment by content ID, read directly from the container
    pub fn attachment(&self, content_id: &str) -> Result<Option<Blob>> {
        self.store
            .try_borrow_mut()
            .map_err(|_| OmError::InvalidArgument("attachment store is in use".to_string()))?
            .get_part(content_id)
    }

    /// Content IDs of every part, root included; reads the whole container
    pub fn content_ids(&self) -> Result<Vec<String>> {
        self.store
            .try_borrow_mut()
            .map_err(|_| OmError::InvalidArgument("attachment store is in use".to_string()))?
            .content_ids()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::config::TreeFlavor;
    use crate::om::{BinaryText, Completeness, ElementData, NodeData, QName, TextContent};
    use crate::xop::OptimizationPolicy;
    use std::io::Cursor;

    const PAYLOAD: &[u8] = b"\x89PNG\r\n\x1a\n--not-a-boundary\r\n\x00\xff";

    fn tree() -> Document {
        let mut doc = Document::new();
        let root = doc.create(
            NodeData::Element(ElementData::new(QName::new(Some("urn:img"), "image").with_prefix(Some("i")))),
            Completeness::Complete,
        );
        doc.append_child(doc.root(), root).unwrap();
        doc.add_namespace(root, Some("i"), "urn:img").unwrap();
        let text = doc.create(
            NodeData::Text(TextContent::Binary(
                BinaryText::new(Blob::from_slice(PAYLOAD)).with_content_type("image/png"),
            )),
            Completeness::Complete,
        );
        doc.append_child(root, text).unwrap();
        let done = doc.root();
        doc.set_complete(done).unwrap();
        doc
    }

    fn round_trip(policy: OptimizationPolicy) -> (DeferredBuilder, usize) {
        let mut config = OmConfig::default();
        config.optimization = policy;
        let doc = tree();
        let output = write_mtom(&doc, doc.root(), Vec::new(), &config).unwrap();

        let message = MtomMessage::parse(Cursor::new(output.out), &output.content_type, &config).unwrap();
        let mut builder = message.into_builder();
        builder.build_all().unwrap();
        (builder, output.attachments)
    }

    fn binary_content(builder: &DeferredBuilder) -> Vec<u8> {
        let doc = builder.document();
        let image = doc.document_element().unwrap();
        let children: Vec<NodeId> = doc.children(image).collect();
        assert_eq!(children.len(), 1);
        match doc.text(children[0]).unwrap() {
            TextContent::Binary(b) => b.blob.to_vec(),
            TextContent::Chars(s) => codec::decode(s).unwrap(),
        }
    }

    #[test]
    fn test_inline_and_externalized_decode_the_same() {
        let (inline, inline_parts) = round_trip(OptimizationPolicy::inline_all());
        let (external, external_parts) = round_trip(OptimizationPolicy::externalize_all());

        assert_eq!(inline_parts, 0);
        assert_eq!(external_parts, 1);
        assert_eq!(binary_content(&inline), PAYLOAD);
        assert_eq!(binary_content(&external), PAYLOAD);
    }

    #[test]
    fn test_externalized_part_keeps_content_type() {
        let config = OmConfig {
            optimization: OptimizationPolicy::externalize_all(),
            ..OmConfig::default()
        };
        let doc = tree();
        let output = write_mtom(&doc, doc.root(), Vec::new(), &config).unwrap();
        assert!(output.content_type.starts_with("multipart/related; boundary=MIMEBoundary_"));

        let mut store = AttachmentStore::from_content_type(Cursor::new(output.out), &output.content_type).unwrap();
        let root = store.root_part().unwrap();
        assert!(String::from_utf8(root.to_vec()).unwrap().contains("xop:Include"));
        let ids = store.content_ids().unwrap();
        assert_eq!(ids.len(), 2);
        let (headers, _) = store.part(&ids[1]).unwrap();
        assert_eq!(headers.content_type(), Some("image/png"));
    }

    #[test]
    fn test_message_attachment_lookup() {
        let config = OmConfig {
            optimization: OptimizationPolicy::externalize_all(),
            flavor: TreeFlavor::Plain,
            ..OmConfig::default()
        };
        let doc = tree();
        let output = write_mtom(&doc, doc.root(), Vec::new(), &config).unwrap();
        let message = MtomMessage::parse(Cursor::new(output.out), &output.content_type, &config).unwrap();
        let ids = message.content_ids().unwrap();
        assert_eq!(message.attachment(&ids[1]).unwrap().unwrap().to_vec(), PAYLOAD);
    }

    #[test]
    fn test_expanded_island_keeps_binary_reference() {
        let xml = r#"<doc xmlns:xop="http://www.w3.org/2004/08/xop/include"><data><xop:Include href="cid:a@x"/></data></doc>"#;
        let mut attachments = std::collections::HashMap::new();
        attachments.insert("a@x".to_string(), Blob::from_slice(PAYLOAD));
        let mut builder = DeferredBuilder::from_bytes(xml, TreeFlavor::Plain);
        builder.set_attachment_resolver(attachments);
        builder.register_rule(QName::local("data"), 1, crate::builder::CaptureBytes);
        builder.build_all().unwrap();
        let data = builder.document().first_child(builder.document().document_element().unwrap()).unwrap();
        builder.children(data).unwrap();

        let config = OmConfig {
            optimization: OptimizationPolicy::externalize_all(),
            ..OmConfig::default()
        };
        let output = write_mtom(builder.document(), builder.root(), Vec::new(), &config).unwrap();
        assert_eq!(output.attachments, 1);

        let message = MtomMessage::parse(Cursor::new(output.out), &output.content_type, &config).unwrap();
        let mut reread = message.into_builder();
        reread.build_all().unwrap();
        let doc = reread.document();
        let data = doc.first_child(doc.document_element().unwrap()).unwrap();
        match doc.text(doc.first_child(data).unwrap()) {
            Some(TextContent::Binary(b)) => assert_eq!(b.blob.to_vec(), PAYLOAD),
            other => panic!("expected binary text, got {:?}", other),
        }
    }

    #[test]
    fn test_wrong_root_type_rejected() {
        let data: &[u8] = b"--b\r\n\r\n<a/>\r\n--b--";
        let result = MtomMessage::parse(
            Cursor::new(data),
            "multipart/related; boundary=b; type=\"text/xml\"",
            &OmConfig::default(),
        );
        assert!(matches!(result, Err(OmError::MalformedContainer(_))));
    }
}
