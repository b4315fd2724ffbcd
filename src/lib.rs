//! streamom - Deferred XML object model with binary attachments
//!
//! Components:
//! A: Deferred tree builder with subtree substitution (builder, om)
//! B: Token sources and event sinks over quick-xml (reader, writer)
//! C: Pluggable content providers for sourced elements (datasource)
//! D: Lazy multipart attachment store and writer (mime)
//! E: XOP/MTOM binary optimization (xop)
//! F: Chunked buffers, base64 and identifiers (buffer, codec, uid)

pub mod buffer;
pub mod builder;
pub mod codec;
pub mod config;
pub mod datasource;
pub mod error;
pub mod mime;
pub mod om;
pub mod reader;
pub mod uid;
pub mod writer;
pub mod xop;

pub use buffer::{Blob, ChunkedBuffer};
pub use builder::{CaptureBytes, CapturedSubtree, DeferredBuilder, SubstitutionRule};
pub use config::{OmConfig, TreeFlavor};
pub use datasource::DataSource;
pub use error::{EncodingError, OmError, Result};
pub use mime::{AttachmentStore, MultipartWriter};
pub use om::{Document, NodeId, QName};
pub use reader::{TokenSource, XmlEvent, XmlReaderSource};
pub use uid::IdGenerator;
pub use writer::{EventSink, XmlWriterSink};
pub use xop::{write_mtom, AttachmentResolver, MtomMessage, OptimizationPolicy};
