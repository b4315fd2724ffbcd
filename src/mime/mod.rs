//! MIME Module - Multipart containers
//!
//! - headers: part header blocks and `Content-Type` parsing
//! - multipart: forward-only delimiter scanner
//! - store: lazy, content-ID addressable attachment store
//! - writer: multipart emitter

pub mod headers;
pub(crate) mod multipart;
pub mod store;
pub mod writer;

pub use headers::{normalize_content_id, ContentType, PartHeaders};
pub use store::{AttachmentStore, Part, PartState, PartStream};
pub use writer::{MultipartWriter, PartSpec, PartWriter, TransferEncoding};
