//! Buffer Module - Append-only block storage
//!
//! - ChunkedBuffer: growing sequence of fixed-size blocks, readable while written
//! - Blob: sealed, immutable view over the same blocks

pub mod blob;
pub mod chunked;

pub use blob::Blob;
pub use chunked::{ChunkedBuffer, ChunkedReader};
