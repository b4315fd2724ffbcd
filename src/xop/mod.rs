//! XOP Module - Binary optimization
//!
//! - policy: inline or externalize, per binary text node
//! - encoder: event sink turning binary text into `xop:Include` references
//! - resolver: attachment lookup used by the builder on the read path
//! - mtom: complete MTOM messages, both directions

pub mod encoder;
pub mod mtom;
pub mod policy;
pub mod resolver;

pub use encoder::{cid_url, XopAttachment, XopEncodingSink};
pub use mtom::{write_mtom, MtomMessage, MtomOutput, XOP_MEDIA_TYPE};
pub use policy::{OptimizationPolicy, Representation};
pub use resolver::AttachmentResolver;
