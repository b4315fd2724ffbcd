//! Attachment lookup for binary references

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Read;
use std::rc::Rc;

use crate::buffer::Blob;
use crate::error::{OmError, Result};
use crate::mime::AttachmentStore;

/// Looks up attachment content by content ID
pub trait AttachmentResolver {
    /// Content of the attachment, or None if there is no such attachment
    fn resolve(&mut self, content_id: &str) -> Result<Option<Blob>>;
}

impl<R: Read> AttachmentResolver for AttachmentStore<R> {
    fn resolve(&mut self, content_id: &str) -> Result<Option<Blob>> {
        self.get_part(content_id)
    }
}

impl AttachmentResolver for HashMap<String, Blob> {
    fn resolve(&mut self, content_id: &str) -> Result<Option<Blob>> {
        Ok(self.get(content_id).cloned())
    }
}

/// Shared resolver, e.g. a store also used by the caller
impl<T: AttachmentResolver + ?Sized> AttachmentResolver for Rc<RefCell<T>> {
    fn resolve(&mut self, content_id: &str) -> Result<Option<Blob>> {
        self.try_borrow_mut()
            .map_err(|_| OmError::InvalidArgument("attachment resolver is already in use".to_string()))?
            .resolve(content_id)
    }
}
