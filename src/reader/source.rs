//! Token Sources
//!
//! The pull interface the tree builder consumes.

use std::collections::VecDeque;

use bytes::Bytes;

use super::events::XmlEvent;
use crate::error::Result;

/// Pull-based supplier of XML events
pub trait TokenSource {
    /// Next event, or None once the source is exhausted
    fn next_event(&mut self) -> Result<Option<XmlEvent>>;

    /// Skip the element whose start was just returned by `next_event`,
    /// returning its serialized form from `<` to the matching `>`.
    ///
    /// Returns `Ok(None)` without consuming anything when the source cannot
    /// skip ahead; the caller then pulls the events itself.
    fn skip_subtree(&mut self) -> Result<Option<Bytes>> {
        Ok(None)
    }
}

impl<T: TokenSource + ?Sized> TokenSource for Box<T> {
    fn next_event(&mut self) -> Result<Option<XmlEvent>> {
        (**self).next_event()
    }

    fn skip_subtree(&mut self) -> Result<Option<Bytes>> {
        (**self).skip_subtree()
    }
}

/// Replays a recorded event list
#[derive(Debug, Clone, Default)]
pub struct EventListSource {
    events: VecDeque<XmlEvent>,
}

impl EventListSource {
    pub fn new<I: IntoIterator<Item = XmlEvent>>(events: I) -> Self {
        EventListSource {
            events: events.into_iter().collect(),
        }
    }

    /// Events not yet returned
    pub fn remaining(&self) -> usize {
        self.events.len()
    }
}

impl TokenSource for EventListSource {
    fn next_event(&mut self) -> Result<Option<XmlEvent>> {
        Ok(self.events.pop_front())
    }
}
