//! Programmatic push source

use super::DataSource;
use crate::error::Result;
use crate::reader::source::{EventListSource, TokenSource};
use crate::writer::sink::{EventRecorder, EventSink};

/// Non-destructive source whose content is produced by a closure
///
/// The closure must write exactly one element. Pulling runs the closure into
/// an [`EventRecorder`] and replays the result.
pub struct WriterSource<F>
where
    F: Fn(&mut dyn EventSink) -> Result<()>,
{
    write: F,
}

impl<F> WriterSource<F>
where
    F: Fn(&mut dyn EventSink) -> Result<()>,
{
    pub fn new(write: F) -> Self {
        WriterSource { write }
    }
}

impl<F> DataSource for WriterSource<F>
where
    F: Fn(&mut dyn EventSink) -> Result<()>,
{
    fn is_destructive(&self) -> bool {
        false
    }

    fn reader(&self) -> Result<Box<dyn TokenSource>> {
        let mut recorder = EventRecorder::new();
        (self.write)(&mut recorder)?;
        Ok(Box::new(EventListSource::new(recorder.into_events())))
    }

    fn push_to(&self, sink: &mut dyn EventSink) -> Result<bool> {
        (self.write)(sink)?;
        Ok(true)
    }
}
