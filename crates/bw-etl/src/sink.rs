//! Terminal stages

use crate::Consuming;
use bw_core::BulkCopy;
use bw_io::BulkWriter;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

/// Receives everything that reaches the end of a pipeline
///
/// `write` is called once, on a blocking worker thread, and should drain
/// `items`. Returning early drops the input queue, which stops the upstream
/// stages without counting them as failed. `items` also ends when the
/// pipeline is cancelled; [`Consuming::cancellation_token`] tells the two
/// endings apart.
pub trait PipelineSink<T>: Send {
    fn write(&mut self, items: Consuming<'_, T>) -> anyhow::Result<()>;
}

impl<T, S: PipelineSink<T> + ?Sized> PipelineSink<T> for Box<S> {
    fn write(&mut self, items: Consuming<'_, T>) -> anyhow::Result<()> {
        (**self).write(items)
    }
}

impl<T, S> PipelineSink<T> for BulkWriter<T, S>
where
    T: Send + 'static,
    S: BulkCopy,
{
    fn write(&mut self, items: Consuming<'_, T>) -> anyhow::Result<()> {
        let cancel = items.cancellation_token();
        let rows = self.write_to_database_cancellable(items, move || cancel.is_cancelled())?;
        info!(rows, table = %self.destination_table(), "pipeline transfer complete");
        Ok(())
    }
}

/// Sink that keeps every item in memory
///
/// Clones share the same storage, so a handle kept outside the pipeline can
/// read what was collected once it has run.
#[derive(Debug)]
pub struct CollectingSink<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T> CollectingSink<T> {
    pub fn new() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Removes and returns everything collected so far
    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.items.lock())
    }
}

impl<T: Clone> CollectingSink<T> {
    pub fn items(&self) -> Vec<T> {
        self.items.lock().clone()
    }
}

impl<T> Clone for CollectingSink<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<T> Default for CollectingSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> PipelineSink<T> for CollectingSink<T> {
    fn write(&mut self, items: Consuming<'_, T>) -> anyhow::Result<()> {
        for item in items {
            self.items.lock().push(item);
        }
        Ok(())
    }
}
