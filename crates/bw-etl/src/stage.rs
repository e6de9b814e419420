//! Stage plumbing: bounded queues driven from blocking worker threads

use bw_core::BulkWriterError;
use std::future::Future;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Raised by a send when the downstream stage has dropped its queue
///
/// The stage that sees it stops without being counted as failed; whatever
/// ended the downstream stage is reported instead.
#[derive(Debug, thiserror::Error)]
#[error("downstream stage is no longer receiving")]
pub(crate) struct Disconnected;

/// What every stage needs while it runs
pub(crate) struct StageContext {
    pub(crate) cancel: CancellationToken,
    pub(crate) handle: Handle,
}

impl StageContext {
    /// Blocks the worker thread on `future`, giving up when cancellation is requested
    pub(crate) fn block_on<F: Future>(&self, future: F) -> Result<F::Output, BulkWriterError> {
        self.handle.block_on(async {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(BulkWriterError::Cancelled),
                output = future => Ok(output),
            }
        })
    }
}

pub(crate) type StageFn = Box<dyn FnOnce(&StageContext) -> anyhow::Result<()> + Send>;

pub(crate) struct Stage {
    pub(crate) kind: &'static str,
    pub(crate) run: StageFn,
}

/// Receiving end of the queue between two stages
pub(crate) struct Input<T> {
    rx: mpsc::Receiver<T>,
    interrupted: Option<BulkWriterError>,
}

impl<T> Input<T> {
    pub(crate) fn new(rx: mpsc::Receiver<T>) -> Self {
        Self {
            rx,
            interrupted: None,
        }
    }

    /// Next item, or `None` once the upstream stage has closed the queue
    pub(crate) fn recv(&mut self, ctx: &StageContext) -> Result<Option<T>, BulkWriterError> {
        ctx.block_on(self.rx.recv())
    }

    pub(crate) fn consume<'a>(&'a mut self, ctx: &'a StageContext) -> Consuming<'a, T> {
        Consuming { input: self, ctx }
    }

    /// Error that cut a [`Consuming`] iteration short, if any
    pub(crate) fn take_interruption(&mut self) -> Option<BulkWriterError> {
        self.interrupted.take()
    }
}

/// Sending end of the queue between two stages
///
/// Dropping it closes the queue, which happens on every exit path of the
/// owning stage.
pub(crate) struct Output<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Output<T> {
    pub(crate) fn new(tx: mpsc::Sender<T>) -> Self {
        Self { tx }
    }

    /// Waits for room in the queue, then enqueues `item`
    pub(crate) fn send(&self, ctx: &StageContext, item: T) -> anyhow::Result<()> {
        ctx.block_on(self.tx.send(item))?
            .map_err(|_| Disconnected.into())
    }
}

/// Blocking iterator over everything left in a stage's input queue
///
/// Iteration ends when the upstream stage closes the queue. A cancellation
/// request also ends it; the stage then reports the cancellation once the
/// consumer returns.
pub struct Consuming<'a, T> {
    input: &'a mut Input<T>,
    ctx: &'a StageContext,
}

impl<T> Consuming<'_, T> {
    /// Token whose cancellation ends this iteration early
    ///
    /// Sinks that must not treat an early end as a complete input check it
    /// once the iteration is over.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.ctx.cancel.clone()
    }
}

impl<T> Iterator for Consuming<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.input.interrupted.is_some() {
            return None;
        }
        match self.input.recv(self.ctx) {
            Ok(item) => item,
            Err(e) => {
                self.input.interrupted = Some(e);
                None
            }
        }
    }
}
