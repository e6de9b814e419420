//! Blocking view of an asynchronous stream, feeding the cursor of a streamed write

use futures::{Stream, StreamExt};
use std::pin::Pin;
use tokio::runtime::Handle;

/// Iterator whose `next` waits for the next stream item
///
/// Must only be driven from a multi-threaded runtime: the wait happens inside
/// [`tokio::task::block_in_place`].
pub(crate) struct StreamItems<St> {
    stream: Pin<Box<St>>,
    handle: Handle,
}

impl<St: Stream> StreamItems<St> {
    pub(crate) fn new(stream: St, handle: Handle) -> Self {
        Self {
            stream: Box::pin(stream),
            handle,
        }
    }
}

impl<St: Stream> Iterator for StreamItems<St> {
    type Item = St::Item;

    fn next(&mut self) -> Option<St::Item> {
        let Self { stream, handle } = self;
        tokio::task::block_in_place(|| handle.block_on(stream.next()))
    }
}
