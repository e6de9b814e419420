//! Bulk sink adapter
//!
//! [`BulkWriter`] ties a record type's mappings to a [`BulkCopy`] sink: it
//! configures the sink, exposes the records through a [`RecordReader`] and
//! commits or rolls back a caller-supplied [`Transaction`].

use async_trait::async_trait;
use futures::Stream;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{info, warn};

use bw_core::{
    BulkCopy, BulkCopyOptions, BulkWriterError, ColumnMapping, DataReader, MapBuilder, Mapping,
    PropertyMapping, Record, RecordReader, Result, SchemaLookup, Transaction, WriterOptions,
};

use crate::discover;
use crate::stream::StreamItems;

type BulkCopySetup<S> = Box<dyn FnMut(&mut S) + Send>;

/// The writer's transaction and what has become of it
enum TransactionSlot {
    Empty,
    Pending(Box<dyn Transaction>),
    /// Committed or rolled back by an earlier write
    Completed(&'static str),
}

/// Writes sequences of `T` into a bulk-copy sink
pub struct BulkWriter<T, S: BulkCopy> {
    sink: S,
    mappings: Vec<PropertyMapping<T>>,
    options: BulkCopyOptions,
    transaction: TransactionSlot,
    setup: Option<BulkCopySetup<S>>,
    closed: bool,
}

impl<T: Record, S: BulkCopy> BulkWriter<T, S> {
    /// Writer for the annotated fields of `T`, with default options
    pub fn new(sink: S) -> Result<Self> {
        Self::with_options(sink, WriterOptions::default())
    }

    /// Writer for the annotated fields of `T`
    ///
    /// The destination table is the options' table, else the record's table
    /// annotation (`schema.name` when a schema is given), else the type name.
    /// Identity values are kept when the options say so or, if they are
    /// silent, when any field is a key, mapped or not.
    pub fn with_options(sink: S, options: WriterOptions) -> Result<Self> {
        let mappings = MapBuilder::build_from_annotations::<T>();
        let descriptor = T::descriptor();
        let destination_table = match (&options.destination_table, descriptor.table_attribute()) {
            (Some(table), _) => table.clone(),
            (None, Some(attribute)) => attribute.qualified_name(),
            (None, None) => descriptor.owner().short_name().to_owned(),
        };
        let column_mappings = mappings
            .iter()
            .filter(|m| m.should_map())
            .map(PropertyMapping::to_column_mapping)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_mappings(
            sink,
            destination_table,
            mappings,
            column_mappings,
            options,
        ))
    }

    /// Writer that commits `transaction` after a successful transfer and rolls it back otherwise
    pub fn with_transaction(sink: S, transaction: impl Transaction + 'static) -> Result<Self> {
        Self::with_options_and_transaction(sink, WriterOptions::default(), transaction)
    }

    pub fn with_options_and_transaction(
        sink: S,
        options: WriterOptions,
        transaction: impl Transaction + 'static,
    ) -> Result<Self> {
        let mut writer = Self::with_options(sink, options)?;
        writer.set_transaction(transaction);
        Ok(writer)
    }
}

impl<T: Send + 'static, S: BulkCopy> BulkWriter<T, S> {
    /// Writer over already resolved mappings
    pub fn from_mappings(
        sink: S,
        destination_table: String,
        mappings: Vec<PropertyMapping<T>>,
        column_mappings: Vec<ColumnMapping>,
        options: WriterOptions,
    ) -> Self {
        let keep_identity = options.keep_identity.unwrap_or_else(|| {
            mappings
                .iter()
                .any(|m| m.destination().is_key_or_default())
        });
        Self {
            sink,
            mappings,
            options: BulkCopyOptions {
                destination_table,
                column_mappings,
                batch_size: options.batch_size,
                timeout: options.timeout(),
                enable_streaming: options.enable_streaming,
                keep_identity,
                table_lock: options.table_lock,
            },
            transaction: TransactionSlot::Empty,
            setup: None,
            closed: false,
        }
    }

    pub fn destination_table(&self) -> &str {
        &self.options.destination_table
    }

    pub fn options(&self) -> &BulkCopyOptions {
        &self.options
    }

    pub fn property_mappings(&self) -> &[PropertyMapping<T>] {
        &self.mappings
    }

    pub fn batch_size(&self) -> usize {
        self.options.batch_size
    }

    pub fn set_batch_size(&mut self, batch_size: usize) {
        self.options.batch_size = batch_size;
    }

    pub fn timeout(&self) -> Duration {
        self.options.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.options.timeout = timeout;
    }

    /// Callback run against the configured sink right before each transfer
    pub fn set_bulk_copy_setup<F>(&mut self, setup: F)
    where
        F: FnMut(&mut S) + Send + 'static,
    {
        self.setup = Some(Box::new(setup));
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Transaction for the next write
    ///
    /// A transaction covers one write: it is committed or rolled back when that
    /// write ends, and later writes fail until a new one is set.
    pub fn set_transaction(&mut self, transaction: impl Transaction + 'static) {
        self.transaction = TransactionSlot::Pending(Box::new(transaction));
    }

    pub fn write_to_database<I>(&mut self, items: I) -> Result<u64>
    where
        I: IntoIterator<Item = T> + Send,
        I::IntoIter: Send,
    {
        let mut reader = self.prepare(items)?;
        let outcome = self.sink.write(&mut reader);
        reader.close();
        self.finish(outcome)
    }

    /// Same as [`write_to_database`](Self::write_to_database), except that the
    /// transfer fails with [`BulkWriterError::Cancelled`] and rolls back as soon
    /// as `is_cancelled` returns true
    pub fn write_to_database_cancellable<I, C>(
        &mut self,
        items: I,
        is_cancelled: C,
    ) -> Result<u64>
    where
        I: IntoIterator<Item = T> + Send,
        I::IntoIter: Send,
        C: Fn() -> bool + Send + 'static,
    {
        let mut reader = self.prepare(items)?.with_cancellation(is_cancelled);
        let outcome = self.sink.write(&mut reader);
        reader.close();
        self.finish(outcome)
    }

    pub async fn write_to_database_async<I>(&mut self, items: I) -> Result<u64>
    where
        I: IntoIterator<Item = T> + Send,
        I::IntoIter: Send,
    {
        let mut reader = self.prepare(items)?;
        let outcome = self.sink.write_async(&mut reader).await;
        reader.close();
        self.finish(outcome)
    }

    /// Writes the items of an asynchronous stream as the sink pulls them
    ///
    /// Each cursor read waits for the next stream item on the current worker
    /// thread, so this needs a multi-threaded tokio runtime; on any other it
    /// fails with [`BulkWriterError::InvalidOperation`] before touching the sink.
    pub async fn write_stream_async<St>(&mut self, items: St) -> Result<u64>
    where
        St: Stream<Item = T> + Send,
    {
        let handle = Handle::try_current().map_err(|_| {
            BulkWriterError::invalid_operation("streamed writes need a tokio runtime")
        })?;
        if handle.runtime_flavor() != RuntimeFlavor::MultiThread {
            return Err(BulkWriterError::invalid_operation(
                "streamed writes need a multi-threaded tokio runtime",
            ));
        }
        let mut reader = self.prepare(StreamItems::new(items, handle))?;
        let outcome = self.sink.write_async(&mut reader).await;
        reader.close();
        self.finish(outcome)
    }

    /// Closes the sink. Later writes fail with [`BulkWriterError::Disposed`].
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if !self.sink.is_closed() {
            self.sink.close().map_err(BulkWriterError::Transfer)?;
        }
        Ok(())
    }

    fn prepare<I>(&mut self, items: I) -> Result<RecordReader<T, I>>
    where
        I: IntoIterator<Item = T>,
    {
        if self.closed {
            return Err(BulkWriterError::Disposed("bulk writer"));
        }
        if let TransactionSlot::Completed(outcome) = &self.transaction {
            return Err(BulkWriterError::invalid_operation(format!(
                "the writer's transaction was already {outcome}; set a new one before writing again"
            )));
        }
        if let Err(e) = self.sink.configure(&self.options) {
            self.rollback();
            return Err(BulkWriterError::Transfer(e));
        }
        if let Some(setup) = self.setup.as_mut() {
            setup(&mut self.sink);
        }
        if self.sink.is_closed() {
            self.rollback();
            return Err(BulkWriterError::invalid_operation(format!(
                "bulk copy sink `{}` was closed before the transfer started",
                self.sink.name()
            )));
        }

        let mapped = self
            .mappings
            .iter()
            .filter(|m| m.should_map())
            .cloned()
            .collect();
        RecordReader::new(items, mapped).inspect_err(|_| self.rollback())
    }

    fn finish(&mut self, outcome: anyhow::Result<u64>) -> Result<u64> {
        match outcome {
            Ok(rows) => {
                if let Some(mut transaction) = self.take_transaction("committed") {
                    transaction.commit().map_err(BulkWriterError::Transfer)?;
                }
                info!(
                    sink = self.sink.name(),
                    table = %self.options.destination_table,
                    rows,
                    "bulk copy complete"
                );
                Ok(rows)
            }
            Err(e) => {
                self.rollback();
                let cancelled = matches!(
                    e.downcast_ref::<BulkWriterError>(),
                    Some(BulkWriterError::Cancelled)
                );
                if cancelled {
                    warn!(sink = self.sink.name(), "bulk copy cancelled");
                    return Err(BulkWriterError::Cancelled);
                }
                Err(BulkWriterError::Transfer(e))
            }
        }
    }

    fn rollback(&mut self) {
        if let Some(mut transaction) = self.take_transaction("rolled back") {
            if let Err(e) = transaction.rollback() {
                warn!(error = %e, "transaction rollback failed");
            }
        }
    }

    /// Hands out a pending transaction, marking it with `outcome`
    fn take_transaction(&mut self, outcome: &'static str) -> Option<Box<dyn Transaction>> {
        match std::mem::replace(&mut self.transaction, TransactionSlot::Empty) {
            TransactionSlot::Pending(transaction) => {
                self.transaction = TransactionSlot::Completed(outcome);
                Some(transaction)
            }
            other => {
                self.transaction = other;
                None
            }
        }
    }
}

impl<T, S: BulkCopy> Drop for BulkWriter<T, S> {
    fn drop(&mut self) {
        if !self.closed && !self.sink.is_closed() {
            if let Err(e) = self.sink.close() {
                warn!(sink = self.sink.name(), error = %e, "closing bulk copy sink failed");
            }
        }
    }
}

/// Builds a [`BulkWriter`] from a finished [`Mapping`]
#[async_trait]
pub trait CreateBulkWriter<T> {
    /// Resolves the mapping against the live schema when needed and returns a
    /// writer whose columns target the resolved destination ordinals
    async fn create_bulk_writer<S>(
        self,
        lookup: &dyn SchemaLookup,
        connection: &str,
        sink: S,
    ) -> Result<BulkWriter<T, S>>
    where
        S: BulkCopy + 'static;
}

#[async_trait]
impl<T: Record> CreateBulkWriter<T> for Mapping<T> {
    async fn create_bulk_writer<S>(
        self,
        lookup: &dyn SchemaLookup,
        connection: &str,
        sink: S,
    ) -> Result<BulkWriter<T, S>>
    where
        S: BulkCopy + 'static,
    {
        if connection.trim().is_empty() {
            return Err(BulkWriterError::argument(
                "connection",
                "connection must not be empty",
            ));
        }

        let (table, mut mappings) = self.into_parts();
        let needs_discovery = discover::needs_discovery(table.as_deref(), &mappings);
        let table = table.unwrap_or_else(|| discover::table_name::<T>(true));
        if needs_discovery {
            discover::resolve(lookup, connection, &table, &mut mappings).await?;
        }

        let column_mappings = mappings
            .iter()
            .filter(|m| m.should_map())
            .map(|m| {
                Ok(ColumnMapping::by_ordinal(
                    m.source().ordinal(),
                    m.destination().column_ordinal()?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        let options = WriterOptions {
            table_lock: false,
            ..WriterOptions::default()
        };
        Ok(BulkWriter::from_mappings(
            sink,
            table,
            mappings,
            column_mappings,
            options,
        ))
    }
}
