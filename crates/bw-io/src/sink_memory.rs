use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bw_core::{BulkCopy, BulkCopyOptions, ColumnTarget, DataReader, Value};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct MemoryTable {
    options: Option<BulkCopyOptions>,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    batches: usize,
    closed: bool,
    fail_after: Option<usize>,
}

/// Bulk-copy sink that keeps rows in memory
///
/// Clones share the same table, so a handle kept by the caller can inspect
/// what a writer that owns another clone has copied. Rows land in whole
/// batches: when a transfer fails, the rows of its unfinished batch are
/// discarded.
#[derive(Debug, Clone, Default)]
pub struct MemoryBulkCopy {
    id: String,
    table: Arc<Mutex<MemoryTable>>,
}

impl MemoryBulkCopy {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            table: Arc::default(),
        }
    }

    /// Makes transfers fail once `rows` rows have been read in total
    pub fn fail_after(self, rows: usize) -> Self {
        self.table.lock().fail_after = Some(rows);
        self
    }

    /// Options from the most recent `configure` call
    pub fn options(&self) -> Option<BulkCopyOptions> {
        self.table.lock().options.clone()
    }

    /// Destination column labels, in column-mapping order
    pub fn columns(&self) -> Vec<String> {
        self.table.lock().columns.clone()
    }

    pub fn rows(&self) -> Vec<Vec<Value>> {
        self.table.lock().rows.clone()
    }

    pub fn row_count(&self) -> usize {
        self.table.lock().rows.len()
    }

    /// Number of batches flushed so far
    pub fn batches(&self) -> usize {
        self.table.lock().batches
    }
}

#[async_trait]
impl BulkCopy for MemoryBulkCopy {
    fn name(&self) -> &str {
        &self.id
    }

    fn configure(&mut self, options: &BulkCopyOptions) -> Result<()> {
        let mut table = self.table.lock();
        if table.closed {
            bail!("memory sink `{}` is closed", self.id);
        }
        table.columns = options
            .column_mappings
            .iter()
            .map(|m| match &m.destination {
                ColumnTarget::Name(name) => name.clone(),
                ColumnTarget::Ordinal(ordinal) => format!("#{ordinal}"),
            })
            .collect();
        table.options = Some(options.clone());
        Ok(())
    }

    fn write(&mut self, reader: &mut dyn DataReader) -> Result<u64> {
        let (sources, batch_size, fail_after) = {
            let table = self.table.lock();
            if table.closed {
                bail!("memory sink `{}` is closed", self.id);
            }
            let options = table
                .options
                .as_ref()
                .ok_or_else(|| anyhow!("memory sink `{}` has not been configured", self.id))?;
            let sources: Vec<usize> = options
                .column_mappings
                .iter()
                .map(|m| m.source_ordinal)
                .collect();
            (sources, options.batch_size, table.fail_after)
        };
        if sources.is_empty() {
            bail!("memory sink `{}` has no column mappings", self.id);
        }

        let mut pending: Vec<Vec<Value>> = Vec::new();
        let mut copied = 0u64;
        while reader.read()? {
            if let Some(limit) = fail_after {
                if self.table.lock().rows.len() + pending.len() >= limit {
                    bail!("memory sink `{}` rejected row {}", self.id, limit + 1);
                }
            }
            let row = sources
                .iter()
                .map(|&ordinal| reader.get_value(ordinal))
                .collect::<bw_core::Result<Vec<_>>>()?;
            pending.push(row);
            copied += 1;
            if batch_size > 0 && pending.len() == batch_size {
                self.flush(&mut pending);
            }
        }
        self.flush(&mut pending);
        info!(sink = %self.id, rows = copied, "memory bulk copy finished");
        Ok(copied)
    }

    fn is_closed(&self) -> bool {
        self.table.lock().closed
    }

    fn close(&mut self) -> Result<()> {
        self.table.lock().closed = true;
        Ok(())
    }
}

impl MemoryBulkCopy {
    fn flush(&self, pending: &mut Vec<Vec<Value>>) {
        if pending.is_empty() {
            return;
        }
        let mut table = self.table.lock();
        debug!(sink = %self.id, rows = pending.len(), "flushing batch");
        table.rows.append(pending);
        table.batches += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bw_core::{ColumnMapping, MapBuilder, Record, RecordDescriptor};
    use std::time::Duration;

    struct Reading {
        sensor: String,
        value: f64,
    }

    impl Record for Reading {
        fn descriptor() -> RecordDescriptor<Self> {
            RecordDescriptor::new()
                .field("sensor", |r: &Reading| r.sensor.clone())
                .field("value", |r: &Reading| r.value)
        }
    }

    fn options(batch_size: usize) -> BulkCopyOptions {
        BulkCopyOptions {
            destination_table: "Readings".into(),
            column_mappings: vec![
                ColumnMapping::by_name(1, "Value"),
                ColumnMapping::by_ordinal(0, 0),
            ],
            batch_size,
            timeout: Duration::ZERO,
            enable_streaming: true,
            keep_identity: false,
            table_lock: true,
        }
    }

    fn readings(n: usize) -> Vec<Reading> {
        (0..n)
            .map(|i| Reading {
                sensor: format!("s{i}"),
                value: i as f64,
            })
            .collect()
    }

    #[test]
    fn copies_rows_in_mapping_order() {
        let mut sink = MemoryBulkCopy::new("mem");
        sink.configure(&options(2)).unwrap();
        let mut reader = MapBuilder::build_all_properties::<Reading>()
            .create_reader(readings(5))
            .unwrap();

        assert_eq!(sink.write(&mut reader).unwrap(), 5);
        assert_eq!(sink.columns(), vec!["Value", "#0"]);
        assert_eq!(
            sink.rows()[1],
            vec![Value::Float64(1.0), Value::from("s1")]
        );
        assert_eq!(sink.batches(), 3);
    }

    #[test]
    fn failed_transfer_keeps_only_flushed_batches() {
        let mut sink = MemoryBulkCopy::new("mem").fail_after(3);
        sink.configure(&options(2)).unwrap();
        let mut reader = MapBuilder::build_all_properties::<Reading>()
            .create_reader(readings(5))
            .unwrap();

        assert!(sink.write(&mut reader).is_err());
        assert_eq!(sink.row_count(), 2);
    }

    #[test]
    fn closed_sink_refuses_work() {
        let handle = MemoryBulkCopy::new("mem");
        let mut sink = handle.clone();
        sink.close().unwrap();
        assert!(handle.is_closed());
        assert!(sink.configure(&options(0)).is_err());
    }
}
