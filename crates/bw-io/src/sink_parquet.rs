use anyhow::{anyhow, bail, Context, Result};
use arrow_array::{
    ArrayRef, BinaryArray, BooleanArray, Date32Array, Float32Array, Float64Array, Int16Array,
    Int32Array, Int64Array, Int8Array, RecordBatch, StringArray, TimestampMicrosecondArray,
};
use arrow_schema::{DataType, SchemaRef, TimeUnit};
use async_trait::async_trait;
use bw_core::{BulkCopy, BulkCopyOptions, ColumnTarget, DataReader, Value};
use chrono::NaiveDate;
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::file::properties::WriterProperties;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Rows per record batch when the writer does not set a batch size
fn default_batch_rows() -> usize {
    65536
}

/// Bulk-copy sink writing one Parquet file per transfer
///
/// The Arrow schema plays the part of the destination table: column mappings
/// target its fields by name (case-insensitive) or by index. Fields no mapping
/// targets are written as nulls.
pub struct ParquetBulkCopy {
    id: String,
    path: PathBuf,
    schema: SchemaRef,
    options: Option<BulkCopyOptions>,
    closed: bool,
}

impl ParquetBulkCopy {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>, schema: SchemaRef) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            schema,
            options: None,
            closed: false,
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Source ordinal feeding each schema field, if any
    fn field_sources(&self, options: &BulkCopyOptions) -> Result<Vec<Option<usize>>> {
        let fields = self.schema.fields();
        let mut sources = vec![None; fields.len()];
        for mapping in &options.column_mappings {
            let index = match &mapping.destination {
                ColumnTarget::Name(name) => fields
                    .iter()
                    .position(|f| f.name().eq_ignore_ascii_case(name))
                    .ok_or_else(|| anyhow!("column `{name}` is not part of the parquet schema"))?,
                ColumnTarget::Ordinal(ordinal) if *ordinal < fields.len() => *ordinal,
                ColumnTarget::Ordinal(ordinal) => {
                    bail!("column ordinal {ordinal} is outside the parquet schema")
                }
            };
            sources[index] = Some(mapping.source_ordinal);
        }
        Ok(sources)
    }

    fn to_batch(&self, columns: &mut [Vec<Value>]) -> Result<RecordBatch> {
        let arrays = self
            .schema
            .fields()
            .iter()
            .zip(columns.iter_mut())
            .map(|(field, values)| {
                to_array(field.data_type(), &std::mem::take(values))
                    .with_context(|| format!("converting column `{}`", field.name()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(RecordBatch::try_new(self.schema.clone(), arrays)?)
    }
}

#[async_trait]
impl BulkCopy for ParquetBulkCopy {
    fn name(&self) -> &str {
        &self.id
    }

    fn configure(&mut self, options: &BulkCopyOptions) -> Result<()> {
        if self.closed {
            bail!("parquet sink `{}` is closed", self.id);
        }
        self.field_sources(options)?;
        self.options = Some(options.clone());
        Ok(())
    }

    fn write(&mut self, reader: &mut dyn DataReader) -> Result<u64> {
        if self.closed {
            bail!("parquet sink `{}` is closed", self.id);
        }
        let options = self
            .options
            .clone()
            .ok_or_else(|| anyhow!("parquet sink `{}` has not been configured", self.id))?;
        let sources = self.field_sources(&options)?;
        let batch_rows = match options.batch_size {
            0 => default_batch_rows(),
            n => n,
        };

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let file = fs::File::create(&self.path)
            .with_context(|| format!("creating {}", self.path.display()))?;
        let props = WriterProperties::builder().build();
        let mut writer = ArrowWriter::try_new(file, self.schema.clone(), Some(props))?;

        let mut columns: Vec<Vec<Value>> = vec![Vec::new(); sources.len()];
        let mut pending = 0usize;
        let mut rows = 0u64;
        while reader.read()? {
            for (column, source) in columns.iter_mut().zip(&sources) {
                let value = match source {
                    Some(ordinal) => reader.get_value(*ordinal)?,
                    None => Value::Null,
                };
                column.push(value);
            }
            pending += 1;
            rows += 1;
            if pending == batch_rows {
                let batch = self.to_batch(&mut columns)?;
                info!("Writing batch with {} rows", batch.num_rows());
                writer.write(&batch)?;
                pending = 0;
            }
        }
        if pending > 0 {
            let batch = self.to_batch(&mut columns)?;
            info!("Writing batch with {} rows", batch.num_rows());
            writer.write(&batch)?;
        }
        writer.close()?;
        info!(sink = %self.id, path = %self.path.display(), rows, "parquet bulk copy finished");
        Ok(rows)
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

fn convert<N>(
    values: &[Value],
    expected: &str,
    f: impl Fn(&Value) -> Option<N>,
) -> Result<Vec<Option<N>>> {
    values
        .iter()
        .map(|value| {
            if value.is_null() {
                return Ok(None);
            }
            f(value).map(Some).ok_or_else(|| {
                anyhow!(
                    "{} value `{value}` cannot be stored as {expected}",
                    value.type_name()
                )
            })
        })
        .collect()
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::Bytes(_) | Value::Array(_) => None,
        other => Some(other.to_string()),
    }
}

fn epoch_days(date: NaiveDate) -> Option<i32> {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
    i32::try_from((date - epoch).num_days()).ok()
}

fn to_array(data_type: &DataType, values: &[Value]) -> Result<ArrayRef> {
    let array: ArrayRef = match data_type {
        DataType::Boolean => {
            Arc::new(BooleanArray::from(convert(values, "boolean", Value::as_bool)?))
        }
        DataType::Int8 => Arc::new(Int8Array::from(convert(values, "int8", |v| {
            v.as_i64().and_then(|n| i8::try_from(n).ok())
        })?)),
        DataType::Int16 => Arc::new(Int16Array::from(convert(values, "int16", |v| {
            v.as_i64().and_then(|n| i16::try_from(n).ok())
        })?)),
        DataType::Int32 => Arc::new(Int32Array::from(convert(values, "int32", |v| {
            v.as_i64().and_then(|n| i32::try_from(n).ok())
        })?)),
        DataType::Int64 => Arc::new(Int64Array::from(convert(values, "int64", Value::as_i64)?)),
        DataType::Float32 => Arc::new(Float32Array::from(convert(values, "float32", |v| {
            v.as_f64().map(|f| f as f32)
        })?)),
        DataType::Float64 => {
            Arc::new(Float64Array::from(convert(values, "float64", Value::as_f64)?))
        }
        DataType::Utf8 => Arc::new(StringArray::from(convert(values, "utf8", text)?)),
        DataType::Binary => {
            let bytes = convert(values, "binary", |v| v.as_bytes().map(<[u8]>::to_vec))?;
            Arc::new(bytes.into_iter().collect::<BinaryArray>())
        }
        DataType::Date32 => Arc::new(Date32Array::from(convert(values, "date32", |v| match v {
            Value::Date(d) => epoch_days(*d),
            Value::DateTime(dt) => epoch_days(dt.date()),
            Value::DateTimeTz(dt) => epoch_days(dt.date_naive()),
            _ => None,
        })?)),
        DataType::Timestamp(TimeUnit::Microsecond, tz) => {
            let micros = convert(values, "timestamp", |v| match v {
                Value::DateTime(dt) => Some(dt.and_utc().timestamp_micros()),
                Value::DateTimeTz(dt) => Some(dt.timestamp_micros()),
                _ => None,
            })?;
            Arc::new(TimestampMicrosecondArray::from(micros).with_timezone_opt(tz.clone()))
        }
        other => bail!("arrow type {other} is not supported by the parquet sink"),
    };
    Ok(array)
}
