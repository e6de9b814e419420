//! Tests for the Parquet bulk-copy sink

use arrow_array::{Array, BinaryArray, Int32Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use bw_core::{ErrorKind, FieldAttributes, MapBuilder, Record, RecordDescriptor, WriterOptions};
use bw_io::{ArrowSchemaLookup, BulkWriter, CreateBulkWriter, ParquetBulkCopy};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

struct Asset {
    id: i32,
    name: String,
    payload: Option<Vec<u8>>,
}

impl Record for Asset {
    fn descriptor() -> RecordDescriptor<Self> {
        RecordDescriptor::new()
            .table("Assets")
            .field_with("id", |a: &Asset| a.id, FieldAttributes::new().key())
            .field("name", |a: &Asset| a.name.clone())
            .field("payload", |a: &Asset| a.payload.clone())
    }
}

fn schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("Id", DataType::Int32, false)
            .with_metadata(HashMap::from([("key".to_owned(), "true".to_owned())])),
        Field::new("Name", DataType::Utf8, false),
        Field::new("Payload", DataType::Binary, true),
        Field::new("Comment", DataType::Utf8, true),
    ]))
}

fn assets(n: i32) -> Vec<Asset> {
    (0..n)
        .map(|id| Asset {
            id,
            name: format!("asset-{id}"),
            payload: (id % 3 != 0).then(|| vec![id as u8; 4]),
        })
        .collect()
}

fn read_back(path: &Path) -> Vec<RecordBatch> {
    let file = File::open(path).unwrap();
    ParquetRecordBatchReaderBuilder::try_new(file)
        .unwrap()
        .build()
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

#[test]
fn test_writer_to_parquet_by_column_name() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out").join("assets.parquet");
    let sink = ParquetBulkCopy::new("assets", &path, schema());
    let options = WriterOptions {
        batch_size: 4,
        ..WriterOptions::default()
    };
    let mut writer = BulkWriter::<Asset, _>::with_options(sink, options).unwrap();

    assert_eq!(writer.write_to_database(assets(10)).unwrap(), 10);

    let batches = read_back(&path);
    assert_eq!(batches.iter().map(RecordBatch::num_rows).sum::<usize>(), 10);
    assert_eq!(batches[0].num_rows(), 4);

    let ids = batches[0]
        .column(0)
        .as_any()
        .downcast_ref::<Int32Array>()
        .unwrap();
    assert_eq!(ids.value(3), 3);
    let names = batches[0]
        .column(1)
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap();
    assert_eq!(names.value(1), "asset-1");
    let payloads = batches[0]
        .column(2)
        .as_any()
        .downcast_ref::<BinaryArray>()
        .unwrap();
    assert!(payloads.is_null(0));
    assert_eq!(payloads.value(2), &[2u8; 4]);
    // no mapping targets Comment
    assert_eq!(batches[0].column(3).null_count(), 4);
}

#[test]
fn test_unknown_column_fails_transfer() {
    struct Orphan {
        value: i32,
    }

    impl Record for Orphan {
        fn descriptor() -> RecordDescriptor<Self> {
            RecordDescriptor::new().field("missing", |o: &Orphan| o.value)
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let sink = ParquetBulkCopy::new("orphans", dir.path().join("o.parquet"), schema());
    let mut writer = BulkWriter::<Orphan, _>::new(sink).unwrap();
    let err = writer
        .write_to_database(vec![Orphan { value: 1 }])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transfer);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_discovered_mapping_to_parquet_by_ordinal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("discovered.parquet");
    let lookup = ArrowSchemaLookup::new().with_table("Assets", schema());

    let mapping = MapBuilder::map_all_properties::<Asset>()
        .destination_table("Assets")
        .unwrap()
        .build();
    let mut writer = mapping
        .create_bulk_writer(&lookup, "local", ParquetBulkCopy::new("assets", &path, schema()))
        .await
        .unwrap();
    assert!(writer.options().keep_identity);

    let rows = writer.write_to_database_async(assets(3)).await.unwrap();
    assert_eq!(rows, 3);

    let batches = read_back(&path);
    let names = batches[0]
        .column(1)
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap();
    assert_eq!(names.value(2), "asset-2");
}
