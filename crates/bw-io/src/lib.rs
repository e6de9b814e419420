//! # BW I/O - Auto-Discovery, Bulk Writer and Sinks
//!
//! This crate connects the record mappings of `bw-core` to concrete bulk-load
//! destinations. It resolves mappings against live schemas, drives a
//! [`BulkCopy`](bw_core::BulkCopy) sink through the streaming cursor, and ships
//! a few collaborators that need no database.
//!
//! ## Features
//!
//! ### Writer
//! - **BulkWriter**: configures a sink from a record type's annotations and streams records into it
//! - **CreateBulkWriter**: turns a fluent [`Mapping`](bw_core::Mapping) into a writer, discovering what it leaves unset
//!
//! ### Sinks
//! - **Memory**: collects rows in memory, for tests and staging
//! - **Parquet**: writes one Parquet file per transfer
//!
//! ### Schema lookups
//! - **SchemaCatalog**: table layouts described in YAML
//! - **ArrowSchemaLookup**: table layouts taken from Arrow schemas
//!
//! ## Example Usage
//!
//! ```rust
//! use bw_core::{FieldAttributes, Record, RecordDescriptor};
//! use bw_io::{BulkWriter, MemoryBulkCopy};
//!
//! struct Order { id: i64, total: f64 }
//!
//! impl Record for Order {
//!     fn descriptor() -> RecordDescriptor<Self> {
//!         RecordDescriptor::new()
//!             .table_in_schema("sales", "Orders")
//!             .field_with("id", |o: &Order| o.id, FieldAttributes::new().key())
//!             .field("total", |o: &Order| o.total)
//!     }
//! }
//!
//! # fn main() -> bw_core::Result<()> {
//! let sink = MemoryBulkCopy::new("orders");
//! let mut writer = BulkWriter::<Order, _>::new(sink.clone())?;
//! let rows = writer.write_to_database((0..3).map(|id| Order { id, total: 9.5 }))?;
//! assert_eq!(rows, 3);
//! assert_eq!(sink.options().unwrap().destination_table, "sales.Orders");
//! # Ok(())
//! # }
//! ```

/// Schema auto-discovery for property mappings
pub mod discover;

/// Bulk sink adapter
pub mod writer;

mod stream;

/// In-memory bulk-copy sink
pub mod sink_memory;

/// Parquet file bulk-copy sink
pub mod sink_parquet;

/// YAML and Arrow backed schema lookups
pub mod schema_catalog;

pub use schema_catalog::{ArrowSchemaLookup, CatalogColumn, SchemaCatalog};
pub use sink_memory::MemoryBulkCopy;
pub use sink_parquet::ParquetBulkCopy;
pub use writer::{BulkWriter, CreateBulkWriter};
