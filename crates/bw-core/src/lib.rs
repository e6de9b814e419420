//! # BW Core - Streaming Bulk Writer Core Library
//!
//! This crate provides the foundational types and traits for streaming typed
//! in-memory records into a relational bulk-load sink without materializing
//! the sequence. It defines the value model, self-describing record types, the
//! property mapping model, the mapping builder and the forward-only cursor that
//! bulk sinks consume.
//!
//! ## Key Components
//!
//! - **Records**: [`Record`] types describe their fields through a [`RecordDescriptor`]
//! - **Accessors**: cached per-field read closures shared across threads
//! - **Mappings**: field to column mappings with lazily resolved destinations
//! - **Cursor**: [`RecordReader`], a lazy tabular view over any iterator of records
//! - **Collaborators**: the [`BulkCopy`], [`SchemaLookup`] and [`Transaction`] seams
//!
//! ## Example Usage
//!
//! ```rust
//! use bw_core::{DataReader, MapBuilder, Record, RecordDescriptor};
//!
//! struct Point { x: i32, y: i32 }
//!
//! impl Record for Point {
//!     fn descriptor() -> RecordDescriptor<Self> {
//!         RecordDescriptor::new()
//!             .field("x", |p: &Point| p.x)
//!             .field("y", |p: &Point| p.y)
//!     }
//! }
//!
//! # fn main() -> bw_core::Result<()> {
//! let mapping = MapBuilder::build_all_properties::<Point>();
//! let mut reader = mapping.create_reader(vec![Point { x: 1, y: 2 }])?;
//! while reader.read()? {
//!     let y = reader.get_value(reader.get_ordinal("y")?)?;
//!     assert_eq!(y.as_i64(), Some(2));
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod accessor;
pub mod builder;
pub mod mapping;
pub mod reader;
pub mod record;
pub mod value;

pub use accessor::{value_getter, ConstantGetter, GetValue, ValueGetter};
pub use builder::{ColumnMap, MapBuilder, MapBuilderContext, Mapping};
pub use mapping::{
    ColumnMapping, ColumnTarget, MappingDestination, MappingProperty, MappingSource,
    PropertyMapping,
};
pub use reader::{DataReader, ReaderState, RecordReader};
pub use record::{FieldAttributes, FieldDescriptor, OwnerType, Record, RecordDescriptor, TableAttribute};
pub use value::{ColumnValue, FieldKind, Value};

/// Result type used throughout the bulk writer crates
pub type Result<T> = std::result::Result<T, BulkWriterError>;

/// Error types for mapping, cursor and transfer operations
#[derive(Debug, thiserror::Error)]
pub enum BulkWriterError {
    /// Invalid configuration value, raised at the call that supplied it
    #[error("invalid argument `{argument}`: {message}")]
    Argument {
        argument: &'static str,
        message: String,
    },

    /// The operation is not valid in the current state
    ///
    /// Covers unresolvable field or column names, reading unset mapping slots,
    /// and reading a cursor that has no current record.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A closed component was used
    #[error("{0} has been closed")]
    Disposed(&'static str),

    /// The bulk-copy collaborator failed; the transaction, if any, was rolled back
    #[error("bulk transfer failed: {0:#}")]
    Transfer(#[source] anyhow::Error),

    /// Work was abandoned because cancellation was requested
    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse classification of a [`BulkWriterError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Argument,
    InvalidOperation,
    Disposed,
    Transfer,
    Cancelled,
    Other,
}

impl BulkWriterError {
    pub fn argument(argument: &'static str, message: impl Into<String>) -> Self {
        Self::Argument {
            argument,
            message: message.into(),
        }
    }

    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Argument { .. } => ErrorKind::Argument,
            Self::InvalidOperation(_) => ErrorKind::InvalidOperation,
            Self::Disposed(_) => ErrorKind::Disposed,
            Self::Transfer(_) => ErrorKind::Transfer,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Other(_) => ErrorKind::Other,
        }
    }
}

/// Settings a [`BulkCopy`] sink is configured with before a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkCopyOptions {
    pub destination_table: String,
    pub column_mappings: Vec<ColumnMapping>,
    /// Rows per batch; 0 lets the sink send everything as one batch
    pub batch_size: usize,
    /// Zero means no limit
    pub timeout: Duration,
    pub enable_streaming: bool,
    pub keep_identity: bool,
    pub table_lock: bool,
}

/// Bulk-load transport
///
/// Sinks consume a [`DataReader`] row by row and report how many rows were
/// copied. Implementations decide how rows are batched and delivered.
///
/// ## Examples
/// - In-memory collector for tests
/// - Parquet file writer
/// - Relational database bulk-copy client
#[async_trait]
pub trait BulkCopy: Send {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    fn configure(&mut self, options: &BulkCopyOptions) -> anyhow::Result<()>;

    /// Drains `reader`, returning the number of rows copied
    fn write(&mut self, reader: &mut dyn DataReader) -> anyhow::Result<u64>;

    /// Asynchronous counterpart of [`BulkCopy::write`]
    ///
    /// Defaults to the synchronous path for sinks without a native async transport.
    async fn write_async(&mut self, reader: &mut dyn DataReader) -> anyhow::Result<u64> {
        self.write(reader)
    }

    fn is_closed(&self) -> bool;

    fn close(&mut self) -> anyhow::Result<()>;
}

/// One row of a schema lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaColumnInfo {
    pub column_name: String,
    pub column_ordinal: usize,
    #[serde(default)]
    pub column_size: usize,
    pub data_type_name: String,
    #[serde(default = "default_true")]
    pub is_nullable: bool,
    #[serde(default)]
    pub is_key: bool,
    /// Position of the row as returned by the lookup, used as the sort tiebreak
    #[serde(default)]
    pub original_position: usize,
}

impl SchemaColumnInfo {
    /// Sorts by column ordinal, keeping the lookup's order for equal ordinals
    pub fn sort(columns: &mut [SchemaColumnInfo]) {
        columns.sort_by_key(|c| (c.column_ordinal, c.original_position));
    }
}

/// Schema introspection for a destination table
#[async_trait]
pub trait SchemaLookup: Send + Sync {
    async fn get_columns(
        &self,
        connection: &str,
        table: &str,
    ) -> anyhow::Result<Vec<SchemaColumnInfo>>;
}

/// Caller-owned transaction the writer commits or rolls back
pub trait Transaction: Send {
    fn commit(&mut self) -> anyhow::Result<()>;

    fn rollback(&mut self) -> anyhow::Result<()>;
}

/// Writer settings, loadable from YAML
///
/// ```yaml
/// destination_table: "sales.Orders"
/// batch_size: 5000
/// timeout_secs: 30
/// table_lock: true
/// keep_identity: false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterOptions {
    /// Overrides the table derived from the record type
    #[serde(default)]
    pub destination_table: Option<String>,

    #[serde(default)]
    pub batch_size: usize,

    /// Zero means no limit
    #[serde(default)]
    pub timeout_secs: u64,

    #[serde(default = "default_true")]
    pub enable_streaming: bool,

    #[serde(default = "default_true")]
    pub table_lock: bool,

    /// When unset, identity values are kept if any field is a key
    #[serde(default)]
    pub keep_identity: Option<bool>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            destination_table: None,
            batch_size: 0,
            timeout_secs: 0,
            enable_streaming: true,
            table_lock: true,
            keep_identity: None,
        }
    }
}

impl WriterOptions {
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_true() -> bool {
    true
}
