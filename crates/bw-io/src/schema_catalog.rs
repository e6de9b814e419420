//! Schema lookups that do not need a live database
//!
//! [`SchemaCatalog`] reads table layouts from YAML; [`ArrowSchemaLookup`]
//! derives them from Arrow schemas, which pairs it with the Parquet sink.

use anyhow::{anyhow, Result};
use arrow_schema::{DataType, SchemaRef};
use async_trait::async_trait;
use bw_core::{SchemaColumnInfo, SchemaLookup};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Column entry of a [`SchemaCatalog`] table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    /// Defaults to the column's position in the list
    #[serde(default)]
    pub ordinal: Option<usize>,
    #[serde(default)]
    pub size: usize,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub key: bool,
}

fn default_nullable() -> bool {
    true
}

/// Table layouts described in YAML
///
/// ```yaml
/// tables:
///   dbo.People:
///     - name: Id
///       type: int
///       key: true
///       nullable: false
///     - name: FirstName
///       type: nvarchar
///       size: 50
/// ```
///
/// Table names match case-insensitively and ignore `[brackets]`; a request
/// for `[People]` also finds `dbo.People` when no unqualified entry exists.
/// The connection argument of the lookup is not consulted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaCatalog {
    #[serde(default)]
    pub tables: BTreeMap<String, Vec<CatalogColumn>>,
}

impl SchemaCatalog {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    pub fn with_table(mut self, name: impl Into<String>, columns: Vec<CatalogColumn>) -> Self {
        self.tables.insert(name.into(), columns);
        self
    }

    fn find(&self, table: &str) -> Option<&Vec<CatalogColumn>> {
        let wanted = normalize(table);
        self.tables
            .iter()
            .find(|(name, _)| normalize(name) == wanted)
            .or_else(|| {
                let short = unqualified(&wanted);
                self.tables
                    .iter()
                    .find(|(name, _)| unqualified(&normalize(name)) == short)
            })
            .map(|(_, columns)| columns)
    }
}

fn normalize(name: &str) -> String {
    name.split('.')
        .map(|part| part.trim().trim_start_matches('[').trim_end_matches(']'))
        .collect::<Vec<_>>()
        .join(".")
        .to_ascii_lowercase()
}

fn unqualified(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

#[async_trait]
impl SchemaLookup for SchemaCatalog {
    async fn get_columns(&self, _connection: &str, table: &str) -> Result<Vec<SchemaColumnInfo>> {
        let columns = self
            .find(table)
            .ok_or_else(|| anyhow!("table `{table}` is not described in the schema catalog"))?;
        Ok(columns
            .iter()
            .enumerate()
            .map(|(position, column)| SchemaColumnInfo {
                column_name: column.name.clone(),
                column_ordinal: column.ordinal.unwrap_or(position),
                column_size: column.size,
                data_type_name: column.data_type.clone(),
                is_nullable: column.nullable,
                is_key: column.key,
                original_position: position,
            })
            .collect())
    }
}

/// Schema lookup answering from Arrow schemas
///
/// Field metadata `key = "true"` marks key columns and `max_length` sets the
/// column size.
#[derive(Debug, Clone, Default)]
pub struct ArrowSchemaLookup {
    tables: BTreeMap<String, SchemaRef>,
}

impl ArrowSchemaLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, name: &str, schema: SchemaRef) -> Self {
        self.tables.insert(normalize(name), schema);
        self
    }
}

#[async_trait]
impl SchemaLookup for ArrowSchemaLookup {
    async fn get_columns(&self, _connection: &str, table: &str) -> Result<Vec<SchemaColumnInfo>> {
        let schema = self
            .tables
            .get(&normalize(table))
            .ok_or_else(|| anyhow!("no arrow schema registered for `{table}`"))?;
        Ok(schema
            .fields()
            .iter()
            .enumerate()
            .map(|(position, field)| {
                let metadata = field.metadata();
                SchemaColumnInfo {
                    column_name: field.name().clone(),
                    column_ordinal: position,
                    column_size: metadata
                        .get("max_length")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or_else(|| fixed_width(field.data_type())),
                    data_type_name: field.data_type().to_string(),
                    is_nullable: field.is_nullable(),
                    is_key: metadata.get("key").is_some_and(|v| v == "true"),
                    original_position: position,
                }
            })
            .collect())
    }
}

fn fixed_width(data_type: &DataType) -> usize {
    data_type.primitive_width().unwrap_or(0)
}
