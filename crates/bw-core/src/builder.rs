//! Mapping builder
//!
//! Derives the ordered [`PropertyMapping`] list for a record type, either from
//! the field annotations ([`MapBuilder::build_from_annotations`]) or through a
//! fluent per-field configuration ([`MapBuilder::map_all_properties`],
//! [`MapBuilder::map_no_properties`]).
//!
//! ```rust
//! use bw_core::{MapBuilder, Record, RecordDescriptor};
//!
//! struct Person { id: i32, first: String, last: String }
//!
//! impl Record for Person {
//!     fn descriptor() -> RecordDescriptor<Self> {
//!         RecordDescriptor::new()
//!             .field("id", |p: &Person| p.id)
//!             .field("first", |p: &Person| p.first.clone())
//!             .field("last", |p: &Person| p.last.clone())
//!     }
//! }
//!
//! # fn main() -> bw_core::Result<()> {
//! let mapping = MapBuilder::map_all_properties::<Person>()
//!     .destination_table("People")?
//!     .map_property_with("id", |m| {
//!         m.as_key();
//!         Ok(())
//!     })?
//!     .map_property_with("first", |m| {
//!         m.to_column_name("FirstName")?.to_column_size(50)?;
//!         Ok(())
//!     })?
//!     .build();
//!
//! assert_eq!(mapping.property_mappings().len(), 3);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use crate::mapping::PropertyMapping;
use crate::reader::RecordReader;
use crate::record::{OwnerType, Record, RecordDescriptor};
use crate::{BulkWriterError, Result};

/// Entry points for building property mappings
pub struct MapBuilder;

impl MapBuilder {
    /// Mappings for every auto-mappable field with column annotations applied
    ///
    /// Column name and ordinal fall back to the field name and its position,
    /// the key flag defaults to false. Size and data type name are only set
    /// when annotated, leaving them for auto-discovery otherwise.
    pub fn build_from_annotations<T: Record>() -> Vec<PropertyMapping<T>> {
        let descriptor = T::descriptor();
        descriptor
            .fields()
            .iter()
            .filter(|field| field.is_auto_mappable())
            .enumerate()
            .map(|(index, field)| {
                let attributes = field.attributes();
                let mut mapping = PropertyMapping::new(Arc::clone(field), index);
                mapping.set_should_map(!attributes.not_mapped);

                let column_name = attributes
                    .column_name
                    .as_deref()
                    .filter(|name| !name.trim().is_empty())
                    .unwrap_or(field.name());
                let column_ordinal = attributes
                    .column_order
                    .and_then(|order| usize::try_from(order).ok())
                    .unwrap_or(index);

                let destination = mapping.destination_mut();
                destination.set_column_name(column_name);
                destination.set_column_ordinal(column_ordinal);
                destination.set_is_key(attributes.key);
                if let Some(length) = attributes.max_length {
                    destination.set_column_size(length);
                }
                if let Some(type_name) = &attributes.column_type_name {
                    destination.set_data_type_name(type_name.clone());
                }
                mapping
            })
            .collect()
    }

    /// Starts from every auto-mappable field with unconfigured destinations
    pub fn map_all_properties<T: Record>() -> MapBuilderContext<T> {
        let mut context = MapBuilderContext::new();
        let fields: Vec<_> = context
            .descriptor
            .fields()
            .iter()
            .filter(|field| field.is_auto_mappable())
            .cloned()
            .collect();
        for field in fields {
            let ordinal = context.mappings.len();
            context.mappings.push(PropertyMapping::new(field, ordinal));
        }
        context
    }

    /// Starts from an empty mapping list
    pub fn map_no_properties<T: Record>() -> MapBuilderContext<T> {
        MapBuilderContext::new()
    }

    pub fn build_all_properties<T: Record>() -> Mapping<T> {
        Self::map_all_properties::<T>().build()
    }
}

/// Fluent mapping configuration for one record type
pub struct MapBuilderContext<T> {
    descriptor: RecordDescriptor<T>,
    destination_table: Option<String>,
    mappings: Vec<PropertyMapping<T>>,
}

impl<T: Record> MapBuilderContext<T> {
    fn new() -> Self {
        Self {
            descriptor: T::descriptor(),
            destination_table: None,
            mappings: Vec::new(),
        }
    }

    pub fn destination_table(mut self, table_name: &str) -> Result<Self> {
        if table_name.trim().is_empty() {
            return Err(BulkWriterError::argument(
                "table_name",
                "destination table name must not be empty",
            ));
        }
        self.destination_table = Some(table_name.to_owned());
        Ok(self)
    }

    pub fn map_property(self, name: &str) -> Result<Self> {
        self.map_property_with(name, |_| Ok(()))
    }

    /// Maps the field called `name`, then lets `configure` adjust its destination
    ///
    /// Mapping a field again replaces its configuration but keeps its source
    /// ordinal. Unknown field names are rejected.
    pub fn map_property_with<F>(mut self, name: &str, configure: F) -> Result<Self>
    where
        F: FnOnce(&mut ColumnMap<'_, T>) -> Result<()>,
    {
        let field = self.descriptor.find(name).cloned().ok_or_else(|| {
            BulkWriterError::argument(
                "property",
                format!(
                    "`{name}` is not a readable field of {}",
                    self.descriptor.owner().short_name()
                ),
            )
        })?;

        let existing = self
            .mappings
            .iter()
            .position(|m| m.source().name() == name);
        let ordinal = match existing {
            Some(index) => self.mappings[index].source().ordinal(),
            None => self.mappings.len(),
        };

        let mut mapping = PropertyMapping::new(field, ordinal);
        configure(&mut ColumnMap {
            mapping: &mut mapping,
        })?;

        match existing {
            Some(index) => self.mappings[index] = mapping,
            None => self.mappings.push(mapping),
        }
        Ok(self)
    }

    pub fn property_mappings(&self) -> &[PropertyMapping<T>] {
        &self.mappings
    }

    pub fn build(self) -> Mapping<T> {
        Mapping {
            owner: self.descriptor.owner(),
            destination_table: self.destination_table,
            mappings: self.mappings,
        }
    }
}

/// Destination configuration of a single mapped field
pub struct ColumnMap<'a, T> {
    mapping: &'a mut PropertyMapping<T>,
}

impl<T> ColumnMap<'_, T> {
    pub fn to_column_name(&mut self, name: &str) -> Result<&mut Self> {
        if name.trim().is_empty() {
            return Err(BulkWriterError::argument(
                "name",
                "column name must not be empty",
            ));
        }
        self.mapping.destination_mut().set_column_name(name);
        Ok(self)
    }

    pub fn to_column_ordinal(&mut self, ordinal: i64) -> Result<&mut Self> {
        let ordinal = usize::try_from(ordinal).map_err(|_| {
            BulkWriterError::argument("ordinal", format!("column ordinal {ordinal} is negative"))
        })?;
        self.mapping.destination_mut().set_column_ordinal(ordinal);
        Ok(self)
    }

    pub fn to_column_size(&mut self, size: i64) -> Result<&mut Self> {
        let size = usize::try_from(size).map_err(|_| {
            BulkWriterError::argument("size", format!("column size {size} is negative"))
        })?;
        self.mapping.destination_mut().set_column_size(size);
        Ok(self)
    }

    pub fn to_data_type_name(&mut self, name: &str) -> Result<&mut Self> {
        if name.trim().is_empty() {
            return Err(BulkWriterError::argument(
                "name",
                "data type name must not be empty",
            ));
        }
        self.mapping.destination_mut().set_data_type_name(name);
        Ok(self)
    }

    pub fn as_key(&mut self) -> &mut Self {
        self.mapping.destination_mut().set_is_key(true);
        self
    }

    /// Keeps the field out of the column mappings handed to the sink
    pub fn do_not_map(&mut self) {
        self.mapping.set_should_map(false);
    }
}

/// A finished mapping configuration
pub struct Mapping<T> {
    owner: OwnerType,
    destination_table: Option<String>,
    mappings: Vec<PropertyMapping<T>>,
}

impl<T: 'static> Mapping<T> {
    pub fn owner(&self) -> OwnerType {
        self.owner
    }

    pub fn destination_table(&self) -> Option<&str> {
        self.destination_table.as_deref()
    }

    pub fn set_destination_table(&mut self, table_name: impl Into<String>) {
        self.destination_table = Some(table_name.into());
    }

    pub fn property_mappings(&self) -> &[PropertyMapping<T>] {
        &self.mappings
    }

    pub fn property_mappings_mut(&mut self) -> &mut [PropertyMapping<T>] {
        &mut self.mappings
    }

    /// Cursor over `items` exposing the should-map fields
    pub fn create_reader<I>(&self, items: I) -> Result<RecordReader<T, I>>
    where
        I: IntoIterator<Item = T>,
    {
        let mapped = self
            .mappings
            .iter()
            .filter(|m| m.should_map())
            .cloned()
            .collect();
        RecordReader::new(items, mapped)
    }

    pub fn into_parts(self) -> (Option<String>, Vec<PropertyMapping<T>>) {
        (self.destination_table, self.mappings)
    }
}
