//! Property mappings: one source field to one destination column
//!
//! The destination side is a bag of independently resolvable slots. A slot is
//! filled either by explicit configuration or by auto-discovery against the
//! live schema; reading a slot that was never filled is an error rather than a
//! silent default.

use std::fmt;
use std::sync::Arc;

use crate::record::FieldDescriptor;
use crate::{BulkWriterError, Result};

/// Destination slots of a [`MappingDestination`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MappingProperty {
    ColumnName,
    ColumnOrdinal,
    ColumnSize,
    DataTypeName,
    IsKey,
}

impl MappingProperty {
    pub const ALL: [MappingProperty; 5] = [
        Self::ColumnName,
        Self::ColumnOrdinal,
        Self::ColumnSize,
        Self::DataTypeName,
        Self::IsKey,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ColumnName => "column name",
            Self::ColumnOrdinal => "column ordinal",
            Self::ColumnSize => "column size",
            Self::DataTypeName => "data type name",
            Self::IsKey => "is-key",
        }
    }
}

impl fmt::Display for MappingProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lazily resolved metadata of the destination column
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingDestination {
    column_name: Option<String>,
    column_ordinal: Option<usize>,
    column_size: Option<usize>,
    data_type_name: Option<String>,
    is_key: Option<bool>,
}

impl MappingDestination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self, property: MappingProperty) -> bool {
        match property {
            MappingProperty::ColumnName => self.column_name.is_some(),
            MappingProperty::ColumnOrdinal => self.column_ordinal.is_some(),
            MappingProperty::ColumnSize => self.column_size.is_some(),
            MappingProperty::DataTypeName => self.data_type_name.is_some(),
            MappingProperty::IsKey => self.is_key.is_some(),
        }
    }

    /// True once every slot has been filled
    pub fn is_resolved(&self) -> bool {
        MappingProperty::ALL.iter().all(|p| self.is_set(*p))
    }

    pub fn column_name(&self) -> Result<&str> {
        self.column_name
            .as_deref()
            .ok_or_else(|| unset(MappingProperty::ColumnName))
    }

    pub fn column_ordinal(&self) -> Result<usize> {
        self.column_ordinal
            .ok_or_else(|| unset(MappingProperty::ColumnOrdinal))
    }

    pub fn column_size(&self) -> Result<usize> {
        self.column_size
            .ok_or_else(|| unset(MappingProperty::ColumnSize))
    }

    pub fn data_type_name(&self) -> Result<&str> {
        self.data_type_name
            .as_deref()
            .ok_or_else(|| unset(MappingProperty::DataTypeName))
    }

    pub fn is_key(&self) -> Result<bool> {
        self.is_key.ok_or_else(|| unset(MappingProperty::IsKey))
    }

    /// Key flag treating "unset" as "not a key"
    pub fn is_key_or_default(&self) -> bool {
        self.is_key.unwrap_or(false)
    }

    pub fn set_column_name(&mut self, name: impl Into<String>) {
        self.column_name = Some(name.into());
    }

    pub fn set_column_ordinal(&mut self, ordinal: usize) {
        self.column_ordinal = Some(ordinal);
    }

    pub fn set_column_size(&mut self, size: usize) {
        self.column_size = Some(size);
    }

    pub fn set_data_type_name(&mut self, name: impl Into<String>) {
        self.data_type_name = Some(name.into());
    }

    pub fn set_is_key(&mut self, is_key: bool) {
        self.is_key = Some(is_key);
    }
}

fn unset(property: MappingProperty) -> BulkWriterError {
    BulkWriterError::invalid_operation(format!("destination {property} has not been set"))
}

/// The field a mapping reads from and its fixed source ordinal
pub struct MappingSource<T> {
    field: Arc<FieldDescriptor<T>>,
    ordinal: usize,
}

impl<T> MappingSource<T> {
    pub fn new(field: Arc<FieldDescriptor<T>>, ordinal: usize) -> Self {
        Self { field, ordinal }
    }

    pub fn field(&self) -> &Arc<FieldDescriptor<T>> {
        &self.field
    }

    pub fn name(&self) -> &str {
        self.field.name()
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }
}

impl<T> Clone for MappingSource<T> {
    fn clone(&self) -> Self {
        Self {
            field: Arc::clone(&self.field),
            ordinal: self.ordinal,
        }
    }
}

impl<T> fmt::Debug for MappingSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingSource")
            .field("field", &self.field.name())
            .field("ordinal", &self.ordinal)
            .finish()
    }
}

/// One source field considered for transfer
pub struct PropertyMapping<T> {
    source: MappingSource<T>,
    destination: MappingDestination,
    should_map: bool,
}

impl<T> PropertyMapping<T> {
    pub fn new(field: Arc<FieldDescriptor<T>>, ordinal: usize) -> Self {
        Self {
            source: MappingSource::new(field, ordinal),
            destination: MappingDestination::new(),
            should_map: true,
        }
    }

    pub fn source(&self) -> &MappingSource<T> {
        &self.source
    }

    pub fn destination(&self) -> &MappingDestination {
        &self.destination
    }

    pub fn destination_mut(&mut self) -> &mut MappingDestination {
        &mut self.destination
    }

    /// False for fields carried through discovery but left out of the column mappings
    pub fn should_map(&self) -> bool {
        self.should_map
    }

    pub fn set_should_map(&mut self, should_map: bool) {
        self.should_map = should_map;
    }

    /// Column mapping handed to the bulk sink: by name when one is set, by ordinal otherwise
    pub fn to_column_mapping(&self) -> Result<ColumnMapping> {
        let destination = match self.destination.column_name.as_deref() {
            Some(name) if !name.trim().is_empty() => ColumnTarget::Name(name.to_owned()),
            _ => ColumnTarget::Ordinal(self.destination.column_ordinal()?),
        };
        Ok(ColumnMapping {
            source_ordinal: self.source.ordinal(),
            destination,
        })
    }
}

impl<T> Clone for PropertyMapping<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            destination: self.destination.clone(),
            should_map: self.should_map,
        }
    }
}

impl<T> fmt::Debug for PropertyMapping<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyMapping")
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("should_map", &self.should_map)
            .finish()
    }
}

/// Where a source ordinal lands in the destination table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnTarget {
    Name(String),
    Ordinal(usize),
}

/// Source ordinal to destination column pair, as configured on the bulk sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub source_ordinal: usize,
    pub destination: ColumnTarget,
}

impl ColumnMapping {
    pub fn by_name(source_ordinal: usize, name: impl Into<String>) -> Self {
        Self {
            source_ordinal,
            destination: ColumnTarget::Name(name.into()),
        }
    }

    pub fn by_ordinal(source_ordinal: usize, ordinal: usize) -> Self {
        Self {
            source_ordinal,
            destination: ColumnTarget::Ordinal(ordinal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordDescriptor;
    use crate::ErrorKind;

    struct Row {
        a: i32,
    }

    fn mapping() -> PropertyMapping<Row> {
        let d = RecordDescriptor::new().field("a", |r: &Row| r.a);
        PropertyMapping::new(Arc::clone(&d.fields()[0]), 0)
    }

    #[test]
    fn unset_slots_fail_fast() {
        let m = mapping();
        let err = m.destination().column_size().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);
        assert!(err.to_string().contains("column size"));
        assert!(!m.destination().is_resolved());
        assert!(!m.destination().is_key_or_default());
    }

    #[test]
    fn slots_are_tracked_independently() {
        let mut m = mapping();
        m.destination_mut().set_column_size(0);
        assert!(m.destination().is_set(MappingProperty::ColumnSize));
        assert!(!m.destination().is_set(MappingProperty::ColumnName));
        assert_eq!(m.destination().column_size().unwrap(), 0);

        m.destination_mut().set_column_name("A");
        m.destination_mut().set_column_ordinal(0);
        m.destination_mut().set_data_type_name("int");
        m.destination_mut().set_is_key(false);
        assert!(m.destination().is_resolved());
    }

    #[test]
    fn column_mapping_prefers_name() {
        let mut m = mapping();
        assert!(m.to_column_mapping().is_err());

        m.destination_mut().set_column_ordinal(3);
        assert_eq!(m.to_column_mapping().unwrap(), ColumnMapping::by_ordinal(0, 3));

        m.destination_mut().set_column_name("   ");
        assert_eq!(m.to_column_mapping().unwrap(), ColumnMapping::by_ordinal(0, 3));

        m.destination_mut().set_column_name("Alpha");
        assert_eq!(m.to_column_mapping().unwrap(), ColumnMapping::by_name(0, "Alpha"));
    }
}
