//! Record and field descriptors
//!
//! Rust has no runtime reflection, so record types describe themselves: a
//! [`Record`] returns a [`RecordDescriptor`] listing each field's name, kind,
//! column annotations and a read closure. Everything downstream (mapping
//! builder, accessor cache, cursor) works from these descriptors.
//!
//! ```rust
//! use bw_core::{FieldAttributes, Record, RecordDescriptor};
//!
//! struct Customer {
//!     id: i32,
//!     name: String,
//!     tags: Vec<String>,
//! }
//!
//! impl Record for Customer {
//!     fn descriptor() -> RecordDescriptor<Self> {
//!         RecordDescriptor::new()
//!             .table("Customers")
//!             .field_with("id", |c: &Customer| c.id, FieldAttributes::new().key())
//!             .field("name", |c: &Customer| c.name.clone())
//!             .collection("tags", |c: &Customer| c.tags.clone())
//!     }
//! }
//! ```

use arcstr::ArcStr;
use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use crate::value::{ColumnValue, FieldKind, Value};

/// Type-erased read closure for one field
pub type ReadFn<T> = Arc<dyn Fn(&T) -> Value + Send + Sync>;

/// Identity of the type a field is declared on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerType {
    id: TypeId,
    name: &'static str,
}

impl OwnerType {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type name without module path or generic arguments (`app::model::Order<u8>` -> `Order`)
    pub fn short_name(&self) -> &'static str {
        let base = self.name.split('<').next().unwrap_or(self.name);
        base.rsplit("::").next().unwrap_or(base)
    }
}

/// Column annotations attached to a field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldAttributes {
    pub column_name: Option<String>,
    /// Destination column order; negative means "not specified"
    pub column_order: Option<i32>,
    pub column_type_name: Option<String>,
    pub not_mapped: bool,
    pub key: bool,
    pub max_length: Option<usize>,
}

impl FieldAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.column_name = Some(name.into());
        self
    }

    pub fn order(mut self, order: i32) -> Self {
        self.column_order = Some(order);
        self
    }

    pub fn type_name(mut self, type_name: impl Into<String>) -> Self {
        self.column_type_name = Some(type_name.into());
        self
    }

    pub fn not_mapped(mut self) -> Self {
        self.not_mapped = true;
        self
    }

    pub fn key(mut self) -> Self {
        self.key = true;
        self
    }

    pub fn max_length(mut self, length: usize) -> Self {
        self.max_length = Some(length);
        self
    }
}

/// One named, typed field on a record type
pub struct FieldDescriptor<T> {
    name: ArcStr,
    owner: Option<OwnerType>,
    kind: FieldKind,
    attributes: FieldAttributes,
    read: ReadFn<T>,
}

impl<T: 'static> FieldDescriptor<T> {
    /// Creates a free-standing field. It gains an owner once added to a [`RecordDescriptor`].
    pub fn new<V, F>(name: &str, read: F) -> Self
    where
        V: ColumnValue,
        F: Fn(&T) -> V + Send + Sync + 'static,
    {
        Self {
            name: ArcStr::from(name),
            owner: None,
            kind: V::KIND,
            attributes: FieldAttributes::default(),
            read: Arc::new(move |record: &T| read(record).into_value()),
        }
    }

    /// Creates a multi-valued field, surfaced as [`Value::Array`] when mapped
    pub fn collection<V, F>(name: &str, read: F) -> Self
    where
        V: ColumnValue,
        F: Fn(&T) -> Vec<V> + Send + Sync + 'static,
    {
        Self {
            name: ArcStr::from(name),
            owner: None,
            kind: FieldKind::Collection,
            attributes: FieldAttributes::default(),
            read: Arc::new(move |record: &T| {
                Value::Array(read(record).into_iter().map(ColumnValue::into_value).collect())
            }),
        }
    }

    pub fn with_attributes(mut self, attributes: FieldAttributes) -> Self {
        self.attributes = attributes;
        self
    }
}

impl<T> FieldDescriptor<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn name_arc(&self) -> &ArcStr {
        &self.name
    }

    pub fn owner(&self) -> Option<OwnerType> {
        self.owner
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn attributes(&self) -> &FieldAttributes {
        &self.attributes
    }

    /// Collections are not flat columns and are skipped by automatic mapping
    pub fn is_auto_mappable(&self) -> bool {
        self.kind != FieldKind::Collection
    }

    pub(crate) fn read_fn(&self) -> &ReadFn<T> {
        &self.read
    }
}

impl<T> Clone for FieldDescriptor<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            owner: self.owner,
            kind: self.kind,
            attributes: self.attributes.clone(),
            read: Arc::clone(&self.read),
        }
    }
}

impl<T> fmt::Debug for FieldDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("owner", &self.owner.map(|o| o.name()))
            .field("kind", &self.kind)
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}

/// Table annotation on a record type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableAttribute {
    pub name: String,
    pub schema: Option<String>,
}

impl TableAttribute {
    /// `schema.name` when a schema is given, `name` otherwise
    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{schema}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// Ordered field list of a record type
pub struct RecordDescriptor<T> {
    owner: OwnerType,
    table: Option<TableAttribute>,
    fields: Vec<Arc<FieldDescriptor<T>>>,
}

impl<T: 'static> RecordDescriptor<T> {
    pub fn new() -> Self {
        Self {
            owner: OwnerType::of::<T>(),
            table: None,
            fields: Vec::new(),
        }
    }

    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.table = Some(TableAttribute {
            name: name.into(),
            schema: None,
        });
        self
    }

    pub fn table_in_schema(mut self, schema: impl Into<String>, name: impl Into<String>) -> Self {
        self.table = Some(TableAttribute {
            name: name.into(),
            schema: Some(schema.into()),
        });
        self
    }

    pub fn field<V, F>(self, name: &str, read: F) -> Self
    where
        V: ColumnValue,
        F: Fn(&T) -> V + Send + Sync + 'static,
    {
        self.add(FieldDescriptor::new(name, read))
    }

    pub fn field_with<V, F>(self, name: &str, read: F, attributes: FieldAttributes) -> Self
    where
        V: ColumnValue,
        F: Fn(&T) -> V + Send + Sync + 'static,
    {
        self.add(FieldDescriptor::new(name, read).with_attributes(attributes))
    }

    pub fn collection<V, F>(self, name: &str, read: F) -> Self
    where
        V: ColumnValue,
        F: Fn(&T) -> Vec<V> + Send + Sync + 'static,
    {
        self.add(FieldDescriptor::collection(name, read))
    }

    /// Declares `field` on this type. A field with the same name replaces the earlier one in place.
    pub fn add(mut self, mut field: FieldDescriptor<T>) -> Self {
        field.owner = Some(self.owner);
        let field = Arc::new(field);
        match self.fields.iter().position(|f| f.name() == field.name()) {
            Some(index) => self.fields[index] = field,
            None => self.fields.push(field),
        }
        self
    }
}

impl<T> RecordDescriptor<T> {
    pub fn owner(&self) -> OwnerType {
        self.owner
    }

    pub fn table_attribute(&self) -> Option<&TableAttribute> {
        self.table.as_ref()
    }

    /// Fields in declaration order
    pub fn fields(&self) -> &[Arc<FieldDescriptor<T>>] {
        &self.fields
    }

    pub fn find(&self, name: &str) -> Option<&Arc<FieldDescriptor<T>>> {
        self.fields.iter().find(|f| f.name() == name)
    }
}

impl<T: 'static> Default for RecordDescriptor<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A type whose values can be streamed into a bulk sink
pub trait Record: Send + Sized + 'static {
    fn descriptor() -> RecordDescriptor<Self>;
}
