//! Cached field accessors
//!
//! The first request for a field compiles a direct read closure and stores it
//! in a process-wide cache keyed by `(owner type, field name)`. Later requests
//! for the same field, from any thread, get the same `Arc` back. Accessors are
//! pure functions of the type and field, so one cache per process is enough.

use arcstr::ArcStr;
use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::trace;

use crate::record::FieldDescriptor;
use crate::value::Value;
use crate::{BulkWriterError, Result};

/// Compiled accessor for one field of `T`
pub type ValueGetter<T> = Arc<dyn Fn(&T) -> Value + Send + Sync>;

/// Anything that can produce a column value from a record
///
/// Field accessors and constant values are interchangeable wherever the
/// cursor needs a value.
pub trait GetValue<T>: Send + Sync {
    fn get_value(&self, record: &T) -> Value;
}

impl<T> GetValue<T> for ValueGetter<T> {
    fn get_value(&self, record: &T) -> Value {
        (**self)(record)
    }
}

/// Produces the same value for every record
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantGetter(pub Value);

impl<T> GetValue<T> for ConstantGetter {
    fn get_value(&self, _record: &T) -> Value {
        self.0.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FieldKey {
    owner: TypeId,
    field: ArcStr,
}

type Cache = HashMap<FieldKey, Arc<dyn Any + Send + Sync>>;

static CACHE: LazyLock<Mutex<Cache>> = LazyLock::new(|| Mutex::new(HashMap::new()));

/// Returns the cached accessor for `field`, compiling it on first use
///
/// Fails with [`BulkWriterError::Argument`] when the field was never declared
/// on a record type.
pub fn value_getter<T: 'static>(field: &FieldDescriptor<T>) -> Result<ValueGetter<T>> {
    let owner = field.owner().ok_or_else(|| {
        BulkWriterError::argument(
            "field",
            format!("field `{}` is not declared on a record type", field.name()),
        )
    })?;

    let key = FieldKey {
        owner: owner.id(),
        field: field.name_arc().clone(),
    };

    let mut cache = CACHE.lock();
    if let Some(getter) = cache
        .get(&key)
        .and_then(|entry| entry.downcast_ref::<ValueGetter<T>>())
    {
        return Ok(Arc::clone(getter));
    }

    let getter = compile(field);
    trace!(owner = owner.name(), field = field.name(), "compiled field accessor");
    cache.insert(key, Arc::new(Arc::clone(&getter)));
    Ok(getter)
}

/// Number of accessors compiled so far in this process
pub fn cached_accessor_count() -> usize {
    CACHE.lock().len()
}

fn compile<T: 'static>(field: &FieldDescriptor<T>) -> ValueGetter<T> {
    let read = Arc::clone(field.read_fn());
    Arc::new(move |record: &T| read(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordDescriptor;
    use std::thread;

    struct Probe {
        id: i32,
        name: String,
    }

    fn descriptor() -> RecordDescriptor<Probe> {
        RecordDescriptor::new()
            .field("id", |p: &Probe| p.id)
            .field("name", |p: &Probe| p.name.clone())
    }

    #[test]
    fn second_lookup_returns_the_same_accessor() {
        let d = descriptor();
        let first = value_getter(&d.fields()[0]).unwrap();
        let second = value_getter(&d.fields()[0]).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        // a freshly built descriptor for the same type shares the cache entry
        let again = value_getter(&descriptor().fields()[0]).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
    }

    #[test]
    fn accessor_reads_the_field() {
        let d = descriptor();
        let getter = value_getter(&d.fields()[1]).unwrap();
        let probe = Probe {
            id: 1,
            name: "alice".into(),
        };
        assert_eq!(getter.get_value(&probe), Value::from("alice"));
        assert_eq!(ConstantGetter(Value::Int32(3)).get_value(&probe), Value::Int32(3));
    }

    #[test]
    fn detached_field_is_rejected() {
        let loose = FieldDescriptor::new("id", |p: &Probe| p.id);
        let err = value_getter(&loose).err().unwrap();
        assert!(matches!(err, BulkWriterError::Argument { .. }));
    }

    #[test]
    fn concurrent_first_use_yields_one_accessor() {
        struct Racer {
            v: u32,
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                thread::spawn(|| {
                    let d = RecordDescriptor::<Racer>::new().field("v", |r: &Racer| r.v);
                    value_getter(&d.fields()[0]).unwrap()
                })
            })
            .collect();
        let getters: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(getters.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(getters[0](&Racer { v: 4 }), Value::Int64(4));
    }
}
