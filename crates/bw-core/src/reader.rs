//! Streaming tabular cursor
//!
//! [`RecordReader`] is the adapter between an arbitrary sequence of records and
//! the pull-based, single-row, ordinal-addressed cursor a bulk sink consumes.
//! The iterator is created on the first [`DataReader::read`] and only the
//! current record is held, so unbounded sequences stream in constant memory.

use arcstr::ArcStr;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::accessor::{value_getter, GetValue};
use crate::mapping::PropertyMapping;
use crate::value::Value;
use crate::{BulkWriterError, Result};

/// Forward-only, read-only row cursor
///
/// Column ordinals are the source ordinals of the mappings the cursor was
/// built from. Every method fails with [`BulkWriterError::Disposed`] once the
/// cursor has been closed.
pub trait DataReader: Send {
    /// Advances to the next row; false once the sequence is exhausted
    fn read(&mut self) -> Result<bool>;

    fn field_count(&self) -> Result<usize>;

    fn get_ordinal(&self, name: &str) -> Result<usize>;

    /// Source field name of the column at `ordinal`
    fn get_name(&self, ordinal: usize) -> Result<&str>;

    fn get_value(&self, ordinal: usize) -> Result<Value>;

    fn is_null(&self, ordinal: usize) -> Result<bool> {
        Ok(self.get_value(ordinal)?.is_null())
    }

    /// Text form of the value, `None` for null
    fn get_string(&self, ordinal: usize) -> Result<Option<String>> {
        Ok(match self.get_value(ordinal)? {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        })
    }

    /// Copies one page of a binary value into `buffer[buffer_offset..]`
    ///
    /// `field_offset` is aligned down to a multiple of `length`. Returns the
    /// number of bytes copied, which is 0 once the offset reaches the end of
    /// the value and for null values. Callers page through a value by raising
    /// `field_offset` until fewer than `length` bytes come back.
    fn get_bytes(
        &mut self,
        ordinal: usize,
        field_offset: usize,
        buffer: &mut [u8],
        buffer_offset: usize,
        length: usize,
    ) -> Result<usize>;

    fn is_closed(&self) -> bool;

    /// Releases the underlying iterator. Closing twice is a no-op.
    fn close(&mut self);
}

/// Position of a [`RecordReader`] in its sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    NotStarted,
    Positioned,
    Exhausted,
}

struct Column<T> {
    name: ArcStr,
    getter: Arc<dyn GetValue<T>>,
}

type CancelCheck = Box<dyn Fn() -> bool + Send>;

/// [`DataReader`] over any `IntoIterator` of records
pub struct RecordReader<T, I: IntoIterator<Item = T>> {
    source: Option<I>,
    iter: Option<I::IntoIter>,
    current: Option<T>,
    state: ReaderState,
    closed: bool,
    columns: BTreeMap<usize, Column<T>>,
    ordinals: HashMap<ArcStr, usize>,
    // value of the current row being paged out by get_bytes
    paged: Option<(usize, Value)>,
    cancelled: Option<CancelCheck>,
}

impl<T: 'static, I: IntoIterator<Item = T>> RecordReader<T, I> {
    /// Builds a cursor exposing `mappings`, resolving each field's accessor up front
    ///
    /// Duplicate source ordinals or field names are rejected.
    pub fn new(items: I, mappings: Vec<PropertyMapping<T>>) -> Result<Self> {
        let mut reader = Self {
            source: Some(items),
            iter: None,
            current: None,
            state: ReaderState::NotStarted,
            closed: false,
            columns: BTreeMap::new(),
            ordinals: HashMap::new(),
            paged: None,
            cancelled: None,
        };
        for mapping in mappings {
            let field = mapping.source().field();
            let getter = value_getter(field)?;
            reader.insert_column(
                mapping.source().ordinal(),
                field.name_arc().clone(),
                Arc::new(getter),
            )?;
        }
        Ok(reader)
    }

    /// Adds a computed column, for instance a [`crate::ConstantGetter`]
    pub fn with_column(
        mut self,
        ordinal: usize,
        name: &str,
        getter: impl GetValue<T> + 'static,
    ) -> Result<Self> {
        self.insert_column(ordinal, ArcStr::from(name), Arc::new(getter))?;
        Ok(self)
    }

    fn insert_column(
        &mut self,
        ordinal: usize,
        name: ArcStr,
        getter: Arc<dyn GetValue<T>>,
    ) -> Result<()> {
        if self.columns.contains_key(&ordinal) {
            return Err(BulkWriterError::argument(
                "mappings",
                format!("source ordinal {ordinal} is mapped twice"),
            ));
        }
        if self.ordinals.contains_key(&name) {
            return Err(BulkWriterError::argument(
                "mappings",
                format!("field `{name}` is mapped twice"),
            ));
        }
        self.ordinals.insert(name.clone(), ordinal);
        self.columns.insert(ordinal, Column { name, getter });
        Ok(())
    }
}

impl<T, I: IntoIterator<Item = T>> RecordReader<T, I> {
    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Makes `read` fail with [`BulkWriterError::Cancelled`] once `is_cancelled`
    /// returns true, including when the sequence ran out because of it
    pub fn with_cancellation(mut self, is_cancelled: impl Fn() -> bool + Send + 'static) -> Self {
        self.cancelled = Some(Box::new(is_cancelled));
        self
    }

    /// Source ordinals in ascending order
    pub fn ordinals(&self) -> impl Iterator<Item = usize> + '_ {
        self.columns.keys().copied()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(BulkWriterError::Disposed("data reader"));
        }
        Ok(())
    }

    fn ensure_not_cancelled(&self) -> Result<()> {
        match &self.cancelled {
            Some(is_cancelled) if is_cancelled() => Err(BulkWriterError::Cancelled),
            _ => Ok(()),
        }
    }

    fn column(&self, ordinal: usize) -> Result<&Column<T>> {
        self.columns.get(&ordinal).ok_or_else(|| {
            BulkWriterError::invalid_operation(format!("no field is mapped to ordinal {ordinal}"))
        })
    }

    fn current(&self) -> Result<&T> {
        match (&self.state, &self.current) {
            (ReaderState::Positioned, Some(record)) => Ok(record),
            (ReaderState::NotStarted, _) => Err(BulkWriterError::invalid_operation(
                "read has not been called on the data reader",
            )),
            _ => Err(BulkWriterError::invalid_operation(
                "the data reader has no current row",
            )),
        }
    }
}

impl<T, I> DataReader for RecordReader<T, I>
where
    T: Send,
    I: IntoIterator<Item = T> + Send,
    I::IntoIter: Send,
{
    fn read(&mut self) -> Result<bool> {
        self.ensure_open()?;
        self.ensure_not_cancelled()?;
        if self.state == ReaderState::Exhausted {
            return Ok(false);
        }
        if self.iter.is_none() {
            self.iter = self.source.take().map(IntoIterator::into_iter);
        }
        self.paged = None;
        self.current = self.iter.as_mut().and_then(Iterator::next);
        if self.current.is_some() {
            self.state = ReaderState::Positioned;
            Ok(true)
        } else {
            self.state = ReaderState::Exhausted;
            self.iter = None;
            self.ensure_not_cancelled()?;
            Ok(false)
        }
    }

    fn field_count(&self) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.columns.len())
    }

    fn get_ordinal(&self, name: &str) -> Result<usize> {
        self.ensure_open()?;
        self.ordinals.get(name).copied().ok_or_else(|| {
            BulkWriterError::invalid_operation(format!("no mapped field is named `{name}`"))
        })
    }

    fn get_name(&self, ordinal: usize) -> Result<&str> {
        self.ensure_open()?;
        Ok(self.column(ordinal)?.name.as_str())
    }

    fn get_value(&self, ordinal: usize) -> Result<Value> {
        self.ensure_open()?;
        let column = self.column(ordinal)?;
        let record = self.current()?;
        Ok(column.getter.get_value(record))
    }

    fn get_bytes(
        &mut self,
        ordinal: usize,
        field_offset: usize,
        buffer: &mut [u8],
        buffer_offset: usize,
        length: usize,
    ) -> Result<usize> {
        self.ensure_open()?;
        if buffer_offset.saturating_add(length) > buffer.len() {
            return Err(BulkWriterError::argument(
                "buffer",
                format!(
                    "buffer of {} bytes cannot hold {length} bytes at offset {buffer_offset}",
                    buffer.len()
                ),
            ));
        }

        let cached = matches!(&self.paged, Some((paged, _)) if *paged == ordinal);
        if !cached {
            let value = self.get_value(ordinal)?;
            self.paged = Some((ordinal, value));
        }
        let bytes = match &self.paged {
            Some((_, Value::Bytes(bytes))) => bytes,
            Some((_, Value::Null)) | None => return Ok(0),
            Some((_, other)) => {
                return Err(BulkWriterError::invalid_operation(format!(
                    "field `{}` holds {} rather than binary data",
                    self.column(ordinal)?.name,
                    other.type_name()
                )))
            }
        };

        if length == 0 {
            return Ok(0);
        }
        let start = field_offset - field_offset % length;
        if start >= bytes.len() {
            return Ok(0);
        }
        let end = (start + length).min(bytes.len());
        let copied = end - start;
        buffer[buffer_offset..buffer_offset + copied].copy_from_slice(&bytes[start..end]);
        Ok(copied)
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) {
        self.closed = true;
        self.source = None;
        self.iter = None;
        self.current = None;
        self.paged = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::ConstantGetter;
    use crate::builder::MapBuilder;
    use crate::record::{Record, RecordDescriptor};
    use crate::ErrorKind;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Pair {
        a: i32,
        b: Option<String>,
    }

    impl Record for Pair {
        fn descriptor() -> RecordDescriptor<Self> {
            RecordDescriptor::new()
                .field("a", |p: &Pair| p.a)
                .field("b", |p: &Pair| p.b.clone())
        }
    }

    struct Blob {
        data: Option<Vec<u8>>,
        label: String,
    }

    impl Record for Blob {
        fn descriptor() -> RecordDescriptor<Self> {
            RecordDescriptor::new()
                .field("data", |b: &Blob| b.data.clone())
                .field("label", |b: &Blob| b.label.clone())
        }
    }

    fn pairs() -> Vec<Pair> {
        (1..=3)
            .map(|a| Pair {
                a,
                b: (a != 2).then(|| format!("row{a}")),
            })
            .collect()
    }

    fn reader<I: IntoIterator<Item = Pair>>(items: I) -> RecordReader<Pair, I> {
        RecordReader::new(items, MapBuilder::build_from_annotations::<Pair>()).unwrap()
    }

    #[test]
    fn walks_three_rows_by_two_columns() {
        let mut r = reader(pairs());
        assert_eq!(r.field_count().unwrap(), 2);
        assert_eq!(r.get_ordinal("b").unwrap(), 1);
        assert_eq!(r.get_name(0).unwrap(), "a");

        let mut seen = Vec::new();
        while r.read().unwrap() {
            seen.push((r.get_value(0).unwrap(), r.get_string(1).unwrap()));
        }
        assert_eq!(
            seen,
            vec![
                (Value::Int32(1), Some("row1".to_owned())),
                (Value::Int32(2), None),
                (Value::Int32(3), Some("row3".to_owned())),
            ]
        );
        assert_eq!(r.state(), ReaderState::Exhausted);
        assert!(!r.read().unwrap());
    }

    #[test]
    fn no_current_row_outside_the_sequence() {
        let mut r = reader(pairs());
        assert_eq!(
            r.get_value(0).unwrap_err().kind(),
            ErrorKind::InvalidOperation
        );
        while r.read().unwrap() {}
        assert_eq!(
            r.get_value(0).unwrap_err().kind(),
            ErrorKind::InvalidOperation
        );
    }

    #[test]
    fn unknown_names_and_ordinals() {
        let mut r = reader(pairs());
        assert!(r.read().unwrap());
        assert_eq!(
            r.get_ordinal("c").unwrap_err().kind(),
            ErrorKind::InvalidOperation
        );
        assert_eq!(
            r.get_value(7).unwrap_err().kind(),
            ErrorKind::InvalidOperation
        );
        assert!(!r.is_null(0).unwrap());
    }

    #[test]
    fn iterator_is_created_lazily() {
        let created = Rc::new(Cell::new(false));
        let flag = Rc::clone(&created);
        let items = std::iter::once(()).flat_map(move |_| {
            flag.set(true);
            pairs()
        });
        // Rc is not Send, so drive the inherent state only
        let r = RecordReader::new(items, MapBuilder::build_from_annotations::<Pair>()).unwrap();
        assert!(!created.get());
        assert_eq!(r.state(), ReaderState::NotStarted);
    }

    #[test]
    fn closed_reader_rejects_every_call() {
        let mut r = reader(pairs());
        assert!(r.read().unwrap());
        r.close();
        r.close();
        assert!(r.is_closed());
        assert_eq!(r.read().unwrap_err().kind(), ErrorKind::Disposed);
        assert_eq!(r.field_count().unwrap_err().kind(), ErrorKind::Disposed);
        assert_eq!(r.get_value(0).unwrap_err().kind(), ErrorKind::Disposed);
        assert_eq!(r.get_ordinal("a").unwrap_err().kind(), ErrorKind::Disposed);
    }

    #[test]
    fn duplicate_ordinals_are_rejected() {
        let mut mappings = MapBuilder::build_from_annotations::<Pair>();
        let dup = mappings[0].clone();
        mappings.push(dup);
        let err = RecordReader::new(pairs(), mappings).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Argument);
    }

    #[test]
    fn cancellation_fails_the_next_read() {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let mut r = reader(pairs()).with_cancellation(move || flag.load(Ordering::SeqCst));
        assert!(r.read().unwrap());

        stop.store(true, Ordering::SeqCst);
        assert_eq!(r.read().unwrap_err().kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn sequence_cut_short_by_cancellation_is_not_a_clean_end() {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        // ends after one row, the way a cancelled queue does
        let items = pairs().into_iter().take_while(move |p| {
            if p.a == 2 {
                stop.store(true, Ordering::SeqCst);
            }
            p.a < 2
        });
        let mut r = reader(items).with_cancellation(move || flag.load(Ordering::SeqCst));
        assert!(r.read().unwrap());
        assert_eq!(r.read().unwrap_err().kind(), ErrorKind::Cancelled);
        assert_eq!(r.state(), ReaderState::Exhausted);
    }

    #[test]
    fn constant_columns_sit_next_to_fields() {
        let mut r = reader(pairs())
            .with_column(5, "batch", ConstantGetter(Value::from("b-1")))
            .unwrap();
        assert_eq!(r.ordinals().collect::<Vec<_>>(), vec![0, 1, 5]);
        assert!(r.read().unwrap());
        assert_eq!(r.get_string(5).unwrap().as_deref(), Some("b-1"));
    }

    fn page_through(len: usize, chunk: usize) -> (Vec<u8>, usize) {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let items = vec![Blob {
            data: Some(data.clone()),
            label: "x".into(),
        }];
        let mut r =
            RecordReader::new(items, MapBuilder::build_from_annotations::<Blob>()).unwrap();
        assert!(r.read().unwrap());

        let mut out = Vec::new();
        let mut buffer = vec![0u8; chunk];
        let mut calls = 0;
        loop {
            let n = r.get_bytes(0, out.len(), &mut buffer, 0, chunk).unwrap();
            calls += 1;
            out.extend_from_slice(&buffer[..n]);
            if n < chunk {
                break;
            }
        }
        assert_eq!(out, data);
        (out, calls)
    }

    #[test]
    fn get_bytes_pages_through_values() {
        const B: usize = 16;
        assert_eq!(page_through(0, B).1, 1);
        assert_eq!(page_through(B, B).1, 2);
        assert_eq!(page_through(B + 1, B).1, 2);
        assert_eq!(page_through(3 * B, B).1, 4);
    }

    #[test]
    fn get_bytes_aligns_offsets_and_checks_inputs() {
        let items = vec![
            Blob {
                data: Some((0u8..10).collect()),
                label: "x".into(),
            },
            Blob {
                data: None,
                label: "y".into(),
            },
        ];
        let mut r =
            RecordReader::new(items, MapBuilder::build_from_annotations::<Blob>()).unwrap();
        assert!(r.read().unwrap());

        let mut buffer = [0u8; 8];
        // offset 5 with pages of 4 restarts at byte 4
        assert_eq!(r.get_bytes(0, 5, &mut buffer, 2, 4).unwrap(), 4);
        assert_eq!(&buffer[2..6], &[4, 5, 6, 7]);
        assert_eq!(r.get_bytes(0, 12, &mut buffer, 0, 4).unwrap(), 0);

        let err = r.get_bytes(0, 0, &mut buffer, 6, 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);
        let err = r.get_bytes(1, 0, &mut buffer, 0, 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);

        assert!(r.read().unwrap());
        assert_eq!(r.get_bytes(0, 0, &mut buffer, 0, 4).unwrap(), 0);
    }
}
