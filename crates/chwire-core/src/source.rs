//! Bounded-pull column sources.
//!
//! The writer only sees [`ColumnSource`]; every concrete input shape (owned
//! vectors, borrowed slices, iterators, fallible iterators, UTF-16 text,
//! async streams) implements it once.

use chwire_error::{ChError, Result};
use chwire_types::{Cx, Value};
use futures::executor::block_on;
use futures::{Stream, StreamExt};

/// Pull-based producer of one column's values.
pub trait ColumnSource {
    /// The next value, or `None` once the source is exhausted.
    fn pull(&mut self, cx: &Cx) -> Result<Option<Value>>;

    /// Remaining values, when known.
    fn len_hint(&self) -> Option<usize> {
        None
    }
}

/// Owned values.
#[derive(Debug, Clone)]
pub struct VecSource {
    values: std::vec::IntoIter<Value>,
}

impl VecSource {
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values: values.into_iter(),
        }
    }
}

impl<V: Into<Value>> FromIterator<V> for VecSource {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Into::into).collect())
    }
}

impl ColumnSource for VecSource {
    fn pull(&mut self, _cx: &Cx) -> Result<Option<Value>> {
        Ok(self.values.next())
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.values.len())
    }
}

/// Borrowed slice of primitives.
#[derive(Debug, Clone)]
pub struct SliceSource<'a, T> {
    items: &'a [T],
    pos: usize,
}

impl<'a, T> SliceSource<'a, T> {
    #[must_use]
    pub const fn new(items: &'a [T]) -> Self {
        Self { items, pos: 0 }
    }
}

impl<T: Copy + Into<Value>> ColumnSource for SliceSource<'_, T> {
    fn pull(&mut self, _cx: &Cx) -> Result<Option<Value>> {
        let item = self.items.get(self.pos).copied();
        if item.is_some() {
            self.pos += 1;
        }
        Ok(item.map(Into::into))
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.items.len() - self.pos)
    }
}

/// Infallible iterator.
#[derive(Debug, Clone)]
pub struct IterSource<I> {
    iter: I,
}

impl<I> IterSource<I> {
    pub const fn new(iter: I) -> Self {
        Self { iter }
    }
}

impl<I, V> ColumnSource for IterSource<I>
where
    I: Iterator<Item = V>,
    V: Into<Value>,
{
    fn pull(&mut self, _cx: &Cx) -> Result<Option<Value>> {
        Ok(self.iter.next().map(Into::into))
    }

    fn len_hint(&self) -> Option<usize> {
        match self.iter.size_hint() {
            (low, Some(high)) if low == high => Some(low),
            _ => None,
        }
    }
}

/// Fallible iterator; an `Err` item fails the row it would have filled.
#[derive(Debug, Clone)]
pub struct TryIterSource<I> {
    iter: I,
    row: usize,
}

impl<I> TryIterSource<I> {
    pub const fn new(iter: I) -> Self {
        Self { iter, row: 0 }
    }
}

impl<I, V, E> ColumnSource for TryIterSource<I>
where
    I: Iterator<Item = std::result::Result<V, E>>,
    V: Into<Value>,
    E: std::fmt::Display,
{
    fn pull(&mut self, _cx: &Cx) -> Result<Option<Value>> {
        match self.iter.next() {
            None => Ok(None),
            Some(Ok(value)) => {
                self.row += 1;
                Ok(Some(value.into()))
            }
            Some(Err(e)) => Err(ChError::source_failed(self.row, e)),
        }
    }
}

/// UTF-16 text, transcoded to UTF-8 strings.
#[derive(Debug, Clone)]
pub struct Utf16Source<'a> {
    items: &'a [&'a [u16]],
    pos: usize,
}

impl<'a> Utf16Source<'a> {
    #[must_use]
    pub const fn new(items: &'a [&'a [u16]]) -> Self {
        Self { items, pos: 0 }
    }
}

impl ColumnSource for Utf16Source<'_> {
    fn pull(&mut self, _cx: &Cx) -> Result<Option<Value>> {
        let Some(units) = self.items.get(self.pos) else {
            return Ok(None);
        };
        let text = String::from_utf16(units)
            .map_err(|e| ChError::source_failed(self.pos, format!("invalid UTF-16: {e}")))?;
        self.pos += 1;
        Ok(Some(Value::String(text.into_bytes())))
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.items.len() - self.pos)
    }
}

/// Asynchronous stream, polled to completion one item per pull.
///
/// Each pull is a suspension point and checks for cancellation first.
pub struct StreamSource<S> {
    stream: S,
}

impl<S> StreamSource<S> {
    pub const fn new(stream: S) -> Self {
        Self { stream }
    }
}

impl<S, V> ColumnSource for StreamSource<S>
where
    S: Stream<Item = V> + Unpin,
    V: Into<Value>,
{
    fn pull(&mut self, cx: &Cx) -> Result<Option<Value>> {
        cx.checkpoint()?;
        Ok(block_on(self.stream.next()).map(Into::into))
    }

    fn len_hint(&self) -> Option<usize> {
        match self.stream.size_hint() {
            (low, Some(high)) if low == high => Some(low),
            _ => None,
        }
    }
}

impl<T: ColumnSource + ?Sized> ColumnSource for Box<T> {
    fn pull(&mut self, cx: &Cx) -> Result<Option<Value>> {
        (**self).pull(cx)
    }

    fn len_hint(&self) -> Option<usize> {
        (**self).len_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(source: &mut dyn ColumnSource) -> Result<Vec<Value>> {
        let cx = Cx::new();
        let mut out = Vec::new();
        while let Some(value) = source.pull(&cx)? {
            out.push(value);
        }
        Ok(out)
    }

    #[test]
    fn slice_and_vec_sources() {
        let ints = [1u32, 2, 3];
        let mut slice = SliceSource::new(&ints);
        assert_eq!(slice.len_hint(), Some(3));
        assert_eq!(
            drain(&mut slice).expect("drain"),
            vec![Value::UInt32(1), Value::UInt32(2), Value::UInt32(3)]
        );
        let mut owned: VecSource = ["a", "b"].into_iter().collect();
        assert_eq!(owned.len_hint(), Some(2));
        assert_eq!(drain(&mut owned).expect("drain").len(), 2);
    }

    #[test]
    fn try_iter_reports_failing_row() {
        let items: Vec<std::result::Result<i64, String>> =
            vec![Ok(1), Ok(2), Err("disk read failed".into())];
        let mut source = TryIterSource::new(items.into_iter());
        let err = drain(&mut source).unwrap_err();
        assert!(matches!(err, ChError::Source { row: 2, .. }), "{err:?}");
    }

    #[test]
    fn utf16_is_transcoded() {
        let hello: Vec<u16> = "héllo".encode_utf16().collect();
        let bad = [0xd800u16];
        let items: [&[u16]; 2] = [&hello, &bad];
        let mut source = Utf16Source::new(&items);
        let cx = Cx::new();
        assert_eq!(
            source.pull(&cx).expect("first"),
            Some(Value::String("héllo".as_bytes().to_vec()))
        );
        assert!(source.pull(&cx).is_err());
    }

    #[test]
    fn stream_source_pulls_and_observes_cancellation() {
        let mut source = StreamSource::new(futures::stream::iter(vec![1i8, 2]));
        let cx = Cx::new();
        assert_eq!(source.pull(&cx).expect("pull"), Some(Value::Int8(1)));
        cx.cancel();
        assert!(matches!(source.pull(&cx), Err(ChError::Cancelled)));
    }

    #[test]
    fn iter_source_hint() {
        let source = IterSource::new((0..5u8).map(Value::UInt8));
        assert_eq!(source.len_hint(), Some(5));
    }
}
