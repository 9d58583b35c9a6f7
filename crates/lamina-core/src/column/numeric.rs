//! Chunked numeric columns, monomorphized over a primitive parameter.

use std::sync::Arc;

use parking_lot::RwLock;

use super::{fold_fill, FillOp, Value};
use crate::bitmap::{chunk_of, local_of, Bitmap, CHUNK_SIZE};
use crate::commit::{Buffer, Op, Reader};

/// Caller-supplied merge reducer for a numeric column.
pub(crate) type MergeFn<T> = Arc<dyn Fn(T, T) -> T + Send + Sync>;

/// A fixed-width primitive storable in a numeric column.
pub(crate) trait Primitive: Copy + Default + Send + Sync + 'static {
    /// Appends a record carrying this value.
    fn push(buf: &mut Buffer, op: Op, idx: u32, v: Self);
    /// Decodes the current reader payload.
    fn read(r: &Reader<'_>) -> Self;
    /// Overwrites the current reader payload in place.
    fn swap(r: &mut Reader<'_>, v: Self);
    /// Default merge: additive (wrapping for integers).
    fn combine(a: Self, b: Self) -> Self;
    /// Wraps the value for dynamic reads.
    fn to_value(self) -> Value;
}

macro_rules! primitive {
    ($($ty:ty, $push:ident, $get:ident, $swap:ident, $comb:expr, $val:expr;)*) => {
        $(
            impl Primitive for $ty {
                fn push(buf: &mut Buffer, op: Op, idx: u32, v: Self) {
                    buf.$push(op, idx, v);
                }
                fn read(r: &Reader<'_>) -> Self {
                    r.$get()
                }
                fn swap(r: &mut Reader<'_>, v: Self) {
                    r.$swap(v);
                }
                fn combine(a: Self, b: Self) -> Self {
                    ($comb)(a, b)
                }
                fn to_value(self) -> Value {
                    ($val)(self)
                }
            }
        )*
    };
}

primitive! {
    i16, push_i16, i16_value, swap_i16, i16::wrapping_add, |v| Value::Int(i64::from(v));
    i32, push_i32, i32_value, swap_i32, i32::wrapping_add, |v| Value::Int(i64::from(v));
    i64, push_i64, i64_value, swap_i64, i64::wrapping_add, Value::Int;
    u16, push_u16, u16_value, swap_u16, u16::wrapping_add, |v| Value::Uint(u64::from(v));
    u32, push_u32, u32_value, swap_u32, u32::wrapping_add, |v| Value::Uint(u64::from(v));
    u64, push_u64, u64_value, swap_u64, u64::wrapping_add, Value::Uint;
    f32, push_f32, f32_value, swap_f32, |a, b| a + b, |v| Value::Float(f64::from(v));
    f64, push_f64, f64_value, swap_f64, |a, b| a + b, Value::Float;
}

/// One 16 384-row partition of a numeric column: a chunk-local fill bitmap
/// plus a dense data array.
struct Slice<T> {
    fill: Bitmap,
    data: Vec<T>,
}

impl<T: Primitive> Slice<T> {
    fn new() -> Self {
        Self {
            fill: Bitmap::with_capacity(CHUNK_SIZE),
            data: vec![T::default(); CHUNK_SIZE as usize],
        }
    }
}

/// A chunked `(fill, data)` column over a numeric primitive.
///
/// The internal lock only serializes chunk allocation against reads; data
/// writes are already serialized per chunk by the collection's chunk locks.
pub(crate) struct NumericColumn<T: Primitive> {
    chunks: RwLock<Vec<Option<Box<Slice<T>>>>>,
    merge: Option<MergeFn<T>>,
}

impl<T: Primitive> NumericColumn<T> {
    pub(crate) fn new(merge: Option<MergeFn<T>>) -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
            merge,
        }
    }

    /// Ensures backing storage covers `idx`.
    pub(crate) fn grow(&self, idx: u32) {
        let chunk = chunk_of(idx) as usize;
        let mut chunks = self.chunks.write();
        if chunks.len() <= chunk {
            chunks.resize_with(chunk + 1, || None);
        }
        if chunks[chunk].is_none() {
            chunks[chunk] = Some(Box::new(Slice::new()));
        }
    }

    /// Replays a chunk-scoped commit stream into the column.
    ///
    /// Merge records are rewritten in place (`Reader::swap`) to carry the
    /// merged final, so computed indices applied afterwards observe it.
    pub(crate) fn apply(&self, chunk: u32, r: &mut Reader<'_>) {
        self.grow(chunk << crate::bitmap::CHUNK_SHIFT);
        let mut chunks = self.chunks.write();
        let slice = chunks[chunk as usize]
            .as_mut()
            .expect("chunk allocated by grow");
        while r.next() {
            let local = local_of(r.offset());
            match r.op() {
                Op::Put => {
                    slice.data[local as usize] = T::read(r);
                    slice.fill.set(local);
                }
                Op::Merge => {
                    let delta = T::read(r);
                    let current = if slice.fill.contains(local) {
                        slice.data[local as usize]
                    } else {
                        T::default()
                    };
                    let merged = match &self.merge {
                        Some(f) => f(current, delta),
                        None => T::combine(current, delta),
                    };
                    slice.data[local as usize] = merged;
                    slice.fill.set(local);
                    T::swap(r, merged);
                }
                Op::Delete | Op::PutFalse => slice.fill.unset(local),
                Op::PutTrue => {}
            }
        }
    }

    /// Writes `v` at `idx` directly; used by the primary-key wrapper.
    pub(crate) fn put(&self, idx: u32, v: T) {
        self.grow(idx);
        let mut chunks = self.chunks.write();
        let slice = chunks[chunk_of(idx) as usize]
            .as_mut()
            .expect("chunk allocated by grow");
        slice.data[local_of(idx) as usize] = v;
        slice.fill.set(local_of(idx));
    }

    /// Clears the fill bit at `idx`; the data slot is unreachable after.
    pub(crate) fn delete(&self, idx: u32) {
        let mut chunks = self.chunks.write();
        if let Some(Some(slice)) = chunks.get_mut(chunk_of(idx) as usize) {
            slice.fill.unset(local_of(idx));
        }
    }

    pub(crate) fn value(&self, idx: u32) -> Option<T> {
        let chunks = self.chunks.read();
        let slice = chunks.get(chunk_of(idx) as usize)?.as_ref()?;
        let local = local_of(idx);
        slice
            .fill
            .contains(local)
            .then(|| slice.data[local as usize])
    }

    pub(crate) fn contains(&self, idx: u32) -> bool {
        self.value(idx).is_some()
    }

    pub(crate) fn fill_into(&self, op: FillOp, chunk: u32, sel: &mut Bitmap) {
        let chunks = self.chunks.read();
        let words = chunks
            .get(chunk as usize)
            .and_then(Option::as_ref)
            .map(|s| s.fill.words());
        fold_fill(op, chunk, sel, words);
    }

    /// Intersects `sel`'s chunk with the fill, then retains only positions
    /// whose value satisfies `pred`.
    pub(crate) fn filter(&self, chunk: u32, sel: &mut Bitmap, pred: impl Fn(T) -> bool) {
        let chunks = self.chunks.read();
        let Some(slice) = chunks.get(chunk as usize).and_then(Option::as_ref) else {
            fold_fill(FillOp::And, chunk, sel, None);
            return;
        };
        fold_fill(FillOp::And, chunk, sel, Some(slice.fill.words()));
        sel.filter_chunk(chunk, |idx| pred(slice.data[local_of(idx) as usize]));
    }

    pub(crate) fn snapshot(&self, chunk: u32, buf: &mut Buffer) {
        let chunks = self.chunks.read();
        let Some(slice) = chunks.get(chunk as usize).and_then(Option::as_ref) else {
            return;
        };
        let base = chunk << crate::bitmap::CHUNK_SHIFT;
        slice.fill.range(|local| {
            T::push(buf, Op::Put, base + local, slice.data[local as usize]);
        });
    }
}
