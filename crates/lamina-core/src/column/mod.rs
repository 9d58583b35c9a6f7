//! Typed column containers.
//!
//! A column is a tagged variant with per-variant storage; dispatch is a
//! match on the tag rather than a trait object, and the numeric family is
//! monomorphized over a primitive parameter. Every variant implements the
//! same contract: `grow`, `apply` (consume a commit stream scoped to one
//! chunk), `value`/`contains`, a per-chunk fill view, and `snapshot`.

mod boolean;
mod computed;
mod dictionary;
mod key;
mod numeric;
mod string;


use std::sync::Arc;

use crate::bitmap::Bitmap;
use crate::commit::{Accessor, Buffer, Reader};

pub(crate) use boolean::BoolColumn;
pub(crate) use computed::{IndexColumn, TriggerColumn};
pub(crate) use dictionary::EnumColumn;
pub(crate) use key::KeyColumn;
pub(crate) use numeric::{MergeFn, NumericColumn, Primitive};
pub(crate) use string::{StrColumn, StrMergeFn};

/// A dynamically-typed value read out of a column.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Signed integer families (i16/i32/i64).
    Int(i64),
    /// Unsigned integer families (u16/u32/u64).
    Uint(u64),
    /// Float families (f32/f64).
    Float(f64),
    /// String and enum columns.
    Str(Arc<str>),
    /// Boolean columns.
    Bool(bool),
}

impl Value {
    /// The value as a signed integer, if it is one.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The value as a float, if it is one.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// The value as text, if it is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }
}

/// The kind of a column, used for schema idempotency and type checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ColumnKind {
    Bool,
    I16,
    I32,
    I64,
    U16,
    U32,
    U64,
    F32,
    F64,
    String,
    Enum,
    Key,
    Index,
    Trigger,
}

impl ColumnKind {
    /// Human-readable kind name for error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::String => "string",
            Self::Enum => "enum",
            Self::Key => "key",
            Self::Index => "index",
            Self::Trigger => "trigger",
        }
    }
}

/// Callback invoked by a trigger column, once per applied record.
pub type TriggerFn = Arc<dyn Fn(&dyn Accessor) + Send + Sync>;

/// Predicate evaluated by a computed index against the final value of a
/// record.
pub type IndexRule = Arc<dyn Fn(&dyn Accessor) -> bool + Send + Sync>;

enum SpecInner {
    Bool,
    I16(Option<MergeFn<i16>>),
    I32(Option<MergeFn<i32>>),
    I64(Option<MergeFn<i64>>),
    U16(Option<MergeFn<u16>>),
    U32(Option<MergeFn<u32>>),
    U64(Option<MergeFn<u64>>),
    F32(Option<MergeFn<f32>>),
    F64(Option<MergeFn<f64>>),
    Str(Option<StrMergeFn>),
    Enum,
    Key,
    Trigger(TriggerFn),
}

/// Describes a column to create.
///
/// Numeric kinds default to an additive merge reducer; the `*_with`
/// constructors install a caller-supplied reducer instead. Non-numeric
/// merges default to overwrite.
pub struct ColumnSpec {
    inner: SpecInner,
}

macro_rules! numeric_spec {
    ($($plain:ident, $with:ident, $variant:ident, $ty:ty;)*) => {
        impl ColumnSpec {
            $(
                /// A numeric column with the default additive merge.
                #[must_use]
                pub fn $plain() -> Self {
                    Self { inner: SpecInner::$variant(None) }
                }

                /// A numeric column with a caller-supplied merge reducer.
                #[must_use]
                pub fn $with(merge: impl Fn($ty, $ty) -> $ty + Send + Sync + 'static) -> Self {
                    Self { inner: SpecInner::$variant(Some(Arc::new(merge))) }
                }
            )*
        }
    };
}

numeric_spec! {
    i16, i16_with, I16, i16;
    i32, i32_with, I32, i32;
    i64, i64_with, I64, i64;
    u16, u16_with, U16, u16;
    u32, u32_with, U32, u32;
    u64, u64_with, U64, u64;
    f32, f32_with, F32, f32;
    f64, f64_with, F64, f64;
}

impl ColumnSpec {
    /// A boolean column; value storage is the fill bitmap itself.
    #[must_use]
    pub fn boolean() -> Self {
        Self {
            inner: SpecInner::Bool,
        }
    }

    /// A variable-length string column; merge defaults to overwrite.
    #[must_use]
    pub fn string() -> Self {
        Self {
            inner: SpecInner::Str(None),
        }
    }

    /// A string column with a caller-supplied merge (e.g. list append).
    #[must_use]
    pub fn string_with(merge: impl Fn(&str, &str) -> String + Send + Sync + 'static) -> Self {
        Self {
            inner: SpecInner::Str(Some(Arc::new(merge))),
        }
    }

    /// A dictionary-coded string column; identical strings share storage.
    #[must_use]
    pub fn enumeration() -> Self {
        Self {
            inner: SpecInner::Enum,
        }
    }

    /// The primary-key column: an `i64` column with a value→row lookup and
    /// a uniqueness guarantee across live rows.
    #[must_use]
    pub fn key() -> Self {
        Self {
            inner: SpecInner::Key,
        }
    }

    /// A stateless column that invokes `callback` for every applied
    /// PUT/DELETE record.
    #[must_use]
    pub fn trigger(callback: impl Fn(&dyn Accessor) + Send + Sync + 'static) -> Self {
        Self {
            inner: SpecInner::Trigger(Arc::new(callback)),
        }
    }

    /// The kind this spec will build.
    #[must_use]
    pub fn kind(&self) -> ColumnKind {
        match &self.inner {
            SpecInner::Bool => ColumnKind::Bool,
            SpecInner::I16(_) => ColumnKind::I16,
            SpecInner::I32(_) => ColumnKind::I32,
            SpecInner::I64(_) => ColumnKind::I64,
            SpecInner::U16(_) => ColumnKind::U16,
            SpecInner::U32(_) => ColumnKind::U32,
            SpecInner::U64(_) => ColumnKind::U64,
            SpecInner::F32(_) => ColumnKind::F32,
            SpecInner::F64(_) => ColumnKind::F64,
            SpecInner::Str(_) => ColumnKind::String,
            SpecInner::Enum => ColumnKind::Enum,
            SpecInner::Key => ColumnKind::Key,
            SpecInner::Trigger(_) => ColumnKind::Trigger,
        }
    }

    pub(crate) fn build(self) -> Column {
        match self.inner {
            SpecInner::Bool => Column::Bool(BoolColumn::new()),
            SpecInner::I16(m) => Column::I16(NumericColumn::new(m)),
            SpecInner::I32(m) => Column::I32(NumericColumn::new(m)),
            SpecInner::I64(m) => Column::I64(NumericColumn::new(m)),
            SpecInner::U16(m) => Column::U16(NumericColumn::new(m)),
            SpecInner::U32(m) => Column::U32(NumericColumn::new(m)),
            SpecInner::U64(m) => Column::U64(NumericColumn::new(m)),
            SpecInner::F32(m) => Column::F32(NumericColumn::new(m)),
            SpecInner::F64(m) => Column::F64(NumericColumn::new(m)),
            SpecInner::Str(m) => Column::Str(StrColumn::new(m)),
            SpecInner::Enum => Column::Enum(EnumColumn::new()),
            SpecInner::Key => Column::Key(KeyColumn::new()),
            SpecInner::Trigger(f) => Column::Trigger(TriggerColumn::new(f)),
        }
    }
}

/// How a column fill folds into a selection bitmap.
#[derive(Clone, Copy)]
pub(crate) enum FillOp {
    And,
    AndNot,
    Or,
}

/// Folds one chunk of fill words into `sel`.
///
/// `words` is `None` when the column has no storage for the chunk; an
/// absent chunk behaves as all-zero.
pub(crate) fn fold_fill(op: FillOp, chunk: u32, sel: &mut Bitmap, words: Option<&[u64]>) {
    let dst = sel.chunk_words_mut(chunk);
    match (op, words) {
        (FillOp::And, Some(src)) => {
            for (i, w) in dst.iter_mut().enumerate() {
                *w &= src.get(i).copied().unwrap_or(0);
            }
        }
        (FillOp::And, None) => dst.iter_mut().for_each(|w| *w = 0),
        (FillOp::AndNot, Some(src)) => {
            for (i, w) in dst.iter_mut().enumerate() {
                *w &= !src.get(i).copied().unwrap_or(0);
            }
        }
        (FillOp::Or, Some(src)) => {
            for (i, w) in dst.iter_mut().enumerate() {
                *w |= src.get(i).copied().unwrap_or(0);
            }
        }
        (FillOp::AndNot | FillOp::Or, None) => {}
    }
}

/// A column container: one tagged variant per supported kind.
pub(crate) enum Column {
    Bool(BoolColumn),
    I16(NumericColumn<i16>),
    I32(NumericColumn<i32>),
    I64(NumericColumn<i64>),
    U16(NumericColumn<u16>),
    U32(NumericColumn<u32>),
    U64(NumericColumn<u64>),
    F32(NumericColumn<f32>),
    F64(NumericColumn<f64>),
    Str(StrColumn),
    Enum(EnumColumn),
    Key(KeyColumn),
    Index(IndexColumn),
    Trigger(TriggerColumn),
}

macro_rules! each_numeric {
    ($self:ident, $col:ident => $body:expr, $other:pat => $fallback:expr) => {
        match $self {
            Column::I16($col) => $body,
            Column::I32($col) => $body,
            Column::I64($col) => $body,
            Column::U16($col) => $body,
            Column::U32($col) => $body,
            Column::U64($col) => $body,
            Column::F32($col) => $body,
            Column::F64($col) => $body,
            $other => $fallback,
        }
    };
}

impl Column {
    pub(crate) fn kind(&self) -> ColumnKind {
        match self {
            Self::Bool(_) => ColumnKind::Bool,
            Self::I16(_) => ColumnKind::I16,
            Self::I32(_) => ColumnKind::I32,
            Self::I64(_) => ColumnKind::I64,
            Self::U16(_) => ColumnKind::U16,
            Self::U32(_) => ColumnKind::U32,
            Self::U64(_) => ColumnKind::U64,
            Self::F32(_) => ColumnKind::F32,
            Self::F64(_) => ColumnKind::F64,
            Self::Str(_) => ColumnKind::String,
            Self::Enum(_) => ColumnKind::Enum,
            Self::Key(_) => ColumnKind::Key,
            Self::Index(_) => ColumnKind::Index,
            Self::Trigger(_) => ColumnKind::Trigger,
        }
    }

    /// True for columns carrying row data (everything except computed
    /// indices and triggers).
    pub(crate) fn is_data(&self) -> bool {
        !matches!(self, Self::Index(_) | Self::Trigger(_))
    }

    /// Ensures storage reaches `idx`. Idempotent.
    pub(crate) fn grow(&self, idx: u32) {
        each_numeric!(self, c => c.grow(idx), other => match other {
            Self::Bool(c) => c.grow(idx),
            Self::Str(c) => c.grow(idx),
            Self::Enum(c) => c.grow(idx),
            Self::Key(c) => c.grow(idx),
            Self::Index(c) => c.grow(idx),
            Self::Trigger(_) => {}
            _ => unreachable!(),
        })
    }

    /// Consumes a commit stream scoped to one chunk.
    pub(crate) fn apply(&self, chunk: u32, r: &mut Reader<'_>) {
        each_numeric!(self, c => c.apply(chunk, r), other => match other {
            Self::Bool(c) => c.apply(r),
            Self::Str(c) => c.apply(chunk, r),
            Self::Enum(c) => c.apply(chunk, r),
            Self::Key(c) => c.apply(chunk, r),
            Self::Index(c) => c.apply(r),
            Self::Trigger(c) => c.apply(r),
            _ => unreachable!(),
        })
    }

    /// The value stored at `idx`, if present.
    pub(crate) fn value(&self, idx: u32) -> Option<Value> {
        each_numeric!(self, c => c.value(idx).map(Primitive::to_value), other => match other {
            Self::Bool(c) => c.contains(idx).then_some(Value::Bool(true)),
            Self::Str(c) => c.value(idx).map(Value::Str),
            Self::Enum(c) => c.value(idx).map(Value::Str),
            Self::Key(c) => c.value(idx).map(Value::Int),
            Self::Index(c) => c.contains(idx).then_some(Value::Bool(true)),
            Self::Trigger(_) => None,
            _ => unreachable!(),
        })
    }

    /// Whether `idx` holds a value in this column.
    pub(crate) fn contains(&self, idx: u32) -> bool {
        each_numeric!(self, c => c.contains(idx), other => match other {
            Self::Bool(c) => c.contains(idx),
            Self::Str(c) => c.contains(idx),
            Self::Enum(c) => c.contains(idx),
            Self::Key(c) => c.contains(idx),
            Self::Index(c) => c.contains(idx),
            Self::Trigger(_) => false,
            _ => unreachable!(),
        })
    }

    /// Clears any value at `idx` (row-delete path). Chunk lock is held by
    /// the caller.
    pub(crate) fn erase(&self, idx: u32) {
        each_numeric!(self, c => c.delete(idx), other => match other {
            Self::Bool(c) => c.unset(idx),
            Self::Str(c) => c.delete(idx),
            Self::Enum(c) => c.delete(idx),
            Self::Key(c) => c.erase(idx),
            Self::Index(c) => c.unset(idx),
            Self::Trigger(_) => {}
            _ => unreachable!(),
        })
    }

    /// Folds this column's fill for `chunk` into `sel`.
    pub(crate) fn fill_into(&self, op: FillOp, chunk: u32, sel: &mut Bitmap) {
        each_numeric!(self, c => c.fill_into(op, chunk, sel), other => match other {
            Self::Bool(c) => c.fill_into(op, chunk, sel),
            Self::Str(c) => c.fill_into(op, chunk, sel),
            Self::Enum(c) => c.fill_into(op, chunk, sel),
            Self::Key(c) => c.fill_into(op, chunk, sel),
            Self::Index(c) => c.fill_into(op, chunk, sel),
            Self::Trigger(_) => fold_fill(op, chunk, sel, None),
            _ => unreachable!(),
        })
    }

    /// The fill bitmap restricted to one chunk, in chunk-local coordinates.
    pub(crate) fn index(&self, chunk: u32) -> Bitmap {
        let mut tmp = Bitmap::new();
        self.fill_into(FillOp::Or, chunk, &mut tmp);
        let mut local = Bitmap::new();
        tmp.range_chunk(chunk, |i| local.set(crate::bitmap::local_of(i)));
        local
    }

    /// Emits every present value in `chunk` as PUT records.
    pub(crate) fn snapshot(&self, chunk: u32, buf: &mut Buffer) {
        each_numeric!(self, c => c.snapshot(chunk, buf), other => match other {
            Self::Bool(c) => c.snapshot(chunk, buf),
            Self::Str(c) => c.snapshot(chunk, buf),
            Self::Enum(c) => c.snapshot(chunk, buf),
            Self::Key(c) => c.snapshot(chunk, buf),
            Self::Index(c) => c.snapshot(chunk, buf),
            Self::Trigger(_) => {}
            _ => unreachable!(),
        })
    }

    /// Typed filter over signed-integer columns.
    ///
    /// Clears the chunk when the column is not a signed-integer kind.
    pub(crate) fn filter_int(&self, chunk: u32, sel: &mut Bitmap, pred: impl Fn(i64) -> bool) {
        match self {
            Self::I16(c) => c.filter(chunk, sel, |v| pred(i64::from(v))),
            Self::I32(c) => c.filter(chunk, sel, |v| pred(i64::from(v))),
            Self::I64(c) => c.filter(chunk, sel, pred),
            Self::Key(c) => c.filter(chunk, sel, pred),
            _ => fold_fill(FillOp::And, chunk, sel, None),
        }
    }

    /// Typed filter over unsigned-integer columns.
    pub(crate) fn filter_uint(&self, chunk: u32, sel: &mut Bitmap, pred: impl Fn(u64) -> bool) {
        match self {
            Self::U16(c) => c.filter(chunk, sel, |v| pred(u64::from(v))),
            Self::U32(c) => c.filter(chunk, sel, |v| pred(u64::from(v))),
            Self::U64(c) => c.filter(chunk, sel, pred),
            _ => fold_fill(FillOp::And, chunk, sel, None),
        }
    }

    /// Typed filter over float columns.
    pub(crate) fn filter_float(&self, chunk: u32, sel: &mut Bitmap, pred: impl Fn(f64) -> bool) {
        match self {
            Self::F32(c) => c.filter(chunk, sel, |v| pred(f64::from(v))),
            Self::F64(c) => c.filter(chunk, sel, pred),
            _ => fold_fill(FillOp::And, chunk, sel, None),
        }
    }

    /// Typed filter over string and enum columns; the enum path carries a
    /// one-entry dictionary cache.
    pub(crate) fn filter_str(&self, chunk: u32, sel: &mut Bitmap, pred: impl Fn(&str) -> bool) {
        match self {
            Self::Str(c) => c.filter(chunk, sel, pred),
            Self::Enum(c) => c.filter(chunk, sel, pred),
            _ => fold_fill(FillOp::And, chunk, sel, None),
        }
    }

    pub(crate) fn as_key(&self) -> Option<&KeyColumn> {
        match self {
            Self::Key(c) => Some(c),
            _ => None,
        }
    }

    pub(crate) fn as_index(&self) -> Option<&IndexColumn> {
        match self {
            Self::Index(c) => Some(c),
            _ => None,
        }
    }
}
