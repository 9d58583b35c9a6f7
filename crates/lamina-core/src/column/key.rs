//! Primary-key columns.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::numeric::NumericColumn;
use super::FillOp;
use crate::bitmap::Bitmap;
use crate::commit::{Buffer, Op, Reader};

/// An `i64` column with an auxiliary value→row map kept in sync on every
/// PUT and DELETE.
///
/// Uniqueness across live rows is enforced before commit by
/// [`KeyColumn::seek`]; by the time records reach `apply` they are known to
/// be conflict-free.
pub(crate) struct KeyColumn {
    data: NumericColumn<i64>,
    seek: RwLock<FxHashMap<i64, u32>>,
}

impl KeyColumn {
    pub(crate) fn new() -> Self {
        Self {
            data: NumericColumn::new(None),
            seek: RwLock::new(FxHashMap::default()),
        }
    }

    pub(crate) fn grow(&self, idx: u32) {
        self.data.grow(idx);
    }

    pub(crate) fn apply(&self, _chunk: u32, r: &mut Reader<'_>) {
        while r.next() {
            let idx = r.offset();
            match r.op() {
                // A key merge has no additive meaning; both ops assign.
                Op::Put | Op::Merge => {
                    let key = r.i64_value();
                    let mut seek = self.seek.write();
                    if let Some(old) = self.data.value(idx) {
                        if old != key {
                            seek.remove(&old);
                        }
                    }
                    self.data.put(idx, key);
                    seek.insert(key, idx);
                }
                Op::Delete | Op::PutFalse => self.erase(idx),
                Op::PutTrue => {}
            }
        }
    }

    /// Removes the row's key and its reverse mapping.
    pub(crate) fn erase(&self, idx: u32) {
        let mut seek = self.seek.write();
        if let Some(key) = self.data.value(idx) {
            if seek.get(&key) == Some(&idx) {
                seek.remove(&key);
            }
        }
        self.data.delete(idx);
    }

    /// Row currently holding `key`, if any.
    pub(crate) fn seek(&self, key: i64) -> Option<u32> {
        self.seek.read().get(&key).copied()
    }

    pub(crate) fn value(&self, idx: u32) -> Option<i64> {
        self.data.value(idx)
    }

    pub(crate) fn contains(&self, idx: u32) -> bool {
        self.data.contains(idx)
    }

    pub(crate) fn fill_into(&self, op: FillOp, chunk: u32, sel: &mut Bitmap) {
        self.data.fill_into(op, chunk, sel);
    }

    pub(crate) fn filter(&self, chunk: u32, sel: &mut Bitmap, pred: impl Fn(i64) -> bool) {
        self.data.filter(chunk, sel, pred);
    }

    pub(crate) fn snapshot(&self, chunk: u32, buf: &mut Buffer) {
        self.data.snapshot(chunk, buf);
    }
}
