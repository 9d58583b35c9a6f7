//! Boolean columns.

use parking_lot::RwLock;

use super::{fold_fill, FillOp};
use crate::bitmap::Bitmap;
use crate::commit::{Buffer, Op, Reader};

/// A boolean column: value storage IS the fill bitmap.
///
/// `PutTrue` sets the bit, `PutFalse` clears it, and clearing is also how a
/// boolean value is deleted.
pub(crate) struct BoolColumn {
    bits: RwLock<Bitmap>,
}

impl BoolColumn {
    pub(crate) fn new() -> Self {
        Self {
            bits: RwLock::new(Bitmap::new()),
        }
    }

    pub(crate) fn grow(&self, idx: u32) {
        self.bits.write().grow(idx);
    }

    pub(crate) fn apply(&self, r: &mut Reader<'_>) {
        let mut bits = self.bits.write();
        while r.next() {
            match r.op() {
                Op::PutTrue => bits.set(r.offset()),
                Op::PutFalse | Op::Delete => bits.unset(r.offset()),
                Op::Put | Op::Merge => {}
            }
        }
    }

    pub(crate) fn contains(&self, idx: u32) -> bool {
        self.bits.read().contains(idx)
    }

    pub(crate) fn unset(&self, idx: u32) {
        self.bits.write().unset(idx);
    }

    pub(crate) fn fill_into(&self, op: FillOp, chunk: u32, sel: &mut Bitmap) {
        let bits = self.bits.read();
        fold_fill(op, chunk, sel, bits.chunk_words(chunk));
    }

    pub(crate) fn snapshot(&self, chunk: u32, buf: &mut Buffer) {
        self.bits
            .read()
            .range_chunk(chunk, |idx| buf.push_empty(Op::PutTrue, idx));
    }
}
