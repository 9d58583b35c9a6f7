//! Computed indices and trigger columns.

use parking_lot::RwLock;

use super::{fold_fill, FillOp, IndexRule, TriggerFn};
use crate::bitmap::Bitmap;
use crate::commit::{Buffer, Op, Reader};

/// A bitmap index derived from a target column by a predicate.
///
/// The index holds only a fill bitmap. It is applied after its target
/// column within the same chunk lock, so merge records already carry their
/// swapped-in final values when the rule evaluates them. Indices are never
/// snapshotted; restore rebuilds them by replaying the target's PUTs.
pub(crate) struct IndexColumn {
    target: String,
    rule: IndexRule,
    fill: RwLock<Bitmap>,
}

impl IndexColumn {
    pub(crate) fn new(target: impl Into<String>, rule: IndexRule) -> Self {
        Self {
            target: target.into(),
            rule,
            fill: RwLock::new(Bitmap::new()),
        }
    }

    /// Name of the column this index derives from.
    pub(crate) fn target(&self) -> &str {
        &self.target
    }

    pub(crate) fn grow(&self, idx: u32) {
        self.fill.write().grow(idx);
    }

    pub(crate) fn apply(&self, r: &mut Reader<'_>) {
        let mut fill = self.fill.write();
        while r.next() {
            let idx = r.offset();
            match r.op() {
                Op::Put | Op::Merge | Op::PutTrue | Op::PutFalse => {
                    if (self.rule)(&*r) {
                        fill.set(idx);
                    } else {
                        fill.unset(idx);
                    }
                }
                Op::Delete => fill.unset(idx),
            }
        }
    }

    pub(crate) fn contains(&self, idx: u32) -> bool {
        self.fill.read().contains(idx)
    }

    pub(crate) fn unset(&self, idx: u32) {
        self.fill.write().unset(idx);
    }

    pub(crate) fn fill_into(&self, op: FillOp, chunk: u32, sel: &mut Bitmap) {
        let fill = self.fill.read();
        fold_fill(op, chunk, sel, fill.chunk_words(chunk));
    }

    pub(crate) fn snapshot(&self, chunk: u32, buf: &mut Buffer) {
        self.fill
            .read()
            .range_chunk(chunk, |idx| buf.push_empty(Op::PutTrue, idx));
    }
}

/// A stateless column that invokes a callback per applied record.
pub(crate) struct TriggerColumn {
    callback: TriggerFn,
}

impl TriggerColumn {
    pub(crate) fn new(callback: TriggerFn) -> Self {
        Self { callback }
    }

    pub(crate) fn apply(&self, r: &mut Reader<'_>) {
        while r.next() {
            (self.callback)(&*r);
        }
    }
}
