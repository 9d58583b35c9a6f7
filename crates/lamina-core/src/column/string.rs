//! Variable-length string columns.

use std::sync::Arc;

use parking_lot::RwLock;

use super::{fold_fill, FillOp};
use crate::bitmap::{chunk_of, local_of, Bitmap, CHUNK_SIZE};
use crate::commit::{Buffer, Op, Reader};

/// Caller-supplied merge for string columns; absent means overwrite.
pub(crate) type StrMergeFn = Arc<dyn Fn(&str, &str) -> String + Send + Sync>;

struct Slice {
    fill: Bitmap,
    data: Vec<Option<Arc<str>>>,
}

impl Slice {
    fn new() -> Self {
        Self {
            fill: Bitmap::with_capacity(CHUNK_SIZE),
            data: vec![None; CHUNK_SIZE as usize],
        }
    }
}

/// A chunked column of reference-counted strings.
pub(crate) struct StrColumn {
    chunks: RwLock<Vec<Option<Box<Slice>>>>,
    merge: Option<StrMergeFn>,
}

impl StrColumn {
    pub(crate) fn new(merge: Option<StrMergeFn>) -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
            merge,
        }
    }

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
                    slice.data[local as usize] = Some(Arc::from(r.str_value()));
                    slice.fill.set(local);
                }
                Op::Merge => {
                    // Without a reducer a merge is an overwrite, and the
                    // reader already carries the final value.
                    let merged: Arc<str> = match (&self.merge, &slice.data[local as usize]) {
                        (Some(f), current) if slice.fill.contains(local) => {
                            let cur = current.as_deref().unwrap_or_default();
                            let out = f(cur, r.str_value());
                            r.swap_str(&out);
                            Arc::from(out)
                        }
                        _ => Arc::from(r.str_value()),
                    };
                    slice.data[local as usize] = Some(merged);
                    slice.fill.set(local);
                }
                Op::Delete | Op::PutFalse => slice.fill.unset(local),
                Op::PutTrue => {}
            }
        }
    }

    pub(crate) fn delete(&self, idx: u32) {
        let mut chunks = self.chunks.write();
        if let Some(Some(slice)) = chunks.get_mut(chunk_of(idx) as usize) {
            slice.fill.unset(local_of(idx));
        }
    }

    pub(crate) fn value(&self, idx: u32) -> Option<Arc<str>> {
        let chunks = self.chunks.read();
        let slice = chunks.get(chunk_of(idx) as usize)?.as_ref()?;
        let local = local_of(idx);
        if !slice.fill.contains(local) {
            return None;
        }
        slice.data[local as usize].clone()
    }

    pub(crate) fn contains(&self, idx: u32) -> bool {
        let chunks = self.chunks.read();
        chunks
            .get(chunk_of(idx) as usize)
            .and_then(Option::as_ref)
            .is_some_and(|s| s.fill.contains(local_of(idx)))
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
    /// whose text satisfies `pred`.
    pub(crate) fn filter(&self, chunk: u32, sel: &mut Bitmap, pred: impl Fn(&str) -> bool) {
        let chunks = self.chunks.read();
        let Some(slice) = chunks.get(chunk as usize).and_then(Option::as_ref) else {
            fold_fill(FillOp::And, chunk, sel, None);
            return;
        };
        fold_fill(FillOp::And, chunk, sel, Some(slice.fill.words()));
        sel.filter_chunk(chunk, |idx| {
            slice.data[local_of(idx) as usize]
                .as_deref()
                .is_some_and(&pred)
        });
    }

    pub(crate) fn snapshot(&self, chunk: u32, buf: &mut Buffer) {
        let chunks = self.chunks.read();
        let Some(slice) = chunks.get(chunk as usize).and_then(Option::as_ref) else {
            return;
        };
        let base = chunk << crate::bitmap::CHUNK_SHIFT;
        slice.fill.range(|local| {
            if let Some(s) = slice.data[local as usize].as_deref() {
                buf.push_str(Op::Put, base + local, s);
            }
        });
    }
}
