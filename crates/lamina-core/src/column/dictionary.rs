//! Dictionary-coded string (enum) columns.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use super::{fold_fill, FillOp};
use crate::bitmap::{chunk_of, local_of, Bitmap, CHUNK_SIZE};
use crate::commit::{Buffer, Op, Reader};

/// Concurrent interning dictionary shared by every chunk of one enum column.
///
/// The dictionary is append-only: deleting rows leaves entries in place, so
/// offsets stay stable for the life of the column.
struct Dictionary {
    map: DashMap<Arc<str>, u32>,
    slab: RwLock<Vec<Arc<str>>>,
}

impl Dictionary {
    fn new() -> Self {
        Self {
            map: DashMap::new(),
            slab: RwLock::new(Vec::new()),
        }
    }

    /// Interns `s`, returning its stable offset.
    fn intern(&self, s: &str) -> u32 {
        if let Some(offset) = self.map.get(s) {
            return *offset;
        }
        let key: Arc<str> = Arc::from(s);
        *self.map.entry(Arc::clone(&key)).or_insert_with(|| {
            let mut slab = self.slab.write();
            let offset = slab.len() as u32;
            slab.push(key);
            offset
        })
    }

    fn get(&self, offset: u32) -> Option<Arc<str>> {
        self.slab.read().get(offset as usize).cloned()
    }
}

struct Slice {
    fill: Bitmap,
    data: Vec<u32>,
}

impl Slice {
    fn new() -> Self {
        Self {
            fill: Bitmap::with_capacity(CHUNK_SIZE),
            data: vec![0; CHUNK_SIZE as usize],
        }
    }
}

/// An enum column: each row stores a 32-bit dictionary offset, and identical
/// strings share one interned allocation.
pub(crate) struct EnumColumn {
    chunks: RwLock<Vec<Option<Box<Slice>>>>,
    dict: Dictionary,
}

impl EnumColumn {
    pub(crate) fn new() -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
            dict: Dictionary::new(),
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
                // Enum merges have no reducer: the final value is the payload.
                Op::Put | Op::Merge => {
                    let offset = self.dict.intern(r.str_value());
                    slice.data[local as usize] = offset;
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
        self.dict.get(slice.data[local as usize])
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

    /// Dictionary-aware text filter.
    ///
    /// Successive rows sharing a dictionary offset reuse the previous
    /// predicate verdict, so uniform runs cost one evaluation.
    pub(crate) fn filter(&self, chunk: u32, sel: &mut Bitmap, pred: impl Fn(&str) -> bool) {
        let chunks = self.chunks.read();
        let Some(slice) = chunks.get(chunk as usize).and_then(Option::as_ref) else {
            fold_fill(FillOp::And, chunk, sel, None);
            return;
        };
        fold_fill(FillOp::And, chunk, sel, Some(slice.fill.words()));
        let slab = self.dict.slab.read();
        let mut cache: Option<(u32, bool)> = None;
        sel.filter_chunk(chunk, |idx| {
            let offset = slice.data[local_of(idx) as usize];
            if let Some((cached, verdict)) = cache {
                if cached == offset {
                    return verdict;
                }
            }
            let verdict = slab
                .get(offset as usize)
                .is_some_and(|s| pred(s.as_ref()));
            cache = Some((offset, verdict));
            verdict
        });
    }

    pub(crate) fn snapshot(&self, chunk: u32, buf: &mut Buffer) {
        let chunks = self.chunks.read();
        let Some(slice) = chunks.get(chunk as usize).and_then(Option::as_ref) else {
            return;
        };
        let slab = self.dict.slab.read();
        let base = chunk << crate::bitmap::CHUNK_SHIFT;
        slice.fill.range(|local| {
            if let Some(s) = slab.get(slice.data[local as usize] as usize) {
                buf.push_str(Op::Put, base + local, s.as_ref());
            }
        });
    }
}
