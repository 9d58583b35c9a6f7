//! Streaming decoder over a commit buffer.

use super::buffer::{section_header, SIZE_VAR};
use super::{read_ivarint, read_uvarint, write_uvarint, Accessor, Op};
use crate::bitmap::{CHUNK_SHIFT, CHUNK_SIZE};

/// Stateful cursor over one buffer, scoped to a single chunk.
///
/// `next` yields records from every section whose chunk id matches the
/// target, in append order, and reconstructs absolute offsets from the
/// accumulated deltas. Malformed input (unknown op, bad size class, length
/// overrun) terminates iteration: `next` returns `false` and stays `false`.
///
/// The reader borrows the buffer mutably so that `swap_*` can overwrite the
/// just-decoded payload in place; numeric columns use this to rewrite a
/// `Merge` delta into the merged final value before the column's computed
/// indices replay the same records.
pub struct Reader<'a> {
    data: &'a mut Vec<u8>,
    target: u32,
    pos: usize,
    in_section: bool,
    fresh: bool,
    local: i64,
    op: Op,
    tag_pos: usize,
    payload_start: usize,
    payload_len: usize,
    len_pos: usize,
}

impl<'a> Reader<'a> {
    /// Opens a reader over raw buffer bytes, scoped to `chunk`.
    pub(crate) fn over(data: &'a mut Vec<u8>, chunk: u32) -> Self {
        Self {
            data,
            target: chunk,
            pos: 0,
            in_section: false,
            fresh: false,
            local: 0,
            op: Op::Delete,
            tag_pos: 0,
            payload_start: 0,
            payload_len: 0,
            len_pos: 0,
        }
    }

    /// Rewinds to the start of the buffer, keeping the chunk scope.
    pub fn rewind(&mut self) {
        self.pos = 0;
        self.in_section = false;
        self.fresh = false;
        self.local = 0;
    }

    /// Rewinds and retargets the reader at a different chunk.
    pub fn seek(&mut self, chunk: u32) {
        self.target = chunk;
        self.rewind();
    }

    /// Advances to the next record in the target chunk.
    ///
    /// Returns `false` at the end of the buffer or on the first malformed
    /// record.
    pub fn next(&mut self) -> bool {
        loop {
            if self.pos >= self.data.len() {
                return false;
            }
            if let Some((chunk, next)) = section_header(self.data, self.pos) {
                self.in_section = chunk == self.target;
                self.fresh = true;
                self.pos = next;
                continue;
            }
            let tag = self.data[self.pos];
            let Some(op) = Op::from_nibble(tag >> 4) else {
                return false;
            };
            let size = tag & 0x0F;
            let Some((delta, after_offset)) = read_ivarint(self.data, self.pos + 1) else {
                return false;
            };
            let local = if self.fresh { delta } else { self.local + delta };
            if !(0..i64::from(CHUNK_SIZE)).contains(&local) {
                return false;
            }
            let (len_pos, payload_start, payload_len) = match size {
                SIZE_VAR => {
                    let Some((len, after_len)) = read_uvarint(self.data, after_offset) else {
                        return false;
                    };
                    let Ok(len) = usize::try_from(len) else {
                        return false;
                    };
                    (after_offset, after_len, len)
                }
                0 | 2 | 4 | 8 => (after_offset, after_offset, size as usize),
                _ => return false,
            };
            let end = payload_start + payload_len;
            if end > self.data.len() {
                return false;
            }
            self.fresh = false;
            self.local = local;
            self.op = op;
            self.tag_pos = self.pos;
            self.len_pos = len_pos;
            self.payload_start = payload_start;
            self.payload_len = payload_len;
            self.pos = end;
            if self.in_section {
                return true;
            }
        }
    }

    /// Operation of the current record.
    #[must_use]
    pub fn op(&self) -> Op {
        self.op
    }

    /// Absolute row index of the current record.
    #[allow(clippy::cast_sign_loss)] // local is validated into 0..CHUNK_SIZE
    #[must_use]
    pub fn offset(&self) -> u32 {
        (self.target << CHUNK_SHIFT) + self.local as u32
    }

    /// Raw payload bytes of the current record.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data[self.payload_start..self.payload_start + self.payload_len]
    }

    /// Payload as UTF-8 text; empty on invalid UTF-8.
    #[must_use]
    pub fn str_value(&self) -> &str {
        std::str::from_utf8(self.bytes()).unwrap_or_default()
    }

    /// Boolean carried by the op itself (`PutTrue`/`PutFalse`).
    #[must_use]
    pub fn bool_value(&self) -> bool {
        self.op == Op::PutTrue
    }

    /// Rewrites a just-swapped `Merge` record into a `Put`.
    ///
    /// Combined with the payload swap this turns MERGE(delta) into
    /// PUT(final): index rules, the commit log and replicas all observe the
    /// merged value as a plain position-addressed write.
    fn retag_put(&mut self) {
        if self.op == Op::Merge {
            let size = self.data[self.tag_pos] & 0x0F;
            self.data[self.tag_pos] = ((Op::Put as u8) << 4) | size;
            self.op = Op::Put;
        }
    }

    /// Replaces a varint length-prefixed payload in place.
    ///
    /// The buffer is re-spliced when the length differs, so string merge
    /// finals of any size propagate to downstream consumers.
    pub fn swap_bytes(&mut self, new: &[u8]) {
        let mut enc = Vec::with_capacity(new.len() + 5);
        write_uvarint(&mut enc, new.len() as u64);
        enc.extend_from_slice(new);
        self.data.splice(self.len_pos..self.pos, enc);
        let (_, after_len) =
            read_uvarint(self.data, self.len_pos).expect("just-encoded varint is readable");
        self.payload_start = after_len;
        self.payload_len = new.len();
        self.pos = after_len + new.len();
        self.retag_put();
    }

    /// Replaces a string payload in place.
    pub fn swap_str(&mut self, new: &str) {
        self.swap_bytes(new.as_bytes());
    }
}

macro_rules! typed_access {
    ($($get:ident, $swap:ident, $ty:ty, $width:expr;)*) => {
        impl Reader<'_> {
            $(
                /// Decodes the current payload as this fixed-width type.
                ///
                /// Returns the zero value when the payload width differs.
                #[must_use]
                pub fn $get(&self) -> $ty {
                    if self.payload_len != $width {
                        return <$ty>::default();
                    }
                    <$ty>::from_le_bytes(self.bytes().try_into().expect("width checked"))
                }

                /// Overwrites the current payload in place with `v`.
                ///
                /// Width must match the decoded payload; mismatches are a
                /// programming error inside the engine.
                pub fn $swap(&mut self, v: $ty) {
                    debug_assert_eq!(self.payload_len, $width);
                    self.data[self.payload_start..self.payload_start + $width]
                        .copy_from_slice(&v.to_le_bytes());
                    self.retag_put();
                }
            )*
        }
    };
}

typed_access! {
    i16_value, swap_i16, i16, 2;
    i32_value, swap_i32, i32, 4;
    i64_value, swap_i64, i64, 8;
    u16_value, swap_u16, u16, 2;
    u32_value, swap_u32, u32, 4;
    u64_value, swap_u64, u64, 8;
    f32_value, swap_f32, f32, 4;
    f64_value, swap_f64, f64, 8;
}

impl Accessor for Reader<'_> {
    fn index(&self) -> u32 {
        self.offset()
    }

    fn int(&self) -> i64 {
        match self.payload_len {
            2 => i64::from(self.i16_value()),
            4 => i64::from(self.i32_value()),
            8 => self.i64_value(),
            _ => 0,
        }
    }

    fn uint(&self) -> u64 {
        match self.payload_len {
            2 => u64::from(self.u16_value()),
            4 => u64::from(self.u32_value()),
            8 => self.u64_value(),
            _ => 0,
        }
    }

    fn float(&self) -> f64 {
        match self.payload_len {
            4 => f64::from(self.f32_value()),
            8 => self.f64_value(),
            _ => 0.0,
        }
    }

    fn string(&self) -> &str {
        self.str_value()
    }

    fn boolean(&self) -> bool {
        self.bool_value()
    }
}
