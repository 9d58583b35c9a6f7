//! Append-only commit buffer for one column.

use super::{read_uvarint, write_ivarint, write_uvarint, Op};
use crate::bitmap::{chunk_of, local_of};

/// Payload size class for an empty payload.
pub(crate) const SIZE_EMPTY: u8 = 0;
/// Payload size class for varint length-prefixed bytes.
pub(crate) const SIZE_VAR: u8 = 0x0F;
/// Chunk section marker byte.
pub(crate) const SECTION_MARKER: u8 = 0x80;

/// An append-only typed log of `(op, offset, value)` records for one column,
/// segmented into chunk sections.
///
/// Records are appended in application order and replayed in that exact
/// order; a new section header is emitted whenever a write crosses into a
/// different chunk than the previous record.
#[derive(Debug, Clone, Default)]
pub struct Buffer {
    column: String,
    data: Vec<u8>,
    chunk: Option<u32>,
    last_local: i64,
    fresh: bool,
}

impl Buffer {
    /// Creates an empty buffer for `column`.
    #[must_use]
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            data: Vec::new(),
            chunk: None,
            last_local: 0,
            fresh: false,
        }
    }

    /// Clears the buffer for reuse under a new column name.
    pub fn reset(&mut self, column: impl Into<String>) {
        self.column = column.into();
        self.data.clear();
        self.chunk = None;
        self.last_local = 0;
        self.fresh = false;
    }

    /// Name of the column this buffer belongs to.
    #[must_use]
    pub fn column(&self) -> &str {
        &self.column
    }

    /// Returns true when no record has been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Encoded size in bytes, excluding the column name.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn data(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub(crate) fn data_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    /// Opens a [`super::Reader`] over this buffer, scoped to `chunk`.
    pub fn reader(&mut self, chunk: u32) -> super::Reader<'_> {
        super::Reader::over(&mut self.data, chunk)
    }

    fn begin(&mut self, op: Op, size_class: u8, idx: u32) {
        let chunk = chunk_of(idx);
        debug_assert!(chunk < 1 << 24, "chunk id must fit 24 bits");
        if self.chunk != Some(chunk) {
            self.data.push(SECTION_MARKER);
            self.data.extend_from_slice(&chunk.to_le_bytes()[..3]);
            self.chunk = Some(chunk);
            self.fresh = true;
        }
        self.data.push(((op as u8) << 4) | size_class);
        let local = i64::from(local_of(idx));
        let delta = if self.fresh { local } else { local - self.last_local };
        write_ivarint(&mut self.data, delta);
        self.last_local = local;
        self.fresh = false;
    }

    /// Appends a payload-free record (`Delete`, `PutTrue`, `PutFalse`).
    pub fn push_empty(&mut self, op: Op, idx: u32) {
        self.begin(op, SIZE_EMPTY, idx);
    }

    /// Appends a record with a varint length-prefixed byte payload.
    pub fn push_bytes(&mut self, op: Op, idx: u32, payload: &[u8]) {
        self.begin(op, SIZE_VAR, idx);
        write_uvarint(&mut self.data, payload.len() as u64);
        self.data.extend_from_slice(payload);
    }

    /// Appends a record with a string payload.
    pub fn push_str(&mut self, op: Op, idx: u32, payload: &str) {
        self.push_bytes(op, idx, payload.as_bytes());
    }

    /// Set of chunk ids that have at least one section in this buffer,
    /// ascending. Scanning stops silently at the first malformed byte, which
    /// mirrors the reader's stop-on-corrupt behavior.
    #[must_use]
    pub fn chunks(&self) -> Vec<u32> {
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < self.data.len() {
            match section_header(&self.data, pos) {
                Some((chunk, next)) => {
                    if !out.contains(&chunk) {
                        out.push(chunk);
                    }
                    pos = next;
                }
                None => match skip_record(&self.data, pos) {
                    Some(next) => pos = next,
                    None => break,
                },
            }
        }
        out.sort_unstable();
        out
    }

    /// Copies the sections belonging to `chunk` into a standalone buffer.
    ///
    /// Section payloads are self-delimiting (the first record of a section
    /// carries an absolute offset), so the bytes transfer verbatim. Returns
    /// `None` when the buffer holds nothing for that chunk.
    #[must_use]
    pub fn extract(&self, chunk: u32) -> Option<Self> {
        let mut data = Vec::new();
        let mut pos = 0;
        let mut keeping = false;
        let mut section_start = 0;
        while pos < self.data.len() {
            if let Some((id, next)) = section_header(&self.data, pos) {
                if keeping {
                    data.extend_from_slice(&self.data[section_start..pos]);
                }
                keeping = id == chunk;
                section_start = pos;
                pos = next;
            } else {
                match skip_record(&self.data, pos) {
                    Some(next) => pos = next,
                    None => break,
                }
            }
        }
        if keeping {
            data.extend_from_slice(&self.data[section_start..pos]);
        }
        if data.is_empty() {
            return None;
        }
        Some(Self {
            column: self.column.clone(),
            data,
            chunk: None,
            last_local: 0,
            fresh: false,
        })
    }

    /// Serializes the buffer as a frame: column-name length prefix, name
    /// bytes, then the record sections.
    ///
    /// # Panics
    ///
    /// Panics if the column name exceeds 255 bytes; names are validated at
    /// column creation.
    #[must_use]
    pub fn to_frame_bytes(&self) -> Vec<u8> {
        assert!(self.column.len() <= u8::MAX as usize);
        let mut out = Vec::with_capacity(1 + self.column.len() + self.data.len());
        out.push(self.column.len() as u8);
        out.extend_from_slice(self.column.as_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    /// Parses a frame produced by [`Buffer::to_frame_bytes`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Corrupt`] when the name prefix overruns the
    /// frame or is not UTF-8. Record-level corruption is not validated here;
    /// the reader stops at the first malformed record.
    pub fn from_frame_bytes(bytes: &[u8]) -> crate::Result<Self> {
        let name_len = *bytes
            .first()
            .ok_or_else(|| crate::Error::Corrupt("empty buffer frame".into()))?
            as usize;
        if bytes.len() < 1 + name_len {
            return Err(crate::Error::Corrupt("buffer frame name overrun".into()));
        }
        let column = std::str::from_utf8(&bytes[1..=name_len])
            .map_err(|_| crate::Error::Corrupt("buffer frame name is not UTF-8".into()))?
            .to_string();
        Ok(Self {
            column,
            data: bytes[1 + name_len..].to_vec(),
            chunk: None,
            last_local: 0,
            fresh: false,
        })
    }
}

/// Decodes a section header at `pos`, returning `(chunk, next_pos)`.
pub(crate) fn section_header(data: &[u8], pos: usize) -> Option<(u32, usize)> {
    if *data.get(pos)? != SECTION_MARKER || data.len() < pos + 4 {
        return None;
    }
    let chunk = u32::from_le_bytes([data[pos + 1], data[pos + 2], data[pos + 3], 0]);
    Some((chunk, pos + 4))
}

/// Skips one record starting at `pos`, returning the position after it.
pub(crate) fn skip_record(data: &[u8], pos: usize) -> Option<usize> {
    let tag = *data.get(pos)?;
    if tag & 0x80 != 0 {
        return None;
    }
    Op::from_nibble(tag >> 4)?;
    let size = tag & 0x0F;
    let (_, mut pos) = read_uvarint(data, pos + 1)?;
    if size == SIZE_VAR {
        let (len, after) = read_uvarint(data, pos)?;
        pos = after + usize::try_from(len).ok()?;
    } else {
        if !matches!(size, 0 | 2 | 4 | 8) {
            return None;
        }
        pos += size as usize;
    }
    (pos <= data.len()).then_some(pos)
}

macro_rules! typed_push {
    ($($fn_name:ident, $ty:ty, $size:expr;)*) => {
        impl Buffer {
            $(
                /// Appends a record with a fixed-width numeric payload.
                pub fn $fn_name(&mut self, op: Op, idx: u32, v: $ty) {
                    self.begin(op, $size, idx);
                    self.data.extend_from_slice(&v.to_le_bytes());
                }
            )*
        }
    };
}

typed_push! {
    push_i16, i16, 2;
    push_i32, i32, 4;
    push_i64, i64, 8;
    push_u16, u16, 2;
    push_u32, u32, 4;
    push_u64, u64, 8;
    push_f32, f32, 4;
    push_f64, f64, 8;
}
