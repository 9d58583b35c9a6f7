//! Snapshot persistence.
//!
//! A snapshot is a point-in-time binary image: one frame holding the global
//! fill bitmap, then one frame per (column × chunk) holding that chunk's
//! values re-encoded as PUT records. Restore pushes every frame through the
//! normal apply path, so computed indices rebuild themselves by replaying
//! their target columns; indices and triggers are never written out.
//!
//! All frames are `u32` little-endian length-prefixed. Snapshots contain
//! only position-addressed PUTs, which is what makes re-applying one
//! idempotent.

use std::io::{ErrorKind, Read, Write};

use tracing::warn;

use crate::bitmap::Bitmap;
use crate::collection::{apply_buffer, Collection};
use crate::commit::Buffer;
use crate::error::{Error, Result};

fn write_frame<W: Write>(w: &mut W, bytes: &[u8]) -> Result<()> {
    w.write_all(&(bytes.len() as u32).to_le_bytes())?;
    w.write_all(bytes)?;
    Ok(())
}

/// Reads one frame; `Ok(None)` is a clean end-of-stream.
fn read_frame<R: Read>(r: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_bytes = [0u8; 4];
    match r.read_exact(&mut len_bytes) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(len_bytes) as usize;
    let mut bytes = vec![0u8; len];
    r.read_exact(&mut bytes)
        .map_err(|_| Error::Corrupt("truncated snapshot frame".into()))?;
    Ok(Some(bytes))
}

impl Collection {
    /// Writes a snapshot of all live data to `w`.
    ///
    /// Commits running concurrently may land between chunks; each chunk is
    /// internally consistent but the image is not globally atomic, matching
    /// the engine's cross-chunk ordering contract.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the writer fails.
    pub fn snapshot<W: Write>(&self, w: &mut W) -> Result<()> {
        let schema = self.core.schema.read();
        let fill = self.core.fill.read().clone();
        write_frame(w, &fill.to_bytes())?;

        for (name, column) in &schema.columns {
            if !column.is_data() {
                continue;
            }
            for chunk in 0..fill.chunk_count() {
                let mut buffer = self.core.pool.acquire(name);
                {
                    let _guard = self.core.locks.shared(chunk);
                    column.snapshot(chunk, &mut buffer);
                }
                if !buffer.is_empty() {
                    write_frame(w, &buffer.to_frame_bytes())?;
                }
                self.core.pool.release(buffer);
            }
        }
        Ok(())
    }

    /// Loads a snapshot previously written by [`Collection::snapshot`].
    ///
    /// Frames apply through the normal commit path; applying the same
    /// snapshot twice converges to the same state. Frames naming unknown
    /// columns are dropped and logged. On a corrupt frame the error is
    /// surfaced and previously applied frames remain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupt`] for malformed frames and [`Error::Io`]
    /// for reader failures.
    pub fn restore<R: Read>(&self, r: &mut R) -> Result<()> {
        let fill_frame = read_frame(r)?
            .ok_or_else(|| Error::Corrupt("snapshot missing fill bitmap".into()))?;
        let restored_fill = Bitmap::from_bytes(&fill_frame)?;
        self.core.fill.write().or(&restored_fill);

        let schema = self.core.schema.read();
        while let Some(frame) = read_frame(r)? {
            let mut buffer = match Buffer::from_frame_bytes(&frame) {
                Ok(buffer) => buffer,
                Err(e) => {
                    warn!(error = %e, "corrupt snapshot frame");
                    return Err(e);
                }
            };
            for chunk in buffer.chunks() {
                let _guard = self.core.locks.exclusive(chunk);
                apply_buffer(&self.core, &schema, chunk, &mut buffer);
            }
        }
        Ok(())
    }
}
