//! Commit-log sinks.
//!
//! A sink receives every successful commit, serialized in a total order.
//! Sinks are synchronous: a slow sink slows commits, and a sink that drops
//! frames (the bounded channel on overflow) reports success, per the
//! engine's backpressure contract.

use std::io::Write;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use crate::commit::Commit;
use crate::error::{Error, Result};

/// Receives commits from a collection, in FIFO order.
pub trait CommitSink: Send + Sync {
    /// Appends one commit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SinkFailure`] when the commit cannot be accepted;
    /// the in-memory state is already updated by the time this is called.
    fn append(&self, commit: Commit) -> Result<()>;
}

/// An in-memory bounded queue sink.
///
/// Overflow drops the commit and reports success; a disconnected receiver
/// is a failure.
pub struct ChannelSink {
    tx: Sender<Commit>,
}

impl ChannelSink {
    /// Creates a sink and its receiving end with the given capacity.
    #[must_use]
    pub fn bounded(capacity: usize) -> (Self, Receiver<Commit>) {
        let (tx, rx) = bounded(capacity);
        (Self { tx }, rx)
    }
}

impl CommitSink for ChannelSink {
    fn append(&self, commit: Commit) -> Result<()> {
        match self.tx.try_send(commit) {
            Ok(()) | Err(TrySendError::Full(_)) => Ok(()),
            Err(TrySendError::Disconnected(_)) => {
                Err(Error::SinkFailure("commit channel disconnected".into()))
            }
        }
    }
}

/// A pluggable writer adapter emitting framed commits.
///
/// Frame layout, little-endian: commit id (u64), chunk id (u32), buffer
/// count (u32), then one length-prefixed buffer frame per buffer.
pub struct WriterSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterSink<W> {
    /// Wraps a writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Unwraps the inner writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> CommitSink for WriterSink<W> {
    fn append(&self, commit: Commit) -> Result<()> {
        let mut w = self.writer.lock();
        let emit = |w: &mut W| -> std::io::Result<()> {
            w.write_all(&commit.id.to_le_bytes())?;
            w.write_all(&commit.chunk.to_le_bytes())?;
            w.write_all(&(commit.updates.len() as u32).to_le_bytes())?;
            for buffer in &commit.updates {
                let frame = buffer.to_frame_bytes();
                w.write_all(&(frame.len() as u32).to_le_bytes())?;
                w.write_all(&frame)?;
            }
            Ok(())
        };
        emit(&mut w).map_err(|e| Error::SinkFailure(e.to_string()))
    }
}
