//! Transactions: query compilation, staging, commit and rollback.

mod row;


use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::RwLockReadGuard;
use rustc_hash::FxHashMap;

use crate::bitmap::{chunk_of, Bitmap};
use crate::collection::{apply_buffer, Core, Schema};
use crate::column::{Column, FillOp, Value};
use crate::commit::{Buffer, Commit, Op, ROW_COLUMN};
use crate::error::{Error, Result};

pub use row::Row;

/// A read-write transaction over one collection.
///
/// The working selection starts as a snapshot of the global fill; query
/// operators narrow or widen it chunk by chunk under shared chunk locks.
/// Writes stage into per-column commit buffers and only become visible when
/// the transaction commits; reads always observe committed state.
pub struct Txn<'a> {
    pub(super) core: &'a Core,
    pub(super) schema: RwLockReadGuard<'a, Schema>,
    pub(super) sel: Bitmap,
    pub(super) updates: Vec<Buffer>,
    pub(super) slots: FxHashMap<String, usize>,
    pub(super) row_ops: Option<Buffer>,
    pub(super) dirty: Bitmap,
    pub(super) deletes: Bitmap,
    pub(super) cursor: u32,
}

impl<'a> Txn<'a> {
    pub(crate) fn open(core: &'a Core) -> Self {
        let schema = core.schema.read();
        let sel = core.fill.read().clone();
        Self {
            core,
            schema,
            sel,
            updates: Vec::new(),
            slots: FxHashMap::default(),
            row_ops: None,
            dirty: Bitmap::new(),
            deletes: Bitmap::new(),
            cursor: 0,
        }
    }

    /// Row index the typed accessors are currently bound to.
    #[must_use]
    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    /// Number of rows in the current selection.
    #[must_use]
    pub fn count(&self) -> usize {
        self.sel.count()
    }

    fn lookup(&self, name: &str) -> Option<Arc<Column>> {
        self.schema.columns.get(name).cloned()
    }

    fn fold(&mut self, col: &Column, op: FillOp) {
        let core = self.core;
        for chunk in 0..self.sel.chunk_count() {
            let _guard = core.locks.shared(chunk);
            col.fill_into(op, chunk, &mut self.sel);
        }
    }

    /// Intersects the selection with each named column's fill.
    ///
    /// An unknown column clears the selection.
    pub fn with(&mut self, cols: &[&str]) -> &mut Self {
        for name in cols {
            match self.lookup(name) {
                Some(col) => self.fold(&col, FillOp::And),
                None => self.sel.clear(),
            }
        }
        self
    }

    /// Removes each named column's fill from the selection.
    pub fn without(&mut self, cols: &[&str]) -> &mut Self {
        for name in cols {
            if let Some(col) = self.lookup(name) {
                self.fold(&col, FillOp::AndNot);
            }
        }
        self
    }

    /// Unions each named column's fill into the selection.
    pub fn union(&mut self, cols: &[&str]) -> &mut Self {
        for name in cols {
            if let Some(col) = self.lookup(name) {
                self.fold(&col, FillOp::Or);
            }
        }
        self
    }

    /// Retains rows whose dynamic value satisfies `pred`.
    ///
    /// Rows with no value in the column are dropped; an unknown column
    /// clears the selection.
    pub fn with_value(&mut self, col: &str, pred: impl Fn(&Value) -> bool) -> &mut Self {
        let Some(col) = self.lookup(col) else {
            self.sel.clear();
            return self;
        };
        let core = self.core;
        for chunk in 0..self.sel.chunk_count() {
            let _guard = core.locks.shared(chunk);
            self.sel
                .filter_chunk(chunk, |idx| col.value(idx).is_some_and(|v| pred(&v)));
        }
        self
    }

    /// Retains rows whose signed-integer value satisfies `pred`, using the
    /// column's chunk-local filter helper.
    pub fn with_i64(&mut self, col: &str, pred: impl Fn(i64) -> bool) -> &mut Self {
        let Some(col) = self.lookup(col) else {
            self.sel.clear();
            return self;
        };
        let core = self.core;
        for chunk in 0..self.sel.chunk_count() {
            let _guard = core.locks.shared(chunk);
            col.filter_int(chunk, &mut self.sel, &pred);
        }
        self
    }

    /// Retains rows whose unsigned-integer value satisfies `pred`.
    pub fn with_u64(&mut self, col: &str, pred: impl Fn(u64) -> bool) -> &mut Self {
        let Some(col) = self.lookup(col) else {
            self.sel.clear();
            return self;
        };
        let core = self.core;
        for chunk in 0..self.sel.chunk_count() {
            let _guard = core.locks.shared(chunk);
            col.filter_uint(chunk, &mut self.sel, &pred);
        }
        self
    }

    /// Retains rows whose float value satisfies `pred`.
    pub fn with_f64(&mut self, col: &str, pred: impl Fn(f64) -> bool) -> &mut Self {
        let Some(col) = self.lookup(col) else {
            self.sel.clear();
            return self;
        };
        let core = self.core;
        for chunk in 0..self.sel.chunk_count() {
            let _guard = core.locks.shared(chunk);
            col.filter_float(chunk, &mut self.sel, &pred);
        }
        self
    }

    /// Retains rows whose text value satisfies `pred`.
    pub fn with_string(&mut self, col: &str, pred: impl Fn(&str) -> bool) -> &mut Self {
        let Some(col) = self.lookup(col) else {
            self.sel.clear();
            return self;
        };
        let core = self.core;
        for chunk in 0..self.sel.chunk_count() {
            let _guard = core.locks.shared(chunk);
            col.filter_str(chunk, &mut self.sel, &pred);
        }
        self
    }

    /// Enumerates the selection in ascending row order.
    ///
    /// The cursor is positioned before each callback; the chunk's shared
    /// lock is held while its rows are visited, so no commit moves data
    /// under the iteration.
    ///
    /// # Errors
    ///
    /// Stops at and propagates the first callback error.
    pub fn range(&mut self, mut f: impl FnMut(&mut Row<'_, 'a>) -> Result<()>) -> Result<()> {
        let core = self.core;
        let sel = std::mem::take(&mut self.sel);
        let mut indices = Vec::new();
        let mut result = Ok(());
        'chunks: for chunk in 0..sel.chunk_count() {
            indices.clear();
            sel.range_chunk(chunk, |idx| indices.push(idx));
            if indices.is_empty() {
                continue;
            }
            let _guard = core.locks.shared(chunk);
            for &idx in &indices {
                self.cursor = idx;
                let mut row = Row::bind(self);
                if let Err(e) = f(&mut row) {
                    result = Err(e);
                    break 'chunks;
                }
            }
        }
        self.sel = sel;
        result
    }

    /// Positions the cursor at `idx` and runs `f` against that row.
    ///
    /// # Errors
    ///
    /// Propagates the callback's error.
    pub fn at<R>(&mut self, idx: u32, f: impl FnOnce(&mut Row<'_, 'a>) -> Result<R>) -> Result<R> {
        let core = self.core;
        let _guard = core.locks.shared(chunk_of(idx));
        self.cursor = idx;
        let mut row = Row::bind(self);
        f(&mut row)
    }

    // -----------------------------------------------------------------
    // Staging internals
    // -----------------------------------------------------------------

    pub(crate) fn stage_insert(&mut self, idx: u32) {
        self.dirty.set(chunk_of(idx));
        self.sel.set(idx);
        self.row_buffer().push_empty(Op::PutTrue, idx);
    }

    pub(super) fn stage_delete(&mut self, idx: u32) {
        self.dirty.set(chunk_of(idx));
        self.deletes.set(idx);
    }

    pub(super) fn slot_for(&mut self, name: &str) -> usize {
        if let Some(&slot) = self.slots.get(name) {
            return slot;
        }
        self.updates.push(self.core.pool.acquire(name));
        let slot = self.updates.len() - 1;
        self.slots.insert(name.to_string(), slot);
        slot
    }

    fn row_buffer(&mut self) -> &mut Buffer {
        if self.row_ops.is_none() {
            self.row_ops = Some(self.core.pool.acquire(ROW_COLUMN));
        }
        self.row_ops.as_mut().expect("row buffer just ensured")
    }

    // -----------------------------------------------------------------
    // Commit / rollback
    // -----------------------------------------------------------------

    /// Rejects the batch when any staged key PUT collides with a live row
    /// outside this transaction, or with another staged PUT.
    fn check_keys(&mut self) -> Result<()> {
        let Some(pk_name) = self.schema.pk.clone() else {
            return Ok(());
        };
        let Some(&slot) = self.slots.get(&pk_name) else {
            return Ok(());
        };
        let Some(key_col) = self
            .schema
            .columns
            .get(&pk_name)
            .and_then(|c| c.as_key())
        else {
            return Ok(());
        };
        let fill = self.core.fill.read();
        let mut staged: FxHashMap<i64, u32> = FxHashMap::default();
        let buffer = &mut self.updates[slot];
        for chunk in buffer.chunks() {
            let mut reader = buffer.reader(chunk);
            while reader.next() {
                if !matches!(reader.op(), Op::Put | Op::Merge) {
                    continue;
                }
                let key = reader.i64_value();
                let idx = reader.offset();
                if staged.get(&key).is_some_and(|&prev| prev != idx) {
                    return Err(Error::DuplicateKey(key));
                }
                if let Some(existing) = key_col.seek(key) {
                    if existing != idx
                        && fill.contains(existing)
                        && !self.deletes.contains(existing)
                    {
                        return Err(Error::DuplicateKey(key));
                    }
                }
                staged.insert(key, idx);
            }
        }
        Ok(())
    }

    pub(crate) fn commit(&mut self) -> Result<()> {
        let has_updates = self.updates.iter().any(|b| !b.is_empty());
        let has_row_ops = self.row_ops.as_ref().is_some_and(|b| !b.is_empty());
        if !has_updates && !has_row_ops && self.deletes.is_empty() {
            self.release();
            return Ok(());
        }

        self.check_keys()?;

        let deletes = std::mem::take(&mut self.deletes);
        if deletes.count() > 0 {
            let row_buffer = self.row_buffer();
            deletes.range(|idx| row_buffer.push_empty(Op::Delete, idx));
        }

        let mut chunks = Vec::new();
        self.dirty.range(|chunk| chunks.push(chunk));

        // The sink lock spans apply and emission so that the sink observes
        // commits in the exact order their chunk locks were granted.
        // Sink-less collections skip the serialization entirely.
        let core = self.core;
        let sink = {
            let guard = core.sink.lock();
            guard.is_some().then_some(guard)
        };
        for &chunk in &chunks {
            let _guard = core.locks.exclusive(chunk);
            for i in 0..self.updates.len() {
                if self.updates[i].is_empty() {
                    continue;
                }
                apply_buffer(core, &self.schema, chunk, &mut self.updates[i]);
            }
            if let Some(row_buffer) = self.row_ops.as_mut() {
                if !row_buffer.is_empty() {
                    apply_buffer(core, &self.schema, chunk, row_buffer);
                }
            }
        }

        let mut sink_result = Ok(());
        {
            if let Some(sink) = sink.as_ref().and_then(|guard| guard.as_ref()) {
                for &chunk in &chunks {
                    let mut commit_updates: Vec<Buffer> = self
                        .updates
                        .iter()
                        .filter_map(|b| b.extract(chunk))
                        .collect();
                    if let Some(rows) = self.row_ops.as_ref().and_then(|b| b.extract(chunk)) {
                        commit_updates.push(rows);
                    }
                    if commit_updates.is_empty() {
                        continue;
                    }
                    let id = core.commit_id.fetch_add(1, Ordering::SeqCst) + 1;
                    let commit = Commit {
                        id,
                        chunk,
                        updates: commit_updates,
                    };
                    if let Err(e) = sink.append(commit) {
                        if sink_result.is_ok() {
                            sink_result = Err(e);
                        }
                    }
                }
            }
        }
        drop(sink);

        self.release();
        sink_result
    }

    pub(crate) fn rollback(&mut self) {
        self.release();
        self.deletes.clear();
        self.cursor = 0;
    }

    fn release(&mut self) {
        let core = self.core;
        for buffer in self.updates.drain(..) {
            core.pool.release(buffer);
        }
        if let Some(buffer) = self.row_ops.take() {
            core.pool.release(buffer);
        }
        self.slots.clear();
        self.dirty.clear();
    }
}

impl Drop for Txn<'_> {
    fn drop(&mut self) {
        // Buffers return to the pool on every exit path, including panics
        // unwinding out of user callbacks.
        self.release();
    }
}
