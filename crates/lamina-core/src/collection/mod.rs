//! Collections: named columns over a shared row-index space.

mod expire;

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use rustc_hash::FxHashMap;
use tracing::warn;

use crate::bitmap::{Bitmap, CHUNK_SHIFT, CHUNK_SIZE};
use crate::column::{Column, ColumnKind, ColumnSpec, IndexColumn, IndexRule};
use crate::commit::{Accessor, Buffer, BufferPool, Commit, Op, ROW_COLUMN};
use crate::error::{Error, Result};
use crate::sink::CommitSink;
use crate::txn::{Row, Txn};

/// Number of striped chunk locks; chunk ids map onto stripes by modulo.
const LOCK_STRIPES: usize = 128;

/// Reserved column holding expiration deadlines in nanoseconds since epoch.
pub const EXPIRE_COLUMN: &str = "expire";

/// Configuration for a [`Collection`].
#[derive(Default, Clone)]
pub struct Options {
    pub(crate) expiration: Option<Duration>,
}

impl Options {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables the background expiration sweep at the given interval.
    ///
    /// The collection gains a reserved `"expire"` i64 column; rows whose
    /// deadline is non-zero and in the past are deleted by the sweeper.
    #[must_use]
    pub fn with_expiration(mut self, interval: Duration) -> Self {
        self.expiration = Some(interval);
        self
    }
}

/// Striped per-chunk reader/writer locks, shared across all columns.
pub(crate) struct ChunkLocks {
    stripes: Vec<RwLock<()>>,
}

impl ChunkLocks {
    fn new() -> Self {
        Self {
            stripes: (0..LOCK_STRIPES).map(|_| RwLock::new(())).collect(),
        }
    }

    pub(crate) fn shared(&self, chunk: u32) -> RwLockReadGuard<'_, ()> {
        self.stripes[chunk as usize % LOCK_STRIPES].read()
    }

    pub(crate) fn exclusive(&self, chunk: u32) -> RwLockWriteGuard<'_, ()> {
        self.stripes[chunk as usize % LOCK_STRIPES].write()
    }
}

/// Schema state: the ordered name→column map plus index wiring.
pub(crate) struct Schema {
    pub(crate) columns: IndexMap<String, Arc<Column>>,
    pub(crate) pk: Option<String>,
    /// target column name → names of computed indices derived from it.
    pub(crate) indexes: FxHashMap<String, Vec<String>>,
}

impl Schema {
    pub(crate) fn column(&self, name: &str) -> Result<&Arc<Column>> {
        self.columns
            .get(name)
            .ok_or_else(|| Error::UnknownColumn(name.to_string()))
    }
}

pub(crate) struct Core {
    pub(crate) schema: RwLock<Schema>,
    pub(crate) fill: RwLock<Bitmap>,
    pub(crate) locks: ChunkLocks,
    pub(crate) pool: BufferPool,
    pub(crate) sink: Mutex<Option<Box<dyn CommitSink>>>,
    pub(crate) commit_id: AtomicU64,
    replay_mark: AtomicU64,
    sweeper: Mutex<Option<expire::Sweeper>>,
}

impl Drop for Core {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.stop();
        }
    }
}

/// An in-memory columnar store: uniformly-indexed rows across typed
/// columns, with snapshot-isolated transactions and bitmap indexing.
///
/// `Collection` is a cheap handle; clones share the same store.
#[derive(Clone)]
pub struct Collection {
    pub(crate) core: Arc<Core>,
}

impl Default for Collection {
    fn default() -> Self {
        Self::new()
    }
}

impl Collection {
    /// Creates an empty collection with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(&Options::new())
    }

    /// Creates an empty collection.
    ///
    /// # Panics
    ///
    /// Will not panic under normal operation; the reserved `"expire"`
    /// column is installed while the schema is still empty.
    #[must_use]
    pub fn with_options(opts: &Options) -> Self {
        let core = Arc::new(Core {
            schema: RwLock::new(Schema {
                columns: IndexMap::new(),
                pk: None,
                indexes: FxHashMap::default(),
            }),
            fill: RwLock::new(Bitmap::new()),
            locks: ChunkLocks::new(),
            pool: BufferPool::new(),
            sink: Mutex::new(None),
            commit_id: AtomicU64::new(0),
            replay_mark: AtomicU64::new(0),
            sweeper: Mutex::new(None),
        });
        let collection = Self { core };
        if let Some(interval) = opts.expiration {
            collection
                .create_column(EXPIRE_COLUMN, ColumnSpec::i64())
                .expect("empty schema cannot conflict");
            let sweeper = expire::Sweeper::start(Arc::downgrade(&collection.core), interval);
            *collection.core.sweeper.lock() = Some(sweeper);
        }
        collection
    }

    // ---------------------------------------------------------------------
    // Schema
    // ---------------------------------------------------------------------

    /// Adds a column.
    ///
    /// Idempotent when a column of the same kind already exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaConflict`] when the name is taken by a
    /// different kind, reserved, or a second primary key is declared.
    pub fn create_column(&self, name: &str, spec: ColumnSpec) -> Result<()> {
        if name.is_empty() || name.len() > u8::MAX as usize {
            return Err(Error::SchemaConflict(name.to_string()));
        }
        let mut schema = self.core.schema.write();
        if let Some(existing) = schema.columns.get(name) {
            if existing.kind() == spec.kind() {
                return Ok(());
            }
            return Err(Error::SchemaConflict(name.to_string()));
        }
        if spec.kind() == ColumnKind::Key {
            if schema.pk.is_some() {
                return Err(Error::SchemaConflict(name.to_string()));
            }
            schema.pk = Some(name.to_string());
        }
        schema.columns.insert(name.to_string(), Arc::new(spec.build()));
        Ok(())
    }

    /// Adds a computed index over `target` and backfills it from the
    /// column's current contents.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownColumn`] when the target does not exist and
    /// [`Error::SchemaConflict`] when the index name is taken.
    pub fn create_index(
        &self,
        name: &str,
        target: &str,
        rule: impl Fn(&dyn Accessor) -> bool + Send + Sync + 'static,
    ) -> Result<()> {
        if name.is_empty() || name.len() > u8::MAX as usize {
            return Err(Error::SchemaConflict(name.to_string()));
        }
        let rule: IndexRule = Arc::new(rule);
        let mut schema = self.core.schema.write();
        let target_col = Arc::clone(schema.column(target)?);
        if !target_col.is_data() {
            return Err(Error::UnknownColumn(target.to_string()));
        }
        if schema.columns.contains_key(name) {
            return Err(Error::SchemaConflict(name.to_string()));
        }
        let index = IndexColumn::new(target, rule);

        // Backfill under the schema write lock: no commit can be in flight.
        let chunk_count = self.core.fill.read().chunk_count();
        for chunk in 0..chunk_count {
            let mut buf = self.core.pool.acquire(target);
            target_col.snapshot(chunk, &mut buf);
            if !buf.is_empty() {
                let mut reader = buf.reader(chunk);
                index.apply(&mut reader);
            }
            self.core.pool.release(buf);
        }

        schema
            .columns
            .insert(name.to_string(), Arc::new(Column::Index(index)));
        schema
            .indexes
            .entry(target.to_string())
            .or_default()
            .push(name.to_string());
        Ok(())
    }

    /// Removes a column; dependent computed indices are dropped with it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownColumn`] when the column does not exist.
    pub fn drop_column(&self, name: &str) -> Result<()> {
        let mut schema = self.core.schema.write();
        let index_target = match schema.columns.get(name) {
            None => return Err(Error::UnknownColumn(name.to_string())),
            Some(col) => col.as_index().map(|i| i.target().to_string()),
        };
        if let Some(target) = index_target {
            schema.columns.shift_remove(name);
            if let Some(deps) = schema.indexes.get_mut(&target) {
                deps.retain(|n| n != name);
            }
            return Ok(());
        }
        schema.columns.shift_remove(name);
        if schema.pk.as_deref() == Some(name) {
            schema.pk = None;
        }
        if let Some(deps) = schema.indexes.remove(name) {
            for dep in deps {
                schema.columns.shift_remove(&dep);
            }
        }
        Ok(())
    }

    /// Removes a computed index, leaving its target column untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownColumn`] for missing names and
    /// [`Error::SchemaConflict`] when the name is not an index.
    pub fn drop_index(&self, name: &str) -> Result<()> {
        {
            let schema = self.core.schema.read();
            if schema.column(name)?.as_index().is_none() {
                return Err(Error::SchemaConflict(name.to_string()));
            }
        }
        self.drop_column(name)
    }

    /// Names of the columns, in creation order.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.core.schema.read().columns.keys().cloned().collect()
    }

    // ---------------------------------------------------------------------
    // Rows
    // ---------------------------------------------------------------------

    /// Number of live rows.
    #[must_use]
    pub fn count(&self) -> usize {
        self.core.fill.read().count()
    }

    fn allocate(&self) -> u32 {
        let mut fill = self.core.fill.write();
        let idx = fill.first_zero();
        fill.set(idx);
        idx
    }

    fn unallocate(&self, idx: u32) {
        self.core.fill.write().unset(idx);
    }

    /// Allocates a row, exposes it to `f` for staging, and commits.
    ///
    /// Returns the new row index. The index is the first free slot in the
    /// fill bitmap, so deleted slots are reused.
    ///
    /// # Errors
    ///
    /// Propagates staging and commit errors; the allocation is released on
    /// failure.
    pub fn insert(&self, f: impl FnOnce(&mut Row<'_, '_>) -> Result<()>) -> Result<u32> {
        let idx = self.allocate();
        let result = self.query(|txn| {
            txn.stage_insert(idx);
            txn.at(idx, f)
        });
        match result {
            Ok(()) => Ok(idx),
            Err(e) => {
                self.unallocate(idx);
                Err(e)
            }
        }
    }

    /// Inserts a row under a primary key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingPrimaryKey`] without a key column and
    /// [`Error::DuplicateKey`] when the key is already live.
    pub fn insert_key(&self, key: i64, f: impl FnOnce(&mut Row<'_, '_>) -> Result<()>) -> Result<u32> {
        self.insert(|row| {
            row.set_key(key)?;
            f(row)
        })
    }

    /// Updates the row holding `key`, or inserts a new one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingPrimaryKey`] without a key column.
    pub fn upsert_key(&self, key: i64, f: impl FnOnce(&mut Row<'_, '_>) -> Result<()>) -> Result<u32> {
        match self.row_of(key) {
            Ok(idx) => {
                self.query_at(idx, f)?;
                Ok(idx)
            }
            Err(Error::UnknownKey(_)) => self.insert_key(key, f),
            Err(e) => Err(e),
        }
    }

    /// Opens a read-write transaction.
    ///
    /// On `Ok` the staged changes commit; on `Err` they roll back and the
    /// error is returned.
    ///
    /// # Errors
    ///
    /// Propagates the callback's error, commit-time key conflicts, and
    /// sink failures (state is already applied when a sink fails).
    pub fn query<R>(&self, f: impl FnOnce(&mut Txn<'_>) -> Result<R>) -> Result<R> {
        let mut txn = Txn::open(&self.core);
        match f(&mut txn) {
            Ok(out) => {
                txn.commit()?;
                Ok(out)
            }
            Err(e) => {
                txn.rollback();
                Err(e)
            }
        }
    }

    /// A short transaction scoped to a single row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the row is not live.
    pub fn query_at<R>(&self, idx: u32, f: impl FnOnce(&mut Row<'_, '_>) -> Result<R>) -> Result<R> {
        if !self.core.fill.read().contains(idx) {
            return Err(Error::NotFound(idx));
        }
        self.query(|txn| txn.at(idx, f))
    }

    /// A short transaction scoped to the row holding `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingPrimaryKey`] or [`Error::UnknownKey`].
    pub fn query_key<R>(&self, key: i64, f: impl FnOnce(&mut Row<'_, '_>) -> Result<R>) -> Result<R> {
        let idx = self.row_of(key)?;
        self.query_at(idx, f)
    }

    /// Deletes the row at `idx`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the row is not live.
    pub fn delete_at(&self, idx: u32) -> Result<()> {
        self.query_at(idx, |row| {
            row.delete();
            Ok(())
        })
    }

    /// Deletes the row holding `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingPrimaryKey`] or [`Error::UnknownKey`].
    pub fn delete_key(&self, key: i64) -> Result<()> {
        self.query_key(key, |row| {
            row.delete();
            Ok(())
        })
    }

    fn row_of(&self, key: i64) -> Result<u32> {
        let schema = self.core.schema.read();
        let pk = schema.pk.as_deref().ok_or(Error::MissingPrimaryKey)?;
        let col = schema.column(pk)?;
        let key_col = col.as_key().ok_or(Error::MissingPrimaryKey)?;
        let idx = key_col.seek(key).ok_or(Error::UnknownKey(key))?;
        if !self.core.fill.read().contains(idx) {
            return Err(Error::UnknownKey(key));
        }
        Ok(idx)
    }

    // ---------------------------------------------------------------------
    // Replication
    // ---------------------------------------------------------------------

    /// Installs the commit-log sink; every subsequent successful commit is
    /// appended in FIFO order.
    pub fn attach_sink(&self, sink: impl CommitSink + 'static) {
        *self.core.sink.lock() = Some(Box::new(sink));
    }

    /// Applies a foreign commit through the normal apply path.
    ///
    /// Commits at or below the replay high-water mark are skipped, which
    /// de-duplicates re-delivered frames; `Merge` records are therefore
    /// applied exactly once per commit id.
    ///
    /// # Errors
    ///
    /// This call does not currently fail; malformed buffers are dropped and
    /// logged per the encoding-error policy.
    pub fn replay(&self, commit: &Commit) -> Result<()> {
        if commit.id != 0 && commit.id <= self.core.replay_mark.load(Ordering::Acquire) {
            return Ok(());
        }
        let schema = self.core.schema.read();
        {
            let _chunk = self.core.locks.exclusive(commit.chunk);
            for buffer in &commit.updates {
                let mut buffer = buffer.clone();
                apply_buffer(&self.core, &schema, commit.chunk, &mut buffer);
            }
        }
        self.core
            .replay_mark
            .fetch_max(commit.id, Ordering::AcqRel);
        Ok(())
    }
}

/// Applies one buffer for one chunk. The chunk's exclusive lock and a
/// schema guard are held by the caller.
///
/// The base column applies before its computed indices, so merge records
/// rewritten by `Reader::swap` expose final values to every index rule.
pub(crate) fn apply_buffer(core: &Core, schema: &Schema, chunk: u32, buffer: &mut Buffer) {
    if buffer.column() == ROW_COLUMN {
        apply_row_ops(core, schema, chunk, buffer);
        return;
    }
    let Some(column) = schema.columns.get(buffer.column()) else {
        warn!(column = buffer.column(), "dropping buffer for unknown column");
        return;
    };
    column.grow((chunk << CHUNK_SHIFT) | (CHUNK_SIZE - 1));
    {
        let mut reader = buffer.reader(chunk);
        column.apply(chunk, &mut reader);
    }
    if let Some(deps) = schema.indexes.get(buffer.column()) {
        for name in deps {
            if let Some(index) = schema.columns.get(name) {
                let mut reader = buffer.reader(chunk);
                index.apply(chunk, &mut reader);
            }
        }
    }
}

/// Replays row-level inserts and deletes from the reserved row buffer.
fn apply_row_ops(core: &Core, schema: &Schema, chunk: u32, buffer: &mut Buffer) {
    let mut reader = buffer.reader(chunk);
    while reader.next() {
        let idx = reader.offset();
        match reader.op() {
            Op::PutTrue => core.fill.write().set(idx),
            Op::Delete | Op::PutFalse => {
                for column in schema.columns.values() {
                    column.erase(idx);
                }
                core.fill.write().unset(idx);
            }
            Op::Put | Op::Merge => {}
        }
    }
}

/// Nanoseconds since the Unix epoch, saturating at `i64::MAX`.
pub(crate) fn now_nanos() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
}
