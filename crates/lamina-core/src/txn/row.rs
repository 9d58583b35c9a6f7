//! Cursor-bound row handle with typed accessors.

use std::sync::Arc;
use std::time::Duration;

use super::Txn;
use crate::bitmap::chunk_of;
use crate::collection::{now_nanos, EXPIRE_COLUMN};
use crate::column::{Column, ColumnKind, Value};
use crate::commit::Op;
use crate::error::{Error, Result};

/// A transaction cursor positioned at one row.
///
/// Getters read the committed value at the cursor; setters and merges stage
/// records into the transaction's per-column buffers and become visible on
/// commit. Trigger columns accept any setter (the payload is handed to the
/// callback on apply).
pub struct Row<'t, 'a> {
    txn: &'t mut Txn<'a>,
}

fn mismatch(column: &str, expected: &'static str, actual: ColumnKind) -> Error {
    Error::TypeMismatch {
        column: column.to_string(),
        expected,
        actual: actual.name(),
    }
}

impl<'t, 'a> Row<'t, 'a> {
    pub(crate) fn bind(txn: &'t mut Txn<'a>) -> Self {
        Self { txn }
    }

    /// The row index this handle is bound to.
    #[must_use]
    pub fn index(&self) -> u32 {
        self.txn.cursor
    }

    fn column(&self, name: &str) -> Result<Arc<Column>> {
        self.txn
            .schema
            .columns
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownColumn(name.to_string()))
    }

    fn stage(&mut self, name: &str, write: impl FnOnce(&mut crate::commit::Buffer, u32)) {
        let idx = self.txn.cursor;
        let slot = self.txn.slot_for(name);
        write(&mut self.txn.updates[slot], idx);
        self.txn.dirty.set(chunk_of(idx));
    }

    /// The row's dynamic value in `col`, if present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownColumn`] for missing columns.
    pub fn any(&self, col: &str) -> Result<Option<Value>> {
        Ok(self.column(col)?.value(self.txn.cursor))
    }

    /// The committed text value in a string or enum column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownColumn`] or [`Error::TypeMismatch`].
    pub fn string(&self, col: &str) -> Result<Option<Arc<str>>> {
        let column = self.column(col)?;
        match &*column {
            Column::Str(c) => Ok(c.value(self.txn.cursor)),
            Column::Enum(c) => Ok(c.value(self.txn.cursor)),
            other => Err(mismatch(col, "string", other.kind())),
        }
    }

    /// Stages a text PUT into a string or enum column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownColumn`] or [`Error::TypeMismatch`].
    pub fn set_string(&mut self, col: &str, v: &str) -> Result<()> {
        let column = self.column(col)?;
        match &*column {
            Column::Str(_) | Column::Enum(_) | Column::Trigger(_) => {
                self.stage(col, |buf, idx| buf.push_str(Op::Put, idx, v));
                Ok(())
            }
            other => Err(mismatch(col, "string", other.kind())),
        }
    }

    /// Stages a text MERGE; string columns fold it through their reducer,
    /// enum columns treat it as overwrite.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownColumn`] or [`Error::TypeMismatch`].
    pub fn merge_string(&mut self, col: &str, v: &str) -> Result<()> {
        let column = self.column(col)?;
        match &*column {
            Column::Str(_) | Column::Enum(_) | Column::Trigger(_) => {
                self.stage(col, |buf, idx| buf.push_str(Op::Merge, idx, v));
                Ok(())
            }
            other => Err(mismatch(col, "string", other.kind())),
        }
    }

    /// The committed boolean at the cursor; also reads computed indices.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownColumn`] or [`Error::TypeMismatch`].
    pub fn bool(&self, col: &str) -> Result<bool> {
        let column = self.column(col)?;
        match &*column {
            Column::Bool(_) | Column::Index(_) => Ok(column.contains(self.txn.cursor)),
            other => Err(mismatch(col, "bool", other.kind())),
        }
    }

    /// Stages a boolean write; `false` clears the bit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownColumn`] or [`Error::TypeMismatch`].
    pub fn set_bool(&mut self, col: &str, v: bool) -> Result<()> {
        let column = self.column(col)?;
        match &*column {
            Column::Bool(_) | Column::Trigger(_) => {
                let op = if v { Op::PutTrue } else { Op::PutFalse };
                self.stage(col, |buf, idx| buf.push_empty(op, idx));
                Ok(())
            }
            other => Err(mismatch(col, "bool", other.kind())),
        }
    }

    /// The committed primary-key value at the cursor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownColumn`] or [`Error::TypeMismatch`].
    pub fn key(&self, col: &str) -> Result<Option<i64>> {
        let column = self.column(col)?;
        match &*column {
            Column::Key(c) => Ok(c.value(self.txn.cursor)),
            other => Err(mismatch(col, "key", other.kind())),
        }
    }

    /// Stages a primary-key PUT for this row.
    ///
    /// Uniqueness is enforced at commit; a conflicting key aborts the whole
    /// transaction with [`Error::DuplicateKey`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingPrimaryKey`] when no key column exists.
    pub fn set_key(&mut self, v: i64) -> Result<()> {
        let Some(pk) = self.txn.schema.pk.clone() else {
            return Err(Error::MissingPrimaryKey);
        };
        self.stage(&pk, |buf, idx| buf.push_i64(Op::Put, idx, v));
        Ok(())
    }

    /// Stages a column-value DELETE for this row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownColumn`] for missing columns.
    pub fn erase(&mut self, col: &str) -> Result<()> {
        self.column(col)?;
        self.stage(col, |buf, idx| buf.push_empty(Op::Delete, idx));
        Ok(())
    }

    /// Marks the whole row for deletion at commit.
    pub fn delete(&mut self) {
        let idx = self.txn.cursor;
        self.txn.stage_delete(idx);
    }

    /// Stages an expiration deadline `ttl` from now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownColumn`] when the collection was created
    /// without expiration.
    pub fn set_ttl(&mut self, ttl: Duration) -> Result<()> {
        let deadline =
            now_nanos().saturating_add(i64::try_from(ttl.as_nanos()).unwrap_or(i64::MAX));
        self.set_i64(EXPIRE_COLUMN, deadline)
    }

    /// Remaining time until expiration, if a deadline is set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownColumn`] when the collection was created
    /// without expiration.
    pub fn ttl(&self) -> Result<Option<Duration>> {
        let Some(deadline) = self.i64(EXPIRE_COLUMN)? else {
            return Ok(None);
        };
        if deadline == 0 {
            return Ok(None);
        }
        let remaining = deadline.saturating_sub(now_nanos()).max(0);
        #[allow(clippy::cast_sign_loss)] // clamped non-negative above
        Ok(Some(Duration::from_nanos(remaining as u64)))
    }
}

macro_rules! row_numeric {
    ($($get:ident, $set:ident, $merge:ident, $variant:ident, $push:ident, $ty:ty, $name:literal;)*) => {
        impl Row<'_, '_> {
            $(
                /// The committed value at the cursor for this numeric kind.
                ///
                /// # Errors
                ///
                /// Returns [`Error::UnknownColumn`] or [`Error::TypeMismatch`].
                pub fn $get(&self, col: &str) -> Result<Option<$ty>> {
                    let column = self.column(col)?;
                    match &*column {
                        Column::$variant(c) => Ok(c.value(self.txn.cursor)),
                        other => Err(mismatch(col, $name, other.kind())),
                    }
                }

                /// Stages a PUT of this numeric kind.
                ///
                /// # Errors
                ///
                /// Returns [`Error::UnknownColumn`] or [`Error::TypeMismatch`].
                pub fn $set(&mut self, col: &str, v: $ty) -> Result<()> {
                    let column = self.column(col)?;
                    match &*column {
                        Column::$variant(_) | Column::Trigger(_) => {
                            self.stage(col, |buf, idx| buf.$push(Op::Put, idx, v));
                            Ok(())
                        }
                        other => Err(mismatch(col, $name, other.kind())),
                    }
                }

                /// Stages an atomic MERGE of this numeric kind.
                ///
                /// The delta folds into the current value through the
                /// column's reducer (additive by default), and computed
                /// indices observe the merged final.
                ///
                /// # Errors
                ///
                /// Returns [`Error::UnknownColumn`] or [`Error::TypeMismatch`].
                pub fn $merge(&mut self, col: &str, v: $ty) -> Result<()> {
                    let column = self.column(col)?;
                    match &*column {
                        Column::$variant(_) | Column::Trigger(_) => {
                            self.stage(col, |buf, idx| buf.$push(Op::Merge, idx, v));
                            Ok(())
                        }
                        other => Err(mismatch(col, $name, other.kind())),
                    }
                }
            )*
        }
    };
}

row_numeric! {
    i16, set_i16, merge_i16, I16, push_i16, i16, "i16";
    i32, set_i32, merge_i32, I32, push_i32, i32, "i32";
    i64, set_i64, merge_i64, I64, push_i64, i64, "i64";
    u16, set_u16, merge_u16, U16, push_u16, u16, "u16";
    u32, set_u32, merge_u32, U32, push_u32, u32, "u32";
    u64, set_u64, merge_u64, U64, push_u64, u64, "u64";
    f32, set_f32, merge_f32, F32, push_f32, f32, "f32";
    f64, set_f64, merge_f64, F64, push_f64, f64, "f64";
}
