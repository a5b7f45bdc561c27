//! Replicated index -> string catalogs.
//!
//! The authoritative side fills tables during level load and hands out the
//! numeric [`StringIndex`] of each string so later messages can refer to it
//! with two bytes instead of the full path. Replicas rebuild the same tables
//! from a snapshot and then follow tick-stamped updates; both paths must assign
//! exactly the same indices as the writer.

mod container;
mod table;

use std::fmt;

use bitflags::bitflags;

use crate::buffer::BufferError;

pub use container::{StringTableContainer, StringTableObserver, TableHandle};
pub use table::{NetworkStringTable, StringTableEntry};

pub const MAX_TABLES: usize = 32;
/// Entry counts and indices travel as `u16`.
pub const MAX_TABLE_ENTRIES: usize = u16::MAX as usize;
pub const MAX_TABLE_NAME_LENGTH: usize = 64;
pub const MAX_STRING_LENGTH: usize = 1024;
pub const MAX_USER_DATA_SIZE: usize = 4096;
/// Largest encoded snapshot of a whole container. Insertions that would grow
/// the snapshot past this are refused.
pub const MAX_SNAPSHOT_BYTES: usize = 4 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub u16);

impl TableId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringIndex(pub u16);

impl StringIndex {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StringIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TableFlags: u8 {
        /// User data of existing entries may be replaced after insertion.
        const MUTABLE_USER_DATA = 1 << 0;
        /// Every entry carries exactly `user_data_size` bytes of user data.
        const FIXED_SIZE_USER_DATA = 1 << 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StringTableError {
    #[error("table '{table}' is full ({max_entries} entries)")]
    CapacityExceeded { table: String, max_entries: usize },
    #[error("table '{0}' already exists")]
    DuplicateName(String),
    #[error("invalid table capacity {0}")]
    InvalidCapacity(usize),
    #[error("invalid table name '{0}'")]
    InvalidName(String),
    #[error("container already holds {MAX_TABLES} tables")]
    TooManyTables,
    #[error("table creation is not allowed right now")]
    CreationNotAllowed,
    #[error("table '{0}' is locked")]
    Locked(String),
    #[error("string of {0} bytes is too long")]
    StringTooLong(usize),
    #[error("user data of {0} bytes is too long")]
    UserDataTooLong(usize),
    #[error("user data must be {expected} bytes, got {actual}")]
    UserDataSizeMismatch { expected: usize, actual: usize },
    #[error("user data of table '{0}' cannot change after insertion")]
    UserDataImmutable(String),
    #[error("no entry {index} in table '{table}'")]
    UnknownIndex { table: String, index: usize },
    #[error("unknown table {0}")]
    UnknownTable(String),
    #[error("adding to table '{table}' would grow the snapshot to {bytes} bytes")]
    SnapshotTooLarge { table: String, bytes: usize },
    #[error("replica of table '{table}' diverged at index {index}")]
    Desync { table: String, index: usize },
    #[error(transparent)]
    Buffer(#[from] BufferError),
}
