use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use super::{
    MAX_SNAPSHOT_BYTES, MAX_STRING_LENGTH, MAX_USER_DATA_SIZE, StringIndex, StringTableError,
    TableFlags, TableId,
};
use crate::buffer::{ByteReader, ByteWriter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringTableEntry {
    string: String,
    user_data: Option<Vec<u8>>,
    changed_tick: u32,
}

impl StringTableEntry {
    pub fn string(&self) -> &str {
        &self.string
    }

    pub fn user_data(&self) -> Option<&[u8]> {
        self.user_data.as_deref()
    }

    /// Tick of the insertion or of the last user data change.
    pub fn changed_tick(&self) -> u32 {
        self.changed_tick
    }
}

/// Encoded snapshot size of a container, shared with each of its tables.
#[derive(Debug, Clone, Default)]
pub(super) struct SnapshotSize(Rc<Cell<usize>>);

impl SnapshotSize {
    pub fn get(&self) -> usize {
        self.0.get()
    }

    pub fn set(&self, bytes: usize) {
        self.0.set(bytes);
    }

    pub fn grow(&self, bytes: usize) {
        self.0.set(self.0.get() + bytes);
    }

    pub fn shrink(&self, bytes: usize) {
        self.0.set(self.0.get().saturating_sub(bytes));
    }
}

/// Bytes one table adds to a snapshot before any entries.
fn layout_size(name: &str) -> usize {
    // name, max entries, flags, user data size, entry count
    2 + name.len() + 4 + 1 + 2 + 2
}

fn entry_size(string: &str, user_data: Option<&[u8]>) -> usize {
    2 + string.len() + 1 + user_data.map_or(0, |data| 2 + data.len())
}

#[derive(Debug)]
pub struct NetworkStringTable {
    id: TableId,
    name: String,
    max_entries: usize,
    flags: TableFlags,
    user_data_size: u16,
    entries: Vec<StringTableEntry>,
    lookup: HashMap<String, StringIndex>,
    locked: bool,
    tick: u32,
    changed_tick: u32,
    entry_bytes: usize,
    snapshot_size: SnapshotSize,
}

impl NetworkStringTable {
    pub(super) fn new(
        id: TableId,
        name: String,
        max_entries: usize,
        flags: TableFlags,
        user_data_size: u16,
        tick: u32,
        snapshot_size: SnapshotSize,
    ) -> Self {
        snapshot_size.grow(layout_size(&name));
        Self {
            id,
            name,
            max_entries,
            flags,
            user_data_size,
            entries: Vec::new(),
            lookup: HashMap::new(),
            locked: false,
            tick,
            changed_tick: tick,
            entry_bytes: 0,
            snapshot_size,
        }
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn flags(&self) -> TableFlags {
        self.flags
    }

    /// Size every entry's user data must have, for fixed-size tables.
    pub fn user_data_size(&self) -> Option<usize> {
        self.flags
            .contains(TableFlags::FIXED_SIZE_USER_DATA)
            .then_some(self.user_data_size as usize)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_entries
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// A locked table refuses local insertions and user data changes.
    /// Replication still applies to it.
    pub fn lock(&mut self, locked: bool) {
        self.locked = locked;
    }

    pub fn changed_tick(&self) -> u32 {
        self.changed_tick
    }

    pub fn changed_since(&self, tick: u32) -> bool {
        self.changed_tick > tick
    }

    pub(super) fn set_tick(&mut self, tick: u32) {
        self.tick = tick;
    }

    /// Returns the index of `value`, inserting it at the next free index when
    /// it is not in the table yet. A full table is left untouched.
    pub fn add_string(
        &mut self,
        value: &str,
        user_data: Option<&[u8]>,
    ) -> Result<StringIndex, StringTableError> {
        if self.locked {
            return Err(StringTableError::Locked(self.name.clone()));
        }
        if value.len() > MAX_STRING_LENGTH {
            return Err(StringTableError::StringTooLong(value.len()));
        }
        if let Some(data) = user_data {
            self.check_user_data(data)?;
        }

        if let Some(&index) = self.lookup.get(value) {
            if let Some(data) = user_data {
                if self.entries[index.index()].user_data() != Some(data) {
                    self.set_user_data(index, data)?;
                }
            }
            return Ok(index);
        }

        if self.is_full() {
            return Err(StringTableError::CapacityExceeded {
                table: self.name.clone(),
                max_entries: self.max_entries,
            });
        }
        self.check_snapshot_growth(entry_size(value, user_data))?;

        Ok(self.push_entry(value, user_data))
    }

    pub fn set_user_data(
        &mut self,
        index: StringIndex,
        data: &[u8],
    ) -> Result<(), StringTableError> {
        if self.locked {
            return Err(StringTableError::Locked(self.name.clone()));
        }
        if !self.flags.contains(TableFlags::MUTABLE_USER_DATA) {
            return Err(StringTableError::UserDataImmutable(self.name.clone()));
        }
        self.check_user_data(data)?;

        let Some(entry) = self.entries.get(index.index()) else {
            return Err(StringTableError::UnknownIndex {
                table: self.name.clone(),
                index: index.index(),
            });
        };
        let old_size = entry_size(&entry.string, entry.user_data());
        let new_size = entry_size(&entry.string, Some(data));
        self.check_snapshot_growth(new_size.saturating_sub(old_size))?;

        let tick = self.tick;
        let entry = &mut self.entries[index.index()];
        entry.user_data = Some(data.to_vec());
        entry.changed_tick = tick;
        self.changed_tick = tick;
        self.resize_entries(old_size, new_size);
        Ok(())
    }

    pub fn string(&self, index: StringIndex) -> Option<&str> {
        self.entries.get(index.index()).map(StringTableEntry::string)
    }

    pub fn user_data(&self, index: StringIndex) -> Option<&[u8]> {
        self.entries
            .get(index.index())
            .and_then(StringTableEntry::user_data)
    }

    pub fn entry(&self, index: StringIndex) -> Option<&StringTableEntry> {
        self.entries.get(index.index())
    }

    pub fn find_index(&self, value: &str) -> Option<StringIndex> {
        self.lookup.get(value).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StringIndex, &StringTableEntry)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(index, entry)| (StringIndex(index as u16), entry))
    }

    fn check_user_data(&self, data: &[u8]) -> Result<(), StringTableError> {
        if data.len() > MAX_USER_DATA_SIZE {
            return Err(StringTableError::UserDataTooLong(data.len()));
        }
        if let Some(expected) = self.user_data_size() {
            if data.len() != expected {
                return Err(StringTableError::UserDataSizeMismatch {
                    expected,
                    actual: data.len(),
                });
            }
        }
        Ok(())
    }

    fn check_snapshot_growth(&self, bytes: usize) -> Result<(), StringTableError> {
        let total = self.snapshot_size.get() + bytes;
        if total > MAX_SNAPSHOT_BYTES {
            return Err(StringTableError::SnapshotTooLarge {
                table: self.name.clone(),
                bytes: total,
            });
        }
        Ok(())
    }

    fn resize_entries(&mut self, old_size: usize, new_size: usize) {
        self.entry_bytes = self.entry_bytes - old_size + new_size;
        self.snapshot_size.shrink(old_size);
        self.snapshot_size.grow(new_size);
    }

    fn push_entry(&mut self, value: &str, user_data: Option<&[u8]>) -> StringIndex {
        let index = StringIndex(self.entries.len() as u16);
        self.resize_entries(0, entry_size(value, user_data));
        self.entries.push(StringTableEntry {
            string: value.to_owned(),
            user_data: user_data.map(<[u8]>::to_vec),
            changed_tick: self.tick,
        });
        self.lookup.insert(value.to_owned(), index);
        self.changed_tick = self.tick;
        index
    }

    /// Drops every entry and takes over the layout sent by the writer.
    pub(super) fn reset(&mut self, max_entries: usize, flags: TableFlags, user_data_size: u16) {
        self.entries.clear();
        self.lookup.clear();
        self.resize_entries(self.entry_bytes, 0);
        self.max_entries = max_entries;
        self.flags = flags;
        self.user_data_size = user_data_size;
        self.changed_tick = self.tick;
    }

    /// Applies one replicated entry. Appending is only valid at the next
    /// free index; an existing index must still hold the same string.
    /// Returns whether anything changed.
    pub(super) fn apply_entry(
        &mut self,
        index: usize,
        string: &str,
        user_data: Option<&[u8]>,
    ) -> Result<bool, StringTableError> {
        let len = self.entries.len();

        if index == len {
            if self.is_full() || self.lookup.contains_key(string) {
                return Err(self.desync(index));
            }
            self.push_entry(string, user_data);
            return Ok(true);
        }

        if index > len || self.entries[index].string != string {
            return Err(self.desync(index));
        }

        let tick = self.tick;
        let entry = &mut self.entries[index];
        if entry.user_data() == user_data {
            return Ok(false);
        }
        let old_size = entry_size(&entry.string, entry.user_data());
        let new_size = entry_size(&entry.string, user_data);
        entry.user_data = user_data.map(<[u8]>::to_vec);
        entry.changed_tick = tick;
        self.changed_tick = tick;
        self.resize_entries(old_size, new_size);
        Ok(true)
    }

    fn desync(&self, index: usize) -> StringTableError {
        log::warn!("string table '{}' diverged at index {}", self.name, index);
        StringTableError::Desync {
            table: self.name.clone(),
            index,
        }
    }

    pub(super) fn write_layout(&self, writer: &mut ByteWriter) -> Result<(), StringTableError> {
        writer.write_str(&self.name)?;
        writer.write_u32(self.max_entries as u32)?;
        writer.write_u8(self.flags.bits())?;
        writer.write_u16(self.user_data_size)?;
        Ok(())
    }

    pub(super) fn write_entries(&self, writer: &mut ByteWriter) -> Result<(), StringTableError> {
        writer.write_len(self.entries.len())?;
        for entry in &self.entries {
            write_entry_body(writer, entry)?;
        }
        Ok(())
    }

    /// Writes the entries stamped after `since_tick`, each with its index.
    pub(super) fn write_changes(
        &self,
        writer: &mut ByteWriter,
        since_tick: u32,
    ) -> Result<(), StringTableError> {
        let changed: Vec<(StringIndex, &StringTableEntry)> = self
            .iter()
            .filter(|(_, entry)| entry.changed_tick > since_tick)
            .collect();

        writer.write_u16(self.id.0)?;
        writer.write_len(changed.len())?;
        for (index, entry) in changed {
            writer.write_u16(index.0)?;
            write_entry_body(writer, entry)?;
        }
        Ok(())
    }
}

fn write_entry_body(writer: &mut ByteWriter, entry: &StringTableEntry) -> Result<(), StringTableError> {
    writer.write_str(&entry.string)?;
    match entry.user_data() {
        Some(data) => {
            writer.write_bool(true)?;
            writer.write_blob(data)?;
        }
        None => writer.write_bool(false)?,
    }
    Ok(())
}

/// One entry as it sits in a received buffer.
#[derive(Debug, Clone, Copy)]
pub(super) struct EntryImage<'a> {
    pub string: &'a str,
    pub user_data: Option<&'a [u8]>,
}

impl<'a> EntryImage<'a> {
    pub fn read(reader: &mut ByteReader<'a>) -> Result<Self, StringTableError> {
        let string = reader.read_str(MAX_STRING_LENGTH)?;
        let user_data = if reader.read_bool()? {
            Some(reader.read_blob(MAX_USER_DATA_SIZE)?)
        } else {
            None
        };
        Ok(Self { string, user_data })
    }
}
