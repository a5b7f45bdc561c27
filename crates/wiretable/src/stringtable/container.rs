use std::collections::{HashMap, HashSet};
use std::fmt;

use super::table::{EntryImage, SnapshotSize};
use super::{
    MAX_TABLE_ENTRIES, MAX_TABLE_NAME_LENGTH, MAX_TABLES, NetworkStringTable, StringIndex,
    StringTableError, TableFlags, TableId,
};
use crate::buffer::{BufferError, ByteReader, ByteWriter};

/// Replica-side hook, called for every entry a snapshot or update adds or
/// changes.
pub trait StringTableObserver {
    fn string_changed(&mut self, table: &NetworkStringTable, index: StringIndex);
}

/// Issued by [`StringTableContainer::create_table`]. Stops resolving once the
/// container drops its tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableHandle {
    id: TableId,
    generation: u32,
}

impl TableHandle {
    pub fn id(&self) -> TableId {
        self.id
    }
}

pub struct StringTableContainer {
    tables: Vec<NetworkStringTable>,
    by_name: HashMap<String, TableId>,
    generation: u32,
    tick: u32,
    allow_creation: bool,
    observer: Option<Box<dyn StringTableObserver>>,
    snapshot_size: SnapshotSize,
}

impl fmt::Debug for StringTableContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StringTableContainer")
            .field("tables", &self.tables)
            .field("generation", &self.generation)
            .field("tick", &self.tick)
            .field("allow_creation", &self.allow_creation)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl Default for StringTableContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl StringTableContainer {
    pub fn new() -> Self {
        Self {
            tables: Vec::new(),
            by_name: HashMap::new(),
            generation: 0,
            tick: 0,
            allow_creation: true,
            observer: None,
            snapshot_size: empty_snapshot_size(),
        }
    }

    pub fn create_table(
        &mut self,
        name: &str,
        max_entries: usize,
    ) -> Result<TableHandle, StringTableError> {
        self.create_table_with(name, max_entries, TableFlags::empty(), 0)
    }

    pub fn create_table_with(
        &mut self,
        name: &str,
        max_entries: usize,
        flags: TableFlags,
        user_data_size: u16,
    ) -> Result<TableHandle, StringTableError> {
        if !self.allow_creation {
            return Err(StringTableError::CreationNotAllowed);
        }
        validate_name(name)?;
        if max_entries == 0 || max_entries > MAX_TABLE_ENTRIES {
            return Err(StringTableError::InvalidCapacity(max_entries));
        }
        if user_data_size as usize > super::MAX_USER_DATA_SIZE {
            return Err(StringTableError::UserDataTooLong(user_data_size as usize));
        }
        if self.by_name.contains_key(name) {
            return Err(StringTableError::DuplicateName(name.to_owned()));
        }
        if self.tables.len() >= MAX_TABLES {
            return Err(StringTableError::TooManyTables);
        }

        let id = self.insert_table(name, max_entries, flags, user_data_size);
        log::debug!("created string table '{}' ({} entries)", name, max_entries);

        Ok(TableHandle {
            id,
            generation: self.generation,
        })
    }

    fn insert_table(
        &mut self,
        name: &str,
        max_entries: usize,
        flags: TableFlags,
        user_data_size: u16,
    ) -> TableId {
        let id = TableId(self.tables.len() as u16);
        self.tables.push(NetworkStringTable::new(
            id,
            name.to_owned(),
            max_entries,
            flags,
            user_data_size,
            self.tick,
            self.snapshot_size.clone(),
        ));
        self.by_name.insert(name.to_owned(), id);
        id
    }

    pub fn find_table(&self, name: &str) -> Option<&NetworkStringTable> {
        self.by_name.get(name).map(|id| &self.tables[id.index()])
    }

    pub fn find_table_mut(&mut self, name: &str) -> Option<&mut NetworkStringTable> {
        let id = *self.by_name.get(name)?;
        self.tables.get_mut(id.index())
    }

    pub fn table(&self, id: TableId) -> Option<&NetworkStringTable> {
        self.tables.get(id.index())
    }

    pub fn table_mut(&mut self, id: TableId) -> Option<&mut NetworkStringTable> {
        self.tables.get_mut(id.index())
    }

    pub fn resolve(&self, handle: TableHandle) -> Option<&NetworkStringTable> {
        if handle.generation != self.generation {
            return None;
        }
        self.table(handle.id)
    }

    pub fn resolve_mut(&mut self, handle: TableHandle) -> Option<&mut NetworkStringTable> {
        if handle.generation != self.generation {
            return None;
        }
        self.table_mut(handle.id)
    }

    /// Drops every table. Handles issued before this call no longer resolve.
    pub fn remove_all_tables(&mut self) {
        self.tables.clear();
        self.by_name.clear();
        self.snapshot_size.set(EMPTY_SNAPSHOT_BYTES);
        self.generation = self.generation.wrapping_add(1);
    }

    pub fn num_tables(&self) -> usize {
        self.tables.len()
    }

    /// Tables in creation order, which is also id order.
    pub fn tables(&self) -> impl Iterator<Item = &NetworkStringTable> {
        self.tables.iter()
    }

    /// Bytes [`write_string_tables`] would produce right now.
    ///
    /// [`write_string_tables`]: Self::write_string_tables
    pub fn snapshot_size(&self) -> usize {
        self.snapshot_size.get()
    }

    pub fn total_strings(&self) -> usize {
        self.tables.iter().map(NetworkStringTable::len).sum()
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    /// Sets the tick stamped on every following insertion or change.
    pub fn set_tick(&mut self, tick: u32) {
        self.tick = tick;
        for table in &mut self.tables {
            table.set_tick(tick);
        }
    }

    pub fn allow_creation(&self) -> bool {
        self.allow_creation
    }

    pub fn set_allow_creation(&mut self, allow: bool) {
        self.allow_creation = allow;
    }

    pub fn set_observer(&mut self, observer: Box<dyn StringTableObserver>) {
        self.observer = Some(observer);
    }

    pub fn clear_observer(&mut self) -> Option<Box<dyn StringTableObserver>> {
        self.observer.take()
    }

    pub fn changed_since(&self, tick: u32) -> bool {
        self.tables.iter().any(|table| table.changed_since(tick))
    }

    /// Writes every table, in creation order, with all of its entries in
    /// index order.
    pub fn write_string_tables(&self, writer: &mut ByteWriter) -> Result<(), StringTableError> {
        writer.write_len(self.tables.len())?;
        for table in &self.tables {
            table.write_layout(writer)?;
            table.write_entries(writer)?;
        }
        Ok(())
    }

    /// Rebuilds the tables written by [`write_string_tables`].
    ///
    /// The whole buffer is decoded and validated before anything changes.
    /// Tables that already exist at the same id keep their handles and are
    /// refilled; if the local layout disagrees with the writer's, every local
    /// table is dropped and recreated so ids line up again.
    ///
    /// [`write_string_tables`]: Self::write_string_tables
    pub fn read_string_tables(&mut self, reader: &mut ByteReader<'_>) -> Result<(), StringTableError> {
        let count = reader.read_u16()? as usize;
        if count > MAX_TABLES {
            return Err(BufferError::LengthExceeded {
                len: count,
                max: MAX_TABLES,
            }
            .into());
        }

        let mut images = Vec::with_capacity(count);
        let mut names = HashSet::with_capacity(count);
        for _ in 0..count {
            let image = TableImage::read(reader)?;
            if !names.insert(image.name) {
                return Err(StringTableError::DuplicateName(image.name.to_owned()));
            }
            images.push(image);
        }

        let layout_matches = self.tables.len() <= images.len()
            && self
                .tables
                .iter()
                .zip(&images)
                .all(|(table, image)| table.name() == image.name);
        if !layout_matches {
            log::debug!("string table layout changed, rebuilding {} tables", count);
            self.remove_all_tables();
        }

        for (position, image) in images.iter().enumerate() {
            let id = if position < self.tables.len() {
                TableId(position as u16)
            } else {
                self.insert_table(image.name, image.max_entries, image.flags, image.user_data_size)
            };

            self.tables[id.index()].reset(image.max_entries, image.flags, image.user_data_size);
            for (index, entry) in image.entries.iter().enumerate() {
                self.tables[id.index()].apply_entry(index, entry.string, entry.user_data)?;
                self.notify(id, StringIndex(index as u16));
            }
        }

        Ok(())
    }

    /// Writes the entries of every table changed after `since_tick`. Returns
    /// the number of tables written.
    pub fn write_updates(
        &self,
        writer: &mut ByteWriter,
        since_tick: u32,
    ) -> Result<usize, StringTableError> {
        let changed: Vec<&NetworkStringTable> = self
            .tables
            .iter()
            .filter(|table| table.changed_since(since_tick))
            .collect();

        writer.write_u32(self.tick)?;
        writer.write_len(changed.len())?;
        for table in &changed {
            table.write_changes(writer, since_tick)?;
        }
        Ok(changed.len())
    }

    /// Applies an update written by [`write_updates`] and returns the tick it
    /// was written at. Applying the same update twice changes nothing.
    ///
    /// [`write_updates`]: Self::write_updates
    pub fn read_updates(&mut self, reader: &mut ByteReader<'_>) -> Result<u32, StringTableError> {
        let tick = reader.read_u32()?;
        let count = reader.read_u16()? as usize;
        if count > MAX_TABLES {
            return Err(BufferError::LengthExceeded {
                len: count,
                max: MAX_TABLES,
            }
            .into());
        }

        self.set_tick(tick);

        for _ in 0..count {
            let id = TableId(reader.read_u16()?);
            let Some(table) = self.tables.get(id.index()) else {
                return Err(StringTableError::UnknownTable(id.to_string()));
            };
            let entries = reader.read_len(table.max_entries())?;

            for _ in 0..entries {
                let index = reader.read_u16()?;
                let entry = EntryImage::read(reader)?;
                let changed = self.tables[id.index()].apply_entry(
                    index as usize,
                    entry.string,
                    entry.user_data,
                )?;
                if changed {
                    self.notify(id, StringIndex(index));
                }
            }
        }

        Ok(tick)
    }

    fn notify(&mut self, id: TableId, index: StringIndex) {
        if let Some(observer) = self.observer.as_mut() {
            observer.string_changed(&self.tables[id.index()], index);
        }
    }
}

/// The table count that leads every snapshot.
const EMPTY_SNAPSHOT_BYTES: usize = 2;

fn empty_snapshot_size() -> SnapshotSize {
    let size = SnapshotSize::default();
    size.set(EMPTY_SNAPSHOT_BYTES);
    size
}

fn validate_name(name: &str) -> Result<(), StringTableError> {
    if name.is_empty() || name.len() > MAX_TABLE_NAME_LENGTH {
        return Err(StringTableError::InvalidName(name.to_owned()));
    }
    Ok(())
}

struct TableImage<'a> {
    name: &'a str,
    max_entries: usize,
    flags: TableFlags,
    user_data_size: u16,
    entries: Vec<EntryImage<'a>>,
}

impl<'a> TableImage<'a> {
    fn read(reader: &mut ByteReader<'a>) -> Result<Self, StringTableError> {
        let name = reader.read_str(MAX_TABLE_NAME_LENGTH)?;
        validate_name(name)?;

        let max_entries = reader.read_u32()? as usize;
        if max_entries == 0 || max_entries > MAX_TABLE_ENTRIES {
            return Err(StringTableError::InvalidCapacity(max_entries));
        }
        let flags = TableFlags::from_bits_truncate(reader.read_u8()?);
        let user_data_size = reader.read_u16()?;

        let count = reader.read_len(max_entries)?;
        let mut entries = Vec::with_capacity(count);
        let mut seen = HashSet::with_capacity(count);
        for index in 0..count {
            let entry = EntryImage::read(reader)?;
            if !seen.insert(entry.string) {
                return Err(StringTableError::Desync {
                    table: name.to_owned(),
                    index,
                });
            }
            entries.push(entry);
        }

        Ok(Self {
            name,
            max_entries,
            flags,
            user_data_size,
            entries,
        })
    }
}
