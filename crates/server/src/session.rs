use wiretable::stringtable::StringTableError;
use wiretable::{StringIndex, StringTableContainer, TableFlags};

use crate::manifest::Manifest;

pub const DOWNLOADABLES: &str = "downloadables";
pub const MODEL_PRECACHE: &str = "modelprecache";
pub const SOUND_PRECACHE: &str = "soundprecache";
pub const USERINFO: &str = "userinfo";

/// Tables every level starts with, in creation order.
const STANDARD_TABLES: [(&str, usize, TableFlags); 4] = [
    (DOWNLOADABLES, 8192, TableFlags::empty()),
    (MODEL_PRECACHE, 4096, TableFlags::empty()),
    (SOUND_PRECACHE, 8192, TableFlags::empty()),
    (USERINFO, 256, TableFlags::MUTABLE_USER_DATA),
];

/// The authoritative string tables of the running level.
#[derive(Debug)]
pub struct Session {
    tables: StringTableContainer,
    map: String,
    level_loads: u32,
}

impl Session {
    pub fn new() -> Self {
        let mut tables = StringTableContainer::new();
        tables.set_tick(1);
        Self {
            tables,
            map: String::new(),
            level_loads: 0,
        }
    }

    pub fn map(&self) -> &str {
        &self.map
    }

    pub fn level_loads(&self) -> u32 {
        self.level_loads
    }

    pub fn tables(&self) -> &StringTableContainer {
        &self.tables
    }

    pub fn tick(&self) -> u32 {
        self.tables.tick()
    }

    /// Closes the current tick; later changes are stamped with the next one.
    pub fn advance_tick(&mut self) {
        let next = self.tables.tick().wrapping_add(1);
        self.tables.set_tick(next);
    }

    /// Drops every table and builds the standard set for `map`, filled from
    /// the manifest. Returns the number of strings loaded.
    pub fn load_level(
        &mut self,
        map: &str,
        manifest: Option<&Manifest>,
    ) -> Result<usize, StringTableError> {
        self.tables.remove_all_tables();
        self.tables.set_allow_creation(true);
        for (name, max_entries, flags) in STANDARD_TABLES {
            self.tables.create_table_with(name, max_entries, flags, 0)?;
        }

        if let Some(manifest) = manifest {
            for entry in manifest.entries() {
                let Some(table) = self.tables.find_table_mut(&entry.table) else {
                    log::warn!(
                        "Manifest names unknown table '{}', skipping '{}'",
                        entry.table,
                        entry.value
                    );
                    continue;
                };
                if let Err(e) = table.add_string(&entry.value, None) {
                    log::warn!("Skipping manifest entry '{}': {}", entry.value, e);
                }
            }
        }

        self.tables.set_allow_creation(false);
        self.map = map.to_string();
        self.level_loads += 1;

        let strings = self.tables.total_strings();
        log::info!("Level '{}' loaded with {} strings", map, strings);
        Ok(strings)
    }

    pub fn add_string(&mut self, table: &str, value: &str) -> Result<StringIndex, StringTableError> {
        self.tables
            .find_table_mut(table)
            .ok_or_else(|| StringTableError::UnknownTable(table.to_string()))?
            .add_string(value, None)
    }

    /// Publishes a client's name under `client<id>` in the userinfo table.
    pub fn add_user(&mut self, client_id: u32, name: &str) -> Result<StringIndex, StringTableError> {
        self.tables
            .find_table_mut(USERINFO)
            .ok_or_else(|| StringTableError::UnknownTable(USERINFO.to_string()))?
            .add_string(&user_key(client_id), Some(name.as_bytes()))
    }

    /// Strings never leave a table, so a departed client keeps its entry
    /// with empty user data.
    pub fn remove_user(&mut self, client_id: u32) {
        let Some(table) = self.tables.find_table_mut(USERINFO) else {
            return;
        };
        if let Some(index) = table.find_index(&user_key(client_id)) {
            if let Err(e) = table.set_user_data(index, &[]) {
                log::warn!("Failed to clear userinfo for client {}: {}", client_id, e);
            }
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

fn user_key(client_id: u32) -> String {
    format!("client{}", client_id)
}
