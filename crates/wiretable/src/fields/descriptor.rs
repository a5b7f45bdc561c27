use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            Endian::Big
        } else {
            Endian::Little
        }
    }

    pub const fn opposite(self) -> Self {
        match self {
            Endian::Little => Endian::Big,
            Endian::Big => Endian::Little,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Character,
    Boolean,
    Short,
    Integer,
    Float,
    Int64,
    Double,
    Vector2,
    Vector3,
    Vector4,
    Quaternion,
    /// Four independent bytes.
    Color32,
    /// A nested record described by the named map.
    Embedded(String),
}

impl FieldKind {
    /// Width of one swapped word and the number of words per element.
    /// `None` for embedded records, whose size comes from their map.
    pub fn layout(&self) -> Option<(usize, usize)> {
        match self {
            FieldKind::Character | FieldKind::Boolean => Some((1, 1)),
            FieldKind::Color32 => Some((1, 4)),
            FieldKind::Short => Some((2, 1)),
            FieldKind::Integer | FieldKind::Float => Some((4, 1)),
            FieldKind::Int64 | FieldKind::Double => Some((8, 1)),
            FieldKind::Vector2 => Some((4, 2)),
            FieldKind::Vector3 => Some((4, 3)),
            FieldKind::Vector4 | FieldKind::Quaternion => Some((4, 4)),
            FieldKind::Embedded(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    /// Byte offset from the start of the record.
    pub offset: usize,
    /// Number of consecutive elements, 1 for plain fields.
    pub count: usize,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, kind: FieldKind, offset: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            offset,
            count: 1,
        }
    }

    pub fn array(name: impl Into<String>, kind: FieldKind, offset: usize, count: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            offset,
            count,
        }
    }

    pub fn embedded(
        name: impl Into<String>,
        map: impl Into<String>,
        offset: usize,
        count: usize,
    ) -> Self {
        Self::array(name, FieldKind::Embedded(map.into()), offset, count)
    }
}

/// Field layout of one record type. `base` names the map whose fields the
/// record inherits; they live at their own offsets inside this record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMap {
    pub name: String,
    pub size: usize,
    pub base: Option<String>,
    pub fields: Vec<FieldDescriptor>,
}

impl DataMap {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
            base: None,
            fields: Vec::new(),
        }
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }
}

/// Maps refer to each other by name, so the registry is the descriptor tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataMapRegistry {
    maps: HashMap<String, DataMap>,
}

impl DataMapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a map, returning the one it replaced.
    pub fn register(&mut self, map: DataMap) -> Option<DataMap> {
        self.maps.insert(map.name.clone(), map)
    }

    pub fn get(&self, name: &str) -> Option<&DataMap> {
        self.maps.get(name)
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}
