use std::ops::Range;

use bytemuck::Pod;

use super::descriptor::{DataMap, DataMapRegistry, Endian, FieldDescriptor, FieldKind};

pub const MAX_DESCRIPTOR_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SwapError {
    #[error("unknown data map '{0}'")]
    UnknownMap(String),
    #[error("field '{field}' of '{map}' ends at byte {end}, past the record size {size}")]
    FieldOutOfBounds {
        map: String,
        field: String,
        end: usize,
        size: usize,
    },
    #[error("{actual} bytes do not hold {count} '{map}' records of {size} bytes")]
    RecordSizeMismatch {
        map: String,
        size: usize,
        count: usize,
        actual: usize,
    },
    #[error("field '{field}' of '{map}' overlaps another swapped field")]
    Overlap { map: String, field: String },
    #[error("data map '{0}' refers back to itself")]
    Cycle(String),
    #[error("data maps nest deeper than {MAX_DESCRIPTOR_DEPTH} levels")]
    TooDeep,
}

/// Converts records between native byte order and `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSwap {
    target: Endian,
}

impl ByteSwap {
    pub fn new(target: Endian) -> Self {
        Self { target }
    }

    pub fn target(&self) -> Endian {
        self.target
    }

    pub fn set_target(&mut self, target: Endian) {
        self.target = target;
    }

    pub fn is_swapping(&self) -> bool {
        self.target != Endian::native()
    }

    /// Swaps `count` consecutive records described by `map_name` in place.
    ///
    /// Base fields are handled before the record's own fields. The
    /// descriptors are checked even when no swap is needed, so a bad map
    /// fails the same way on every platform.
    pub fn swap_fields(
        &self,
        registry: &DataMapRegistry,
        map_name: &str,
        data: &mut [u8],
        count: usize,
    ) -> Result<(), SwapError> {
        let map = lookup(registry, map_name)?;
        if map.size.checked_mul(count) != Some(data.len()) {
            return Err(SwapError::RecordSizeMismatch {
                map: map.name.clone(),
                size: map.size,
                count,
                actual: data.len(),
            });
        }

        let mut walker = Walker::new(registry, self.is_swapping());
        if map.size == 0 {
            return walker.visit(map, &mut []);
        }
        for record in data.chunks_exact_mut(map.size) {
            walker.visit(map, record)?;
        }
        Ok(())
    }

    pub fn swap_record<T: Pod>(
        &self,
        registry: &DataMapRegistry,
        map_name: &str,
        record: &mut T,
    ) -> Result<(), SwapError> {
        self.swap_fields(registry, map_name, bytemuck::bytes_of_mut(record), 1)
    }

    /// Swaps every element of a plain array as a single word.
    pub fn swap_slice<T: Pod>(&self, values: &mut [T]) {
        let width = std::mem::size_of::<T>();
        if !self.is_swapping() || width <= 1 {
            return;
        }
        for word in bytemuck::cast_slice_mut::<T, u8>(values).chunks_exact_mut(width) {
            word.reverse();
        }
    }
}

/// Walks a map without touching any data, reporting the first descriptor
/// problem.
pub fn validate(registry: &DataMapRegistry, map_name: &str) -> Result<(), SwapError> {
    let map = lookup(registry, map_name)?;
    let mut scratch = vec![0u8; map.size];
    Walker::new(registry, false).visit(map, &mut scratch)
}

fn lookup<'a>(registry: &'a DataMapRegistry, name: &str) -> Result<&'a DataMap, SwapError> {
    registry
        .get(name)
        .ok_or_else(|| SwapError::UnknownMap(name.to_owned()))
}

struct Walker<'a> {
    registry: &'a DataMapRegistry,
    swap: bool,
    stack: Vec<&'a str>,
}

impl<'a> Walker<'a> {
    fn new(registry: &'a DataMapRegistry, swap: bool) -> Self {
        Self {
            registry,
            swap,
            stack: Vec::new(),
        }
    }

    /// `record` is exactly `map.size` bytes.
    fn visit(&mut self, map: &'a DataMap, record: &mut [u8]) -> Result<(), SwapError> {
        if self.stack.contains(&map.name.as_str()) {
            return Err(SwapError::Cycle(map.name.clone()));
        }
        if self.stack.len() >= MAX_DESCRIPTOR_DEPTH {
            return Err(SwapError::TooDeep);
        }
        self.stack.push(&map.name);
        self.check_layout(map)?;

        if let Some(base_name) = &map.base {
            let base = lookup(self.registry, base_name)?;
            self.visit(base, &mut record[..base.size])?;
        }

        for field in &map.fields {
            self.visit_field(map, field, record)?;
        }

        self.stack.pop();
        Ok(())
    }

    /// Checks the base and every field of `map` against the record size,
    /// and that no two swapped spans share a byte, before anything moves.
    fn check_layout(&self, map: &DataMap) -> Result<(), SwapError> {
        let mut spans: Vec<(Range<usize>, &str)> = Vec::new();

        if let Some(base_name) = &map.base {
            let base = lookup(self.registry, base_name)?;
            if base.size > map.size {
                return Err(SwapError::FieldOutOfBounds {
                    map: map.name.clone(),
                    field: format!("base {}", base.name),
                    end: base.size,
                    size: map.size,
                });
            }
            spans.push((0..base.size, base.name.as_str()));
        }

        for field in &map.fields {
            let (element_size, swapped) = match &field.kind {
                FieldKind::Embedded(inner_name) => (lookup(self.registry, inner_name)?.size, true),
                kind => match kind.layout() {
                    Some((width, words)) => (width * words, width > 1),
                    None => continue,
                },
            };
            let span = span(map, field, element_size)?;
            if swapped {
                spans.push((span, field.name.as_str()));
            }
        }

        // single-byte fields may share bytes with anything
        spans.retain(|(span, _)| !span.is_empty());
        spans.sort_by_key(|(span, _)| span.start);
        for pair in spans.windows(2) {
            if pair[1].0.start < pair[0].0.end {
                return Err(SwapError::Overlap {
                    map: map.name.clone(),
                    field: pair[1].1.to_owned(),
                });
            }
        }
        Ok(())
    }

    fn visit_field(
        &mut self,
        map: &'a DataMap,
        field: &'a FieldDescriptor,
        record: &mut [u8],
    ) -> Result<(), SwapError> {
        if let FieldKind::Embedded(inner_name) = &field.kind {
            let inner = lookup(self.registry, inner_name)?;
            let span = span(map, field, inner.size)?;
            if inner.size == 0 {
                return self.visit(inner, &mut []);
            }
            for element in record[span].chunks_exact_mut(inner.size) {
                self.visit(inner, element)?;
            }
            return Ok(());
        }

        let Some((width, words)) = field.kind.layout() else {
            return Ok(());
        };
        let span = span(map, field, width * words)?;
        if self.swap && width > 1 {
            for word in record[span].chunks_exact_mut(width) {
                word.reverse();
            }
        }
        Ok(())
    }
}

fn span(map: &DataMap, field: &FieldDescriptor, element_size: usize) -> Result<Range<usize>, SwapError> {
    let end = element_size
        .checked_mul(field.count)
        .and_then(|len| field.offset.checked_add(len));

    match end {
        Some(end) if end <= map.size => Ok(field.offset..end),
        _ => Err(SwapError::FieldOutOfBounds {
            map: map.name.clone(),
            field: field.name.clone(),
            end: end.unwrap_or(usize::MAX),
            size: map.size,
        }),
    }
}
