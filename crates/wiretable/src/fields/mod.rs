//! Descriptor-driven byte order conversion for save and wire records.
//!
//! A [`DataMap`] lists the typed fields of one record type; maps reference
//! their base map and embedded record maps by name through a
//! [`DataMapRegistry`]. [`ByteSwap`] walks that tree and reverses the bytes of
//! every multi-byte word in place.

mod descriptor;
mod swap;

pub use descriptor::{DataMap, DataMapRegistry, Endian, FieldDescriptor, FieldKind};
pub use swap::{ByteSwap, MAX_DESCRIPTOR_DEPTH, SwapError, validate};
