// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The closed set of value kinds an [`Argument`](crate::Argument) can carry.
//!
//! Mirrors `EnumeratedTypeCodes.h`'s `typecode_def_t` table: each tag carries
//! its own exportability, variable-length-ness, and fixed/minimum size as
//! associated metadata rather than a side table, which is the natural
//! re-expression of a C `switch` over a byte code as a Rust `match` over an
//! enum.

/// Metadata describing one [`TypeTag`]'s wire behavior.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TypeMeta {
    /// May this value cross a process/wire boundary at all?
    pub exportable: bool,
    /// Does this tag's payload vary in length at runtime?
    pub variable_length: bool,
    /// Fixed size in bytes, or the *minimum* size for variable-length tags.
    pub fixed_size: usize,
    /// Is the value self-delimiting via a null terminator (strings only)?
    pub null_delimited: bool,
}

const fn fixed(exportable: bool, size: usize) -> TypeMeta {
    TypeMeta {
        exportable,
        variable_length: false,
        fixed_size: size,
        null_delimited: false,
    }
}

const fn var(exportable: bool, min_size: usize, null_delimited: bool) -> TypeMeta {
    TypeMeta {
        exportable,
        variable_length: true,
        fixed_size: min_size,
        null_delimited,
    }
}

/// The closed type-tag enumeration from spec.md §3.
///
/// Numeric values follow the original `EnumeratedTypeCodes.h` assignments so
/// that a legend dump produced here means the same thing it always has.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum TypeTag {
    Int8 = 0x01,
    Int16 = 0x02,
    Int32 = 0x03,
    Int64 = 0x04,
    Int128 = 0x05,
    Uint8 = 0x06,
    Uint16 = 0x07,
    Uint32 = 0x08,
    Uint64 = 0x09,
    Uint128 = 0x0A,
    Bool = 0x0B,
    Float = 0x0C,
    Double = 0x0D,
    /// Null-terminated string.
    Str = 0x0E,
    Binary = 0x0F,
    Audio = 0x10,
    Image = 0x11,
    Vect3F32 = 0x12,
    Vect3I16 = 0x13,
    Vect3U16 = 0x14,
    Json = 0x15,
    Vect4F32 = 0x16,
    /// A string semantically marked as a URL.
    Url = 0x17,
    EventChain = 0x18,
    RelayedMsg = 0x19,
    Cbor = 0x20,
    Identity = 0x21,
    /// Opaque pointer to a `Receiver`. Never exportable.
    Receiver = 0xE0,
    /// Opaque pointer to a `Transport`. Never exportable.
    Transport = 0xE1,
    /// Opaque pointer to a `Runnable` (a `Message`). Never exportable.
    Runnable = 0xE2,
    /// Opaque pointer to a `Pipe`. Never exportable.
    Pipe = 0xAE,
}

impl TypeTag {
    /// Returns this tag's wire metadata.
    pub const fn meta(self) -> TypeMeta {
        match self {
            TypeTag::Int8 => fixed(true, 1),
            TypeTag::Int16 => fixed(true, 2),
            TypeTag::Int32 => fixed(true, 4),
            TypeTag::Int64 => fixed(true, 8),
            TypeTag::Int128 => fixed(true, 16),
            TypeTag::Uint8 => fixed(true, 1),
            TypeTag::Uint16 => fixed(true, 2),
            TypeTag::Uint32 => fixed(true, 4),
            TypeTag::Uint64 => fixed(true, 8),
            TypeTag::Uint128 => fixed(true, 16),
            TypeTag::Bool => fixed(true, 1),
            TypeTag::Float => fixed(true, 4),
            TypeTag::Double => fixed(true, 8),
            TypeTag::Str => var(true, 1, true),
            TypeTag::Binary => var(true, 0, false),
            TypeTag::Audio => var(true, 0, false),
            TypeTag::Image => var(true, 0, false),
            TypeTag::Vect3F32 => fixed(true, 12),
            TypeTag::Vect3I16 => fixed(true, 6),
            TypeTag::Vect3U16 => fixed(true, 6),
            TypeTag::Json => var(true, 0, false),
            TypeTag::Vect4F32 => fixed(true, 16),
            TypeTag::Url => var(true, 1, true),
            TypeTag::EventChain => var(true, 0, false),
            TypeTag::RelayedMsg => var(true, 0, false),
            TypeTag::Cbor => var(true, 0, false),
            TypeTag::Identity => var(true, 0, false),
            TypeTag::Receiver => fixed(false, core::mem::size_of::<usize>()),
            TypeTag::Transport => fixed(false, core::mem::size_of::<usize>()),
            TypeTag::Runnable => fixed(false, core::mem::size_of::<usize>()),
            TypeTag::Pipe => fixed(false, core::mem::size_of::<usize>()),
        }
    }

    /// True for the four opaque in-process pointer kinds.
    pub const fn is_opaque_pointer(self) -> bool {
        matches!(
            self,
            TypeTag::Receiver | TypeTag::Transport | TypeTag::Runnable | TypeTag::Pipe
        )
    }

    /// Recovers a tag from its wire byte, for parsing.
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0x01 => TypeTag::Int8,
            0x02 => TypeTag::Int16,
            0x03 => TypeTag::Int32,
            0x04 => TypeTag::Int64,
            0x05 => TypeTag::Int128,
            0x06 => TypeTag::Uint8,
            0x07 => TypeTag::Uint16,
            0x08 => TypeTag::Uint32,
            0x09 => TypeTag::Uint64,
            0x0A => TypeTag::Uint128,
            0x0B => TypeTag::Bool,
            0x0C => TypeTag::Float,
            0x0D => TypeTag::Double,
            0x0E => TypeTag::Str,
            0x0F => TypeTag::Binary,
            0x10 => TypeTag::Audio,
            0x11 => TypeTag::Image,
            0x12 => TypeTag::Vect3F32,
            0x13 => TypeTag::Vect3I16,
            0x14 => TypeTag::Vect3U16,
            0x15 => TypeTag::Json,
            0x16 => TypeTag::Vect4F32,
            0x17 => TypeTag::Url,
            0x18 => TypeTag::EventChain,
            0x19 => TypeTag::RelayedMsg,
            0x20 => TypeTag::Cbor,
            0x21 => TypeTag::Identity,
            0xE0 => TypeTag::Receiver,
            0xE1 => TypeTag::Transport,
            0xE2 => TypeTag::Runnable,
            0xAE => TypeTag::Pipe,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vect3_float_matches_wire_test_vector() {
        // spec.md §8's serialization round-trip vector uses this tag and a
        // 12-byte fixed payload.
        assert_eq!(TypeTag::Vect3F32 as u8, 0x12);
        assert_eq!(TypeTag::Vect3F32.meta().fixed_size, 12);
        assert!(!TypeTag::Vect3F32.meta().variable_length);
    }

    #[test]
    fn opaque_pointers_are_never_exportable() {
        for tag in [
            TypeTag::Receiver,
            TypeTag::Transport,
            TypeTag::Runnable,
            TypeTag::Pipe,
        ] {
            assert!(tag.is_opaque_pointer());
            assert!(!tag.meta().exportable);
        }
    }

    #[test]
    fn round_trips_every_byte() {
        for tag in [
            TypeTag::Int8,
            TypeTag::Uint64,
            TypeTag::Str,
            TypeTag::Vect4F32,
            TypeTag::Pipe,
        ] {
            assert_eq!(TypeTag::from_byte(tag as u8), Some(tag));
        }
    }
}
