// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A single type-tagged value, as described in spec.md §4.1.
//!
//! The teacher's C++ source packs integers directly into a pointer-sized
//! slot and uses a `reap` boolean to decide whether the destructor frees the
//! backing memory. Per spec.md §9 that packing is re-expressed here as a
//! genuine sum type: [`ArgPayload::Inline`] for anything that fits in 16
//! bytes (no allocation, `Copy`), [`ArgPayload::Shared`] for variable-length
//! or oversized data that may be referenced by more than one `Argument`
//! without copying, and [`ArgPayload::Opaque`] for the four in-process
//! pointer kinds, represented as a handle rather than a raw pointer.

use std::fmt;
use std::sync::Arc;

use byteorder::WriteBytesExt;

use crate::tag::TypeTag;

/// Errors raised while constructing or serializing an [`Argument`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ArgError {
    /// The tag cannot be serialized at all (non-exportable opaque pointer).
    InvalidType,
    /// The supplied byte length doesn't match the tag's fixed size, or falls
    /// short of its variable-length minimum.
    BadLength { tag: TypeTag, len: usize },
    /// `getArgAs`/`consumeArgAs` was asked for a tag this Argument isn't.
    TypeMismatch { want: TypeTag, have: TypeTag },
}

impl fmt::Display for ArgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgError::InvalidType => write!(f, "type cannot be serialized"),
            ArgError::BadLength { tag, len } => {
                write!(f, "bad length {len} for tag {tag:?}")
            }
            ArgError::TypeMismatch { want, have } => {
                write!(f, "wanted tag {want:?}, argument holds {have:?}")
            }
        }
    }
}

impl std::error::Error for ArgError {}

/// A handle standing in for an opaque in-process reference. The concrete
/// `Receiver`/`Transport`/`Pipe`/`Runnable` types live in `manuvr-kernel` and
/// `manuvr-i2c`, which this crate cannot depend on; callers that need to
/// resolve a handle do so against their own registry.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct OpaqueHandle(pub u32);

const INLINE_CAP: usize = 16;

#[derive(Clone, Debug)]
enum ArgPayload {
    /// Fixed-size data of at most `INLINE_CAP` bytes, stored by value.
    Inline([u8; INLINE_CAP], u8),
    /// Variable-length or oversized data, reference-counted so more than one
    /// `Argument` (or a clone produced by `getArgAs(.., preserve = true)`)
    /// can share the same bytes without copying.
    Shared(Arc<[u8]>),
    /// One of the four opaque pointer kinds.
    Opaque(OpaqueHandle),
}

/// A single type-tagged value owned by a [`Message`](crate) argument list.
#[derive(Clone, Debug)]
pub struct Argument {
    tag: TypeTag,
    payload: ArgPayload,
    /// Mirrors the teacher's reap flag. For [`ArgPayload::Inline`] this is
    /// always true (nothing to free) and for [`ArgPayload::Shared`] it
    /// records whether *this* Argument is the one that should be treated as
    /// the canonical owner when deciding serialization eligibility.
    reap: bool,
}

impl Argument {
    fn from_inline(tag: TypeTag, bytes: &[u8], reap: bool) -> Self {
        debug_assert!(bytes.len() <= INLINE_CAP);
        let mut buf = [0u8; INLINE_CAP];
        buf[..bytes.len()].copy_from_slice(bytes);
        Argument {
            tag,
            payload: ArgPayload::Inline(buf, bytes.len() as u8),
            reap,
        }
    }

    pub fn int8(v: i8) -> Self {
        Self::from_inline(TypeTag::Int8, &v.to_le_bytes(), true)
    }
    pub fn int16(v: i16) -> Self {
        Self::from_inline(TypeTag::Int16, &v.to_le_bytes(), true)
    }
    pub fn int32(v: i32) -> Self {
        Self::from_inline(TypeTag::Int32, &v.to_le_bytes(), true)
    }
    pub fn int64(v: i64) -> Self {
        Self::from_inline(TypeTag::Int64, &v.to_le_bytes(), true)
    }
    pub fn int128(v: i128) -> Self {
        Self::from_inline(TypeTag::Int128, &v.to_le_bytes(), true)
    }
    pub fn uint8(v: u8) -> Self {
        Self::from_inline(TypeTag::Uint8, &v.to_le_bytes(), true)
    }
    pub fn uint16(v: u16) -> Self {
        Self::from_inline(TypeTag::Uint16, &v.to_le_bytes(), true)
    }
    pub fn uint32(v: u32) -> Self {
        Self::from_inline(TypeTag::Uint32, &v.to_le_bytes(), true)
    }
    pub fn uint64(v: u64) -> Self {
        Self::from_inline(TypeTag::Uint64, &v.to_le_bytes(), true)
    }
    pub fn uint128(v: u128) -> Self {
        Self::from_inline(TypeTag::Uint128, &v.to_le_bytes(), true)
    }
    pub fn boolean(v: bool) -> Self {
        Self::from_inline(TypeTag::Bool, &[v as u8], true)
    }
    pub fn float(v: f32) -> Self {
        Self::from_inline(TypeTag::Float, &v.to_le_bytes(), true)
    }
    pub fn double(v: f64) -> Self {
        Self::from_inline(TypeTag::Double, &v.to_le_bytes(), true)
    }

    pub fn vect3_f32(v: [f32; 3]) -> Self {
        let mut bytes = [0u8; 12];
        for (i, c) in v.iter().enumerate() {
            bytes[i * 4..i * 4 + 4].copy_from_slice(&c.to_le_bytes());
        }
        Self::from_inline(TypeTag::Vect3F32, &bytes, true)
    }
    pub fn vect3_i16(v: [i16; 3]) -> Self {
        let mut bytes = [0u8; 6];
        for (i, c) in v.iter().enumerate() {
            bytes[i * 2..i * 2 + 2].copy_from_slice(&c.to_le_bytes());
        }
        Self::from_inline(TypeTag::Vect3I16, &bytes, true)
    }
    pub fn vect3_u16(v: [u16; 3]) -> Self {
        let mut bytes = [0u8; 6];
        for (i, c) in v.iter().enumerate() {
            bytes[i * 2..i * 2 + 2].copy_from_slice(&c.to_le_bytes());
        }
        Self::from_inline(TypeTag::Vect3U16, &bytes, true)
    }
    pub fn vect4_f32(v: [f32; 4]) -> Self {
        let mut bytes = [0u8; 16];
        for (i, c) in v.iter().enumerate() {
            bytes[i * 4..i * 4 + 4].copy_from_slice(&c.to_le_bytes());
        }
        Self::from_inline(TypeTag::Vect4F32, &bytes, true)
    }

    /// A null-terminated string argument. The terminator is implicit in the
    /// wire form and not stored in `bytes()`.
    pub fn string(v: impl Into<String>) -> Self {
        Argument {
            tag: TypeTag::Str,
            payload: ArgPayload::Shared(Arc::from(v.into().into_bytes().into_boxed_slice())),
            reap: true,
        }
    }

    /// A string argument semantically marked as a URL.
    pub fn url(v: impl Into<String>) -> Self {
        Argument {
            tag: TypeTag::Url,
            payload: ArgPayload::Shared(Arc::from(v.into().into_bytes().into_boxed_slice())),
            reap: true,
        }
    }

    pub fn binary(bytes: Vec<u8>) -> Self {
        Argument {
            tag: TypeTag::Binary,
            payload: ArgPayload::Shared(Arc::from(bytes.into_boxed_slice())),
            reap: true,
        }
    }

    pub fn json(bytes: Vec<u8>) -> Self {
        Argument {
            tag: TypeTag::Json,
            payload: ArgPayload::Shared(Arc::from(bytes.into_boxed_slice())),
            reap: true,
        }
    }

    pub fn cbor(bytes: Vec<u8>) -> Self {
        Argument {
            tag: TypeTag::Cbor,
            payload: ArgPayload::Shared(Arc::from(bytes.into_boxed_slice())),
            reap: true,
        }
    }

    /// An opaque in-process reference. Per spec.md §4.1, these are never
    /// serialized.
    pub fn opaque(tag: TypeTag, handle: OpaqueHandle) -> Self {
        debug_assert!(tag.is_opaque_pointer());
        Argument {
            tag,
            payload: ArgPayload::Opaque(handle),
            reap: false,
        }
    }

    /// Chainable setter matching the teacher's `addArg(..).reapValue(true)`
    /// idiom.
    pub fn reap_value(mut self, reap: bool) -> Self {
        self.reap = reap;
        self
    }

    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    pub fn reap(&self) -> bool {
        self.reap
    }

    /// In-memory length: the variable-length payload's actual size, or the
    /// tag's fixed size.
    pub fn length(&self) -> usize {
        match &self.payload {
            ArgPayload::Inline(_, len) => *len as usize,
            ArgPayload::Shared(bytes) => bytes.len(),
            ArgPayload::Opaque(_) => self.tag.meta().fixed_size,
        }
    }

    /// Borrows the raw payload bytes (no tag/length framing, no null
    /// terminator appended for strings).
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            ArgPayload::Inline(buf, len) => Some(&buf[..*len as usize]),
            ArgPayload::Shared(bytes) => Some(bytes),
            ArgPayload::Opaque(_) => None,
        }
    }

    pub fn as_i8(&self) -> Result<i8, ArgError> {
        self.as_fixed(TypeTag::Int8, |b| b[0] as i8)
    }
    pub fn as_u8(&self) -> Result<u8, ArgError> {
        self.as_fixed(TypeTag::Uint8, |b| b[0])
    }
    pub fn as_i16(&self) -> Result<i16, ArgError> {
        self.as_fixed(TypeTag::Int16, |b| i16::from_le_bytes([b[0], b[1]]))
    }
    pub fn as_u16(&self) -> Result<u16, ArgError> {
        self.as_fixed(TypeTag::Uint16, |b| u16::from_le_bytes([b[0], b[1]]))
    }
    pub fn as_i32(&self) -> Result<i32, ArgError> {
        self.as_fixed(TypeTag::Int32, |b| i32::from_le_bytes(b[..4].try_into().unwrap()))
    }
    pub fn as_u32(&self) -> Result<u32, ArgError> {
        self.as_fixed(TypeTag::Uint32, |b| u32::from_le_bytes(b[..4].try_into().unwrap()))
    }
    pub fn as_f32(&self) -> Result<f32, ArgError> {
        self.as_fixed(TypeTag::Float, |b| f32::from_le_bytes(b[..4].try_into().unwrap()))
    }
    pub fn as_f64(&self) -> Result<f64, ArgError> {
        self.as_fixed(TypeTag::Double, |b| f64::from_le_bytes(b[..8].try_into().unwrap()))
    }
    pub fn as_bool(&self) -> Result<bool, ArgError> {
        self.as_fixed(TypeTag::Bool, |b| b[0] != 0)
    }

    pub fn as_str(&self) -> Result<&str, ArgError> {
        if self.tag != TypeTag::Str && self.tag != TypeTag::Url {
            return Err(ArgError::TypeMismatch {
                want: TypeTag::Str,
                have: self.tag,
            });
        }
        let bytes = self.bytes().unwrap_or(&[]);
        std::str::from_utf8(bytes).map_err(|_| ArgError::BadLength {
            tag: self.tag,
            len: bytes.len(),
        })
    }

    fn as_fixed<T>(&self, want: TypeTag, f: impl FnOnce(&[u8]) -> T) -> Result<T, ArgError> {
        if self.tag != want {
            return Err(ArgError::TypeMismatch {
                want,
                have: self.tag,
            });
        }
        Ok(f(self.bytes().unwrap_or(&[])))
    }

    /// Appends `(tag, length_byte, bytes)` framing to `out`, per spec.md §6.
    /// Fails with [`ArgError::InvalidType`] for non-exportable opaque
    /// pointers. Vector tags are written little-endian, component by
    /// component (already the layout `bytes()` holds them in). Self-
    /// delimiting tags (`Str`, `Url`) get a null terminator inside the
    /// length window, per spec.md line 231 — the length byte and the bytes
    /// it covers both include it.
    pub fn serialize(&self, out: &mut Vec<u8>) -> Result<(), ArgError> {
        if !self.tag.meta().exportable {
            return Err(ArgError::InvalidType);
        }
        let bytes = self.bytes().ok_or(ArgError::InvalidType)?;
        let null_delimited = self.tag.meta().null_delimited;
        let payload_len = bytes.len() + null_delimited as usize;
        if payload_len > 255 {
            return Err(ArgError::BadLength {
                tag: self.tag,
                len: payload_len,
            });
        }
        out.push(self.tag as u8);
        out.push(payload_len as u8);
        out.extend_from_slice(bytes);
        if null_delimited {
            out.write_u8(0).expect("Vec<u8> write never fails");
        }
        Ok(())
    }

    /// Emits payload only, no tag/length framing — used when the receiver
    /// already knows the grammar from the message's schema, so a trailing
    /// null would only corrupt the next argument's offset (spec.md §4.2.1's
    /// last-tag-takes-the-remainder parsing has no use for one here).
    pub fn serialize_raw(&self, out: &mut Vec<u8>) -> Result<(), ArgError> {
        if !self.tag.meta().exportable {
            return Err(ArgError::InvalidType);
        }
        let bytes = self.bytes().ok_or(ArgError::InvalidType)?;
        out.extend_from_slice(bytes);
        Ok(())
    }

    /// Parses a single `(tag, length_byte, bytes)` frame from `input`,
    /// returning the Argument and the number of bytes consumed. Strips a
    /// self-delimiting tag's null terminator back off before handing the
    /// payload to `from_wire`, so `bytes()` stays terminator-free.
    pub fn parse_framed(input: &[u8]) -> Result<(Self, usize), ArgError> {
        if input.len() < 2 {
            return Err(ArgError::BadLength {
                tag: TypeTag::Binary,
                len: input.len(),
            });
        }
        let tag = TypeTag::from_byte(input[0]).ok_or(ArgError::InvalidType)?;
        let len = input[1] as usize;
        if input.len() < 2 + len {
            return Err(ArgError::BadLength { tag, len });
        }
        let framed = &input[2..2 + len];
        let payload = if tag.meta().null_delimited {
            framed
                .strip_suffix(&[0])
                .ok_or(ArgError::BadLength { tag, len })?
        } else {
            framed
        };
        let arg = Self::from_wire(tag, payload)?;
        Ok((arg, 2 + len))
    }

    /// Builds an Argument directly from a tag and its raw payload bytes
    /// (used by both `parse_framed` and the grammar-matching parser in
    /// `manuvr-kernel`).
    pub fn from_wire(tag: TypeTag, bytes: &[u8]) -> Result<Self, ArgError> {
        let meta = tag.meta();
        if tag.is_opaque_pointer() {
            return Err(ArgError::InvalidType);
        }
        if meta.variable_length {
            if bytes.len() < meta.fixed_size {
                return Err(ArgError::BadLength {
                    tag,
                    len: bytes.len(),
                });
            }
            return Ok(Argument {
                tag,
                payload: ArgPayload::Shared(Arc::from(bytes.to_vec().into_boxed_slice())),
                reap: true,
            });
        }
        if bytes.len() != meta.fixed_size {
            return Err(ArgError::BadLength {
                tag,
                len: bytes.len(),
            });
        }
        Ok(Self::from_inline(tag, bytes, true))
    }

    /// A cheap, same-buffer clone used by `getArgAs(.., preserve = true)`.
    /// For [`ArgPayload::Shared`] this bumps an `Rc`/`Arc` refcount rather
    /// than copying bytes.
    pub fn preserve_clone(&self) -> Self {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vect3_float_serializes_to_spec_test_vector() {
        let arg = Argument::vect3_f32([1.0, -2.5, 3.25]);
        let mut out = Vec::new();
        arg.serialize(&mut out).unwrap();
        assert_eq!(
            out,
            vec![
                0x12, 0x0C, 0x00, 0x00, 0x80, 0x3F, 0x00, 0x00, 0x20, 0xC0, 0x00, 0x00, 0x50, 0x40
            ]
        );
    }

    #[test]
    fn opaque_pointer_refuses_serialization() {
        let arg = Argument::opaque(TypeTag::Receiver, OpaqueHandle(7));
        let mut out = Vec::new();
        assert_eq!(arg.serialize(&mut out), Err(ArgError::InvalidType));
    }

    #[test]
    fn round_trip_every_exportable_fixed_type() {
        let args = vec![
            Argument::int8(-5),
            Argument::uint32(0xDEAD_BEEF),
            Argument::float(1.5),
            Argument::double(-2.25),
            Argument::boolean(true),
        ];
        for arg in args {
            let mut out = Vec::new();
            arg.serialize(&mut out).unwrap();
            let (parsed, consumed) = Argument::parse_framed(&out).unwrap();
            assert_eq!(consumed, out.len());
            assert_eq!(parsed.tag(), arg.tag());
            assert_eq!(parsed.bytes(), arg.bytes());
        }
    }

    #[test]
    fn string_is_null_terminated_inside_its_length_window_in_framed_mode_only() {
        let arg = Argument::string("hi");
        let mut framed = Vec::new();
        arg.serialize(&mut framed).unwrap();
        assert_eq!(framed, vec![0x0E, 3, b'h', b'i', 0]);

        let (parsed, consumed) = Argument::parse_framed(&framed).unwrap();
        assert_eq!(consumed, framed.len());
        assert_eq!(parsed.bytes(), Some(b"hi".as_slice()));

        let mut raw = Vec::new();
        arg.serialize_raw(&mut raw).unwrap();
        assert_eq!(raw, vec![b'h', b'i'], "raw mode already knows the grammar; no terminator needed");
    }

    #[test]
    fn get_arg_as_mismatch_is_type_mismatch() {
        let arg = Argument::uint8(9);
        assert_eq!(
            arg.as_i32(),
            Err(ArgError::TypeMismatch {
                want: TypeTag::Int32,
                have: TypeTag::Uint8,
            })
        );
    }

    #[test]
    fn oversized_argument_is_rejected() {
        // A single Argument is capped at 255 bytes by the one-byte length
        // field in its wire framing (spec.md §6).
        let huge = Argument::binary(vec![0u8; 300]);
        let mut buf = Vec::new();
        assert!(matches!(
            huge.serialize(&mut buf),
            Err(ArgError::BadLength { .. })
        ));
    }
}
