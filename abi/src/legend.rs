// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Message schema records and the legend wire format (spec.md §3, §6).

use bitflags::bitflags;

use crate::tag::TypeTag;

bitflags! {
    /// Per-code behavior flags from spec.md §3.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct MsgFlags: u16 {
        /// May be serialized and sent across a process/wire boundary.
        const EXPORTABLE  = 0b0000_0001;
        /// A recipient must acknowledge receipt.
        const DEMANDS_ACK = 0b0000_0010;
        /// At most one instance of this code may sit in the execute queue.
        const IDEMPOTENT  = 0b0000_0100;
        /// Only an authenticated session may raise this code.
        const AUTH_ONLY   = 0b0000_1000;
        /// This component emits messages of this code.
        const EMITS       = 0b0001_0000;
        /// This component listens for messages of this code.
        const LISTENS     = 0b0010_0000;
    }
}

/// A single grammatical form: an ordered sequence of type tags an inbound
/// argument stream may match.
pub type Form = Vec<TypeTag>;

/// A message's schema record, as kept in the process-wide registry
/// (spec.md §3 "Message definition (schema)").
#[derive(Clone, Debug)]
pub struct MsgDef {
    pub code: u16,
    pub flags: MsgFlags,
    pub label: String,
    pub forms: Vec<Form>,
    pub semantic_labels: Vec<String>,
}

impl MsgDef {
    pub fn new(code: u16, flags: MsgFlags, label: impl Into<String>) -> Self {
        MsgDef {
            code,
            flags,
            label: label.into(),
            forms: Vec::new(),
            semantic_labels: Vec::new(),
        }
    }

    pub fn with_form(mut self, form: Form) -> Self {
        self.forms.push(form);
        self
    }

    /// Computes each form's minimum encoded length: fixed tags sum their
    /// size, variable-length tags count their declared minimum.
    pub fn form_min_len(form: &[TypeTag]) -> usize {
        form.iter().map(|t| t.meta().fixed_size).sum()
    }

    /// Encodes one legend record: `[code][flags][label\0][form1\0]...[\0]`.
    /// Only called for exportable definitions; the caller (the registry's
    /// legend dump) filters non-exportable codes out first.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.code.to_le_bytes());
        out.extend_from_slice(&self.flags.bits().to_le_bytes());
        out.extend_from_slice(self.label.as_bytes());
        out.push(0);
        for form in &self.forms {
            for tag in form {
                out.push(*tag as u8);
            }
            out.push(0);
        }
        // Terminate the form list with an extra zero byte (an empty form).
        out.push(0);
        out
    }

    /// Parses one legend record, returning it and the number of bytes
    /// consumed.
    pub fn decode(input: &[u8]) -> Option<(Self, usize)> {
        if input.len() < 4 {
            return None;
        }
        let code = u16::from_le_bytes([input[0], input[1]]);
        let flags = MsgFlags::from_bits_truncate(u16::from_le_bytes([input[2], input[3]]));
        let mut pos = 4;
        let label_end = input[pos..].iter().position(|&b| b == 0)? + pos;
        let label = String::from_utf8_lossy(&input[pos..label_end]).into_owned();
        pos = label_end + 1;

        let mut forms = Vec::new();
        loop {
            let form_end = input[pos..].iter().position(|&b| b == 0)? + pos;
            if form_end == pos {
                // Empty form marks the end of the form list.
                pos = form_end + 1;
                break;
            }
            let mut form = Vec::new();
            for &b in &input[pos..form_end] {
                form.push(TypeTag::from_byte(b)?);
            }
            forms.push(form);
            pos = form_end + 1;
        }

        Some((
            MsgDef {
                code,
                flags,
                label,
                forms,
                semantic_labels: Vec::new(),
            },
            pos,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legend_round_trips() {
        let def = MsgDef::new(0x1234, MsgFlags::EXPORTABLE | MsgFlags::IDEMPOTENT, "SCHED_DUMP_META")
            .with_form(vec![TypeTag::Uint32])
            .with_form(vec![TypeTag::Str, TypeTag::Uint8]);
        let encoded = def.encode();
        let (decoded, consumed) = MsgDef::decode(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded.code, def.code);
        assert_eq!(decoded.flags, def.flags);
        assert_eq!(decoded.label, def.label);
        assert_eq!(decoded.forms, def.forms);
    }

    #[test]
    fn legend_dump_then_parse_reconstructs_set() {
        let defs = vec![
            MsgDef::new(1, MsgFlags::EXPORTABLE, "A").with_form(vec![TypeTag::Int8]),
            MsgDef::new(2, MsgFlags::EXPORTABLE | MsgFlags::EMITS, "B"),
        ];
        let mut dump = Vec::new();
        for d in &defs {
            dump.extend(d.encode());
        }
        let mut parsed = Vec::new();
        let mut pos = 0;
        while pos < dump.len() {
            let (def, consumed) = MsgDef::decode(&dump[pos..]).unwrap();
            parsed.push(def);
            pos += consumed;
        }
        assert_eq!(parsed.len(), defs.len());
        for (p, d) in parsed.iter().zip(defs.iter()) {
            assert_eq!(p.code, d.code);
            assert_eq!(p.label, d.label);
            assert_eq!(p.forms, d.forms);
        }
    }

    #[test]
    fn form_min_len_sums_fixed_sizes() {
        let form = vec![TypeTag::Uint32, TypeTag::Uint8];
        assert_eq!(MsgDef::form_min_len(&form), 5);
    }
}
