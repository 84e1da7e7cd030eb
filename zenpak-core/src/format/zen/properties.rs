use anyhow::{bail, Result};
use bitvec::prelude::*;

use crate::object::ObjectHandle;

use super::fields::FieldReader;
use super::reader::ZenReader;

/// Wire kind of a schema property slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Bool,
    Int,
    Int64,
    Float,
    Double,
    Name,
    Str,
    Object,
}

#[derive(Debug, Clone)]
pub struct PropertySlot {
    pub name: String,
    pub kind: PropertyKind,
}

/// Declared property slots of a class, in declaration order. The sparse
/// header below is expressed in terms of these slots.
#[derive(Debug, Clone, Default)]
pub struct StructSchema {
    pub properties: Vec<PropertySlot>,
}

impl StructSchema {
    pub fn slot(name: impl Into<String>, kind: PropertyKind) -> PropertySlot {
        PropertySlot {
            name: name.into(),
            kind,
        }
    }
}

/// One fragment of the sparse property header, unpacked from a `u16`:
/// bits 0..6 = slots to skip, bit 7 = some covered values are zero,
/// bit 8 = last fragment, bits 9..15 = number of present slots.
#[derive(Debug, Clone, Copy)]
struct Fragment {
    skip_num: u8,
    value_count: u8,
    has_any_zeroes: bool,
    is_last: bool,
}

impl Fragment {
    fn unpack(raw: u16) -> Self {
        Self {
            skip_num: (raw & 0x7F) as u8,
            has_any_zeroes: raw & 0x80 != 0,
            is_last: raw & 0x100 != 0,
            value_count: (raw >> 9) as u8,
        }
    }
}

const MAX_FRAGMENTS: usize = 4096;

/// Bit-packed sparse property header: which schema slots are serialized at
/// all, and which of those carry a non-zero value.
#[derive(Debug, Clone)]
pub struct UnversionedHeader {
    fragments: Vec<Fragment>,
    zero_mask: BitVec<u32, Lsb0>,
    has_unmasked_values: bool,
}

impl UnversionedHeader {
    pub fn load(r: &mut ZenReader) -> Result<Self> {
        let mut fragments = Vec::new();
        let mut zero_mask_bits = 0usize;
        let mut has_unmasked_values = false;

        loop {
            let fragment = Fragment::unpack(r.read_u16()?);
            if fragment.has_any_zeroes {
                zero_mask_bits += fragment.value_count as usize;
            } else if fragment.value_count > 0 {
                has_unmasked_values = true;
            }
            let last = fragment.is_last;
            fragments.push(fragment);
            if last {
                break;
            }
            if fragments.len() >= MAX_FRAGMENTS {
                bail!("unversioned header has more than {} fragments", MAX_FRAGMENTS);
            }
        }

        let zero_mask = Self::load_zero_mask(r, zero_mask_bits)?;

        Ok(Self {
            fragments,
            zero_mask,
            has_unmasked_values,
        })
    }

    /// The zero mask is packed LSB-first and stored as the smallest of
    /// u8 / u16 / u32-words that covers the bit count.
    fn load_zero_mask(r: &mut ZenReader, bits: usize) -> Result<BitVec<u32, Lsb0>> {
        let mut mask: BitVec<u32, Lsb0> = if bits == 0 {
            BitVec::new()
        } else if bits <= 8 {
            BitVec::from_vec(vec![r.read_u8()? as u32])
        } else if bits <= 16 {
            BitVec::from_vec(vec![r.read_u16()? as u32])
        } else {
            let words = bits.div_ceil(32);
            let mut storage = Vec::with_capacity(words);
            for _ in 0..words {
                storage.push(r.read_u32()?);
            }
            BitVec::from_vec(storage)
        };
        mask.truncate(bits);
        Ok(mask)
    }

    pub fn has_values(&self) -> bool {
        self.fragments.iter().any(|f| f.value_count > 0)
    }

    pub fn has_non_zero_values(&self) -> bool {
        self.has_unmasked_values || self.zero_mask.iter().any(|bit| !*bit)
    }

    /// Expand the fragments into two parallel bit-vectors over the schema
    /// slots: serialized-at-all and serialized-non-zero.
    pub fn presence(&self, schema_len: usize) -> Result<(BitVec, BitVec)> {
        let mut has_value = bitvec![0; schema_len];
        let mut non_zero = bitvec![0; schema_len];

        let mut slot = 0usize;
        let mut zero_bit = 0usize;
        for fragment in &self.fragments {
            slot += fragment.skip_num as usize;
            for _ in 0..fragment.value_count {
                if slot >= schema_len {
                    bail!(
                        "unversioned header addresses slot {} of a {}-slot schema",
                        slot,
                        schema_len
                    );
                }
                has_value.set(slot, true);
                let is_zero = fragment.has_any_zeroes && {
                    let bit = self.zero_mask[zero_bit];
                    zero_bit += 1;
                    bit
                };
                if !is_zero {
                    non_zero.set(slot, true);
                }
                slot += 1;
            }
        }
        Ok((has_value, non_zero))
    }
}

/// Decode the present, non-default properties of `object` according to
/// `schema`, delegating each slot to its kind's registered decoder.
///
/// A malformed header aborts property loading for this object only; the
/// object keeps its schema defaults and the pass continues.
pub fn load_properties(
    fields: &mut FieldReader<'_>,
    object: &ObjectHandle,
    schema: &StructSchema,
) -> Result<()> {
    let header = match UnversionedHeader::load(fields.reader) {
        Ok(header) => header,
        Err(err) => {
            log::error!("error reading unversioned property header: {:#}", err);
            return Ok(());
        }
    };

    if !header.has_values() || !header.has_non_zero_values() {
        log::trace!("object has no serialized property values");
        return Ok(());
    }

    let (_, non_zero) = match header.presence(schema.properties.len()) {
        Ok(masks) => masks,
        Err(err) => {
            log::error!("error expanding unversioned property header: {:#}", err);
            return Ok(());
        }
    };

    let registry = fields.registry;
    for (slot, property) in schema.properties.iter().enumerate() {
        if !non_zero[slot] {
            continue;
        }

        let Some(decoder) = registry.property_decoder(property.kind) else {
            log::warn!(
                "no decoder registered for property kind {:?} ({})",
                property.kind,
                property.name
            );
            continue;
        };

        log::trace!("loading property {} at {}", property.name, fields.reader.tell());

        let Some(value) = decoder(fields)? else {
            continue;
        };
        object
            .borrow_mut()
            .properties
            .push((property.name.clone(), value));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn header_from(bytes: Vec<u8>) -> UnversionedHeader {
        let mut r = ZenReader::new(Bytes::from(bytes));
        UnversionedHeader::load(&mut r).unwrap()
    }

    #[test]
    fn empty_header_has_no_values() {
        // single fragment: skip 0, value_count 0, is_last
        let header = header_from(vec![0x00, 0x01]);
        assert!(!header.has_values());
        assert!(!header.has_non_zero_values());
    }

    #[test]
    fn fragment_expansion() {
        // skip 1, two values, no zeroes, is_last: 2 << 9 | 1 << 8 | 1
        let raw: u16 = (2 << 9) | 0x100 | 1;
        let header = header_from(raw.to_le_bytes().to_vec());
        assert!(header.has_values());
        assert!(header.has_non_zero_values());

        let (has_value, non_zero) = header.presence(4).unwrap();
        assert_eq!(has_value.iter().by_vals().collect::<Vec<_>>(), [false, true, true, false]);
        assert_eq!(non_zero, has_value);
    }

    #[test]
    fn zero_mask_clears_non_zero() {
        // two values with zero mask, is_last; mask byte 0b01 marks the
        // first value as zero
        let raw: u16 = (2 << 9) | 0x100 | 0x80;
        let mut bytes = raw.to_le_bytes().to_vec();
        bytes.push(0b01);
        let header = header_from(bytes);
        assert!(header.has_values());
        assert!(header.has_non_zero_values());

        let (has_value, non_zero) = header.presence(2).unwrap();
        assert!(has_value[0] && has_value[1]);
        assert!(!non_zero[0] && non_zero[1]);
    }

    #[test]
    fn all_zero_values_short_circuit() {
        let raw: u16 = (1 << 9) | 0x100 | 0x80;
        let mut bytes = raw.to_le_bytes().to_vec();
        bytes.push(0b1);
        let header = header_from(bytes);
        assert!(header.has_values());
        assert!(!header.has_non_zero_values());
    }

    #[test]
    fn overrun_is_rejected() {
        let raw: u16 = (3 << 9) | 0x100;
        let header = header_from(raw.to_le_bytes().to_vec());
        assert!(header.presence(2).is_err());
    }
}
