use anyhow::{bail, Context, Result};

use super::reader::ZenReader;

/// A name-table reference: table slot plus an instance number
/// (0 = the bare name, N = the name with instance N).
///
/// The top two bits of the stored index carry the table kind in some
/// producers; lookups only ever use the masked low 30 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MappedName {
    index: u32,
    number: u32,
}

const INDEX_MASK: u32 = (1 << 30) - 1;

impl MappedName {
    pub fn new(index: u32, number: u32) -> Self {
        Self { index, number }
    }

    pub fn index(&self) -> u32 {
        self.index & INDEX_MASK
    }

    pub fn number(&self) -> u32 {
        self.number
    }
}

/// Per-package table of interned strings.
///
/// On disk: `count: u32`, `string_bytes: u32`, then per name a big-endian
/// `u16` header (bit 15 = wide-char flag, low 15 bits = byte length)
/// immediately followed by the UTF-8 bytes.
#[derive(Debug, Clone, Default)]
pub struct NameMap {
    names: Vec<String>,
}

impl NameMap {
    pub fn parse(r: &mut ZenReader) -> Result<Self> {
        let count = r.read_u32().context("read name count")? as usize;
        let string_bytes = r.read_u32().context("read name string bytes")? as usize;
        if count * 2 + string_bytes > r.len() - r.tell() {
            bail!(
                "name table ({} names, {} string bytes) exceeds the remaining buffer",
                count,
                string_bytes
            );
        }

        let mut names = Vec::with_capacity(count);
        let mut actual_bytes = 0usize;
        for i in 0..count {
            let header = r.read_u16_be().with_context(|| format!("read header of name {i}"))?;
            if header & 0x8000 != 0 {
                bail!("wide-char name entries are not supported (name {i})");
            }
            let len = (header & 0x7FFF) as usize;
            let bytes = r
                .read_bytes(len)
                .with_context(|| format!("read bytes of name {i}"))?;
            let name = std::str::from_utf8(bytes)
                .with_context(|| format!("name {i} is not valid UTF-8"))?;
            names.push(name.to_string());
            actual_bytes += len;
        }

        if actual_bytes != string_bytes {
            bail!(
                "name table declares {} string bytes but contains {}",
                string_bytes,
                actual_bytes
            );
        }

        Ok(Self { names })
    }

    /// Resolve a mapped name. Out-of-range indices yield `None`, never a
    /// table overrun.
    pub fn get(&self, name: &MappedName) -> Option<&str> {
        self.names.get(name.index() as usize).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|s| s.as_str())
    }

    /// Linear scan for an exact match, the write-direction lookup.
    pub fn position(&self, name: &str) -> Option<u32> {
        self.names.iter().position(|n| n == name).map(|i| i as u32)
    }

    /// Append a new name, returning its slot.
    pub fn push(&mut self, name: impl Into<String>) -> u32 {
        self.names.push(name.into());
        (self.names.len() - 1) as u32
    }

    pub fn rename(&mut self, index: u32, name: impl Into<String>) -> Result<()> {
        let len = self.names.len();
        let slot = self
            .names
            .get_mut(index as usize)
            .with_context(|| format!("name index {} out of range ({} names)", index, len))?;
        *slot = name.into();
        Ok(())
    }

    /// Byte length of the encoded table.
    pub fn encoded_len(&self) -> usize {
        8 + self.names.iter().map(|n| 2 + n.len()).sum::<usize>()
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.names.len() as u32).to_le_bytes());
        let string_bytes: usize = self.names.iter().map(|n| n.len()).sum();
        out.extend_from_slice(&(string_bytes as u32).to_le_bytes());
        for name in &self.names {
            out.extend_from_slice(&((name.len() as u16) & 0x7FFF).to_be_bytes());
            out.extend_from_slice(name.as_bytes());
        }
    }
}

/// Extract the `_<digits>` instance-number suffix, if the name follows that
/// convention: the last character must be a digit and everything after the
/// final `_` must be digits.
pub fn trailing_instance_number(name: &str) -> Option<u32> {
    if !name.ends_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    let (_, digits) = name.rsplit_once('_')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn encode(names: &[&str]) -> Vec<u8> {
        let mut map = NameMap::default();
        for n in names {
            map.push(*n);
        }
        let mut out = Vec::new();
        map.encode_into(&mut out);
        out
    }

    #[test]
    fn parse_roundtrip() {
        let bytes = encode(&["Package", "Actor", "Mesh_2"]);
        let mut r = ZenReader::new(Bytes::from(bytes.clone()));
        let map = NameMap::parse(&mut r).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map.get(&MappedName::new(1, 0)), Some("Actor"));
        assert_eq!(map.get(&MappedName::new(9, 0)), None);
        assert_eq!(map.encoded_len(), bytes.len());

        let mut again = Vec::new();
        map.encode_into(&mut again);
        assert_eq!(again, bytes);
    }

    #[test]
    fn parse_rejects_byte_count_mismatch() {
        let mut bytes = encode(&["Abc"]);
        bytes[4] = 99; // declared string bytes
        let mut r = ZenReader::new(Bytes::from(bytes));
        assert!(NameMap::parse(&mut r).is_err());
    }

    #[test]
    fn suffix_convention() {
        assert_eq!(trailing_instance_number("Foo_12"), Some(12));
        assert_eq!(trailing_instance_number("Foo"), None);
        assert_eq!(trailing_instance_number("Foo_"), None);
        assert_eq!(trailing_instance_number("Foo_12x"), None);
        assert_eq!(trailing_instance_number("12"), None);
        assert_eq!(trailing_instance_number("Foo_0"), Some(0));
    }
}
