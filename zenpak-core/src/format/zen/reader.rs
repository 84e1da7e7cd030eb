use anyhow::{bail, Result};
use bytes::Bytes;

/// Aggregate outcome of a load pass.
///
/// Structural bound violations (bad index reads, unresolvable templates) land
/// here instead of aborting the pass; the caller inspects it afterwards.
/// `Ok` means no bound was violated, not that every export is fully wired.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LoadStatus {
    #[default]
    Ok,
    ReadError(String),
}

impl LoadStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, LoadStatus::Ok)
    }
}

/// Bounds-checked little-endian cursor over an in-memory package image.
#[derive(Debug, Clone)]
pub struct ZenReader {
    data: Bytes,
    pos: usize,
    status: LoadStatus,
}

impl ZenReader {
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            pos: 0,
            status: LoadStatus::Ok,
        }
    }

    #[inline]
    pub fn tell(&self) -> usize {
        self.pos
    }

    /// The whole underlying image, independent of the cursor.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            bail!("seek past end of buffer: {} (len={})", pos, self.data.len());
        }
        self.pos = pos;
        Ok(())
    }

    pub fn status(&self) -> &LoadStatus {
        &self.status
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    /// Record a structural failure without aborting the pass. The first
    /// error wins; later ones are logged and dropped.
    pub fn set_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::error!("{}", message);
        if self.status.is_ok() {
            self.status = LoadStatus::ReadError(message);
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        if self.pos + 1 > self.data.len() {
            bail!("unexpected EOF while reading u8 at {}", self.pos);
        }
        let v = self.data[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        if self.pos + 2 > self.data.len() {
            bail!("unexpected EOF while reading u16 at {}", self.pos);
        }
        let v = u16::from_le_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        self.pos += 2;
        Ok(v)
    }

    pub fn read_u16_be(&mut self) -> Result<u16> {
        if self.pos + 2 > self.data.len() {
            bail!("unexpected EOF while reading u16 at {}", self.pos);
        }
        let v = u16::from_be_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        self.pos += 2;
        Ok(v)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        if self.pos + 4 > self.data.len() {
            bail!("unexpected EOF while reading u32 at {}", self.pos);
        }
        let v = u32::from_le_bytes([
            self.data[self.pos],
            self.data[self.pos + 1],
            self.data[self.pos + 2],
            self.data[self.pos + 3],
        ]);
        self.pos += 4;
        Ok(v)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        if self.pos + 8 > self.data.len() {
            bail!("unexpected EOF while reading u64 at {}", self.pos);
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.data[self.pos..self.pos + 8]);
        self.pos += 8;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&[u8]> {
        if self.pos + len > self.data.len() {
            bail!(
                "unexpected EOF while reading {} bytes at {} (len={})",
                len,
                self.pos,
                self.data.len()
            );
        }
        let s = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_and_bounds() {
        let mut r = ZenReader::new(Bytes::from_static(&[1, 0, 0, 0, 0xFF]));
        assert_eq!(r.read_u32().unwrap(), 1);
        assert_eq!(r.read_u8().unwrap(), 0xFF);
        assert!(r.read_u8().is_err());
    }

    #[test]
    fn first_error_wins() {
        let mut r = ZenReader::new(Bytes::new());
        r.set_error("first");
        r.set_error("second");
        assert_eq!(r.status(), &LoadStatus::ReadError("first".to_string()));
    }
}
