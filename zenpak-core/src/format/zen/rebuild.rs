use anyhow::{Context, Result};
use bytes::Bytes;

use super::header::ZenHeader;
use super::name_map::NameMap;
use super::summary::{SHIFTED_FIELD_POSITIONS, SUMMARY_SIZE};

/// Rebuild a package image around an edited name table.
///
/// Two phases: a secondary decode of the original bytes yields the length
/// delta between the old and new name-table encodings, then the output is
/// emitted section by section: the summary verbatim with its dependent
/// offsets shifted by the delta, the current name table, and the rest of
/// the original image untouched.
pub fn rebuild_with_name_map(original: &[u8], names: &NameMap) -> Result<Vec<u8>> {
    let original_header = ZenHeader::parse(&Bytes::copy_from_slice(original))
        .context("re-parse original package image")?;

    let old_len = original_header.name_map().encoded_len();
    let new_len = names.encoded_len();
    let delta = new_len as i64 - old_len as i64;
    let tail_start = SUMMARY_SIZE + old_len;

    let mut out = Vec::with_capacity(original.len().saturating_add_signed(delta as isize));
    out.extend_from_slice(&original[..SUMMARY_SIZE]);
    names.encode_into(&mut out);

    for pos in SHIFTED_FIELD_POSITIONS {
        patch_offset(&mut out, pos, delta)?;
    }

    out.extend_from_slice(&original[tail_start..]);
    Ok(out)
}

fn patch_offset(buffer: &mut [u8], pos: usize, delta: i64) -> Result<()> {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buffer[pos..pos + 4]);
    let shifted = i32::from_le_bytes(raw) as i64 + delta;
    let shifted = i32::try_from(shifted).context("patched offset overflows i32")?;
    buffer[pos..pos + 4].copy_from_slice(&shifted.to_le_bytes());
    Ok(())
}
