//! Binary layout of datapoint qualifiers and values.
//!
//! A row holds one cell per datapoint until it is compacted. A
//! seconds-resolution datapoint has a 2-byte qualifier: the upper 12 bits are
//! the delta from the row's base time, the low nibble carries the format
//! flags. A millisecond datapoint has a 4-byte qualifier with the high nibble
//! of the first byte set to `0xF`, a 22-bit millisecond delta, two reserved
//! bits and the same flag nibble. A compacted cell concatenates the
//! per-datapoint qualifiers in time order and appends one meta byte to the
//! concatenated values.
//!
//! Everything in here is pure and never panics on malformed input; shapes
//! that cannot be decoded surface as `MalformedRow` from
//! [`extract_datapoints`].

use crate::errors::{CompactError, Result};
use crate::store::Cell;

/// First byte of an annotation qualifier (odd length, JSON value).
pub const ANNOTATION_PREFIX: u8 = 0x05;

/// Sentinel qualifier of an append-style row; the value is already canonical.
pub const APPEND_QUALIFIER: [u8; 3] = [0x01, 0x00, 0x00];

/// Meta byte bit marking a compacted value that mixes second and millisecond
/// datapoints. Readers need it to pick the right qualifier widths back apart.
pub const MS_MIXED_COMPACT: u8 = 0x01;

/// Number of flag bits at the tail of a seconds qualifier.
pub const FLAG_BITS: u8 = 4;
/// Number of flag + reserved bits at the tail of a millisecond qualifier.
pub const MS_FLAG_BITS: u8 = 6;
/// Flag bit marking a floating point value.
pub const FLAG_FLOAT: u8 = 0x8;
/// Mask of the value length flag bits (stored as length - 1).
pub const LENGTH_MASK: u8 = 0x7;
/// High nibble of the first qualifier byte marking millisecond resolution.
pub const MS_BYTE_FLAG: u8 = 0xF0;

/// Bit range of the millisecond delta within a 4-byte qualifier.
const MS_DELTA_MASK: u32 = 0x0FFF_FFC0;

/// Whether the first datapoint in the qualifier is millisecond resolution.
pub fn is_ms(qualifier: &[u8]) -> bool {
    qualifier
        .first()
        .map_or(false, |b| b & MS_BYTE_FLAG == MS_BYTE_FLAG)
}

/// Time delta of the first datapoint in the qualifier, in the qualifier's
/// own resolution (seconds or milliseconds).
pub fn offset(qualifier: &[u8]) -> u32 {
    if is_ms(qualifier) {
        match qualifier {
            [a, b, c, d, ..] => (u32::from_be_bytes([*a, *b, *c, *d]) & MS_DELTA_MASK)
                >> MS_FLAG_BITS,
            _ => 0,
        }
    } else {
        match qualifier {
            [a, b, ..] => (u16::from_be_bytes([*a, *b]) >> FLAG_BITS) as u32,
            _ => 0,
        }
    }
}

/// Millisecond-normalized delta of the first datapoint.
pub fn offset_ms(qualifier: &[u8]) -> u64 {
    if is_ms(qualifier) {
        offset(qualifier) as u64
    } else {
        offset(qualifier) as u64 * 1000
    }
}

/// Totally ordered key of the first datapoint within its row.
///
/// Normalizes both resolutions to milliseconds; a seconds datapoint orders
/// ahead of a millisecond datapoint at the same instant and the two never
/// compare equal, so equality here means a true duplicate.
pub fn sort_key(qualifier: &[u8]) -> u64 {
    (offset_ms(qualifier) << 1) | is_ms(qualifier) as u64
}

/// Format flags of the first datapoint in the qualifier.
pub fn flags(qualifier: &[u8]) -> u8 {
    let idx = if is_ms(qualifier) { 3 } else { 1 };
    qualifier
        .get(idx)
        .map_or(0, |b| b & (FLAG_FLOAT | LENGTH_MASK))
}

/// Length in bytes of the value the flags declare.
pub fn value_len(flags: u8) -> usize {
    ((flags & LENGTH_MASK) + 1) as usize
}

/// Width of the datapoint qualifier starting at `pos` within a concatenated
/// qualifier: 4 bytes for milliseconds, 2 for seconds.
pub fn qualifier_len_at(qualifier: &[u8], pos: usize) -> usize {
    if qualifier
        .get(pos)
        .map_or(false, |b| b & MS_BYTE_FLAG == MS_BYTE_FLAG)
    {
        4
    } else {
        2
    }
}

/// Whether the cell was produced by an earlier compaction, which means its
/// value ends with a meta byte. A 4-byte qualifier without the millisecond
/// flag is two concatenated seconds datapoints.
pub fn has_meta_byte(qualifier: &[u8]) -> bool {
    match qualifier.len() {
        0..=3 => false,
        4 => !is_ms(qualifier),
        n => n % 2 == 0,
    }
}

/// Whether the value carries the legacy float encoding bug: an 8-byte value
/// whose flags declare a 4-byte float. The writer used to emit the wide
/// encoding with the narrow flags.
pub fn fp_needs_fix(flags: u8, value: &[u8]) -> bool {
    flags & FLAG_FLOAT != 0 && flags & LENGTH_MASK == 0x3 && value.len() == 8
}

/// Repair a mis-encoded float value by stripping the bogus leading half.
///
/// Returns the value unchanged when no fix is needed, and `None` when the
/// leading half is not zero, which means the cell is corrupt rather than
/// mis-encoded.
pub fn fp_fix<'a>(flags: u8, value: &'a [u8]) -> Option<&'a [u8]> {
    if !fp_needs_fix(flags, value) {
        return Some(value);
    }
    if value[..4].iter().all(|&b| b == 0) {
        Some(&value[4..])
    } else {
        None
    }
}

/// Rewrite the length bits of a flag byte for a repaired value.
pub fn fix_qualifier_flags(flags: u8, new_len: usize) -> u8 {
    (flags & !LENGTH_MASK) | (new_len.saturating_sub(1) as u8 & LENGTH_MASK)
}

/// Replace the flag nibble of a single-datapoint qualifier.
pub fn rewrite_flags(qualifier: &[u8], flags: u8) -> Vec<u8> {
    let mut fixed = qualifier.to_vec();
    let idx = if is_ms(qualifier) { 3 } else { 1 };
    if let Some(b) = fixed.get_mut(idx) {
        *b = (*b & !(FLAG_FLOAT | LENGTH_MASK)) | (flags & (FLAG_FLOAT | LENGTH_MASK));
    }
    fixed
}

/// One datapoint split out of a cell.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Datapoint {
    pub qualifier: Vec<u8>,
    pub value: Vec<u8>,
}

impl Datapoint {
    pub fn sort_key(&self) -> u64 {
        sort_key(&self.qualifier)
    }
}

/// Split every cell into one entry per datapoint, repair mis-encoded floats,
/// and return the datapoints sorted by time (stable, so store scan order
/// breaks ties).
///
/// Single-datapoint cells keep their whole value; previously-merged cells
/// are walked with the per-datapoint flag lengths, which must cover the
/// value exactly up to the trailing meta byte.
pub fn extract_datapoints(cells: &[&Cell]) -> Result<Vec<Datapoint>> {
    let mut points = Vec::with_capacity(cells.len());
    for cell in cells {
        split_cell(cell, &mut points)?;
    }
    points.sort_by_key(Datapoint::sort_key);
    Ok(points)
}

fn split_cell(cell: &Cell, out: &mut Vec<Datapoint>) -> Result<()> {
    let qual = &cell.qualifier;
    let value = &cell.value;
    if qual.is_empty() || qual.len() % 2 != 0 {
        return Err(CompactError::malformed_row(format!(
            "truncated qualifier: {}",
            hex::encode(qual)
        )));
    }

    if !has_meta_byte(qual) {
        // Bare single datapoint: the cell boundary is authoritative for the
        // value, the flags only matter for the float repair.
        let f = flags(qual);
        if fp_needs_fix(f, value) {
            let fixed = fp_fix(f, value).ok_or_else(|| {
                CompactError::malformed_row(format!(
                    "corrupt floating point value: {}",
                    hex::encode(value)
                ))
            })?;
            out.push(Datapoint {
                qualifier: rewrite_flags(qual, fix_qualifier_flags(f, fixed.len())),
                value: fixed.to_vec(),
            });
        } else {
            out.push(Datapoint {
                qualifier: qual.clone(),
                value: value.clone(),
            });
        }
        return Ok(());
    }

    // Previously-merged cell: walk the concatenated qualifiers, slicing the
    // value by the declared lengths. The last value byte is the meta byte.
    let payload_len = value.len().checked_sub(1).ok_or_else(|| {
        CompactError::malformed_row(format!(
            "merged cell missing meta byte: qualifier {}",
            hex::encode(qual)
        ))
    })?;
    let mut qpos = 0;
    let mut vpos = 0;
    while qpos < qual.len() {
        let qlen = qualifier_len_at(qual, qpos);
        if qpos + qlen > qual.len() {
            return Err(CompactError::malformed_row(format!(
                "truncated qualifier at {}: {}",
                qpos,
                hex::encode(qual)
            )));
        }
        let q = &qual[qpos..qpos + qlen];
        let vlen = value_len(flags(q));
        if vpos + vlen > payload_len {
            return Err(CompactError::malformed_row(format!(
                "value too short for qualifier {}: {} bytes",
                hex::encode(qual),
                value.len()
            )));
        }
        out.push(Datapoint {
            qualifier: q.to_vec(),
            value: value[vpos..vpos + vlen].to_vec(),
        });
        qpos += qlen;
        vpos += vlen;
    }
    if vpos != payload_len {
        return Err(CompactError::malformed_row(format!(
            "value length mismatch for qualifier {}: {} trailing bytes",
            hex::encode(qual),
            payload_len - vpos
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_offset() {
        assert_eq!(offset(&[0x00, 0x07]), 0);
        assert_eq!(offset(&[0x00, 0x17]), 1);
        // max delta: 4095 seconds
        assert_eq!(offset(&[0xEF, 0xF7]), 0xEFF);
    }

    #[test]
    fn test_ms_offset() {
        assert!(is_ms(&[0xF0, 0x00, 0x00, 0x17]));
        assert_eq!(offset(&[0xF0, 0x00, 0x00, 0x17]), 0);
        // 1500ms << 6 within the delta bits
        let raw: u32 = 0xF000_0000 | (1500 << 6) | 0x7;
        assert_eq!(offset(&raw.to_be_bytes()), 1500);
    }

    #[test]
    fn test_sort_key_orders_seconds_before_ms() {
        let s = sort_key(&[0x00, 0x07]);
        let ms = sort_key(&[0xF0, 0x00, 0x00, 0x17]);
        assert!(s < ms);
        assert_ne!(s, ms);
    }

    #[test]
    fn test_sort_key_normalizes_resolutions() {
        // 2 seconds vs 1500 milliseconds
        let s = sort_key(&[0x00, 0x27]);
        let raw: u32 = 0xF000_0000 | (1500 << 6) | 0x7;
        let ms = sort_key(&raw.to_be_bytes());
        assert!(ms < s);
    }

    #[test]
    fn test_flags_and_value_len() {
        assert_eq!(flags(&[0x00, 0x07]), 0x7);
        assert_eq!(value_len(0x7), 8);
        assert_eq!(value_len(0x0), 1);
        assert_eq!(flags(&[0xF0, 0x00, 0x00, 0x1B]), 0xB);
    }

    #[test]
    fn test_has_meta_byte() {
        assert!(!has_meta_byte(&[0x00, 0x07]));
        assert!(!has_meta_byte(&[0xF0, 0x00, 0x00, 0x17]));
        // two concatenated seconds points
        assert!(has_meta_byte(&[0x00, 0x07, 0x00, 0x17]));
        assert!(has_meta_byte(&[0x00, 0x07, 0xF0, 0x00, 0x00, 0x17]));
    }

    #[test]
    fn test_fp_fix() {
        let flags = FLAG_FLOAT | 0x3;
        let buggy = [0, 0, 0, 0, 0x41, 0x20, 0x00, 0x00];
        assert!(fp_needs_fix(flags, &buggy));
        assert_eq!(fp_fix(flags, &buggy), Some(&buggy[4..]));

        // non-zero prefix means corruption, not the legacy bug
        let corrupt = [1, 0, 0, 0, 0x41, 0x20, 0x00, 0x00];
        assert_eq!(fp_fix(flags, &corrupt), None);

        // a proper 8-byte double is left alone
        let ok = [0x40, 0x24, 0, 0, 0, 0, 0, 0];
        assert!(!fp_needs_fix(FLAG_FLOAT | 0x7, &ok));
        assert_eq!(fp_fix(FLAG_FLOAT | 0x7, &ok), Some(&ok[..]));
    }

    #[test]
    fn test_fix_qualifier_flags() {
        assert_eq!(fix_qualifier_flags(FLAG_FLOAT | 0x3, 4), FLAG_FLOAT | 0x3);
        assert_eq!(fix_qualifier_flags(0x7, 4), 0x3);
    }

    #[test]
    fn test_extract_single_cells() {
        let a = Cell::new(vec![0x00, 0x00], vec![0x2A]);
        let b = Cell::new(vec![0x00, 0x10], vec![0x2B]);
        // out of scan order on purpose
        let points = extract_datapoints(&[&b, &a]).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].qualifier, vec![0x00, 0x00]);
        assert_eq!(points[1].qualifier, vec![0x00, 0x10]);
    }

    #[test]
    fn test_extract_merged_cell() {
        // two 1-byte values plus meta byte
        let merged = Cell::new(vec![0x00, 0x00, 0x00, 0x10], vec![0x2A, 0x2B, 0x00]);
        let points = extract_datapoints(&[&merged]).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].value, vec![0x2A]);
        assert_eq!(points[1].value, vec![0x2B]);
    }

    #[test]
    fn test_extract_mixed_merged_cell() {
        let merged = Cell::new(
            vec![0x00, 0x00, 0xF0, 0x00, 0x00, 0x10],
            vec![0x2A, 0x2B, MS_MIXED_COMPACT],
        );
        let points = extract_datapoints(&[&merged]).unwrap();
        assert_eq!(points.len(), 2);
        assert!(!is_ms(&points[0].qualifier));
        assert!(is_ms(&points[1].qualifier));
    }

    #[test]
    fn test_extract_rejects_truncated_qualifier() {
        let cell = Cell::new(vec![0x00, 0x00, 0x00], vec![0x2A]);
        assert!(extract_datapoints(&[&cell]).unwrap_err().is_malformed_row());
    }

    #[test]
    fn test_extract_rejects_short_value() {
        // merged cell declaring two 1-byte values but carrying one
        let cell = Cell::new(vec![0x00, 0x00, 0x00, 0x10], vec![0x2A]);
        assert!(extract_datapoints(&[&cell]).unwrap_err().is_malformed_row());
    }

    #[test]
    fn test_extract_applies_float_fix() {
        let flags = FLAG_FLOAT | 0x3;
        let qual = vec![0x00, flags];
        let cell = Cell::new(qual, vec![0, 0, 0, 0, 0x41, 0x20, 0x00, 0x00]);
        let points = extract_datapoints(&[&cell]).unwrap();
        assert_eq!(points[0].value, vec![0x41, 0x20, 0x00, 0x00]);
        assert_eq!(points[0].qualifier, vec![0x00, flags]);
    }
}
