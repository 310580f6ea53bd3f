//! Cell merging: fold all of a row's cells into one canonical cell.
//!
//! The merge has two paths. The trivial path applies when every cell holds a
//! single datapoint: the cells are already unique and (outside of mixed
//! resolutions) arrive in scan order, so the output is a straight
//! stream-copy. The complex path flattens everything to per-datapoint
//! entries first and handles previously-merged cells and duplicate
//! datapoints. Both end with one qualifier concatenation, one value
//! concatenation and a trailing meta byte.
//!
//! Annotations are lifted out before merging and returned untouched.
//! Append-style rows are already canonical and pass through as-is.

use crate::annotation::Annotation;
use crate::codec::{
    extract_datapoints, fix_qualifier_flags, flags, fp_fix, fp_needs_fix, has_meta_byte, is_ms,
    offset, rewrite_flags, sort_key, value_len, ANNOTATION_PREFIX, APPEND_QUALIFIER,
    MS_MIXED_COMPACT,
};
use crate::errors::{CompactError, Result};
use crate::store::Cell;

/// Which path a merge took. `Empty` and `AlreadyAppended` never mutate the
/// store; `SingleKept` only does when it repaired a mis-encoded float.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MergeOutcome {
    Empty,
    SingleKept,
    TrivialMerged,
    ComplexMerged,
    AlreadyAppended,
}

/// The result of merging one row's cells.
#[derive(Debug)]
pub struct CompactedRow {
    /// The canonical cell, or None when the row held no datapoints
    pub cell: Option<Cell>,
    /// Annotations lifted out of the row, in scan order
    pub annotations: Vec<Annotation>,
    pub outcome: MergeOutcome,
    /// Whether the canonical cell needs to be written back
    pub write: bool,
    /// Qualifiers of the merged originals, to delete after a write. Never
    /// contains the canonical cell's own qualifier.
    pub to_delete: Vec<Vec<u8>>,
    /// True duplicate datapoints collapsed along the way
    pub duplicates: usize,
}

impl CompactedRow {
    fn untouched(cell: Option<Cell>, annotations: Vec<Annotation>, outcome: MergeOutcome) -> Self {
        Self {
            cell,
            annotations,
            outcome,
            write: false,
            to_delete: Vec::new(),
            duplicates: 0,
        }
    }
}

/// Merge a row's cells into one canonical cell.
///
/// Pure: store mutation is the caller's business. The input must be every
/// cell of one row, in store scan order.
pub fn merge(cells: &[Cell]) -> Result<CompactedRow> {
    let mut annotations = Vec::new();
    let mut datapoints: Vec<&Cell> = Vec::new();
    let mut append_cell: Option<&Cell> = None;
    let mut ms_in_row = false;
    let mut s_in_row = false;
    // index into `datapoints` of the cell with the longest qualifier
    let mut longest = 0;
    let mut need_complex = false;

    for cell in cells {
        let qual = &cell.qualifier;
        match qual.len() {
            2 => {}
            4 if is_ms(qual) => {}
            // two concatenated seconds datapoints
            4 => need_complex = true,
            len if len % 2 == 1 && qual.first() == Some(&ANNOTATION_PREFIX) => {
                annotations.push(Annotation::parse(&cell.value).map_err(|e| {
                    CompactError::malformed_row(format!("corrupt annotation: {}", e))
                })?);
                continue;
            }
            _ if qual[..] == APPEND_QUALIFIER => {
                if append_cell.is_some() {
                    error!("Duplicate append cell in row; keeping the first");
                } else {
                    append_cell = Some(cell);
                }
                continue;
            }
            0 => {
                warn!("Skipping cell with an empty qualifier");
                continue;
            }
            _ if qual.len() % 2 == 1 => {
                warn!("Skipping malformed qualifier: {}", hex::encode(qual));
                continue;
            }
            // previously merged cell
            _ => need_complex = true,
        }

        // Resolution accounting. A merged cell speaks for all its datapoints
        // through the meta byte; anything else through its first byte.
        if has_meta_byte(qual)
            && cell.value.last().map_or(false, |m| m & MS_MIXED_COMPACT != 0)
        {
            ms_in_row = true;
            s_in_row = true;
        } else if is_ms(qual) {
            ms_in_row = true;
        } else {
            s_in_row = true;
        }

        if qual.len() > datapoints.get(longest).map_or(0, |c| c.qualifier.len()) {
            longest = datapoints.len();
        }
        datapoints.push(cell);
    }

    if let Some(appended) = append_cell {
        if !datapoints.is_empty() {
            warn!(
                "Row has an append cell plus {} datapoint cells; leaving the datapoints for a later pass",
                datapoints.len()
            );
        }
        return Ok(CompactedRow::untouched(
            Some(appended.clone()),
            annotations,
            MergeOutcome::AlreadyAppended,
        ));
    }

    if datapoints.is_empty() {
        return Ok(CompactedRow::untouched(None, annotations, MergeOutcome::Empty));
    }

    if datapoints.len() == 1 {
        return single_cell(datapoints[0], annotations);
    }

    let mixed = ms_in_row && s_in_row;

    // Trivial path: every cell is one datapoint. Falls back to the complex
    // path when it trips over a duplicate, which only the complex path can
    // collapse safely.
    if !need_complex {
        if let Some(cell) = trivial_compact(&datapoints, mixed)? {
            let to_delete = datapoints.iter().map(|c| c.qualifier.clone()).collect();
            return Ok(CompactedRow {
                cell: Some(cell),
                annotations,
                outcome: MergeOutcome::TrivialMerged,
                write: true,
                to_delete,
                duplicates: 0,
            });
        }
    }

    let (cell, duplicates) = complex_compact(&datapoints, mixed)?;

    // A re-compaction can reproduce an existing merged cell byte for byte
    // (e.g. a stray single write at an offset the merged cell already
    // covers). When that happens the write is skipped, and in any case the
    // delete list must not touch the surviving qualifier.
    let mut write = true;
    let longest_cell = datapoints[longest];
    if cell.qualifier.len() <= longest_cell.qualifier.len() {
        let matched = if longest_cell.qualifier == cell.qualifier {
            Some(longest_cell)
        } else {
            // TODO: determine whether this scan is still reachable now that
            // the longest qualifier is tracked during preprocessing
            datapoints
                .iter()
                .copied()
                .find(|c| c.qualifier == cell.qualifier)
        };
        if let Some(existing) = matched {
            if existing.value == cell.value {
                write = false;
            }
        }
    }
    let to_delete = datapoints
        .iter()
        .map(|c| c.qualifier.clone())
        .filter(|q| q != &cell.qualifier)
        .collect();

    Ok(CompactedRow {
        cell: Some(cell),
        annotations,
        outcome: MergeOutcome::ComplexMerged,
        write,
        to_delete,
        duplicates,
    })
}

/// A row that is down to one datapoint cell. Nothing to merge; repair the
/// legacy float encoding if present and hand back a canonical view.
fn single_cell(cell: &Cell, annotations: Vec<Annotation>) -> Result<CompactedRow> {
    let qual = &cell.qualifier;

    // Already merged earlier; canonical as it stands.
    if has_meta_byte(qual) {
        return Ok(CompactedRow::untouched(
            Some(cell.clone()),
            annotations,
            MergeOutcome::SingleKept,
        ));
    }

    let f = flags(qual);

    // A lone datapoint that already carries its meta byte (written by an
    // earlier collapse of duplicates).
    if cell.value.len() == value_len(f) + 1 && cell.value.last() == Some(&0x00) {
        return Ok(CompactedRow::untouched(
            Some(cell.clone()),
            annotations,
            MergeOutcome::SingleKept,
        ));
    }

    if fp_needs_fix(f, &cell.value) {
        let fixed = fp_fix(f, &cell.value).ok_or_else(|| {
            CompactError::malformed_row(format!(
                "corrupt floating point value: {}",
                hex::encode(&cell.value)
            ))
        })?;
        let qualifier = rewrite_flags(qual, fix_qualifier_flags(f, fixed.len()));
        let mut value = fixed.to_vec();
        value.push(0x00);
        return Ok(CompactedRow {
            cell: Some(Cell { qualifier, value }),
            annotations,
            outcome: MergeOutcome::SingleKept,
            // the repaired value replaces the original under the same qualifier
            write: true,
            to_delete: Vec::new(),
            duplicates: 0,
        });
    }

    let mut value = cell.value.clone();
    value.push(0x00);
    Ok(CompactedRow::untouched(
        Some(Cell {
            qualifier: qual.clone(),
            value,
        }),
        annotations,
        MergeOutcome::SingleKept,
    ))
}

/// Stream-copy single-datapoint cells into one canonical cell.
///
/// Returns None when two cells share an offset; the complex path owns
/// duplicate collapsing.
fn trivial_compact(cells: &[&Cell], mixed: bool) -> Result<Option<Cell>> {
    let mut ordered: Vec<&Cell> = cells.to_vec();
    // The store scans seconds qualifiers ahead of millisecond qualifiers
    // regardless of time, so mixed rows need the sort.
    if mixed {
        ordered.sort_by_key(|c| sort_key(&c.qualifier));
    }

    let qual_len = ordered.iter().map(|c| c.qualifier.len()).sum();
    let val_len: usize = ordered.iter().map(|c| c.value.len()).sum();
    let mut qualifier = Vec::with_capacity(qual_len);
    let mut value = Vec::with_capacity(val_len + 1);

    let mut last_key: Option<u64> = None;
    for cell in ordered {
        let key = sort_key(&cell.qualifier);
        if let Some(last) = last_key {
            if key == last {
                return Ok(None);
            }
            if key < last {
                return Err(CompactError::malformed_row(format!(
                    "out of order datapoint at delta {}",
                    offset(&cell.qualifier)
                )));
            }
        }
        last_key = Some(key);

        let f = flags(&cell.qualifier);
        if fp_needs_fix(f, &cell.value) {
            let fixed = fp_fix(f, &cell.value).ok_or_else(|| {
                CompactError::malformed_row(format!(
                    "corrupt floating point value: {}",
                    hex::encode(&cell.value)
                ))
            })?;
            qualifier.extend_from_slice(&rewrite_flags(
                &cell.qualifier,
                fix_qualifier_flags(f, fixed.len()),
            ));
            value.extend_from_slice(fixed);
        } else {
            qualifier.extend_from_slice(&cell.qualifier);
            value.extend_from_slice(&cell.value);
        }
    }

    value.push(if mixed { MS_MIXED_COMPACT } else { 0x00 });
    Ok(Some(Cell { qualifier, value }))
}

/// Flatten every cell to per-datapoint entries, collapse true duplicates,
/// and concatenate what is left in time order.
fn complex_compact(cells: &[&Cell], mixed: bool) -> Result<(Cell, usize)> {
    let points = extract_datapoints(cells)?;

    let mut keep = vec![true; points.len()];
    let mut duplicates = 0;
    let mut qual_len = 0;
    let mut val_len = 0;
    let mut last_kept: Option<usize> = None;
    for i in 0..points.len() {
        if let Some(j) = last_kept {
            if points[i].sort_key() == points[j].sort_key() {
                if points[i].qualifier == points[j].qualifier && points[i].value == points[j].value
                {
                    keep[i] = false;
                    duplicates += 1;
                    continue;
                }
                return Err(CompactError::malformed_row(format!(
                    "duplicate datapoint at delta {} with differing payloads: {}/{} vs {}/{}",
                    offset(&points[i].qualifier),
                    hex::encode(&points[j].qualifier),
                    hex::encode(&points[j].value),
                    hex::encode(&points[i].qualifier),
                    hex::encode(&points[i].value),
                )));
            }
        }
        last_kept = Some(i);
        qual_len += points[i].qualifier.len();
        val_len += points[i].value.len();
    }

    let mut qualifier = Vec::with_capacity(qual_len);
    let mut value = Vec::with_capacity(val_len + 1);
    for (i, point) in points.iter().enumerate() {
        if keep[i] {
            qualifier.extend_from_slice(&point.qualifier);
            value.extend_from_slice(&point.value);
        }
    }
    value.push(if mixed { MS_MIXED_COMPACT } else { 0x00 });
    Ok((Cell { qualifier, value }, duplicates))
}
