//! Cell merger
//!
//! Collapses all cells of one row into a single canonical cell: the
//! concatenation of every per-datapoint qualifier in ascending time order,
//! with the concatenated values followed by one trailing meta byte.
//!
//! Two strategies cover the input shapes:
//! - **trivial**: every cell holds a single datapoint and the scan order is
//!   already ascending (a sort pass handles mixed-resolution rows);
//! - **complex**: at least one cell was merged before, so the row is
//!   flattened to individual datapoints, re-sorted, and deduplicated.
//!
//! Annotations are extracted out-of-band, append-style cells short-circuit
//! as already canonical, and true duplicate datapoints collapse to one.
//! Conflicting data at the same offset is a fatal row corruption.

use tracing::{debug, error};

use crate::annotation::Annotation;
use crate::compaction::codec::{
    extract_datapoints, fix_float_value, fix_qualifier_flags, fp_needs_fix, is_ms,
    offset_from_qualifier, ANNOTATION_PREFIX, APPEND_QUALIFIER, MS_MIXED_COMPACT,
};
use crate::compaction::error::{CompactionError, CompactionResult};
use crate::store::Cell;

/// What the merger did with a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No datapoint cells remained (deleted row, or annotations only)
    Empty,
    /// A single cell was kept as-is (modulo the float fix)
    SingleKept,
    /// All cells were single datapoints and were concatenated in order
    TrivialMerged,
    /// The row was flattened, re-sorted, and deduplicated
    ComplexMerged,
    /// An append-style cell already holds the canonical form
    AlreadyAppended,
}

/// Result of merging one row's cells
#[derive(Debug)]
pub struct RowMerge {
    /// The canonical cell, when the row still holds datapoints
    pub compacted: Option<Cell>,
    /// Annotations extracted from the row, preserved out-of-band
    pub annotations: Vec<Annotation>,
    /// Which path produced the result
    pub outcome: MergeOutcome,
    /// Whether the store needs a put of the canonical cell
    pub write: bool,
    /// Qualifiers of the original cells to delete after the put
    pub deletes: Vec<Vec<u8>>,
}

impl RowMerge {
    fn keep(compacted: Option<Cell>, annotations: Vec<Annotation>, outcome: MergeOutcome) -> Self {
        Self {
            compacted,
            annotations,
            outcome,
            write: false,
            deletes: Vec::new(),
        }
    }

    /// Did the merge produce a canonical form the store does not hold yet?
    pub fn mutates_store(&self) -> bool {
        matches!(
            self.outcome,
            MergeOutcome::TrivialMerged | MergeOutcome::ComplexMerged
        )
    }
}

/// Merge a row's cells into canonical form.
///
/// Pure in-memory transformation: store mutations are the caller's business.
/// `deletes` lists the qualifiers of every cell the canonical form replaces;
/// it is empty whenever no store write is warranted (empty rows, single
/// cells, append-style rows).
pub fn merge(cells: Vec<Cell>) -> CompactionResult<RowMerge> {
    if cells.is_empty() {
        debug!("attempted to compact a row that doesn't exist");
        return Ok(RowMerge::keep(None, Vec::new(), MergeOutcome::Empty));
    }

    // Preprocessing: extract annotations, capture the append sentinel, drop
    // malformed qualifiers. Only even-length qualifiers carry datapoints.
    let mut annotations = Vec::new();
    let mut append: Option<Cell> = None;
    let mut retained: Vec<Cell> = Vec::with_capacity(cells.len());
    for cell in cells {
        let len = cell.qualifier.len();
        if len == 0 || len % 2 != 0 {
            if cell.qualifier.first() == Some(&ANNOTATION_PREFIX) {
                annotations.push(Annotation::parse(&cell.value)?);
            } else if cell.qualifier == APPEND_QUALIFIER {
                if append.is_some() {
                    // Two append cells under one key should never happen;
                    // keep the first and surface the conflict to operators.
                    error!("multiple append cells in one row, keeping the first");
                } else {
                    append = Some(cell);
                }
            }
            continue;
        }
        retained.push(cell);
    }

    if retained.is_empty() {
        return Ok(match append {
            Some(cell) => {
                RowMerge::keep(Some(cell), annotations, MergeOutcome::AlreadyAppended)
            }
            None => RowMerge::keep(None, annotations, MergeOutcome::Empty),
        });
    }
    if retained.len() == 1 {
        return single_cell(retained.remove(0), annotations);
    }

    // Analysis: decide trivial vs complex, track resolutions, pre-size the
    // output buffers, and remember the longest qualifier for the dup check.
    let mut trivial = true;
    let mut ms_in_row = false;
    let mut s_in_row = false;
    let mut qual_len = 0usize;
    let mut val_len = 1usize; // reserve the trailing meta byte
    let mut longest_idx = 0usize;
    for (i, cell) in retained.iter().enumerate() {
        let qual = &cell.qualifier;
        let len = qual.len();
        if len > retained[longest_idx].qualifier.len() {
            longest_idx = i;
        }
        qual_len += len;
        if len == 2 || (len == 4 && is_ms(qual[0])) {
            if is_ms(qual[0]) {
                ms_in_row = true;
            } else {
                s_in_row = true;
            }
            if len == 4 {
                val_len += cell.value.len();
            } else {
                val_len += if fp_needs_fix(qual[1], &cell.value) {
                    4
                } else {
                    cell.value.len()
                };
            }
        } else {
            // Already merged: either two concatenated seconds datapoints
            // (length 4) or a longer compacted cell.
            trivial = false;
            if len == 4 {
                s_in_row = true;
            } else {
                let meta = cell.value.last().copied().unwrap_or(0);
                if meta & MS_MIXED_COMPACT == MS_MIXED_COMPACT {
                    ms_in_row = true;
                    s_in_row = true;
                } else if is_ms(qual[0]) {
                    ms_in_row = true;
                } else {
                    s_in_row = true;
                }
            }
        }
    }
    let mixed = ms_in_row && s_in_row;

    let (compact, outcome) = if trivial {
        match trivial_compact(&mut retained, qual_len, val_len, mixed)? {
            Some(cell) => (cell, MergeOutcome::TrivialMerged),
            // True duplicates among single datapoints: collapse them on the
            // complex path instead.
            None => (complex_compact(&retained, mixed)?, MergeOutcome::ComplexMerged),
        }
    } else {
        (complex_compact(&retained, mixed)?, MergeOutcome::ComplexMerged)
    };

    // After a complex merge the canonical qualifier may coincide with a
    // pre-existing cell (re-compaction after a late write at a known
    // offset). We must not delete what we are about to write, and when the
    // store already holds the exact canonical value there is nothing to
    // write at all.
    let mut write = true;
    if outcome == MergeOutcome::ComplexMerged
        && compact.qualifier.len() <= retained[longest_idx].qualifier.len()
    {
        let dup_idx = if retained[longest_idx].qualifier == compact.qualifier {
            Some(longest_idx)
        } else {
            // The collision is not guaranteed to be the longest cell; scan
            // the rest to be safe.
            retained
                .iter()
                .position(|cell| cell.qualifier == compact.qualifier)
        };
        if let Some(idx) = dup_idx {
            if retained[idx].value == compact.value {
                write = false;
            }
            retained.retain(|cell| cell.qualifier != compact.qualifier);
        }
    }

    let deletes = retained.into_iter().map(|cell| cell.qualifier).collect();
    Ok(RowMerge {
        compacted: Some(compact),
        annotations,
        outcome,
        write,
        deletes,
    })
}

/// Keep a lone cell, repairing the legacy float encoding when needed.
fn single_cell(cell: Cell, annotations: Vec<Annotation>) -> CompactionResult<RowMerge> {
    if cell.qualifier.len() == 2 && fp_needs_fix(cell.qualifier[1], &cell.value) {
        let fixed = fix_float_value(cell.qualifier[1], &cell.value)?.into_owned();
        let flags = fix_qualifier_flags(cell.qualifier[1], fixed.len());
        let repaired = Cell::new(vec![cell.qualifier[0], flags], fixed);
        return Ok(RowMerge::keep(
            Some(repaired),
            annotations,
            MergeOutcome::SingleKept,
        ));
    }
    Ok(RowMerge::keep(
        Some(cell),
        annotations,
        MergeOutcome::SingleKept,
    ))
}

/// Concatenate single-datapoint cells in time order.
///
/// Returns `Ok(None)` when the row turns out to contain true duplicate
/// datapoints, which the complex path knows how to collapse.
fn trivial_compact(
    cells: &mut [Cell],
    qual_len: usize,
    val_len: usize,
    mixed: bool,
) -> CompactionResult<Option<Cell>> {
    if mixed {
        // Seconds and millisecond qualifiers do not sort together in byte
        // order, so the scan order is not the time order here.
        cells.sort_by_key(|cell| offset_from_qualifier(&cell.qualifier, 0));
    }

    let mut qualifier = Vec::with_capacity(qual_len);
    let mut value = Vec::with_capacity(val_len);
    let mut last_delta: Option<u64> = None;
    for i in 0..cells.len() {
        let cell = &cells[i];
        let qual = &cell.qualifier;
        let delta = offset_from_qualifier(qual, 0);
        if let Some(last) = last_delta {
            if delta <= last {
                if delta == last && i > 0 && cells[i - 1] == *cell {
                    return Ok(None);
                }
                return Err(CompactionError::MalformedRow(format!(
                    "out of order or duplicate datapoint: delta {delta} after {last}, \
                     qualifier {qual:02X?}"
                )));
            }
        }
        last_delta = Some(delta);

        if qual.len() == 2 {
            let v = fix_float_value(qual[1], &cell.value)?;
            qualifier.push(qual[0]);
            qualifier.push(fix_qualifier_flags(qual[1], v.len()));
            value.extend_from_slice(&v);
        } else {
            qualifier.extend_from_slice(qual);
            value.extend_from_slice(&cell.value);
        }
    }

    value.push(if mixed { MS_MIXED_COMPACT } else { 0 });
    Ok(Some(Cell { qualifier, value }))
}

/// Flatten, re-sort, and deduplicate a partially compacted row.
fn complex_compact(cells: &[Cell], mixed: bool) -> CompactionResult<Cell> {
    let points = extract_datapoints(cells)?;

    // First pass: size the buffers and tombstone true duplicates. A
    // duplicate offset with different bytes is corruption.
    let mut skip = vec![false; points.len()];
    let mut qual_len = 0usize;
    let mut val_len = 1usize;
    let mut last_delta: Option<u64> = None;
    let mut last_kept = 0usize;
    for (i, point) in points.iter().enumerate() {
        let delta = point.offset();
        if let Some(last) = last_delta {
            if delta == last {
                let prev = &points[last_kept];
                if prev.qualifier != point.qualifier || prev.value != point.value {
                    return Err(CompactionError::MalformedRow(format!(
                        "duplicate offset {delta} with conflicting data: \
                         {:02X?}/{:02X?} vs {:02X?}/{:02X?}",
                        prev.qualifier, prev.value, point.qualifier, point.value
                    )));
                }
                skip[i] = true;
                continue;
            }
        }
        last_delta = Some(delta);
        last_kept = i;
        qual_len += point.qualifier.len();
        val_len += point.value.len();
    }

    let mut qualifier = Vec::with_capacity(qual_len);
    let mut value = Vec::with_capacity(val_len);
    for (i, point) in points.iter().enumerate() {
        if skip[i] {
            continue;
        }
        qualifier.extend_from_slice(&point.qualifier);
        value.extend_from_slice(&point.value);
    }

    value.push(if mixed { MS_MIXED_COMPACT } else { 0 });
    Ok(Cell { qualifier, value })
}
