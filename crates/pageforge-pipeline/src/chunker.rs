//! Adaptive splitting of page-indexed text into overlapping chunks.

/// Fixed page count by which successive chunks overlap the previous one,
/// so the Validator/History merger can deduplicate across the boundary.
const OVERLAP_PAGES: i64 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChunk {
    pub chunk_index: i64,
    pub page_start: i64,
    pub page_end: i64,
    pub has_overlap: bool,
}

fn pages_per_chunk(total_pages: i64) -> i64 {
    match total_pages {
        n if n <= 50 => n.max(1),
        n if n <= 200 => 50,
        n if n <= 500 => 40,
        _ => 30,
    }
}

/// Plans an ordered list of overlapping page-range chunks for `total_pages`.
/// Returns an empty plan for `total_pages <= 0` (callers validate page count
/// before invoking the chunker; see ControlAPI's INVALID_PDF check).
pub fn plan(total_pages: i64) -> Vec<PlannedChunk> {
    if total_pages <= 0 {
        return vec![];
    }
    let size = pages_per_chunk(total_pages);
    let mut chunks = Vec::new();
    let mut start = 0i64;
    let mut index = 0i64;
    while start < total_pages {
        let first = index == 0;
        let effective_start = if first { start } else { (start - OVERLAP_PAGES).max(0) };
        let end = (effective_start + size).min(total_pages);
        chunks.push(PlannedChunk {
            chunk_index: index,
            page_start: effective_start,
            page_end: end,
            has_overlap: !first,
        });
        start = end;
        index += 1;
    }
    chunks
}
