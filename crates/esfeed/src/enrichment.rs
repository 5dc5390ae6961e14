//! 🧩 Enrichment batching.
//!
//! Two independent limits apply before anything reaches a sink:
//! - structural: two enrichments from the same hit never share a batch
//! - size: no sink call carries more than [`MAX_SUBMISSION_SIZE`] records
//!
//! `rebatch` handles the first, `chunks` the second.

use crate::common::{EnrichmentBatch, EnrichmentGroup};

/// 📦 Hard ceiling on records per sink call.
pub const MAX_SUBMISSION_SIZE: usize = 2000;

/// 🔀 Deal per-hit groups out into batches, one entry per group per batch.
///
/// Batch `i` holds `g[i]` for every group `g` longer than `i`, in group order.
/// The batch count equals the longest group's length.
pub fn rebatch(groups: &[EnrichmentGroup]) -> Vec<EnrichmentBatch> {
    let longest = groups.iter().map(Vec::len).max().unwrap_or(0);
    (0..longest)
        .map(|i| groups.iter().filter_map(|group| group.get(i).cloned()).collect())
        .collect()
}

/// ✂️ Split records into sink-sized slices. Order is preserved and no slice is empty.
pub fn chunks<T>(records: &[T]) -> impl Iterator<Item = &[T]> {
    records.chunks(MAX_SUBMISSION_SIZE)
}
