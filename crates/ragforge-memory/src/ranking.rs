use ragforge_core::Chunk;
use std::cmp::Ordering;

/// Orders chunks by score, highest first.
///
/// Chunks without a score sort after every scored chunk. Ties are broken by
/// `(kb_id, document_id, index, id)` so the order never depends on the order
/// partial result sets arrived in.
pub fn sort_by_score(chunks: &mut [Chunk]) {
    chunks.sort_by(compare);
}

fn compare(a: &Chunk, b: &Chunk) -> Ordering {
    let by_score = match (a.score, b.score) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_score
        .then_with(|| a.kb_id.cmp(&b.kb_id))
        .then_with(|| a.document_id.cmp(&b.document_id))
        .then_with(|| a.index.cmp(&b.index))
        .then_with(|| a.id.cmp(&b.id))
}

/// Merges partial result sets, sorts them and keeps the best `top_k`.
///
/// Truncation happens only after the full merge.
pub fn rank_chunks<I>(partials: I, top_k: usize) -> Vec<Chunk>
where
    I: IntoIterator<Item = Vec<Chunk>>,
{
    let mut merged: Vec<Chunk> = partials.into_iter().flatten().collect();
    sort_by_score(&mut merged);
    merged.truncate(top_k);
    merged
}
