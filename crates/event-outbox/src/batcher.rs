//! Selection of the next batch from the head of the queue.

use crate::config::TransportMode;
use crate::entry::Entry;

/// Count of leading batch entries whose summed size stays below
/// `max_payload_bytes`.
///
/// Stops before the entry that would make the running total reach the
/// budget, and at the first entry that is not a batch entry. Returns 0 when
/// the head alone already meets the budget.
pub fn select_batch<'a, I>(entries: I, max_payload_bytes: usize) -> usize
where
    I: IntoIterator<Item = &'a Entry>,
{
    let mut count = 0;
    let mut total = 0usize;

    for entry in entries {
        let Some(batch) = entry.as_batch() else {
            break;
        };
        total = total.saturating_add(batch.size_bytes());
        if total >= max_payload_bytes {
            break;
        }
        count += 1;
    }

    count
}

/// Number of head entries the next send carries in `mode`.
pub fn select<'a, I>(entries: I, mode: TransportMode, max_payload_bytes: usize) -> usize
where
    I: IntoIterator<Item = &'a Entry>,
{
    match mode {
        TransportMode::Batch => select_batch(entries, max_payload_bytes),
        TransportMode::Beacon => entries
            .into_iter()
            .next()
            .map_or(0, |head| usize::from(head.as_beacon().is_some())),
    }
}
