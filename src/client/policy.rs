use crate::record::SrvRecord;
use rand::Rng;

/// Picks one record using the thread-local generator. See [`pick_with`].
pub fn pick<R: SrvRecord>(records: &[R]) -> Option<&R> {
    pick_with(records, &mut rand::rng())
}

/// Picks one record by priority and weight.
///
/// Only the records sharing the lowest priority are candidates. Among them a
/// record is chosen with probability proportional to its weight, or uniformly
/// if every weight is zero. Returns `None` only for an empty slice.
pub fn pick_with<'a, R: SrvRecord>(records: &'a [R], rng: &mut impl Rng) -> Option<&'a R> {
    let low_priority = records.iter().map(SrvRecord::priority).min()?;
    let tier = records
        .iter()
        .filter(|record| record.priority() == low_priority)
        .collect::<Vec<_>>();

    if let [only] = tier.as_slice() {
        return Some(*only);
    }

    let sum: u32 = tier.iter().map(|record| u32::from(record.weight())).sum();
    if sum == 0 {
        return Some(tier[rng.random_range(0..tier.len())]);
    }

    let mut remaining = i64::from(rng.random_range(0..sum));
    for record in &tier {
        remaining -= i64::from(record.weight());
        if remaining < 0 {
            return Some(*record);
        }
    }
    // The draw is below `sum`, so the loop always returns.
    tier.first().copied()
}

/// Orders records by ascending priority, then descending weight. The sort is
/// stable: records tied on both keep the order the nameserver sent them in.
pub fn sort_all<R: SrvRecord + Clone>(records: &[R]) -> Vec<R> {
    let mut sorted = records.to_vec();
    sorted.sort_by_key(|record| record.sort_key());
    sorted
}
