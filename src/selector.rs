//! Weighted categorical item selection.
//!
//! Conceptually the selector appends `weight[category]` repetitions of each
//! category's full member list into one pool and draws uniformly from it,
//! so P(item) = `weight[cat] / Σ_c weight[c] × |c|`. The implementation
//! reproduces that distribution in O(n) without materializing the pool:
//! per-category population counts feed a cumulative `weight × count` table,
//! one draw locates the category and a second uniform draw picks within it.

use crate::config::SelectionWeights;
use crate::expiry::CATEGORY_ORDER;
use crate::item::Item;
use chrono::NaiveDate;
use rand::Rng;
use tracing::trace;

/// Draw one item biased toward under-weighted-but-present categories.
///
/// Returns `None` only for an empty `items` slice; callers are expected to
/// guard that case (the rotation task never selects from an empty
/// collection). When every present category carries weight 0 the effective
/// pool is empty and the first item in original order is returned
/// deterministically.
pub fn select<'a, R: Rng + ?Sized>(
    items: &'a [Item],
    weights: &SelectionWeights,
    today: NaiveDate,
    rng: &mut R,
) -> Option<&'a Item> {
    if items.is_empty() {
        return None;
    }

    // Stable partition: indices per category, original order preserved.
    let mut buckets: [Vec<usize>; 5] = Default::default();
    for (index, item) in items.iter().enumerate() {
        let category = item.expiry_category(today);
        let slot = CATEGORY_ORDER
            .iter()
            .position(|c| *c == category)
            .unwrap_or(CATEGORY_ORDER.len() - 1);
        buckets[slot].push(index);
    }

    // Each category contributes weight × population to the pool.
    let contributions: Vec<u64> = CATEGORY_ORDER
        .iter()
        .zip(buckets.iter())
        .map(|(category, bucket)| u64::from(weights.weight_for(*category)) * bucket.len() as u64)
        .collect();
    let pool_size: u64 = contributions.iter().sum();

    if pool_size == 0 {
        trace!("selection pool is empty, falling back to first item");
        return items.first();
    }

    let mut draw = rng.gen_range(0..pool_size);
    for (bucket, contribution) in buckets.iter().zip(contributions.iter()) {
        if draw < *contribution {
            // Uniform within the category.
            let index = bucket[rng.gen_range(0..bucket.len())];
            return Some(&items[index]);
        }
        draw -= contribution;
    }

    // Unreachable: draw < pool_size = Σ contributions.
    items.first()
}

/// Independent draws with replacement, for the sampled-items table.
///
/// Performs `min(n, items.len())` draws. Duplicates across draws are
/// expected and deliberate; an empty input yields an empty output.
pub fn sample<R: Rng + ?Sized>(
    items: &[Item],
    weights: &SelectionWeights,
    n: usize,
    today: NaiveDate,
    rng: &mut R,
) -> Vec<Item> {
    let count = n.min(items.len());
    (0..count)
        .filter_map(|_| select(items, weights, today, rng).cloned())
        .collect()
}
