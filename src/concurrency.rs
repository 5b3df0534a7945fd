//! Limit the number of sources driven in parallel.

use rayon::prelude::*;

/// Run `f` over `items` with at most `limit` in flight, collecting results in input order.
/// Per-item failures are values, so one failing source never stops the others.
pub fn map_sources_limited<T, R, F>(items: &[T], limit: usize, f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Sync + Fn(&T) -> R,
{
    if limit <= 1 {
        return items.iter().map(&f).collect();
    }
    let mut out = Vec::with_capacity(items.len());
    for chunk in items.chunks(limit) {
        let part: Vec<R> = chunk.par_iter().map(&f).collect();
        out.extend(part);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_is_preserved_at_any_limit() {
        let items: Vec<u32> = (0..17).collect();
        for limit in [0, 1, 3, 32] {
            let out = map_sources_limited(&items, limit, |n| n * 2);
            assert_eq!(out, items.iter().map(|n| n * 2).collect::<Vec<_>>());
        }
    }
}
