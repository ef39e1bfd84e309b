//! Sort-merge inner join over two tables sorted by their key columns.

use std::cmp::Ordering;

use chronoflow_block::Block;

/// Compares row `i` of `a` with row `k` of `b` on their key columns.
fn compare(a: &Block, akeys: &[usize], i: usize, b: &Block, bkeys: &[usize], k: usize) -> Ordering {
    for (&ja, &jb) in akeys.iter().zip(bkeys) {
        let o = a
            .value(i, ja)
            .compare(&b.value(k, jb))
            .unwrap_or(Ordering::Equal);
        if o != Ordering::Equal {
            return o;
        }
    }
    Ordering::Equal
}

/// End of the run of rows starting at `start` that share its key.
fn span_end(block: &Block, keys: &[usize], start: usize) -> usize {
    let mut end = start + 1;
    while end < block.nrows() && compare(block, keys, start, block, keys, end) == Ordering::Equal {
        end += 1;
    }
    end
}

/// Row pairs `(left, right)` with equal keys. Equal runs on both sides
/// yield their cartesian product, left-major.
pub(crate) fn merge_join(left: &Block, lkeys: &[usize], right: &Block, rkeys: &[usize]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let (mut i, mut k) = (0, 0);
    while i < left.nrows() && k < right.nrows() {
        let li = span_end(left, lkeys, i);
        let rk = span_end(right, rkeys, k);
        match compare(left, lkeys, i, right, rkeys, k) {
            Ordering::Less => i = li,
            Ordering::Greater => k = rk,
            Ordering::Equal => {
                for a in i..li {
                    out.extend((k..rk).map(|b| (a, b)));
                }
                i = li;
                k = rk;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronoflow_core::{Bounds, Time};
    use chronoflow_exec::testing::float_block;

    #[test]
    fn equal_runs_produce_products() {
        let bounds = Bounds::new(Time(0), Time(10));
        let l = float_block(bounds, &[], &[(1, 0.0), (2, 0.0), (2, 0.0), (4, 0.0)]).expect("block");
        let r = float_block(bounds, &[], &[(0, 0.0), (2, 0.0), (2, 0.0), (3, 0.0), (4, 0.0)]).expect("block");
        let t = l.time_idx().expect("time");
        let pairs = merge_join(&l, &[t], &r, &[t]);
        assert_eq!(pairs, [(1, 1), (1, 2), (2, 1), (2, 2), (3, 4)]);
    }

    #[test]
    fn empty_side_joins_nothing() {
        let bounds = Bounds::new(Time(0), Time(10));
        let l = float_block(bounds, &[], &[(1, 0.0)]).expect("block");
        let r = float_block(bounds, &[], &[]).expect("block");
        let t = l.time_idx().expect("time");
        assert!(merge_join(&l, &[t], &r, &[t]).is_empty());
    }
}
