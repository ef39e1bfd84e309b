//! Plain-text table rendering of blocks, for logs and test failures.

use std::fmt;

use crate::block::Block;

/// Renders at most `head` rows when set.
pub struct Formatted<'a> {
    block: &'a Block,
    head: Option<usize>,
}

pub fn formatted(block: &Block) -> Formatted<'_> {
    Formatted { block, head: None }
}

impl<'a> Formatted<'a> {
    pub fn head(mut self, n: usize) -> Self {
        self.head = Some(n);
        self
    }
}

impl fmt::Display for Formatted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.block;
        writeln!(f, "Block: bounds={} tags={}", b.bounds(), b.tags())?;
        let rows = self.head.map_or(b.nrows(), |h| h.min(b.nrows()));

        let mut cells: Vec<Vec<String>> = Vec::with_capacity(rows + 1);
        cells.push(b.cols().iter().map(|c| c.label.clone()).collect());
        for i in 0..rows {
            cells.push((0..b.ncols()).map(|j| b.value(i, j).to_string()).collect());
        }
        let mut widths = vec![0usize; b.ncols()];
        for row in &cells {
            for (w, c) in widths.iter_mut().zip(row) {
                *w = (*w).max(c.chars().count());
            }
        }
        for row in &cells {
            let line: Vec<String> = row
                .iter()
                .zip(&widths)
                .map(|(c, w)| format!("{c:>w$}", w = *w))
                .collect();
            writeln!(f, "{}", line.join(" "))?;
        }
        if rows < b.nrows() {
            writeln!(f, "... {} more rows", b.nrows() - rows)?;
        }
        Ok(())
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatted(self).fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::BlockBuilder;
    use chronoflow_core::{Bounds, ColMeta, DataType, Time};
    use chronoflow_mem::Allocator;

    #[test]
    fn head_truncates_and_aligns() {
        let mut b = BlockBuilder::new(&Allocator::unlimited());
        b.set_bounds(Bounds::new(Time(0), Time(10)));
        let t = b.add_column(ColMeta::time()).expect("time");
        let v = b.add_column(ColMeta::value(DataType::Int)).expect("value");
        b.append_times(t, &[Time(1), Time(2), Time(3)]).expect("times");
        b.append_ints(v, &[7, 1000, 3]).expect("ints");
        let blk = b.block().expect("block");

        let out = formatted(&blk).head(2).to_string();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("Block: bounds=["), "{out}");
        assert_eq!(lines[4], "... 1 more rows");
        assert_eq!(lines[2].len(), lines[3].len());
        assert_eq!(blk.to_string().lines().count(), 5);
    }
}
