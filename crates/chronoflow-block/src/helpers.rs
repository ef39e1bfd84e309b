//! Column lookup and row-copy helpers shared by transformations.

use chronoflow_core::{ColMeta, Result, Tags, Value, TIME_COL, VALUE_COL};

use crate::block::Block;
use crate::builder::BlockBuilder;

/// For each builder column, the index of the source block column feeding it.
pub type ColMap = Vec<Option<usize>>;

pub fn col_idx(label: &str, cols: &[ColMeta]) -> Option<usize> {
    cols.iter().position(|c| c.label == label)
}

pub fn value_idx(cols: &[ColMeta]) -> Option<usize> {
    col_idx(VALUE_COL, cols)
}

pub fn time_idx(cols: &[ColMeta]) -> Option<usize> {
    col_idx(TIME_COL, cols)
}

/// Maps builder columns to block columns by label.
pub fn col_map(builder: &BlockBuilder, block: &Block) -> ColMap {
    builder
        .cols()
        .iter()
        .map(|c| col_idx(&c.label, block.cols()))
        .collect()
}

/// Adds every column of `block` to `builder` and copies its common values.
pub fn add_block_cols(block: &Block, builder: &mut BlockBuilder) -> Result<ColMap> {
    for meta in block.cols() {
        let j = builder.add_column(meta.clone())?;
        if meta.is_common_tag() {
            if let Some(v) = block.tags().get(&meta.label) {
                builder.set_common_string(j, v)?;
            }
        }
    }
    Ok(col_map(builder, block))
}

/// Adds one common tag column per tag and sets its value.
pub fn add_tags(tags: &Tags, builder: &mut BlockBuilder) -> Result<()> {
    for (k, v) in tags.iter() {
        let j = builder.add_column(ColMeta::tag(k, true))?;
        builder.set_common_string(j, v)?;
    }
    Ok(())
}

/// Appends row `i` of `block` to every mapped builder column.
pub fn append_row(i: usize, block: &Block, builder: &mut BlockBuilder, map: &ColMap) -> Result<()> {
    for (j, src) in map.iter().enumerate() {
        if let Some(src) = *src {
            if let Some(col) = block.column(src) {
                builder.append_from(j, col, i)?;
            }
        }
    }
    Ok(())
}

/// Like [`append_row`], but a builder column with no source gets the zero
/// value of its type, so columns stay the same length.
pub fn append_row_filled(i: usize, block: &Block, builder: &mut BlockBuilder, map: &ColMap) -> Result<()> {
    for (j, src) in map.iter().enumerate() {
        match src.and_then(|s| block.column(s)) {
            Some(col) => builder.append_from(j, col, i)?,
            None => {
                let meta = &builder.cols()[j];
                if !meta.common {
                    let zero = Value::zero(meta.data_type);
                    builder.append_value(j, &zero)?;
                }
            }
        }
    }
    Ok(())
}

/// Appends `n` zero values to column `j`.
pub fn pad_column(builder: &mut BlockBuilder, j: usize, n: usize) -> Result<()> {
    let Some(meta) = builder.cols().get(j) else {
        return Ok(());
    };
    if meta.common {
        return Ok(());
    }
    let zero = Value::zero(meta.data_type);
    for _ in 0..n {
        builder.append_value(j, &zero)?;
    }
    Ok(())
}

pub fn append_rows(rows: &[usize], block: &Block, builder: &mut BlockBuilder, map: &ColMap) -> Result<()> {
    for &i in rows {
        append_row(i, block, builder, map)?;
    }
    Ok(())
}

pub fn append_block(block: &Block, builder: &mut BlockBuilder, map: &ColMap) -> Result<()> {
    for i in 0..block.nrows() {
        append_row(i, block, builder, map)?;
    }
    Ok(())
}
