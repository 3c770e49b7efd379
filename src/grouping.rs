use std::cmp::Ordering;
use std::sync::Arc;

use serde_json::{Value as JsonValue, json};

use crate::error::{ReportError, Result};
use crate::expression::{EvalContext, Evaluator};
use crate::group_spec::{Filters, Grouping, SortDirection, Sorting};
use crate::rows::RowSet;
use crate::value::{Value, compare_typed};

pub(crate) fn group_debug_enabled() -> bool {
    static ENABLED: std::sync::OnceLock<bool> = std::sync::OnceLock::new();
    *ENABLED.get_or_init(|| {
        std::env::var("RDLFLOW_DEBUG_GROUPS")
            .ok()
            .map(|v| {
                let v = v.trim();
                v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes")
            })
            .unwrap_or(false)
    })
}

/// A contiguous run of rows sharing group keys, with its nested sub-groups.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupEntry {
    /// `None` for the implicit group of an ungrouped region.
    pub level: Option<usize>,
    pub sorted: bool,
    pub start_row: usize,
    /// Inclusive; `-1` for an empty rowset.
    pub end_row: isize,
    pub nested: Vec<GroupEntry>,
}

impl GroupEntry {
    fn open(level: Option<usize>, sorted: bool, start_row: usize) -> Self {
        Self {
            level,
            sorted,
            start_row,
            end_row: start_row as isize,
            nested: Vec::new(),
        }
    }

    pub fn row_range(&self) -> (usize, isize) {
        (self.start_row, self.end_row)
    }

    pub fn is_empty(&self) -> bool {
        self.end_row < self.start_row as isize
    }

    pub fn row_count(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.end_row as usize) + 1 - self.start_row
        }
    }

    /// Innermost entries in document order.
    pub fn leaves(&self) -> Vec<&GroupEntry> {
        if self.nested.is_empty() {
            return vec![self];
        }
        self.nested.iter().flat_map(GroupEntry::leaves).collect()
    }

    fn to_json(&self) -> JsonValue {
        json!({
            "level": self.level,
            "start": self.start_row,
            "end": self.end_row,
            "nested": self.nested.iter().map(GroupEntry::to_json).collect::<Vec<_>>(),
        })
    }
}

/// Group entries computed over a (possibly re-sorted) copy of a region's rows.
#[derive(Debug, Clone)]
pub struct GroupTree {
    pub rows: Arc<RowSet>,
    pub entries: Vec<GroupEntry>,
}

impl GroupTree {
    pub fn leaves(&self) -> Vec<&GroupEntry> {
        self.entries.iter().flat_map(GroupEntry::leaves).collect()
    }

    pub fn entry_count(&self) -> u64 {
        fn count(entry: &GroupEntry) -> u64 {
            1 + entry.nested.iter().map(count).sum::<u64>()
        }
        self.entries.iter().map(count).sum()
    }

    pub(crate) fn to_json(&self) -> JsonValue {
        json!({
            "rows": self.rows.len(),
            "entries": self.entries.iter().map(GroupEntry::to_json).collect::<Vec<_>>(),
        })
    }
}

/// Keeps the rows passing every filter set, renumbered.
pub fn filter_rows(
    rows: &RowSet,
    filters: &[&Filters],
    evaluator: &dyn Evaluator,
    ctx: &EvalContext<'_>,
) -> Result<RowSet> {
    if filters.iter().all(|f| f.is_empty()) {
        return Ok(rows.clone());
    }
    let mut kept = Vec::with_capacity(rows.len());
    for row in rows.rows() {
        let row_ctx = ctx.with_row(Some(row));
        let mut passes = true;
        for filter in filters {
            if !filter.passes(evaluator, &row_ctx)? {
                passes = false;
                break;
            }
        }
        if passes {
            kept.push(row);
        }
    }
    Ok(rows.with_rows(kept))
}

/// Stable sort of a copy of `rows` by the sort keys; rows are renumbered.
pub fn sort_rows(
    rows: &RowSet,
    sorting: &Sorting,
    evaluator: &dyn Evaluator,
    ctx: &EvalContext<'_>,
) -> Result<RowSet> {
    if sorting.is_empty() {
        return Ok(rows.with_rows(rows.rows()));
    }
    let keys = evaluate_keys(
        rows,
        sorting.sort_by.iter().map(|s| &s.expression),
        evaluator,
        ctx,
    )?;
    let mut order: Vec<usize> = (0..rows.len()).collect();
    let mut failure: Option<ReportError> = None;
    order.sort_by(|&a, &b| {
        if failure.is_some() {
            return Ordering::Equal;
        }
        for (position, sort_by) in sorting.sort_by.iter().enumerate() {
            let ordering = match compare_typed(
                sort_by.expression.expected(),
                &keys[a][position],
                &keys[b][position],
            ) {
                Ok(ordering) => ordering,
                Err(err) => {
                    failure = Some(err);
                    return Ordering::Equal;
                }
            };
            let ordering = match sort_by.direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
    if let Some(err) = failure {
        return Err(err);
    }
    Ok(rows.with_rows(order.into_iter().filter_map(|index| rows.row(index))))
}

fn evaluate_keys<'e>(
    rows: &RowSet,
    expressions: impl Iterator<Item = &'e crate::expression::Expression> + Clone,
    evaluator: &dyn Evaluator,
    ctx: &EvalContext<'_>,
) -> Result<Vec<Vec<Value>>> {
    rows.rows()
        .iter()
        .map(|row| {
            let row_ctx = ctx.with_row(Some(row));
            expressions
                .clone()
                .map(|expression| {
                    expression
                        .evaluate(evaluator, &row_ctx)
                        .map_err(|err| err.at("", Some(row.index())))
                })
                .collect::<Result<Vec<Value>>>()
        })
        .collect()
}

/// Sorts and partitions `rows` into nested group entries, one nesting level per
/// grouping, outer first.
pub fn build_group_tree(
    rows: &RowSet,
    levels: &[&Grouping],
    sorting: Option<&Sorting>,
    evaluator: &dyn Evaluator,
    ctx: &EvalContext<'_>,
) -> Result<GroupTree> {
    let sorted = sorting.is_some_and(|s| !s.is_empty());
    let rows = if sorted || !levels.is_empty() {
        match sorting {
            Some(sorting) => sort_rows(rows, sorting, evaluator, ctx)?,
            None => rows.with_rows(rows.rows()),
        }
    } else {
        rows.clone()
    };
    let rows = Arc::new(rows);

    if rows.is_empty() {
        let mut entry = GroupEntry::open(None, sorted, 0);
        entry.end_row = -1;
        return Ok(GroupTree {
            rows,
            entries: vec![entry],
        });
    }
    if levels.is_empty() {
        let mut entry = GroupEntry::open(None, sorted, 0);
        entry.end_row = rows.len() as isize - 1;
        return Ok(GroupTree {
            rows,
            entries: vec![entry],
        });
    }

    // Flattened key list with the level each key belongs to.
    let key_levels: Vec<usize> = levels
        .iter()
        .enumerate()
        .flat_map(|(level, grouping)| std::iter::repeat_n(level, grouping.group_expressions.len()))
        .collect();
    let expressions: Vec<_> = levels
        .iter()
        .flat_map(|grouping| grouping.group_expressions.iter())
        .collect();
    let keys = evaluate_keys(&rows, expressions.iter().copied(), evaluator, ctx)?;

    let mut roots = Vec::new();
    let mut open: Vec<GroupEntry> = Vec::with_capacity(levels.len());
    for index in 0..rows.len() {
        let break_level = if index == 0 {
            Some(0)
        } else {
            first_break(&keys[index - 1], &keys[index], &expressions, &key_levels)?
        };
        let Some(break_level) = break_level else {
            continue;
        };
        if index > 0 {
            close_to(&mut open, &mut roots, break_level, index as isize - 1);
        }
        for level in break_level..levels.len() {
            open.push(GroupEntry::open(Some(level), sorted, index));
        }
    }
    close_to(&mut open, &mut roots, 0, rows.len() as isize - 1);
    Ok(GroupTree {
        rows,
        entries: roots,
    })
}

fn first_break(
    previous: &[Value],
    current: &[Value],
    expressions: &[&crate::expression::Expression],
    key_levels: &[usize],
) -> Result<Option<usize>> {
    for (position, expression) in expressions.iter().enumerate() {
        let ordering = compare_typed(expression.expected(), &previous[position], &current[position])?;
        if ordering != Ordering::Equal {
            return Ok(Some(key_levels[position]));
        }
    }
    Ok(None)
}

/// Closes open entries at `level` and deeper, ending them at `end_row`.
fn close_to(open: &mut Vec<GroupEntry>, roots: &mut Vec<GroupEntry>, level: usize, end_row: isize) {
    while open.len() > level {
        let Some(mut entry) = open.pop() else {
            break;
        };
        entry.end_row = end_row;
        match open.last_mut() {
            Some(parent) => parent.nested.push(entry),
            None => roots.push(entry),
        }
    }
}
