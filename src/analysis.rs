/*!
Post-processing of the result table before it reaches the renderers.

Two passes: samples that failed are dropped, and then, within every
(binding, stage, metric) group, values whose modified Z-score exceeds 3.5
are dropped as outliers. Both passes can be disabled from the command line.
Neither pass ever touches the raw CSV output, which always keeps every
sample.
*/

use std::collections::BTreeMap;

use crate::{format::results::ResultTable, stats};

/// Modified Z-scores beyond this magnitude mark a value as an outlier.
const OUTLIER_THRESHOLD: f64 = 3.5;

/// Which of the default filters the caller disabled.
#[derive(Clone, Copy, Debug, Default)]
pub struct Filtering {
    pub include_failed: bool,
    pub include_outliers: bool,
}

/// Apply failure and outlier filtering to the table, honoring the given
/// overrides.
pub fn filtered(table: &ResultTable, filtering: Filtering) -> ResultTable {
    let table = if filtering.include_failed {
        table.clone()
    } else {
        table.filtered(|row| !row.failed)
    };
    if filtering.include_outliers {
        return table;
    }
    drop_outliers(&table)
}

/// Drop rows flagged as outliers by the modified Z-score within their
/// (binding, stage, metric) group. Rows without a numeric value (the
/// stdout/stderr metrics) are never outliers.
fn drop_outliers(table: &ResultTable) -> ResultTable {
    type GroupKey = (Vec<String>, String, String);
    let mut groups: BTreeMap<GroupKey, Vec<(usize, f64)>> = BTreeMap::new();
    for (i, row) in table.rows().iter().enumerate() {
        if let Some(value) = row.value {
            let key =
                (row.binding_key(), row.stage.clone(), row.metric.clone());
            groups.entry(key).or_default().push((i, value));
        }
    }
    let mut drop = vec![false; table.rows().len()];
    for members in groups.values() {
        let values: Vec<f64> = members.iter().map(|&(_, v)| v).collect();
        let zscores = stats::modified_zscores(&values);
        for (&(i, _), z) in members.iter().zip(zscores.iter()) {
            if z.abs() > OUTLIER_THRESHOLD {
                drop[i] = true;
            }
        }
    }
    let mut i = 0;
    table.filtered(|_| {
        let keep = !drop[i];
        i += 1;
        keep
    })
}
