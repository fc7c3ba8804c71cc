/*!
The output driver: takes the post-processed result table and renders one or
more files per configured results block.

A block's `filename` may reference matrix variables. When it does, the
table is partitioned by the values of those variables and one file is
written per partition, each containing only that partition's rows. Existing
files are renamed out of the way unless the block sets `overwrite: true`.

The `csv` format always receives the raw, unfiltered rows; failure and
outlier filtering only shape the aggregated `md`/`table` views.
*/

use std::{
    collections::BTreeMap,
    io::Write,
    path::{Path, PathBuf},
};

use {anyhow::Context, unicode_width::UnicodeWidthStr};

use crate::{
    format::{
        config::{Bindings, Config, ResultsBlock, Scalar, Value},
        results::ResultTable,
    },
    stats::Stat,
    template, util,
};

/// Render every results block of the configuration. When the configuration
/// has no results section, an implied `table` block prints the summary to
/// stdout, so a bare run always shows something.
pub fn render(
    config: &Config,
    datetime: &str,
    raw: &ResultTable,
    filtered: &ResultTable,
    launch_dir: &Path,
) -> anyhow::Result<()> {
    if config.results.is_empty() {
        let block = ResultsBlock::Table {
            filename: None,
            overwrite: false,
            stats: vec![Stat::Mean, Stat::Std],
            pivot: "{{stage}} {{metric}}".to_string(),
        };
        return render_block(&block, datetime, raw, filtered, launch_dir)
            .context("summary");
    }
    for (name, block) in config.results.iter() {
        render_block(block, datetime, raw, filtered, launch_dir)
            .with_context(|| format!("results.{}", name))?;
    }
    Ok(())
}

fn render_block(
    block: &ResultsBlock,
    datetime: &str,
    raw: &ResultTable,
    filtered: &ResultTable,
    launch_dir: &Path,
) -> anyhow::Result<()> {
    // The raw rows back the csv format; everything else renders the
    // filtered view.
    let source = match *block {
        ResultsBlock::Csv { .. } => raw,
        _ => filtered,
    };
    let filename = match block.filename() {
        None => {
            // Only the table format permits a missing filename; it renders
            // to stdout, unpartitioned.
            let pivot = build_pivot(source, block)?;
            return render_table(&pivot, std::io::stdout())
                .context("failed to write table to stdout");
        }
        Some(filename) => filename,
    };
    for (path, part) in partitions(source, filename, datetime, launch_dir)? {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create {}", parent.display())
                })?;
            }
        }
        if !overwrite(block) {
            backup_existing(&path)?;
        }
        let file = std::fs::File::create(&path).with_context(|| {
            format!("failed to create {}", path.display())
        })?;
        match *block {
            ResultsBlock::Csv { .. } => part.write_csv(file)?,
            ResultsBlock::Markdown { .. } => {
                render_markdown(&build_pivot(&part, block)?, file)?
            }
            ResultsBlock::Table { .. } => {
                render_table(&build_pivot(&part, block)?, file)?
            }
        }
        log::info!("wrote {}", path.display());
    }
    Ok(())
}

fn overwrite(block: &ResultsBlock) -> bool {
    match *block {
        ResultsBlock::Csv { overwrite, .. } => overwrite,
        ResultsBlock::Markdown { overwrite, .. } => overwrite,
        ResultsBlock::Table { overwrite, .. } => overwrite,
    }
}

/// Split the table into one sub-table per combination of the matrix
/// variables referenced by the filename pattern, and expand the pattern
/// into a concrete path for each. A pattern without variable references
/// yields a single partition holding the whole table.
fn partitions(
    table: &ResultTable,
    filename: &str,
    datetime: &str,
    launch_dir: &Path,
) -> anyhow::Result<Vec<(PathBuf, ResultTable)>> {
    let refs: Vec<template::VarRef> = template::variable_refs(filename)
        .into_iter()
        .filter(|r| r.name != "datetime")
        .collect();
    let columns: Vec<String> = refs.iter().map(|r| r.column()).collect();
    for column in columns.iter() {
        anyhow::ensure!(
            table.columns().contains(column),
            "filename references '{}', which is not a result table column",
            column,
        );
    }
    if columns.is_empty() {
        // No variable references: a single file holding the whole table,
        // even when it has no rows.
        let mut bindings = Bindings::new();
        bindings.insert(
            "datetime".to_string(),
            Value::Scalar(Scalar::Str(datetime.to_string())),
        );
        let path = launch_dir
            .join(template::expand(filename, &bindings).context("filename")?);
        return Ok(vec![(path, table.clone())]);
    }
    let groups = table.group_by(|row| {
        columns
            .iter()
            .map(|c| row.binding(c).unwrap_or("").to_string())
            .collect()
    });
    let mut out = vec![];
    for (key, rows) in groups {
        let mut bindings = Bindings::new();
        bindings.insert(
            "datetime".to_string(),
            Value::Scalar(Scalar::Str(datetime.to_string())),
        );
        for (vref, value) in refs.iter().zip(key.iter()) {
            let scalar = Scalar::Str(value.clone());
            match vref.field {
                None => {
                    bindings.insert(
                        vref.name.clone(),
                        Value::Scalar(scalar),
                    );
                }
                Some(ref field) => {
                    let entry = bindings
                        .entry(vref.name.clone())
                        .or_insert_with(|| Value::Record(Default::default()));
                    if let Value::Record(ref mut record) = *entry {
                        record.insert(field.clone(), scalar);
                    }
                }
            }
        }
        let path = launch_dir
            .join(template::expand(filename, &bindings).context("filename")?);
        let mut part = ResultTable::new(table.columns().to_vec());
        for row in rows {
            part.push(row.clone());
        }
        out.push((path, part));
    }
    Ok(out)
}

/// Rename an existing file to the first free '<name>.<n>' so a new file can
/// take its place.
fn backup_existing(path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        return Ok(());
    }
    for n in 1u64.. {
        let backup = PathBuf::from(format!("{}.{}", path.display(), n));
        if backup.exists() {
            continue;
        }
        std::fs::rename(path, &backup).with_context(|| {
            format!(
                "failed to rename existing {} to {}",
                path.display(),
                backup.display(),
            )
        })?;
        log::info!(
            "renamed existing {} to {}",
            path.display(),
            backup.display(),
        );
        return Ok(());
    }
    unreachable!("ran out of backup suffixes")
}

/// The wide-format view rendered by the md and table formats: one row per
/// matrix binding, one column per (stage, metric, statistic).
#[derive(Clone, Debug)]
struct Pivot {
    key_columns: Vec<String>,
    value_columns: Vec<String>,
    rows: Vec<(Vec<String>, Vec<Option<f64>>)>,
}

fn build_pivot(
    table: &ResultTable,
    block: &ResultsBlock,
) -> anyhow::Result<Pivot> {
    let (stats, pattern) = match *block {
        ResultsBlock::Csv { .. } => {
            unreachable!("csv blocks are rendered from raw rows")
        }
        ResultsBlock::Markdown { ref stats, ref pivot, .. } => (stats, pivot),
        ResultsBlock::Table { ref stats, ref pivot, .. } => (stats, pivot),
    };
    // Column names come from the block's pivot pattern. When several
    // statistics are requested and the pattern doesn't place them, the
    // statistic name is appended so columns stay distinguishable.
    let pattern = if stats.len() > 1
        && !template::variable_refs(pattern).iter().any(|r| r.name == "stat")
    {
        format!("{} {{{{stat}}}}", pattern)
    } else {
        pattern.clone()
    };

    // The (stage, metric) pairs with numeric data, in first-appearance
    // order, i.e., configuration order.
    let mut pairs: Vec<(String, String)> = vec![];
    for row in table.rows() {
        if row.value.is_none() {
            continue;
        }
        let pair = (row.stage.clone(), row.metric.clone());
        if !pairs.contains(&pair) {
            pairs.push(pair);
        }
    }

    // Group numeric values by binding key, then by pair.
    type PairValues = BTreeMap<(String, String), Vec<f64>>;
    let mut groups: BTreeMap<Vec<String>, PairValues> = BTreeMap::new();
    for row in table.rows() {
        let value = match row.value {
            None => continue,
            Some(value) => value,
        };
        groups
            .entry(row.binding_key())
            .or_default()
            .entry((row.stage.clone(), row.metric.clone()))
            .or_default()
            .push(value);
    }

    let mut value_columns = vec![];
    for &(ref stage, ref metric) in pairs.iter() {
        for stat in stats.iter() {
            let mut bindings = Bindings::new();
            bindings.insert(
                "stage".to_string(),
                Value::Scalar(Scalar::Str(stage.clone())),
            );
            bindings.insert(
                "metric".to_string(),
                Value::Scalar(Scalar::Str(metric.clone())),
            );
            bindings.insert(
                "stat".to_string(),
                Value::Scalar(Scalar::Str(stat.to_string())),
            );
            value_columns.push(
                template::expand(&pattern, &bindings).context("pivot")?,
            );
        }
    }

    // The 'relative' statistic needs the peers: the smallest group mean per
    // pair is the denominator for every group's ratio.
    let mut min_means: BTreeMap<(String, String), f64> = BTreeMap::new();
    if stats.contains(&Stat::Relative) {
        for pair_values in groups.values() {
            for (pair, values) in pair_values.iter() {
                if let Some(mean) = crate::stats::mean(values) {
                    min_means
                        .entry(pair.clone())
                        .and_modify(|m| *m = m.min(mean))
                        .or_insert(mean);
                }
            }
        }
    }

    let mut rows = vec![];
    for (key, pair_values) in groups {
        let mut cells = vec![];
        for pair in pairs.iter() {
            let values = pair_values.get(pair).map(|v| &**v).unwrap_or(&[]);
            for stat in stats.iter() {
                let aggregated = stat.aggregate(values);
                let cell = match *stat {
                    Stat::Relative => {
                        aggregated.and_then(|mean| {
                            let min = *min_means.get(pair)?;
                            if min > 0.0 {
                                Some(mean / min)
                            } else {
                                None
                            }
                        })
                    }
                    _ => aggregated,
                };
                cells.push(cell);
            }
        }
        rows.push((key, cells));
    }
    Ok(Pivot {
        key_columns: table.columns().to_vec(),
        value_columns,
        rows,
    })
}

/// Render the pivot as a Markdown table, with cells padded so the source
/// stays readable too.
fn render_markdown<W: Write>(pivot: &Pivot, mut wtr: W) -> anyhow::Result<()> {
    let headers: Vec<&str> = pivot
        .key_columns
        .iter()
        .chain(pivot.value_columns.iter())
        .map(|c| &**c)
        .collect();
    let mut rows: Vec<Vec<String>> = vec![];
    for (key, cells) in pivot.rows.iter() {
        let mut row = key.clone();
        for cell in cells {
            row.push(match *cell {
                None => String::new(),
                Some(v) => util::format_value(v),
            });
        }
        rows.push(row);
    }
    let mut widths: Vec<usize> =
        headers.iter().map(|h| h.width()).collect();
    for row in rows.iter() {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.width());
        }
    }
    let write_row = |wtr: &mut W, cells: &[String]| -> anyhow::Result<()> {
        write!(wtr, "|")?;
        for (i, cell) in cells.iter().enumerate() {
            write!(wtr, " {}{} |", cell, " ".repeat(widths[i] - cell.width()))?;
        }
        writeln!(wtr, "")?;
        Ok(())
    };
    write_row(
        &mut wtr,
        &headers.iter().map(|h| h.to_string()).collect::<Vec<String>>(),
    )?;
    write!(wtr, "|")?;
    for width in widths.iter() {
        write!(wtr, " {} |", "-".repeat(*width))?;
    }
    writeln!(wtr, "")?;
    for row in rows.iter() {
        write_row(&mut wtr, row)?;
    }
    Ok(())
}

/// Render the pivot as an aligned plain text table via elastic tabstops.
fn render_table<W: Write>(pivot: &Pivot, wtr: W) -> anyhow::Result<()> {
    let mut wtr = tabwriter::TabWriter::new(wtr);
    let headers: Vec<&str> = pivot
        .key_columns
        .iter()
        .chain(pivot.value_columns.iter())
        .map(|c| &**c)
        .collect();
    writeln!(wtr, "{}", headers.join("\t"))?;
    for (i, header) in headers.iter().enumerate() {
        if i > 0 {
            write!(wtr, "\t")?;
        }
        util::write_divider(&mut wtr, '-', header.width())?;
    }
    writeln!(wtr, "")?;
    for (key, cells) in pivot.rows.iter() {
        let mut row = key.clone();
        for cell in cells {
            row.push(match *cell {
                None => "-".to_string(),
                Some(v) => util::format_value(v),
            });
        }
        writeln!(wtr, "{}", row.join("\t"))?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::format::results::tests::row;

    use super::*;

    fn sample_table() -> ResultTable {
        let mut table = ResultTable::new(vec!["v".to_string()]);
        for (sample, value) in [1.0, 2.0, 3.0].iter().enumerate() {
            table.push(row(0, &["v=a"], sample as u64, "time", "time", *value));
        }
        for (sample, value) in [4.0, 5.0, 6.0].iter().enumerate() {
            table.push(row(1, &["v=b"], sample as u64, "time", "time", *value));
        }
        table
    }

    fn block(stats: &[Stat]) -> ResultsBlock {
        ResultsBlock::Table {
            filename: None,
            overwrite: false,
            stats: stats.to_vec(),
            pivot: "{{stage}} {{metric}}".to_string(),
        }
    }

    #[test]
    fn pivot_aggregates_per_binding() {
        let pivot =
            build_pivot(&sample_table(), &block(&[Stat::Mean])).unwrap();
        assert_eq!(vec!["v".to_string()], pivot.key_columns);
        assert_eq!(vec!["time time".to_string()], pivot.value_columns);
        assert_eq!(2, pivot.rows.len());
        assert_eq!(
            (vec!["a".to_string()], vec![Some(2.0)]),
            pivot.rows[0],
        );
        assert_eq!(
            (vec!["b".to_string()], vec![Some(5.0)]),
            pivot.rows[1],
        );
    }

    #[test]
    fn stat_name_appended_when_needed() {
        let pivot =
            build_pivot(&sample_table(), &block(&[Stat::Min, Stat::Max]))
                .unwrap();
        assert_eq!(
            vec!["time time min".to_string(), "time time max".to_string()],
            pivot.value_columns,
        );
        assert_eq!(
            vec![Some(1.0), Some(3.0)],
            pivot.rows[0].1,
        );
    }

    #[test]
    fn relative_is_against_the_best_group() {
        let pivot =
            build_pivot(&sample_table(), &block(&[Stat::Relative])).unwrap();
        assert_eq!(vec![Some(1.0)], pivot.rows[0].1);
        assert_eq!(vec![Some(2.5)], pivot.rows[1].1);
    }

    #[test]
    fn markdown_rendering() {
        let pivot =
            build_pivot(&sample_table(), &block(&[Stat::Mean])).unwrap();
        let mut buf = vec![];
        render_markdown(&pivot, &mut buf).unwrap();
        let got = String::from_utf8(buf).unwrap();
        assert_eq!(
            "\
| v | time time |
| - | --------- |
| a | 2         |
| b | 5         |
",
            got,
        );
    }

    #[test]
    fn filename_partitioning_writes_one_file_per_value() {
        let tmp = tempfile::tempdir().unwrap();
        let parts = partitions(
            &sample_table(),
            "out-{{v}}.csv",
            "2024",
            tmp.path(),
        )
        .unwrap();
        assert_eq!(2, parts.len());
        assert_eq!(tmp.path().join("out-a.csv"), parts[0].0);
        assert!(parts[0].1.rows().iter().all(|r| r.binding("v") == Some("a")));
        assert_eq!(3, parts[1].1.rows().len());
    }

    #[test]
    fn unpartitioned_filename_keeps_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let parts = partitions(
            &sample_table(),
            "all-{{datetime}}.csv",
            "2024",
            tmp.path(),
        )
        .unwrap();
        assert_eq!(1, parts.len());
        assert_eq!(tmp.path().join("all-2024.csv"), parts[0].0);
        assert_eq!(6, parts[0].1.rows().len());
    }

    #[test]
    fn unknown_partition_column_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = partitions(&sample_table(), "{{w}}.csv", "2024", tmp.path())
            .unwrap_err();
        assert!(format!("{:#}", err).contains("'w'"), "{:#}", err);
    }

    #[test]
    fn existing_files_are_backed_up() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out.csv");
        std::fs::write(&path, "old").unwrap();
        backup_existing(&path).unwrap();
        assert!(!path.exists());
        assert_eq!(
            "old",
            std::fs::read_to_string(tmp.path().join("out.csv.1")).unwrap(),
        );
        // A second backup picks the next free suffix.
        std::fs::write(&path, "newer").unwrap();
        backup_existing(&path).unwrap();
        assert_eq!(
            "newer",
            std::fs::read_to_string(tmp.path().join("out.csv.2")).unwrap(),
        );
    }
}
