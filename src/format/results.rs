use std::{collections::BTreeMap, io, path::Path};

use anyhow::Context;

/// The trailing, fixed part of the result CSV schema. Everything before
/// these columns is a matrix variable column (compound fields appear as
/// 'var.field').
pub const FIXED_COLUMNS: &[&str] =
    &["sample", "stage", "metric", "value", "stdout", "stderr", "failed"];

/// One measurement in long format: a single (cell, sample, stage, metric)
/// observation.
///
/// Numeric metrics populate `value`; the 'stdout'/'stderr' metrics populate
/// their own string columns instead. `failed` is shared by every row of the
/// same (cell, sample): one bad exit code anywhere in a sample's lifecycle
/// taints the whole sample.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleRow {
    /// Index of the cell this row belongs to, in plan order. Not part of
    /// the CSV schema; recomputed from the binding tuple on load.
    pub cell: usize,
    /// The matrix binding as (column, value) pairs, in column order.
    pub bindings: Vec<(String, String)>,
    pub sample: u64,
    pub stage: String,
    pub metric: String,
    pub value: Option<f64>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub failed: bool,
}

impl SampleRow {
    /// Look up the value of one matrix column.
    pub fn binding(&self, column: &str) -> Option<&str> {
        self.bindings
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| &**value)
    }

    /// The binding values alone, used as the cell identity key.
    pub fn binding_key(&self) -> Vec<String> {
        self.bindings.iter().map(|(_, value)| value.clone()).collect()
    }
}

/// The in-memory long-format result table. Rows are only ever appended; all
/// downstream processing works on filtered copies or grouped views.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultTable {
    columns: Vec<String>,
    rows: Vec<SampleRow>,
}

impl ResultTable {
    /// Create an empty table with the given matrix columns.
    pub fn new(columns: Vec<String>) -> ResultTable {
        ResultTable { columns, rows: vec![] }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[SampleRow] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push(&mut self, row: SampleRow) {
        debug_assert_eq!(
            self.columns.len(),
            row.bindings.len(),
            "row bindings must match the table's matrix columns",
        );
        self.rows.push(row);
    }

    /// A copy of this table containing only the rows that pass the
    /// predicate.
    pub fn filtered(
        &self,
        mut pred: impl FnMut(&SampleRow) -> bool,
    ) -> ResultTable {
        ResultTable {
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|r| pred(r)).cloned().collect(),
        }
    }

    /// Group rows by an arbitrary key function. The BTreeMap keeps the
    /// groups in sorted key order, which is what makes pivoted output
    /// deterministic.
    pub fn group_by<'a>(
        &'a self,
        key: impl Fn(&SampleRow) -> Vec<String>,
    ) -> BTreeMap<Vec<String>, Vec<&'a SampleRow>> {
        let mut groups: BTreeMap<Vec<String>, Vec<&'a SampleRow>> =
            BTreeMap::new();
        for row in self.rows.iter() {
            groups.entry(key(row)).or_default().push(row);
        }
        groups
    }

    /// Append every row of `other` to this table. The tables must agree on
    /// their matrix columns. Cell ids are recomputed across the merged rows
    /// so that rows with the same binding tuple land in the same cell.
    pub fn concat(&mut self, other: ResultTable) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.columns == other.columns,
            "cannot merge result tables with different matrix columns \
             ({:?} vs {:?})",
            self.columns,
            other.columns,
        );
        self.rows.extend(other.rows);
        self.recompute_cells();
        Ok(())
    }

    /// Reassign cell ids by binding tuple, numbering distinct tuples in
    /// order of first appearance.
    fn recompute_cells(&mut self) {
        let mut ids: BTreeMap<Vec<String>, usize> = BTreeMap::new();
        let mut next = 0;
        for row in self.rows.iter_mut() {
            let id = *ids.entry(row.binding_key()).or_insert_with(|| {
                let id = next;
                next += 1;
                id
            });
            row.cell = id;
        }
    }

    /// Write the table as CSV. Every sample row is written; filtering never
    /// applies to this representation.
    pub fn write_csv<W: io::Write>(&self, wtr: W) -> anyhow::Result<()> {
        let mut wtr = csv::Writer::from_writer(wtr);
        let mut header: Vec<&str> =
            self.columns.iter().map(|c| &**c).collect();
        header.extend(FIXED_COLUMNS);
        wtr.write_record(&header)?;
        for row in self.rows.iter() {
            let mut record: Vec<String> = row
                .bindings
                .iter()
                .map(|(_, value)| value.clone())
                .collect();
            record.push(row.sample.to_string());
            record.push(row.stage.clone());
            record.push(row.metric.clone());
            record.push(match row.value {
                None => String::new(),
                Some(v) => v.to_string(),
            });
            record.push(row.stdout.clone().unwrap_or_default());
            record.push(row.stderr.clone().unwrap_or_default());
            record.push(row.failed.to_string());
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Load a table previously written by `write_csv`.
    pub fn from_csv_path<P: AsRef<Path>>(
        path: P,
    ) -> anyhow::Result<ResultTable> {
        let path = path.as_ref();
        let rdr = std::fs::File::open(path).with_context(|| {
            format!("failed to open results from {}", path.display())
        })?;
        ResultTable::from_csv_reader(rdr)
            .with_context(|| format!("error loading {}", path.display()))
    }

    pub fn from_csv_reader<R: io::Read>(
        rdr: R,
    ) -> anyhow::Result<ResultTable> {
        let mut rdr = csv::Reader::from_reader(rdr);
        let headers = rdr.headers().context("missing CSV header")?.clone();
        let mut fixed = BTreeMap::new();
        let mut columns = vec![];
        for (i, name) in headers.iter().enumerate() {
            if FIXED_COLUMNS.contains(&name) {
                anyhow::ensure!(
                    fixed.insert(name.to_string(), i).is_none(),
                    "duplicate column '{}'",
                    name,
                );
            } else {
                columns.push((name.to_string(), i));
            }
        }
        for required in FIXED_COLUMNS {
            anyhow::ensure!(
                fixed.contains_key(*required),
                "result CSV is missing the '{}' column",
                required,
            );
        }
        let field = |record: &csv::StringRecord, name: &str| -> String {
            record.get(fixed[name]).unwrap_or("").to_string()
        };
        let mut table = ResultTable::new(
            columns.iter().map(|(name, _)| name.clone()).collect(),
        );
        for (line, result) in rdr.records().enumerate() {
            let record = result?;
            let bindings: Vec<(String, String)> = columns
                .iter()
                .map(|(name, i)| {
                    (name.clone(), record.get(*i).unwrap_or("").to_string())
                })
                .collect();
            let sample = field(&record, "sample")
                .parse::<u64>()
                .with_context(|| {
                    format!("record {}: invalid 'sample'", line + 1)
                })?;
            let rawvalue = field(&record, "value");
            let value = if rawvalue.is_empty() {
                None
            } else {
                Some(rawvalue.parse::<f64>().with_context(|| {
                    format!("record {}: invalid 'value'", line + 1)
                })?)
            };
            let failed = match &*field(&record, "failed") {
                "true" => true,
                "false" => false,
                unk => anyhow::bail!(
                    "record {}: invalid 'failed' value '{}'",
                    line + 1,
                    unk,
                ),
            };
            let optional = |s: String| if s.is_empty() { None } else { Some(s) };
            table.push(SampleRow {
                cell: 0,
                bindings,
                sample,
                stage: field(&record, "stage"),
                metric: field(&record, "metric"),
                value,
                stdout: optional(field(&record, "stdout")),
                stderr: optional(field(&record, "stderr")),
                failed,
            });
        }
        table.recompute_cells();
        Ok(table)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// Build a numeric row for tests. The bindings are given as
    /// 'column=value' strings.
    pub fn row(
        cell: usize,
        bindings: &[&str],
        sample: u64,
        stage: &str,
        metric: &str,
        value: f64,
    ) -> SampleRow {
        SampleRow {
            cell,
            bindings: bindings
                .iter()
                .map(|b| {
                    let (name, value) = b.split_once('=').unwrap();
                    (name.to_string(), value.to_string())
                })
                .collect(),
            sample,
            stage: stage.to_string(),
            metric: metric.to_string(),
            value: Some(value),
            stdout: None,
            stderr: None,
            failed: false,
        }
    }

    #[test]
    fn csv_round_trip() {
        let mut table =
            ResultTable::new(vec!["compiler".to_string(), "opt".to_string()]);
        table.push(row(0, &["compiler=gcc", "opt=2"], 0, "time", "time", 1.5));
        table.push(row(0, &["compiler=gcc", "opt=2"], 1, "time", "time", 1.25));
        let mut failing =
            row(1, &["compiler=clang", "opt=2"], 0, "time", "time", 0.5);
        failing.failed = true;
        table.push(failing);
        table.push(SampleRow {
            cell: 1,
            bindings: vec![
                ("compiler".to_string(), "clang".to_string()),
                ("opt".to_string(), "2".to_string()),
            ],
            sample: 0,
            stage: "stdout".to_string(),
            metric: "stdout".to_string(),
            value: None,
            stdout: Some("hello".to_string()),
            stderr: None,
            failed: true,
        });

        let mut buf = vec![];
        table.write_csv(&mut buf).unwrap();
        let got = ResultTable::from_csv_reader(&*buf).unwrap();
        assert_eq!(table, got);
    }

    #[test]
    fn float_values_survive_round_trip_exactly() {
        let mut table = ResultTable::new(vec![]);
        table.push(row(0, &[], 0, "time", "time", 0.1 + 0.2));
        table.push(row(0, &[], 1, "time", "time", 1.0e-9));
        let mut buf = vec![];
        table.write_csv(&mut buf).unwrap();
        let got = ResultTable::from_csv_reader(&*buf).unwrap();
        assert_eq!(table.rows()[0].value, got.rows()[0].value);
        assert_eq!(table.rows()[1].value, got.rows()[1].value);
    }

    #[test]
    fn concat_merges_cells_by_binding() {
        let mut a = ResultTable::new(vec!["v".to_string()]);
        a.push(row(0, &["v=x"], 0, "time", "time", 1.0));
        let mut b = ResultTable::new(vec!["v".to_string()]);
        b.push(row(0, &["v=x"], 1, "time", "time", 2.0));
        b.push(row(1, &["v=y"], 0, "time", "time", 3.0));
        a.concat(b).unwrap();
        assert_eq!(3, a.rows().len());
        assert_eq!(a.rows()[0].cell, a.rows()[1].cell);
        assert_ne!(a.rows()[0].cell, a.rows()[2].cell);

        let mismatched = ResultTable::new(vec!["other".to_string()]);
        assert!(a.concat(mismatched).is_err());
    }

    #[test]
    fn grouping_is_sorted_and_complete() {
        let mut table = ResultTable::new(vec!["v".to_string()]);
        table.push(row(0, &["v=b"], 0, "time", "time", 1.0));
        table.push(row(0, &["v=b"], 1, "time", "time", 2.0));
        table.push(row(1, &["v=a"], 0, "time", "time", 3.0));
        let groups = table.group_by(|r| r.binding_key());
        let keys: Vec<&Vec<String>> = groups.keys().collect();
        assert_eq!(vec!["a".to_string()], *keys[0]);
        assert_eq!(vec!["b".to_string()], *keys[1]);
        assert_eq!(2, groups[&vec!["b".to_string()]].len());
    }
}
