/*!
This module turns a validated configuration into the ordered list of
benchmark cells that the runner executes.

A cell is one point of the variable matrix together with everything needed
to run it: the lifecycle command lists with all '{{...}}' placeholders
substituted, the resolved working directory, the environment delta and the
output log target. Expansion happens here, for the entire plan, before the
runner starts; a configuration that references an unknown variable anywhere
fails without running a single command.
*/

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::{
    format::config::{
        Benchmark, Bindings, Config, Metric, Scalar, Value,
    },
    template,
};

/// Where the combined stdout/stderr log of executed commands is written.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SaveTarget {
    File(PathBuf),
    Stdout,
    Stderr,
}

/// One measured stage of a cell. `name` is `None` for the implicit stage of
/// a bare `benchmark` command list; result rows then carry the metric name
/// in their stage column.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StagePlan {
    pub name: Option<String>,
    pub commands: Vec<String>,
}

/// One custom metric of a cell, with its command fully expanded.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CustomMetricPlan {
    pub name: String,
    pub command: String,
}

/// A fully resolved benchmark cell, numbered in plan order. The binding is
/// baked into the expanded commands and the flattened columns; nothing
/// about a cell changes once the plan is built.
#[derive(Clone, Debug)]
pub struct Cell {
    pub index: usize,
    /// The matrix binding flattened to result table columns, in column
    /// order.
    pub columns: Vec<(String, String)>,
    pub setup: Vec<String>,
    pub prepare: Vec<String>,
    pub stages: Vec<StagePlan>,
    pub conclude: Vec<String>,
    pub custom_metrics: Vec<CustomMetricPlan>,
    pub cleanup: Vec<String>,
    pub metrics: Vec<Metric>,
    pub samples: u64,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub save_output: Option<SaveTarget>,
}

impl Cell {
    /// A short 'var=value var=value' rendering of the binding, used in
    /// progress reporting and log delimiters.
    pub fn binding_summary(&self) -> String {
        if self.columns.is_empty() {
            return "-".to_string();
        }
        self.columns
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<String>>()
            .join(" ")
    }

    /// Every benchmark command of this cell, in execution order. Used by
    /// '--plan'.
    pub fn benchmark_commands(&self) -> Vec<&str> {
        self.stages
            .iter()
            .flat_map(|s| s.commands.iter().map(|c| &**c))
            .collect()
    }
}

/// The totally ordered execution plan for one configuration.
#[derive(Clone, Debug)]
pub struct Plan {
    pub cells: Vec<Cell>,
    /// The matrix columns shared by every cell, in declaration order.
    pub columns: Vec<String>,
    /// The plan's start timestamp, also bound as '{{datetime}}'.
    pub datetime: String,
}

impl Plan {
    /// Build the plan for the given configuration. Relative working
    /// directories and output paths are resolved against `launch_dir`.
    pub fn new(config: &Config, launch_dir: &Path) -> anyhow::Result<Plan> {
        Plan::with_datetime(config, launch_dir, timestamp())
    }

    fn with_datetime(
        config: &Config,
        launch_dir: &Path,
        datetime: String,
    ) -> anyhow::Result<Plan> {
        let mut points = matrix_points(config);
        points.retain(|point| {
            !config.exclude.iter().any(|entry| covers(entry, point))
        });
        for entry in config.include.iter() {
            // Rebuild the binding in matrix declaration order so that every
            // cell agrees on column order, whatever order the include entry
            // was written in.
            let mut point = Bindings::new();
            for name in config.matrix.keys() {
                point.insert(name.clone(), entry[name].clone());
            }
            points.push(point);
        }
        let mut cells = vec![];
        for (index, point) in points.into_iter().enumerate() {
            let cell =
                build_cell(config, index, point, &datetime, launch_dir)
                    .with_context(|| format!("cell {}", index))?;
            cells.push(cell);
        }
        Ok(Plan { cells, columns: config.matrix_columns(), datetime })
    }
}

/// The value of the reserved 'datetime' binding: the current local time as
/// ISO-8601, with '-' separators throughout so it is safe in file names.
pub fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H-%M-%S").to_string()
}

/// The Cartesian product of all matrix variables, in declaration order with
/// the last variable varying fastest. A configuration without a matrix has
/// exactly one (empty) point.
fn matrix_points(config: &Config) -> Vec<Bindings> {
    let vars: Vec<(&String, &Vec<Value>)> = config.matrix.iter().collect();
    let mut points = vec![];
    if vars.is_empty() {
        points.push(Bindings::new());
        return points;
    }
    let mut idx = vec![0usize; vars.len()];
    loop {
        let mut point = Bindings::new();
        for (k, (name, values)) in vars.iter().enumerate() {
            point.insert((*name).clone(), values[idx[k]].clone());
        }
        points.push(point);
        let mut k = vars.len();
        loop {
            if k == 0 {
                return points;
            }
            k -= 1;
            idx[k] += 1;
            if idx[k] < vars[k].1.len() {
                break;
            }
            idx[k] = 0;
        }
    }
}

/// Whether an exclude entry covers the given matrix point, i.e., the point
/// binds a superset of the entry.
fn covers(entry: &indexmap::IndexMap<String, Value>, point: &Bindings) -> bool {
    entry.iter().all(|(name, value)| point.get(name) == Some(value))
}

fn build_cell(
    config: &Config,
    index: usize,
    point: Bindings,
    datetime: &str,
    launch_dir: &Path,
) -> anyhow::Result<Cell> {
    let columns = flatten(&point);
    let mut bindings = point;
    bindings.insert(
        "datetime".to_string(),
        Value::Scalar(Scalar::Str(datetime.to_string())),
    );

    let expand_list = |cmds: &[String]| -> anyhow::Result<Vec<String>> {
        cmds.iter().map(|c| template::expand(c, &bindings)).collect()
    };
    let stages = match config.benchmark {
        Benchmark::Commands(ref cmds) if cmds.is_empty() => vec![],
        Benchmark::Commands(ref cmds) => {
            vec![StagePlan { name: None, commands: expand_list(cmds)? }]
        }
        Benchmark::Stages(ref stages) => {
            let mut out = vec![];
            for (name, cmds) in stages.iter() {
                out.push(StagePlan {
                    name: Some(name.clone()),
                    commands: expand_list(cmds)
                        .with_context(|| format!("stage '{}'", name))?,
                });
            }
            out
        }
    };
    let mut custom_metrics = vec![];
    for metric in config.custom_metrics.iter() {
        custom_metrics.push(CustomMetricPlan {
            name: metric.name.clone(),
            command: template::expand(&metric.command, &bindings)
                .with_context(|| {
                    format!("custom metric '{}'", metric.name)
                })?,
        });
    }
    let cwd = match config.cwd {
        None => launch_dir.to_path_buf(),
        Some(ref cwd) => {
            launch_dir.join(template::expand(cwd, &bindings).context("cwd")?)
        }
    };
    let mut env = vec![];
    for (name, value) in config.env.iter() {
        let value = template::expand(value, &bindings)
            .with_context(|| format!("env.{}", name))?;
        env.push((name.clone(), value));
    }
    let save_output = match config.save_output {
        None => None,
        Some(ref pattern) => {
            let target = template::expand(pattern, &bindings)
                .context("save-output")?;
            Some(match &*target {
                "STDOUT" => SaveTarget::Stdout,
                "STDERR" => SaveTarget::Stderr,
                path => SaveTarget::File(launch_dir.join(path)),
            })
        }
    };
    Ok(Cell {
        index,
        columns,
        setup: expand_list(&config.setup).context("setup")?,
        prepare: expand_list(&config.prepare).context("prepare")?,
        stages,
        conclude: expand_list(&config.conclude).context("conclude")?,
        custom_metrics,
        cleanup: expand_list(&config.cleanup).context("cleanup")?,
        metrics: config.metrics.clone(),
        samples: config.samples,
        cwd,
        env,
        save_output,
    })
}

/// Flatten a matrix point to result table columns: a scalar variable is one
/// 'var' column, a compound variable one 'var.field' column per field.
fn flatten(point: &Bindings) -> Vec<(String, String)> {
    let mut columns = vec![];
    for (name, value) in point.iter() {
        match *value {
            Value::Scalar(ref scalar) => {
                columns.push((name.clone(), scalar.to_string()));
            }
            Value::Record(ref record) => {
                for (field, scalar) in record.iter() {
                    columns.push((
                        format!("{}.{}", name, field),
                        scalar.to_string(),
                    ));
                }
            }
        }
    }
    columns
}
