use std::path::{Path, PathBuf};

use {anyhow::Context, indexmap::IndexMap};

use crate::{stats::Stat, template};

/// A single scalar value of a matrix variable.
///
/// The order of the variants matters: serde tries them in order, so a YAML
/// `true` becomes a bool and a YAML `1` becomes an integer rather than both
/// decaying to strings. Quoted values always stay strings.
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            Scalar::Bool(x) => write!(f, "{}", x),
            Scalar::Int(x) => write!(f, "{}", x),
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::Str(ref x) => write!(f, "{}", x),
        }
    }
}

/// The value of one matrix variable: either a scalar or a compound record of
/// named scalar fields (referenced in templates as '{{var.field}}').
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(untagged)]
pub enum Value {
    Scalar(Scalar),
    Record(IndexMap<String, Scalar>),
}

/// An ordered map from variable name to its bound value. This is what the
/// template expander resolves placeholders against.
pub type Bindings = IndexMap<String, Value>;

/// The built-in measurements that can be collected for a measured stage.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Metric {
    /// Wall-clock duration in seconds.
    Time,
    /// Child user CPU time in seconds.
    Utime,
    /// Child system CPU time in seconds.
    Stime,
    /// Peak resident set size of the child, in MiB.
    Rss,
    /// Captured standard output, trailing newline stripped.
    Stdout,
    /// Captured standard error, trailing newline stripped.
    Stderr,
}

impl Metric {
    pub const ALL: &'static [Metric] = &[
        Metric::Time,
        Metric::Utime,
        Metric::Stime,
        Metric::Rss,
        Metric::Stdout,
        Metric::Stderr,
    ];

    pub fn name(&self) -> &'static str {
        match *self {
            Metric::Time => "time",
            Metric::Utime => "utime",
            Metric::Stime => "stime",
            Metric::Rss => "rss",
            Metric::Stdout => "stdout",
            Metric::Stderr => "stderr",
        }
    }

    /// Whether this metric lands in the numeric 'value' column (as opposed to
    /// the string 'stdout'/'stderr' columns).
    pub fn is_numeric(&self) -> bool {
        !matches!(*self, Metric::Stdout | Metric::Stderr)
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Metric {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Metric> {
        for &metric in Metric::ALL {
            if s == metric.name() {
                return Ok(metric);
            }
        }
        anyhow::bail!(
            "unrecognized metric '{}', must be one of \
             time, utime, stime, rss, stdout or stderr.",
            s,
        )
    }
}

/// The measured middle of the lifecycle: either a bare command list (one
/// implicit stage whose result rows use the metric name as their stage) or a
/// mapping of explicitly named stages.
#[derive(Clone, Debug, PartialEq)]
pub enum Benchmark {
    Commands(Vec<String>),
    Stages(IndexMap<String, Vec<String>>),
}

impl Benchmark {
    pub fn is_empty(&self) -> bool {
        match *self {
            Benchmark::Commands(ref cmds) => cmds.is_empty(),
            Benchmark::Stages(ref stages) => stages.is_empty(),
        }
    }

    pub fn has_explicit_stages(&self) -> bool {
        matches!(*self, Benchmark::Stages(_))
    }
}

/// One user defined metric: a command whose stdout is parsed into one or
/// more numeric result rows.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CustomMetric {
    pub name: String,
    pub command: String,
}

/// The 'system' section: knobs that reduce system variance for the duration
/// of the plan. All of them require an appropriately privileged process.
#[derive(
    Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize,
)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct System {
    #[serde(default)]
    pub isolate_cpus: Vec<u32>,
    #[serde(default)]
    pub disable_aslr: bool,
    #[serde(default)]
    pub disable_smt: bool,
    #[serde(default)]
    pub disable_core_boost: bool,
    #[serde(default)]
    pub governor_performance: bool,
}

impl System {
    pub fn is_noop(&self) -> bool {
        self.isolate_cpus.is_empty()
            && !self.disable_aslr
            && !self.disable_smt
            && !self.disable_core_boost
            && !self.governor_performance
    }
}

/// One output block from the 'results' section, tagged by its format.
#[derive(Clone, Debug)]
pub enum ResultsBlock {
    /// The raw sample rows. Never filtered, regardless of CLI flags.
    Csv { filename: String, overwrite: bool },
    /// A Markdown pivot table of aggregated values.
    Markdown {
        filename: String,
        overwrite: bool,
        stats: Vec<Stat>,
        pivot: String,
    },
    /// The same pivot as an aligned plain text table. Without a filename it
    /// renders to stdout.
    Table {
        filename: Option<String>,
        overwrite: bool,
        stats: Vec<Stat>,
        pivot: String,
    },
}

impl ResultsBlock {
    pub fn filename(&self) -> Option<&str> {
        match *self {
            ResultsBlock::Csv { ref filename, .. } => Some(filename),
            ResultsBlock::Markdown { ref filename, .. } => Some(filename),
            ResultsBlock::Table { ref filename, .. } => filename.as_deref(),
        }
    }
}

/// A fully validated benchalot configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub matrix: IndexMap<String, Vec<Value>>,
    pub exclude: Vec<IndexMap<String, Value>>,
    pub include: Vec<IndexMap<String, Value>>,
    pub samples: u64,
    pub setup: Vec<String>,
    pub prepare: Vec<String>,
    pub benchmark: Benchmark,
    pub conclude: Vec<String>,
    pub custom_metrics: Vec<CustomMetric>,
    pub cleanup: Vec<String>,
    pub metrics: Vec<Metric>,
    pub cwd: Option<String>,
    pub env: IndexMap<String, String>,
    pub save_output: Option<String>,
    pub system: System,
    pub results: IndexMap<String, ResultsBlock>,
}

impl Config {
    /// Read and validate a configuration from the YAML file at the given
    /// path.
    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).with_context(|| {
            format!("failed to read configuration from {}", path.display())
        })?;
        Config::from_slice(&data)
            .with_context(|| format!("error in {}", path.display()))
    }

    /// Validate a configuration from raw YAML data.
    pub fn from_slice(data: &str) -> anyhow::Result<Config> {
        let wire: WireConfig = serde_yaml::from_str(data)
            .context("error decoding YAML configuration")?;
        wire.validate()
    }

    /// The result table columns contributed by the matrix, in declaration
    /// order. A scalar variable contributes its own name; a compound
    /// variable contributes one 'var.field' column per field.
    pub fn matrix_columns(&self) -> Vec<String> {
        let mut columns = vec![];
        for (name, values) in self.matrix.iter() {
            match values.first() {
                Some(Value::Record(record)) => {
                    for field in record.keys() {
                        columns.push(format!("{}.{}", name, field));
                    }
                }
                _ => columns.push(name.clone()),
            }
        }
        columns
    }
}

/// Write one partial configuration per value of the given matrix variable,
/// each containing only the matrix slice where the variable has that value.
/// Files land in `out_dir` as `<configbase>.part<N>.yml`. Returns the
/// written paths.
pub fn split<P: AsRef<Path>>(
    config_path: P,
    var: &str,
    out_dir: &Path,
) -> anyhow::Result<Vec<PathBuf>> {
    let config_path = config_path.as_ref();
    let data = std::fs::read_to_string(config_path).with_context(|| {
        format!("failed to read configuration from {}", config_path.display())
    })?;
    let wire: WireConfig = serde_yaml::from_str(&data)
        .context("error decoding YAML configuration")?;
    // Validate the whole configuration first so that we never split a config
    // that would fail to run.
    wire.clone()
        .validate()
        .with_context(|| format!("error in {}", config_path.display()))?;
    let values = match wire.matrix.get(var) {
        Some(values) => values.clone(),
        None => anyhow::bail!(
            "cannot split on '{}': not a declared matrix variable",
            var
        ),
    };
    let base = config_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("config");
    std::fs::create_dir_all(out_dir).with_context(|| {
        format!("failed to create output directory {}", out_dir.display())
    })?;
    let mut written = vec![];
    for (i, value) in values.iter().enumerate() {
        let mut part = wire.clone();
        part.matrix.insert(var.to_string(), vec![value.clone()]);
        // Drop include/exclude entries that name a different value of the
        // split variable. They could never apply to this slice.
        part.include.retain(|entry| match entry.get(var) {
            None => true,
            Some(v) => v == value,
        });
        part.exclude.retain(|entry| match entry.get(var) {
            None => true,
            Some(v) => v == value,
        });
        let path = out_dir.join(format!("{}.part{}.yml", base, i));
        let yaml = serde_yaml::to_string(&part)
            .context("failed to serialize partial configuration")?;
        std::fs::write(&path, yaml).with_context(|| {
            format!("failed to write {}", path.display())
        })?;
        written.push(path);
    }
    Ok(written)
}

/// A command list in the configuration may be written as a single string
/// (possibly multi-line) or as a list of strings.
#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
#[serde(untagged)]
enum WireCommands {
    One(String),
    Many(Vec<String>),
}

impl WireCommands {
    fn into_vec(self) -> Vec<String> {
        match self {
            WireCommands::One(cmd) => vec![cmd],
            WireCommands::Many(cmds) => cmds,
        }
    }
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
#[serde(untagged)]
enum WireBenchmark {
    Commands(WireCommands),
    Stages(IndexMap<String, WireCommands>),
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct WireResultsBlock {
    format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
    #[serde(default)]
    overwrite: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stats: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pivot: Option<String>,
}

/// The configuration exactly as it appears on disk. Unknown keys are
/// rejected by serde, which conveniently names the offending key in its
/// error message.
#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct WireConfig {
    #[serde(default)]
    matrix: IndexMap<String, Vec<Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    exclude: Vec<IndexMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    include: Vec<IndexMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    samples: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    setup: Option<WireCommands>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prepare: Option<WireCommands>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    benchmark: Option<WireBenchmark>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    conclude: Option<WireCommands>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    custom_metrics: Vec<IndexMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cleanup: Option<WireCommands>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metrics: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cwd: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    env: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    save_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    system: Option<System>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    results: IndexMap<String, WireResultsBlock>,
}

impl WireConfig {
    fn validate(self) -> anyhow::Result<Config> {
        let samples = self.samples.unwrap_or(1);
        anyhow::ensure!(
            samples >= 1,
            "'samples' must be a positive integer",
        );

        for (name, values) in self.matrix.iter() {
            validate_matrix_variable(name, values)?;
        }
        for (i, entry) in self.exclude.iter().enumerate() {
            anyhow::ensure!(
                !entry.is_empty(),
                "exclude[{}]: entry binds no variables",
                i,
            );
            for name in entry.keys() {
                anyhow::ensure!(
                    self.matrix.contains_key(name),
                    "exclude[{}]: unknown matrix variable '{}'",
                    i,
                    name,
                );
            }
        }
        for (i, entry) in self.include.iter().enumerate() {
            for name in entry.keys() {
                anyhow::ensure!(
                    self.matrix.contains_key(name),
                    "include[{}]: unknown matrix variable '{}'",
                    i,
                    name,
                );
            }
            for name in self.matrix.keys() {
                anyhow::ensure!(
                    entry.contains_key(name),
                    "include[{}]: must bind every matrix variable, \
                     but '{}' is missing",
                    i,
                    name,
                );
            }
        }

        let benchmark = match self.benchmark {
            None => Benchmark::Commands(vec![]),
            Some(WireBenchmark::Commands(cmds)) => {
                Benchmark::Commands(cmds.into_vec())
            }
            Some(WireBenchmark::Stages(stages)) => {
                let mut out = IndexMap::new();
                for (name, cmds) in stages {
                    anyhow::ensure!(
                        template::is_identifier(&name),
                        "benchmark.{}: stage names must be identifiers",
                        name,
                    );
                    anyhow::ensure!(
                        name.parse::<Metric>().is_err(),
                        "benchmark.{}: stage name collides with a \
                         built-in metric name",
                        name,
                    );
                    let cmds = cmds.into_vec();
                    anyhow::ensure!(
                        !cmds.is_empty(),
                        "benchmark.{}: stage has no commands",
                        name,
                    );
                    out.insert(name, cmds);
                }
                Benchmark::Stages(out)
            }
        };

        let mut custom_metrics = vec![];
        for (i, entry) in self.custom_metrics.into_iter().enumerate() {
            anyhow::ensure!(
                entry.len() == 1,
                "custom-metrics[{}]: each entry must be a single \
                 'name: command' mapping",
                i,
            );
            let (name, command) = entry.into_iter().next().unwrap();
            anyhow::ensure!(
                template::is_identifier(&name),
                "custom-metrics[{}]: metric name '{}' is not an identifier",
                i,
                name,
            );
            anyhow::ensure!(
                name.parse::<Metric>().is_err(),
                "custom-metrics[{}]: metric name '{}' collides with a \
                 built-in metric",
                i,
                name,
            );
            anyhow::ensure!(
                !custom_metrics
                    .iter()
                    .any(|m: &CustomMetric| m.name == name),
                "custom-metrics[{}]: duplicate metric name '{}'",
                i,
                name,
            );
            custom_metrics.push(CustomMetric { name, command });
        }
        anyhow::ensure!(
            !benchmark.is_empty() || !custom_metrics.is_empty(),
            "configuration must define at least one of \
             'benchmark' or 'custom-metrics'",
        );

        let metrics = match self.metrics {
            None => vec![Metric::Time],
            Some(names) => {
                anyhow::ensure!(
                    !names.is_empty(),
                    "'metrics' must not be empty",
                );
                let mut metrics: Vec<Metric> = vec![];
                for name in names.iter() {
                    let metric = name
                        .parse::<Metric>()
                        .with_context(|| format!("metrics: '{}'", name))?;
                    anyhow::ensure!(
                        !metrics.contains(&metric),
                        "metrics: duplicate metric '{}'",
                        name,
                    );
                    metrics.push(metric);
                }
                metrics
            }
        };
        if benchmark.has_explicit_stages() {
            anyhow::ensure!(
                metrics.iter().all(|m| m.is_numeric()),
                "the 'stdout' and 'stderr' metrics cannot be combined with \
                 named benchmark stages (those metrics collapse to a single \
                 string per command, not per stage)",
            );
        }

        let mut results = IndexMap::new();
        for (name, block) in self.results {
            let block = validate_results_block(block)
                .with_context(|| format!("results.{}", name))?;
            if let Some(filename) = block.filename() {
                for vref in template::variable_refs(filename) {
                    anyhow::ensure!(
                        vref.name == "datetime"
                            || self.matrix.contains_key(&vref.name),
                        "results.{}: filename references unknown \
                         variable '{}'",
                        name,
                        vref.name,
                    );
                }
            }
            results.insert(name, block);
        }

        Ok(Config {
            matrix: self.matrix,
            exclude: self.exclude,
            include: self.include,
            samples,
            setup: self.setup.map(WireCommands::into_vec).unwrap_or_default(),
            prepare: self
                .prepare
                .map(WireCommands::into_vec)
                .unwrap_or_default(),
            benchmark,
            conclude: self
                .conclude
                .map(WireCommands::into_vec)
                .unwrap_or_default(),
            custom_metrics,
            cleanup: self
                .cleanup
                .map(WireCommands::into_vec)
                .unwrap_or_default(),
            metrics,
            cwd: self.cwd,
            env: self.env,
            save_output: self.save_output,
            system: self.system.unwrap_or_default(),
            results,
        })
    }
}

fn validate_matrix_variable(
    name: &str,
    values: &[Value],
) -> anyhow::Result<()> {
    anyhow::ensure!(
        template::is_identifier(name),
        "matrix.{}: variable names must be identifiers",
        name,
    );
    anyhow::ensure!(
        name != "datetime",
        "matrix.datetime: 'datetime' is a reserved variable",
    );
    anyhow::ensure!(
        !values.is_empty(),
        "matrix.{}: variable has no values",
        name,
    );
    match values[0] {
        Value::Scalar(_) => {
            for value in values.iter() {
                anyhow::ensure!(
                    matches!(*value, Value::Scalar(_)),
                    "matrix.{}: mixes scalar and compound values",
                    name,
                );
            }
        }
        Value::Record(ref first) => {
            anyhow::ensure!(
                !first.is_empty(),
                "matrix.{}: compound values must have at least one field",
                name,
            );
            for field in first.keys() {
                anyhow::ensure!(
                    template::is_identifier(field),
                    "matrix.{}: field '{}' is not an identifier",
                    name,
                    field,
                );
            }
            let fields: std::collections::BTreeSet<&String> =
                first.keys().collect();
            for value in values.iter() {
                let record = match *value {
                    Value::Record(ref record) => record,
                    Value::Scalar(_) => anyhow::bail!(
                        "matrix.{}: mixes scalar and compound values",
                        name,
                    ),
                };
                let got: std::collections::BTreeSet<&String> =
                    record.keys().collect();
                anyhow::ensure!(
                    fields == got,
                    "matrix.{}: every compound value must have the same \
                     fields",
                    name,
                );
            }
        }
    }
    Ok(())
}

fn validate_results_block(
    block: WireResultsBlock,
) -> anyhow::Result<ResultsBlock> {
    let stats = match block.stats {
        None => vec![Stat::Mean, Stat::Std],
        Some(ref names) => {
            anyhow::ensure!(!names.is_empty(), "'stats' must not be empty");
            let mut stats = vec![];
            for name in names.iter() {
                stats.push(name.parse::<Stat>()?);
            }
            stats
        }
    };
    let pivot = block
        .pivot
        .clone()
        .unwrap_or_else(|| "{{stage}} {{metric}}".to_string());
    let require_filename = || match block.filename {
        Some(ref filename) => Ok(filename.clone()),
        None => Err(anyhow::anyhow!(
            "format '{}' requires a 'filename'",
            block.format,
        )),
    };
    let block = match &*block.format {
        "csv" => {
            anyhow::ensure!(
                block.stats.is_none() && block.pivot.is_none(),
                "'stats' and 'pivot' do not apply to format 'csv'",
            );
            ResultsBlock::Csv {
                filename: require_filename()?,
                overwrite: block.overwrite,
            }
        }
        "md" => ResultsBlock::Markdown {
            filename: require_filename()?,
            overwrite: block.overwrite,
            stats,
            pivot,
        },
        "table" => ResultsBlock::Table {
            filename: block.filename.clone(),
            overwrite: block.overwrite,
            stats,
            pivot,
        },
        unknown => anyhow::bail!(
            "unrecognized format '{}', must be one of csv, md or table.",
            unknown,
        ),
    };
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal() {
        let config = Config::from_slice("benchmark: [\"echo hi\"]").unwrap();
        assert_eq!(1, config.samples);
        assert_eq!(vec![Metric::Time], config.metrics);
        assert_eq!(
            Benchmark::Commands(vec!["echo hi".to_string()]),
            config.benchmark,
        );
        assert!(config.matrix.is_empty());
    }

    #[test]
    fn single_string_commands() {
        let raw = "
benchmark: |
  echo line1
  echo line2
";
        let config = Config::from_slice(raw).unwrap();
        let Benchmark::Commands(cmds) = config.benchmark else {
            panic!("expected implicit command list")
        };
        assert_eq!(1, cmds.len());
        assert!(cmds[0].contains("line1\necho line2"));
    }

    #[test]
    fn explicit_stages() {
        let raw = "
benchmark:
  build: [\"make\"]
  run: [\"./bin\", \"./bin --check\"]
metrics: [time, rss]
";
        let config = Config::from_slice(raw).unwrap();
        let Benchmark::Stages(stages) = config.benchmark else {
            panic!("expected stages")
        };
        assert_eq!(
            vec!["build", "run"],
            stages.keys().collect::<Vec<&String>>(),
        );
        assert_eq!(2, stages["run"].len());
    }

    #[test]
    fn matrix_shapes() {
        let raw = "
matrix:
  compiler: [gcc, clang]
  input:
    - {path: a.txt, size: 1}
    - {path: b.txt, size: 2}
benchmark: [\"{{compiler}} {{input.path}}\"]
";
        let config = Config::from_slice(raw).unwrap();
        assert_eq!(
            vec!["compiler", "input.path", "input.size"],
            config.matrix_columns(),
        );
    }

    #[test]
    fn ragged_records_rejected() {
        let raw = "
matrix:
  input:
    - {path: a.txt, size: 1}
    - {path: b.txt}
benchmark: [\"cat {{input.path}}\"]
";
        let err = Config::from_slice(raw).unwrap_err();
        assert!(format!("{:#}", err).contains("same"), "{:#}", err);
    }

    #[test]
    fn zero_samples_rejected() {
        let raw = "
samples: 0
benchmark: [\"true\"]
";
        let err = Config::from_slice(raw).unwrap_err();
        assert!(format!("{:#}", err).contains("positive"), "{:#}", err);
    }

    #[test]
    fn needs_benchmark_or_custom_metrics() {
        let err = Config::from_slice("samples: 3").unwrap_err();
        assert!(
            format!("{:#}", err).contains("at least one of"),
            "{:#}",
            err
        );
        let config = Config::from_slice(
            "custom-metrics: [{ops: \"cat ops.txt\"}]",
        )
        .unwrap();
        assert_eq!(1, config.custom_metrics.len());
        assert_eq!("ops", config.custom_metrics[0].name);
    }

    #[test]
    fn stage_stdout_conflict() {
        let raw = "
benchmark:
  build: [\"make\"]
metrics: [time, stdout]
";
        let err = Config::from_slice(raw).unwrap_err();
        assert!(format!("{:#}", err).contains("stdout"), "{:#}", err);
    }

    #[test]
    fn unknown_key_rejected() {
        let err = Config::from_slice("benchmrk: [\"true\"]").unwrap_err();
        assert!(format!("{:#}", err).contains("benchmrk"), "{:#}", err);
    }

    #[test]
    fn exclude_include_validation() {
        let raw = "
matrix:
  a: [1, 2]
  b: [x, y]
exclude:
  - {c: 1}
benchmark: [\"true\"]
";
        let err = Config::from_slice(raw).unwrap_err();
        assert!(format!("{:#}", err).contains("'c'"), "{:#}", err);

        let raw = "
matrix:
  a: [1, 2]
  b: [x, y]
include:
  - {a: 1}
benchmark: [\"true\"]
";
        let err = Config::from_slice(raw).unwrap_err();
        assert!(format!("{:#}", err).contains("'b' is missing"), "{:#}", err);
    }

    #[test]
    fn results_blocks() {
        let raw = "
matrix:
  a: [1, 2]
benchmark: [\"true\"]
results:
  raw:
    format: csv
    filename: out-{{a}}.csv
  summary:
    format: md
    filename: summary.md
    stats: [median, relative]
";
        let config = Config::from_slice(raw).unwrap();
        let ResultsBlock::Markdown { ref stats, .. } =
            config.results["summary"]
        else {
            panic!("expected markdown block")
        };
        assert_eq!(&[Stat::Median, Stat::Relative][..], &stats[..]);

        let raw = "
benchmark: [\"true\"]
results:
  plot:
    format: scatter
    filename: plot.png
";
        let err = Config::from_slice(raw).unwrap_err();
        assert!(format!("{:#}", err).contains("results.plot"), "{:#}", err);
    }

    #[test]
    fn split_slices_matrix() {
        let raw = "
matrix:
  compiler: [gcc, clang]
  opt: [0, 2]
exclude:
  - {compiler: clang, opt: 0}
benchmark: [\"{{compiler}} -O{{opt}}\"]
";
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("bench.yml");
        std::fs::write(&config_path, raw).unwrap();
        let out = tmp.path().join("out");
        let written = split(&config_path, "compiler", &out).unwrap();
        assert_eq!(2, written.len());
        assert_eq!(
            "bench.part0.yml",
            written[0].file_name().unwrap().to_str().unwrap(),
        );

        let part0 = Config::from_path(&written[0]).unwrap();
        assert_eq!(
            vec![Value::Scalar(Scalar::Str("gcc".to_string()))],
            part0.matrix["compiler"],
        );
        // The exclude entry names clang, so the gcc slice drops it.
        assert!(part0.exclude.is_empty());
        let part1 = Config::from_path(&written[1]).unwrap();
        assert_eq!(1, part1.exclude.len());
    }
}
