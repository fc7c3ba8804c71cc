/*!
The benchmark runner: executes the lifecycle state machine for every cell of
a plan and collects measurements into the result table.

The lifecycle of one cell is

    setup -> (prepare -> benchmark -> conclude -> custom-metrics) x samples
          -> cleanup

A non-zero exit anywhere marks the current sample as failed but never stops
the machine: the remaining commands of the list still run, and so do
`conclude` and `cleanup`, so that benchmarks which mutate their environment
always get a chance to undo it. Only a spawn-level failure (no shell, bad
working directory) in the first cell's `setup` or `cleanup` is treated as
fatal.

Exactly one benchmarked child process is alive at any time; the only
concurrency is the pair of reader threads draining the child's stdout and
stderr pipes. Reaping goes through `wait4(2)` so that the exit status and
the rusage (user/system time, peak RSS) come from the same syscall.
*/

use std::{
    io::{Read, Write},
    path::PathBuf,
    process::{Command, Stdio},
    sync::atomic::{AtomicBool, Ordering},
    time::Instant,
};

use {anyhow::Context, bstr::ByteSlice};

use crate::{
    args::Color,
    format::{
        config::Metric,
        results::{ResultTable, SampleRow},
    },
    plan::{Cell, Plan, SaveTarget, StagePlan},
    util,
};

/// Global stop flag used for supporting clean exits. Set from the SIGINT
/// handler; polled between commands.
static STOP_NOW: AtomicBool = AtomicBool::new(false);

/// Install the SIGINT handler. The runner finishes the command in flight,
/// runs the current cell's cleanup and then stops.
pub fn install_interrupt_handler() -> anyhow::Result<()> {
    ctrlc::set_handler(|| STOP_NOW.store(true, Ordering::SeqCst))
        .context("failed to install interrupt handler")
}

fn should_stop() -> bool {
    STOP_NOW.load(Ordering::SeqCst)
}

/// What happened during plan execution, for the end-of-run report.
#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    pub total_samples: u64,
    pub failed_samples: u64,
    /// Log files written via 'save-output', in the order they were opened.
    pub log_paths: Vec<PathBuf>,
    pub interrupted: bool,
}

/// Execute every cell of the plan in order and return the collected result
/// table.
pub fn execute(
    plan: &Plan,
    color: Color,
) -> anyhow::Result<(ResultTable, RunSummary)> {
    let mut table = ResultTable::new(plan.columns.clone());
    let mut summary = RunSummary::default();
    for cell in plan.cells.iter() {
        progress_cell(color, cell, plan.cells.len());
        run_cell(cell, &mut table, &mut summary, color)?;
        if summary.interrupted {
            log::warn!("interrupt received, stopping after cell cleanup");
            break;
        }
    }
    Ok((table, summary))
}

fn run_cell(
    cell: &Cell,
    table: &mut ResultTable,
    summary: &mut RunSummary,
    color: Color,
) -> anyhow::Result<()> {
    let mut log = OutputLog::open(cell, summary);
    // A failed setup taints every sample of the cell, but the samples (and
    // everything after them) still execute.
    let mut cell_failed = false;
    for cmd in cell.setup.iter() {
        match run_command(cmd, cell, "setup", &mut log) {
            Ok(out) => cell_failed |= !out.ok,
            Err(err) if cell.index == 0 => {
                return Err(err.context("setup of first cell failed"));
            }
            Err(err) => {
                log::warn!("cell {}: setup: {:#}", cell.index, err);
                cell_failed = true;
            }
        }
        if should_stop() {
            break;
        }
    }

    'samples: for sample in 0..cell.samples {
        if should_stop() {
            summary.interrupted = true;
            break;
        }
        let mut failed = cell_failed;
        let mut rows: Vec<SampleRow> = vec![];

        for cmd in cell.prepare.iter() {
            failed |= !run_lenient(cmd, cell, "prepare", &mut log).ok;
            if should_stop() {
                summary.interrupted = true;
                break 'samples;
            }
        }
        for stage in cell.stages.iter() {
            let unit = run_stage(stage, cell, &mut log);
            failed |= !unit.ok;
            for &metric in cell.metrics.iter() {
                rows.push(unit.row(cell, sample, metric));
            }
            if should_stop() {
                summary.interrupted = true;
                break 'samples;
            }
        }
        for cmd in cell.conclude.iter() {
            failed |= !run_lenient(cmd, cell, "conclude", &mut log).ok;
            if should_stop() {
                summary.interrupted = true;
                break 'samples;
            }
        }
        for metric in cell.custom_metrics.iter() {
            let out = run_lenient(&metric.command, cell, &metric.name, &mut log);
            failed |= !out.ok;
            match parse_custom_metric(&metric.name, &out.stdout) {
                Ok(parsed) => {
                    for (stage, value) in parsed {
                        rows.push(SampleRow {
                            cell: cell.index,
                            bindings: cell.columns.clone(),
                            sample,
                            stage,
                            metric: metric.name.clone(),
                            value: Some(value),
                            stdout: None,
                            stderr: None,
                            failed: false,
                        });
                    }
                }
                Err(err) => {
                    log::warn!(
                        "cell {}: custom metric '{}': {:#}",
                        cell.index,
                        metric.name,
                        err,
                    );
                    failed = true;
                }
            }
            if should_stop() {
                summary.interrupted = true;
                break 'samples;
            }
        }

        // The failed flag covers the whole sample, so it is applied after
        // the sample's lifecycle finished, not as rows are produced.
        for mut row in rows {
            row.failed = failed;
            table.push(row);
        }
        summary.total_samples += 1;
        if failed {
            summary.failed_samples += 1;
        }
        progress_sample(color, sample, cell.samples, failed);
    }

    for cmd in cell.cleanup.iter() {
        match run_command(cmd, cell, "cleanup", &mut log) {
            Ok(out) if !out.ok => {
                log::warn!(
                    "cell {}: cleanup command exited non-zero: {:?}",
                    cell.index,
                    cmd,
                );
            }
            Ok(_) => {}
            Err(err) if cell.index == 0 => {
                return Err(err.context("cleanup of first cell failed"));
            }
            Err(err) => {
                log::warn!("cell {}: cleanup: {:#}", cell.index, err);
            }
        }
    }
    Ok(())
}

/// The measurements collected around one shell command.
#[derive(Clone, Debug, Default)]
struct CommandMetrics {
    /// Whether the command exited with status 0.
    ok: bool,
    /// Wall-clock duration in seconds.
    wall: f64,
    /// Child user CPU time in seconds.
    utime: f64,
    /// Child system CPU time in seconds.
    stime: f64,
    /// Peak resident set size in MiB.
    max_rss_mib: f64,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

/// Run a command, folding spawn-level failures into an "everything failed"
/// result. Used everywhere the lifecycle must keep going.
fn run_lenient(
    command: &str,
    cell: &Cell,
    stage_label: &str,
    log: &mut OutputLog,
) -> CommandMetrics {
    match run_command(command, cell, stage_label, log) {
        Ok(out) => out,
        Err(err) => {
            log::warn!(
                "cell {}: {}: {:#}",
                cell.index,
                stage_label,
                err,
            );
            CommandMetrics::default()
        }
    }
}

/// Run one command via the shell, with the cell's working directory and
/// environment delta, capturing output and resource usage.
fn run_command(
    command: &str,
    cell: &Cell,
    stage_label: &str,
    log: &mut OutputLog,
) -> anyhow::Result<CommandMetrics> {
    log::debug!(
        "running command: \"/bin/sh\" \"-c\" {:?} in {}",
        command,
        cell.cwd.display(),
    );
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(command);
    cmd.current_dir(&cell.cwd);
    cmd.envs(cell.env.iter().map(|(name, value)| (name, value)));
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let start = Instant::now();
    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn shell for {:?}", command))?;
    // Drain both pipes on their own threads so a chatty child can't block
    // on a full pipe while we sit in wait4.
    let handle_stdout = {
        let mut stdout = child.stdout.take().unwrap();
        std::thread::spawn(move || -> anyhow::Result<Vec<u8>> {
            let mut buf = vec![];
            stdout.read_to_end(&mut buf).context("failed to read stdout")?;
            Ok(buf)
        })
    };
    let handle_stderr = {
        let mut stderr = child.stderr.take().unwrap();
        std::thread::spawn(move || -> anyhow::Result<Vec<u8>> {
            let mut buf = vec![];
            stderr.read_to_end(&mut buf).context("failed to read stderr")?;
            Ok(buf)
        })
    };
    let wait = wait_with_rusage(&child)?;
    let wall = start.elapsed().as_secs_f64();
    let stdout = handle_stdout.join().unwrap()?;
    let stderr = handle_stderr.join().unwrap()?;
    if !wait.ok {
        log::debug!(
            "command {:?} failed, last line of stderr: {:?}",
            command,
            stderr.lines().last().map(|l| l.as_bstr()),
        );
    }
    log.record(cell, stage_label, &stdout, &stderr);
    Ok(CommandMetrics {
        ok: wait.ok,
        wall,
        utime: wait.utime,
        stime: wait.stime,
        max_rss_mib: wait.max_rss_mib,
        stdout,
        stderr,
    })
}

#[derive(Clone, Copy, Debug)]
struct WaitStats {
    ok: bool,
    utime: f64,
    stime: f64,
    max_rss_mib: f64,
}

/// Reap the child with wait4(2) so the exit status and the rusage come from
/// the same wait.
fn wait_with_rusage(child: &std::process::Child) -> anyhow::Result<WaitStats> {
    let pid = child.id() as libc::pid_t;
    let mut status: libc::c_int = 0;
    // SAFETY: rusage is plain old data and wait4 fully initializes it when
    // it returns the child's pid.
    let mut rusage: libc::rusage = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::wait4(pid, &mut status, 0, &mut rusage) };
    if ret != pid {
        return Err(anyhow::Error::from(std::io::Error::last_os_error())
            .context("failed to wait for child"));
    }
    let ok = libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0;
    let seconds = |t: libc::timeval| {
        (t.tv_sec as f64) + (t.tv_usec as f64) / 1_000_000.0
    };
    Ok(WaitStats {
        ok,
        utime: seconds(rusage.ru_utime),
        stime: seconds(rusage.ru_stime),
        // ru_maxrss is in KiB on Linux.
        max_rss_mib: (rusage.ru_maxrss as f64) / 1024.0,
    })
}

/// The aggregate of one measured stage. A stage's command list is a single
/// measured unit: times are summed, peak RSS is the maximum across its
/// commands and output is concatenated.
#[derive(Clone, Debug, Default)]
struct StageUnit {
    name: Option<String>,
    ok: bool,
    time: f64,
    utime: f64,
    stime: f64,
    rss: f64,
    stdout: String,
    stderr: String,
}

impl StageUnit {
    /// Produce the result row of this unit for one built-in metric. The
    /// implicit stage takes the metric's name for its stage column.
    fn row(&self, cell: &Cell, sample: u64, metric: Metric) -> SampleRow {
        let stage = self
            .name
            .clone()
            .unwrap_or_else(|| metric.name().to_string());
        let value = match metric {
            Metric::Time => Some(self.time),
            Metric::Utime => Some(self.utime),
            Metric::Stime => Some(self.stime),
            Metric::Rss => Some(self.rss),
            Metric::Stdout | Metric::Stderr => None,
        };
        SampleRow {
            cell: cell.index,
            bindings: cell.columns.clone(),
            sample,
            stage,
            metric: metric.name().to_string(),
            value,
            stdout: match metric {
                Metric::Stdout => Some(self.stdout.clone()),
                _ => None,
            },
            stderr: match metric {
                Metric::Stderr => Some(self.stderr.clone()),
                _ => None,
            },
            failed: false,
        }
    }
}

fn run_stage(
    stage: &StagePlan,
    cell: &Cell,
    log: &mut OutputLog,
) -> StageUnit {
    let label = stage.name.as_deref().unwrap_or("benchmark");
    let mut unit = StageUnit {
        name: stage.name.clone(),
        ok: true,
        ..StageUnit::default()
    };
    let mut stdouts = vec![];
    let mut stderrs = vec![];
    for cmd in stage.commands.iter() {
        let out = run_lenient(cmd, cell, label, log);
        unit.ok &= out.ok;
        unit.time += out.wall;
        unit.utime += out.utime;
        unit.stime += out.stime;
        unit.rss = unit.rss.max(out.max_rss_mib);
        stdouts.push(strip_newline(&out.stdout));
        stderrs.push(strip_newline(&out.stderr));
        if should_stop() {
            break;
        }
    }
    unit.stdout = stdouts.join("\n");
    unit.stderr = stderrs.join("\n");
    unit
}

/// The captured output as a string, with a single trailing newline
/// stripped.
fn strip_newline(out: &[u8]) -> String {
    let s = out.to_str_lossy();
    match s.strip_suffix('\n') {
        Some(stripped) => stripped.to_string(),
        None => s.into_owned(),
    }
}

/// Parse the stdout of a custom metric command: either a single numeric
/// token, or a two-line CSV whose header line names the stages and whose
/// second line carries one numeric field per stage. Returns (stage, value)
/// pairs.
fn parse_custom_metric(
    name: &str,
    stdout: &[u8],
) -> anyhow::Result<Vec<(String, f64)>> {
    let text = stdout
        .to_str()
        .context("custom metric output is not valid UTF-8")?
        .trim();
    if let Ok(value) = text.parse::<f64>() {
        return Ok(vec![(name.to_string(), value)]);
    }
    let mut lines = text.lines();
    let (header, values) = match (lines.next(), lines.next(), lines.next()) {
        (Some(header), Some(values), None) => (header, values),
        _ => anyhow::bail!(
            "expected a single number or a two-line CSV, got {:?}",
            text,
        ),
    };
    let stages: Vec<&str> = header.split(',').map(|f| f.trim()).collect();
    let fields: Vec<&str> = values.split(',').map(|f| f.trim()).collect();
    anyhow::ensure!(
        stages.len() == fields.len(),
        "CSV header names {} stages but the value line has {} fields",
        stages.len(),
        fields.len(),
    );
    let mut parsed = vec![];
    for (stage, field) in stages.iter().zip(fields.iter()) {
        anyhow::ensure!(!stage.is_empty(), "empty stage name in CSV header");
        let value = field.parse::<f64>().with_context(|| {
            format!("stage '{}': invalid numeric value {:?}", stage, field)
        })?;
        parsed.push((stage.to_string(), value));
    }
    Ok(parsed)
}

/// The 'save-output' sink of one cell. Write failures are reported once as
/// warnings; a broken log never fails the run.
struct OutputLog {
    target: Option<LogTarget>,
}

enum LogTarget {
    File(std::fs::File),
    Stdout,
    Stderr,
}

impl OutputLog {
    /// Open the cell's log target. The log is optional, so a file that
    /// cannot be opened downgrades to a warning and the cell runs unlogged.
    fn open(cell: &Cell, summary: &mut RunSummary) -> OutputLog {
        let target = match cell.save_output {
            None => None,
            Some(SaveTarget::Stdout) => Some(LogTarget::Stdout),
            Some(SaveTarget::Stderr) => Some(LogTarget::Stderr),
            Some(SaveTarget::File(ref path)) => {
                let opened = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path);
                match opened {
                    Ok(file) => {
                        if !summary.log_paths.contains(path) {
                            summary.log_paths.push(path.clone());
                        }
                        Some(LogTarget::File(file))
                    }
                    Err(err) => {
                        log::warn!(
                            "failed to open output log {}: {}",
                            path.display(),
                            err,
                        );
                        None
                    }
                }
            }
        };
        OutputLog { target }
    }

    fn record(
        &mut self,
        cell: &Cell,
        stage_label: &str,
        stdout: &[u8],
        stderr: &[u8],
    ) {
        let result = match self.target {
            None => return,
            Some(LogTarget::File(ref mut file)) => {
                Self::write(file, cell, stage_label, stdout, stderr)
            }
            Some(LogTarget::Stdout) => Self::write(
                &mut std::io::stdout(),
                cell,
                stage_label,
                stdout,
                stderr,
            ),
            Some(LogTarget::Stderr) => Self::write(
                &mut std::io::stderr(),
                cell,
                stage_label,
                stdout,
                stderr,
            ),
        };
        if let Err(err) = result {
            log::warn!("failed to write output log: {:#}", err);
        }
    }

    fn write<W: Write>(
        mut wtr: W,
        cell: &Cell,
        stage_label: &str,
        stdout: &[u8],
        stderr: &[u8],
    ) -> std::io::Result<()> {
        writeln!(
            wtr,
            "---- cell {} ({}) {} ----",
            cell.index,
            cell.binding_summary(),
            stage_label,
        )?;
        wtr.write_all(stdout)?;
        wtr.write_all(stderr)?;
        Ok(())
    }
}

fn progress_cell(color: Color, cell: &Cell, total: usize) {
    let mut wtr = color.stderr();
    let _ = util::colorize_label(&mut wtr, |w| {
        write!(w, "cell {}/{}", cell.index + 1, total)
    });
    let _ = writeln!(wtr, ": {}", cell.binding_summary());
}

fn progress_sample(color: Color, sample: u64, samples: u64, failed: bool) {
    let mut wtr = color.stderr();
    let _ = write!(wtr, "  sample {}/{}: ", sample + 1, samples);
    if failed {
        let _ = util::colorize_error(&mut wtr, |w| write!(w, "failed"));
    } else {
        let _ = write!(wtr, "ok");
    }
    let _ = writeln!(wtr, "");
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use crate::{format::config::Config, plan::Plan};

    use super::*;

    fn run_config(raw: &str, dir: &Path) -> (ResultTable, RunSummary) {
        let config = Config::from_slice(raw).unwrap();
        let plan = Plan::new(&config, dir).unwrap();
        execute(&plan, Color::Never).unwrap()
    }

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn lifecycle_order() {
        let tmp = tempfile::tempdir().unwrap();
        let raw = "
setup: [\"echo setup >> o\"]
prepare: [\"echo prepare >> o\"]
benchmark: [\"echo benchmark >> o\"]
conclude: [\"echo conclude >> o\"]
custom-metrics:
  - m: \"echo custom-metrics >> o && echo 0\"
cleanup: [\"echo cleanup >> o\"]
";
        let (table, summary) = run_config(raw, tmp.path());
        assert_eq!(
            "setup\nprepare\nbenchmark\nconclude\ncustom-metrics\ncleanup\n",
            read(&tmp.path().join("o")),
        );
        assert_eq!(0, summary.failed_samples);
        // One time row plus one custom metric row.
        assert_eq!(2, table.rows().len());
        assert_eq!(Some(0.0), table.rows()[1].value);
        assert_eq!("m", table.rows()[1].metric);
    }

    #[test]
    fn samples_repeat_the_middle_only() {
        let tmp = tempfile::tempdir().unwrap();
        let raw = "
samples: 3
setup: [\"echo setup >> o\"]
prepare: [\"echo prepare >> o\"]
benchmark: [\"echo benchmark >> o\"]
conclude: [\"echo conclude >> o\"]
custom-metrics:
  - m: \"echo custom-metrics >> o && echo 0\"
cleanup: [\"echo cleanup >> o\"]
";
        let (table, _) = run_config(raw, tmp.path());
        let middle = "prepare\nbenchmark\nconclude\ncustom-metrics\n";
        let expected =
            format!("setup\n{}{}{}cleanup\n", middle, middle, middle);
        assert_eq!(expected, read(&tmp.path().join("o")));
        assert_eq!(6, table.rows().len());
        assert_eq!(
            vec![0, 0, 1, 1, 2, 2],
            table.rows().iter().map(|r| r.sample).collect::<Vec<u64>>(),
        );
    }

    #[test]
    fn matrix_cwd_resolves_per_cell() {
        let tmp = tempfile::tempdir().unwrap();
        for dir in ["dir1", "dir2", "dir3"] {
            std::fs::create_dir(tmp.path().join(dir)).unwrap();
        }
        let raw = "
matrix:
  dir: [dir1, dir2, dir3]
cwd: \"./{{dir}}\"
benchmark: [\"pwd > o\"]
";
        run_config(raw, tmp.path());
        for dir in ["dir1", "dir2", "dir3"] {
            let got = read(&tmp.path().join(dir).join("o"));
            assert!(
                got.trim_end().ends_with(dir),
                "expected path ending in {}, got {:?}",
                dir,
                got,
            );
        }
    }

    #[test]
    fn matrix_env_overlays_per_cell() {
        let tmp = tempfile::tempdir().unwrap();
        let raw = "
matrix:
  var: [A, B, C]
env:
  VAR: \"{{var}}\"
setup: [\"echo setup $VAR >> o\"]
prepare: [\"echo prepare $VAR >> o\"]
benchmark: [\"echo benchmark $VAR >> o\"]
conclude: [\"echo conclude $VAR >> o\"]
custom-metrics:
  - m: \"echo custom-metrics $VAR >> o && echo 0\"
cleanup: [\"echo cleanup $VAR >> o\"]
";
        run_config(raw, tmp.path());
        let mut expected = String::new();
        for var in ["A", "B", "C"] {
            for stage in [
                "setup",
                "prepare",
                "benchmark",
                "conclude",
                "custom-metrics",
                "cleanup",
            ] {
                expected.push_str(&format!("{} {}\n", stage, var));
            }
        }
        assert_eq!(expected, read(&tmp.path().join("o")));
    }

    #[test]
    fn save_output_splits_per_cell() {
        let tmp = tempfile::tempdir().unwrap();
        let raw = "
matrix:
  var: [A, B, C]
save-output: \"output{{var}}\"
benchmark: [\"echo hello-{{var}}\"]
";
        let (_, summary) = run_config(raw, tmp.path());
        assert_eq!(3, summary.log_paths.len());
        for var in ["A", "B", "C"] {
            let got = read(&tmp.path().join(format!("output{}", var)));
            assert!(got.contains(&format!("hello-{}", var)), "{:?}", got);
            for other in ["A", "B", "C"] {
                if other != var {
                    assert!(!got.contains(&format!("hello-{}", other)));
                }
            }
        }
    }

    #[test]
    fn multi_line_commands_run_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let raw = "
matrix:
  var: [X]
benchmark: |
  echo line1 {{var}} >> o
  echo line2 {{var}} >> o
";
        run_config(raw, tmp.path());
        assert_eq!("line1 X\nline2 X\n", read(&tmp.path().join("o")));
    }

    #[test]
    fn row_counts_for_stages_and_metrics() {
        let tmp = tempfile::tempdir().unwrap();
        let raw = "
samples: 2
benchmark:
  first: [\"true\"]
  second: [\"true\", \"true\"]
metrics: [time, utime, rss]
";
        let (table, _) = run_config(raw, tmp.path());
        // samples x stages x numeric metrics
        assert_eq!(2 * 2 * 3, table.rows().len());
        let stages: Vec<&str> = table
            .rows()
            .iter()
            .map(|r| &*r.stage)
            .collect();
        assert!(stages.contains(&"first") && stages.contains(&"second"));
        assert!(table.rows().iter().all(|r| r.value.is_some()));
    }

    #[test]
    fn failure_taints_whole_sample_but_lifecycle_continues() {
        let tmp = tempfile::tempdir().unwrap();
        let raw = "
samples: 2
benchmark:
  work: [\"test $BENCHALOT_FAIL != 1\"]
conclude: [\"echo conclude >> o\"]
cleanup: [\"echo cleanup >> o\"]
env:
  BENCHALOT_FAIL: \"1\"
";
        let (table, summary) = run_config(raw, tmp.path());
        assert_eq!(2, summary.failed_samples);
        assert!(table.rows().iter().all(|r| r.failed));
        // conclude ran per sample, cleanup once.
        assert_eq!(
            "conclude\nconclude\ncleanup\n",
            read(&tmp.path().join("o")),
        );
    }

    #[test]
    fn setup_failure_taints_every_sample() {
        let tmp = tempfile::tempdir().unwrap();
        let raw = "
samples: 2
setup: [\"false\"]
benchmark: [\"echo ran >> o\"]
";
        let (table, summary) = run_config(raw, tmp.path());
        assert_eq!(2, summary.failed_samples);
        assert!(table.rows().iter().all(|r| r.failed));
        // The samples still executed.
        assert_eq!("ran\nran\n", read(&tmp.path().join("o")));
    }

    #[test]
    fn stdout_metric_captures_output() {
        let tmp = tempfile::tempdir().unwrap();
        let raw = "
benchmark: [\"echo first\", \"echo second\"]
metrics: [time, stdout]
";
        let (table, _) = run_config(raw, tmp.path());
        assert_eq!(2, table.rows().len());
        let row = &table.rows()[1];
        assert_eq!("stdout", row.stage);
        assert_eq!("stdout", row.metric);
        assert_eq!(Some("first\nsecond".to_string()), row.stdout);
        assert_eq!(None, row.value);
    }

    #[test]
    fn custom_metric_with_stage_header() {
        let tmp = tempfile::tempdir().unwrap();
        let raw = "
custom-metrics:
  - sizes: \"printf 'text,data\\n10,20\\n'\"
";
        let (table, summary) = run_config(raw, tmp.path());
        assert_eq!(0, summary.failed_samples);
        assert_eq!(2, table.rows().len());
        assert_eq!("text", table.rows()[0].stage);
        assert_eq!(Some(10.0), table.rows()[0].value);
        assert_eq!("data", table.rows()[1].stage);
        assert_eq!(Some(20.0), table.rows()[1].value);
        assert!(table.rows().iter().all(|r| r.metric == "sizes"));
    }

    #[test]
    fn malformed_custom_metric_is_a_sample_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let raw = "
benchmark: [\"true\"]
custom-metrics:
  - broken: \"echo not-a-number\"
";
        let (table, summary) = run_config(raw, tmp.path());
        assert_eq!(1, summary.failed_samples);
        // The benchmark row is still there, flagged as failed; the custom
        // metric produced no rows.
        assert_eq!(1, table.rows().len());
        assert!(table.rows()[0].failed);
    }

    #[test]
    fn time_metric_is_positive() {
        let tmp = tempfile::tempdir().unwrap();
        let raw = "benchmark: [\"sleep 0.05\"]";
        let (table, _) = run_config(raw, tmp.path());
        let time = table.rows()[0].value.unwrap();
        assert!(time >= 0.05, "measured {}", time);
    }

    #[test]
    fn custom_metric_parsing() {
        assert_eq!(
            vec![("m".to_string(), 1.5)],
            parse_custom_metric("m", b" 1.5 \n").unwrap(),
        );
        assert_eq!(
            vec![("a".to_string(), 1.0), ("b".to_string(), 2.0)],
            parse_custom_metric("m", b"a,b\n1,2\n").unwrap(),
        );
        assert!(parse_custom_metric("m", b"a,b\n1\n").is_err());
        assert!(parse_custom_metric("m", b"hello\n").is_err());
        assert!(parse_custom_metric("m", b"a\n1\n2\n").is_err());
    }
}
