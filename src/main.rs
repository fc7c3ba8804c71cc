use std::{io::Write, path::PathBuf};

use anyhow::Context;

#[macro_use]
mod macros;

mod analysis;
mod args;
mod format;
mod plan;
mod report;
mod run;
mod stats;
mod system;
mod template;
mod util;

use crate::{
    args::{Color, Usage},
    format::{config, config::Config, results::ResultTable},
    plan::Plan,
    run::RunSummary,
};

const USAGES: &[Usage] = &[
    Usage::new(
        "-p, --plan",
        "Print the expanded plan and exit.",
        r#"
Print the expanded plan and exit without running any command.

One line is printed per benchmark cell: the cell's variable binding followed
by its benchmark commands with all placeholders substituted. The sample count
is ignored, since nothing is executed. This is the recommended way to check
what a matrix expands to before committing hours to running it.
"#,
    ),
    Usage::new(
        "-r, --results-from-csv <path>",
        "Skip execution, post-process an existing result CSV.",
        r#"
Skip planning and execution entirely: load sample rows from a result CSV
written by an earlier run and continue with post-processing and output
rendering. The configuration file is still required, since it defines the
results blocks to render.
"#,
    ),
    Usage::new(
        "--include <path> ...",
        "Concatenate sample rows from another result CSV.",
        r#"
Concatenate sample rows from the given result CSV to the freshly produced
rows before post-processing. May be given multiple times. Rows with the same
variable binding are treated as belonging to the same cell, which is how
results gathered on several machines (for example via --split) are merged
back together.
"#,
    ),
    Usage::new(
        "--split <var>",
        "Write one partial configuration per value of <var>.",
        r#"
Emit one partial configuration file per value of the given matrix variable,
each containing only the matrix slice where the variable has that value.
Files are written to 'out/<configbase>.part<N>.yml'. Together with --include
this allows spreading a large matrix across machines.
"#,
    ),
    Usage::new(
        "--include-failed",
        "Keep failed samples in rendered output.",
        r#"
Disable failure filtering in the post-processor. By default, any sample with
at least one non-zero exit code is excluded from the aggregated md/table
output. The raw CSV output always contains every sample, failed or not.
"#,
    ),
    Usage::new(
        "--include-outliers",
        "Keep outlier samples in rendered output.",
        r#"
Disable outlier filtering in the post-processor. By default, values whose
modified Z-score within their (binding, stage, metric) group exceeds 3.5 are
excluded from the aggregated md/table output. The raw CSV output always
contains every sample.
"#,
    ),
    Color::USAGE,
    Usage::new(
        "--verbose",
        "Log executed commands and other details.",
        r#"
Lower the default log level from 'warn' to 'debug', which among other things
logs every shell command before it runs. The RUST_LOG environment variable
overrides this.
"#,
    ),
    Usage::new(
        "--version",
        "Print the version of benchalot and exit.",
        r#"
Print the version of benchalot, including the git revision when it was built
from a checkout, and exit.
"#,
    ),
];

fn usage_short() -> String {
    format!(
        "\
Automate a matrix of repeatable benchmarks from a YAML configuration.

USAGE:
    benchalot <config.yml> [OPTIONS]

TIP:
    use -h for short docs and --help for long docs

OPTIONS:
{options}
",
        options = Usage::short(USAGES),
    )
    .trim()
    .to_string()
}

fn usage_long() -> String {
    format!(
        "\
Automate a matrix of repeatable benchmarks from a YAML configuration.

The configuration declares a matrix of variables, shell commands for the
lifecycle phases (setup, prepare, benchmark, conclude, custom-metrics,
cleanup) and the metrics to collect. Every combination of the matrix is
executed 'samples' times, measurements land in a long-format result table,
and the configured results blocks render that table to CSV, Markdown or
plain text files.

USAGE:
    benchalot <config.yml> [OPTIONS]

TIP:
    use -h for short docs and --help for long docs

OPTIONS:
{options}
",
        options = Usage::long(USAGES),
    )
    .trim()
    .to_string()
}

fn main() -> anyhow::Result<()> {
    if let Err(err) = run(&mut lexopt::Parser::from_env()) {
        if std::env::var("RUST_BACKTRACE").map_or(false, |v| v == "1") {
            writeln!(&mut std::io::stderr(), "{:?}", err).unwrap();
        } else {
            writeln!(&mut std::io::stderr(), "{:#}", err).unwrap();
        }
        std::process::exit(1);
    }
    Ok(())
}

fn run(p: &mut lexopt::Parser) -> anyhow::Result<()> {
    let cli = match Cli::parse(p)? {
        // -h/--help/--version already wrote to stdout; exit 0.
        None => return Ok(()),
        Some(cli) => cli,
    };
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .default_filter_or(if cli.verbose { "debug" } else { "warn" }),
    )
    .init();

    let config_path = match cli.config_path {
        Some(ref path) => path.clone(),
        None => anyhow::bail!(
            "missing configuration file path\n\n{}",
            usage_short()
        ),
    };
    let config = Config::from_path(&config_path)?;
    let launch_dir =
        std::env::current_dir().context("failed to get current directory")?;

    if let Some(ref var) = cli.split {
        let written =
            config::split(&config_path, var, &launch_dir.join("out"))?;
        for path in written.iter() {
            println!("{}", path.display());
        }
        return Ok(());
    }

    let filtering = analysis::Filtering {
        include_failed: cli.include_failed,
        include_outliers: cli.include_outliers,
    };

    if let Some(ref path) = cli.results_from_csv {
        let mut table = ResultTable::from_csv_path(path)?;
        for include in cli.includes.iter() {
            table.concat(ResultTable::from_csv_path(include)?)?;
        }
        let filtered = analysis::filtered(&table, filtering);
        report::render(
            &config,
            &plan::timestamp(),
            &table,
            &filtered,
            &launch_dir,
        )?;
        return Ok(());
    }

    let plan = Plan::new(&config, &launch_dir)?;
    if cli.plan {
        for cell in plan.cells.iter() {
            println!(
                "{}: {} :: {}",
                cell.index,
                cell.binding_summary(),
                cell.benchmark_commands().join(" ; "),
            );
        }
        return Ok(());
    }

    run::install_interrupt_handler()?;
    let guard = system::SystemGuard::apply(&config.system)?;
    let result = run::execute(&plan, cli.color);
    // Revert the system controls before anything else happens, even when
    // execution failed catastrophically.
    drop(guard);
    let (mut table, summary) = result?;

    for include in cli.includes.iter() {
        table.concat(ResultTable::from_csv_path(include)?)?;
    }
    if table.is_empty() {
        log::warn!("no samples were collected");
    }
    let filtered = analysis::filtered(&table, filtering);
    report::render(&config, &plan.datetime, &table, &filtered, &launch_dir)?;
    print_summary(cli.color, &summary);
    if summary.interrupted {
        anyhow::bail!("interrupted");
    }
    Ok(())
}

fn print_summary(color: Color, summary: &RunSummary) {
    let mut wtr = color.stderr();
    if summary.failed_samples == 0 {
        let _ =
            writeln!(wtr, "all {} samples succeeded", summary.total_samples);
        return;
    }
    let _ = util::colorize_error(&mut wtr, |w| {
        write!(
            w,
            "{} of {} samples failed",
            summary.failed_samples, summary.total_samples,
        )
    });
    if summary.log_paths.is_empty() {
        let _ = writeln!(wtr, " (no output log configured)");
    } else {
        let logs: Vec<String> = summary
            .log_paths
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        let _ = writeln!(wtr, "; logs: {}", logs.join(", "));
    }
}

/// The parsed command line.
#[derive(Clone, Debug, Default)]
struct Cli {
    config_path: Option<PathBuf>,
    plan: bool,
    results_from_csv: Option<PathBuf>,
    includes: Vec<PathBuf>,
    split: Option<String>,
    include_failed: bool,
    include_outliers: bool,
    color: Color,
    verbose: bool,
}

impl Cli {
    /// Parse the command line. Returns `None` when a help or version flag
    /// already handled the invocation (which exits 0).
    fn parse(p: &mut lexopt::Parser) -> anyhow::Result<Option<Cli>> {
        use lexopt::Arg;

        let mut c = Cli::default();
        while let Some(arg) = p.next()? {
            match arg {
                Arg::Short('h') => {
                    println!("{}", usage_short());
                    return Ok(None);
                }
                Arg::Long("help") => {
                    println!("{}", usage_long());
                    return Ok(None);
                }
                Arg::Long("version") => {
                    println!("benchalot {}", util::version());
                    return Ok(None);
                }
                Arg::Short('p') | Arg::Long("plan") => {
                    c.plan = true;
                }
                Arg::Short('r') | Arg::Long("results-from-csv") => {
                    c.results_from_csv = Some(PathBuf::from(
                        p.value().context("-r/--results-from-csv")?,
                    ));
                }
                Arg::Long("include") => {
                    c.includes
                        .push(PathBuf::from(p.value().context("--include")?));
                }
                Arg::Long("split") => {
                    c.split = Some(
                        p.value()
                            .context("--split")?
                            .to_str()
                            .context("--split value is not UTF-8")?
                            .to_string(),
                    );
                }
                Arg::Long("include-failed") => {
                    c.include_failed = true;
                }
                Arg::Long("include-outliers") => {
                    c.include_outliers = true;
                }
                Arg::Long("color") => {
                    c.color = args::parse(p, "--color")?;
                }
                Arg::Long("verbose") => {
                    c.verbose = true;
                }
                Arg::Value(path) => {
                    anyhow::ensure!(
                        c.config_path.is_none(),
                        "unexpected extra positional argument {:?}",
                        path,
                    );
                    c.config_path = Some(PathBuf::from(path));
                }
                _ => return Err(arg.unexpected().into()),
            }
        }
        Ok(Some(c))
    }
}
