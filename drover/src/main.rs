//! Directive-driven build automation.
//!
//! Reads `% arara:` style directives from each file given on the command line
//! (or from a project list), resolves them against YAML rules, and runs the
//! resulting commands. The exit code reflects the outcome of the run.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use drover::core::booleans::check_boolean;
use drover::exit_codes;
use drover::io::config::{ConfigOverrides, DEFAULT_CONFIG_FILE, load_config};
use drover::io::process::SystemRunner;
use drover::io::projects::{implicit_project, load_projects};
use drover::logging;
use drover::report::{DirectiveRecord, render_record, render_summary};
use drover::schedule::{RunOptions, run};

#[derive(Parser)]
#[command(
    name = "drover",
    version,
    about = "Run the automation directives embedded in source files"
)]
struct Cli {
    /// Echo command output and log progress.
    #[arg(short, long)]
    verbose: bool,

    /// Show what would run without executing any command.
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Maximum iterations of a single directive.
    #[arg(short = 'l', long, value_name = "N")]
    max_loops: Option<u32>,

    /// Stop at the first failing directive (yes/no, true/false, on/off, 1/0).
    #[arg(long, value_name = "BOOL", value_parser = parse_boolean)]
    halt_on_errors: Option<bool>,

    /// Only read directives from the leading comment block.
    #[arg(short = 'H', long)]
    header: bool,

    /// Per-command timeout in seconds.
    #[arg(short, long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Refuse shell programs and paths outside the project directory.
    #[arg(short, long)]
    safe_run: bool,

    /// Run independent projects concurrently.
    #[arg(short = 'j', long)]
    parallel: bool,

    /// Configured preamble to run before each file's directives.
    #[arg(short, long = "preamble", value_name = "NAME")]
    preambles: Vec<String>,

    /// Configuration file.
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// TOML project list; replaces the FILES argument.
    #[arg(long, value_name = "PATH", conflicts_with = "files")]
    projects: Option<PathBuf>,

    /// Mirror diagnostics into this file.
    #[arg(long, value_name = "PATH")]
    log: Option<PathBuf>,

    /// Write a JSON report of the run.
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,

    /// Files to process, in order.
    #[arg(value_name = "FILES", required_unless_present = "projects")]
    files: Vec<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            max_loops: self.max_loops,
            halt_on_errors: self.halt_on_errors,
            timeout_secs: self.timeout,
            parse_only_header: self.header,
            dry_run: self.dry_run,
            safe_run: self.safe_run,
            parallel: self.parallel,
        }
    }
}

fn parse_boolean(value: &str) -> Result<bool, String> {
    check_boolean(value).map_err(|err| err.to_string())
}

fn main() {
    let cli = Cli::parse();
    match execute(&cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::CAUGHT_EXCEPTION);
        }
    }
}

fn execute(cli: &Cli) -> Result<i32> {
    logging::init(cli.verbose, cli.log.as_deref())?;

    let base_dir = std::env::current_dir().context("resolve current directory")?;
    let mut config = load_config(&base_dir.join(&cli.config))?;
    config.apply_overrides(&cli.overrides())?;
    let file_types = config.file_types()?;

    let projects = match &cli.projects {
        Some(path) => load_projects(&base_dir.join(path), &file_types)?,
        None => vec![implicit_project(&cli.files, &base_dir, &file_types)?],
    };

    let dry_run = config.dry_run;
    let print = move |record: &DirectiveRecord| println!("{}", render_record(record, dry_run));
    let options = RunOptions {
        preambles: cli.preambles.clone(),
        echo: cli.verbose,
    };
    let report = run(&config, &projects, &base_dir, &options, &SystemRunner::default(), &print)?;

    println!("{}", render_summary(&report));
    if let Some(path) = &cli.report {
        report.write_json(&base_dir.join(path))?;
    }
    Ok(report.exit_code)
}
