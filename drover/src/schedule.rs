//! Project scheduling: dependency order, optional wave parallelism, and the
//! assembly of everything a run needs.

use std::any::Any;
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::core::graph::{order_projects, project_waves};
use crate::core::types::Project;
use crate::expr::{JinjaEvaluator, SharedState};
use crate::interpreter::{Flow, Interpreter, Observer, ProjectRun};
use crate::io::config::RunConfig;
use crate::io::database::Database;
use crate::io::process::{CancelToken, CommandRunner};
use crate::io::rules::RuleRegistry;
use crate::report::ExecutionReport;

/// Invocation options that are not part of the configuration file.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Named preambles to prepend to every file.
    pub preambles: Vec<String>,
    /// Copy command output to the terminal.
    pub echo: bool,
}

/// Run `projects` in dependency order and aggregate the report.
///
/// With `parallel`, projects whose dependencies are all complete run
/// concurrently, one wave at a time. Records keep wave order and, within a
/// wave, declaration order.
pub fn execute(
    interpreter: &Interpreter<'_>,
    projects: &[Project],
    parallel: bool,
    observer: Observer<'_>,
) -> ExecutionReport {
    let started_at = Utc::now();
    let halt_on_errors = interpreter.config().halt_on_errors;

    let waves = if parallel {
        project_waves(projects)
    } else {
        order_projects(projects).map(|order| order.into_iter().map(|p| vec![p]).collect())
    };
    let waves = match waves {
        Ok(waves) => waves,
        Err(err) => {
            warn!(error = %err, "cannot order projects");
            return ExecutionReport::finish(started_at, Vec::new(), None, Some(err.to_string()), halt_on_errors);
        }
    };

    let mut records = Vec::new();
    let mut halted = None;
    let mut error = None;
    for (index, wave) in waves.iter().enumerate() {
        info!(wave = index + 1, projects = wave.len(), "wave started");
        let runs = run_wave(interpreter, wave, observer);
        let mut stop = false;
        for run in runs {
            match run {
                Ok(run) => {
                    match run.flow {
                        Flow::Halted(code) => {
                            halted.get_or_insert(code);
                            stop = true;
                        }
                        Flow::Stop => stop = true,
                        Flow::Continue => {}
                    }
                    records.extend(run.records);
                }
                Err(message) => {
                    error.get_or_insert(message);
                    stop = true;
                }
            }
        }
        if stop {
            info!(wave = index + 1, "run stopped");
            break;
        }
    }
    ExecutionReport::finish(started_at, records, halted, error, halt_on_errors)
}

fn run_wave(
    interpreter: &Interpreter<'_>,
    wave: &[&Project],
    observer: Observer<'_>,
) -> Vec<Result<ProjectRun, String>> {
    if let [project] = wave {
        return vec![Ok(interpreter.run_project(project, observer))];
    }
    thread::scope(|scope| {
        let handles: Vec<_> = wave
            .iter()
            .map(|project| scope.spawn(move || interpreter.run_project(project, observer)))
            .collect();
        handles
            .into_iter()
            .zip(wave)
            .map(|(handle, project)| {
                handle.join().map_err(|panic| {
                    interpreter.cancel_token().cancel();
                    format!("project '{}' panicked: {}", project.name, panic_message(&*panic))
                })
            })
            .collect()
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Load the change database, rules, and evaluator, then execute.
///
/// Relative rule paths and the database resolve against `base_dir`, the
/// invocation directory. Session values never outlive the run.
#[instrument(skip_all, fields(projects = projects.len()))]
pub fn run(
    config: &RunConfig,
    projects: &[Project],
    base_dir: &Path,
    options: &RunOptions,
    runner: &dyn CommandRunner,
    observer: Observer<'_>,
) -> Result<ExecutionReport> {
    let database_path: PathBuf = config.database_path(base_dir);
    let database = Database::load(&database_path)
        .with_context(|| format!("load change database {}", database_path.display()))?;
    let shared = SharedState::new(database, database_path);
    let evaluator = JinjaEvaluator::new(shared.clone());
    let registry = RuleRegistry::new(config.rule_search_paths(base_dir));
    let cancel = CancelToken::new();

    let interpreter = Interpreter::new(config, &registry, &evaluator, runner, &cancel)
        .with_preambles(&options.preambles)?
        .with_echo(options.echo);

    let report = execute(&interpreter, projects, config.parallel, observer);
    shared.session().clear();
    info!(rules = registry.loaded(), status = ?report.status, "run finished");
    Ok(report)
}
