//! Directive interpreter: runs the files of one project in priority order and
//! each file's directives in document order.
//!
//! Failures are recorded per directive. Whether a failure ends the run is
//! decided here: safe-run violations always do, other errors and failing
//! commands only under `halt_on_errors`. A `halt` directive unwinds
//! everything through [`Flow::Halted`].

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::builder::{self, ExecutableCommand};
use crate::core::directive::DirectiveSyntax;
use crate::core::graph::order_files;
use crate::core::looping::{DirectiveLoop, LoopAction};
use crate::core::path::{is_within, normalize, resolve_under};
use crate::core::resolution;
use crate::core::types::{Directive, ExecutionStatus, Project, ProjectFile};
use crate::error::{DroverError, RuleError, SafeRunViolation};
use crate::expr::{EvalContext, Evaluator, evaluate_condition};
use crate::io::config::RunConfig;
use crate::io::process::{CancelToken, CommandRunner, ProcessFailure, ProcessRequest};
use crate::io::rules::RuleRegistry;
use crate::report::{DirectiveRecord, Outcome};
use crate::sources::{self, DirectiveSource, Preamble};

/// What the caller should do after a directive, file, or project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// A `halt` directive ran; carries its exit status.
    Halted(i32),
    /// A fatal error or cancellation ended the run.
    Stop,
}

/// Called with every record as soon as it is produced.
pub type Observer<'a> = &'a (dyn Fn(&DirectiveRecord) + Sync);

/// Records of one project plus how it ended.
#[derive(Debug)]
pub struct ProjectRun {
    pub records: Vec<DirectiveRecord>,
    pub flow: Flow,
}

enum DirectiveEnd {
    Finished,
    Halted(i32),
}

/// How one iteration's commands went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    Passed,
    Failed,
    /// The cancel token fired before or during a command.
    Cancelled,
}

pub struct Interpreter<'a> {
    config: &'a RunConfig,
    registry: &'a RuleRegistry,
    evaluator: &'a dyn Evaluator,
    runner: &'a dyn CommandRunner,
    cancel: &'a CancelToken,
    preambles: Vec<Preamble<'a>>,
    echo: bool,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        config: &'a RunConfig,
        registry: &'a RuleRegistry,
        evaluator: &'a dyn Evaluator,
        runner: &'a dyn CommandRunner,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            config,
            registry,
            evaluator,
            runner,
            cancel,
            preambles: Vec::new(),
            echo: false,
        }
    }

    /// Run the named configured preambles before every file's own directives.
    pub fn with_preambles(mut self, names: &[String]) -> Result<Self> {
        let config = self.config;
        for name in names {
            let Some((name, text)) = config.preambles.get_key_value(name) else {
                bail!("unknown preamble '{name}'");
            };
            self.preambles.push(Preamble {
                name: name.as_str(),
                text: text.as_str(),
            });
        }
        Ok(self)
    }

    /// Copy command output to the terminal while it runs.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn config(&self) -> &RunConfig {
        self.config
    }

    pub fn cancel_token(&self) -> &CancelToken {
        self.cancel
    }

    /// Run every file of `project`, highest priority first.
    ///
    /// Any outcome other than [`Flow::Continue`] cancels the shared token so
    /// sibling projects stop as well.
    #[instrument(skip_all, fields(project = %project.name))]
    pub fn run_project(&self, project: &Project, observer: Observer<'_>) -> ProjectRun {
        info!(files = project.files.len(), "project started");
        let mut records = Vec::new();
        let mut flow = Flow::Continue;
        for file in order_files(&project.files) {
            if self.cancel.is_cancelled() {
                flow = Flow::Stop;
                break;
            }
            flow = self.run_file(project, file, &mut |record: DirectiveRecord| {
                observer(&record);
                records.push(record);
            });
            if flow != Flow::Continue {
                break;
            }
        }
        if flow != Flow::Continue {
            self.cancel.cancel();
        }
        info!(?flow, "project finished");
        ProjectRun { records, flow }
    }

    /// Extract and run one file's directives.
    ///
    /// A file that cannot be read or parsed is recorded as failed and the
    /// remaining files still run.
    pub fn run_file(
        &self,
        project: &Project,
        file: &ProjectFile,
        sink: &mut dyn FnMut(DirectiveRecord),
    ) -> Flow {
        let path = file_location(project, file);
        let directives = match self.load_directives(&path, file) {
            Ok(directives) => directives,
            Err(err) => {
                warn!(file = %path.display(), error = %err, "cannot load directives");
                sink(DirectiveRecord::file_failure(&project.name, &path, err));
                return Flow::Continue;
            }
        };
        if directives.is_empty() {
            warn!(file = %path.display(), "no directives found");
        }

        for directive in &directives {
            if self.cancel.is_cancelled() {
                return Flow::Stop;
            }
            let (record, flow) = self.run_directive(project, &path, directive);
            sink(record);
            if flow != Flow::Continue {
                return flow;
            }
        }
        Flow::Continue
    }

    fn load_directives(&self, path: &Path, file: &ProjectFile) -> Result<Vec<Directive>, DroverError> {
        let syntax = DirectiveSyntax::new(&file.file_type, &self.config.directive_keyword)
            .map_err(|source| DroverError::Parse {
                file: path.to_path_buf(),
                source,
            })?;
        let mut all: Vec<Box<dyn DirectiveSource + '_>> = self
            .preambles
            .iter()
            .map(|preamble| Box::new(*preamble) as Box<dyn DirectiveSource + '_>)
            .collect();
        all.push(sources::for_file(path, file));
        sources::collect(&all, &syntax, self.config.parse_only_header)
    }

    /// Run one directive to completion and decide how the run continues.
    pub fn run_directive(
        &self,
        project: &Project,
        file: &Path,
        directive: &Directive,
    ) -> (DirectiveRecord, Flow) {
        let mut record = DirectiveRecord::for_directive(&project.name, file, directive);
        info!(
            directive = %directive.identifier,
            line = directive.line_numbers.first().copied().unwrap_or_default(),
            "directive started"
        );
        let flow = match self.execute(project, file, directive, &mut record) {
            Ok(DirectiveEnd::Halted(status)) => {
                info!(status, "halt directive reached");
                record.outcome = Outcome::Halted;
                Flow::Halted(status)
            }
            Ok(DirectiveEnd::Finished) => {
                let failed = record.status != ExecutionStatus::Success;
                if self.cancel.is_cancelled() || (failed && self.config.halt_on_errors) {
                    Flow::Stop
                } else {
                    Flow::Continue
                }
            }
            Err(err) => {
                let err = err.in_directive(file, &directive.line_numbers, &directive.identifier);
                warn!(error = %err, "directive failed");
                let fatal = err.is_always_fatal() || self.config.halt_on_errors;
                record.outcome = Outcome::Failed;
                record.status = ExecutionStatus::CaughtException;
                record.error = Some(err.to_string());
                if fatal { Flow::Stop } else { Flow::Continue }
            }
        };
        debug!(outcome = ?record.outcome, status = ?record.status, runs = record.runs, "directive finished");
        (record, flow)
    }

    fn execute(
        &self,
        project: &Project,
        file: &Path,
        directive: &Directive,
        record: &mut DirectiveRecord,
    ) -> Result<DirectiveEnd, DroverError> {
        let workdir = normalize(&project.workdir);
        let reference = match directive.reference() {
            Some(name) => resolve_under(&workdir, Path::new(name)),
            None => file.to_path_buf(),
        };
        if self.config.safe_run && !is_within(&reference, &workdir) {
            return Err(SafeRunViolation::ReferenceEscape { path: reference }.into());
        }

        let context = base_context(project, &workdir, &reference, directive);
        let evaluate = |expression: &str| -> Result<bool, DroverError> {
            Ok(evaluate_condition(self.evaluator, expression, &context)?)
        };
        let mut machine =
            DirectiveLoop::new(&directive.conditional, self.config.max_loops, self.config.dry_run);

        if directive.is_halt() {
            let status = halt_status(directive)?;
            return match machine.next(&evaluate)? {
                LoopAction::Run(iteration) => {
                    record.runs = iteration;
                    machine.halt();
                    Ok(DirectiveEnd::Halted(status))
                }
                LoopAction::Stop(state) => {
                    record.outcome = state.into();
                    Ok(DirectiveEnd::Finished)
                }
            };
        }

        let rule = self.registry.resolve(&directive.identifier)?;
        let resolved = resolution::validate(directive, &rule)?;
        debug!(rule = rule.display_name(), "rule resolved");

        loop {
            match machine.next(&evaluate)? {
                LoopAction::Stop(state) => {
                    record.outcome = state.into();
                    return Ok(DirectiveEnd::Finished);
                }
                LoopAction::Run(iteration) => {
                    record.runs = iteration;
                    let commands =
                        builder::build(&rule, &resolved, self.evaluator, &context, &workdir)?;
                    record.commands = commands.iter().map(ExecutableCommand::display).collect();
                    match self.run_commands(&commands, &workdir, &context, record)? {
                        Commands::Passed => {}
                        Commands::Failed => {
                            record.status = ExecutionStatus::ExternalCallFailed;
                            if self.config.halt_on_errors || self.cancel.is_cancelled() {
                                machine.fail();
                            }
                        }
                        Commands::Cancelled => {
                            record.outcome = Outcome::Cancelled;
                            return Ok(DirectiveEnd::Finished);
                        }
                    }
                }
            }
        }
    }

    /// Run commands in order.
    ///
    /// Work stopped by the cancel token is reported as [`Commands::Cancelled`]
    /// so a sibling's failure or halt is not counted against this directive.
    fn run_commands(
        &self,
        commands: &[ExecutableCommand],
        project_dir: &Path,
        context: &EvalContext,
        record: &mut DirectiveRecord,
    ) -> Result<Commands, DroverError> {
        let mut result = Commands::Passed;
        for command in commands {
            if self.config.safe_run {
                self.check_safe(command, project_dir)?;
            }
            if self.config.dry_run {
                info!(command = %command.display(), "dry run, not executed");
                continue;
            }
            if self.cancel.is_cancelled() {
                return Ok(cancelled(result, record));
            }

            info!(
                command = %command.display(),
                name = command.name.as_deref().unwrap_or_default(),
                "running command"
            );
            let request = ProcessRequest {
                argv: &command.argv,
                workdir: &command.workdir,
                timeout: self.config.timeout(),
                cancel: self.cancel,
                echo: self.echo,
            };
            let succeeded = match self.runner.run(&request) {
                Ok(output) => {
                    record.exit_code = Some(output.exit_code);
                    debug!(exit_code = output.exit_code, bytes = output.output.len(), "command exited");
                    exit_accepted(self.evaluator, command, output.exit_code, context)?
                }
                Err(ProcessFailure::Interrupted { program }) => {
                    info!(program = %program, "command cancelled");
                    record.error = Some(format!("'{program}' was cancelled"));
                    return Ok(cancelled(result, record));
                }
                Err(failure) => {
                    warn!(error = %failure, "command could not run");
                    record.exit_code = Some(failure.exit_code());
                    record.error = Some(failure.to_string());
                    false
                }
            };
            if !succeeded {
                result = Commands::Failed;
                if self.config.halt_on_errors {
                    break;
                }
            }
        }
        Ok(result)
    }

    fn check_safe(&self, command: &ExecutableCommand, project_dir: &Path) -> Result<(), SafeRunViolation> {
        if !is_within(&command.workdir, project_dir) {
            return Err(SafeRunViolation::WorkdirEscape {
                path: command.workdir.clone(),
            });
        }
        let program = command
            .argv
            .first()
            .and_then(|program| Path::new(program).file_stem())
            .map(|stem| stem.to_string_lossy().to_lowercase());
        if let Some(program) = program
            && self
                .config
                .shell_programs
                .iter()
                .any(|shell| shell.eq_ignore_ascii_case(&program))
        {
            return Err(SafeRunViolation::ShellProgram { program });
        }
        Ok(())
    }
}

/// Stop for cancellation, keeping a failure that already happened this iteration.
fn cancelled(so_far: Commands, record: &mut DirectiveRecord) -> Commands {
    if so_far == Commands::Failed {
        record.status = ExecutionStatus::ExternalCallFailed;
    }
    Commands::Cancelled
}

/// Variables every expression of a directive can see.
fn base_context(project: &Project, workdir: &Path, reference: &Path, directive: &Directive) -> EvalContext {
    let name = |path: Option<&std::ffi::OsStr>| {
        path.map(|part| part.to_string_lossy().into_owned())
            .unwrap_or_default()
    };
    let mut context = EvalContext::new();
    context.insert("project".to_string(), json!(project.name));
    context.insert("workdir".to_string(), json!(workdir.to_string_lossy()));
    context.insert("reference".to_string(), json!(reference.to_string_lossy()));
    context.insert("file".to_string(), json!(name(reference.file_name())));
    context.insert("basename".to_string(), json!(name(reference.file_stem())));
    context.insert("parameters".to_string(), json!(directive.parameters));
    context
}

/// Whether `exit_code` counts as success for `command`.
fn exit_accepted(
    evaluator: &dyn Evaluator,
    command: &ExecutableCommand,
    exit_code: i32,
    context: &EvalContext,
) -> Result<bool, DroverError> {
    let Some(expression) = &command.exit else {
        return Ok(exit_code == 0);
    };
    let mut scoped = context.clone();
    scoped.insert("value".to_string(), json!(exit_code));
    Ok(evaluate_condition(evaluator, expression, &scoped)?)
}

/// Exit status requested by a `halt` directive (`{ status: N }`, default 0).
fn halt_status(directive: &Directive) -> Result<i32, RuleError> {
    for key in directive.parameters.keys() {
        if key != "status" && !resolution::RESERVED_KEYS.contains(&key.as_str()) {
            return Err(RuleError::UnknownArgument {
                rule: directive.identifier.clone(),
                argument: key.clone(),
            });
        }
    }
    let Some(value) = directive.parameters.get("status") else {
        return Ok(0);
    };
    let parsed = match value {
        serde_json::Value::Number(number) => number.as_i64().and_then(|n| i32::try_from(n).ok()),
        serde_json::Value::String(text) => text.trim().parse::<i32>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| RuleError::InvalidHaltStatus {
        found: value.to_string(),
    })
}

/// Path of a project file as the interpreter sees it.
pub fn file_location(project: &Project, file: &ProjectFile) -> PathBuf {
    normalize(&project.resolve(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Conditional;

    fn halt(parameters: serde_json::Value) -> Directive {
        Directive {
            identifier: "halt".to_string(),
            parameters: serde_json::from_value(parameters).expect("parameters"),
            conditional: Conditional::None,
            line_numbers: vec![1],
        }
    }

    #[test]
    fn halt_status_defaults_to_zero_and_accepts_integers() {
        assert_eq!(halt_status(&halt(json!({}))).expect("default"), 0);
        assert_eq!(halt_status(&halt(json!({"status": 3}))).expect("number"), 3);
        assert_eq!(halt_status(&halt(json!({"status": "4"}))).expect("text"), 4);
    }

    #[test]
    fn halt_rejects_unknown_keys_and_bad_status() {
        assert!(matches!(
            halt_status(&halt(json!({"code": 1}))),
            Err(RuleError::UnknownArgument { .. })
        ));
        assert!(matches!(
            halt_status(&halt(json!({"status": "soon"}))),
            Err(RuleError::InvalidHaltStatus { .. })
        ));
    }
}
