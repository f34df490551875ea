//! Error taxonomy for directive parsing, rule resolution, and execution.
//!
//! Each failure class is its own type so the interpreter can decide how far it
//! propagates (see [`ErrorKind`]). [`DroverError`] unifies them and adds the
//! per-directive context wrapper used for user-facing messages.

use std::path::PathBuf;

use thiserror::Error;

/// Malformed directive text. Fatal to the file being scanned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("line {line}: directive has no identifier")]
    EmptyIdentifier { line: usize },

    #[error("line {line}: unknown conditional keyword '{keyword}'")]
    UnknownConditional { line: usize, keyword: String },

    #[error("line {line}: conditional '{keyword}' has no expression")]
    EmptyConditional { line: usize, keyword: String },

    #[error("line {line}: malformed parameter block: {message}")]
    MalformedParameters { line: usize, message: String },

    #[error("line {line}: continuation without a directive in progress")]
    OrphanContinuation { line: usize },

    #[error("invalid directive pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Rule lookup and parameter validation failures.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule '{identifier}' not found (searched: {})", display_paths(.searched))]
    NotFound {
        identifier: String,
        searched: Vec<PathBuf>,
    },

    #[error("rule '{rule}' has no argument named '{argument}'")]
    UnknownArgument { rule: String, argument: String },

    #[error("rule '{rule}' requires argument '{argument}'")]
    MissingRequiredArgument { rule: String, argument: String },

    #[error("halt status must be an integer, found {found}")]
    InvalidHaltStatus { found: String },

    #[error("invalid rule file {}: {message}", .path.display())]
    Invalid { path: PathBuf, message: String },

    #[error("read rule file {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Cause reported by a pluggable expression evaluator.
pub type ExpressionFault = Box<dyn std::error::Error + Send + Sync>;

/// A flag, default, template, or conditional expression failed to evaluate.
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("argument '{argument}': cannot evaluate `{expression}`")]
    Argument {
        argument: String,
        expression: String,
        #[source]
        source: ExpressionFault,
    },

    #[error("conditional `{expression}` failed to evaluate")]
    Conditional {
        expression: String,
        #[source]
        source: ExpressionFault,
    },

    #[error("command template `{template}` failed to render")]
    Template {
        template: String,
        #[source]
        source: ExpressionFault,
    },

    #[error("conditional `{expression}` produced {found}, expected a boolean")]
    NotBoolean { expression: String, found: String },
}

/// A string that is not one of the accepted boolean spellings.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("'{value}' is not a valid boolean (expected yes/no, true/false, on/off, 1/0)")]
pub struct InvalidBoolean {
    pub value: String,
}

/// Dependency ordering failures. Always detected before execution starts.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("dependency cycle among: {}", .names.join(", "))]
    Cycle { names: Vec<String> },

    #[error("'{name}' depends on itself")]
    SelfDependency { name: String },

    #[error("'{name}' depends on unknown '{dependency}'")]
    UnknownDependency { name: String, dependency: String },

    #[error("'{name}' is declared more than once")]
    Duplicate { name: String },
}

/// An operation refused under safe-run mode.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SafeRunViolation {
    #[error("working directory {} escapes the project directory", .path.display())]
    WorkdirEscape { path: PathBuf },

    #[error("file {} escapes the project directory", .path.display())]
    ReferenceEscape { path: PathBuf },

    #[error("shell program '{program}' is not allowed in safe-run mode")]
    ShellProgram { program: String },
}

/// Taxonomy kind used by propagation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    RuleResolution,
    ArgumentEvaluation,
    MaxLoopsExceeded,
    Graph,
    SafeRun,
    Io,
}

#[derive(Debug, Error)]
pub enum DroverError {
    #[error("{}: {source}", .file.display())]
    Parse {
        file: PathBuf,
        #[source]
        source: ParseError,
    },

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error("loop bound of {max_loops} iterations exceeded")]
    MaxLoopsExceeded { max_loops: u32 },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    SafeRun(#[from] SafeRunViolation),

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}, {} {}: directive '{identifier}': {source}", .file.display(), line_label(.lines), display_lines(.lines))]
    Directive {
        file: PathBuf,
        lines: Vec<usize>,
        identifier: String,
        #[source]
        source: Box<DroverError>,
    },
}

impl DroverError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Rule(_) => ErrorKind::RuleResolution,
            Self::Evaluation(_) => ErrorKind::ArgumentEvaluation,
            Self::MaxLoopsExceeded { .. } => ErrorKind::MaxLoopsExceeded,
            Self::Graph(_) => ErrorKind::Graph,
            Self::SafeRun(_) => ErrorKind::SafeRun,
            Self::Io { .. } => ErrorKind::Io,
            Self::Directive { source, .. } => source.kind(),
        }
    }

    /// Errors that end the run regardless of `halt_on_errors`.
    pub fn is_always_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::SafeRun | ErrorKind::Graph)
    }

    /// Attach the originating file, lines, and identifier.
    pub fn in_directive(
        self,
        file: impl Into<PathBuf>,
        lines: &[usize],
        identifier: impl Into<String>,
    ) -> Self {
        Self::Directive {
            file: file.into(),
            lines: lines.to_vec(),
            identifier: identifier.into(),
            source: Box::new(self),
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "no rule paths configured".to_string();
    }
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn line_label(lines: &[usize]) -> &'static str {
    if lines.len() == 1 { "line" } else { "lines" }
}

fn display_lines(lines: &[usize]) -> String {
    lines
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
