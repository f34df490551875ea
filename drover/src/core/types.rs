//! Shared deterministic types for directive and rule handling.
//!
//! These types define stable contracts between the parser, the resolver, and
//! the interpreter. They do not depend on external state or I/O.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::exit_codes;

/// Directive parameters keyed by argument identifier, in the order written.
pub type Parameters = serde_json::Map<String, serde_json::Value>;

/// Identifier of the reserved control directive.
pub const HALT: &str = "halt";

/// Guard controlling whether and how often a directive runs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Conditional {
    #[default]
    None,
    If(String),
    Unless(String),
    While(String),
    Until(String),
}

impl Conditional {
    /// Build a conditional from its keyword, or `None` for unknown keywords.
    pub fn from_keyword(keyword: &str, expression: impl Into<String>) -> Option<Self> {
        let expression = expression.into();
        match keyword {
            "if" => Some(Self::If(expression)),
            "unless" => Some(Self::Unless(expression)),
            "while" => Some(Self::While(expression)),
            "until" => Some(Self::Until(expression)),
            _ => None,
        }
    }

    pub fn keyword(&self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::If(_) => Some("if"),
            Self::Unless(_) => Some("unless"),
            Self::While(_) => Some("while"),
            Self::Until(_) => Some("until"),
        }
    }

    pub fn expression(&self) -> Option<&str> {
        match self {
            Self::None => None,
            Self::If(expr) | Self::Unless(expr) | Self::While(expr) | Self::Until(expr) => {
                Some(expr)
            }
        }
    }
}

impl fmt::Display for Conditional {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.keyword(), self.expression()) {
            (Some(keyword), Some(expr)) => write!(f, "{keyword} {expr}"),
            _ => Ok(()),
        }
    }
}

/// A logical directive extracted from a source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub identifier: String,
    pub parameters: Parameters,
    pub conditional: Conditional,
    /// 1-based source lines that contributed to this directive (never empty).
    pub line_numbers: Vec<usize>,
}

impl Directive {
    pub fn is_halt(&self) -> bool {
        self.identifier == HALT
    }

    /// File the directive applies to when set through `files`.
    pub fn reference(&self) -> Option<&str> {
        self.parameters.get("reference").and_then(|value| value.as_str())
    }

    /// Textual form accepted by the directive parser (without comment prefix).
    pub fn to_source(&self) -> String {
        let mut buf = self.identifier.clone();
        if !self.parameters.is_empty() {
            let block = serde_json::to_string(&self.parameters).unwrap_or_else(|_| "{}".into());
            buf.push_str(": ");
            buf.push_str(&block);
        }
        if self.conditional != Conditional::None {
            buf.push(' ');
            buf.push_str(&self.conditional.to_string());
        }
        buf
    }
}

/// One command template of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleCommand {
    #[serde(default)]
    pub name: Option<String>,
    /// Argument vector; every token is a template.
    pub command: Vec<String>,
    /// Working directory override template, relative to the project directory.
    #[serde(default)]
    pub workdir: Option<String>,
    /// Success expression over `value` (the exit code). Defaults to `value == 0`.
    #[serde(default)]
    pub exit: Option<String>,
}

/// Declared argument of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleArgument {
    pub identifier: String,
    #[serde(default)]
    pub required: bool,
    /// Expression used when the directive omits this argument.
    #[serde(default)]
    pub default: Option<String>,
    /// Expression turning the provided value into command-line fragments.
    #[serde(default)]
    pub flag: Option<String>,
}

/// Declarative description of external commands and their arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    pub identifier: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    pub commands: Vec<RuleCommand>,
    #[serde(default)]
    pub arguments: Vec<RuleArgument>,
}

impl Rule {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.identifier)
    }

    pub fn argument(&self, identifier: &str) -> Option<&RuleArgument> {
        self.arguments.iter().find(|arg| arg.identifier == identifier)
    }
}

/// File extension plus the comment pattern that opens directive lines.
///
/// Equality and hashing consider the extension only.
#[derive(Debug, Clone)]
pub struct FileType {
    pub extension: String,
    pub pattern: Regex,
}

impl FileType {
    pub fn new(extension: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            extension: extension.into(),
            pattern: Regex::new(pattern)?,
        })
    }
}

impl PartialEq for FileType {
    fn eq(&self, other: &Self) -> bool {
        self.extension == other.extension
    }
}

impl Eq for FileType {}

impl std::hash::Hash for FileType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.extension.hash(state);
    }
}

/// Comment pattern shared by the TeX family of file types.
pub const TEX_COMMENT_PATTERN: &str = r"^\s*%\s+";

/// Built-in file types, in lookup order for extension-less file arguments.
pub fn default_file_types() -> Vec<FileType> {
    ["tex", "dtx", "ltx", "drv", "ins"]
        .into_iter()
        .filter_map(|ext| FileType::new(ext, TEX_COMMENT_PATTERN).ok())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectFile {
    pub path: PathBuf,
    pub file_type: FileType,
    /// Higher runs first within a project.
    pub priority: i32,
    /// Directive text declared directly instead of scanned from the file.
    pub directives: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub name: String,
    pub workdir: PathBuf,
    pub files: Vec<ProjectFile>,
    pub dependencies: BTreeSet<String>,
}

impl Project {
    /// Absolute (or workdir-relative) location of a project file.
    pub fn resolve(&self, file: &ProjectFile) -> PathBuf {
        if file.path.is_absolute() {
            file.path.clone()
        } else {
            self.workdir.join(&file.path)
        }
    }
}

/// Outcome class of a run, mapped to the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    ExternalCallFailed,
    CaughtException,
    Halted(i32),
}

impl ExecutionStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Success => exit_codes::SUCCESS,
            Self::ExternalCallFailed => exit_codes::EXTERNAL_CALL_FAILED,
            Self::CaughtException => exit_codes::CAUGHT_EXCEPTION,
            Self::Halted(code) => code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn file_types_compare_by_extension_only() {
        let a = FileType::new("tex", r"^\s*%\s+").expect("pattern");
        let b = FileType::new("tex", r"^\s*#\s+").expect("pattern");
        let c = FileType::new("dtx", r"^\s*%\s+").expect("pattern");
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<FileType> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn to_source_renders_parameters_and_conditional() {
        let mut parameters = Parameters::new();
        parameters.insert("shell".to_string(), serde_json::json!("yes"));
        let directive = Directive {
            identifier: "pdflatex".to_string(),
            parameters,
            conditional: Conditional::If("missing(\"pdf\")".to_string()),
            line_numbers: vec![1],
        };
        assert_eq!(
            directive.to_source(),
            r#"pdflatex: {"shell":"yes"} if missing("pdf")"#
        );
    }

    #[test]
    fn to_source_keeps_the_written_parameter_order() {
        let mut parameters = Parameters::new();
        parameters.insert("shell".to_string(), serde_json::json!("yes"));
        parameters.insert("engine".to_string(), serde_json::json!("xelatex"));
        parameters.insert("action".to_string(), serde_json::json!("nonstopmode"));
        let directive = Directive {
            identifier: "latexmk".to_string(),
            parameters,
            conditional: Conditional::None,
            line_numbers: vec![1],
        };
        assert_eq!(
            directive.to_source(),
            r#"latexmk: {"shell":"yes","engine":"xelatex","action":"nonstopmode"}"#
        );
    }

    #[test]
    fn halted_status_carries_its_own_code() {
        assert_eq!(ExecutionStatus::Success.exit_code(), 0);
        assert_eq!(ExecutionStatus::ExternalCallFailed.exit_code(), 1);
        assert_eq!(ExecutionStatus::CaughtException.exit_code(), 2);
        assert_eq!(ExecutionStatus::Halted(7).exit_code(), 7);
    }
}
