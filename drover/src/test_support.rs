//! Test-only helpers: a scripted command runner and a scratch workspace.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tempfile::TempDir;

use crate::core::types::{FileType, Project, TEX_COMMENT_PATTERN};
use crate::io::config::RunConfig;
use crate::io::process::{CommandOutput, CommandRunner, ProcessFailure, ProcessRequest};
use crate::io::projects::implicit_project;

/// One command seen by [`ScriptedRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub argv: Vec<String>,
    pub workdir: PathBuf,
}

/// Command runner that never spawns anything.
///
/// Exit codes are scripted per program name; once a program's queue is down
/// to its last entry, that entry repeats. Unscripted programs exit 0.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    scripts: Mutex<HashMap<String, VecDeque<i32>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue exit codes for `program`.
    pub fn script(self, program: &str, exit_codes: &[i32]) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(program.to_string(), exit_codes.iter().copied().collect());
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// First argv token of every call, in call order.
    pub fn programs(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| call.argv.into_iter().next())
            .collect()
    }

    fn next_exit_code(&self, program: &str) -> i32 {
        let mut scripts = self.scripts.lock().unwrap_or_else(PoisonError::into_inner);
        match scripts.get_mut(program) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some(queue) => queue.front().copied().unwrap_or_default(),
            None => 0,
        }
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, request: &ProcessRequest<'_>) -> Result<CommandOutput, ProcessFailure> {
        let program = request.argv.first().cloned().unwrap_or_default();
        if request.cancel.is_cancelled() {
            return Err(ProcessFailure::Interrupted { program });
        }
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCall {
                argv: request.argv.to_vec(),
                workdir: request.workdir.to_path_buf(),
            });
        Ok(CommandOutput {
            exit_code: self.next_exit_code(&program),
            output: String::new(),
        })
    }
}

/// Temporary directory laid out like an invocation directory with a
/// `rules/` folder next to the documents.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> io::Result<Self> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("rules"))?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `contents` to `relative`, creating parent directories.
    pub fn write(&self, relative: &str, contents: &str) -> io::Result<PathBuf> {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// Write `rules/<identifier>.yaml`.
    pub fn write_rule(&self, identifier: &str, yaml: &str) -> io::Result<PathBuf> {
        self.write(&format!("rules/{identifier}.yaml"), yaml)
    }

    /// Write a rule that runs `program` followed by the referenced file name.
    pub fn write_simple_rule(&self, identifier: &str, program: &str) -> io::Result<PathBuf> {
        self.write_rule(
            identifier,
            &format!("identifier: {identifier}\ncommands:\n  - command: [\"{program}\", \"{{{{ file }}}}\"]\n"),
        )
    }

    /// Default configuration whose rule path is this workspace's `rules/`.
    pub fn config(&self) -> RunConfig {
        RunConfig {
            rule_paths: vec![self.path().join("rules")],
            ..RunConfig::default()
        }
    }

    /// Implicit project over `files`, relative to the workspace.
    pub fn project(&self, files: &[&str]) -> anyhow::Result<Project> {
        let files: Vec<PathBuf> = files.iter().map(PathBuf::from).collect();
        implicit_project(&files, self.path(), &[tex()])
    }
}

pub fn tex() -> FileType {
    match FileType::new("tex", TEX_COMMENT_PATTERN) {
        Ok(file_type) => file_type,
        Err(err) => panic!("built-in tex pattern: {err}"),
    }
}
