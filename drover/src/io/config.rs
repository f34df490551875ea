//! Run configuration stored in `.drover.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::core::directive::DEFAULT_KEYWORD;
use crate::core::types::{FileType, default_file_types};

/// Configuration file looked up in the invocation directory.
pub const DEFAULT_CONFIG_FILE: &str = ".drover.toml";

/// Run configuration (TOML).
///
/// Every field is optional; missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunConfig {
    /// Upper bound on iterations of a single directive.
    pub max_loops: u32,

    /// Stop the whole run at the first failing directive.
    pub halt_on_errors: bool,

    /// Per-command timeout in seconds; 0 disables it.
    pub timeout_secs: u64,

    /// Ordered rule search path.
    pub rule_paths: Vec<PathBuf>,

    /// Change database file stem (`<name>.yaml`).
    pub database_name: String,

    pub directive_keyword: String,

    /// Only scan the leading comment block of each file.
    pub parse_only_header: bool,

    pub dry_run: bool,
    pub safe_run: bool,

    /// Run independent projects concurrently.
    pub parallel: bool,

    /// Extra file types; an entry with a built-in extension replaces it.
    pub file_types: Vec<FileTypeConfig>,

    /// Named blocks of directive lines runnable before a file's own directives.
    pub preambles: BTreeMap<String, String>,

    /// Programs refused under safe-run because they execute arbitrary input.
    pub shell_programs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileTypeConfig {
    pub extension: String,
    pub pattern: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_loops: 10,
            halt_on_errors: true,
            timeout_secs: 0,
            rule_paths: vec![PathBuf::from("rules")],
            database_name: "drover".to_string(),
            directive_keyword: DEFAULT_KEYWORD.to_string(),
            parse_only_header: false,
            dry_run: false,
            safe_run: false,
            parallel: false,
            file_types: Vec::new(),
            preambles: BTreeMap::new(),
            shell_programs: ["sh", "bash", "zsh", "cmd", "powershell", "pwsh"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Values given on the command line; `None`/`false` keeps the configured value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub max_loops: Option<u32>,
    pub halt_on_errors: Option<bool>,
    pub timeout_secs: Option<u64>,
    pub parse_only_header: bool,
    pub dry_run: bool,
    pub safe_run: bool,
    pub parallel: bool,
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_loops == 0 {
            return Err(anyhow!("max_loops must be > 0"));
        }
        if self.directive_keyword.trim().is_empty() {
            return Err(anyhow!("directive_keyword must not be blank"));
        }
        if self.database_name.trim().is_empty() {
            return Err(anyhow!("database_name must not be blank"));
        }
        if self.rule_paths.is_empty() {
            return Err(anyhow!("rule_paths must list at least one directory"));
        }
        for (name, text) in &self.preambles {
            if text.trim().is_empty() {
                bail!("preamble '{name}' is empty");
            }
        }
        self.file_types()?;
        Ok(())
    }

    /// Built-in file types merged with configured ones, in lookup order.
    pub fn file_types(&self) -> Result<Vec<FileType>> {
        let mut types = default_file_types();
        for entry in &self.file_types {
            let extension = entry.extension.trim().trim_start_matches('.');
            if extension.is_empty() {
                bail!("file type extension must not be blank");
            }
            let file_type = FileType::new(extension, &entry.pattern)
                .with_context(|| format!("file type '{extension}' has an invalid pattern"))?;
            match types.iter_mut().find(|known| **known == file_type) {
                Some(known) => *known = file_type,
                None => types.push(file_type),
            }
        }
        Ok(types)
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    /// Location of the change database for a run started in `base`.
    pub fn database_path(&self, base: &Path) -> PathBuf {
        base.join(format!("{}.yaml", self.database_name.trim()))
    }

    /// Rule search path with relative entries anchored at `base`.
    pub fn rule_search_paths(&self, base: &Path) -> Vec<PathBuf> {
        self.rule_paths
            .iter()
            .map(|path| crate::core::path::resolve_under(base, path))
            .collect()
    }

    /// Apply command-line overrides and re-validate.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) -> Result<()> {
        if let Some(max_loops) = overrides.max_loops {
            self.max_loops = max_loops;
        }
        if let Some(halt) = overrides.halt_on_errors {
            self.halt_on_errors = halt;
        }
        if let Some(timeout) = overrides.timeout_secs {
            self.timeout_secs = timeout;
        }
        self.parse_only_header |= overrides.parse_only_header;
        self.dry_run |= overrides.dry_run;
        self.safe_run |= overrides.safe_run;
        self.parallel |= overrides.parallel;
        self.validate().context("invalid configuration after command-line overrides")
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunConfig> {
    if !path.exists() {
        let cfg = RunConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}
