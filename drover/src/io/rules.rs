//! Rule file lookup and loading.
//!
//! Rules live in `<identifier>.yaml` files under the configured search path.
//! The first directory containing a match wins, and each rule is read at most
//! once per run.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, instrument};

use crate::core::resolution::RESERVED_KEYS;
use crate::core::types::Rule;
use crate::error::RuleError;

pub const RULE_EXTENSION: &str = "yaml";

/// Rule search path plus a per-run cache of loaded rules.
#[derive(Debug, Default)]
pub struct RuleRegistry {
    search_paths: Vec<PathBuf>,
    cache: Mutex<HashMap<String, Arc<Rule>>>,
}

impl RuleRegistry {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self {
            search_paths,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Find and load the rule named `identifier`, reusing earlier loads.
    #[instrument(skip(self))]
    pub fn resolve(&self, identifier: &str) -> Result<Arc<Rule>, RuleError> {
        // Held across the load so concurrent projects never read a rule twice.
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(rule) = cache.get(identifier) {
            return Ok(Arc::clone(rule));
        }

        for dir in &self.search_paths {
            let path = dir.join(format!("{identifier}.{RULE_EXTENSION}"));
            if !path.is_file() {
                continue;
            }
            let rule = Arc::new(load_rule(&path)?);
            debug!(path = %path.display(), "rule loaded");
            cache.insert(identifier.to_string(), Arc::clone(&rule));
            return Ok(rule);
        }

        Err(RuleError::NotFound {
            identifier: identifier.to_string(),
            searched: self.search_paths.clone(),
        })
    }

    /// Number of distinct rules loaded so far.
    pub fn loaded(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Read, parse, and validate one rule file.
pub fn load_rule(path: &Path) -> Result<Rule, RuleError> {
    let contents = fs::read_to_string(path).map_err(|source| RuleError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let rule: Rule = serde_yaml::from_str(&contents).map_err(|err| RuleError::Invalid {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    validate_rule(&rule, path)?;
    Ok(rule)
}

fn validate_rule(rule: &Rule, path: &Path) -> Result<(), RuleError> {
    let invalid = |message: String| RuleError::Invalid {
        path: path.to_path_buf(),
        message,
    };

    let stem = path.file_stem().and_then(|stem| stem.to_str()).unwrap_or_default();
    if rule.identifier != stem {
        return Err(invalid(format!(
            "identifier '{}' does not match file name '{stem}'",
            rule.identifier
        )));
    }
    if rule.commands.is_empty() {
        return Err(invalid("rule declares no commands".to_string()));
    }
    for (index, command) in rule.commands.iter().enumerate() {
        if command.command.iter().all(|token| token.trim().is_empty()) {
            return Err(invalid(format!("command {} is empty", index + 1)));
        }
    }

    let mut seen = HashSet::new();
    for argument in &rule.arguments {
        let identifier = argument.identifier.trim();
        if identifier.is_empty() {
            return Err(invalid("argument with a blank identifier".to_string()));
        }
        if RESERVED_KEYS.contains(&identifier) {
            return Err(invalid(format!("argument '{identifier}' uses a reserved name")));
        }
        if !seen.insert(identifier) {
            return Err(invalid(format!("argument '{identifier}' is declared twice")));
        }
    }
    Ok(())
}
