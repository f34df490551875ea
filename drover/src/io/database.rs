//! Change database: file path to CRC32 of its contents, persisted as YAML.
//!
//! The file is a single tagged mapping:
//!
//! ```yaml
//! !database
//! /work/doc.aux: 2768625435
//! ```
//!
//! A missing file is an empty database.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::path::normalize;

#[derive(Debug, Serialize, Deserialize)]
enum Document {
    #[serde(rename = "database")]
    Database(BTreeMap<String, u32>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Database {
    entries: BTreeMap<String, u32>,
}

impl Database {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let Document::Database(entries) = serde_yaml::from_str(&contents)
            .with_context(|| format!("parse change database {}", path.display()))?;
        debug!(entries = entries.len(), path = %path.display(), "change database loaded");
        Ok(Self { entries })
    }

    /// Atomically write the database (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_yaml::to_string(&Document::Database(self.entries.clone()))
            .context("serialize change database")?;
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let tmp_path = path.with_extension("yaml.tmp");
        fs::write(&tmp_path, contents)
            .with_context(|| format!("write temp database {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path)
            .with_context(|| format!("replace database {}", path.display()))?;
        Ok(())
    }

    /// Whether `file` differs from the recorded checksum, recording the new one.
    ///
    /// A file seen for the first time counts as changed. A missing file that
    /// still has an entry counts as changed once, and its entry is dropped.
    pub fn changed(&mut self, file: &Path) -> Result<bool> {
        let target = normalized_key(file)?;
        let key = target.to_string_lossy().into_owned();
        if !target.exists() {
            return Ok(self.entries.remove(&key).is_some());
        }
        let sum = checksum(&target)?;
        match self.entries.insert(key, sum) {
            Some(previous) => Ok(previous != sum),
            None => Ok(true),
        }
    }

    pub fn get(&self, file: &Path) -> Option<u32> {
        let key = normalized_key(file).ok()?;
        self.entries.get(&*key.to_string_lossy()).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// CRC32 of a file's contents.
pub fn checksum(file: &Path) -> Result<u32> {
    let bytes = fs::read(file).with_context(|| format!("read {}", file.display()))?;
    Ok(crc32fast::hash(&bytes))
}

/// Absolute, normalized form used as the database key.
pub fn normalized_key(file: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(file)
        .with_context(|| format!("resolve absolute path of {}", file.display()))?;
    Ok(normalize(&absolute))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty_database() {
        let temp = tempfile::tempdir().expect("tempdir");
        let db = Database::load(&temp.path().join("drover.yaml")).expect("load");
        assert!(db.is_empty());
    }

    #[test]
    fn first_sight_is_a_change_then_stable_until_edited() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = temp.path().join("doc.aux");
        fs::write(&file, "one").expect("write");

        let mut db = Database::default();
        assert!(db.changed(&file).expect("first"));
        assert!(!db.changed(&file).expect("unchanged"));
        fs::write(&file, "two").expect("rewrite");
        assert!(db.changed(&file).expect("edited"));
        assert_eq!(db.get(&file), Some(crc32fast::hash(b"two")));
    }

    #[test]
    fn removed_file_reports_change_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = temp.path().join("doc.aux");
        fs::write(&file, "one").expect("write");

        let mut db = Database::default();
        db.changed(&file).expect("record");
        fs::remove_file(&file).expect("remove");
        assert!(db.changed(&file).expect("removed"));
        assert!(!db.changed(&file).expect("still removed"));
        assert!(db.is_empty());
    }

    #[test]
    fn save_then_load_keeps_entries_under_database_tag() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = temp.path().join("doc.tex");
        fs::write(&file, "\\documentclass{article}").expect("write");
        let db_path = temp.path().join("drover.yaml");

        let mut db = Database::default();
        db.changed(&file).expect("record");
        db.save(&db_path).expect("save");

        let raw = fs::read_to_string(&db_path).expect("read");
        assert!(raw.starts_with("!database"));
        let loaded = Database::load(&db_path).expect("load");
        assert_eq!(loaded, db);
    }

    #[test]
    fn keys_are_normalized() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = temp.path().join("doc.aux");
        fs::write(&file, "x").expect("write");
        let dotted = temp.path().join("sub").join("..").join("doc.aux");

        let mut db = Database::default();
        db.changed(&file).expect("record");
        assert!(!db.changed(&dotted).expect("same file"));
        assert_eq!(db.len(), 1);
    }
}
