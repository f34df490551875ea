//! Project definitions: the implicit command-line project or a TOML project list.
//!
//! ```toml
//! [[project]]
//! name = "manual"
//! workdir = "doc"
//! depends_on = ["figures"]
//!
//! [[project.file]]
//! path = "manual.tex"
//! priority = 1
//! ```

use std::collections::{BTreeSet, HashSet};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::debug;

use crate::core::path::resolve_under;
use crate::core::types::{FileType, Project, ProjectFile};

/// Name given to the project built from command-line files.
pub const IMPLICIT_PROJECT: &str = "main";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectList {
    #[serde(default)]
    project: Vec<ProjectEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectEntry {
    name: String,
    #[serde(default)]
    workdir: Option<PathBuf>,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default, rename = "file")]
    files: Vec<FileEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileEntry {
    path: PathBuf,
    #[serde(default)]
    priority: i32,
    #[serde(default)]
    directives: Option<Vec<String>>,
}

/// Build the single project formed by files named on the command line.
///
/// Files run in the order given: earlier files get higher priorities.
pub fn implicit_project(files: &[PathBuf], workdir: &Path, types: &[FileType]) -> Result<Project> {
    if files.is_empty() {
        bail!("no input files given");
    }
    let count = i32::try_from(files.len()).context("too many input files")?;
    let mut project_files = Vec::with_capacity(files.len());
    for (index, file) in (0..count).zip(files) {
        let (path, file_type) = resolve_file(workdir, file, types, false)?;
        project_files.push(ProjectFile {
            path,
            file_type,
            priority: count - index,
            directives: None,
        });
    }
    check_unique_files(IMPLICIT_PROJECT, workdir, &project_files)?;
    Ok(Project {
        name: IMPLICIT_PROJECT.to_string(),
        workdir: workdir.to_path_buf(),
        files: project_files,
        dependencies: BTreeSet::new(),
    })
}

/// Load a TOML project list. Relative working directories resolve against
/// the list's own directory.
pub fn load_projects(path: &Path, types: &[FileType]) -> Result<Vec<Project>> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let list: ProjectList =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    if list.project.is_empty() {
        bail!("{} declares no projects", path.display());
    }

    let base = path
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let base = std::path::absolute(&base)
        .with_context(|| format!("resolve directory of {}", path.display()))?;

    let mut projects = Vec::with_capacity(list.project.len());
    for entry in list.project {
        let name = entry.name.trim().to_string();
        if name.is_empty() {
            bail!("{}: project with a blank name", path.display());
        }
        let workdir = match &entry.workdir {
            Some(dir) => resolve_under(&base, dir),
            None => base.clone(),
        };
        if entry.files.is_empty() {
            bail!("project '{name}' lists no files");
        }

        let mut files = Vec::with_capacity(entry.files.len());
        for file in entry.files {
            let inline = file.directives.is_some();
            let (resolved, file_type) = resolve_file(&workdir, &file.path, types, inline)
                .with_context(|| format!("project '{name}'"))?;
            files.push(ProjectFile {
                path: resolved,
                file_type,
                priority: file.priority,
                directives: file.directives,
            });
        }
        check_unique_files(&name, &workdir, &files)?;
        debug!(project = %name, files = files.len(), "project loaded");
        projects.push(Project {
            name,
            workdir,
            files,
            dependencies: entry
                .depends_on
                .into_iter()
                .map(|dep| dep.trim().to_string())
                .collect(),
        });
    }
    Ok(projects)
}

/// Match a file argument to a file type, appending known extensions when needed.
///
/// A path whose extension is already known is accepted when it exists (or
/// when its directives are declared inline). Otherwise each known extension
/// is tried in order: `doc` finds `doc.tex`, then `doc.dtx`, and so on.
pub fn resolve_file(
    workdir: &Path,
    path: &Path,
    types: &[FileType],
    inline: bool,
) -> Result<(PathBuf, FileType)> {
    let known = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(|ext| types.iter().find(|file_type| file_type.extension == ext));
    if let Some(file_type) = known
        && (inline || resolve_under(workdir, path).is_file())
    {
        return Ok((path.to_path_buf(), file_type.clone()));
    }

    let mut tried = Vec::with_capacity(types.len());
    for file_type in types {
        let mut name = OsString::from(path.as_os_str());
        name.push(".");
        name.push(&file_type.extension);
        let candidate = PathBuf::from(name);
        if resolve_under(workdir, &candidate).is_file() {
            return Ok((candidate, file_type.clone()));
        }
        tried.push(candidate.display().to_string());
    }

    if known.is_some() {
        bail!("file {} not found", path.display());
    }
    bail!(
        "no file matches '{}' (tried: {})",
        path.display(),
        tried.join(", ")
    )
}

fn check_unique_files(project: &str, workdir: &Path, files: &[ProjectFile]) -> Result<()> {
    let mut seen = HashSet::new();
    for file in files {
        if !seen.insert(resolve_under(workdir, &file.path)) {
            bail!(
                "project '{project}' lists {} more than once",
                file.path.display()
            );
        }
    }
    Ok(())
}
