//! Where a file's directives come from.
//!
//! Files are scanned by default; a project file may instead declare its
//! directive text inline, and named preambles contribute directives that run
//! before the file's own.

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::directive::{DirectiveSyntax, extract_directives, parse_directive};
use crate::core::types::{Directive, ProjectFile};
use crate::error::DroverError;

pub trait DirectiveSource {
    /// Directives in execution order.
    fn directives(
        &self,
        syntax: &DirectiveSyntax,
        header_only: bool,
    ) -> Result<Vec<Directive>, DroverError>;
}

/// Read the file and extract its directive comments.
#[derive(Debug, Clone, Copy)]
pub struct FileScan<'a> {
    pub path: &'a Path,
}

impl DirectiveSource for FileScan<'_> {
    fn directives(
        &self,
        syntax: &DirectiveSyntax,
        header_only: bool,
    ) -> Result<Vec<Directive>, DroverError> {
        let bytes = fs::read(self.path).map_err(|source| DroverError::Io {
            path: self.path.to_path_buf(),
            source,
        })?;
        // Documents in legacy encodings still carry ASCII directive lines.
        let text = String::from_utf8_lossy(&bytes);
        extract_directives(&text, syntax, header_only).map_err(|source| DroverError::Parse {
            file: self.path.to_path_buf(),
            source,
        })
    }
}

/// Directive bodies declared on a project file, one per entry.
///
/// Entries carry no comment prefix or keyword; line numbers are entry positions.
#[derive(Debug, Clone, Copy)]
pub struct Inline<'a> {
    pub origin: &'a Path,
    pub entries: &'a [String],
}

impl DirectiveSource for Inline<'_> {
    fn directives(
        &self,
        _syntax: &DirectiveSyntax,
        _header_only: bool,
    ) -> Result<Vec<Directive>, DroverError> {
        let mut directives = Vec::new();
        for (index, entry) in self.entries.iter().enumerate() {
            let parsed = parse_directive(entry, vec![index + 1]).map_err(|source| {
                DroverError::Parse {
                    file: self.origin.to_path_buf(),
                    source,
                }
            })?;
            directives.extend(parsed);
        }
        Ok(directives)
    }
}

/// Named block of directive lines written in the file's own comment syntax.
#[derive(Debug, Clone, Copy)]
pub struct Preamble<'a> {
    pub name: &'a str,
    pub text: &'a str,
}

impl DirectiveSource for Preamble<'_> {
    fn directives(
        &self,
        syntax: &DirectiveSyntax,
        _header_only: bool,
    ) -> Result<Vec<Directive>, DroverError> {
        extract_directives(self.text, syntax, false).map_err(|source| DroverError::Parse {
            file: PathBuf::from(format!("preamble '{}'", self.name)),
            source,
        })
    }
}

/// The file's own source: inline entries when declared, otherwise a scan.
pub fn for_file<'a>(path: &'a Path, file: &'a ProjectFile) -> Box<dyn DirectiveSource + 'a> {
    match &file.directives {
        Some(entries) => Box::new(Inline {
            origin: path,
            entries,
        }),
        None => Box::new(FileScan { path }),
    }
}

/// Collect directives from every source in order.
pub fn collect(
    sources: &[Box<dyn DirectiveSource + '_>],
    syntax: &DirectiveSyntax,
    header_only: bool,
) -> Result<Vec<Directive>, DroverError> {
    let mut all = Vec::new();
    for source in sources {
        all.extend(source.directives(syntax, header_only)?);
    }
    Ok(all)
}
