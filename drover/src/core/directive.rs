//! Directive extraction from source text.
//!
//! A directive line is a comment line (per [`FileType`] pattern) followed by
//! the directive keyword, e.g. `% arara: pdflatex: { shell: yes } if cond`.
//! Lines whose body starts with `-->` continue the directive in progress.

use regex::Regex;
use tracing::debug;

use crate::core::types::{Conditional, Directive, FileType, Parameters};
use crate::error::ParseError;

/// Keyword that introduces a directive after the comment marker.
pub const DEFAULT_KEYWORD: &str = "arara:";

const CONTINUATION: &str = "-->";
const CONDITIONAL_KEYWORDS: [&str; 4] = ["if", "unless", "while", "until"];

/// Compiled line matchers for one file type.
#[derive(Debug, Clone)]
pub struct DirectiveSyntax {
    comment: Regex,
    directive: Regex,
}

impl DirectiveSyntax {
    pub fn new(file_type: &FileType, keyword: &str) -> Result<Self, ParseError> {
        let source = format!(
            r"(?:{}){}(?:\s+(?P<body>.*))?$",
            file_type.pattern.as_str(),
            regex::escape(keyword)
        );
        let directive = Regex::new(&source).map_err(|err| ParseError::InvalidPattern {
            pattern: source.clone(),
            message: err.to_string(),
        })?;
        Ok(Self {
            comment: file_type.pattern.clone(),
            directive,
        })
    }

    /// Body of a directive line (text after the keyword), if the line is one.
    fn directive_body<'l>(&self, line: &'l str) -> Option<&'l str> {
        let caps = self.directive.captures(line)?;
        Some(caps.name("body").map_or("", |m| m.as_str()).trim())
    }

    fn is_comment(&self, line: &str) -> bool {
        self.comment.is_match(line)
    }
}

/// Directive text assembled from one or more consecutive lines.
#[derive(Debug)]
struct RawDirective {
    text: String,
    lines: Vec<usize>,
}

/// Extract every directive from `text` in document order.
///
/// With `header_only`, scanning stops at the first line that is neither blank
/// nor a comment. Any malformed directive aborts extraction for the file.
pub fn extract_directives(
    text: &str,
    syntax: &DirectiveSyntax,
    header_only: bool,
) -> Result<Vec<Directive>, ParseError> {
    let mut assembled: Vec<RawDirective> = Vec::new();
    let mut current: Option<RawDirective> = None;

    for (index, line) in text.lines().enumerate() {
        let number = index + 1;
        match syntax.directive_body(line) {
            Some(body) => {
                if let Some(rest) = body.strip_prefix(CONTINUATION) {
                    let raw = current
                        .as_mut()
                        .filter(|raw| !raw.lines.is_empty())
                        .ok_or(ParseError::OrphanContinuation { line: number })?;
                    raw.text.push(' ');
                    raw.text.push_str(rest.trim());
                    raw.lines.push(number);
                } else {
                    if let Some(done) = current.take() {
                        assembled.push(done);
                    }
                    current = Some(RawDirective {
                        text: body.to_string(),
                        lines: vec![number],
                    });
                }
            }
            None => {
                if let Some(done) = current.take() {
                    assembled.push(done);
                }
                if header_only && !line.trim().is_empty() && !syntax.is_comment(line) {
                    debug!(line = number, "header ended");
                    break;
                }
            }
        }
    }
    if let Some(done) = current.take() {
        assembled.push(done);
    }

    let mut directives = Vec::new();
    for raw in assembled {
        directives.extend(parse_directive(raw.text.trim(), raw.lines)?);
    }
    debug!(count = directives.len(), "directives extracted");
    Ok(directives)
}

/// Parse one assembled directive body, expanding `files` into one directive per file.
pub fn parse_directive(text: &str, lines: Vec<usize>) -> Result<Vec<Directive>, ParseError> {
    let line = lines.first().copied().unwrap_or(0);
    let text = text.trim();

    let ident_len = text
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(text.len());
    if ident_len == 0 {
        return Err(ParseError::EmptyIdentifier { line });
    }
    let identifier = text[..ident_len].to_string();
    let mut rest = text[ident_len..].trim_start();

    let mut parameters = Parameters::new();
    if let Some(after_colon) = rest.strip_prefix(':') {
        let after_colon = after_colon.trim_start();
        if after_colon.starts_with('{') {
            let end = closing_brace(after_colon).ok_or(ParseError::MalformedParameters {
                line,
                message: "unbalanced braces".to_string(),
            })?;
            parameters = parse_parameters(&after_colon[..=end], line)?;
            rest = &after_colon[end + 1..];
        } else {
            rest = after_colon;
        }
    }

    let conditional = parse_conditional(rest.trim(), line)?;

    let base = Directive {
        identifier,
        parameters,
        conditional,
        line_numbers: lines,
    };
    expand_files(base, line)
}

fn parse_conditional(text: &str, line: usize) -> Result<Conditional, ParseError> {
    if text.is_empty() {
        return Ok(Conditional::None);
    }
    let (keyword, expression) = match text.split_once(char::is_whitespace) {
        Some((keyword, expression)) => (keyword, expression.trim()),
        None => (text, ""),
    };
    if !CONDITIONAL_KEYWORDS.contains(&keyword) {
        return Err(ParseError::UnknownConditional {
            line,
            keyword: keyword.to_string(),
        });
    }
    if expression.is_empty() {
        return Err(ParseError::EmptyConditional {
            line,
            keyword: keyword.to_string(),
        });
    }
    Conditional::from_keyword(keyword, expression).ok_or_else(|| ParseError::UnknownConditional {
        line,
        keyword: keyword.to_string(),
    })
}

/// Byte index of the `}` closing the block that starts at index 0.
fn closing_brace(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (index, ch) in text.char_indices() {
        if let Some(open) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' && open == '"' {
                escaped = true;
            } else if ch == open {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => quote = Some(ch),
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return (ch == '}').then_some(index);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_parameters(block: &str, line: usize) -> Result<Parameters, ParseError> {
    let malformed = |message: String| ParseError::MalformedParameters { line, message };
    let value: serde_yaml::Value =
        serde_yaml::from_str(block).map_err(|err| malformed(err.to_string()))?;
    let mapping = match value {
        serde_yaml::Value::Mapping(mapping) => mapping,
        serde_yaml::Value::Null => return Ok(Parameters::new()),
        _ => return Err(malformed("expected a mapping".to_string())),
    };

    let mut parameters = Parameters::new();
    for (key, value) in mapping {
        let key = match key {
            serde_yaml::Value::String(key) => key,
            other => return Err(malformed(format!("key {other:?} is not a string"))),
        };
        let value = serde_json::to_value(&value).map_err(|err| malformed(err.to_string()))?;
        parameters.insert(key, value);
    }
    Ok(parameters)
}

/// Replicate a directive per entry of its `files` list, each with a `reference`.
fn expand_files(mut directive: Directive, line: usize) -> Result<Vec<Directive>, ParseError> {
    let Some(files) = directive.parameters.shift_remove("files") else {
        return Ok(vec![directive]);
    };
    let malformed = || ParseError::MalformedParameters {
        line,
        message: "'files' must be a non-empty list of file names".to_string(),
    };
    let files = files.as_array().filter(|list| !list.is_empty()).ok_or_else(malformed)?;

    let mut expanded = Vec::with_capacity(files.len());
    for file in files {
        let name = file.as_str().ok_or_else(malformed)?;
        let mut copy = directive.clone();
        copy.parameters
            .insert("reference".to_string(), serde_json::Value::from(name));
        expanded.push(copy);
    }
    Ok(expanded)
}
