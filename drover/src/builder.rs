//! Turn a validated directive into concrete commands.
//!
//! Each argument is evaluated first (flag expression for provided values,
//! default expression otherwise) and exposed to command templates under its
//! identifier. A command token that is exactly `{{ name }}` for an argument
//! splices that argument's fragments verbatim; any other token is rendered
//! as a template. Tokens that render empty are dropped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::path::resolve_under;
use crate::core::resolution::{ArgumentInput, ResolvedParameters};
use crate::core::types::Rule;
use crate::error::EvaluationError;
use crate::expr::{EvalContext, Evaluator};

/// One command ready for the process layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableCommand {
    pub name: Option<String>,
    pub argv: Vec<String>,
    pub workdir: PathBuf,
    /// Success expression over `value`; `None` means exit code 0.
    pub exit: Option<String>,
}

impl ExecutableCommand {
    /// Space-joined argv for display.
    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}

/// Build every command of `rule`, in declaration order.
pub fn build(
    rule: &Rule,
    resolved: &ResolvedParameters,
    evaluator: &dyn Evaluator,
    base: &EvalContext,
    project_dir: &Path,
) -> Result<Vec<ExecutableCommand>, EvaluationError> {
    let mut context = base.clone();
    context.insert(
        "parameters".to_string(),
        serde_json::to_value(&resolved.parameters).unwrap_or(serde_json::Value::Null),
    );

    let mut fragments: HashMap<&str, Vec<String>> = HashMap::new();
    for argument in &resolved.arguments {
        let declared = rule.argument(&argument.identifier);
        let tokens = match &argument.input {
            ArgumentInput::Provided(value) => match declared.and_then(|arg| arg.flag.as_deref()) {
                Some(flag) => {
                    let mut scoped = context.clone();
                    scoped.insert("value".to_string(), value.clone());
                    evaluate_argument(evaluator, &argument.identifier, flag, &scoped)?
                }
                None => json_tokens(value),
            },
            ArgumentInput::Default(expression) => {
                evaluate_argument(evaluator, &argument.identifier, expression, &context)?
            }
            ArgumentInput::Absent => Vec::new(),
        };
        debug!(argument = %argument.identifier, ?tokens, "argument evaluated");
        context.insert(
            argument.identifier.clone(),
            serde_json::Value::String(tokens.join(" ")),
        );
        fragments.insert(argument.identifier.as_str(), tokens);
    }

    let mut commands = Vec::with_capacity(rule.commands.len());
    for command in &rule.commands {
        let mut argv = Vec::with_capacity(command.command.len());
        for token in &command.command {
            if let Some(spliced) = splice_target(token).and_then(|name| fragments.get(name)) {
                argv.extend(spliced.iter().filter(|t| !t.trim().is_empty()).cloned());
                continue;
            }
            let rendered = render(evaluator, token, &context)?;
            if !rendered.trim().is_empty() {
                argv.push(rendered);
            }
        }

        let workdir = match &command.workdir {
            Some(template) => {
                let rendered = render(evaluator, template, &context)?;
                resolve_under(project_dir, Path::new(rendered.trim()))
            }
            None => project_dir.to_path_buf(),
        };

        commands.push(ExecutableCommand {
            name: command.name.clone(),
            argv,
            workdir,
            exit: command.exit.clone(),
        });
    }
    Ok(commands)
}

fn evaluate_argument(
    evaluator: &dyn Evaluator,
    identifier: &str,
    expression: &str,
    context: &EvalContext,
) -> Result<Vec<String>, EvaluationError> {
    evaluator
        .evaluate(expression, context)
        .map(crate::expr::Value::into_tokens)
        .map_err(|source| EvaluationError::Argument {
            argument: identifier.to_string(),
            expression: expression.to_string(),
            source,
        })
}

fn render(
    evaluator: &dyn Evaluator,
    template: &str,
    context: &EvalContext,
) -> Result<String, EvaluationError> {
    evaluator
        .render(template, context)
        .map_err(|source| EvaluationError::Template {
            template: template.to_string(),
            source,
        })
}

/// Argument name when `token` is exactly `{{ name }}`.
fn splice_target(token: &str) -> Option<&str> {
    let inner = token.trim().strip_prefix("{{")?.strip_suffix("}}")?.trim();
    let valid = !inner.is_empty() && inner.chars().all(|c| c.is_alphanumeric() || c == '_');
    valid.then_some(inner)
}

/// Fragments for a directive value used without a flag expression.
fn json_tokens(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::Null => Vec::new(),
        serde_json::Value::String(text) => vec![text.clone()],
        serde_json::Value::Array(items) => items.iter().flat_map(json_tokens).collect(),
        other => vec![other.to_string()],
    }
}
