//! Expression evaluation for conditionals, argument flags, and command templates.
//!
//! The engine sits behind [`Evaluator`]; [`JinjaEvaluator`] is the default,
//! using minijinja expression syntax extended with C-style `&&`, `||`, and `!`
//! plus a set of file, change-database, and session functions.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use minijinja::value::ValueKind;
use minijinja::{Environment, ErrorKind, State};
use regex::Regex;
use tracing::{debug, warn};

use crate::core::booleans::{check_boolean, check_boolean_value};
use crate::core::session::Session;
use crate::error::{EvaluationError, ExpressionFault};
use crate::io::database::Database;

/// Variables visible to expressions and templates.
pub type EvalContext = BTreeMap<String, serde_json::Value>;

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    Text(String),
    List(Vec<String>),
}

impl Value {
    /// Command-line fragments for this value; empty text yields none.
    pub fn into_tokens(self) -> Vec<String> {
        match self {
            Self::Bool(flag) => vec![flag.to_string()],
            Self::Text(text) if text.is_empty() => Vec::new(),
            Self::Text(text) => vec![text],
            Self::List(items) => items,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Bool(flag) => format!("boolean {flag}"),
            Self::Text(text) => format!("text '{text}'"),
            Self::List(items) => format!("a list of {} items", items.len()),
        }
    }
}

/// Pluggable expression engine.
pub trait Evaluator: Sync {
    fn evaluate(&self, expression: &str, context: &EvalContext) -> Result<Value, ExpressionFault>;

    fn render(&self, template: &str, context: &EvalContext) -> Result<String, ExpressionFault>;
}

/// Evaluate a conditional expression to a boolean.
///
/// Text results go through [`check_boolean`], so `"yes"` and `"off"` work.
pub fn evaluate_condition(
    evaluator: &dyn Evaluator,
    expression: &str,
    context: &EvalContext,
) -> Result<bool, EvaluationError> {
    let value = evaluator
        .evaluate(expression, context)
        .map_err(|source| EvaluationError::Conditional {
            expression: expression.to_string(),
            source,
        })?;
    match value {
        Value::Bool(flag) => Ok(flag),
        Value::Text(ref text) => check_boolean(text).map_err(|_| EvaluationError::NotBoolean {
            expression: expression.to_string(),
            found: value.describe(),
        }),
        Value::List(_) => Err(EvaluationError::NotBoolean {
            expression: expression.to_string(),
            found: value.describe(),
        }),
    }
}

/// Change database and session shared by every directive of a run.
#[derive(Debug, Clone)]
pub struct SharedState {
    database: Arc<Mutex<Database>>,
    database_path: PathBuf,
    session: Arc<Mutex<Session>>,
}

impl SharedState {
    pub fn new(database: Database, database_path: PathBuf) -> Self {
        Self {
            database: Arc::new(Mutex::new(database)),
            database_path,
            session: Arc::new(Mutex::new(Session::new())),
        }
    }

    pub fn database(&self) -> MutexGuard<'_, Database> {
        self.database.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    /// Record `file` in the change database and persist it.
    fn file_changed(&self, file: &Path) -> Result<bool, minijinja::Error> {
        let mut database = self.database();
        let changed = database.changed(file).map_err(invalid_operation)?;
        database
            .save(&self.database_path)
            .map_err(invalid_operation)?;
        debug!(file = %file.display(), changed, "change database consulted");
        Ok(changed)
    }
}

/// Default evaluator backed by minijinja.
pub struct JinjaEvaluator {
    env: Environment<'static>,
}

impl std::fmt::Debug for JinjaEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JinjaEvaluator").finish_non_exhaustive()
    }
}

impl JinjaEvaluator {
    pub fn new(shared: SharedState) -> Self {
        let mut env = Environment::new();
        register_file_functions(&mut env, &shared);
        register_value_functions(&mut env);
        register_session_functions(&mut env, &shared);
        Self { env }
    }
}

impl Evaluator for JinjaEvaluator {
    fn evaluate(&self, expression: &str, context: &EvalContext) -> Result<Value, ExpressionFault> {
        let rewritten = rewrite_operators(expression);
        let compiled = self.env.compile_expression(&rewritten)?;
        let value = compiled.eval(context)?;
        Ok(from_jinja(&value))
    }

    fn render(&self, template: &str, context: &EvalContext) -> Result<String, ExpressionFault> {
        Ok(self.env.render_str(template, context)?)
    }
}

fn from_jinja(value: &minijinja::Value) -> Value {
    match value.kind() {
        ValueKind::Bool => Value::Bool(value.is_true()),
        ValueKind::Undefined | ValueKind::None => Value::Text(String::new()),
        ValueKind::String => Value::Text(value.as_str().unwrap_or_default().to_string()),
        ValueKind::Seq | ValueKind::Iterable => match value.try_iter() {
            Ok(items) => Value::List(
                items
                    .filter(|item| !item.is_none() && !item.is_undefined())
                    .map(|item| match item.as_str() {
                        Some(text) => text.to_string(),
                        None => item.to_string(),
                    })
                    .collect(),
            ),
            Err(_) => Value::Text(value.to_string()),
        },
        _ => Value::Text(value.to_string()),
    }
}

/// Rewrite `&&`, `||`, and `!` (but not `!=`) outside string literals.
pub fn rewrite_operators(expression: &str) -> String {
    let mut out = String::with_capacity(expression.len() + 8);
    let mut chars = expression.chars().peekable();
    let mut quote: Option<char> = None;
    while let Some(ch) = chars.next() {
        if let Some(open) = quote {
            out.push(ch);
            if ch == '\\' {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            } else if ch == open {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => {
                quote = Some(ch);
                out.push(ch);
            }
            '&' if chars.peek() == Some(&'&') => {
                chars.next();
                out.push_str(" and ");
            }
            '|' if chars.peek() == Some(&'|') => {
                chars.next();
                out.push_str(" or ");
            }
            '!' if chars.peek() != Some(&'=') => out.push_str(" not "),
            _ => out.push(ch),
        }
    }
    out
}

fn invalid_operation(err: impl std::fmt::Display) -> minijinja::Error {
    minijinja::Error::new(ErrorKind::InvalidOperation, format!("{err:#}"))
}

fn lookup_path(state: &State<'_, '_>, name: &str) -> Option<PathBuf> {
    state
        .lookup(name)
        .and_then(|value| value.as_str().map(PathBuf::from))
}

/// File named by a function argument.
///
/// An argument without a dot or path separator is an extension: `"pdf"` means
/// the current reference file's base name with `.pdf`. Anything else is a
/// path relative to the working directory.
fn target_file(state: &State<'_, '_>, name: &str) -> PathBuf {
    let workdir = lookup_path(state, "workdir").unwrap_or_else(|| PathBuf::from("."));
    let is_extension = !name.contains(['.', '/', '\\']);
    if is_extension
        && let Some(reference) = lookup_path(state, "reference")
        && let Some(stem) = reference.file_stem()
    {
        let mut file_name = stem.to_os_string();
        file_name.push(".");
        file_name.push(name);
        let dir = reference
            .parent()
            .map_or_else(|| workdir.clone(), Path::to_path_buf);
        return workdir.join(dir).join(file_name);
    }
    workdir.join(name)
}

fn register_file_functions(env: &mut Environment<'static>, shared: &SharedState) {
    env.add_function("exists", |state: &State, name: String| {
        target_file(state, &name).exists()
    });
    env.add_function("missing", |state: &State, name: String| {
        !target_file(state, &name).exists()
    });

    let db = shared.clone();
    env.add_function(
        "changed",
        move |state: &State, name: String| -> Result<bool, minijinja::Error> {
            db.file_changed(&target_file(state, &name))
        },
    );
    let db = shared.clone();
    env.add_function(
        "unchanged",
        move |state: &State, name: String| -> Result<bool, minijinja::Error> {
            db.file_changed(&target_file(state, &name)).map(|changed| !changed)
        },
    );

    env.add_function(
        "found",
        |state: &State, name: String, pattern: String| -> Result<bool, minijinja::Error> {
            let regex = Regex::new(&pattern).map_err(invalid_operation)?;
            let file = target_file(state, &name);
            match fs::read(&file) {
                Ok(bytes) => Ok(regex.is_match(&String::from_utf8_lossy(&bytes))),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(err) => {
                    warn!(file = %file.display(), err = %err, "cannot read file for found()");
                    Err(invalid_operation(format!("read {}: {err}", file.display())))
                }
            }
        },
    );
}

fn truthiness(value: &minijinja::Value) -> Result<bool, minijinja::Error> {
    use serde_json::Value as Json;
    match serde_json::to_value(value) {
        Ok(json @ (Json::Bool(_) | Json::String(_) | Json::Number(_))) => {
            check_boolean_value(&json).map_err(invalid_operation)
        }
        _ => Ok(value.is_true()),
    }
}

fn emptiness(value: &minijinja::Value) -> bool {
    if value.is_undefined() || value.is_none() {
        return true;
    }
    match value.as_str() {
        Some(text) => text.trim().is_empty(),
        None => value.len() == Some(0),
    }
}

fn register_value_functions(env: &mut Environment<'static>) {
    env.add_function("is_true", |value: minijinja::Value| truthiness(&value));
    env.add_function("is_false", |value: minijinja::Value| {
        truthiness(&value).map(|flag| !flag)
    });
    env.add_function("is_empty", |value: minijinja::Value| emptiness(&value));
    env.add_function("is_not_empty", |value: minijinja::Value| !emptiness(&value));
}

fn register_session_functions(env: &mut Environment<'static>, shared: &SharedState) {
    let state = shared.clone();
    env.add_function(
        "session_get",
        move |key: String| -> Result<minijinja::Value, minijinja::Error> {
            let session = state.session();
            let value = session.get(&key).map_err(invalid_operation)?;
            Ok(minijinja::Value::from_serialize(value))
        },
    );
    let state = shared.clone();
    env.add_function(
        "session_put",
        move |key: String, value: minijinja::Value| -> Result<String, minijinja::Error> {
            let json = serde_json::to_value(&value).map_err(invalid_operation)?;
            state.session().put(key, json);
            Ok(String::new())
        },
    );
    let state = shared.clone();
    env.add_function("session_contains", move |key: String| {
        state.session().contains(&key)
    });
    let state = shared.clone();
    env.add_function(
        "session_remove",
        move |key: String| -> Result<minijinja::Value, minijinja::Error> {
            let removed = state.session().remove(&key).map_err(invalid_operation)?;
            Ok(minijinja::Value::from_serialize(&removed))
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn evaluator(dir: &Path) -> (JinjaEvaluator, SharedState) {
        let shared = SharedState::new(Database::default(), dir.join("drover.yaml"));
        (JinjaEvaluator::new(shared.clone()), shared)
    }

    fn context(dir: &Path) -> EvalContext {
        let mut ctx = EvalContext::new();
        ctx.insert("workdir".into(), json!(dir.to_string_lossy()));
        ctx.insert("reference".into(), json!(dir.join("main.tex").to_string_lossy()));
        ctx.insert("basename".into(), json!("main"));
        ctx
    }

    fn condition(eval: &JinjaEvaluator, expression: &str, ctx: &EvalContext) -> bool {
        evaluate_condition(eval, expression, ctx).expect("condition")
    }

    #[test]
    fn c_style_operators_are_rewritten_outside_strings() {
        assert_eq!(rewrite_operators("a && !b"), "a  and   not b");
        assert_eq!(rewrite_operators("a || b != c"), "a  or  b != c");
        assert_eq!(rewrite_operators("found('log', 'a && !b')"), "found('log', 'a && !b')");
    }

    #[test]
    fn missing_and_exists_resolve_extensions_against_reference() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (eval, _) = evaluator(temp.path());
        let ctx = context(temp.path());
        assert!(condition(&eval, "missing(\"main.aux\")", &ctx));
        assert!(condition(&eval, "missing('aux')", &ctx));
        fs::write(temp.path().join("main.aux"), "x").expect("write");
        assert!(condition(&eval, "exists('aux') && !missing('main.aux')", &ctx));
    }

    #[test]
    fn found_searches_file_contents() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (eval, _) = evaluator(temp.path());
        let ctx = context(temp.path());
        assert!(!condition(&eval, "found('log', 'Rerun')", &ctx));
        fs::write(temp.path().join("main.log"), "LaTeX Warning: Rerun to get").expect("write");
        assert!(condition(&eval, "found('log', 'Rerun to')", &ctx));
        assert!(evaluate_condition(&eval, "found('log', '(')", &ctx).is_err());
    }

    #[test]
    fn changed_updates_and_persists_the_database() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (eval, shared) = evaluator(temp.path());
        let ctx = context(temp.path());
        fs::write(temp.path().join("main.tex"), "v1").expect("write");
        assert!(condition(&eval, "changed('tex')", &ctx));
        assert!(condition(&eval, "unchanged('tex')", &ctx));
        assert!(shared.database_path().exists());
        assert_eq!(shared.database().len(), 1);
    }

    #[test]
    fn session_functions_share_values_between_evaluations() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (eval, shared) = evaluator(temp.path());
        let ctx = context(temp.path());
        eval.evaluate("session_put('engine', 'lualatex')", &ctx)
            .expect("put");
        assert!(condition(&eval, "session_contains('engine')", &ctx));
        assert_eq!(
            eval.evaluate("session_get('engine')", &ctx).expect("get"),
            Value::Text("lualatex".to_string())
        );
        assert_eq!(shared.session().get("engine"), Ok(&json!("lualatex")));
        eval.evaluate("session_remove('engine')", &ctx).expect("remove");
        assert!(eval.evaluate("session_get('engine')", &ctx).is_err());
    }

    #[test]
    fn text_results_accept_boolean_spellings() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (eval, _) = evaluator(temp.path());
        let mut ctx = context(temp.path());
        ctx.insert("shell".into(), json!("yes"));
        assert!(condition(&eval, "shell", &ctx));
        assert!(condition(&eval, "is_true(shell)", &ctx));
        ctx.insert("shell".into(), json!("quack"));
        assert!(matches!(
            evaluate_condition(&eval, "shell", &ctx),
            Err(EvaluationError::NotBoolean { .. })
        ));
    }

    #[test]
    fn lists_and_emptiness() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (eval, _) = evaluator(temp.path());
        let ctx = context(temp.path());
        assert_eq!(
            eval.evaluate("['-a', '-b']", &ctx).expect("list"),
            Value::List(vec!["-a".to_string(), "-b".to_string()])
        );
        assert!(condition(&eval, "is_empty(nothing) && is_not_empty(basename)", &ctx));
        assert_eq!(
            eval.render("{{ basename }}.pdf", &ctx).expect("render"),
            "main.pdf"
        );
    }

    #[test]
    fn syntax_errors_surface_as_conditional_errors() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (eval, _) = evaluator(temp.path());
        let err = evaluate_condition(&eval, "missing(", &context(temp.path())).expect_err("syntax");
        assert!(matches!(err, EvaluationError::Conditional { .. }));
    }
}
