//! Validation of directive parameters against a rule's declared arguments.

use crate::core::types::{Directive, Parameters, Rule};
use crate::error::RuleError;

/// Parameter keys handled by the engine itself, never matched against arguments.
pub const RESERVED_KEYS: [&str; 2] = ["files", "reference"];

/// Where an argument's input comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentInput {
    /// The directive supplied a value.
    Provided(serde_json::Value),
    /// Omitted; the rule's default expression applies.
    Default(String),
    /// Omitted, with no default.
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArgument {
    pub identifier: String,
    pub input: ArgumentInput,
}

/// Directive parameters checked against a rule, in argument declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedParameters {
    pub arguments: Vec<ResolvedArgument>,
    /// Raw directive parameters, reserved keys included.
    pub parameters: Parameters,
}

/// Check that every directive key is declared and every required argument is present.
pub fn validate(directive: &Directive, rule: &Rule) -> Result<ResolvedParameters, RuleError> {
    for key in directive.parameters.keys() {
        if RESERVED_KEYS.contains(&key.as_str()) {
            continue;
        }
        if rule.argument(key).is_none() {
            return Err(RuleError::UnknownArgument {
                rule: rule.identifier.clone(),
                argument: key.clone(),
            });
        }
    }

    let mut arguments = Vec::with_capacity(rule.arguments.len());
    for argument in &rule.arguments {
        let input = match directive.parameters.get(&argument.identifier) {
            Some(value) => ArgumentInput::Provided(value.clone()),
            None if argument.required => {
                return Err(RuleError::MissingRequiredArgument {
                    rule: rule.identifier.clone(),
                    argument: argument.identifier.clone(),
                });
            }
            None => match &argument.default {
                Some(default) => ArgumentInput::Default(default.clone()),
                None => ArgumentInput::Absent,
            },
        };
        arguments.push(ResolvedArgument {
            identifier: argument.identifier.clone(),
            input,
        });
    }

    Ok(ResolvedParameters {
        arguments,
        parameters: directive.parameters.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Conditional, RuleArgument, RuleCommand};
    use serde_json::json;

    fn rule() -> Rule {
        Rule {
            identifier: "bibtex".to_string(),
            name: None,
            authors: Vec::new(),
            commands: vec![RuleCommand {
                name: None,
                command: vec!["bibtex".to_string(), "{{ basename }}".to_string()],
                workdir: None,
                exit: None,
            }],
            arguments: vec![
                RuleArgument {
                    identifier: "style".to_string(),
                    required: true,
                    default: None,
                    flag: None,
                },
                RuleArgument {
                    identifier: "options".to_string(),
                    required: false,
                    default: Some("['-terse']".to_string()),
                    flag: None,
                },
                RuleArgument {
                    identifier: "verbose".to_string(),
                    required: false,
                    default: None,
                    flag: None,
                },
            ],
        }
    }

    fn directive(parameters: Parameters) -> Directive {
        Directive {
            identifier: "bibtex".to_string(),
            parameters,
            conditional: Conditional::None,
            line_numbers: vec![1],
        }
    }

    #[test]
    fn fills_defaults_for_omitted_arguments() {
        let mut params = Parameters::new();
        params.insert("style".to_string(), json!("plain"));
        params.insert("reference".to_string(), json!("a.tex"));
        let resolved = validate(&directive(params), &rule()).expect("valid");
        assert_eq!(
            resolved.arguments,
            vec![
                ResolvedArgument {
                    identifier: "style".to_string(),
                    input: ArgumentInput::Provided(json!("plain")),
                },
                ResolvedArgument {
                    identifier: "options".to_string(),
                    input: ArgumentInput::Default("['-terse']".to_string()),
                },
                ResolvedArgument {
                    identifier: "verbose".to_string(),
                    input: ArgumentInput::Absent,
                },
            ]
        );
    }

    #[test]
    fn unknown_argument_is_rejected() {
        let mut params = Parameters::new();
        params.insert("style".to_string(), json!("plain"));
        params.insert("colour".to_string(), json!("red"));
        let err = validate(&directive(params), &rule()).expect_err("unknown");
        assert!(matches!(
            err,
            RuleError::UnknownArgument { ref argument, .. } if argument == "colour"
        ));
    }

    #[test]
    fn missing_required_argument_is_rejected() {
        let err = validate(&directive(Parameters::new()), &rule()).expect_err("missing");
        assert!(matches!(
            err,
            RuleError::MissingRequiredArgument { ref argument, .. } if argument == "style"
        ));
    }
}
