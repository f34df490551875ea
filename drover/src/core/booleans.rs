//! Boolean spellings accepted in directive parameters.

use crate::error::InvalidBoolean;

const TRUTHY: [&str; 4] = ["yes", "true", "1", "on"];
const FALSY: [&str; 4] = ["no", "false", "0", "off"];

/// Interpret a user-supplied string as a boolean, case-insensitively.
pub fn check_boolean(value: &str) -> Result<bool, InvalidBoolean> {
    let lowered = value.trim().to_lowercase();
    if TRUTHY.contains(&lowered.as_str()) {
        return Ok(true);
    }
    if FALSY.contains(&lowered.as_str()) {
        return Ok(false);
    }
    Err(InvalidBoolean {
        value: value.to_string(),
    })
}

/// Interpret a parameter value (string, bool, or number) as a boolean.
pub fn check_boolean_value(value: &serde_json::Value) -> Result<bool, InvalidBoolean> {
    match value {
        serde_json::Value::Bool(flag) => Ok(*flag),
        serde_json::Value::String(text) => check_boolean(text),
        serde_json::Value::Number(number) => check_boolean(&number.to_string()),
        other => Err(InvalidBoolean {
            value: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_mixed_case_spellings() {
        assert!(check_boolean("Yes").expect("yes"));
        assert!(check_boolean("ON").expect("on"));
        assert!(!check_boolean("0").expect("0"));
        assert!(!check_boolean(" off ").expect("off"));
    }

    #[test]
    fn rejects_unknown_spelling() {
        let err = check_boolean("quack").expect_err("quack is not a boolean");
        assert_eq!(err.value, "quack");
    }

    #[test]
    fn values_follow_string_rules() {
        assert!(check_boolean_value(&serde_json::json!(true)).expect("bool"));
        assert!(check_boolean_value(&serde_json::json!(1)).expect("number"));
        assert!(!check_boolean_value(&serde_json::json!("no")).expect("string"));
        assert!(check_boolean_value(&serde_json::json!([1])).is_err());
    }
}
