//! Key/value store shared between directives of a run.
//!
//! Created at run start and cleared at run end. Rules exchange values through
//! it, so every mutation goes through `put`/`remove` and lookups of absent
//! keys are errors rather than silent nulls.

use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session has no key '{key}'")]
    MissingKey { key: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    entries: BTreeMap<String, serde_json::Value>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value, returning the previous one.
    pub fn put(
        &mut self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Option<serde_json::Value> {
        self.entries.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Result<&serde_json::Value, SessionError> {
        self.entries.get(key).ok_or_else(|| SessionError::MissingKey {
            key: key.to_string(),
        })
    }

    pub fn remove(&mut self, key: &str) -> Result<serde_json::Value, SessionError> {
        self.entries
            .remove(key)
            .ok_or_else(|| SessionError::MissingKey {
                key: key.to_string(),
            })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn put_get_remove_cycle() {
        let mut session = Session::new();
        assert_eq!(session.put("engine", json!("lualatex")), None);
        assert!(session.contains("engine"));
        assert_eq!(session.get("engine"), Ok(&json!("lualatex")));
        assert_eq!(session.remove("engine"), Ok(json!("lualatex")));
        assert!(session.is_empty());
    }

    #[test]
    fn absent_keys_are_errors() {
        let mut session = Session::new();
        assert_eq!(
            session.remove("nope"),
            Err(SessionError::MissingKey {
                key: "nope".to_string()
            })
        );
        assert!(session.get("nope").is_err());
    }
}
