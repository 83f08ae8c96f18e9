//! The run environment: an ordered variable map with `%key%` substitution.
//!
//! One Environment exists per recipe run and is handed by reference to each
//! step in turn. Substitution is single-pass: substituted text is never
//! scanned again, so a value containing `%other%` is inserted verbatim.

use super::types::{value_to_string, Value};
use indexmap::IndexMap;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors raised while resolving placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    #[error("unresolved variable '%{0}%'")]
    UnresolvedVariable(String),
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"%%|%([A-Za-z0-9_]+)%").expect("placeholder pattern is valid"))
}

/// Ordered mapping of variable names to dynamically typed values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Environment {
    vars: IndexMap<String, Value>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exact lookup, no substitution.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    /// Overwrite semantics; no type checking across writes.
    pub fn set(&mut self, key: &str, value: Value) {
        self.vars.insert(key.to_string(), value);
    }

    /// Overlay every entry of `vars`, later writes winning.
    pub fn extend<'a, I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (&'a String, &'a Value)>,
    {
        for (k, v) in vars {
            self.set(k, v.clone());
        }
    }

    /// Shallow copy used for before/after diffing.
    pub fn snapshot(&self) -> IndexMap<String, Value> {
        self.vars.clone()
    }

    /// Substitute `%key%` placeholders using the current contents.
    ///
    /// `%%` yields a literal `%`. A `%` that does not open a well-formed
    /// placeholder is copied as-is.
    pub fn resolve_string(&self, s: &str) -> Result<String, EnvError> {
        if !s.contains('%') {
            return Ok(s.to_string());
        }

        let mut out = String::with_capacity(s.len());
        let mut last = 0;
        for caps in placeholder_re().captures_iter(s) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&s[last..whole.start()]);
            match caps.get(1) {
                Some(key) => {
                    let value = self
                        .vars
                        .get(key.as_str())
                        .ok_or_else(|| EnvError::UnresolvedVariable(key.as_str().to_string()))?;
                    out.push_str(&value_to_string(value));
                }
                None => out.push('%'),
            }
            last = whole.end();
        }
        out.push_str(&s[last..]);
        Ok(out)
    }

    /// Resolve every string inside `value`, recursing into lists and mappings.
    /// Mapping keys are left untouched.
    pub fn resolve_value(&self, value: &Value) -> Result<Value, EnvError> {
        match value {
            Value::String(s) => Ok(Value::String(self.resolve_string(s)?)),
            Value::Array(items) => items
                .iter()
                .map(|v| self.resolve_value(v))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut resolved = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    resolved.insert(k.clone(), self.resolve_value(v)?);
                }
                Ok(Value::Object(resolved))
            }
            other => Ok(other.clone()),
        }
    }
}

impl From<IndexMap<String, Value>> for Environment {
    fn from(vars: IndexMap<String, Value>) -> Self {
        Self { vars }
    }
}
