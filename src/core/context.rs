//! Template context and `{placeholder}` interpolation.
//!
//! A [`TemplateContext`] is a flat snapshot of the invocation configuration.
//! Every path string handed to the pipeline goes through [`TemplateContext::resolve`],
//! which substitutes placeholders and then runs a strftime pass against the
//! invocation timestamp, so `artifacts/{platform}/%Y-%m-%d` is a valid template.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write as _};

use crate::core::error::{FilesetError, FilesetResult};

/// A scalar configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

/// Immutable key/value mapping used to resolve path templates.
///
/// Extending a context (`with_binding`) returns a new value; the original stays
/// untouched, so a stage can override `destination_root` for itself without
/// affecting the rest of the chain.
#[derive(Debug, Clone)]
pub struct TemplateContext {
    values: BTreeMap<String, Value>,
    // keys that may be overridden even though they currently have no value
    declared: BTreeSet<String>,
    timestamp: DateTime<Local>,
}

impl Default for TemplateContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateContext {
    pub fn new() -> Self {
        Self {
            values: BTreeMap::new(),
            declared: BTreeSet::new(),
            timestamp: Local::now(),
        }
    }

    /// Pins the timestamp used by the time-format pass.
    pub fn with_timestamp(mut self, timestamp: DateTime<Local>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Binds `key` while building the context.
    pub fn bind(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        self.declared.insert(key.clone());
        self.values.insert(key, value.into());
        self
    }

    /// Declares `key` as known without giving it a value.
    pub fn declare(mut self, key: impl Into<String>) -> Self {
        self.declared.insert(key.into());
        self
    }

    /// Returns a copy of this context with `key` bound to `value`.
    pub fn with_binding(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clone().bind(key, value)
    }

    /// Merges explicit `key=value` overrides. Every key must already be known.
    pub fn apply_overrides<K, V>(mut self, overrides: &[(K, V)]) -> FilesetResult<Self>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in overrides {
            let key = key.as_ref();
            if !self.declared.contains(key) {
                return Err(FilesetError::UnknownKey {
                    key: key.to_string(),
                });
            }
            self.values
                .insert(key.to_string(), Value::from(value.as_ref()));
        }
        Ok(self)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn is_declared(&self, key: &str) -> bool {
        self.declared.contains(key)
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    /// Interpolates `template`, then applies the time-format pass.
    ///
    /// Fails with [`FilesetError::Binding`] when a placeholder has no value.
    /// `{{` and `}}` produce literal braces.
    pub fn resolve(&self, template: &str) -> FilesetResult<String> {
        let substituted = self.substitute(template)?;
        self.format_time(template, &substituted)
    }

    fn substitute(&self, template: &str) -> FilesetResult<String> {
        let malformed = |reason: &str| FilesetError::MalformedTemplate {
            template: template.to_string(),
            reason: reason.to_string(),
        };

        let mut out = String::with_capacity(template.len());
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '{' => {
                    let mut key = String::new();
                    let mut closed = false;
                    for k in chars.by_ref() {
                        match k {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => return Err(malformed("nested '{' in placeholder")),
                            _ => key.push(k),
                        }
                    }
                    if !closed {
                        return Err(malformed("unterminated placeholder"));
                    }
                    let key = key.trim();
                    if key.is_empty() {
                        return Err(malformed("empty placeholder"));
                    }
                    let value = self.values.get(key).ok_or_else(|| FilesetError::Binding {
                        key: key.to_string(),
                        template: template.to_string(),
                    })?;
                    // `write!` into a String cannot fail
                    let _ = write!(out, "{value}");
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '}' => return Err(malformed("unmatched '}'")),
                _ => out.push(c),
            }
        }

        Ok(out)
    }

    fn format_time(&self, template: &str, substituted: &str) -> FilesetResult<String> {
        if !substituted.contains('%') {
            return Ok(substituted.to_string());
        }

        let items: Vec<Item<'_>> = StrftimeItems::new(substituted).collect();
        if items.iter().any(|item| matches!(item, Item::Error)) {
            return Err(FilesetError::MalformedTemplate {
                template: template.to_string(),
                reason: "invalid time format specifier".to_string(),
            });
        }

        let mut out = String::with_capacity(substituted.len());
        write!(out, "{}", self.timestamp.format_with_items(items.iter()))
            .map_err(|_| FilesetError::MalformedTemplate {
                template: template.to_string(),
                reason: "time format could not be rendered".to_string(),
            })?;
        Ok(out)
    }
}
