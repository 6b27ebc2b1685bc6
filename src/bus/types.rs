//! Type tags and the validator registry.
//!
//! Every port carries a [`TypeTag`]. Payloads are `serde_json::Value`s and are
//! checked against the tag's predicate (and an optional per-port [`Schema`])
//! before a message is constructed. Predicates are pure and total.

use crate::error::{BusError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Label describing what a port carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TypeTag {
    /// JSON string.
    Text,
    /// JSON object.
    Structured,
    /// JSON array of numbers.
    Vector,
    /// JSON array of byte values (`0..=255`).
    Binary,
    /// Anything, including null.
    #[default]
    Any,
}

impl TypeTag {
    pub const ALL: [TypeTag; 5] = [
        TypeTag::Text,
        TypeTag::Structured,
        TypeTag::Vector,
        TypeTag::Binary,
        TypeTag::Any,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TypeTag::Text => "text",
            TypeTag::Structured => "structured",
            TypeTag::Vector => "vector",
            TypeTag::Binary => "binary",
            TypeTag::Any => "any",
        }
    }

    /// Parse a tag name. Unrecognized names fall back to [`TypeTag::Any`] so
    /// ports can be declared speculatively.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "text" => TypeTag::Text,
            "structured" => TypeTag::Structured,
            "vector" => TypeTag::Vector,
            "binary" => TypeTag::Binary,
            "any" => TypeTag::Any,
            other => {
                tracing::debug!("Unknown type tag '{}', treating as 'any'", other);
                TypeTag::Any
            }
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for TypeTag {
    fn from(name: &str) -> Self {
        TypeTag::parse(name)
    }
}

impl From<String> for TypeTag {
    fn from(name: String) -> Self {
        TypeTag::parse(&name)
    }
}

impl From<TypeTag> for String {
    fn from(tag: TypeTag) -> Self {
        tag.as_str().to_string()
    }
}

/// Optional per-port payload check. Returns `Err(message)` on failure.
pub type Schema = Arc<dyn Fn(&Value) -> std::result::Result<(), String> + Send + Sync>;

/// Build a [`Schema`] from a closure.
pub fn schema<F>(check: F) -> Schema
where
    F: Fn(&Value) -> std::result::Result<(), String> + Send + Sync + 'static,
{
    Arc::new(check)
}

/// Predicate plus a human-readable description of what it expects.
#[derive(Clone, Copy)]
pub struct TypeRule {
    pub predicate: fn(&Value) -> bool,
    pub expected: &'static str,
}

impl fmt::Debug for TypeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRule")
            .field("expected", &self.expected)
            .finish()
    }
}

fn is_text(v: &Value) -> bool {
    v.is_string()
}

fn is_structured(v: &Value) -> bool {
    v.is_object()
}

fn is_vector(v: &Value) -> bool {
    v.as_array()
        .map(|items| items.iter().all(Value::is_number))
        .unwrap_or(false)
}

fn is_binary(v: &Value) -> bool {
    v.as_array()
        .map(|items| {
            items
                .iter()
                .all(|b| b.as_u64().map(|n| n <= u8::MAX as u64).unwrap_or(false))
        })
        .unwrap_or(false)
}

fn is_any(_: &Value) -> bool {
    true
}

const ANY_RULE: TypeRule = TypeRule {
    predicate: is_any,
    expected: "any value",
};

/// Table mapping each tag to its validator. Built once at start-up.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    rules: HashMap<TypeTag, TypeRule>,
}

impl TypeRegistry {
    /// Registry with the built-in predicates.
    pub fn builtin() -> Self {
        let mut rules = HashMap::new();
        rules.insert(
            TypeTag::Text,
            TypeRule {
                predicate: is_text,
                expected: "a string",
            },
        );
        rules.insert(
            TypeTag::Structured,
            TypeRule {
                predicate: is_structured,
                expected: "an object",
            },
        );
        rules.insert(
            TypeTag::Vector,
            TypeRule {
                predicate: is_vector,
                expected: "an array of numbers",
            },
        );
        rules.insert(
            TypeTag::Binary,
            TypeRule {
                predicate: is_binary,
                expected: "an array of byte values",
            },
        );
        rules.insert(TypeTag::Any, ANY_RULE);
        Self { rules }
    }

    /// Replace the predicate for a tag. Intended for start-up configuration.
    pub fn with_rule(mut self, tag: TypeTag, rule: TypeRule) -> Self {
        self.rules.insert(tag, rule);
        self
    }

    /// Rule for a tag; a tag without a rule validates like `any`.
    pub fn rule(&self, tag: TypeTag) -> TypeRule {
        self.rules.get(&tag).copied().unwrap_or(ANY_RULE)
    }

    /// Validate a payload against a tag and an optional schema.
    pub fn validate(&self, tag: TypeTag, payload: &Value, schema: Option<&Schema>) -> Result<()> {
        check(tag, self.rule(tag), schema, payload)
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Shared check used by the registry and by ports holding a resolved rule.
pub(crate) fn check(
    tag: TypeTag,
    rule: TypeRule,
    schema: Option<&Schema>,
    payload: &Value,
) -> Result<()> {
    if !(rule.predicate)(payload) {
        return Err(BusError::Validation {
            tag,
            reason: format!("expected {}", rule.expected),
        });
    }
    if let Some(schema) = schema {
        schema(payload).map_err(|reason| BusError::Validation { tag, reason })?;
    }
    Ok(())
}
