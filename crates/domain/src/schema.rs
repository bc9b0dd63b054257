//! Declarative argument schemas for monitor tasks.
//!
//! A schema lists the accepted fields, their kinds, whether they are required
//! and the default applied when absent. Validation either returns the argument
//! bag with defaults filled in or the first violated constraint.

use serde_json::{Map, Value};
use thiserror::Error;

/// Raised when an argument bag does not satisfy its schema.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid argument `{field}`: {constraint}")]
pub struct ValidationError {
    pub field: String,
    pub constraint: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            constraint: constraint.into(),
        }
    }
}

/// Accepted shape of a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// Exactly this string.
    Literal(&'static str),
    /// Any non-empty string.
    String,
    /// Non-empty array of non-empty strings.
    StringList,
    /// Integer no smaller than `min`.
    Integer { min: i64 },
    /// Any of the listed kinds, tried in order.
    OneOf(Vec<FieldKind>),
}

impl FieldKind {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Literal(expected) => value.as_str() == Some(expected),
            Self::String => value.as_str().is_some_and(|s| !s.trim().is_empty()),
            Self::StringList => value.as_array().is_some_and(|items| {
                !items.is_empty()
                    && items
                        .iter()
                        .all(|item| item.as_str().is_some_and(|s| !s.trim().is_empty()))
            }),
            Self::Integer { min } => value.as_i64().is_some_and(|n| n >= *min),
            Self::OneOf(kinds) => kinds.iter().any(|kind| kind.accepts(value)),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Literal(expected) => format!("\"{expected}\""),
            Self::String => "a non-empty string".to_string(),
            Self::StringList => "a non-empty array of strings".to_string(),
            Self::Integer { min } => format!("an integer >= {min}"),
            Self::OneOf(kinds) => kinds
                .iter()
                .map(FieldKind::describe)
                .collect::<Vec<_>>()
                .join(" or "),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub default: Option<Value>,
}

impl FieldSpec {
    pub fn required(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: true,
            default: None,
        }
    }

    pub fn optional(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArgumentSchema {
    fields: Vec<FieldSpec>,
}

impl ArgumentSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Applies defaults, then checks every field in declaration order.
    /// `null` is treated as an empty bag; unknown keys are rejected.
    pub fn validate(&self, arguments: &Value) -> Result<Map<String, Value>, ValidationError> {
        let mut bag = match arguments {
            Value::Null => Map::new(),
            Value::Object(map) => map.clone(),
            _ => return Err(ValidationError::new("arguments", "must be an object")),
        };

        if let Some(unknown) = bag
            .keys()
            .find(|key| !self.fields.iter().any(|spec| spec.name == key.as_str()))
        {
            return Err(ValidationError::new(unknown.clone(), "is not allowed"));
        }

        for spec in &self.fields {
            if !bag.contains_key(spec.name) {
                if let Some(default) = &spec.default {
                    bag.insert(spec.name.to_string(), default.clone());
                }
            }

            match bag.get(spec.name) {
                None if spec.required => {
                    return Err(ValidationError::new(spec.name, "is required"));
                }
                None => {}
                Some(value) if !spec.kind.accepts(value) => {
                    return Err(ValidationError::new(
                        spec.name,
                        format!("must be {}", spec.kind.describe()),
                    ));
                }
                Some(_) => {}
            }
        }

        Ok(bag)
    }
}

/// Reads a field that is either a single string or a list of strings.
pub fn string_or_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ArgumentSchema {
        ArgumentSchema::new()
            .field(FieldSpec::required(
                "pool",
                FieldKind::OneOf(vec![
                    FieldKind::Literal("all"),
                    FieldKind::String,
                    FieldKind::StringList,
                ]),
            ))
            .field(
                FieldSpec::optional("period", FieldKind::Integer { min: 1 })
                    .with_default(json!(30_000)),
            )
    }

    #[test]
    fn applies_defaults_before_checking() {
        let bag = schema().validate(&json!({ "pool": "all" })).unwrap();
        assert_eq!(bag.get("period"), Some(&json!(30_000)));
    }

    #[test]
    fn names_missing_required_field() {
        let err = schema().validate(&json!({})).unwrap_err();
        assert_eq!(err.field, "pool");
        assert_eq!(err.constraint, "is required");
    }

    #[test]
    fn rejects_wrong_kind_with_description() {
        let err = schema()
            .validate(&json!({ "pool": 1, "period": 10 }))
            .unwrap_err();
        assert_eq!(err.field, "pool");
        assert!(err.constraint.contains("\"all\""));

        let err = schema()
            .validate(&json!({ "pool": "1", "period": 0 }))
            .unwrap_err();
        assert_eq!(err.field, "period");
    }

    #[test]
    fn rejects_unknown_and_non_object_arguments() {
        let err = schema()
            .validate(&json!({ "pool": "1", "extra": true }))
            .unwrap_err();
        assert_eq!(err.field, "extra");

        let err = schema().validate(&json!([1, 2])).unwrap_err();
        assert_eq!(err.field, "arguments");
    }

    #[test]
    fn empty_lists_are_rejected() {
        assert!(schema().validate(&json!({ "pool": [] })).is_err());
        assert!(schema().validate(&json!({ "pool": ["1", "2"] })).is_ok());
    }

    #[test]
    fn string_or_list_reads_both_shapes() {
        assert_eq!(string_or_list(&json!("a")), Some(vec!["a".to_string()]));
        assert_eq!(
            string_or_list(&json!(["a", "b"])),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(string_or_list(&json!(3)), None);
    }
}
