//! Structural schemas for flow inputs and outputs.
//!
//! A [`Schema`] is a named field set; each field has a [`FieldKind`]. Values are
//! `serde_json::Value`s and are never coerced: a text field holding a number is
//! a violation, not a string waiting to happen.

use serde_json::{json, Map, Value};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Text,
    Number,
    Boolean,
    Object(Schema),
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::Object(_) => "object",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldKind::Text => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Object(_) => value.is_object(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    pub description: Option<String>,
    pub required: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            required: true,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Number)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn object(name: impl Into<String>, schema: Schema) -> Self {
        Self::new(name, FieldKind::Object(schema))
    }

    /// Documentation only; exported to the provider but never enforced.
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn object() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Resolves a dotted path (`outer.inner`) through nested object fields.
    pub fn resolve(&self, path: &[String]) -> Option<&Field> {
        let (first, rest) = path.split_first()?;
        let field = self.get(first)?;
        if rest.is_empty() {
            return Some(field);
        }
        match &field.kind {
            FieldKind::Object(nested) => nested.resolve(rest),
            _ => None,
        }
    }

    /// First field name declared more than once at any nesting level.
    pub fn duplicate_field(&self) -> Option<String> {
        for (index, field) in self.fields.iter().enumerate() {
            if self.fields[..index].iter().any(|f| f.name == field.name) {
                return Some(field.name.clone());
            }
            if let FieldKind::Object(nested) = &field.kind {
                if let Some(name) = nested.duplicate_field() {
                    return Some(format!("{}.{}", field.name, name));
                }
            }
        }
        None
    }

    pub fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        let mut violations = Vec::new();
        self.collect_violations(value, "", &mut violations);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { violations })
        }
    }

    fn collect_violations(&self, value: &Value, prefix: &str, out: &mut Vec<Violation>) {
        let Some(object) = value.as_object() else {
            out.push(Violation::new(prefix, "object", kind_of(value)));
            return;
        };

        for field in &self.fields {
            let path = if prefix.is_empty() {
                field.name.clone()
            } else {
                format!("{prefix}.{}", field.name)
            };

            match object.get(&field.name) {
                None | Some(Value::Null) if !field.required => {}
                None => out.push(Violation::new(path, field.kind.name(), "missing")),
                Some(found) if !field.kind.matches(found) => {
                    out.push(Violation::new(path, field.kind.name(), kind_of(found)))
                }
                Some(found) => {
                    if let FieldKind::Object(nested) = &field.kind {
                        nested.collect_violations(found, &path, out);
                    }
                }
            }
        }
    }

    /// JSON Schema rendering handed to the provider as the generation contract.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in &self.fields {
            let mut property = match &field.kind {
                FieldKind::Text => json!({ "type": "string" }),
                FieldKind::Number => json!({ "type": "number" }),
                FieldKind::Boolean => json!({ "type": "boolean" }),
                FieldKind::Object(nested) => nested.to_json_schema(),
            };
            if let (Some(description), Some(object)) =
                (&field.description, property.as_object_mut())
            {
                object.insert("description".to_string(), json!(description));
            }
            properties.insert(field.name.clone(), property);
            if field.required {
                required.push(Value::String(field.name.clone()));
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "text",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One field that did not conform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Dotted field path; empty for the root value.
    pub path: String,
    pub expected: String,
    pub found: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() {
            "(root)"
        } else {
            self.path.as_str()
        };
        write!(f, "{path}: expected {}, found {}", self.expected, self.found)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

impl ValidationError {
    pub fn paths(&self) -> Vec<&str> {
        self.violations.iter().map(|v| v.path.as_str()).collect()
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, violation) in self.violations.iter().enumerate() {
            if index > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{violation}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}
