//! Static component metadata and configuration schemas.
//!
//! Every registered component type carries a [`ComponentSpec`]. Its field
//! tree is also what instance documents of template-derived components are
//! validated against, see [`to_map`].

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, ErrorKind, Result};
use crate::shared::ErrorContext;

/// The closed set of component capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Input,
    Output,
    Processor,
    Cache,
    RateLimit,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Input,
        Category::Output,
        Category::Processor,
        Category::Cache,
        Category::RateLimit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Input => "input",
            Category::Output => "output",
            Category::Processor => "processor",
            Category::Cache => "cache",
            Category::RateLimit => "rate_limit",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maturity of a component type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Stable,
    Beta,
    Experimental,
    Deprecated,
    /// Provided at runtime by a template rather than compiled in.
    Plugin,
}

/// One field of a configuration schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FieldSpec>,
    /// The field holds a list. With children, every element is an object
    /// described by them.
    #[serde(default, skip_serializing_if = "is_false")]
    pub array: bool,
    /// A missing field without a default is left out instead of rejected.
    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Schema violations surface while building template instances.
impl ErrorContext for FieldSpec {
    fn wrap(kind: ErrorKind) -> Error {
        Error::TemplateError(kind)
    }
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Turns the field into an object whose keys are described by `children`.
    pub fn with_children(mut self, children: Vec<FieldSpec>) -> Self {
        self.children = children;
        self
    }

    pub fn array(mut self) -> Self {
        self.array = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }
}

/// Static metadata describing a component type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub category: Category,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: Vec<FieldSpec>,
}

impl ComponentSpec {
    pub fn new(name: impl Into<String>, category: Category) -> Self {
        Self {
            name: name.into(),
            category,
            status: Status::default(),
            summary: String::new(),
            description: String::new(),
            config: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.config.push(field);
        self
    }

    pub fn with_fields(mut self, fields: Vec<FieldSpec>) -> Self {
        self.config.extend(fields);
        self
    }
}

/// Validates `doc` against `fields` and flattens it into a key/value map.
///
/// `null` counts as an empty mapping. Keys that no field declares are
/// rejected, and a declared field missing from `doc` takes its default, is
/// left out when optional, or is reported as required. Fields with children
/// are validated recursively, element by element for arrays.
pub fn to_map(fields: &[FieldSpec], doc: &Value) -> Result<Map<String, Value>> {
    map_at("", fields, doc)
}

fn map_at(path: &str, fields: &[FieldSpec], doc: &Value) -> Result<Map<String, Value>> {
    let empty = Map::new();
    let given = match doc {
        Value::Null => &empty,
        Value::Object(map) => map,
        other => {
            return Err(FieldSpec::construction_error(format!(
                "{}expected a mapping, found {}",
                location(path),
                kind_of(other)
            )))
        }
    };

    if let Some(unknown) = given
        .keys()
        .find(|key| !fields.iter().any(|f| &f.name == *key))
    {
        return Err(FieldSpec::construction_error(format!(
            "field {} not recognised",
            join(path, unknown)
        )));
    }

    let mut out = Map::new();
    for field in fields {
        let field_path = join(path, &field.name);
        let value = match (given.get(&field.name), &field.default) {
            (Some(value), _) => value.clone(),
            (None, Some(default)) => default.clone(),
            (None, None) if field.optional => continue,
            (None, None) if field.array || !field.children.is_empty() => Value::Null,
            (None, None) => {
                return Err(FieldSpec::construction_error(format!(
                    "field {field_path} is required"
                )));
            }
        };
        out.insert(field.name.clone(), map_value(&field_path, field, value)?);
    }
    Ok(out)
}

fn map_value(path: &str, field: &FieldSpec, value: Value) -> Result<Value> {
    if !field.array {
        if field.children.is_empty() {
            return Ok(value);
        }
        return map_at(path, &field.children, &value).map(Value::Object);
    }

    let items = match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        other => {
            return Err(FieldSpec::construction_error(format!(
                "{path}: expected an array, found {}",
                kind_of(&other)
            )))
        }
    };
    if field.children.is_empty() {
        return Ok(Value::Array(items));
    }
    items
        .iter()
        .enumerate()
        .map(|(i, item)| map_at(&format!("{path}.{i}"), &field.children, item).map(Value::Object))
        .collect::<Result<Vec<_>>>()
        .map(Value::Array)
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

fn location(path: &str) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!("{path}: ")
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a mapping",
    }
}
