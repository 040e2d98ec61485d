use std::collections::HashSet;

use serde::Deserialize;
use serde_json::Value;

use crate::docs::{to_map, Category, ComponentSpec, FieldSpec, Status};
use crate::error::{Error, ErrorKind, Result};
use crate::mapping::Mapping;
use crate::shared::ErrorContext;

use super::CompiledTemplate;

/// One field of a template, as written in its definition.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Without a default, instances must set the field.
    #[serde(default, deserialize_with = "present")]
    pub default: Option<Value>,
}

/// Keeps an explicit `default: null` distinct from an absent default.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl FieldConfig {
    pub fn field_spec(&self) -> FieldSpec {
        let spec = FieldSpec::new(&self.name, &self.description);
        match &self.default {
            Some(default) => spec.with_default(default.clone()),
            None => spec,
        }
    }
}

/// A template definition document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: Category,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
    pub mapping: String,
}

impl ErrorContext for TemplateConfig {
    fn wrap(kind: ErrorKind) -> Error {
        Error::TemplateError(kind)
    }
}

impl TemplateConfig {
    /// Parses a definition, checking it against [`config_spec`] first so
    /// unknown or missing keys are reported by path.
    pub fn from_yaml(source: &str) -> Result<Self> {
        let doc: Value = serde_yaml::from_str(source).map_err(invalid)?;
        let doc = to_map(&config_spec(), &doc).map_err(|e| invalid(e.kind().message()))?;
        serde_json::from_value(Value::Object(doc)).map_err(invalid)
    }

    /// The spec of the component this template creates.
    pub fn component_spec(&self) -> ComponentSpec {
        ComponentSpec::new(&self.name, self.kind)
            .with_status(Status::Plugin)
            .with_summary(&self.summary)
            .with_description(&self.description)
            .with_fields(self.fields.iter().map(FieldConfig::field_spec).collect())
    }

    /// Validates the definition and compiles its mapping.
    pub fn compile(&self) -> Result<CompiledTemplate> {
        if self.name.is_empty() {
            return Err(Self::definition_error("template name must not be empty"));
        }
        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.is_empty() {
                return Err(Self::definition_error(format!(
                    "template {} has a field without a name",
                    self.name
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(Self::definition_error(format!(
                    "template {} declares field {} more than once",
                    self.name, field.name
                )));
            }
        }

        let mapping = Mapping::parse(&self.mapping).map_err(|e| e.context("template mapping"))?;
        Ok(CompiledTemplate::new(self.component_spec(), mapping))
    }
}

fn invalid(e: impl std::fmt::Display) -> Error {
    TemplateConfig::definition_error(format!("invalid template definition: {e}"))
}

/// The schema of template definition documents.
pub fn config_spec() -> Vec<FieldSpec> {
    vec![
        FieldSpec::new("name", "The name of the component this template will create."),
        FieldSpec::new(
            "type",
            "The type of the component this template will create, one of cache, input, output, \
             processor or rate_limit.",
        ),
        FieldSpec::new("summary", "A short summary of the component.")
            .with_default(Value::from("")),
        FieldSpec::new(
            "description",
            "A longer form description of the component and how to use it.",
        )
        .with_default(Value::from("")),
        FieldSpec::new("fields", "The fields of the template.")
            .array()
            .with_children(field_config_spec()),
        FieldSpec::new(
            "mapping",
            "A mapping that translates the fields of the template into a valid configuration for \
             the target component type.",
        ),
    ]
}

fn field_config_spec() -> Vec<FieldSpec> {
    vec![
        FieldSpec::new("name", "The name of the field."),
        FieldSpec::new("description", "A description of the field.")
            .with_default(Value::from("")),
        FieldSpec::new(
            "default",
            "An optional default value for the field. Without one, a configuration missing the \
             field is rejected.",
        )
        .optional(),
    ]
}
