use serde_json::Value;

use crate::bundle::ComponentConfig;
use crate::docs::{to_map, ComponentSpec};
use crate::error::{Error, ErrorKind, Result};
use crate::mapping::Mapping;
use crate::message::{Message, Part};
use crate::shared::ErrorContext;

/// A template whose definition has been validated and whose mapping has
/// been compiled. Immutable once built.
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    spec: ComponentSpec,
    mapping: Mapping,
}

impl ErrorContext for CompiledTemplate {
    fn wrap(kind: ErrorKind) -> Error {
        Error::TemplateError(kind)
    }
}

impl CompiledTemplate {
    pub(crate) fn new(spec: ComponentSpec, mapping: Mapping) -> Self {
        Self { spec, mapping }
    }

    pub fn spec(&self) -> &ComponentSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Expands an instance document into the configuration of the child
    /// component it stands for.
    ///
    /// The document is validated against the template's fields with defaults
    /// applied, then carried as the only part of a message through the
    /// mapping. Whatever the mapping returns must be a component config.
    pub fn expand(&self, doc: &Value) -> Result<ComponentConfig> {
        self.try_expand(doc)
            .map_err(|e| e.context(format!("template {}", self.spec.name)))
    }

    fn try_expand(&self, doc: &Value) -> Result<ComponentConfig> {
        let fields = to_map(&self.spec.config, doc)?;
        let msg = Message::new(vec![Part::from_value(&Value::Object(fields))]);
        let mapped = self.mapping.query(&msg, 0)?;
        ComponentConfig::try_from(mapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateConfig;
    use serde_json::json;

    fn compiled(mapping: &str) -> CompiledTemplate {
        let definition = format!(
            r#"
name: with_y
type: processor
fields:
  - name: x
    default: 5
mapping: '{mapping}'
"#
        );
        TemplateConfig::from_yaml(&definition)
            .unwrap()
            .compile()
            .unwrap()
    }

    #[test]
    fn test_expand_uses_given_value_then_default() {
        let template = compiled(r#"root["type"] = "capture"; root.capture = #{ y: input.x };"#);

        let conf = template.expand(&json!({"x": 7})).unwrap();
        assert_eq!(conf.kind, "capture");
        assert_eq!(conf.plugin, json!({"y": 7}));

        let conf = template.expand(&json!({})).unwrap();
        assert_eq!(conf.plugin, json!({"y": 5}));

        let conf = template.expand(&Value::Null).unwrap();
        assert_eq!(conf.plugin, json!({"y": 5}));
    }

    #[test]
    fn test_expand_failures_name_the_template() {
        let template = compiled(r#"root["type"] = "capture"; root.capture = #{ y: input.x };"#);
        let err = template.expand(&json!({"z": 1})).unwrap_err();
        assert!(err.to_string().contains("template with_y"));
        assert!(err.to_string().contains("field z not recognised"));

        let failing = compiled(r#"throw "bad input""#);
        let err = failing.expand(&json!({})).unwrap_err();
        assert!(err.to_string().contains("template with_y"));

        // the mapping result must name exactly one component type
        let shapeless = compiled("input.x");
        let err = shapeless.expand(&json!({})).unwrap_err();
        assert!(err.to_string().contains("must be a mapping"));
    }
}
