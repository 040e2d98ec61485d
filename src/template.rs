//! Templates: component types defined by configuration.
//!
//! A template declares a handful of fields and a [mapping](crate::mapping)
//! that turns an instance of those fields into the configuration of an
//! existing component. Once compiled and registered it is constructed through
//! the [`Bundle`] like any native component:
//!
//! ```yaml
//! name: add_field
//! type: processor
//! fields:
//!   - name: key
//!     description: The field to add to every document.
//!   - name: value
//!     description: The value to set it to.
//!     default: ""
//! mapping: |
//!   root["type"] = "mapping";
//!   root.mapping = `let out = input; out["${input.key}"] = "${input.value}"; out`;
//! ```
//!
//! Only processor templates can be registered for now.

mod compiled;
mod config;

use std::path::Path;
use std::sync::Arc;

use tracing::info;

pub use compiled::CompiledTemplate;
pub use config::{config_spec, FieldConfig, TemplateConfig};

use crate::bundle::{Bundle, Constructor};
use crate::docs::Category;
use crate::error::Result;
use crate::shared::ErrorContext;

/// Registers a compiled template in the bundle under its own name.
///
/// Fails without touching the bundle if the template's category cannot be
/// constructed from templates, or if the name is already taken.
pub fn register(template: CompiledTemplate, bundle: &mut Bundle) -> Result<()> {
    let spec = template.spec().clone();
    let template = Arc::new(template);

    let constructor = match spec.category {
        Category::Processor => Constructor::processor(move |conf, mgr| {
            let name = template.name();
            if mgr.expanding().iter().any(|n| n == name) {
                let chain = mgr.expanding().join(" -> ");
                return Err(CompiledTemplate::definition_error(format!(
                    "template {name} expands to itself through {chain} -> {name}"
                )));
            }
            let child = template.expand(&conf.plugin)?;
            mgr.bundle()
                .build_processor(&child, &mgr.expanding_template(name))
                .map_err(|e| e.context(format!("template {name}")))
        }),
        Category::Input | Category::Output | Category::Cache | Category::RateLimit => {
            return Err(CompiledTemplate::definition_error(format!(
                "unsupported template category {} for template {}",
                spec.category, spec.name
            )));
        }
    };

    bundle.add(spec, constructor)
}

/// Decodes, compiles and registers one template definition.
pub fn register_yaml(source: &str, bundle: &mut Bundle) -> Result<()> {
    let template = TemplateConfig::from_yaml(source)?.compile()?;
    let name = template.name().to_string();
    register(template, bundle)?;
    info!(name = %name, "registered template");
    Ok(())
}

/// Registers the template definition in each file, stopping at the first
/// one that fails. Errors carry the path of the offending file.
pub fn register_files<I, P>(paths: I, bundle: &mut Bundle) -> Result<()>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    for path in paths {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            CompiledTemplate::definition_error(format!(
                "failed to read template {}: {e}",
                path.display()
            ))
        })?;
        register_yaml(&source, bundle).map_err(|e| e.context(path.display()))?;
    }
    Ok(())
}
