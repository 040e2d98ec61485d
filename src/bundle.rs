//! The component registry.
//!
//! A [`Bundle`] maps `(category, type name)` to a constructor and the
//! [`ComponentSpec`] documenting it. It is filled once at startup, by native
//! components and templates alike, and then shared read-only through the
//! [`Management`] context while pipelines are built.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::component::{Cache, Input, Output, Processor, RateLimit};
use crate::docs::{Category, ComponentSpec};
use crate::error::{Error, ErrorKind, Result};
use crate::management::Management;
use crate::shared::ErrorContext;

/// The configuration of one component instance.
///
/// Accepted as `{type: foo, foo: {...}}` or in the short form `{foo: {...}}`,
/// either optionally carrying a `label`.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentConfig {
    pub kind: String,
    pub label: Option<String>,
    /// The type-specific body, decoded by the constructor.
    pub plugin: Value,
}

impl ComponentConfig {
    pub fn new(kind: impl Into<String>, plugin: Value) -> Self {
        Self {
            kind: kind.into(),
            label: None,
            plugin,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Decodes the body into a constructor's concrete config type. A missing
    /// body decodes as an empty mapping so all-default configs need none.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let body = match &self.plugin {
            Value::Null => Value::Object(Map::new()),
            other => other.clone(),
        };
        serde_json::from_value(body)
            .map_err(|e| Self::config_error(format!("invalid {} config: {e}", self.kind)))
    }
}

impl TryFrom<Value> for ComponentConfig {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        let Value::Object(mut fields) = value else {
            return Err(Self::config_error("component config must be a mapping"));
        };

        let label = match fields.remove("label") {
            None | Some(Value::Null) => None,
            Some(Value::String(label)) => Some(label),
            Some(_) => return Err(Self::config_error("component label must be a string")),
        };

        let kind = match fields.remove("type") {
            Some(Value::String(kind)) => kind,
            Some(_) => return Err(Self::config_error("component type must be a string")),
            None => match fields.keys().next() {
                Some(kind) if fields.len() == 1 => kind.clone(),
                _ => {
                    return Err(Self::config_error(
                        "component config must name its type, either with a `type` field or as its only key",
                    ))
                }
            },
        };
        if kind.is_empty() {
            return Err(Self::config_error("component type must not be empty"));
        }

        let plugin = fields.remove(&kind).unwrap_or(Value::Null);
        if let Some(extra) = fields.keys().next() {
            return Err(Self::config_error(format!(
                "field {extra} is not valid next to component type {kind}"
            )));
        }

        Ok(Self {
            kind,
            label,
            plugin,
        })
    }
}

impl<'de> Deserialize<'de> for ComponentConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        ComponentConfig::try_from(value).map_err(serde::de::Error::custom)
    }
}

impl ErrorContext for ComponentConfig {
    fn wrap(kind: ErrorKind) -> Error {
        Error::RegistryError(kind)
    }
}

pub type InputConstructor =
    Arc<dyn Fn(&ComponentConfig, &Management) -> Result<Box<dyn Input>> + Send + Sync>;
pub type OutputConstructor =
    Arc<dyn Fn(&ComponentConfig, &Management) -> Result<Box<dyn Output>> + Send + Sync>;
pub type ProcessorConstructor =
    Arc<dyn Fn(&ComponentConfig, &Management) -> Result<Box<dyn Processor>> + Send + Sync>;
pub type CacheConstructor =
    Arc<dyn Fn(&ComponentConfig, &Management) -> Result<Arc<dyn Cache>> + Send + Sync>;
pub type RateLimitConstructor =
    Arc<dyn Fn(&ComponentConfig, &Management) -> Result<Arc<dyn RateLimit>> + Send + Sync>;

/// Builds components of one category from their configuration.
#[derive(Clone)]
pub enum Constructor {
    Input(InputConstructor),
    Output(OutputConstructor),
    Processor(ProcessorConstructor),
    Cache(CacheConstructor),
    RateLimit(RateLimitConstructor),
}

impl Constructor {
    pub fn input<F>(f: F) -> Self
    where
        F: Fn(&ComponentConfig, &Management) -> Result<Box<dyn Input>> + Send + Sync + 'static,
    {
        Constructor::Input(Arc::new(f))
    }

    pub fn output<F>(f: F) -> Self
    where
        F: Fn(&ComponentConfig, &Management) -> Result<Box<dyn Output>> + Send + Sync + 'static,
    {
        Constructor::Output(Arc::new(f))
    }

    pub fn processor<F>(f: F) -> Self
    where
        F: Fn(&ComponentConfig, &Management) -> Result<Box<dyn Processor>>
            + Send
            + Sync
            + 'static,
    {
        Constructor::Processor(Arc::new(f))
    }

    pub fn cache<F>(f: F) -> Self
    where
        F: Fn(&ComponentConfig, &Management) -> Result<Arc<dyn Cache>> + Send + Sync + 'static,
    {
        Constructor::Cache(Arc::new(f))
    }

    pub fn rate_limit<F>(f: F) -> Self
    where
        F: Fn(&ComponentConfig, &Management) -> Result<Arc<dyn RateLimit>>
            + Send
            + Sync
            + 'static,
    {
        Constructor::RateLimit(Arc::new(f))
    }

    pub fn category(&self) -> Category {
        match self {
            Constructor::Input(_) => Category::Input,
            Constructor::Output(_) => Category::Output,
            Constructor::Processor(_) => Category::Processor,
            Constructor::Cache(_) => Category::Cache,
            Constructor::RateLimit(_) => Category::RateLimit,
        }
    }
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Constructor({})", self.category())
    }
}

/// A constructed component of any category.
pub enum Component {
    Input(Box<dyn Input>),
    Output(Box<dyn Output>),
    Processor(Box<dyn Processor>),
    Cache(Arc<dyn Cache>),
    RateLimit(Arc<dyn RateLimit>),
}

impl Component {
    pub fn category(&self) -> Category {
        match self {
            Component::Input(_) => Category::Input,
            Component::Output(_) => Category::Output,
            Component::Processor(_) => Category::Processor,
            Component::Cache(_) => Category::Cache,
            Component::RateLimit(_) => Category::RateLimit,
        }
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Component({})", self.category())
    }
}

#[derive(Debug, Clone)]
struct Entry {
    spec: ComponentSpec,
    constructor: Constructor,
}

/// Registry of constructible component types.
#[derive(Debug, Clone, Default)]
pub struct Bundle {
    entries: HashMap<(Category, String), Entry>,
}

impl ErrorContext for Bundle {
    fn wrap(kind: ErrorKind) -> Error {
        Error::RegistryError(kind)
    }
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a component type.
    ///
    /// Fails without touching the registry if the name is already taken in
    /// the spec's category, or if the constructor builds a different category
    /// than the spec declares.
    pub fn add(&mut self, spec: ComponentSpec, constructor: Constructor) -> Result<()> {
        if spec.name.is_empty() {
            return Err(Self::definition_error("component name must not be empty"));
        }
        if constructor.category() != spec.category {
            return Err(Self::definition_error(format!(
                "{} {} registered with a {} constructor",
                spec.category,
                spec.name,
                constructor.category()
            )));
        }

        let key = (spec.category, spec.name.clone());
        if self.entries.contains_key(&key) {
            return Err(Self::definition_error(format!(
                "{} {} is already registered",
                spec.category, spec.name
            )));
        }
        self.entries.insert(key, Entry { spec, constructor });
        Ok(())
    }

    pub fn contains(&self, category: Category, name: &str) -> bool {
        self.entries.contains_key(&(category, name.to_string()))
    }

    pub fn spec(&self, category: Category, name: &str) -> Option<&ComponentSpec> {
        self.entries
            .get(&(category, name.to_string()))
            .map(|entry| &entry.spec)
    }

    /// All specs of a category, sorted by name.
    pub fn specs(&self, category: Category) -> Vec<&ComponentSpec> {
        let mut specs: Vec<_> = self
            .entries
            .iter()
            .filter(|((cat, _), _)| *cat == category)
            .map(|(_, entry)| &entry.spec)
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Builds a component of any category.
    pub fn build(
        &self,
        category: Category,
        conf: &ComponentConfig,
        mgr: &Management,
    ) -> Result<Component> {
        Ok(match category {
            Category::Input => Component::Input(self.build_input(conf, mgr)?),
            Category::Output => Component::Output(self.build_output(conf, mgr)?),
            Category::Processor => Component::Processor(self.build_processor(conf, mgr)?),
            Category::Cache => Component::Cache(self.build_cache(conf, mgr)?),
            Category::RateLimit => Component::RateLimit(self.build_rate_limit(conf, mgr)?),
        })
    }

    pub fn build_input(&self, conf: &ComponentConfig, mgr: &Management) -> Result<Box<dyn Input>> {
        match self.constructor(Category::Input, conf)? {
            Constructor::Input(ctor) => ctor(conf, &scoped(mgr, conf)),
            other => Err(mismatch(Category::Input, conf, other)),
        }
    }

    pub fn build_output(
        &self,
        conf: &ComponentConfig,
        mgr: &Management,
    ) -> Result<Box<dyn Output>> {
        match self.constructor(Category::Output, conf)? {
            Constructor::Output(ctor) => ctor(conf, &scoped(mgr, conf)),
            other => Err(mismatch(Category::Output, conf, other)),
        }
    }

    pub fn build_processor(
        &self,
        conf: &ComponentConfig,
        mgr: &Management,
    ) -> Result<Box<dyn Processor>> {
        match self.constructor(Category::Processor, conf)? {
            Constructor::Processor(ctor) => ctor(conf, &scoped(mgr, conf)),
            other => Err(mismatch(Category::Processor, conf, other)),
        }
    }

    pub fn build_cache(&self, conf: &ComponentConfig, mgr: &Management) -> Result<Arc<dyn Cache>> {
        match self.constructor(Category::Cache, conf)? {
            Constructor::Cache(ctor) => ctor(conf, &scoped(mgr, conf)),
            other => Err(mismatch(Category::Cache, conf, other)),
        }
    }

    pub fn build_rate_limit(
        &self,
        conf: &ComponentConfig,
        mgr: &Management,
    ) -> Result<Arc<dyn RateLimit>> {
        match self.constructor(Category::RateLimit, conf)? {
            Constructor::RateLimit(ctor) => ctor(conf, &scoped(mgr, conf)),
            other => Err(mismatch(Category::RateLimit, conf, other)),
        }
    }

    fn constructor(&self, category: Category, conf: &ComponentConfig) -> Result<&Constructor> {
        self.entries
            .get(&(category, conf.kind.clone()))
            .map(|entry| &entry.constructor)
            .ok_or_else(|| {
                Self::construction_error(format!("{category} type {} not recognised", conf.kind))
            })
    }
}

/// Components with a label log under it; the rest inherit the caller's.
fn scoped(mgr: &Management, conf: &ComponentConfig) -> Management {
    match &conf.label {
        Some(label) => mgr.labelled(label),
        None => mgr.clone(),
    }
}

fn mismatch(category: Category, conf: &ComponentConfig, ctor: &Constructor) -> Error {
    Bundle::internal_error(format!(
        "{category} {} has a {} constructor",
        conf.kind,
        ctor.category()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::test_utils::SetMeta;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Conf {
        key: String,
        #[serde(default)]
        value: String,
    }

    fn set_meta_ctor() -> Constructor {
        Constructor::processor(|conf, _mgr| {
            let conf: Conf = conf.decode()?;
            Ok(Box::new(SetMeta::new(conf.key, conf.value)))
        })
    }

    #[test]
    fn test_config_forms() {
        let long = ComponentConfig::try_from(json!({"type": "set_meta", "set_meta": {"key": "k"}}))
            .unwrap();
        let short = ComponentConfig::try_from(json!({"set_meta": {"key": "k"}})).unwrap();
        assert_eq!(long, short);
        assert_eq!(long.kind, "set_meta");

        let labelled =
            ComponentConfig::try_from(json!({"label": "tagger", "type": "drop_all"})).unwrap();
        assert_eq!(labelled.label.as_deref(), Some("tagger"));
        assert_eq!(labelled.plugin, Value::Null);

        assert!(ComponentConfig::try_from(json!({"a": {}, "b": {}})).is_err());
        assert!(ComponentConfig::try_from(json!({"type": "a", "b": {}})).is_err());
        assert!(ComponentConfig::try_from(json!("set_meta")).is_err());
        assert!(ComponentConfig::try_from(json!({"type": 5})).is_err());
    }

    #[test]
    fn test_config_from_yaml() {
        let conf: ComponentConfig =
            serde_yaml::from_str("set_meta:\n  key: k\n  value: v\n").unwrap();
        let decoded: Conf = conf.decode().unwrap();
        assert_eq!(decoded.key, "k");
        assert_eq!(decoded.value, "v");

        let missing = ComponentConfig::new("set_meta", Value::Null);
        assert!(missing.decode::<Conf>().is_err());
    }

    #[test]
    fn test_duplicate_registration_leaves_bundle_untouched() {
        let mut bundle = Bundle::new();
        let spec = ComponentSpec::new("set_meta", Category::Processor).with_summary("first");
        bundle.add(spec, set_meta_ctor()).unwrap();

        let dup = ComponentSpec::new("set_meta", Category::Processor).with_summary("second");
        let err = bundle.add(dup, set_meta_ctor()).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::DefinitionError(_)));

        assert_eq!(bundle.len(), 1);
        assert_eq!(bundle.spec(Category::Processor, "set_meta").unwrap().summary, "first");

        // the same name in another category is a different component type
        let cache = ComponentSpec::new("set_meta", Category::Cache);
        let ctor = Constructor::cache(|_, _| {
            Ok(Arc::new(crate::shared::test_utils::MemoryCache::default()) as Arc<dyn Cache>)
        });
        bundle.add(cache, ctor).unwrap();
        assert_eq!(bundle.len(), 2);
    }

    #[test]
    fn test_category_mismatch_rejected() {
        let mut bundle = Bundle::new();
        let spec = ComponentSpec::new("set_meta", Category::Output);
        assert!(bundle.add(spec, set_meta_ctor()).is_err());
        assert!(bundle.is_empty());
    }

    #[tokio::test]
    async fn test_build_processor() {
        let mut bundle = Bundle::new();
        bundle
            .add(ComponentSpec::new("set_meta", Category::Processor), set_meta_ctor())
            .unwrap();
        let bundle = Arc::new(bundle);
        let mgr = Management::new(Arc::clone(&bundle));

        let conf = ComponentConfig::new("set_meta", json!({"key": "k", "value": "v"}));
        let component = bundle.build(Category::Processor, &conf, &mgr).unwrap();
        let Component::Processor(processor) = component else {
            panic!("expected a processor");
        };
        let out = processor
            .process(&crate::message::Message::from_payloads(["a"]))
            .await
            .unwrap();
        assert_eq!(out[0].get(0).unwrap().meta_get("k"), Some("v"));

        let unknown = ComponentConfig::new("nope", Value::Null);
        let err = bundle.build_processor(&unknown, &mgr).err().expect("expected an error");
        assert!(err.to_string().contains("processor type nope not recognised"));

        // registered as a processor, so not found as an output
        assert!(bundle.build_output(&conf, &mgr).is_err());
        assert_eq!(bundle.specs(Category::Processor).len(), 1);
        assert!(bundle.specs(Category::Input).is_empty());
    }
}
