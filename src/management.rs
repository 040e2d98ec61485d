//! The context handed to every component constructor.
//!
//! A [`Management`] gives constructors the registry, named shared resources
//! and a label to log under, without any of them living in globals. Clones
//! share everything by reference.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::bundle::{Bundle, ComponentConfig};
use crate::component::{Cache, RateLimit};
use crate::error::{Error, ErrorKind, Result};

const ROOT_LABEL: &str = "root";

/// Named shared resources, built before any pipeline component.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceConfig {
    #[serde(default)]
    pub caches: BTreeMap<String, ComponentConfig>,
    #[serde(default)]
    pub rate_limits: BTreeMap<String, ComponentConfig>,
}

#[derive(Clone)]
pub struct Management {
    label: String,
    bundle: Arc<Bundle>,
    caches: HashMap<String, Arc<dyn Cache>>,
    rate_limits: HashMap<String, Arc<dyn RateLimit>>,
    /// Templates being expanded on the way to the component under
    /// construction, outermost first.
    expanding: Vec<String>,
}

impl Management {
    pub fn new(bundle: Arc<Bundle>) -> Self {
        Self {
            label: ROOT_LABEL.to_string(),
            bundle,
            caches: HashMap::new(),
            rate_limits: HashMap::new(),
            expanding: Vec::new(),
        }
    }

    /// Builds every resource in `resources` through the registry.
    ///
    /// Caches are built first, so a rate limit constructor can already look
    /// them up.
    pub fn from_resources(bundle: Arc<Bundle>, resources: &ResourceConfig) -> Result<Self> {
        let mut mgr = Self::new(bundle);
        for (name, conf) in &resources.caches {
            let cache = mgr
                .bundle
                .build_cache(conf, &mgr.labelled(name))
                .map_err(|e| e.context(format!("cache resource {name}")))?;
            debug!(name = %name, kind = %conf.kind, "built cache resource");
            mgr = mgr.with_cache(name.clone(), cache);
        }
        for (name, conf) in &resources.rate_limits {
            let rate_limit = mgr
                .bundle
                .build_rate_limit(conf, &mgr.labelled(name))
                .map_err(|e| e.context(format!("rate limit resource {name}")))?;
            debug!(name = %name, kind = %conf.kind, "built rate limit resource");
            mgr = mgr.with_rate_limit(name.clone(), rate_limit);
        }
        Ok(mgr)
    }

    pub fn with_cache(mut self, name: impl Into<String>, cache: Arc<dyn Cache>) -> Self {
        self.caches.insert(name.into(), cache);
        self
    }

    pub fn with_rate_limit(
        mut self,
        name: impl Into<String>,
        rate_limit: Arc<dyn RateLimit>,
    ) -> Self {
        self.rate_limits.insert(name.into(), rate_limit);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn bundle(&self) -> &Arc<Bundle> {
        &self.bundle
    }

    /// A context for a child component, logging under `label`.
    pub fn labelled(&self, label: &str) -> Self {
        Self {
            label: label.to_string(),
            ..self.clone()
        }
    }

    /// The templates currently being expanded, outermost first.
    pub fn expanding(&self) -> &[String] {
        &self.expanding
    }

    /// A context for building the expansion of template `name`.
    pub fn expanding_template(&self, name: &str) -> Self {
        let mut mgr = self.clone();
        mgr.expanding.push(name.to_string());
        mgr
    }

    pub fn cache(&self, name: &str) -> Result<Arc<dyn Cache>> {
        self.caches.get(name).cloned().ok_or_else(|| {
            Error::CacheError(ErrorKind::ConstructionError(format!(
                "cache resource {name} not found"
            )))
        })
    }

    pub fn rate_limit(&self, name: &str) -> Result<Arc<dyn RateLimit>> {
        self.rate_limits.get(name).cloned().ok_or_else(|| {
            Error::RateLimitError(ErrorKind::ConstructionError(format!(
                "rate limit resource {name} not found"
            )))
        })
    }
}

impl fmt::Debug for Management {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Management")
            .field("label", &self.label)
            .field("caches", &self.caches.keys().collect::<Vec<_>>())
            .field("rate_limits", &self.rate_limits.keys().collect::<Vec<_>>())
            .field("expanding", &self.expanding)
            .finish()
    }
}
