//! Mappings: small compiled scripts that turn one structured value into
//! another.
//!
//! A mapping is a [rhai](https://rhai.rs) script. It runs against one part of
//! a message with these variables in scope:
//!
//! - `input`: the part's payload parsed as JSON, or the raw payload as a
//!   string when it is not JSON
//! - `meta`: the part's metadata as a map
//! - `root`: an empty map the script fills in
//!
//! The result is `root`, or the script's final value when `root` was left
//! empty. So `root.y = input.x;` and `#{ y: input.x }` are equivalent.
//!
//! Scripts are compiled once. Referencing an undeclared variable fails
//! compilation, and execution is bounded by an operation limit.

use std::sync::Arc;

use async_trait::async_trait;
use rhai::{Dynamic, Engine, Scope, AST};
use serde_json::Value;

use crate::bundle::{Bundle, Constructor};
use crate::component::Processor;
use crate::docs::{Category, ComponentSpec};
use crate::error::{Error, ErrorKind, Result};
use crate::message::{Message, Part};
use crate::shared::ErrorContext;

/// Upper bound on the operations a single run may perform.
const MAX_OPERATIONS: u64 = 100_000;

const INPUT: &str = "input";
const META: &str = "meta";
const ROOT: &str = "root";

#[derive(Clone)]
pub struct Mapping {
    engine: Arc<Engine>,
    ast: AST,
    source: String,
}

impl Mapping {
    /// Compiles `source`, failing with a definition error if it does not
    /// parse.
    pub fn parse(source: &str) -> Result<Self> {
        let mut engine = Engine::new();
        engine.set_strict_variables(true);
        engine.set_max_operations(MAX_OPERATIONS);

        let scope = scope(Dynamic::UNIT, rhai::Map::new());
        let ast = engine
            .compile_with_scope(&scope, source)
            .map_err(|e| Self::definition_error(e.to_string()))?;

        Ok(Self {
            engine: Arc::new(engine),
            ast,
            source: source.to_string(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Runs the mapping against part `index` of `msg`.
    pub fn query(&self, msg: &Message, index: usize) -> Result<Value> {
        let part = msg.get(index).ok_or_else(|| {
            Self::construction_error(format!(
                "message has {} parts, no part at index {index}",
                msg.len()
            ))
        })?;
        self.query_part(part)
    }

    fn query_part(&self, part: &Part) -> Result<Value> {
        let input = part.value().unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(part.payload()).into_owned())
        });
        let input =
            rhai::serde::to_dynamic(&input).map_err(|e| Self::construction_error(e.to_string()))?;
        let meta: rhai::Map = part
            .metadata()
            .iter()
            .map(|(k, v)| (k.as_str().into(), Dynamic::from(v.clone())))
            .collect();

        let mut scope = scope(input, meta);
        let result: Dynamic = self
            .engine
            .eval_ast_with_scope(&mut scope, &self.ast)
            .map_err(|e| Self::construction_error(e.to_string()))?;

        let root = scope.get_value::<Dynamic>(ROOT).unwrap_or(Dynamic::UNIT);
        let root_is_empty = root
            .read_lock::<rhai::Map>()
            .is_some_and(|map| map.is_empty());
        let output = if root_is_empty { result } else { root };

        rhai::serde::from_dynamic::<Value>(&output)
            .map_err(|e| Self::construction_error(e.to_string()))
    }
}

impl std::fmt::Debug for Mapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapping").field("source", &self.source).finish()
    }
}

fn scope(input: Dynamic, meta: rhai::Map) -> Scope<'static> {
    let mut scope = Scope::new();
    scope.push(INPUT, input);
    scope.push(META, meta);
    scope.push(ROOT, rhai::Map::new());
    scope
}

impl ErrorContext for Mapping {
    fn wrap(kind: ErrorKind) -> Error {
        Error::MappingError(kind)
    }
}

/// A processor replacing each part's payload with the JSON result of a
/// mapping. Metadata is kept; parts the mapping fails on are flagged.
pub struct MappingProcessor {
    mapping: Mapping,
}

impl MappingProcessor {
    pub fn new(mapping: Mapping) -> Self {
        Self { mapping }
    }
}

#[async_trait]
impl Processor for MappingProcessor {
    async fn process(&self, msg: &Message) -> Result<Vec<Message>> {
        let mut out = msg.clone();
        for part in out.iter_mut() {
            match self.mapping.query_part(part) {
                Ok(value) => part.set_payload(value.to_string()),
                Err(e) => part.set_error(e.to_string()),
            }
        }
        Ok(vec![out])
    }
}

/// Registers the `mapping` processor, configured with the script source.
pub fn register(bundle: &mut Bundle) -> Result<()> {
    let spec = ComponentSpec::new("mapping", Category::Processor)
        .with_summary("Replaces each message part with the result of a mapping script.");
    bundle.add(
        spec,
        Constructor::processor(|conf, _mgr| {
            let source: String = conf.decode()?;
            Ok(Box::new(MappingProcessor::new(Mapping::parse(&source)?)))
        }),
    )
}
