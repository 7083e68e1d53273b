//! The hook pipeline (spec §4.3 "Middleware & hooks", §4.5, §9 "Cyclic
//! object graphs in configuration").
//!
//! Hooks fire at the eight well-defined points around CRUD operations.
//! A hook handler's return value replaces the pending payload/result
//! when non-null (spec §4.5 "Composition"); an error in a `beforeX` hook
//! aborts the operation, an error in `afterX` is reported on the event
//! bus but the mutation stands (spec §4.5 "Error behavior").
//!
//! Hook *definitions* are a name and a config value, never a closure
//! (spec §3 "Coordination Record" sibling note, §9): when
//! `persistHooks=true` they are serialized into the manifest and
//! re-resolved against a process-level factory registry on reconnect,
//! so a manifest never embeds a graph of live objects.

use async_trait::async_trait;
use dashmap::DashMap;
use s3db_catalog::{HookDef, HookPoint};
use s3db_common::Error;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

/// One hook implementation. `call` receives the pending payload
/// (`beforeX`) or result (`afterX`) and may replace it by returning
/// `Some`; `None` means "no change" (spec §4.5).
#[async_trait]
pub trait Hook: Send + Sync {
    async fn call(&self, payload: Value) -> Result<Option<Value>, Error>;
}

/// A named constructor for a [`Hook`], registered once per process so a
/// manifest's persisted `{name, config}` pair can be re-materialized
/// into a live hook after a reconnect with no closures on the wire.
type HookFactory = Arc<dyn Fn(Value) -> Arc<dyn Hook> + Send + Sync>;

#[derive(Default)]
pub struct HookFactoryRegistry {
    factories: DashMap<String, HookFactory>,
}

impl HookFactoryRegistry {
    pub fn register(&self, name: impl Into<String>, factory: impl Fn(Value) -> Arc<dyn Hook> + Send + Sync + 'static) {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    #[must_use]
    pub fn resolve(&self, def: &HookDef) -> Option<Arc<dyn Hook>> {
        self.factories.get(&def.name).map(|factory| factory(def.config.clone()))
    }
}

/// The process-wide registry every `Resource` resolves persisted hook
/// names against. Plugins register their hook factories here at
/// startup (spec §9 "Dynamic duck-typed plugins").
pub fn global_registry() -> &'static HookFactoryRegistry {
    static REGISTRY: OnceLock<HookFactoryRegistry> = OnceLock::new();
    REGISTRY.get_or_init(HookFactoryRegistry::default)
}

/// One resource's live hook pipeline: the resolved handlers for each
/// point, in registration order, alongside the definitions that get
/// persisted to the manifest when `persistHooks=true`.
#[derive(Default)]
pub struct HookPipeline {
    handlers: std::sync::RwLock<BTreeMap<HookPoint, Vec<(HookDef, Arc<dyn Hook>)>>>,
}

impl HookPipeline {
    /// Rebuild a pipeline from persisted manifest definitions, resolving
    /// each against the global factory registry. A definition whose
    /// factory is no longer registered is dropped silently — the
    /// manifest's hook sanitation step already guarantees shape, not
    /// that every named hook is still installed in this process.
    #[must_use]
    pub fn from_manifest(hooks: &BTreeMap<String, Vec<HookDef>>) -> Self {
        let pipeline = Self::default();
        for (point_str, defs) in hooks {
            let Ok(point) = point_str.parse::<HookPoint>() else { continue };
            for def in defs {
                if let Some(hook) = global_registry().resolve(def) {
                    pipeline.push(point, def.clone(), hook);
                }
            }
        }
        pipeline
    }

    fn push(&self, point: HookPoint, def: HookDef, hook: Arc<dyn Hook>) {
        self.handlers.write().expect("hook pipeline lock poisoned").entry(point).or_default().push((def, hook));
    }

    /// Register a hook by the name of an already-installed factory.
    /// Returns `Err` if no factory by that name is registered.
    pub fn add_hook(&self, point: HookPoint, name: &str, config: Value) -> Result<(), Error> {
        let def = HookDef { name: name.to_string(), config };
        let hook = global_registry()
            .resolve(&def)
            .ok_or_else(|| Error::configuration(format!("no hook factory registered under name {name:?}")))?;
        self.push(point, def, hook);
        Ok(())
    }

    /// The persisted `{name, config}` definitions for one hook point, in
    /// registration order (what gets written into the manifest when
    /// `persistHooks=true`).
    #[must_use]
    pub fn definitions(&self, point: HookPoint) -> Vec<HookDef> {
        self.handlers
            .read()
            .expect("hook pipeline lock poisoned")
            .get(&point)
            .map(|hooks| hooks.iter().map(|(def, _)| def.clone()).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn all_definitions(&self) -> BTreeMap<String, Vec<HookDef>> {
        self.handlers
            .read()
            .expect("hook pipeline lock poisoned")
            .iter()
            .map(|(point, hooks)| (point.as_str().to_string(), hooks.iter().map(|(def, _)| def.clone()).collect()))
            .collect()
    }

    /// Run every hook registered at `point` in order, threading the
    /// payload through (spec §4.5 "Composition"). A `before*` point
    /// aborts on the first error (`is_before = true`); an `after*`
    /// point's errors are returned to the caller to report on the event
    /// bus, but the (already-applied) payload is still returned.
    pub async fn run(&self, point: HookPoint, mut payload: Value, is_before: bool) -> (Value, Vec<Error>) {
        let handlers: Vec<Arc<dyn Hook>> = self
            .handlers
            .read()
            .expect("hook pipeline lock poisoned")
            .get(&point)
            .map(|hooks| hooks.iter().map(|(_, hook)| Arc::clone(hook)).collect())
            .unwrap_or_default();

        let mut errors = Vec::new();
        for handler in handlers {
            match handler.call(payload.clone()).await {
                Ok(Some(replacement)) => payload = replacement,
                Ok(None) => {}
                Err(err) => {
                    if is_before {
                        errors.push(err);
                        break;
                    }
                    errors.push(err);
                }
            }
        }
        (payload, errors)
    }
}
