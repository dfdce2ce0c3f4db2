//! Extension hooks invoked around the ingestion and twin-update paths.
//!
//! Hooks are an explicit, ordered list of registered callback interfaces
//! invoked synchronously with the operation: global hooks first, then
//! hooks scoped to the engine being written. A failing before-hook aborts
//! the operation before any write; a failing after-hook cannot be rolled
//! back and is surfaced as a warning instead.
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use twin_sync_shared::types::{
    DigitalTwin, MeasureRecord, MeasureSource, MeasureTarget, Measurement, MetadataValue,
};

use crate::errors::HookError;

/// The in-flight ingestion batch handed to measure hooks.
///
/// Before-hooks may rewrite `measurements`; the pipeline constructs the
/// persisted records only after every before-hook has run.
#[derive(Debug, Clone)]
pub struct MeasureHookContext {
    pub source: MeasureSource,
    pub target: MeasureTarget,
    /// The asset the batch routes to, when one was resolved.
    pub asset: Option<DigitalTwin>,
    pub measurements: Vec<Measurement>,
}

/// Extension point around measure ingestion.
#[async_trait::async_trait]
pub trait MeasureHook: Send + Sync {
    /// Name reported in errors and warnings.
    fn name(&self) -> &str;

    /// Runs before any write; may rewrite the batch. An error aborts the
    /// whole ingestion.
    async fn process_before(&self, _ctx: &mut MeasureHookContext) -> Result<(), HookError> {
        Ok(())
    }

    /// Runs after the records were persisted, for side effects such as
    /// alerting or computed-measure triggering.
    async fn process_after(
        &self,
        _ctx: &MeasureHookContext,
        _records: &[MeasureRecord],
    ) -> Result<(), HookError> {
        Ok(())
    }
}

/// Extension point around twin metadata updates.
#[async_trait::async_trait]
pub trait TwinUpdateHook: Send + Sync {
    fn name(&self) -> &str;

    /// Runs before the write; may rewrite the metadata patch.
    async fn update_before(
        &self,
        _twin: &DigitalTwin,
        _metadata: &mut BTreeMap<String, MetadataValue>,
    ) -> Result<(), HookError> {
        Ok(())
    }

    /// Runs after the updated twin was written.
    async fn update_after(&self, _twin: &DigitalTwin) -> Result<(), HookError> {
        Ok(())
    }
}

struct Scoped<T: ?Sized> {
    global: Vec<Arc<T>>,
    by_engine: HashMap<String, Vec<Arc<T>>>,
}

impl<T: ?Sized> Default for Scoped<T> {
    fn default() -> Self {
        Self {
            global: Vec::new(),
            by_engine: HashMap::new(),
        }
    }
}

impl<T: ?Sized> Scoped<T> {
    fn for_engine(&self, engine: &str) -> Vec<Arc<T>> {
        let mut hooks = self.global.clone();
        if let Some(scoped) = self.by_engine.get(engine) {
            hooks.extend(scoped.iter().cloned());
        }
        hooks
    }
}

/// Registry of measure and twin-update hooks, global and per-engine.
pub struct HookRegistry {
    measures: RwLock<Scoped<dyn MeasureHook>>,
    twin_updates: RwLock<Scoped<dyn TwinUpdateHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            measures: RwLock::new(Scoped::default()),
            twin_updates: RwLock::new(Scoped::default()),
        }
    }

    pub fn register_measure_hook(&self, hook: Arc<dyn MeasureHook>) {
        self.measures.write().unwrap().global.push(hook);
    }

    pub fn register_engine_measure_hook(&self, engine: &str, hook: Arc<dyn MeasureHook>) {
        self.measures
            .write()
            .unwrap()
            .by_engine
            .entry(engine.to_string())
            .or_default()
            .push(hook);
    }

    pub fn register_twin_update_hook(&self, hook: Arc<dyn TwinUpdateHook>) {
        self.twin_updates.write().unwrap().global.push(hook);
    }

    pub fn register_engine_twin_update_hook(&self, engine: &str, hook: Arc<dyn TwinUpdateHook>) {
        self.twin_updates
            .write()
            .unwrap()
            .by_engine
            .entry(engine.to_string())
            .or_default()
            .push(hook);
    }

    /// Measure hooks applicable to `engine`, global first.
    pub fn measure_hooks(&self, engine: &str) -> Vec<Arc<dyn MeasureHook>> {
        self.measures.read().unwrap().for_engine(engine)
    }

    /// Twin-update hooks applicable to `engine`, global first.
    pub fn twin_update_hooks(&self, engine: &str) -> Vec<Arc<dyn TwinUpdateHook>> {
        self.twin_updates.read().unwrap().for_engine(engine)
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use twin_sync_shared::types::{TwinId, TwinKind};

    struct Renamer {
        suffix: &'static str,
    }

    #[async_trait::async_trait]
    impl MeasureHook for Renamer {
        fn name(&self) -> &str {
            "renamer"
        }

        async fn process_before(&self, ctx: &mut MeasureHookContext) -> Result<(), HookError> {
            for measurement in &mut ctx.measurements {
                measurement.name.push_str(self.suffix);
            }
            Ok(())
        }
    }

    fn make_context() -> MeasureHookContext {
        MeasureHookContext {
            source: MeasureSource::Api {
                id: "sender".to_string(),
                metadata: BTreeMap::new(),
            },
            target: MeasureTarget::Api {
                engine_id: "engine-a".to_string(),
                asset_id: TwinId::new(TwinKind::Asset, "Room", "kitchen"),
                engine_group: None,
            },
            asset: None,
            measurements: vec![Measurement {
                name: "temperature".to_string(),
                measure_type: "temperature".to_string(),
                measured_at: 100,
                values: BTreeMap::new(),
            }],
        }
    }

    #[tokio::test]
    async fn test_hooks_run_global_first_then_engine_scoped() {
        let registry = HookRegistry::new();
        registry.register_measure_hook(Arc::new(Renamer { suffix: "-g" }));
        registry.register_engine_measure_hook("engine-a", Arc::new(Renamer { suffix: "-e" }));

        let mut ctx = make_context();
        for hook in registry.measure_hooks("engine-a") {
            hook.process_before(&mut ctx).await.unwrap();
        }
        assert_eq!(ctx.measurements[0].name, "temperature-g-e");

        // Another engine only sees the global hook.
        let mut ctx = make_context();
        for hook in registry.measure_hooks("engine-b") {
            hook.process_before(&mut ctx).await.unwrap();
        }
        assert_eq!(ctx.measurements[0].name, "temperature-g");
    }
}
