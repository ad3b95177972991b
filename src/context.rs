//! Per-query execution context.

use crate::error::{QueryError, Result};
use crate::metrics::MetricsCollector;
use crate::settings::Settings;
use crate::storage::Catalog;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative stop signal shared by every stream of a query.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// # Errors
    /// `Cancelled` once [`Self::cancel`] has been called.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() { Err(QueryError::Cancelled) } else { Ok(()) }
    }
}

/// Points at which the test-control hook is invoked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// Before a subquery set or join table starts materializing.
    CreatingSet,
    /// A union worker is about to pull from one of its inputs.
    UnionWorker,
    /// A partial aggregation step over one chain begins.
    PartialAggregation,
    /// A block of aggregation state or sorted rows is about to be spilled.
    Spill,
    /// A two-level bucket is about to be merged.
    MergeBucket,
}

/// Injected test-control callback. An error returned from the hook fails the
/// operator that invoked it, the way a real fault at that point would.
pub type TestHook = Arc<dyn Fn(HookPoint) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone)]
pub struct QueryContext {
    pub settings: Settings,
    pub catalog: Arc<Catalog>,
    pub cancel: CancellationToken,
    pub metrics: MetricsCollector,
    hook: Option<TestHook>,
}

impl QueryContext {
    #[must_use]
    pub fn new(settings: Settings, catalog: Arc<Catalog>) -> Self {
        Self {
            settings,
            catalog,
            cancel: CancellationToken::new(),
            metrics: MetricsCollector::new(),
            hook: None,
        }
    }

    /// Same catalog, cancellation and metrics, different settings.
    #[must_use]
    pub fn with_settings(&self, settings: Settings) -> Self {
        Self { settings, ..self.clone() }
    }

    #[must_use]
    pub fn with_hook(mut self, hook: TestHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Invoke the test hook, if any, for `point`.
    ///
    /// # Errors
    /// Whatever the hook returns.
    pub fn hook(&self, point: HookPoint) -> Result<()> {
        match &self.hook {
            Some(hook) => hook(point).map_err(QueryError::External),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn tmp_path(&self) -> PathBuf {
        self.settings.tmp_path.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl std::fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryContext")
            .field("settings", &self.settings)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("hook", &self.hook.is_some())
            .finish_non_exhaustive()
    }
}
