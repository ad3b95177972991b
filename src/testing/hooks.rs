//! Recording test hook.

use crate::context::{HookPoint, TestHook};
use std::sync::{Arc, Mutex, PoisonError};

/// Records every hook point the pipeline passes and can fail at one of them.
///
/// ```
/// use blockflow::context::HookPoint;
/// use blockflow::testing::HookRecorder;
///
/// let recorder = HookRecorder::new().fail_at(HookPoint::Spill);
/// let hook = recorder.hook();
/// assert!(hook(HookPoint::UnionWorker).is_ok());
/// assert!(hook(HookPoint::Spill).is_err());
/// assert_eq!(recorder.count(HookPoint::UnionWorker), 1);
/// ```
#[derive(Clone, Debug, Default)]
pub struct HookRecorder {
    seen: Arc<Mutex<Vec<HookPoint>>>,
    fail_at: Option<HookPoint>,
}

impl HookRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return an error whenever `point` is reached.
    #[must_use]
    pub const fn fail_at(mut self, point: HookPoint) -> Self {
        self.fail_at = Some(point);
        self
    }

    /// The callback to install with [`crate::context::QueryContext::with_hook`].
    #[must_use]
    pub fn hook(&self) -> TestHook {
        let seen = Arc::clone(&self.seen);
        let fail_at = self.fail_at;
        Arc::new(move |point| {
            seen.lock().unwrap_or_else(PoisonError::into_inner).push(point);
            if fail_at == Some(point) {
                anyhow::bail!("injected failure at {point:?}");
            }
            Ok(())
        })
    }

    /// Points reached so far, in order.
    #[must_use]
    pub fn points(&self) -> Vec<HookPoint> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[must_use]
    pub fn count(&self, point: HookPoint) -> usize {
        self.points().iter().filter(|p| **p == point).count()
    }
}
