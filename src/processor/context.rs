//! Contexts threaded through a processor's lifecycle: one constructed
//! explicitly by the Graph Manager and passed in, never a hidden global
//! singleton (`spec.md` §9 "Global state").

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide context shared by every processor across the whole run:
/// storage roots and the test-mode flag. Constructed once by `main` and
/// handed to the Graph Manager.
#[derive(Clone)]
pub struct GlobalContext {
    /// Root directory under which per-run subdirectories are created.
    pub run_root: PathBuf,
    /// Root directory for read-only resources (filter coefficients, etc).
    pub resource_root: PathBuf,
    test: Arc<AtomicBool>,
}

impl GlobalContext {
    /// Build a context rooted at the given directories, test mode off.
    pub fn new(run_root: impl Into<PathBuf>, resource_root: impl Into<PathBuf>) -> Self {
        Self { run_root: run_root.into(), resource_root: resource_root.into(), test: Arc::new(AtomicBool::new(false)) }
    }

    /// Current value of the process-wide test flag.
    pub fn test(&self) -> bool {
        self.test.load(Ordering::Acquire)
    }

    /// Set the process-wide test flag.
    pub fn set_test(&self, value: bool) {
        self.test.store(value, Ordering::Release);
    }

    /// Toggle the process-wide test flag, returning its new value.
    pub fn toggle_test(&self) -> bool {
        let new_value = !self.test();
        self.set_test(new_value);
        new_value
    }
}

/// Per-run context passed to `preprocess` / `process` / `postprocess`:
/// carries the cooperative termination flag every suspension point must
/// honor, plus the run's output directory and the global context.
pub struct ProcessingContext {
    /// Process-wide context (storage roots, test flag).
    pub global: GlobalContext,
    /// Directory for this run's on-disk artifacts.
    pub run_dir: PathBuf,
    terminated: Arc<AtomicBool>,
}

impl ProcessingContext {
    /// Build a processing context rooted at `run_dir` for this run.
    pub fn new(global: GlobalContext, run_dir: PathBuf) -> Self {
        Self { global, run_dir, terminated: Arc::new(AtomicBool::new(false)) }
    }

    /// Whether termination has been signaled; checked at the top of every
    /// process loop iteration and honored by every suspension point.
    pub fn terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Signal termination; called by the Graph Manager during `stop`.
    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::Release);
    }

    /// Whether the process-wide test flag is set.
    pub fn test(&self) -> bool {
        self.global.test()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_toggles() {
        let ctx = GlobalContext::new("/tmp/run", "/tmp/res");
        assert!(!ctx.test());
        assert!(ctx.toggle_test());
        assert!(ctx.test());
    }

    #[test]
    fn terminate_is_observed() {
        let global = GlobalContext::new("/tmp/run", "/tmp/res");
        let ctx = ProcessingContext::new(global, "/tmp/run/run_1".into());
        assert!(!ctx.terminated());
        ctx.terminate();
        assert!(ctx.terminated());
    }
}
