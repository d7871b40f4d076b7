//! Readiness signal for the healthcheck stage.

use std::sync::atomic::{AtomicBool, Ordering};

/// Shared readiness flag.
///
/// Owned conceptually by the component that knows whether the router may
/// take traffic (route table warm-up, draining on shutdown); the
/// healthcheck stage only ever reads it.
#[derive(Debug, Default)]
pub struct Readiness {
    ok: AtomicBool,
}

impl Readiness {
    pub fn new(ready: bool) -> Self {
        Self { ok: AtomicBool::new(ready) }
    }

    pub fn is_ready(&self) -> bool {
        self.ok.load(Ordering::SeqCst)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ok.store(ready, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggles() {
        let readiness = Readiness::new(false);
        assert!(!readiness.is_ready());
        readiness.set_ready(true);
        assert!(readiness.is_ready());
        readiness.set_ready(false);
        assert!(!readiness.is_ready());
    }
}
