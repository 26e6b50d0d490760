// Cancellation tokens (spec.md §5): the one concurrency primitive
// exposed to callers ranging over very large lists. Plain atomic flag,
// no channels or wakers — cooperative, checked between elements.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub trait CancelToken: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

/// A cheaply cloned, thread-shareable cancellation flag.
#[derive(Clone, Default)]
pub struct AtomicCancelToken(Arc<AtomicBool>);

impl AtomicCancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl CancelToken for AtomicCancelToken {
    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A token that never cancels, for call sites with no caller-supplied
/// token.
#[derive(Clone, Copy, Default)]
pub struct NeverCancel;

impl CancelToken for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_atomic_cancel_token() {
        let tok = AtomicCancelToken::new();
        assert!(!tok.is_cancelled());
        let clone = tok.clone();
        tok.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_never_cancel() {
        assert!(!NeverCancel.is_cancelled());
    }
}
