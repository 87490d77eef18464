use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic generation counter shared between an owner and the work it schedules.
///
/// Work captures the epoch when it is scheduled and must re-check it before acting:
/// once the epoch has advanced the work belongs to a torn-down generation.
#[derive(Clone, Debug, Default)]
pub struct EpochToken {
    inner: Arc<AtomicU64>,
}

impl EpochToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.inner.load(Ordering::Acquire)
    }

    /// Invalidates everything captured so far and returns the new epoch.
    pub fn advance(&self) -> u64 {
        self.inner.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.current() == epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_invalidates_captured_epoch() {
        let token = EpochToken::new();
        let captured = token.current();
        assert!(token.is_current(captured));

        let clone = token.clone();
        assert_eq!(clone.advance(), captured + 1);
        assert!(!token.is_current(captured));
        assert!(token.is_current(captured + 1));
    }
}
