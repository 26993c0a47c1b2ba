//! Credit-based flow control for one stream.
//!
//! The peer grants credit through the request frame's `initial_request_n`
//! and later REQUEST_N frames; the producing task consumes one unit per
//! emitted payload. Credit at or beyond the 31-bit maximum saturates to
//! unbounded and never comes back down.

use std::{
    pin::pin,
    sync::atomic::{AtomicU32, Ordering},
};

use rsbase::frame::MAX_REQUEST_N;
use tokio::sync::Notify;

const UNBOUNDED: u32 = u32::MAX;

/// The credit balance of one stream.
///
/// Grants arrive from the frame-dispatch thread while the producing task
/// draws the balance down, so the balance is an atomic and exhaustion
/// parks the producer on a [`Notify`].
#[derive(Debug)]
pub struct Credit {
    balance: AtomicU32,
    granted: Notify,
}

impl Credit {
    pub fn with_initial(n: u32) -> Self {
        Self {
            balance: AtomicU32::new(Self::saturate(n)),
            granted: Notify::new(),
        }
    }

    /// Credit that never runs out, for interactions of fixed cardinality.
    pub fn unbounded() -> Self {
        Self::with_initial(UNBOUNDED)
    }

    fn saturate(n: u32) -> u32 {
        if n >= MAX_REQUEST_N { UNBOUNDED } else { n }
    }

    pub fn is_unbounded(&self) -> bool {
        self.balance.load(Ordering::Acquire) == UNBOUNDED
    }

    pub fn balance(&self) -> u32 {
        self.balance.load(Ordering::Acquire)
    }

    /// Add `n` units of credit and wake the producer.
    pub fn grant(&self, n: u32) {
        let mut current = self.balance.load(Ordering::Acquire);
        loop {
            if current == UNBOUNDED {
                return;
            }
            let next = Self::saturate(current.saturating_add(n));
            match self.balance.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.granted.notify_waiters();
    }

    /// Take one unit of credit, waiting until the peer grants some.
    pub async fn acquire(&self) {
        loop {
            if self.try_acquire() {
                return;
            }
            let mut granted = pin!(self.granted.notified());
            granted.as_mut().enable();
            // a grant may have landed between the failed take and the
            // registration above
            if self.try_acquire() {
                return;
            }
            granted.await;
        }
    }

    fn try_acquire(&self) -> bool {
        let mut current = self.balance.load(Ordering::Acquire);
        loop {
            if current == UNBOUNDED {
                return true;
            }
            if current == 0 {
                return false;
            }
            match self.balance.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;

    #[test]
    fn test_initial_balance_and_draw_down() {
        let credit = Credit::with_initial(2);
        assert_eq!(credit.balance(), 2);
        assert!(credit.try_acquire());
        assert!(credit.try_acquire());
        assert!(!credit.try_acquire());
    }

    #[test]
    fn test_grant_saturates_to_unbounded() {
        let credit = Credit::with_initial(1);
        credit.grant(MAX_REQUEST_N);
        assert!(credit.is_unbounded());
        // unbounded credit is never drawn down
        assert!(credit.try_acquire());
        assert!(credit.is_unbounded());
        credit.grant(1);
        assert!(credit.is_unbounded());
    }

    #[test]
    fn test_initial_at_maximum_means_unbounded() {
        assert!(Credit::with_initial(MAX_REQUEST_N).is_unbounded());
        assert!(Credit::unbounded().is_unbounded());
        assert!(!Credit::with_initial(MAX_REQUEST_N - 1).is_unbounded());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_grant() {
        let credit = Arc::new(Credit::with_initial(0));
        let waiter = {
            let credit = credit.clone();
            tokio::spawn(async move { credit.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        credit.grant(1);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(credit.balance(), 0);
    }
}
