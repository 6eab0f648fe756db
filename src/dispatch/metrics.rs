//! # Dispatch Counters
//!
//! Lock-free delivery counters and the zero-activity signal.
//!
//! `active` goes up when a dispatch starts and down after its context has been
//! disposed. The decrement that lands on zero is the single place a
//! [`ZeroActivity`] event is emitted, so each return to idle produces exactly one
//! event no matter how many dispatches finish at the same moment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, error};

/// Emitted each time active dispatches return to zero
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZeroActivity {
    /// Dispatches started over the dispatcher's lifetime at the moment of the event
    pub dispatch_count: u64,
    pub max_concurrent_dispatch_count: usize,
    pub occurred_at: DateTime<Utc>,
}

/// Point-in-time copy of the delivery counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryMetrics {
    pub active_dispatch_count: usize,
    pub dispatch_count: u64,
    pub max_concurrent_dispatch_count: usize,
    pub faulted_count: u64,
    pub cancelled_count: u64,
    pub lock_lost_count: u64,
    pub zero_activity_count: u64,
    pub collected_at: DateTime<Utc>,
}

/// Shared counters for one dispatcher
#[derive(Debug)]
pub struct DispatchCounters {
    active: AtomicUsize,
    total: AtomicU64,
    max_concurrent: AtomicUsize,
    faulted: AtomicU64,
    cancelled: AtomicU64,
    lock_lost: AtomicU64,
    zero_activity: AtomicU64,
    zero_activity_tx: broadcast::Sender<ZeroActivity>,
    idle: Notify,
}

impl DispatchCounters {
    pub fn new(zero_activity_capacity: usize) -> Self {
        let (zero_activity_tx, _) = broadcast::channel(zero_activity_capacity.max(1));
        Self {
            active: AtomicUsize::new(0),
            total: AtomicU64::new(0),
            max_concurrent: AtomicUsize::new(0),
            faulted: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            lock_lost: AtomicU64::new(0),
            zero_activity: AtomicU64::new(0),
            zero_activity_tx,
            idle: Notify::new(),
        }
    }

    /// Count a dispatch as started. The returned guard ends it when dropped.
    pub fn begin(self: &Arc<Self>) -> ActiveDispatch {
        let active = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        self.total.fetch_add(1, Ordering::AcqRel);
        self.max_concurrent.fetch_max(active, Ordering::AcqRel);
        ActiveDispatch {
            counters: Arc::clone(self),
        }
    }

    fn end(&self) {
        let previous = self.active.fetch_sub(1, Ordering::AcqRel);
        if previous == 0 {
            // Unbalanced end; restore and report rather than wrap around.
            self.active.fetch_add(1, Ordering::AcqRel);
            error!("Dispatch counter underflow detected");
            return;
        }

        if previous == 1 {
            self.emit_zero_activity();
        }
    }

    fn emit_zero_activity(&self) {
        self.zero_activity.fetch_add(1, Ordering::AcqRel);
        let event = ZeroActivity {
            dispatch_count: self.dispatch_count(),
            max_concurrent_dispatch_count: self.max_concurrent_dispatch_count(),
            occurred_at: Utc::now(),
        };

        // No subscribers is the normal case outside of shutdown.
        let receivers = self.zero_activity_tx.send(event).unwrap_or(0);
        self.idle.notify_waiters();

        debug!(
            dispatch_count = self.dispatch_count(),
            receivers = receivers,
            "💤 Dispatcher reached zero activity"
        );
    }

    pub fn record_fault(&self) {
        self.faulted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lock_lost(&self) {
        self.lock_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active_dispatch_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn dispatch_count(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    pub fn max_concurrent_dispatch_count(&self) -> usize {
        self.max_concurrent.load(Ordering::Acquire)
    }

    pub fn zero_activity_count(&self) -> u64 {
        self.zero_activity.load(Ordering::Acquire)
    }

    pub fn subscribe_zero_activity(&self) -> broadcast::Receiver<ZeroActivity> {
        self.zero_activity_tx.subscribe()
    }

    pub fn snapshot(&self) -> DeliveryMetrics {
        DeliveryMetrics {
            active_dispatch_count: self.active_dispatch_count(),
            dispatch_count: self.dispatch_count(),
            max_concurrent_dispatch_count: self.max_concurrent_dispatch_count(),
            faulted_count: self.faulted.load(Ordering::Relaxed),
            cancelled_count: self.cancelled.load(Ordering::Relaxed),
            lock_lost_count: self.lock_lost.load(Ordering::Relaxed),
            zero_activity_count: self.zero_activity_count(),
            collected_at: Utc::now(),
        }
    }

    /// Wait until no dispatch is active. Returns false on timeout.
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                // Registered before the check so a concurrent transition is not missed.
                let notified = self.idle.notified();
                if self.active_dispatch_count() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

/// Guard for one in-flight dispatch
#[must_use = "dropping the guard immediately ends the dispatch"]
#[derive(Debug)]
pub struct ActiveDispatch {
    counters: Arc<DispatchCounters>,
}

impl Drop for ActiveDispatch {
    fn drop(&mut self) {
        self.counters.end();
    }
}
