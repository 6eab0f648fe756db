//! # Delivery Lock Context
//!
//! Uniform wrapper over a transport's acknowledgment primitive.
//!
//! A transport adapter implements [`TransportLock`] (complete / abandon / renew
//! against its broker SDK). The dispatcher and pipeline only ever talk to
//! [`LockContext`], which latches the first successful terminal operation so a
//! message is never acknowledged to the broker twice.
//!
//! ```text
//!             complete()/abandon()           transport Ok
//!  Pending ───────────────────────► Resolving ───────────► Completed | Abandoned
//!     ▲                                 │
//!     │ transport error (transient)     │ transport LockLost
//!     └─────────────────────────────────┤
//!                                       ▼
//!                                      Lost
//! ```

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::errors::{LockLostKind, MessagingError, MessagingResult};

/// Broker-specific acknowledgment primitive supplied by a transport adapter
#[async_trait]
pub trait TransportLock: Send + Sync + 'static {
    /// Acknowledge the message; the broker removes it
    async fn complete(&self) -> MessagingResult<()>;

    /// Release the message back to the broker for redelivery
    async fn abandon(&self) -> MessagingResult<()>;

    /// Extend the delivery lock during long processing
    async fn renew(&self) -> MessagingResult<()> {
        Err(MessagingError::RenewalNotSupported {
            transport: self.transport_name().to_string(),
        })
    }

    /// Whether [`TransportLock::renew`] is implemented
    fn supports_renewal(&self) -> bool {
        false
    }

    /// Transport name for logging
    fn transport_name(&self) -> &'static str;
}

/// Lifecycle state of a delivery lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockState {
    /// No terminal operation has succeeded yet
    Pending = 0,
    /// A terminal operation is in flight
    Resolving = 1,
    /// Message acknowledged
    Completed = 2,
    /// Message released for redelivery
    Abandoned = 3,
    /// Broker reported the lock expired
    Lost = 4,
}

impl From<u8> for LockState {
    fn from(value: u8) -> Self {
        match value {
            0 => LockState::Pending,
            1 => LockState::Resolving,
            2 => LockState::Completed,
            3 => LockState::Abandoned,
            _ => LockState::Lost,
        }
    }
}

impl std::fmt::Display for LockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LockState::Pending => "pending",
            LockState::Resolving => "resolving",
            LockState::Completed => "completed",
            LockState::Abandoned => "abandoned",
            LockState::Lost => "lost",
        };
        write!(f, "{name}")
    }
}

/// Result of a terminal lock operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// This call acknowledged the message
    Completed,
    /// This call released the message
    Abandoned,
    /// Another terminal operation already won; the broker was not contacted
    AlreadyResolved(LockState),
}

/// Capability flags advertised by the underlying transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockCapabilities {
    pub renewable: bool,
    pub completable: bool,
}

/// Latched delivery lock bound to one received message
pub struct LockContext {
    message_id: String,
    state: AtomicU8,
    transport: Arc<dyn TransportLock>,
}

impl std::fmt::Debug for LockContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockContext")
            .field("message_id", &self.message_id)
            .field("state", &self.state())
            .field("transport", &self.transport.transport_name())
            .finish()
    }
}

impl LockContext {
    pub fn new(message_id: impl Into<String>, transport: Arc<dyn TransportLock>) -> Self {
        Self {
            message_id: message_id.into(),
            state: AtomicU8::new(LockState::Pending as u8),
            transport,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn state(&self) -> LockState {
        LockState::from(self.state.load(Ordering::Acquire))
    }

    /// True once a terminal operation succeeded or the lock was lost
    pub fn is_resolved(&self) -> bool {
        matches!(
            self.state(),
            LockState::Completed | LockState::Abandoned | LockState::Lost
        )
    }

    pub fn capabilities(&self) -> LockCapabilities {
        LockCapabilities {
            renewable: self.transport.supports_renewal(),
            completable: true,
        }
    }

    /// Acknowledge the message. A second terminal call is a no-op.
    pub async fn complete(&self) -> MessagingResult<LockOutcome> {
        self.resolve(LockState::Completed).await
    }

    /// Release the message for redelivery. A call after resolution is a no-op.
    pub async fn abandon(&self) -> MessagingResult<LockOutcome> {
        self.resolve(LockState::Abandoned).await
    }

    /// Extend the broker lock; only valid while the lock is pending
    pub async fn renew(&self) -> MessagingResult<()> {
        let state = self.state();
        if state != LockState::Pending {
            return Err(MessagingError::lock_resolved(
                self.message_id.clone(),
                state.to_string(),
            ));
        }

        match self.transport.renew().await {
            Ok(()) => {
                debug!(message_id = %self.message_id, "🔒 Delivery lock renewed");
                Ok(())
            }
            Err(err) => {
                if err.is_lock_lost() {
                    self.mark_lost();
                }
                Err(err)
            }
        }
    }

    /// Record that the broker reported the lock as expired.
    ///
    /// Only an unresolved lock moves to `Lost`; a lock already latched as
    /// completed or abandoned keeps the state the broker actually received.
    /// Returns true when this call recorded the loss.
    pub fn mark_lost(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            match LockState::from(current) {
                LockState::Pending | LockState::Resolving => {}
                latched => {
                    debug!(
                        message_id = %self.message_id,
                        state = %latched,
                        "Lock loss reported after resolution, keeping latched state"
                    );
                    return false;
                }
            }
            match self.state.compare_exchange_weak(
                current,
                LockState::Lost as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(previous) => {
                    warn!(
                        message_id = %self.message_id,
                        previous_state = %LockState::from(previous),
                        "⚠️ Delivery lock lost"
                    );
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    async fn resolve(&self, target: LockState) -> MessagingResult<LockOutcome> {
        if let Err(current) = self.state.compare_exchange(
            LockState::Pending as u8,
            LockState::Resolving as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            let current = LockState::from(current);
            debug!(
                message_id = %self.message_id,
                state = %current,
                requested = %target,
                "Delivery lock already resolved, skipping broker call"
            );
            return Ok(LockOutcome::AlreadyResolved(current));
        }

        let result = match target {
            LockState::Completed => self.transport.complete().await,
            _ => self.transport.abandon().await,
        };

        match result {
            Ok(()) => {
                self.state.store(target as u8, Ordering::Release);
                debug!(message_id = %self.message_id, state = %target, "🔓 Delivery lock resolved");
                Ok(match target {
                    LockState::Completed => LockOutcome::Completed,
                    _ => LockOutcome::Abandoned,
                })
            }
            Err(err) if err.is_lock_lost() => {
                self.state.store(LockState::Lost as u8, Ordering::Release);
                warn!(message_id = %self.message_id, error = %err, "⚠️ Delivery lock lost during resolution");
                Err(err)
            }
            Err(err) => {
                // Nothing was acknowledged, so a later terminal call may still succeed.
                self.state.store(LockState::Pending as u8, Ordering::Release);
                Err(err)
            }
        }
    }
}

impl Drop for LockContext {
    fn drop(&mut self) {
        if self.state() == LockState::Pending {
            warn!(
                message_id = %self.message_id,
                transport = self.transport.transport_name(),
                "Delivery lock dropped unresolved; broker will redeliver after lock expiry"
            );
        }
    }
}

/// In-process [`TransportLock`] that records broker calls.
///
/// Used by tests and the demo binary in place of a broker SDK.
#[derive(Debug)]
pub struct InMemoryTransportLock {
    message_id: String,
    renewable: bool,
    lose_lock: AtomicBool,
    lost_kind: LockLostKind,
    complete_calls: AtomicUsize,
    abandon_calls: AtomicUsize,
    renew_calls: AtomicUsize,
}

impl InMemoryTransportLock {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            renewable: true,
            lose_lock: AtomicBool::new(false),
            lost_kind: LockLostKind::Message,
            complete_calls: AtomicUsize::new(0),
            abandon_calls: AtomicUsize::new(0),
            renew_calls: AtomicUsize::new(0),
        }
    }

    /// Report every subsequent broker call as lock lost
    pub fn with_lost_lock(self, kind: LockLostKind) -> Self {
        self.lose_lock.store(true, Ordering::Release);
        Self {
            lost_kind: kind,
            ..self
        }
    }

    pub fn without_renewal(self) -> Self {
        Self {
            renewable: false,
            ..self
        }
    }

    /// Arm lock loss after construction (e.g. from inside a running pipeline)
    pub fn expire(&self) {
        self.lose_lock.store(true, Ordering::Release);
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::Acquire)
    }

    pub fn abandon_calls(&self) -> usize {
        self.abandon_calls.load(Ordering::Acquire)
    }

    pub fn renew_calls(&self) -> usize {
        self.renew_calls.load(Ordering::Acquire)
    }

    fn check_lock(&self) -> MessagingResult<()> {
        if self.lose_lock.load(Ordering::Acquire) {
            Err(MessagingError::lock_lost(
                self.lost_kind,
                self.message_id.clone(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TransportLock for InMemoryTransportLock {
    async fn complete(&self) -> MessagingResult<()> {
        self.check_lock()?;
        self.complete_calls.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn abandon(&self) -> MessagingResult<()> {
        self.check_lock()?;
        self.abandon_calls.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn renew(&self) -> MessagingResult<()> {
        if !self.renewable {
            return Err(MessagingError::RenewalNotSupported {
                transport: self.transport_name().to_string(),
            });
        }
        self.check_lock()?;
        self.renew_calls.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn supports_renewal(&self) -> bool {
        self.renewable
    }

    fn transport_name(&self) -> &'static str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_pair() -> (Arc<InMemoryTransportLock>, LockContext) {
        let transport = Arc::new(InMemoryTransportLock::new("m-1"));
        let lock = LockContext::new("m-1", transport.clone());
        (transport, lock)
    }

    #[tokio::test]
    async fn test_complete_twice_acknowledges_once() {
        let (transport, lock) = lock_pair();

        assert_eq!(lock.complete().await.unwrap(), LockOutcome::Completed);
        assert_eq!(
            lock.complete().await.unwrap(),
            LockOutcome::AlreadyResolved(LockState::Completed)
        );
        assert_eq!(transport.complete_calls(), 1);
        assert_eq!(lock.state(), LockState::Completed);
    }

    #[tokio::test]
    async fn test_abandon_after_complete_is_noop() {
        let (transport, lock) = lock_pair();

        lock.complete().await.unwrap();
        assert_eq!(
            lock.abandon().await.unwrap(),
            LockOutcome::AlreadyResolved(LockState::Completed)
        );
        assert_eq!(transport.abandon_calls(), 0);
    }

    #[tokio::test]
    async fn test_lock_lost_is_distinguishable() {
        let transport = Arc::new(InMemoryTransportLock::new("m-2").with_lost_lock(LockLostKind::Session));
        let lock = LockContext::new("m-2", transport.clone());

        let err = lock.complete().await.unwrap_err();
        assert!(err.is_lock_lost());
        assert_eq!(lock.state(), LockState::Lost);
        assert_eq!(
            lock.abandon().await.unwrap(),
            LockOutcome::AlreadyResolved(LockState::Lost)
        );
        assert_eq!(transport.complete_calls(), 0);
    }

    #[tokio::test]
    async fn test_loss_after_completion_keeps_completed_state() {
        let (transport, lock) = lock_pair();

        lock.complete().await.unwrap();
        assert!(!lock.mark_lost());
        assert_eq!(lock.state(), LockState::Completed);
        assert_eq!(transport.complete_calls(), 1);

        let (_, pending) = lock_pair();
        assert!(pending.mark_lost());
        assert!(!pending.mark_lost());
        assert_eq!(pending.state(), LockState::Lost);
    }

    #[tokio::test]
    async fn test_renewal_only_while_pending() {
        let (transport, lock) = lock_pair();
        assert!(lock.capabilities().renewable);

        lock.renew().await.unwrap();
        assert_eq!(transport.renew_calls(), 1);

        lock.abandon().await.unwrap();
        let err = lock.renew().await.unwrap_err();
        assert!(matches!(err, MessagingError::LockResolved { .. }));
    }

    #[tokio::test]
    async fn test_renewal_not_supported() {
        let transport = Arc::new(InMemoryTransportLock::new("m-3").without_renewal());
        let lock = LockContext::new("m-3", transport);

        assert!(!lock.capabilities().renewable);
        let err = lock.renew().await.unwrap_err();
        assert!(matches!(err, MessagingError::RenewalNotSupported { .. }));
        assert_eq!(lock.state(), LockState::Pending);
        lock.abandon().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_completion_signals_broker_once() {
        let transport = Arc::new(InMemoryTransportLock::new("m-4"));
        let lock = Arc::new(LockContext::new("m-4", transport.clone()));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let lock = lock.clone();
            handles.push(tokio::spawn(async move { lock.complete().await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(transport.complete_calls(), 1);
    }
}
