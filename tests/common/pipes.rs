//! Scripted receive pipes and recording observers

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use relay_core::dispatch::{DispatchError, PipelineError, PipelineResult, ReceivePipe};
use relay_core::messaging::{LockLostKind, MessagingError, ReceiveContext};
use relay_core::observers::{ObserverResult, ReceiveObserver};

#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Succeed,
    Sleep(Duration),
    Fail,
    LoseLock,
    /// Acknowledge the lock, then report the session lock as lost
    CompleteThenLoseLock,
    Panic,
    WaitForCancel,
}

/// Pipe that acts out a [`Behavior`] and counts disposals of the contexts it saw
pub struct ScriptedPipe {
    behavior: Behavior,
    processed: AtomicUsize,
    disposed: Arc<AtomicUsize>,
}

impl ScriptedPipe {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            processed: AtomicUsize::new(0),
            disposed: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn disposed(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReceivePipe for ScriptedPipe {
    async fn process(&self, context: &ReceiveContext) -> PipelineResult<()> {
        self.processed.fetch_add(1, Ordering::SeqCst);
        let disposed = Arc::clone(&self.disposed);
        context.register_dispose(move || {
            disposed.fetch_add(1, Ordering::SeqCst);
        });

        match self.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Sleep(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            Behavior::Fail => Err(PipelineError::consumer_failed("scripted", "grill on fire")),
            Behavior::LoseLock => Err(MessagingError::lock_lost(
                LockLostKind::Message,
                context.message_id().to_string(),
            )
            .into()),
            Behavior::CompleteThenLoseLock => {
                if let Some(lock) = context.lock() {
                    lock.complete().await?;
                }
                Err(MessagingError::lock_lost(
                    LockLostKind::Session,
                    context.message_id().to_string(),
                )
                .into())
            }
            Behavior::Panic => panic!("scripted pipe panicked"),
            Behavior::WaitForCancel => {
                context.cancellation_token().cancelled().await;
                Err(PipelineError::Cancelled)
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Receive observer that records every notification
#[derive(Default)]
pub struct RecordingObserver {
    pub pre: AtomicUsize,
    pub post: AtomicUsize,
    pub faults: Mutex<Vec<DispatchError>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pre_count(&self) -> usize {
        self.pre.load(Ordering::SeqCst)
    }

    pub fn post_count(&self) -> usize {
        self.post.load(Ordering::SeqCst)
    }

    pub fn fault_count(&self) -> usize {
        self.faults.lock().len()
    }

    pub fn faults(&self) -> Vec<DispatchError> {
        self.faults.lock().clone()
    }
}

#[async_trait]
impl ReceiveObserver for RecordingObserver {
    async fn pre_receive(&self, _context: &ReceiveContext) -> ObserverResult<()> {
        self.pre.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn post_receive(&self, _context: &ReceiveContext) -> ObserverResult<()> {
        self.post.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn receive_fault(
        &self,
        _context: &ReceiveContext,
        fault: &DispatchError,
    ) -> ObserverResult<()> {
        self.faults.lock().push(fault.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}
