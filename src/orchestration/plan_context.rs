//! # Execute Plan Context
//!
//! Fork-join session for one originating request. Sub-tasks are declared with
//! [`ExecutePlanContext::push`], each getting a [`SlotHandle`] that writes the
//! slot's single result. [`ExecutePlanContext::await_all`] seals the fork set
//! and resolves once every slot has a result, the time-to-live elapses, or the
//! originating message is cancelled.
//!
//! ## Completion detection
//!
//! `remaining` starts at 1, a token held by the unsealed context. Every push
//! adds one, every slot write and the seal subtract one. Whichever decrement
//! reaches zero builds the aggregate. The aggregate itself lives in a
//! `OnceLock`, so the completion, timeout and cancellation paths race to set it
//! and exactly one wins; everyone else reads the stored value.
//!
//! ```text
//! push ×K ──► remaining = 1 + K
//! slot writes ──► remaining -= 1 each ─┐
//! await_all (seal) ──► remaining -= 1 ─┴─► 0 ─► aggregate.set(..) ─► notify
//! ttl / cancel ─────────────────────────────► aggregate.set(..) (if still unset)
//! ```

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::errors::{AggregateFault, ForkJoinError, ForkJoinResult, PlanFault, SlotFault};
use super::itinerary::SubTask;
use crate::config::ForkJoinConfig;
use crate::messaging::ReceiveContext;

pub type AggregateOutcome = Result<AggregateResult, AggregateFault>;

/// Successful fork-join result: one entry per declared sub-task
#[derive(Debug, Clone)]
pub struct AggregateResult {
    pub correlation_id: Uuid,
    pub results: HashMap<Uuid, Value>,
    /// Sub-task ids in declaration order
    pub order: Vec<Uuid>,
    pub elapsed: Duration,
}

impl AggregateResult {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn contains(&self, sub_task_id: Uuid) -> bool {
        self.results.contains_key(&sub_task_id)
    }

    pub fn get<R: DeserializeOwned>(&self, sub_task_id: Uuid) -> ForkJoinResult<R> {
        let value = self
            .results
            .get(&sub_task_id)
            .ok_or(ForkJoinError::UnknownSubTask { sub_task_id })?;
        serde_json::from_value(value.clone()).map_err(|e| ForkJoinError::ResultDeserialization {
            sub_task_id,
            message: e.to_string(),
        })
    }

    /// Typed results for the given ids, in the order given
    pub fn collect<R: DeserializeOwned>(&self, sub_task_ids: &[Uuid]) -> ForkJoinResult<Vec<R>> {
        sub_task_ids.iter().map(|id| self.get(*id)).collect()
    }
}

/// A slot write that arrived after the aggregate was emitted
#[derive(Debug, Clone)]
pub struct LateResult {
    pub sub_task_id: Uuid,
    pub outcome: Result<Value, PlanFault>,
    pub arrived_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Slot {
    sub_task_id: Uuid,
    sub_task_type: &'static str,
    outcome: OnceLock<Result<Value, PlanFault>>,
}

struct PlanContextInner {
    correlation_id: Uuid,
    time_to_live: Option<Duration>,
    cancellation: CancellationToken,
    record_late_results: bool,
    slots: RwLock<Vec<Arc<Slot>>>,
    remaining: AtomicUsize,
    sealed: AtomicBool,
    /// Set under the slots write lock when a partial aggregate is taken
    closed: AtomicBool,
    aggregate: OnceLock<AggregateOutcome>,
    resolved: Notify,
    late: Mutex<Vec<LateResult>>,
    created_at: Instant,
}

/// Fork-join session shared by the originating consumer and its executors
#[derive(Clone)]
pub struct ExecutePlanContext {
    inner: Arc<PlanContextInner>,
}

impl std::fmt::Debug for ExecutePlanContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutePlanContext")
            .field("correlation_id", &self.inner.correlation_id)
            .field("declared", &self.declared_count())
            .field("sealed", &self.is_sealed())
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Builder for [`ExecutePlanContext`]
#[derive(Debug, Clone)]
pub struct PlanContextBuilder {
    correlation_id: Uuid,
    time_to_live: Option<Duration>,
    cancellation: Option<CancellationToken>,
    record_late_results: bool,
}

impl PlanContextBuilder {
    pub fn time_to_live(mut self, time_to_live: Duration) -> Self {
        self.time_to_live = Some(time_to_live);
        self
    }

    /// Apply configured defaults without overriding explicit settings
    pub fn with_config(mut self, config: &ForkJoinConfig) -> Self {
        if self.time_to_live.is_none() {
            self.time_to_live = config.default_time_to_live();
        }
        self.record_late_results = config.record_late_results;
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn record_late_results(mut self, record: bool) -> Self {
        self.record_late_results = record;
        self
    }

    pub fn build(self) -> ExecutePlanContext {
        debug!(
            correlation_id = %self.correlation_id,
            time_to_live_ms = self.time_to_live.map(|ttl| ttl.as_millis() as u64),
            "Fork-join session created"
        );
        ExecutePlanContext {
            inner: Arc::new(PlanContextInner {
                correlation_id: self.correlation_id,
                time_to_live: self.time_to_live,
                cancellation: self.cancellation.unwrap_or_default(),
                record_late_results: self.record_late_results,
                slots: RwLock::new(Vec::new()),
                remaining: AtomicUsize::new(1),
                sealed: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                aggregate: OnceLock::new(),
                resolved: Notify::new(),
                late: Mutex::new(Vec::new()),
                created_at: Instant::now(),
            }),
        }
    }
}

impl ExecutePlanContext {
    pub fn builder(correlation_id: Uuid) -> PlanContextBuilder {
        PlanContextBuilder {
            correlation_id,
            time_to_live: None,
            cancellation: None,
            record_late_results: true,
        }
    }

    pub fn new(correlation_id: Uuid) -> Self {
        Self::builder(correlation_id).build()
    }

    /// Builder bound to a received message: its correlation id, and a child
    /// of its cancellation token
    pub fn receive_builder(context: &ReceiveContext) -> PlanContextBuilder {
        Self::builder(context.correlation_id())
            .cancellation(context.cancellation_token().child_token())
    }

    pub fn from_receive_context(context: &ReceiveContext, time_to_live: Option<Duration>) -> Self {
        let mut builder = Self::receive_builder(context);
        if let Some(ttl) = time_to_live {
            builder = builder.time_to_live(ttl);
        }
        builder.build()
    }

    pub fn correlation_id(&self) -> Uuid {
        self.inner.correlation_id
    }

    pub fn time_to_live(&self) -> Option<Duration> {
        self.inner.time_to_live
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.cancellation
    }

    pub fn records_late_results(&self) -> bool {
        self.inner.record_late_results
    }

    pub fn declared_count(&self) -> usize {
        self.inner.slots.read().len()
    }

    /// Declared slots that have no result yet
    pub fn pending_count(&self) -> usize {
        self.inner
            .slots
            .read()
            .iter()
            .filter(|slot| slot.outcome.get().is_none())
            .count()
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.sealed.load(Ordering::Acquire)
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.aggregate.get().is_some()
    }

    /// Slot writes that arrived after the aggregate was emitted
    pub fn late_results(&self) -> Vec<LateResult> {
        self.inner.late.lock().clone()
    }

    /// Declare one expected sub-task
    pub fn push<T: SubTask>(&self, sub_task: T) -> ForkJoinResult<SlotHandle<T>> {
        let sub_task_id = sub_task.sub_task_id();
        let slot = {
            let mut slots = self.inner.slots.write();
            if self.inner.sealed.load(Ordering::Acquire) {
                return Err(ForkJoinError::Sealed {
                    correlation_id: self.inner.correlation_id,
                });
            }
            if slots.iter().any(|slot| slot.sub_task_id == sub_task_id) {
                return Err(ForkJoinError::DuplicateSubTask { sub_task_id });
            }

            let slot = Arc::new(Slot {
                sub_task_id,
                sub_task_type: T::sub_task_type(),
                outcome: OnceLock::new(),
            });
            self.inner.remaining.fetch_add(1, Ordering::AcqRel);
            slots.push(Arc::clone(&slot));
            slot
        };

        debug!(
            correlation_id = %self.inner.correlation_id,
            sub_task_id = %sub_task_id,
            sub_task_type = T::sub_task_type(),
            "Sub-task pushed"
        );

        Ok(SlotHandle {
            context: self.clone(),
            slot,
            sub_task,
            written: false,
        })
    }

    /// Seal the fork set and wait for the aggregate.
    ///
    /// Calling this again returns the stored aggregate.
    pub async fn await_all(&self) -> AggregateOutcome {
        if let Some(outcome) = self.inner.aggregate.get() {
            return outcome.clone();
        }

        self.seal();

        let completed = async {
            loop {
                let notified = self.inner.resolved.notified();
                if let Some(outcome) = self.inner.aggregate.get() {
                    return outcome.clone();
                }
                notified.await;
            }
        };

        let deadline = async {
            match self.inner.time_to_live {
                Some(ttl) => {
                    tokio::time::sleep_until(self.inner.created_at + ttl).await
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            outcome = completed => outcome,
            _ = deadline => self.emit(|inner| {
                let (completed, faults, pending) = inner.partition();
                warn!(
                    correlation_id = %inner.correlation_id,
                    pending = pending.len(),
                    faulted = faults.len(),
                    "⏰ Fork-join time-to-live elapsed"
                );
                Err(AggregateFault::TimedOut {
                    correlation_id: inner.correlation_id,
                    time_to_live: inner.time_to_live.unwrap_or_default(),
                    completed,
                    faults,
                    pending,
                })
            }),
            _ = self.inner.cancellation.cancelled() => self.emit(|inner| {
                let (completed, faults, pending) = inner.partition();
                info!(
                    correlation_id = %inner.correlation_id,
                    pending = pending.len(),
                    faulted = faults.len(),
                    "Fork-join cancelled"
                );
                Err(AggregateFault::Cancelled {
                    correlation_id: inner.correlation_id,
                    completed,
                    faults,
                    pending,
                })
            }),
        }
    }

    fn seal(&self) {
        let first = {
            let _slots = self.inner.slots.write();
            !self.inner.sealed.swap(true, Ordering::AcqRel)
        };
        if first {
            debug!(
                correlation_id = %self.inner.correlation_id,
                declared = self.declared_count(),
                "Fork set sealed"
            );
            self.release_one();
        }
    }

    fn release_one(&self) {
        if self.inner.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.emit(PlanContextInner::collect);
        }
    }

    /// Set the aggregate if nobody has yet, and return whichever value won
    fn emit<F>(&self, build: F) -> AggregateOutcome
    where
        F: FnOnce(&PlanContextInner) -> AggregateOutcome,
    {
        let mut emitted = false;
        let outcome = self
            .inner
            .aggregate
            .get_or_init(|| {
                emitted = true;
                build(&self.inner)
            })
            .clone();

        if emitted {
            self.inner.resolved.notify_waiters();
            let elapsed_ms = self.inner.created_at.elapsed().as_millis() as u64;
            match &outcome {
                Ok(result) => info!(
                    correlation_id = %self.inner.correlation_id,
                    results = result.len(),
                    elapsed_ms = elapsed_ms,
                    "🧩 Fork-join aggregate completed"
                ),
                Err(fault) => warn!(
                    correlation_id = %self.inner.correlation_id,
                    elapsed_ms = elapsed_ms,
                    error = %fault,
                    "Fork-join aggregate faulted"
                ),
            }
        }
        outcome
    }

    fn write(&self, slot: &Slot, outcome: Result<Value, PlanFault>) -> bool {
        let late = {
            let _slots = self.inner.slots.read();
            if self.inner.closed.load(Ordering::Acquire) || self.is_resolved() {
                Some(outcome)
            } else if slot.outcome.set(outcome).is_err() {
                warn!(
                    correlation_id = %self.inner.correlation_id,
                    sub_task_id = %slot.sub_task_id,
                    "Slot already resolved, ignoring second write"
                );
                return false;
            } else {
                None
            }
        };

        match late {
            Some(outcome) => {
                self.record_late(slot, outcome);
                false
            }
            None => {
                self.release_one();
                true
            }
        }
    }

    fn record_late(&self, slot: &Slot, outcome: Result<Value, PlanFault>) {
        debug!(
            correlation_id = %self.inner.correlation_id,
            sub_task_id = %slot.sub_task_id,
            faulted = outcome.is_err(),
            "Late sub-task result after aggregate was emitted"
        );
        if self.inner.record_late_results {
            self.inner.late.lock().push(LateResult {
                sub_task_id: slot.sub_task_id,
                outcome,
                arrived_at: Utc::now(),
            });
        }
    }
}

impl PlanContextInner {
    /// Aggregate once every slot has a result
    fn collect(&self) -> AggregateOutcome {
        let slots = self.slots.read();
        let mut results = HashMap::with_capacity(slots.len());
        let mut order = Vec::with_capacity(slots.len());
        let mut faults = Vec::new();

        for slot in slots.iter() {
            match slot.outcome.get() {
                Some(Ok(value)) => {
                    results.insert(slot.sub_task_id, value.clone());
                    order.push(slot.sub_task_id);
                }
                Some(Err(fault)) => faults.push(SlotFault {
                    sub_task_id: slot.sub_task_id,
                    sub_task_type: slot.sub_task_type.to_string(),
                    fault: fault.clone(),
                }),
                None => faults.push(SlotFault {
                    sub_task_id: slot.sub_task_id,
                    sub_task_type: slot.sub_task_type.to_string(),
                    fault: PlanFault::Abandoned {
                        sub_task_id: slot.sub_task_id,
                    },
                }),
            }
        }

        if faults.is_empty() {
            Ok(AggregateResult {
                correlation_id: self.correlation_id,
                results,
                order,
                elapsed: self.created_at.elapsed(),
            })
        } else {
            Err(AggregateFault::Faulted {
                correlation_id: self.correlation_id,
                faults,
                completed: results,
            })
        }
    }

    /// Close the slots to further writes and split them into completed
    /// results, slot faults and pending ids
    fn partition(&self) -> (HashMap<Uuid, Value>, Vec<SlotFault>, Vec<Uuid>) {
        let slots = self.slots.write();
        self.closed.store(true, Ordering::Release);
        let mut completed = HashMap::new();
        let mut faults = Vec::new();
        let mut pending = Vec::new();
        for slot in slots.iter() {
            match slot.outcome.get() {
                Some(Ok(value)) => {
                    completed.insert(slot.sub_task_id, value.clone());
                }
                Some(Err(fault)) => faults.push(SlotFault {
                    sub_task_id: slot.sub_task_id,
                    sub_task_type: slot.sub_task_type.to_string(),
                    fault: fault.clone(),
                }),
                None => pending.push(slot.sub_task_id),
            }
        }
        (completed, faults, pending)
    }
}

/// Write access to exactly one slot.
///
/// Dropping a handle without writing resolves the slot with
/// [`PlanFault::Abandoned`], so a lost executor cannot hang the join.
pub struct SlotHandle<T: SubTask> {
    context: ExecutePlanContext,
    slot: Arc<Slot>,
    sub_task: T,
    written: bool,
}

impl<T: SubTask> std::fmt::Debug for SlotHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotHandle")
            .field("correlation_id", &self.context.correlation_id())
            .field("sub_task_id", &self.slot.sub_task_id)
            .field("sub_task_type", &self.slot.sub_task_type)
            .finish()
    }
}

impl<T: SubTask> SlotHandle<T> {
    pub fn sub_task(&self) -> &T {
        &self.sub_task
    }

    pub fn sub_task_id(&self) -> Uuid {
        self.slot.sub_task_id
    }

    pub fn plan_context(&self) -> &ExecutePlanContext {
        &self.context
    }

    /// Resolve the slot with a serializable completion.
    /// Returns false when the write arrived after the aggregate was emitted.
    pub fn complete<R: Serialize>(self, completion: &R) -> ForkJoinResult<bool> {
        let value = serde_json::to_value(completion).map_err(|e| {
            ForkJoinError::SubTaskSerialization {
                message: e.to_string(),
            }
        })?;
        Ok(self.resolve(Ok(value)))
    }

    pub fn fault(self, fault: PlanFault) -> bool {
        self.resolve(Err(fault))
    }

    pub fn resolve(mut self, outcome: Result<Value, PlanFault>) -> bool {
        self.written = true;
        self.context.write(&self.slot, outcome)
    }
}

impl<T: SubTask> Drop for SlotHandle<T> {
    fn drop(&mut self) {
        if !self.written {
            warn!(
                correlation_id = %self.context.correlation_id(),
                sub_task_id = %self.slot.sub_task_id,
                "Slot handle dropped without a result"
            );
            self.context.write(
                &self.slot,
                Err(PlanFault::Abandoned {
                    sub_task_id: self.slot.sub_task_id,
                }),
            );
        }
    }
}
