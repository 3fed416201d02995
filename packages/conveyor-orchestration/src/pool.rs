//! Worker pool manager: turns ready work items into durable work orders,
//! binds them to a fixed set of execution slots, and keeps a restorable
//! snapshot of its own state.
//!
//! All pool mutations are serialized behind a single mutex; long-running work
//! happens outside the pool, which only records slot assignment and
//! completion. Worker failure isolates to one slot: an errored worker stays
//! parked until `reset_worker` is called.

use crate::error::{OrchestratorError, Result};
use crate::item::{ItemStatus, WorkItem};
use crate::queue::{QueueEntry, ReadyQueue};
use chrono::{DateTime, Utc};
use conveyor_store::{StateStore, StateStoreExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Store collections used by the pool.
const ORDERS_COLLECTION: &str = "work_orders";
const POOL_COLLECTION: &str = "pool_state";

/// A durable, uniquely-identified attempt to execute one work item.
/// One item may generate multiple orders across retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkOrder {
    /// Sequential id, `WO-NNN`. Monotonic, never reused.
    pub id: String,
    pub item_id: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of executing an order, reported exactly once by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkOrderResult {
    pub order_id: String,
    pub success: bool,
    pub completed_at: DateTime<Utc>,
    /// Side effects produced while executing (e.g. file paths touched).
    pub side_effects: Vec<String>,
    pub error: Option<String>,
}

impl WorkOrderResult {
    pub fn success(order_id: impl Into<String>, side_effects: Vec<String>) -> Self {
        Self {
            order_id: order_id.into(),
            success: true,
            completed_at: Utc::now(),
            side_effects,
            error: None,
        }
    }

    pub fn failure(order_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            success: false,
            completed_at: Utc::now(),
            side_effects: Vec::new(),
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Working,
    Error,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Idle => "idle",
            WorkerStatus::Working => "working",
            WorkerStatus::Error => "error",
        }
    }
}

/// One execution slot. Holds at most one order at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub id: String,
    pub status: WorkerStatus,
    pub current_order: Option<String>,
    pub completed_count: u64,
    pub last_error: Option<String>,
}

impl Worker {
    fn new(index: usize) -> Self {
        Self {
            id: format!("worker-{}", index + 1),
            status: WorkerStatus::Idle,
            current_order: None,
            completed_count: 0,
            last_error: None,
        }
    }
}

/// Full pool snapshot, serialized to the state store by `save_state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub workers: Vec<Worker>,
    /// Items registered with the pool, carrying their current status.
    pub items: HashMap<String, WorkItem>,
    pub queue: Vec<QueueEntry>,
    /// Live orders (created, not yet completed or failed), keyed by order id.
    pub live_orders: HashMap<String, WorkOrder>,
    pub next_order: u64,
    pub completed_orders: Vec<String>,
    /// Failed order ids with their error text.
    pub failed_orders: Vec<(String, String)>,
    pub saved_at: DateTime<Utc>,
}

struct PoolState {
    workers: Vec<Worker>,
    items: HashMap<String, WorkItem>,
    queue: ReadyQueue,
    live_orders: HashMap<String, WorkOrder>,
    next_order: u64,
    completed_orders: Vec<String>,
    failed_orders: Vec<(String, String)>,
}

impl PoolState {
    fn worker_mut(&mut self, worker_id: &str) -> Result<&mut Worker> {
        self.workers
            .iter_mut()
            .find(|w| w.id == worker_id)
            .ok_or_else(|| OrchestratorError::UnknownWorker(worker_id.to_string()))
    }

    /// Item status tracks the lifecycle of its most recent order. The pool is
    /// the only mutator of registered items.
    fn set_item_status(&mut self, item_id: &str, status: ItemStatus) {
        if let Some(item) = self.items.get_mut(item_id) {
            item.status = status;
        }
    }

    fn item_of_order(&self, order_id: &str) -> Option<String> {
        self.live_orders.get(order_id).map(|o| o.item_id.clone())
    }
}

/// Callback invoked after every successful completion. Must not panic;
/// returned errors are logged and never propagate into pool state.
pub type CompletionCallback = Box<dyn Fn(&WorkOrderResult) -> Result<()> + Send + Sync>;

/// Callback invoked after every failure: `(worker_id, order_id, error)`.
pub type FailureCallback = Box<dyn Fn(&str, &str, &str) -> Result<()> + Send + Sync>;

/// Fixed-size pool of execution slots.
pub struct WorkerPool {
    store: Arc<dyn StateStore>,
    state: Mutex<PoolState>,
    on_complete: Mutex<Vec<CompletionCallback>>,
    on_failure: Mutex<Vec<FailureCallback>>,
}

impl WorkerPool {
    pub fn new(max_workers: usize, store: Arc<dyn StateStore>) -> Self {
        let workers = (0..max_workers).map(Worker::new).collect();
        Self {
            store,
            state: Mutex::new(PoolState {
                workers,
                items: HashMap::new(),
                queue: ReadyQueue::new(),
                live_orders: HashMap::new(),
                next_order: 1,
                completed_orders: Vec::new(),
                failed_orders: Vec::new(),
            }),
            on_complete: Mutex::new(Vec::new()),
            on_failure: Mutex::new(Vec::new()),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.state.lock().workers.len()
    }

    pub fn register_on_complete(&self, callback: CompletionCallback) {
        self.on_complete.lock().push(callback);
    }

    pub fn register_on_failure(&self, callback: FailureCallback) {
        self.on_failure.lock().push(callback);
    }

    /// Return an idle worker id, or `None` when every slot is busy or
    /// errored. Never blocks; callers poll.
    pub fn available_slot(&self) -> Option<String> {
        self.state
            .lock()
            .workers
            .iter()
            .find(|w| w.status == WorkerStatus::Idle)
            .map(|w| w.id.clone())
    }

    /// Allocate the next sequential order id and persist the order record.
    /// The item is registered with the pool on first sight; a repeat order
    /// for the same item keeps its current status.
    pub async fn create_work_order(&self, item: &WorkItem) -> Result<WorkOrder> {
        let order = {
            let mut state = self.state.lock();
            let order = WorkOrder {
                id: format!("WO-{:03}", state.next_order),
                item_id: item.id.clone(),
                created_at: Utc::now(),
            };
            state.next_order += 1;
            state.live_orders.insert(order.id.clone(), order.clone());
            state
                .items
                .entry(item.id.clone())
                .or_insert_with(|| item.clone());
            order
        };

        // Persist outside the lock; on failure roll the live entry back so
        // state and store stay consistent.
        if let Err(e) = self
            .store
            .put_record(ORDERS_COLLECTION, &order.id, &order)
            .await
        {
            self.state.lock().live_orders.remove(&order.id);
            return Err(e.into());
        }

        debug!(order_id = %order.id, item_id = %order.item_id, "work order created");
        Ok(order)
    }

    /// Bind an order to a worker. Assignment is not a queue: a worker that
    /// already holds an order, or sits in error state, rejects the bind.
    pub fn assign_work(&self, worker_id: &str, order: &WorkOrder) -> Result<()> {
        let mut state = self.state.lock();
        let worker = state.worker_mut(worker_id)?;

        match worker.status {
            WorkerStatus::Idle => {
                worker.status = WorkerStatus::Working;
                worker.current_order = Some(order.id.clone());
                state.set_item_status(&order.item_id, ItemStatus::Assigned);
                debug!(worker_id, order_id = %order.id, "order assigned");
                Ok(())
            }
            WorkerStatus::Working => Err(OrchestratorError::WorkerNotAvailable {
                worker_id: worker_id.to_string(),
                reason: format!(
                    "already holds order {}",
                    worker.current_order.as_deref().unwrap_or("?")
                ),
            }),
            WorkerStatus::Error => Err(OrchestratorError::WorkerNotAvailable {
                worker_id: worker_id.to_string(),
                reason: "in error state; reset required".to_string(),
            }),
        }
    }

    /// Mark the worker's current item as actively executing. Called by the
    /// executor once real work begins; assignment alone leaves the item
    /// `assigned`.
    pub fn begin_work(&self, worker_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let worker = state.worker_mut(worker_id)?;
        let order_id = worker.current_order.clone().ok_or_else(|| {
            OrchestratorError::InvalidStateTransition {
                from: format!("worker {} holding no order", worker_id),
                to: "in_progress".to_string(),
            }
        })?;

        if let Some(item_id) = state.item_of_order(&order_id) {
            state.set_item_status(&item_id, ItemStatus::InProgress);
        }
        Ok(())
    }

    /// Record a result for the worker's current order. A failed result
    /// behaves exactly like `fail_work`.
    pub fn complete_work(&self, worker_id: &str, result: WorkOrderResult) -> Result<()> {
        if !result.success {
            let error = result
                .error
                .clone()
                .unwrap_or_else(|| "unspecified failure".to_string());
            return self.fail_work(worker_id, &result.order_id, &error);
        }

        {
            let mut state = self.state.lock();
            let worker = state.worker_mut(worker_id)?;

            if worker.current_order.as_deref() != Some(result.order_id.as_str()) {
                return Err(OrchestratorError::InvalidStateTransition {
                    from: format!(
                        "worker {} holding {:?}",
                        worker_id, worker.current_order
                    ),
                    to: format!("complete {}", result.order_id),
                });
            }

            worker.status = WorkerStatus::Idle;
            worker.current_order = None;
            worker.completed_count += 1;
            let item_id = state.item_of_order(&result.order_id);
            state.completed_orders.push(result.order_id.clone());
            state.live_orders.remove(&result.order_id);
            if let Some(item_id) = item_id {
                state.set_item_status(&item_id, ItemStatus::Completed);
            }
        }

        info!(worker_id, order_id = %result.order_id, "order completed");
        self.run_completion_callbacks(&result);
        Ok(())
    }

    /// Mark the worker errored and the order failed. The worker is *not*
    /// returned to idle; it stays parked until `reset_worker`.
    pub fn fail_work(&self, worker_id: &str, order_id: &str, error: &str) -> Result<()> {
        {
            let mut state = self.state.lock();
            let worker = state.worker_mut(worker_id)?;

            worker.status = WorkerStatus::Error;
            worker.current_order = None;
            worker.last_error = Some(error.to_string());
            let item_id = state.item_of_order(order_id);
            state
                .failed_orders
                .push((order_id.to_string(), error.to_string()));
            state.live_orders.remove(order_id);
            if let Some(item_id) = item_id {
                state.set_item_status(&item_id, ItemStatus::Failed);
            }
        }

        warn!(worker_id, order_id, error, "order failed; worker parked");
        self.run_failure_callbacks(worker_id, order_id, error);
        Ok(())
    }

    /// Clear a worker's error state and return it to idle. The only way to
    /// reuse a worker after failure. Resetting an idle worker is a no-op;
    /// resetting a working worker is a contract violation.
    pub fn reset_worker(&self, worker_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let worker = state.worker_mut(worker_id)?;

        match worker.status {
            WorkerStatus::Error => {
                worker.status = WorkerStatus::Idle;
                worker.last_error = None;
                debug!(worker_id, "worker reset to idle");
                Ok(())
            }
            WorkerStatus::Idle => Ok(()),
            WorkerStatus::Working => Err(OrchestratorError::InvalidStateTransition {
                from: "working".to_string(),
                to: "idle (reset)".to_string(),
            }),
        }
    }

    pub fn enqueue(&self, item_id: &str, score: i64) {
        self.state.lock().queue.enqueue(item_id, score);
    }

    pub fn dequeue(&self) -> Option<QueueEntry> {
        self.state.lock().queue.dequeue()
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Whether any live order currently wraps the given item.
    pub fn is_in_progress(&self, item_id: &str) -> bool {
        self.state
            .lock()
            .live_orders
            .values()
            .any(|o| o.item_id == item_id)
    }

    /// Current view of a registered item, status included.
    pub fn item(&self, item_id: &str) -> Option<WorkItem> {
        self.state.lock().items.get(item_id).cloned()
    }

    pub fn worker(&self, worker_id: &str) -> Option<Worker> {
        self.state
            .lock()
            .workers
            .iter()
            .find(|w| w.id == worker_id)
            .cloned()
    }

    pub fn workers(&self) -> Vec<Worker> {
        self.state.lock().workers.clone()
    }

    pub fn completed_orders(&self) -> Vec<String> {
        self.state.lock().completed_orders.clone()
    }

    pub fn failed_orders(&self) -> Vec<(String, String)> {
        self.state.lock().failed_orders.clone()
    }

    fn snapshot(&self) -> PoolSnapshot {
        let state = self.state.lock();
        PoolSnapshot {
            workers: state.workers.clone(),
            items: state.items.clone(),
            queue: state.queue.entries(),
            live_orders: state.live_orders.clone(),
            next_order: state.next_order,
            completed_orders: state.completed_orders.clone(),
            failed_orders: state.failed_orders.clone(),
            saved_at: Utc::now(),
        }
    }

    /// Serialize the full pool snapshot to the store, keyed by session.
    pub async fn save_state(&self, session_key: &str) -> Result<()> {
        let snapshot = self.snapshot();
        self.store
            .put_record(POOL_COLLECTION, session_key, &snapshot)
            .await?;
        debug!(session_key, "pool state saved");
        Ok(())
    }

    /// Restore the pool from a saved snapshot. Callback registrations are
    /// process-local and survive unchanged.
    pub async fn load_state(&self, session_key: &str) -> Result<()> {
        let snapshot: PoolSnapshot = self
            .store
            .get_record(POOL_COLLECTION, session_key)
            .await?;

        let mut state = self.state.lock();
        state.workers = snapshot.workers;
        state.items = snapshot.items;
        state.queue = ReadyQueue::restore(snapshot.queue);
        state.live_orders = snapshot.live_orders;
        state.next_order = snapshot.next_order;
        state.completed_orders = snapshot.completed_orders;
        state.failed_orders = snapshot.failed_orders;

        info!(session_key, workers = state.workers.len(), "pool state restored");
        Ok(())
    }

    fn run_completion_callbacks(&self, result: &WorkOrderResult) {
        for callback in self.on_complete.lock().iter() {
            if let Err(e) = callback(result) {
                // A bad handler must not corrupt pool state.
                warn!(order_id = %result.order_id, error = %e, "completion callback failed");
            }
        }
    }

    fn run_failure_callbacks(&self, worker_id: &str, order_id: &str, error: &str) {
        for callback in self.on_failure.lock().iter() {
            if let Err(e) = callback(worker_id, order_id, error) {
                warn!(order_id, error = %e, "failure callback failed");
            }
        }
    }
}
