//! Unit-of-work executor
//!
//! Runs one unit of work at a time per worker on a bounded pool of blocking
//! threads. Each unit gets its own transactional context, opened for the
//! request's identity before the work function runs and closed after it
//! returns: commit on success, rollback on error or panic. Errors are handed
//! back to the caller untouched; nothing is retried.

use crate::error::{BackboneError, Result};
use crate::facade::{DataStore, TxContext, TxOutcome};
use crate::types::Identity;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Default pool size: two workers per available processing unit
pub fn default_worker_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        * 2
}

/// What a work function sees
pub struct WorkContext<'a> {
    pub tx: &'a TxContext,
    pub store: &'a dyn DataStore,
}

type WorkFn<T> = Box<dyn FnOnce(&WorkContext<'_>) -> Result<T> + Send>;

/// One scoped execution of one operation for one identity
pub struct UnitOfWork<T> {
    operation: &'static str,
    identity: Identity,
    work: WorkFn<T>,
}

impl<T> UnitOfWork<T> {
    pub fn new(
        operation: &'static str,
        identity: Identity,
        work: impl FnOnce(&WorkContext<'_>) -> Result<T> + Send + 'static,
    ) -> Self {
        Self {
            operation,
            identity,
            work: Box::new(work),
        }
    }

    /// Operation name, for diagnostics
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

/// Bounded executor for units of work
#[derive(Clone)]
pub struct Executor {
    store: Arc<dyn DataStore>,
    permits: Arc<Semaphore>,
    size: usize,
}

impl Executor {
    /// Create an executor with `size` workers
    pub fn new(store: Arc<dyn DataStore>, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(BackboneError::Config(
                "worker pool size must be at least 1".to_string(),
            ));
        }
        tracing::info!(workers = size, "Worker pool ready");
        Ok(Self {
            store,
            permits: Arc::new(Semaphore::new(size)),
            size,
        })
    }

    /// Number of workers
    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers currently idle
    pub fn idle(&self) -> usize {
        self.permits.available_permits()
    }

    /// The store units of work run against
    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    /// Run a unit of work to completion on a worker
    pub async fn execute<T: Send + 'static>(&self, unit: UnitOfWork<T>) -> Result<T> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BackboneError::Worker("worker pool closed".to_string()))?;

        let store = Arc::clone(&self.store);
        let operation = unit.operation;
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            run(store.as_ref(), unit)
        });

        handle.await.map_err(|e| {
            BackboneError::Worker(format!("unit of work '{}' aborted: {}", operation, e))
        })?
    }
}

fn run<T>(store: &dyn DataStore, unit: UnitOfWork<T>) -> Result<T> {
    let UnitOfWork {
        operation,
        identity,
        work,
    } = unit;

    let tx = store.begin(&identity)?;
    tracing::debug!(operation, tx = %tx.id(), subject = %identity.subject, "Unit of work started");

    let result = {
        let cx = WorkContext { tx: &tx, store };
        match catch_unwind(AssertUnwindSafe(|| work(&cx))) {
            Ok(result) => result,
            Err(panic) => Err(BackboneError::Worker(format!(
                "unit of work '{}' panicked: {}",
                operation,
                panic_message(panic.as_ref())
            ))),
        }
    };

    let outcome = if result.is_ok() {
        TxOutcome::Commit
    } else {
        TxOutcome::Rollback
    };
    let tx_id = tx.id();
    match store.finish(tx, outcome) {
        Ok(()) => {
            tracing::debug!(operation, tx = %tx_id, ?outcome, "Unit of work finished");
            result
        }
        Err(e) if result.is_ok() => Err(e),
        Err(e) => {
            tracing::warn!(operation, tx = %tx_id, error = %e, "Failed to close transaction after error");
            result
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
