//! Optimistic writes for latency-sensitive records such as chat messages.
//!
//! A submitted record is visible immediately under a temporary id
//! (`tmp-1`, `tmp-2`, ...) with status `Pending`. The create request runs on a
//! spawned task; its result moves the operation to `Confirmed` (carrying the
//! server's id and copy) or `Failed`. Each operation changes status at most
//! once. Retrying a failed operation creates a new one.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use hireline_api::{ApiError, PullBackend};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::entity::Optimistic;
use crate::error::StoreError;
use crate::notify::Notifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpStatus {
    Pending,
    Confirmed,
    Failed,
}

impl OpStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OpStatus::Pending => "pending",
            OpStatus::Confirmed => "confirmed",
            OpStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for OpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One optimistic write.
#[derive(Debug, Clone)]
pub struct OptimisticOp<T> {
    pub temp_id: String,
    /// Set exactly when the status is `Confirmed`.
    pub canonical_id: Option<String>,
    pub status: OpStatus,
    /// What the caller submitted.
    pub payload: T,
    /// The server's copy, once confirmed.
    pub confirmed: Option<T>,
    pub error: Option<StoreError>,
}

impl<T: Optimistic> OptimisticOp<T> {
    fn pending(temp_id: String, payload: T) -> Self {
        Self {
            temp_id,
            canonical_id: None,
            status: OpStatus::Pending,
            payload,
            confirmed: None,
            error: None,
        }
    }

    /// The record to display: the server's copy once confirmed, otherwise the
    /// payload under the temporary id.
    pub fn record(&self) -> T {
        match &self.confirmed {
            Some(record) => record.clone(),
            None => self.payload.with_id(&self.temp_id),
        }
    }

    /// The id the record is currently known by.
    pub fn visible_id(&self) -> &str {
        self.canonical_id.as_deref().unwrap_or(&self.temp_id)
    }
}

/// A submitted write. Dropping it does not cancel the request.
pub struct Submission<T> {
    pub temp_id: String,
    task: JoinHandle<Result<T, StoreError>>,
}

impl<T> Submission<T> {
    /// Wait for the request to resolve.
    pub async fn settled(self) -> Result<T, StoreError> {
        self.task.await.map_err(|_| StoreError::Aborted)?
    }
}

struct QueueInner<T> {
    backend: Arc<dyn PullBackend>,
    notifier: Arc<dyn Notifier>,
    ops: watch::Sender<Arc<[OptimisticOp<T>]>>,
    next_temp: AtomicU64,
}

/// Queue of optimistic creates for one entity type.
pub struct OptimisticQueue<T: Optimistic> {
    inner: Arc<QueueInner<T>>,
}

impl<T: Optimistic> Clone for OptimisticQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Optimistic> OptimisticQueue<T> {
    pub fn new(backend: Arc<dyn PullBackend>, notifier: Arc<dyn Notifier>) -> Self {
        let (ops, _) = watch::channel(Arc::from(Vec::new()));
        Self {
            inner: Arc::new(QueueInner {
                backend,
                notifier,
                ops,
                next_temp: AtomicU64::new(0),
            }),
        }
    }

    /// Insert a pending record and start its create request.
    ///
    /// The record is visible to [`OptimisticQueue::operations`] and every
    /// watcher before this returns. Must be called within a tokio runtime.
    pub fn submit(&self, payload: T) -> Submission<T> {
        let n = self.inner.next_temp.fetch_add(1, Ordering::SeqCst) + 1;
        let temp_id = format!("tmp-{}", n);
        let body = payload.write_body();

        self.inner.ops.send_modify(|ops| {
            let mut next = ops.to_vec();
            next.push(OptimisticOp::pending(temp_id.clone(), payload));
            *ops = next.into();
        });
        debug!(kind = %T::KIND, temp_id = %temp_id, "optimistic: submitted");

        let inner = Arc::clone(&self.inner);
        let task_id = temp_id.clone();
        let task = tokio::spawn(async move {
            let result = inner.backend.create(T::KIND.collection(), body).await;
            inner.resolve(&task_id, result)
        });

        Submission { temp_id, task }
    }

    /// Remove a settled operation. Pending operations cannot be discarded.
    pub fn discard(&self, temp_id: &str) -> Result<OptimisticOp<T>, StoreError> {
        self.take_settled(temp_id, &[OpStatus::Failed, OpStatus::Confirmed], "settled")
    }

    /// Resubmit a failed operation's payload as a new operation.
    pub fn retry(&self, temp_id: &str) -> Result<Submission<T>, StoreError> {
        let op = self.take_settled(temp_id, &[OpStatus::Failed], "failed")?;
        info!(kind = %T::KIND, temp_id = %temp_id, "optimistic: retrying");
        Ok(self.submit(op.payload))
    }

    /// Drop confirmed operations whose canonical id the realtime feed now
    /// carries. Returns how many were retired.
    pub fn retire_delivered(&self, delivered: impl Fn(&str) -> bool) -> usize {
        let mut retired = 0;
        self.inner.ops.send_if_modified(|ops| {
            let kept: Vec<_> = ops
                .iter()
                .filter(|op| {
                    let done = op.status == OpStatus::Confirmed
                        && op.canonical_id.as_deref().is_some_and(&delivered);
                    !done
                })
                .cloned()
                .collect();
            retired = ops.len() - kept.len();
            if retired == 0 {
                return false;
            }
            *ops = kept.into();
            true
        });
        retired
    }

    pub fn operations(&self) -> Arc<[OptimisticOp<T>]> {
        Arc::clone(&self.inner.ops.borrow())
    }

    pub fn get(&self, temp_id: &str) -> Option<OptimisticOp<T>> {
        self.inner
            .ops
            .borrow()
            .iter()
            .find(|op| op.temp_id == temp_id)
            .cloned()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<[OptimisticOp<T>]>> {
        self.inner.ops.subscribe()
    }

    fn take_settled(
        &self,
        temp_id: &str,
        allowed: &[OpStatus],
        expected: &'static str,
    ) -> Result<OptimisticOp<T>, StoreError> {
        let mut outcome = Err(StoreError::UnknownOperation(temp_id.to_string()));
        self.inner.ops.send_if_modified(|ops| {
            let Some(pos) = ops.iter().position(|op| op.temp_id == temp_id) else {
                return false;
            };
            let status = ops[pos].status;
            if !allowed.contains(&status) {
                outcome = Err(StoreError::InvalidTransition {
                    temp_id: temp_id.to_string(),
                    status: status.as_str(),
                    expected,
                });
                return false;
            }
            let mut next = ops.to_vec();
            outcome = Ok(next.remove(pos));
            *ops = next.into();
            true
        });
        outcome
    }
}

impl<T: Optimistic> QueueInner<T> {
    fn resolve(
        &self,
        temp_id: &str,
        result: Result<hireline_api::RawDocument, ApiError>,
    ) -> Result<T, StoreError> {
        let record = result.map_err(StoreError::from).and_then(|raw| {
            let record = T::decode(&raw);
            if record.id().is_empty() {
                Err(StoreError::from(ApiError::InvalidResponse(
                    "create response carried no id".to_string(),
                )))
            } else {
                Ok(record)
            }
        });

        match &record {
            Ok(confirmed) => {
                self.transition(temp_id, |op| {
                    op.status = OpStatus::Confirmed;
                    op.canonical_id = Some(confirmed.id().to_string());
                    op.confirmed = Some(confirmed.clone());
                });
                info!(kind = %T::KIND, temp_id, id = confirmed.id(), "optimistic: confirmed");
                self.notifier.success(&format!("{} sent", T::KIND.name()));
            }
            Err(e) => {
                self.transition(temp_id, |op| {
                    op.status = OpStatus::Failed;
                    op.error = Some(e.clone());
                });
                warn!(kind = %T::KIND, temp_id, error = %e, "optimistic: failed");
                self.notifier.error(&e.to_string());
            }
        }
        record
    }

    /// Apply a settle transition to a pending operation. Anything else is
    /// left alone.
    fn transition(&self, temp_id: &str, settle: impl FnOnce(&mut OptimisticOp<T>)) {
        self.ops.send_if_modified(|ops| {
            let Some(pos) = ops
                .iter()
                .position(|op| op.temp_id == temp_id && op.status == OpStatus::Pending)
            else {
                return false;
            };
            let mut next = ops.to_vec();
            settle(&mut next[pos]);
            *ops = next.into();
            true
        });
    }
}
