//! Stateful property testing for the optimistic write queue.
//!
//! Submits, resolves, discards and retries in arbitrary order against a
//! backend whose responses the test controls. Checks that:
//!
//! - every operation's status history is `[Pending]`, `[Pending, Confirmed]`
//!   or `[Pending, Failed]`
//! - a canonical id is present exactly when an operation is confirmed
//! - the queue's contents match the model after every step

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hireline_api::{ApiError, PullBackend, RawDocument};
use hireline_store::{Message, Notifier, OpStatus, OptimisticQueue};
use proptest::prelude::*;
use proptest_state_machine::{ReferenceStateMachine, StateMachineTest, prop_state_machine};
use serde_json::Value;
use tokio::runtime::Runtime;
use tokio::sync::oneshot;

/// Operations the test can perform.
#[derive(Debug, Clone)]
pub enum QueueOperation {
    Submit,
    /// Answer the pending create for `temp_id`.
    Resolve { temp_id: String, ok: bool },
    Discard { temp_id: String },
    Retry { temp_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusModel {
    Pending,
    Confirmed,
    Failed,
}

impl From<OpStatus> for StatusModel {
    fn from(status: OpStatus) -> Self {
        match status {
            OpStatus::Pending => StatusModel::Pending,
            OpStatus::Confirmed => StatusModel::Confirmed,
            OpStatus::Failed => StatusModel::Failed,
        }
    }
}

/// Reference model: the queue's operations in insertion order.
#[derive(Clone, Debug, Default)]
pub struct QueueModel {
    pub ops: Vec<(String, StatusModel)>,
    pub next_temp: u64,
}

impl QueueModel {
    fn with_status(&self, status: StatusModel) -> Vec<String> {
        self.ops
            .iter()
            .filter(|(_, s)| *s == status)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn status(&self, temp_id: &str) -> Option<StatusModel> {
        self.ops.iter().find(|(id, _)| id == temp_id).map(|(_, s)| *s)
    }
}

impl ReferenceStateMachine for QueueModel {
    type State = Self;
    type Transition = QueueOperation;

    fn init_state() -> BoxedStrategy<Self::State> {
        Just(Self::default()).boxed()
    }

    fn transitions(state: &Self::State) -> BoxedStrategy<Self::Transition> {
        let pending = state.with_status(StatusModel::Pending);
        let failed = state.with_status(StatusModel::Failed);
        let settled: Vec<String> = state
            .ops
            .iter()
            .filter(|(_, s)| *s != StatusModel::Pending)
            .map(|(id, _)| id.clone())
            .collect();

        let mut choices: Vec<(u32, BoxedStrategy<QueueOperation>)> =
            vec![(2, Just(QueueOperation::Submit).boxed())];
        if !pending.is_empty() {
            choices.push((
                4,
                (prop::sample::select(pending), any::<bool>())
                    .prop_map(|(temp_id, ok)| QueueOperation::Resolve { temp_id, ok })
                    .boxed(),
            ));
        }
        if !settled.is_empty() {
            choices.push((
                1,
                prop::sample::select(settled)
                    .prop_map(|temp_id| QueueOperation::Discard { temp_id })
                    .boxed(),
            ));
        }
        if !failed.is_empty() {
            choices.push((
                1,
                prop::sample::select(failed)
                    .prop_map(|temp_id| QueueOperation::Retry { temp_id })
                    .boxed(),
            ));
        }
        prop::strategy::Union::new_weighted(choices).boxed()
    }

    fn apply(mut state: Self::State, transition: &Self::Transition) -> Self::State {
        match transition {
            QueueOperation::Submit => {
                state.next_temp += 1;
                state.ops.push((format!("tmp-{}", state.next_temp), StatusModel::Pending));
            }
            QueueOperation::Resolve { temp_id, ok } => {
                if let Some(op) = state.ops.iter_mut().find(|(id, _)| id == temp_id) {
                    op.1 = if *ok {
                        StatusModel::Confirmed
                    } else {
                        StatusModel::Failed
                    };
                }
            }
            QueueOperation::Discard { temp_id } => {
                state.ops.retain(|(id, _)| id != temp_id);
            }
            QueueOperation::Retry { temp_id } => {
                state.ops.retain(|(id, _)| id != temp_id);
                state.next_temp += 1;
                state.ops.push((format!("tmp-{}", state.next_temp), StatusModel::Pending));
            }
        }
        state
    }

    fn preconditions(state: &Self::State, transition: &Self::Transition) -> bool {
        match transition {
            QueueOperation::Submit => true,
            QueueOperation::Resolve { temp_id, .. } => {
                state.status(temp_id) == Some(StatusModel::Pending)
            }
            QueueOperation::Discard { temp_id } => {
                matches!(
                    state.status(temp_id),
                    Some(StatusModel::Confirmed | StatusModel::Failed)
                )
            }
            QueueOperation::Retry { temp_id } => state.status(temp_id) == Some(StatusModel::Failed),
        }
    }
}

/// Pull backend whose creates wait until the test answers them. Requests are
/// keyed by message text, which is unique per logical message.
#[derive(Default)]
struct GatedBackend {
    waiting: Mutex<HashMap<String, oneshot::Sender<bool>>>,
    next_id: AtomicU64,
}

impl GatedBackend {
    fn answer(&self, text: &str, ok: bool) {
        let tx = self
            .waiting
            .lock()
            .unwrap()
            .remove(text)
            .expect("no create waiting for this message");
        tx.send(ok).expect("create task went away");
    }
}

#[async_trait]
impl PullBackend for GatedBackend {
    async fn list(&self, _collection: &str) -> Result<Vec<RawDocument>, ApiError> {
        Ok(Vec::new())
    }

    async fn create(&self, _collection: &str, body: Value) -> Result<RawDocument, ApiError> {
        let text = body["text"].as_str().unwrap_or_default().to_string();
        let (tx, rx) = oneshot::channel();
        self.waiting.lock().unwrap().insert(text, tx);

        if rx.await.unwrap_or(false) {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(RawDocument::from_value(body).with("id", format!("m-{}", n)))
        } else {
            Err(ApiError::Server {
                status: 500,
                message: "rejected".to_string(),
            })
        }
    }

    async fn update(&self, _collection: &str, _id: &str, body: Value) -> Result<RawDocument, ApiError> {
        Ok(RawDocument::from_value(body))
    }

    async fn delete(&self, _collection: &str, _id: &str) -> Result<(), ApiError> {
        Ok(())
    }
}

struct Silent;

impl Notifier for Silent {
    fn success(&self, _message: &str) {}

    fn error(&self, _message: &str) {}
}

/// Test harness that wraps the real queue with a tokio runtime.
pub struct QueueTestHarness {
    runtime: Runtime,
    backend: Arc<GatedBackend>,
    queue: OptimisticQueue<Message>,
    history: HashMap<String, Vec<OpStatus>>,
    sent: u64,
}

impl QueueTestHarness {
    fn new() -> Self {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("Failed to create tokio runtime");
        let backend = Arc::new(GatedBackend::default());
        let queue = OptimisticQueue::new(backend.clone(), Arc::new(Silent));
        Self {
            runtime,
            backend,
            queue,
            history: HashMap::new(),
            sent: 0,
        }
    }

    fn apply_operation(&mut self, op: &QueueOperation) {
        let queue = self.queue.clone();
        match op {
            QueueOperation::Submit => {
                self.sent += 1;
                let text = format!("message {}", self.sent);
                self.runtime.block_on(async {
                    queue.submit(Message::draft("c1", "u1", "u2", text));
                    settle().await;
                });
            }
            QueueOperation::Resolve { temp_id, ok } => {
                let op = queue.get(temp_id).expect("operation exists");
                self.backend.answer(&op.payload.text, *ok);
                self.runtime.block_on(settle());
            }
            QueueOperation::Discard { temp_id } => {
                queue.discard(temp_id).expect("settled operation can be discarded");
            }
            QueueOperation::Retry { temp_id } => {
                self.runtime.block_on(async {
                    queue.retry(temp_id).expect("failed operation can be retried");
                    settle().await;
                });
            }
        }
        self.record_history();
    }

    fn record_history(&mut self) {
        for op in self.queue.operations().iter() {
            let seen = self.history.entry(op.temp_id.clone()).or_default();
            if seen.last() != Some(&op.status) {
                seen.push(op.status);
            }
        }
    }

    fn verify_invariants(&self, model: &QueueModel) {
        // Invariant 1: queue contents match the model
        let actual: Vec<(String, StatusModel)> = self
            .queue
            .operations()
            .iter()
            .map(|op| (op.temp_id.clone(), op.status.into()))
            .collect();
        assert_eq!(actual, model.ops, "queue diverged from model");

        // Invariant 2: canonical id present exactly when confirmed
        for op in self.queue.operations().iter() {
            assert_eq!(
                op.canonical_id.is_some(),
                op.status == OpStatus::Confirmed,
                "canonical id mismatch for {}",
                op.temp_id
            );
        }

        // Invariant 3: status only moves forward, once
        for (temp_id, statuses) in &self.history {
            let valid = matches!(
                statuses.as_slice(),
                [OpStatus::Pending]
                    | [OpStatus::Pending, OpStatus::Confirmed]
                    | [OpStatus::Pending, OpStatus::Failed]
            );
            assert!(valid, "invalid status history for {}: {:?}", temp_id, statuses);
        }
    }
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

impl StateMachineTest for QueueTestHarness {
    type SystemUnderTest = Self;
    type Reference = QueueModel;

    fn init_test(
        _ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) -> Self::SystemUnderTest {
        Self::new()
    }

    fn apply(
        mut state: Self::SystemUnderTest,
        ref_state: &<Self::Reference as ReferenceStateMachine>::State,
        transition: <Self::Reference as ReferenceStateMachine>::Transition,
    ) -> Self::SystemUnderTest {
        state.apply_operation(&transition);
        state.verify_invariants(ref_state);
        state
    }

    fn check_invariants(
        state: &Self::SystemUnderTest,
        ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) {
        state.verify_invariants(ref_state);
    }
}

prop_state_machine! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        max_shrink_iters: 4096,
        ..ProptestConfig::default()
    })]

    #[test]
    fn optimistic_queue_state_machine_test(sequential 1..40 => QueueTestHarness);
}

#[test]
fn test_submit_then_confirm() {
    let mut harness = QueueTestHarness::new();
    let mut model = QueueModel::default();
    for op in [
        QueueOperation::Submit,
        QueueOperation::Resolve {
            temp_id: "tmp-1".into(),
            ok: true,
        },
    ] {
        harness.apply_operation(&op);
        model = QueueModel::apply(model, &op);
        harness.verify_invariants(&model);
    }
    assert_eq!(harness.queue.get("tmp-1").unwrap().canonical_id.as_deref(), Some("m-1"));
}

#[test]
fn test_failed_then_retried_gets_new_temp_id() {
    let mut harness = QueueTestHarness::new();
    let mut model = QueueModel::default();
    for op in [
        QueueOperation::Submit,
        QueueOperation::Resolve {
            temp_id: "tmp-1".into(),
            ok: false,
        },
        QueueOperation::Retry {
            temp_id: "tmp-1".into(),
        },
    ] {
        harness.apply_operation(&op);
        model = QueueModel::apply(model, &op);
        harness.verify_invariants(&model);
    }
    let ids: Vec<_> = harness.queue.operations().iter().map(|op| op.temp_id.clone()).collect();
    assert_eq!(ids, vec!["tmp-2"]);
}
