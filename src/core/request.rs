// src/core/request.rs

//! The Request Layer (C2): one outstanding operation against one worker.
//!
//! The source's four-level request class hierarchy collapses here into a
//! single [`Request`] struct carrying a tagged [`RequestKind`] payload,
//! per §9's "Deep inheritance in the source" guidance: shared behaviour
//! (state transitions, timeout, cancellation) lives on `Request`; only the
//! wire command and response interpretation vary by kind.

use crate::config::Worker;
use crate::core::errors::ControlPlaneError;
use crate::core::metrics::REQUEST_LATENCY_SECONDS;
use crate::core::protocol::{WorkerCommand, WorkerResponseFrame, WorkerStatus, WorkerTransport};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Canonical request lifecycle (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestState {
    Created,
    InProgress,
    Finished(ExtendedState),
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtendedState {
    Success,
    ServerError,
    ClientError,
    Timeout,
    Bad,
    Cancelled,
}

/// The six first-class request kinds (§4.2), plus the `Sql*` family
/// broadcast by SQL jobs (§4.4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestKind {
    FindAllReplicas { database: String },
    DeleteReplica { database: String, chunk: i32 },
    ReplicateChunk { source_worker: String, database: String, chunk: i32 },
    SetChunkList { chunks: Vec<(String, i32)>, force: bool, databases: Vec<String> },
    ServiceStatus,
    ServiceDrain,
    ServiceReconfig,
    Sql { operation: String, payload: serde_json::Value },
    StopRequest { target_request_id: Uuid },
}

impl RequestKind {
    fn command(&self) -> WorkerCommand {
        match self {
            RequestKind::FindAllReplicas { .. } => WorkerCommand::FindAllReplicas,
            RequestKind::DeleteReplica { .. } => WorkerCommand::DeleteReplica,
            RequestKind::ReplicateChunk { .. } => WorkerCommand::ReplicateChunk,
            RequestKind::SetChunkList { .. } => WorkerCommand::SetChunkList,
            RequestKind::ServiceStatus => WorkerCommand::GetStatus,
            RequestKind::ServiceDrain => WorkerCommand::ServiceDrain,
            RequestKind::ServiceReconfig => WorkerCommand::ServiceReconfig,
            RequestKind::Sql { .. } => WorkerCommand::Sql,
            RequestKind::StopRequest { .. } => WorkerCommand::StopRequest,
        }
    }

    fn body(&self) -> serde_json::Value {
        match self {
            RequestKind::FindAllReplicas { database } => json!({ "database": database }),
            RequestKind::DeleteReplica { database, chunk } => {
                json!({ "database": database, "chunk": chunk })
            }
            RequestKind::ReplicateChunk { source_worker, database, chunk } => {
                json!({ "source_worker": source_worker, "database": database, "chunk": chunk })
            }
            RequestKind::SetChunkList { chunks, force, databases } => {
                json!({ "chunks": chunks, "force": force, "databases": databases })
            }
            RequestKind::ServiceStatus | RequestKind::ServiceDrain | RequestKind::ServiceReconfig => {
                json!({})
            }
            RequestKind::Sql { operation, payload } => json!({ "operation": operation, "payload": payload }),
            RequestKind::StopRequest { target_request_id } => json!({ "target_request_id": target_request_id }),
        }
    }
}

/// The result of a completed request: the raw response plus a convenience
/// flag for "replica was already absent" (`DeleteReplica`'s idempotence,
/// §4.2) so callers don't need to parse `body` for the common case.
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub extended_state: ExtendedState,
    pub not_present: bool,
    pub body: serde_json::Value,
}

/// One outstanding operation against one worker.
pub struct Request {
    pub id: Uuid,
    pub job_id: Uuid,
    pub worker: String,
    pub kind: RequestKind,
    pub timeout: Duration,
    state: std::sync::Mutex<RequestState>,
    cancelled: AtomicBool,
}

impl Request {
    pub fn new(job_id: Uuid, worker: impl Into<String>, kind: RequestKind, timeout: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            worker: worker.into(),
            kind,
            timeout,
            state: std::sync::Mutex::new(RequestState::Created),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> RequestState {
        *self.state.lock().unwrap()
    }

    /// Cooperative cancellation; idempotent (§4.2).
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if !matches!(*state, RequestState::Finished(_)) {
            *state = RequestState::Cancelled;
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Validates the worker can be targeted, then dispatches via
    /// `transport`, honouring the request's own timeout and cooperative
    /// cancellation. Returns `InvalidArgument`/`WorkerDisabled` synchronously
    /// without ever touching the transport, per §4.2's contracts.
    pub async fn execute(
        &self,
        worker: &Worker,
        transport: &Arc<dyn WorkerTransport>,
        all_workers: bool,
    ) -> Result<RequestOutcome, ControlPlaneError> {
        if self.is_cancelled() {
            *self.state.lock().unwrap() = RequestState::Finished(ExtendedState::Cancelled);
            return Err(ControlPlaneError::Cancelled);
        }
        if !worker.is_enabled && !all_workers {
            *self.state.lock().unwrap() = RequestState::Finished(ExtendedState::ClientError);
            return Err(ControlPlaneError::WorkerDisabled(worker.name.clone()));
        }

        *self.state.lock().unwrap() = RequestState::InProgress;

        let started = std::time::Instant::now();
        let response = transport
            .send(
                &worker.svc_host,
                worker.svc_port,
                self.kind.command(),
                self.kind.body(),
                self.timeout,
            )
            .await;
        REQUEST_LATENCY_SECONDS.observe(started.elapsed().as_secs_f64());

        let response = match response {
            Ok(r) => r,
            Err(ControlPlaneError::Timeout(d)) => {
                *self.state.lock().unwrap() = RequestState::Finished(ExtendedState::Timeout);
                return Err(ControlPlaneError::Timeout(d));
            }
            Err(e) => {
                *self.state.lock().unwrap() = RequestState::Finished(ExtendedState::ServerError);
                return Err(e);
            }
        };

        if self.is_cancelled() {
            *self.state.lock().unwrap() = RequestState::Finished(ExtendedState::Cancelled);
            return Err(ControlPlaneError::Cancelled);
        }

        let outcome = interpret_response(&self.kind, &response);
        *self.state.lock().unwrap() = RequestState::Finished(outcome.extended_state);
        match outcome.extended_state {
            ExtendedState::Success => Ok(outcome),
            ExtendedState::Bad => Err(ControlPlaneError::InUse(format!(
                "request {} against worker '{}' reported IN_USE",
                self.id, self.worker
            ))),
            _ => Err(ControlPlaneError::internal(format!(
                "request {} against worker '{}' failed: {}",
                self.id, self.worker, response.header.error
            ))),
        }
    }
}

fn interpret_response(kind: &RequestKind, response: &WorkerResponseFrame) -> RequestOutcome {
    let not_present = matches!(kind, RequestKind::DeleteReplica { .. })
        && response.body.get("not_present").and_then(|v| v.as_bool()).unwrap_or(false);
    let extended_state = match response.header.status {
        // DeleteReplica is idempotent w.r.t. a missing replica (§4.2).
        WorkerStatus::Success => ExtendedState::Success,
        WorkerStatus::Invalid if not_present => ExtendedState::Success,
        WorkerStatus::Invalid => ExtendedState::ClientError,
        WorkerStatus::InUse => ExtendedState::Bad,
        WorkerStatus::Error => ExtendedState::ServerError,
    };
    RequestOutcome {
        extended_state,
        not_present,
        body: response.body.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::WorkerResponseH;
    use async_trait::async_trait;

    struct FakeTransport {
        status: WorkerStatus,
        body: serde_json::Value,
    }

    #[async_trait]
    impl WorkerTransport for FakeTransport {
        async fn send(
            &self,
            _host: &str,
            _port: u16,
            _command: WorkerCommand,
            _body: serde_json::Value,
            _timeout: Duration,
        ) -> Result<WorkerResponseFrame, ControlPlaneError> {
            Ok(WorkerResponseFrame {
                header: WorkerResponseH {
                    status: self.status,
                    request_id: Uuid::new_v4(),
                    error: String::new(),
                },
                body: self.body.clone(),
            })
        }
    }

    fn worker(name: &str, enabled: bool) -> Worker {
        Worker {
            name: name.to_string(),
            is_enabled: enabled,
            is_read_only: false,
            svc_host: name.to_string(),
            svc_port: 1,
            fs_host: name.to_string(),
            fs_port: 2,
            loader_host: name.to_string(),
            loader_port: 3,
            db_host: name.to_string(),
            db_port: 4,
            db_user: "qsreplica".to_string(),
            data_dir: "/data/{worker}".to_string(),
        }
    }

    #[tokio::test]
    async fn disabled_worker_fails_synchronously_without_all_workers() {
        let request = Request::new(
            Uuid::new_v4(),
            "w1",
            RequestKind::ServiceStatus,
            Duration::from_secs(1),
        );
        let transport: Arc<dyn WorkerTransport> = Arc::new(FakeTransport {
            status: WorkerStatus::Success,
            body: json!({}),
        });
        let err = request
            .execute(&worker("w1", false), &transport, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ControlPlaneError::WorkerDisabled(_)));
    }

    #[tokio::test]
    async fn delete_replica_not_present_is_success() {
        let request = Request::new(
            Uuid::new_v4(),
            "w1",
            RequestKind::DeleteReplica { database: "dx".to_string(), chunk: 7 },
            Duration::from_secs(1),
        );
        let transport: Arc<dyn WorkerTransport> = Arc::new(FakeTransport {
            status: WorkerStatus::Invalid,
            body: json!({"not_present": true}),
        });
        let outcome = request.execute(&worker("w1", true), &transport, false).await.unwrap();
        assert!(outcome.not_present);
        assert_eq!(request.state(), RequestState::Finished(ExtendedState::Success));
    }

    #[tokio::test]
    async fn cancel_before_execute_short_circuits() {
        let request = Request::new(
            Uuid::new_v4(),
            "w1",
            RequestKind::ServiceStatus,
            Duration::from_secs(1),
        );
        request.cancel();
        let transport: Arc<dyn WorkerTransport> = Arc::new(FakeTransport {
            status: WorkerStatus::Success,
            body: json!({}),
        });
        let err = request.execute(&worker("w1", true), &transport, false).await.unwrap_err();
        assert!(matches!(err, ControlPlaneError::Cancelled));
    }
}
