//! Outbound delegation routing.
//!
//! The router owns the sender side of the delegation state machine. It
//! creates the pending message, records it in the session, and applies
//! the peer's reply as state transitions. A timeout or cancellation
//! moves the message to `failed`; a message that reached a terminal
//! state is never touched again.

use async_trait::async_trait;
use skilld_core::a2a::{DelegationMessage, DelegationStatus, InvalidTransition};
use skilld_core::events::{
    DelegationCompletedPayload, DelegationFailedPayload, DelegationSentPayload, EventPayload,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::session::Session;

/// Transport-level failure talking to a peer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("peer unreachable at {addr}")]
    Unreachable { addr: String },

    #[error("HTTP error from peer: {status} - {message}")]
    Http { status: u16, message: String },

    #[error("invalid response from peer: {0}")]
    InvalidResponse(String),
}

/// Delivers a delegation message to a peer and returns its reply.
#[async_trait]
pub trait DelegationTransport: Send + Sync {
    async fn send(
        &self,
        peer: &str,
        message: &DelegationMessage,
    ) -> Result<DelegationMessage, TransportError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DelegationError {
    /// Peer did not reply in time. Recoverable; the task is marked failed.
    #[error("delegation timed out after {secs}s (task {task_id})")]
    Timeout { task_id: Uuid, secs: u64 },

    /// Peer declined the task.
    #[error("delegation rejected (task {task_id}): {reason}")]
    Rejected { task_id: Uuid, reason: String },

    /// Peer accepted but could not finish, or transport broke down.
    #[error("delegation failed (task {task_id}): {reason}")]
    Failed { task_id: Uuid, reason: String },

    /// Turn was cancelled while the delegation was in flight.
    #[error("delegation cancelled (task {task_id})")]
    Cancelled { task_id: Uuid },

    #[error("no peer agents configured")]
    NoPeers,

    #[error(transparent)]
    State(#[from] InvalidTransition),
}

/// Routes delegations to configured peers.
pub struct DelegationRouter {
    transport: Arc<dyn DelegationTransport>,
    peers: Vec<String>,
    timeout: Duration,
    agent_id: String,
}

impl DelegationRouter {
    pub fn new(
        transport: Arc<dyn DelegationTransport>,
        peers: Vec<String>,
        timeout: Duration,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            peers,
            timeout,
            agent_id: agent_id.into(),
        }
    }

    pub fn has_peers(&self) -> bool {
        !self.peers.is_empty()
    }

    /// Delegate a capability to the first configured peer and wait for a
    /// terminal reply.
    ///
    /// The session's copy of the message tracks every transition, so the
    /// delegation history stays auditable even on failure paths.
    pub async fn delegate(
        &self,
        session: &mut Session,
        capability: &str,
        payload: &str,
        cancel: &CancellationToken,
    ) -> Result<DelegationMessage, DelegationError> {
        let Some(peer) = self.peers.first() else {
            return Err(DelegationError::NoPeers);
        };

        let message = DelegationMessage::new(capability, payload, self.agent_id.clone());
        let task_id = message.task_id;
        session.record_delegation(message.clone());
        session.record_event(EventPayload::DelegationSent(DelegationSentPayload {
            session_id: session.id,
            task_id,
            capability_required: capability.to_string(),
            peer: peer.clone(),
        }));
        info!(%task_id, capability, peer = %peer, "delegation sent");

        let reply = tokio::select! {
            () = cancel.cancelled() => {
                self.mark_failed(session, task_id, "cancelled")?;
                return Err(DelegationError::Cancelled { task_id });
            }
            outcome = tokio::time::timeout(self.timeout, self.transport.send(peer, &message)) => {
                match outcome {
                    Ok(Ok(reply)) => reply,
                    Ok(Err(e)) => {
                        let reason = e.to_string();
                        self.mark_failed(session, task_id, &reason)?;
                        return Err(DelegationError::Failed { task_id, reason });
                    }
                    Err(_) => {
                        let secs = self.timeout.as_secs();
                        self.mark_failed(session, task_id, &format!("timeout after {secs}s"))?;
                        return Err(DelegationError::Timeout { task_id, secs });
                    }
                }
            }
        };

        self.apply_reply(session, task_id, reply)
    }

    /// Apply a peer reply to the session's pending message.
    fn apply_reply(
        &self,
        session: &mut Session,
        task_id: Uuid,
        reply: DelegationMessage,
    ) -> Result<DelegationMessage, DelegationError> {
        let session_id = session.id;
        let Some(stored) = session.delegation_mut(task_id) else {
            return Err(DelegationError::Failed {
                task_id,
                reason: "unknown task".to_string(),
            });
        };

        match reply.status {
            DelegationStatus::Completed => {
                stored.transition(DelegationStatus::Accepted)?;
                stored.complete(reply.result.unwrap_or_default())?;
                let updated = stored.clone();
                session.record_event(EventPayload::DelegationCompleted(
                    DelegationCompletedPayload {
                        session_id,
                        task_id,
                    },
                ));
                info!(%task_id, "delegation completed");
                Ok(updated)
            }
            DelegationStatus::Rejected => {
                let reason = reply.error.unwrap_or_else(|| "rejected".to_string());
                stored.reject(reason.clone())?;
                session.record_event(EventPayload::DelegationFailed(DelegationFailedPayload {
                    session_id,
                    task_id,
                    status: DelegationStatus::Rejected.as_str().to_string(),
                    reason: reason.clone(),
                }));
                warn!(%task_id, %reason, "delegation rejected");
                Err(DelegationError::Rejected { task_id, reason })
            }
            DelegationStatus::Failed => {
                let reason = reply.error.unwrap_or_else(|| "failed".to_string());
                stored.transition(DelegationStatus::Accepted).ok();
                stored.fail(reason.clone())?;
                session.record_event(EventPayload::DelegationFailed(DelegationFailedPayload {
                    session_id,
                    task_id,
                    status: DelegationStatus::Failed.as_str().to_string(),
                    reason: reason.clone(),
                }));
                warn!(%task_id, %reason, "delegation failed");
                Err(DelegationError::Failed { task_id, reason })
            }
            DelegationStatus::Pending | DelegationStatus::Accepted => {
                let reason = format!("peer returned non-terminal status '{}'", reply.status);
                self.mark_failed(session, task_id, &reason)?;
                Err(DelegationError::Failed { task_id, reason })
            }
        }
    }

    fn mark_failed(
        &self,
        session: &mut Session,
        task_id: Uuid,
        reason: &str,
    ) -> Result<(), InvalidTransition> {
        let session_id = session.id;
        if let Some(stored) = session.delegation_mut(task_id) {
            stored.fail(reason)?;
        }
        session.record_event(EventPayload::DelegationFailed(DelegationFailedPayload {
            session_id,
            task_id,
            status: DelegationStatus::Failed.as_str().to_string(),
            reason: reason.to_string(),
        }));
        warn!(%task_id, reason, "delegation marked failed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Transport that replies with a scripted status.
    struct ScriptedTransport {
        status: DelegationStatus,
        result: Option<String>,
        error: Option<String>,
        delay: Duration,
    }

    impl ScriptedTransport {
        fn completing(result: &str) -> Arc<Self> {
            Arc::new(Self {
                status: DelegationStatus::Completed,
                result: Some(result.to_string()),
                error: None,
                delay: Duration::ZERO,
            })
        }

        fn rejecting(reason: &str) -> Arc<Self> {
            Arc::new(Self {
                status: DelegationStatus::Rejected,
                result: None,
                error: Some(reason.to_string()),
                delay: Duration::ZERO,
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                status: DelegationStatus::Completed,
                result: Some("late".to_string()),
                error: None,
                delay,
            })
        }
    }

    #[async_trait]
    impl DelegationTransport for ScriptedTransport {
        async fn send(
            &self,
            _peer: &str,
            message: &DelegationMessage,
        ) -> Result<DelegationMessage, TransportError> {
            tokio::time::sleep(self.delay).await;
            let mut reply = message.clone();
            reply.status = self.status;
            reply.result = self.result.clone();
            reply.error = self.error.clone();
            Ok(reply)
        }
    }

    fn router(transport: Arc<dyn DelegationTransport>, timeout: Duration) -> DelegationRouter {
        DelegationRouter::new(
            transport,
            vec!["http://127.0.0.1:9100".to_string()],
            timeout,
            "skilld-test",
        )
    }

    #[tokio::test]
    async fn completed_reply_walks_pending_accepted_completed() {
        let router = router(ScriptedTransport::completing("done"), Duration::from_secs(5));
        let mut session = Session::new();
        let cancel = CancellationToken::new();

        let message = router
            .delegate(&mut session, "pdf-processing", "extract tables", &cancel)
            .await
            .unwrap();

        assert_eq!(message.status, DelegationStatus::Completed);
        assert_eq!(message.result.as_deref(), Some("done"));
        let stored = session.delegation(message.task_id).unwrap();
        assert_eq!(stored.status, DelegationStatus::Completed);
    }

    #[tokio::test]
    async fn rejected_reply_is_terminal_and_recoverable() {
        let router = router(
            ScriptedTransport::rejecting("no such capability"),
            Duration::from_secs(5),
        );
        let mut session = Session::new();
        let cancel = CancellationToken::new();

        let err = router
            .delegate(&mut session, "unknown-cap", "payload", &cancel)
            .await
            .unwrap_err();

        let DelegationError::Rejected { task_id, reason } = err else {
            panic!("expected rejection");
        };
        assert_eq!(reason, "no such capability");
        let stored = session.delegation(task_id).unwrap();
        assert_eq!(stored.status, DelegationStatus::Rejected);
        assert!(stored.status.is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_marks_task_failed() {
        let router = router(
            ScriptedTransport::slow(Duration::from_secs(60)),
            Duration::from_secs(1),
        );
        let mut session = Session::new();
        let cancel = CancellationToken::new();

        let err = router
            .delegate(&mut session, "pdf-processing", "payload", &cancel)
            .await
            .unwrap_err();

        let DelegationError::Timeout { task_id, secs } = err else {
            panic!("expected timeout");
        };
        assert_eq!(secs, 1);
        let stored = session.delegation(task_id).unwrap();
        assert_eq!(stored.status, DelegationStatus::Failed);
        assert!(stored.error.as_deref().unwrap_or("").contains("timeout"));
    }

    #[tokio::test]
    async fn cancellation_fails_pending_delegation() {
        let router = router(
            ScriptedTransport::slow(Duration::from_secs(60)),
            Duration::from_secs(30),
        );
        let mut session = Session::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = router
            .delegate(&mut session, "pdf-processing", "payload", &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, DelegationError::Cancelled { .. }));
        let history = session.delegation_history();
        assert_eq!(history[0].status, DelegationStatus::Failed);
    }

    #[tokio::test]
    async fn no_peers_is_an_immediate_error() {
        let router = DelegationRouter::new(
            ScriptedTransport::completing("unused"),
            Vec::new(),
            Duration::from_secs(1),
            "skilld-test",
        );
        let mut session = Session::new();
        let cancel = CancellationToken::new();

        let err = router
            .delegate(&mut session, "cap", "payload", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DelegationError::NoPeers));
        assert!(session.delegation_history().is_empty());
    }
}
