//! Replica fan-out
//!
//! A replication round hands the same `(name, content)` to every peer
//! through a [`ReplicationTransport`]. Each peer gets its own task, so a
//! slow, failing or panicking delivery cannot hold up or fail the others.
//! The round reports one outcome per peer and never retries: retry and
//! backoff belong to the transport.

use crate::error::StorageError;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Address or identifier of a peer node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaTarget(String);

impl ReplicaTarget {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplicaTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReplicaTarget {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ReplicaTarget {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Carries an object to a peer. Wire format is up to the implementation.
#[async_trait]
pub trait ReplicationTransport: Send + Sync + 'static {
    async fn send(
        &self,
        peer: &ReplicaTarget,
        name: &str,
        content: Bytes,
    ) -> Result<(), StorageError>;
}

/// Transport that only logs the delivery. Used when no network transport
/// is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingTransport;

#[async_trait]
impl ReplicationTransport for LoggingTransport {
    async fn send(
        &self,
        peer: &ReplicaTarget,
        name: &str,
        content: Bytes,
    ) -> Result<(), StorageError> {
        info!(name = %name, peer = %peer, size = content.len(), "Replicating object to node");
        Ok(())
    }
}

/// Result of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    Failed { reason: String },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerOutcome {
    pub peer: ReplicaTarget,
    #[serde(flatten)]
    pub outcome: DeliveryOutcome,
}

/// Per-peer outcomes of a replication round, in the order peers were given
#[derive(Debug, Clone, Serialize)]
pub struct ReplicationReport {
    pub round_id: Uuid,
    pub name: String,
    pub outcomes: Vec<PeerOutcome>,
}

impl ReplicationReport {
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn delivered(&self) -> Vec<&ReplicaTarget> {
        self.outcomes
            .iter()
            .filter(|o| o.outcome.is_delivered())
            .map(|o| &o.peer)
            .collect()
    }

    pub fn failed(&self) -> Vec<&ReplicaTarget> {
        self.outcomes
            .iter()
            .filter(|o| !o.outcome.is_delivered())
            .map(|o| &o.peer)
            .collect()
    }

    pub fn outcome_for(&self, peer: &ReplicaTarget) -> Option<&DeliveryOutcome> {
        self.outcomes
            .iter()
            .find(|o| &o.peer == peer)
            .map(|o| &o.outcome)
    }

    /// At least one peer did not receive the object
    pub fn is_partial_failure(&self) -> bool {
        self.outcomes.iter().any(|o| !o.outcome.is_delivered())
    }

    /// Turn any failed peer into [`StorageError::ReplicationPartial`]
    pub fn into_result(self) -> Result<Self, StorageError> {
        let failed = self.failed().len();
        if failed > 0 {
            Err(StorageError::ReplicationPartial {
                failed,
                attempted: self.attempted(),
            })
        } else {
            Ok(self)
        }
    }
}

/// Fans an object out to a set of peers
#[derive(Clone)]
pub struct ReplicationCoordinator {
    transport: Arc<dyn ReplicationTransport>,
}

impl ReplicationCoordinator {
    pub fn new(transport: Arc<dyn ReplicationTransport>) -> Self {
        Self { transport }
    }

    /// Attempt delivery of `(name, content)` to every peer.
    ///
    /// Duplicate peers are attempted once. Never fails as a whole.
    pub async fn propagate(
        &self,
        name: &str,
        content: Bytes,
        peers: &[ReplicaTarget],
    ) -> ReplicationReport {
        let round_id = Uuid::new_v4();

        let mut seen = HashSet::new();
        let targets: Vec<ReplicaTarget> = peers
            .iter()
            .filter(|peer| seen.insert(*peer))
            .cloned()
            .collect();

        debug!(round = %round_id, name = %name, peers = targets.len(), "Starting replication round");

        let attempts = targets.iter().cloned().map(|peer| {
            let transport = Arc::clone(&self.transport);
            let name = name.to_string();
            let content = content.clone();
            tokio::spawn(async move { transport.send(&peer, &name, content).await })
        });
        let results = join_all(attempts).await;

        let outcomes: Vec<PeerOutcome> = targets
            .into_iter()
            .zip(results)
            .map(|(peer, result)| {
                let outcome = match result {
                    Ok(Ok(())) => DeliveryOutcome::Delivered,
                    Ok(Err(e)) => DeliveryOutcome::Failed {
                        reason: e.to_string(),
                    },
                    Err(join_error) => DeliveryOutcome::Failed {
                        reason: format!("Delivery task aborted: {}", join_error),
                    },
                };
                if let DeliveryOutcome::Failed { reason } = &outcome {
                    warn!(round = %round_id, name = %name, peer = %peer, reason = %reason, "Replication to peer failed");
                }
                PeerOutcome { peer, outcome }
            })
            .collect();

        let report = ReplicationReport {
            round_id,
            name: name.to_string(),
            outcomes,
        };

        info!(
            round = %round_id,
            name = %name,
            delivered = report.delivered().len(),
            failed = report.failed().len(),
            "Replication round complete"
        );

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records deliveries; fails or panics for configured peers
    #[derive(Default)]
    struct FakeTransport {
        failing: Vec<String>,
        panicking: Vec<String>,
        slow: Vec<String>,
        delivered: Mutex<Vec<(String, String, Bytes)>>,
    }

    #[async_trait]
    impl ReplicationTransport for FakeTransport {
        async fn send(
            &self,
            peer: &ReplicaTarget,
            name: &str,
            content: Bytes,
        ) -> Result<(), StorageError> {
            if self.slow.iter().any(|p| p == peer.as_str()) {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            if self.panicking.iter().any(|p| p == peer.as_str()) {
                panic!("transport bug");
            }
            if self.failing.iter().any(|p| p == peer.as_str()) {
                return Err(StorageError::Transport(format!("{} unreachable", peer)));
            }
            self.delivered
                .lock()
                .unwrap()
                .push((peer.to_string(), name.to_string(), content));
            Ok(())
        }
    }

    fn peers(names: &[&str]) -> Vec<ReplicaTarget> {
        names.iter().map(|n| ReplicaTarget::from(*n)).collect()
    }

    #[tokio::test]
    async fn test_failure_is_isolated_per_peer() {
        let transport = Arc::new(FakeTransport {
            failing: vec!["P1".into()],
            ..Default::default()
        });
        let coordinator = ReplicationCoordinator::new(transport.clone());

        let report = coordinator
            .propagate("f", Bytes::from_static(b"data"), &peers(&["P1", "P2"]))
            .await;

        assert_eq!(report.attempted(), 2);
        assert!(matches!(
            report.outcome_for(&"P1".into()),
            Some(DeliveryOutcome::Failed { .. })
        ));
        assert_eq!(report.outcome_for(&"P2".into()), Some(&DeliveryOutcome::Delivered));
        assert!(report.is_partial_failure());

        let delivered = transport.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, "P2");
        assert_eq!(delivered[0].1, "f");
        assert_eq!(&delivered[0].2[..], b"data");
    }

    #[tokio::test]
    async fn test_panicking_delivery_does_not_affect_others() {
        let transport = Arc::new(FakeTransport {
            panicking: vec!["bad".into()],
            slow: vec!["slow".into()],
            ..Default::default()
        });
        let coordinator = ReplicationCoordinator::new(transport);

        let report = coordinator
            .propagate("f", Bytes::from_static(b"x"), &peers(&["slow", "bad", "ok"]))
            .await;

        let order: Vec<&str> = report.outcomes.iter().map(|o| o.peer.as_str()).collect();
        assert_eq!(order, vec!["slow", "bad", "ok"]);
        assert_eq!(report.delivered().len(), 2);
        assert_eq!(report.failed(), vec![&ReplicaTarget::from("bad")]);
    }

    #[tokio::test]
    async fn test_duplicate_peers_attempted_once() {
        let transport = Arc::new(FakeTransport::default());
        let coordinator = ReplicationCoordinator::new(transport.clone());

        let report = coordinator
            .propagate("f", Bytes::new(), &peers(&["A", "B", "A"]))
            .await;

        assert_eq!(report.attempted(), 2);
        assert_eq!(transport.delivered.lock().unwrap().len(), 2);
        assert!(report.into_result().is_ok());
    }

    #[tokio::test]
    async fn test_into_result_reports_partial_failure() {
        let transport = Arc::new(FakeTransport {
            failing: vec!["A".into()],
            ..Default::default()
        });
        let report = ReplicationCoordinator::new(transport)
            .propagate("f", Bytes::new(), &peers(&["A", "B", "C"]))
            .await;

        match report.into_result() {
            Err(StorageError::ReplicationPartial { failed, attempted }) => {
                assert_eq!(failed, 1);
                assert_eq!(attempted, 3);
            }
            other => panic!("expected partial failure, got {:?}", other.map(|r| r.outcomes)),
        }
    }

    #[tokio::test]
    async fn test_no_peers() {
        let report = ReplicationCoordinator::new(Arc::new(LoggingTransport))
            .propagate("f", Bytes::new(), &[])
            .await;
        assert_eq!(report.attempted(), 0);
        assert!(!report.is_partial_failure());
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = PeerOutcome {
            peer: "node1".into(),
            outcome: DeliveryOutcome::Failed {
                reason: "timeout".into(),
            },
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"peer\":\"node1\""));
        assert!(json.contains("\"status\":\"failed\""));
    }
}
