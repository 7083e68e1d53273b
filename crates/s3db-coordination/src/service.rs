//! The Coordination Service itself (spec §4.6): one leader per namespace
//! across N processes, ticking on an interval, with worker heartbeats
//! and `leader:changed` notification.
//!
//! Mirrors `objectio_auth::chain::IdentityProviderChain`'s "ordered,
//! stateless dispatch" shape, generalized into an async poll loop since
//! there's no fixed set of providers here, just one process racing
//! others over a blob.

use crate::lease::{self, AcquireOutcome, Lease};
use crate::worker;
use parking_lot::RwLock;
use rand::Rng;
use s3db_blob::BlobClient;
use s3db_common::config::CoordinationConfig;
use s3db_common::events::{Event, EventBus};
use s3db_common::keys;
use s3db_common::types::{Epoch, Namespace};
use s3db_common::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A point-in-time snapshot of this process's coordination status.
#[derive(Clone, Debug)]
pub struct Metrics {
    pub is_leader: bool,
    pub epoch: Epoch,
    pub leader_id: Option<String>,
}

struct State {
    leader_id: Option<String>,
    epoch: Epoch,
}

/// One service instance per namespace per process (spec §4.6
/// "Multi-tenant sharing": a single instance multiplexes leader/worker
/// status to every plugin attached to this database).
pub struct CoordinationService {
    blob: Arc<dyn BlobClient>,
    events: Arc<EventBus>,
    namespace: Namespace,
    self_id: String,
    config: CoordinationConfig,
    state: RwLock<State>,
    running: AtomicBool,
}

impl CoordinationService {
    #[must_use]
    pub fn new(blob: Arc<dyn BlobClient>, events: Arc<EventBus>, namespace: Namespace, config: CoordinationConfig) -> Arc<Self> {
        Self::with_self_id(blob, events, namespace, config, uuid::Uuid::new_v4().to_string())
    }

    /// As [`Self::new`], but with a caller-supplied process id (tests,
    /// or deployments that want a stable identity across restarts).
    #[must_use]
    pub fn with_self_id(
        blob: Arc<dyn BlobClient>,
        events: Arc<EventBus>,
        namespace: Namespace,
        config: CoordinationConfig,
        self_id: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            blob,
            events,
            namespace,
            self_id,
            config,
            state: RwLock::new(State { leader_id: None, epoch: 0 }),
            running: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.state.read().leader_id.as_deref() == Some(self.self_id.as_str())
    }

    #[must_use]
    pub fn metrics(&self) -> Metrics {
        let state = self.state.read();
        Metrics { is_leader: state.leader_id.as_deref() == Some(self.self_id.as_str()), epoch: state.epoch, leader_id: state.leader_id.clone() }
    }

    /// One algorithm step (spec §4.6 "Algorithm (per service instance)").
    /// Exposed directly so tests and the admin CLI can single-step it
    /// instead of waiting on the background loop.
    pub async fn tick(&self) -> Result<(), Error> {
        let now = chrono::Utc::now();
        let lease_key = keys::coord_lease(&self.namespace.0);
        let worker_key = keys::coord_worker(&self.namespace.0, &self.self_id);

        let current = lease::read_lease(&self.blob, &lease_key).await?;
        let should_attempt = match &current {
            None => true,
            Some(lease) => lease::is_expired(lease, now) || lease.leader_id == self.self_id,
        };

        let observed = if should_attempt {
            let outcome = lease::acquire_or_renew(
                &self.blob,
                &lease_key,
                &self.self_id,
                current.as_ref(),
                chrono::Duration::from_std(self.config.lease_timeout).unwrap_or(chrono::Duration::seconds(15)),
                now,
            )
            .await?;
            match outcome {
                AcquireOutcome::Acquired(lease) | AcquireOutcome::Conceded(lease) => lease,
            }
        } else {
            current.expect("should_attempt is false only when a lease is present and unexpired")
        };

        self.record_observation(&observed);
        worker::write_heartbeat(&self.blob, &worker_key, &self.self_id, now).await?;

        if self.is_leader() {
            self.sweep_workers(now).await?;
        }
        Ok(())
    }

    fn record_observation(&self, observed: &Lease) {
        let mut state = self.state.write();
        let previous_leader = state.leader_id.clone();
        if previous_leader.as_deref() != Some(observed.leader_id.as_str()) {
            state.leader_id = Some(observed.leader_id.clone());
            state.epoch = observed.epoch;
            drop(state);
            self.events.publish(Event::LeaderChanged {
                namespace: self.namespace.0.clone(),
                previous_leader,
                new_leader: Some(observed.leader_id.clone()),
                epoch: observed.epoch,
            });
        } else {
            state.epoch = observed.epoch;
        }
    }

    async fn sweep_workers(&self, now: chrono::DateTime<chrono::Utc>) -> Result<(), Error> {
        let prefix = keys::coord_workers_prefix(&self.namespace.0);
        let heartbeats = worker::list_heartbeats(&self.blob, &prefix).await?;
        let timeout = chrono::Duration::from_std(self.config.worker_timeout).unwrap_or(chrono::Duration::seconds(20));
        let stale = worker::find_stale(&heartbeats, timeout, now);
        if !stale.is_empty() {
            let swept = worker::sweep_stale(&self.blob, &stale).await?;
            tracing::debug!(namespace = %self.namespace.0, swept, "swept stale coordination workers");
        }
        Ok(())
    }

    /// Spawn the background tick loop. Returns the task handle; drop it
    /// or call [`Self::stop`] to end the loop (the task checks `running`
    /// once per tick rather than being hard-aborted mid-write).
    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while this.running.load(Ordering::SeqCst) {
                if let Err(e) = this.tick().await {
                    tracing::warn!(namespace = %this.namespace.0, error = %e, "coordination tick failed");
                }
                tokio::time::sleep(this.next_interval()).await;
            }
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn next_interval(&self) -> std::time::Duration {
        let base = self.config.heartbeat_interval.as_secs_f64();
        let jitter = self.config.heartbeat_jitter;
        let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
        std::time::Duration::from_secs_f64((base * factor).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use s3db_blob::MemoryBlobClient;

    fn service(self_id: &str, blob: Arc<dyn BlobClient>, events: Arc<EventBus>) -> Arc<CoordinationService> {
        CoordinationService::with_self_id(blob, events, Namespace("ns".into()), CoordinationConfig::default(), self_id.to_string())
    }

    #[tokio::test]
    async fn first_tick_makes_the_sole_process_leader() {
        let blob: Arc<dyn BlobClient> = Arc::new(MemoryBlobClient::new());
        let events = Arc::new(EventBus::default());
        let svc = service("p1", blob, events);
        svc.tick().await.unwrap();
        assert!(svc.is_leader());
        assert_eq!(svc.metrics().epoch, 1);
    }

    #[tokio::test]
    async fn only_one_of_two_processes_is_leader_after_both_tick() {
        let blob: Arc<dyn BlobClient> = Arc::new(MemoryBlobClient::new());
        let events = Arc::new(EventBus::default());
        let p1 = service("p1", Arc::clone(&blob), Arc::clone(&events));
        let p2 = service("p2", Arc::clone(&blob), Arc::clone(&events));

        p1.tick().await.unwrap();
        p2.tick().await.unwrap();

        assert!(p1.is_leader() != p2.is_leader(), "exactly one of the two should be leader");
    }

    #[tokio::test]
    async fn leader_change_emits_event() {
        let blob: Arc<dyn BlobClient> = Arc::new(MemoryBlobClient::new());
        let events = Arc::new(EventBus::default());
        let mut rx = events.subscribe();
        let p1 = service("p1", blob, events);
        p1.tick().await.unwrap();

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::LeaderChanged { new_leader: Some(id), .. } if id == "p1"));
    }

    #[tokio::test]
    async fn heartbeat_is_written_every_tick() {
        let blob: Arc<dyn BlobClient> = Arc::new(MemoryBlobClient::new());
        let events = Arc::new(EventBus::default());
        let svc = service("p1", blob.clone(), events);
        svc.tick().await.unwrap();
        let heartbeats = worker::list_heartbeats(&blob, "coord/ns/workers/").await.unwrap();
        assert_eq!(heartbeats.len(), 1);
        assert_eq!(heartbeats[0].1.worker_id, "p1");
    }
}
