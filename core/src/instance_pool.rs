//! Instance Pool (§4.7, `C7`): one long-lived worker task per enabled
//! [`AgentInstance`], pinned to a template version for its whole lifetime,
//! claiming sessions off the Store's FIFO queue and running them against
//! the Agent Loop Driver (`C8`) until told to stop.
//!
//! Follows `serve/src/connection.rs`'s spawn-one-task-per-connection,
//! worker-loop/heartbeat shape, reworked from a per-websocket-connection
//! loop into a per-instance polling loop with direct-dispatch wakeups.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use agentd_protocol::StepEvent;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::domain::{AgentInstance, MessageRole, Session};
use crate::driver::Driver;
use crate::error::StoreError;
use crate::store::{ReleaseOutcome, Store};

/// §4.7 main-loop poll interval when no direct-dispatch wakeup arrives first.
const POLL_INTERVAL: Duration = Duration::from_millis(250);
/// §4.7 "heartbeat every 5s".
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// Buffer for a session's step-event channel; generous enough that a slow
/// SSE client backpressures the driver rather than the channel dropping
/// events outright.
const SESSION_EVENT_BUFFER: usize = 256;

/// Per-session step-event plumbing between a running worker and whatever is
/// streaming the session live (the Gateway Adapter's SSE handler, typically).
/// A session with nobody listening still runs — [`InstancePool`] drains the
/// channel itself in that case — so there is no coupling from "worker makes
/// progress" to "somebody happens to be watching" (§4.2, §9).
#[derive(Default)]
pub struct SessionEventBus {
    senders: Mutex<HashMap<String, mpsc::Sender<StepEvent>>>,
}

impl SessionEventBus {
    /// Registers interest in `session_id`'s events before the worker claims
    /// it (the gateway calls this right after creating the session, then
    /// calls [`InstancePool::notify_new_session`]). Returns the receiving
    /// half to stream from.
    pub async fn subscribe(&self, session_id: &str) -> mpsc::Receiver<StepEvent> {
        let (tx, rx) = mpsc::channel(SESSION_EVENT_BUFFER);
        self.senders.lock().await.insert(session_id.to_string(), tx);
        rx
    }

    async fn take(&self, session_id: &str) -> mpsc::Sender<StepEvent> {
        if let Some(tx) = self.senders.lock().await.remove(session_id) {
            return tx;
        }
        // Nobody is streaming this session (a resumed/background run) — hand
        // the driver a sink so it never blocks on `send`.
        let (tx, mut rx) = mpsc::channel(SESSION_EVENT_BUFFER);
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        tx
    }
}

/// Wakes a template version's idle workers immediately instead of waiting
/// out the poll interval (§4.7 "direct dispatch").
#[derive(Default)]
struct Dispatch {
    notifiers: Mutex<HashMap<String, Arc<Notify>>>,
}

impl Dispatch {
    async fn get(&self, template_version_id: &str) -> Arc<Notify> {
        self.notifiers
            .lock()
            .await
            .entry(template_version_id.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    async fn notify(&self, template_version_id: &str) {
        self.get(template_version_id).await.notify_one();
    }
}

/// Owns every instance's worker task. One `InstancePool` per process; the
/// Gateway Adapter and CLI both hold an `Arc<InstancePool>` alongside their
/// `Arc<dyn Store>` (§4.7, §9).
pub struct InstancePool {
    store: Arc<dyn Store>,
    driver: Arc<Driver>,
    dispatch: Dispatch,
    pub events: SessionEventBus,
    shutdown: AtomicBool,
}

impl InstancePool {
    pub fn new(store: Arc<dyn Store>, driver: Arc<Driver>) -> Arc<Self> {
        Arc::new(Self {
            store,
            driver,
            dispatch: Dispatch::default(),
            events: SessionEventBus::default(),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Wakes any worker pinned to `template_version_id` so it polls
    /// immediately rather than waiting out [`POLL_INTERVAL`] (§4.7).
    pub async fn notify_new_session(&self, template_version_id: &str) {
        self.dispatch.notify(template_version_id).await;
    }

    /// Asks every worker to stop after its current step (§5 "process
    /// shutdown"). Wakes any worker currently sleeping on its poll interval
    /// so the flag takes effect promptly rather than after up to
    /// [`POLL_INTERVAL`].
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let notifiers: Vec<_> = self.dispatch.notifiers.lock().await.values().cloned().collect();
        for n in notifiers {
            n.notify_waiters();
        }
    }

    /// Spawns a worker for every currently-enabled instance (§4.7: on boot,
    /// `auto_start=true` instances transition OFFLINE → STARTING → IDLE).
    pub async fn spawn_all(self: &Arc<Self>) -> Result<Vec<JoinHandle<()>>, StoreError> {
        let instances = self.store.list_enabled_instances().await?;
        let mut handles = Vec::with_capacity(instances.len());
        for instance in instances {
            handles.push(self.spawn_worker(instance));
        }
        Ok(handles)
    }

    pub fn spawn_worker(self: &Arc<Self>, instance: AgentInstance) -> JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move { pool.run_worker(instance).await })
    }

    async fn run_worker(&self, instance: AgentInstance) {
        if !instance.enabled {
            return;
        }
        info!(instance = %instance.id, template_version = %instance.template_version_id, "worker starting");
        let notify = self.dispatch.get(&instance.template_version_id).await;
        let mut last_heartbeat = Instant::now() - HEARTBEAT_INTERVAL;

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                info!(instance = %instance.id, "worker stopping (shutdown)");
                return;
            }
            if last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
                if let Err(e) = self.store.heartbeat_instance(&instance.id).await {
                    warn!(instance = %instance.id, error = %e, "heartbeat failed");
                }
                last_heartbeat = Instant::now();
            }

            match self.try_claim_and_run(&instance).await {
                Ok(true) => continue, // ran a session; check for more work immediately
                Ok(false) => {}
                Err(e) => {
                    error!(instance = %instance.id, error = %e, "poll tick failed");
                }
            }

            tokio::select! {
                _ = notify.notified() => {}
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
    }

    /// One poll tick (§4.7): find the oldest claimable session for this
    /// instance's template version, race to claim it, run it, release.
    /// Returns `Ok(true)` iff a session was actually run this tick, so the
    /// caller can immediately look for more work instead of sleeping.
    async fn try_claim_and_run(&self, instance: &AgentInstance) -> Result<bool, StoreError> {
        let claimable = self
            .store
            .find_claimable_sessions(&instance.template_version_id)
            .await?;
        let Some(session) = claimable.into_iter().next() else {
            return Ok(false);
        };

        // §4.7 fairness: within a template, a higher-priority idle instance
        // is preferred over this one. Defer this tick and let that instance's
        // own poll claim it instead; if nobody's ahead of us (or the
        // preferred instance raced out of IDLE already), proceed.
        if let Some(preferred) = self.store.find_idle_instance(&instance.template_id).await? {
            if preferred.id != instance.id {
                return Ok(false);
            }
        }

        if !self.store.claim_instance(&instance.id, &session.id).await? {
            // Another worker pinned to the same template version won the
            // race; nothing to do this tick (§4.7 "first-writer-wins").
            return Ok(false);
        }

        match self.run_claimed_session(instance, session).await {
            Ok(()) => {
                self.store
                    .release_instance(&instance.id, ReleaseOutcome::Idle, None)
                    .await?;
            }
            Err(e) if e.is_stale_session() => {
                // Someone else mutated the session's state concurrently;
                // abort cleanly and let it be reclaimed (§7 `StaleSession`).
                self.store
                    .release_instance(&instance.id, ReleaseOutcome::Idle, None)
                    .await?;
            }
            Err(e) => {
                warn!(instance = %instance.id, error = %e, "session run faulted");
                self.store
                    .release_instance(&instance.id, ReleaseOutcome::Error, Some(&e.to_string()))
                    .await?;
            }
        }
        Ok(true)
    }

    async fn run_claimed_session(
        &self,
        instance: &AgentInstance,
        session: Session,
    ) -> Result<(), crate::error::DriverError> {
        let template_version = self
            .store
            .get_template_version(&instance.template_version_id)
            .await?;
        let catalog_tools = self.store.list_tools(&template_version.tool_names).await?;
        let (_, messages) = self.store.load_session(&session.id).await?;
        let task_text = messages
            .iter()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let events_tx = self.events.take(&session.id).await;
        self.driver
            .run(
                session,
                &template_version,
                &catalog_tools,
                &task_text,
                &events_tx,
                &self.shutdown,
            )
            .await
            .map(|_| ())
    }
}
