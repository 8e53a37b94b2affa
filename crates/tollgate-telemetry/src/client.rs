//! Batched, non-blocking event delivery.
//!
//! `track()` only ever touches an in-memory queue. A background flush thread
//! drains it every `flush_interval`, or sooner when the queue reaches
//! `batch_size`, and posts each batch to `/agents/{agent_id}/events`. A
//! failed post puts the whole batch back on the queue, so delivery is
//! at-least-once and a retried batch may interleave with newer events.
//!
//! When auto-registration is on, construction also registers the process
//! with the fleet inventory and, if that succeeds, starts a heartbeat
//! thread. Registration failure is logged and never blocks startup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use tollgate_contracts::{
    config::ClientConfig,
    error::{TollgateError, TollgateResult},
    event::{AgentIdentity, Event},
};
use tollgate_core::{
    lifecycle::{join_with_timeout, Shutdown},
    traits::{EventSink, Transport},
};

use crate::fleet::{heartbeat_payload, registration_payload, NetworkInfo, ProcessInfo};
use crate::http::ApiClient;

const FLUSH_THREAD: &str = "tollgate-event-flush";
const HEARTBEAT_THREAD: &str = "tollgate-heartbeat";

/// Extra time granted to a background thread beyond its own interval.
const JOIN_GRACE: Duration = Duration::from_secs(1);

struct Inner {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    queue_tx: Sender<Event>,
    queue_rx: Receiver<Event>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    identity: RwLock<AgentIdentity>,
    /// Held while a batch is in flight so concurrent flushes take turns.
    flush_lock: Mutex<()>,
    shutdown: Shutdown,
}

impl Inner {
    fn agent_id(&self) -> Option<String> {
        self.identity.read().unwrap_or_else(|e| e.into_inner()).agent_id.clone()
    }

    fn flush(&self) -> usize {
        let Some(agent_id) = self.agent_id() else {
            debug!(pending = self.queue_rx.len(), "no agent id yet; holding events");
            return 0;
        };
        let _in_flight = self.flush_lock.lock().unwrap_or_else(|e| e.into_inner());

        let batch: Vec<Event> = self.queue_rx.try_iter().take(self.config.batch_size).collect();
        if batch.is_empty() {
            return 0;
        }

        let count = batch.len();
        let body = json!({ "events": batch.iter().map(Event::to_value).collect::<Vec<_>>() });
        match self.transport.post_json(&format!("/agents/{}/events", agent_id), &body) {
            Ok(_) => {
                info!(count, agent_id = %agent_id, "delivered events");
                count
            }
            Err(e) => {
                let failure = TollgateError::Delivery { reason: e.to_string() };
                error!(error = %failure, count, "re-enqueueing undelivered events");
                for event in batch {
                    // Cannot fail: `self` owns the receiver.
                    let _ = self.queue_tx.send(event);
                }
                0
            }
        }
    }

    fn register_fleet(&self) -> Option<(String, Value)> {
        let process = ProcessInfo::current();
        let network = NetworkInfo::current();
        let body = registration_payload(&self.config, &process, &network);

        match self.transport.post_json("/fleet/register", &body) {
            Ok(response) => match fleet_id(&response) {
                Some(fleet_id) => {
                    self.identity.write().unwrap_or_else(|e| e.into_inner()).fleet_agent_id = Some(fleet_id.clone());
                    info!(fleet_agent_id = %fleet_id, name = %self.config.agent_name, "registered with fleet");
                    Some((fleet_id, heartbeat_payload(&process, &network)))
                }
                None => {
                    warn!("fleet registration response has no id; heartbeat disabled");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "fleet registration failed; continuing without heartbeat");
                None
            }
        }
    }

    fn heartbeat(&self, fleet_id: &str, payload: &Value) {
        match self.transport.post_json(&format!("/fleet/{}/heartbeat", fleet_id), payload) {
            Ok(_) => debug!(fleet_agent_id = %fleet_id, "heartbeat sent"),
            Err(e) => warn!(error = %e, fleet_agent_id = %fleet_id, "heartbeat failed"),
        }
    }
}

/// The id sits under `data` when the backend wraps its responses, at the
/// top level otherwise.
fn fleet_id(response: &Value) -> Option<String> {
    match response.get("data") {
        Some(data) if data.is_object() => data.get("id").and_then(id_string),
        _ => response.get("id").and_then(id_string),
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Default)]
struct Workers {
    flush: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
}

/// Queues events and delivers them in batches from a background thread.
///
/// Owns its threads: `close()` (or drop) signals them, joins them with a
/// bounded wait, flushes once more and releases the transport.
pub struct EventClient {
    inner: Arc<Inner>,
    workers: Mutex<Workers>,
    closed: AtomicBool,
}

impl EventClient {
    /// Build the HTTP transport from `config` and start the client.
    pub fn new(config: ClientConfig) -> TollgateResult<Self> {
        let transport = Arc::new(ApiClient::new(&config)?);
        Ok(Self::with_transport(transport, config))
    }

    /// Start the client over an existing transport.
    pub fn with_transport(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        let (queue_tx, queue_rx) = unbounded();
        let (wake_tx, wake_rx) = bounded(1);
        let inner = Arc::new(Inner {
            transport,
            config,
            queue_tx,
            queue_rx,
            wake_tx,
            wake_rx,
            identity: RwLock::new(AgentIdentity::default()),
            flush_lock: Mutex::new(()),
            shutdown: Shutdown::new(),
        });

        let mut workers = Workers {
            flush: spawn_named(FLUSH_THREAD, {
                let inner = Arc::clone(&inner);
                move || flush_loop(&inner)
            }),
            heartbeat: None,
        };

        if inner.config.auto_register {
            if let Some((fleet_id, payload)) = inner.register_fleet() {
                let inner = Arc::clone(&inner);
                workers.heartbeat = spawn_named(HEARTBEAT_THREAD, move || {
                    while !inner.shutdown.wait(inner.config.heartbeat_interval) {
                        inner.heartbeat(&fleet_id, &payload);
                    }
                    debug!("heartbeat loop stopped");
                });
            }
        }

        Self {
            inner,
            workers: Mutex::new(workers),
            closed: AtomicBool::new(false),
        }
    }

    /// Queue `event` for delivery. Never blocks on the network.
    ///
    /// Events tracked after `close()` began are dropped.
    pub fn track(&self, event: Event) {
        if self.inner.shutdown.is_triggered() {
            warn!(name = %event.name, "event client is shutting down; dropping event");
            return;
        }
        debug!(event_type = event.event_type.as_str(), name = %event.name, "event queued");
        // Cannot fail: `inner` owns the receiver.
        let _ = self.inner.queue_tx.send(event);

        if self.inner.queue_rx.len() >= self.inner.config.batch_size {
            // A full wake slot already means a flush is pending.
            let _ = self.inner.wake_tx.try_send(());
        }
    }

    /// Deliver up to one batch now. Returns how many events were delivered.
    ///
    /// Does nothing until an agent id is known. On failure the batch is
    /// re-queued and `0` is returned.
    pub fn flush(&self) -> usize {
        self.inner.flush()
    }

    /// `POST /agents` and adopt the returned id for event delivery.
    pub fn register_agent(&self, name: &str, framework: Option<&str>, metadata: Value) -> TollgateResult<String> {
        let mut body = json!({ "name": name, "metadata": metadata });
        if let Some(framework) = framework {
            body["framework"] = Value::String(framework.to_string());
        }
        let response = self.inner.transport.post_json("/agents", &body)?;
        let agent_id = response
            .get("id")
            .and_then(id_string)
            .ok_or_else(|| TollgateError::transport("agent registration response has no 'id'"))?;
        self.set_agent_id(agent_id.clone());
        info!(agent_id = %agent_id, name = %name, "agent registered");
        Ok(agent_id)
    }

    /// Use an id obtained elsewhere for event delivery.
    pub fn set_agent_id(&self, agent_id: impl Into<String>) {
        self.inner.identity.write().unwrap_or_else(|e| e.into_inner()).agent_id = Some(agent_id.into());
    }

    pub fn identity(&self) -> AgentIdentity {
        self.inner.identity.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn agent_id(&self) -> Option<String> {
        self.inner.agent_id()
    }

    pub fn fleet_agent_id(&self) -> Option<String> {
        self.identity().fleet_agent_id
    }

    /// Events waiting for delivery.
    pub fn pending(&self) -> usize {
        self.inner.queue_rx.len()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// The transport this client posts through, for sharing with a
    /// `RemotePolicySource`.
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.inner.transport)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop background threads, flush once, release the transport.
    ///
    /// The second and later calls do nothing.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.trigger();

        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
        if let Some(handle) = workers.flush {
            join_with_timeout(handle, self.inner.config.flush_interval + JOIN_GRACE, FLUSH_THREAD);
        }
        if let Some(handle) = workers.heartbeat {
            join_with_timeout(handle, self.inner.config.heartbeat_interval + JOIN_GRACE, HEARTBEAT_THREAD);
        }

        let delivered = self.inner.flush();
        self.inner.transport.close();
        info!(delivered, left_behind = self.pending(), "event client closed");
    }
}

impl EventSink for EventClient {
    fn track(&self, event: Event) {
        EventClient::track(self, event)
    }

    fn endpoint(&self) -> Option<&str> {
        Some(self.inner.transport.base_url())
    }
}

impl Drop for EventClient {
    fn drop(&mut self) {
        self.close();
    }
}

fn flush_loop(inner: &Inner) {
    let shutdown = inner.shutdown.receiver();
    loop {
        let stop = select! {
            recv(inner.wake_rx) -> _ => false,
            recv(shutdown) -> _ => true,
            default(inner.config.flush_interval) => false,
        };
        if stop || inner.shutdown.is_triggered() {
            break;
        }
        inner.flush();
    }
    debug!("flush loop stopped");
}

fn spawn_named<F>(name: &str, body: F) -> Option<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    match std::thread::Builder::new().name(name.to_string()).spawn(body) {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(thread = %name, error = %e, "could not start background thread");
            None
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
