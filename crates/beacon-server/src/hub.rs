//! Client membership and message fan-out.
//!
//! A [`Hub`] is a single task that owns the map from [`ClientId`] to each
//! endpoint's outbound queue. Every mutation, broadcast, targeted send and
//! membership query travels through one ordered command channel, so the map
//! is only ever touched by the hub loop and all requests observe one global
//! order.
//!
//! Removal of a member and closure of its queue happen in the same step: the
//! hub holds the only [`mpsc::Sender`] for each queue, so dropping the map
//! entry closes the queue and the endpoint's outbound pump sees end-of-stream.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::Utf8Bytes;
use beacon_core::{ClientId, Envelope};
use metrics::{counter, gauge};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::HubError;
use crate::metrics::{
    WS_BROADCAST_DROPS_TOTAL, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_SUPERSEDED_TOTAL,
};

/// Capacity of the hub's command channel.
const COMMAND_CAPACITY: usize = 1024;

/// Sending half of an endpoint's outbound queue.
pub type OutboundQueue = mpsc::Sender<Utf8Bytes>;

/// Proof of a registration, needed to unregister.
///
/// The serial distinguishes two connections that presented the same
/// [`ClientId`]: a stale registration can never remove its successor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    id: ClientId,
    serial: u64,
}

impl Registration {
    /// The client id this registration is filed under.
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Hub-assigned connection serial.
    pub fn serial(&self) -> u64 {
        self.serial
    }
}

enum Command {
    Register {
        id: ClientId,
        serial: u64,
        queue: OutboundQueue,
    },
    Unregister {
        id: ClientId,
        serial: u64,
    },
    Deliver {
        target: Option<ClientId>,
        frame: Utf8Bytes,
    },
    Contains {
        id: ClientId,
        reply: oneshot::Sender<bool>,
    },
    Members {
        reply: oneshot::Sender<Vec<ClientId>>,
    },
}

struct Member {
    serial: u64,
    queue: OutboundQueue,
}

/// Hub loop state. Only reachable from the task started by [`Hub::spawn`].
pub struct Hub {
    members: HashMap<ClientId, Member>,
    count_tx: watch::Sender<usize>,
}

impl Hub {
    /// Start the hub loop. It runs until `cancel` fires or every handle is dropped.
    ///
    /// On exit all remaining queues are closed, so connected endpoints send a
    /// close frame and wind down.
    pub fn spawn(cancel: CancellationToken) -> (HubHandle, JoinHandle<()>) {
        let (commands, rx) = mpsc::channel(COMMAND_CAPACITY);
        let (count_tx, count_rx) = watch::channel(0);
        let hub = Self {
            members: HashMap::new(),
            count_tx,
        };
        let task = tokio::spawn(hub.run(rx, cancel));
        let handle = HubHandle {
            commands,
            serials: Arc::new(AtomicU64::new(1)),
            count: count_rx,
        };
        (handle, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>, cancel: CancellationToken) {
        info!("hub started");
        loop {
            let command = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                command = rx.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            self.apply(command);
        }
        let remaining = self.members.len();
        self.members.clear();
        self.publish_count();
        info!(remaining, "hub stopped");
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Register { id, serial, queue } => self.register(id, serial, queue),
            Command::Unregister { id, serial } => self.unregister(&id, serial),
            Command::Deliver {
                target: None,
                frame,
            } => self.broadcast(&frame),
            Command::Deliver {
                target: Some(id),
                frame,
            } => self.send_to(&id, frame),
            Command::Contains { id, reply } => {
                let _ = reply.send(self.members.contains_key(&id));
            }
            Command::Members { reply } => {
                let mut ids: Vec<ClientId> = self.members.keys().cloned().collect();
                ids.sort();
                let _ = reply.send(ids);
            }
        }
    }

    fn register(&mut self, id: ClientId, serial: u64, queue: OutboundQueue) {
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        // Last writer wins: the replaced sender is dropped here, which closes
        // the superseded endpoint's queue.
        if let Some(previous) = self.members.insert(id.clone(), Member { serial, queue }) {
            counter!(WS_SUPERSEDED_TOTAL).increment(1);
            counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
            info!(client_id = %id, serial, previous = previous.serial, "registration superseded existing connection");
        } else {
            info!(client_id = %id, serial, members = self.members.len(), "client registered");
        }
        self.publish_count();
    }

    fn unregister(&mut self, id: &ClientId, serial: u64) {
        let current = self.members.get(id).map(|m| m.serial);
        if current == Some(serial) {
            let _ = self.members.remove(id);
            counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
            info!(client_id = %id, serial, members = self.members.len(), "client unregistered");
            self.publish_count();
        } else {
            debug!(client_id = %id, serial, ?current, "unregister ignored, not the current registration");
        }
    }

    fn broadcast(&mut self, frame: &Utf8Bytes) {
        let mut dropped = Vec::new();
        for (id, member) in &self.members {
            if let Err(e) = member.queue.try_send(frame.clone()) {
                dropped.push((id.clone(), is_full(&e)));
            }
        }
        let recipients = self.members.len() - dropped.len();
        for (id, full) in dropped {
            self.drop_member(&id, full);
        }
        debug!(recipients, "broadcast delivered");
    }

    fn send_to(&mut self, id: &ClientId, frame: Utf8Bytes) {
        let Some(member) = self.members.get(id) else {
            debug!(client_id = %id, "send to absent client ignored");
            return;
        };
        if let Err(e) = member.queue.try_send(frame) {
            let full = is_full(&e);
            self.drop_member(id, full);
        }
    }

    fn drop_member(&mut self, id: &ClientId, full: bool) {
        if self.members.remove(id).is_some() {
            counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
            counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
            if full {
                warn!(client_id = %id, "outbound queue full, disconnecting slow client");
            } else {
                debug!(client_id = %id, "outbound queue closed, removing client");
            }
            self.publish_count();
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn publish_count(&self) {
        let n = self.members.len();
        gauge!(WS_CONNECTIONS_ACTIVE).set(n as f64);
        let _ = self.count_tx.send_replace(n);
    }
}

fn is_full<T>(err: &mpsc::error::TrySendError<T>) -> bool {
    matches!(err, mpsc::error::TrySendError::Full(_))
}

/// Cloneable submitter of hub commands.
///
/// Every method enqueues one command; the hub applies commands in the order
/// they were accepted across all handles.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<Command>,
    serials: Arc<AtomicU64>,
    count: watch::Receiver<usize>,
}

impl HubHandle {
    async fn submit(&self, command: Command) -> Result<(), HubError> {
        self.commands.send(command).await.map_err(|_| HubError::Closed)
    }

    /// Add `queue` as the outbound queue for `id`, replacing any live
    /// registration under the same id.
    pub async fn register(
        &self,
        id: ClientId,
        queue: OutboundQueue,
    ) -> Result<Registration, HubError> {
        let serial = self.serials.fetch_add(1, Ordering::Relaxed);
        self.submit(Command::Register {
            id: id.clone(),
            serial,
            queue,
        })
        .await?;
        Ok(Registration { id, serial })
    }

    /// Remove the registration if it is still current. Idempotent.
    pub async fn unregister(&self, registration: &Registration) -> Result<(), HubError> {
        self.submit(Command::Unregister {
            id: registration.id.clone(),
            serial: registration.serial,
        })
        .await
    }

    /// Serialize `envelope` once and offer it to every member.
    pub async fn broadcast(&self, envelope: &Envelope) -> Result<(), HubError> {
        let frame = encode(envelope)?;
        self.broadcast_frame(frame).await
    }

    /// Offer an already-encoded text frame to every member.
    pub async fn broadcast_frame(&self, frame: Utf8Bytes) -> Result<(), HubError> {
        self.submit(Command::Deliver {
            target: None,
            frame,
        })
        .await
    }

    /// Offer `envelope` to the member registered as `id`. An absent id is a
    /// successful no-op.
    pub async fn send_to(&self, id: &ClientId, envelope: &Envelope) -> Result<(), HubError> {
        let frame = encode(envelope)?;
        self.submit(Command::Deliver {
            target: Some(id.clone()),
            frame,
        })
        .await
    }

    /// Whether `id` is currently registered.
    pub async fn contains(&self, id: &ClientId) -> Result<bool, HubError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Contains {
            id: id.clone(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Registered ids, sorted.
    pub async fn members(&self) -> Result<Vec<ClientId>, HubError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Members { reply }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Member count as of the last applied command. Does not round-trip
    /// through the hub loop.
    pub fn connection_count(&self) -> usize {
        *self.count.borrow()
    }

    /// Watch the member count.
    pub fn subscribe_count(&self) -> watch::Receiver<usize> {
        self.count.clone()
    }

    /// Whether the hub loop has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

fn encode(envelope: &Envelope) -> Result<Utf8Bytes, HubError> {
    envelope.to_json().map(Utf8Bytes::from).map_err(|e| {
        warn!(kind = %envelope.kind, error = %e, "failed to encode envelope");
        HubError::Encode(e)
    })
}
