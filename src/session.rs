//! Session event loops: where the state machines meet the network.
//!
//! Each role runs as **one** tokio task per session that multiplexes its
//! three event sources with `tokio::select!`:
//!
//! ```text
//!  Sender loop                          Receiver loop
//!  ├── application submissions (mpsc)   ├── inbound datagrams (channel)
//!  ├── inbound datagrams (channel)      └── consumer shutdown (mpsc closed)
//!  └── nearest packet deadline (sleep)
//! ```
//!
//! Handling one event never blocks on another, and every network wait is
//! bounded by the nearest pending deadline.  Because ack processing and
//! deadline processing happen on the same task, retiring a record and
//! disarming its timer are atomic by construction — no locking discipline is
//! needed beyond the multiplexing itself.
//!
//! The application talks to the loops through handles:
//! [`SenderHandle::submit`] returns a [`DeliveryHandle`] that resolves to the
//! submission's delivery result; [`ReceiverHandle::recv`] yields delivered
//! payloads in order, without duplicates, ending with `None` once the session
//! closes.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::channel::Channel;
use crate::config::{ConfigError, SessionConfig};
use crate::packet::{Packet, PacketKind};
use crate::receiver::{Receiver, RecvOutcome};
use crate::sender::{AckOutcome, Sender, SenderEvent, SubmitError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why one submission failed to be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// Retransmitted up to the retry ceiling without an ack.  Fatal for this
    /// submission only; the session keeps running.
    Exhausted { id: u64, attempts: u32 },
    /// The submission was rejected before transmission (oversized payload).
    Rejected(SubmitError),
    /// The session closed while this submission was still unacked.
    SessionClosed,
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryError::Exhausted { id, attempts } => {
                write!(f, "packet {id} unacked after {attempts} transmissions")
            }
            DeliveryError::Rejected(e) => write!(f, "submission rejected: {e}"),
            DeliveryError::SessionClosed => write!(f, "session closed before delivery"),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// The session's event loop is gone; no further operations are possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionClosed;

impl std::fmt::Display for SessionClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session event loop has terminated")
    }
}

impl std::error::Error for SessionClosed {}

// ---------------------------------------------------------------------------
// Sender side
// ---------------------------------------------------------------------------

type Completion = oneshot::Sender<Result<(), DeliveryError>>;

/// Resolves once the corresponding submission is delivered or fails.
#[derive(Debug)]
pub struct DeliveryHandle(oneshot::Receiver<Result<(), DeliveryError>>);

impl DeliveryHandle {
    /// Wait for the delivery result of this submission.
    pub async fn wait(self) -> Result<(), DeliveryError> {
        self.0.await.unwrap_or(Err(DeliveryError::SessionClosed))
    }
}

/// Application-facing handle to a sending session.
pub struct SenderHandle {
    submit_tx: mpsc::Sender<(Vec<u8>, Completion)>,
    task: JoinHandle<()>,
}

impl SenderHandle {
    /// Start a sending session talking to `peer` over `channel`.
    ///
    /// The configuration is validated before the loop starts; a malformed
    /// one fails here, with no packet sent.
    pub fn spawn(
        channel: Channel,
        peer: SocketAddr,
        config: &SessionConfig,
    ) -> Result<Self, ConfigError> {
        let machine = Sender::new(config)?;
        let (submit_tx, submit_rx) = mpsc::channel(64);
        let task = tokio::spawn(sender_loop(channel, peer, machine, submit_rx));
        Ok(Self { submit_tx, task })
    }

    /// Submit one message for reliable delivery.
    ///
    /// Returns as soon as the session has accepted the message; await the
    /// returned [`DeliveryHandle`] for the per-submission completion or
    /// failure notification.
    pub async fn submit(&self, payload: Vec<u8>) -> Result<DeliveryHandle, SessionClosed> {
        let (done_tx, done_rx) = oneshot::channel();
        self.submit_tx
            .send((payload, done_tx))
            .await
            .map_err(|_| SessionClosed)?;
        Ok(DeliveryHandle(done_rx))
    }

    /// Signal end of data, wait for in-flight packets to drain, and tear the
    /// session down.
    pub async fn finish(self) {
        // Closing the submit channel moves the loop to Draining; it exits
        // once nothing is outstanding (or a fatal failure empties the set).
        drop(self.submit_tx);
        let _ = self.task.await;
    }
}

async fn sender_loop(
    channel: Channel,
    peer: SocketAddr,
    mut machine: Sender,
    mut submit_rx: mpsc::Receiver<(Vec<u8>, Completion)>,
) {
    let mut completions: HashMap<u64, Completion> = HashMap::new();
    let mut accepting = true;

    loop {
        // Perform every wire write the last event produced.
        while let Some(t) = machine.poll_transmit() {
            if let Err(e) = channel.send(peer, &t.bytes).await {
                log::warn!("[send] channel write failed: {e}");
            }
        }

        if !accepting && !machine.has_outstanding() {
            break;
        }

        let deadline = machine.next_deadline();

        tokio::select! {
            // ── Branch 1: application data ───────────────────────────────
            maybe = submit_rx.recv(), if accepting => {
                match maybe {
                    Some((payload, done)) => {
                        match machine.submit(payload, Instant::now()) {
                            Ok(id) => {
                                completions.insert(id, done);
                                log::debug!(
                                    "[send] → DATA id={id} in_flight={} queued={}",
                                    machine.in_flight(),
                                    machine.queued()
                                );
                            }
                            Err(e) => {
                                let _ = done.send(Err(DeliveryError::Rejected(e)));
                            }
                        }
                    }
                    None => {
                        // Application dropped the handle: drain, then close.
                        accepting = false;
                        machine.finish();
                        log::debug!(
                            "[send] draining, {} submission(s) outstanding",
                            machine.in_flight() + machine.queued()
                        );
                    }
                }
            }

            // ── Branch 2: inbound datagram ───────────────────────────────
            result = channel.recv() => {
                let (addr, bytes) = match result {
                    Ok(v) => v,
                    Err(e) => {
                        log::warn!("[send] channel read failed: {e}");
                        break;
                    }
                };
                if addr != peer {
                    continue;
                }
                // Corrupt datagrams are treated exactly like lost ones.
                let pkt = match Packet::decode(&bytes) {
                    Ok(p) => p,
                    Err(e) => {
                        log::debug!("[send] dropped corrupt datagram: {e}");
                        continue;
                    }
                };
                if pkt.kind != PacketKind::Ack {
                    continue;
                }

                match machine.on_ack(pkt.id, Instant::now()) {
                    AckOutcome::Retired { rtt_sample } => {
                        log::debug!(
                            "[send] ← ACK id={} rtt={rtt_sample:?} in_flight={}",
                            pkt.id,
                            machine.in_flight()
                        );
                        if let Some(done) = completions.remove(&pkt.id) {
                            let _ = done.send(Ok(()));
                        }
                    }
                    AckOutcome::Ignored => {
                        log::debug!("[send] ← stale ACK id={} (ignored)", pkt.id);
                    }
                }
            }

            // ── Branch 3: nearest retransmit deadline ────────────────────
            _ = sleep_until_std(deadline.unwrap_or_else(Instant::now)),
                if deadline.is_some() =>
            {
                for event in machine.on_deadline(Instant::now()) {
                    match event {
                        SenderEvent::Retransmitted { id, attempt } => {
                            log::debug!("[send] timeout — retransmit id={id} attempt={attempt}");
                        }
                        SenderEvent::Failed { id, attempts } => {
                            log::warn!(
                                "[send] giving up on id={id} after {attempts} transmissions"
                            );
                            if let Some(done) = completions.remove(&id) {
                                let _ = done.send(Err(DeliveryError::Exhausted { id, attempts }));
                            }
                        }
                    }
                }
            }
        }
    }

    // Teardown: cancel timers, release records, and report — never silently
    // drop — whatever is still unacked.
    let unacked = machine.close();
    if !unacked.is_empty() {
        log::warn!("[send] closed with {} undelivered submission(s)", unacked.len());
    }
    for id in unacked {
        if let Some(done) = completions.remove(&id) {
            let _ = done.send(Err(DeliveryError::SessionClosed));
        }
    }
}

/// `tokio::time::sleep_until` over a `std::time::Instant` deadline.
async fn sleep_until_std(deadline: Instant) {
    let now = Instant::now();
    let remaining = deadline.saturating_duration_since(now);
    tokio::time::sleep(remaining).await;
}

// ---------------------------------------------------------------------------
// Receiver side
// ---------------------------------------------------------------------------

/// Application-facing handle to a receiving session.
///
/// [`recv`](Self::recv) yields the delivered payload sequence: in order, no
/// duplicates, finite once the session closes.
pub struct ReceiverHandle {
    deliveries: mpsc::Receiver<Vec<u8>>,
    task: JoinHandle<()>,
}

impl ReceiverHandle {
    /// Start a receiving session on `channel`.
    ///
    /// The peer is pinned to the source address of the first valid datagram;
    /// datagrams from other sources are ignored.
    pub fn spawn(channel: Channel) -> Self {
        let (deliver_tx, deliveries) = mpsc::channel(64);
        let task = tokio::spawn(receiver_loop(channel, deliver_tx));
        Self { deliveries, task }
    }

    /// Next delivered payload, or `None` once the session is closed and the
    /// delivered sequence is exhausted.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.deliveries.recv().await
    }

    /// Close the session: stop acking, drop undelivered state, end the
    /// delivered sequence.
    pub async fn close(mut self) {
        self.deliveries.close();
        let _ = self.task.await;
    }
}

async fn receiver_loop(channel: Channel, deliver_tx: mpsc::Sender<Vec<u8>>) {
    let mut machine = Receiver::new();
    // Pinned after the first valid datagram.
    let mut peer: Option<SocketAddr> = None;

    loop {
        let (addr, bytes) = tokio::select! {
            result = channel.recv() => match result {
                Ok(v) => v,
                Err(e) => {
                    log::warn!("[recv] channel read failed: {e}");
                    break;
                }
            },
            // The consumer closed its end; the session is over.
            _ = deliver_tx.closed() => break,
        };

        if peer.is_some_and(|p| p != addr) {
            continue;
        }

        // Both corruption checks happen in decode; either failure means
        // silent discard — no ack, recovery is the sender's timeout.
        let pkt = match Packet::decode(&bytes) {
            Ok(p) => p,
            Err(e) => {
                log::debug!("[recv] dropped corrupt datagram: {e}");
                continue;
            }
        };
        if peer.is_none() {
            peer = Some(addr);
            log::debug!("[recv] pinned peer {addr}");
        }

        match machine.on_packet(pkt) {
            RecvOutcome::Deliver { id, payload } => {
                log::debug!(
                    "[recv] ← DATA id={id} len={} delivered (total {}); → ACK id={id}",
                    payload.len(),
                    machine.delivered()
                );
                if deliver_tx.send(payload).await.is_err() {
                    break; // consumer gone, stop acking so the sender notices
                }
                send_ack(&channel, addr, id).await;
            }
            RecvOutcome::AckDuplicate { id } => {
                // Our earlier ack was lost; re-ack so the sender can retire
                // the packet, but deliver nothing.
                log::debug!("[recv] ← duplicate DATA id={id}; → ACK id={id}");
                send_ack(&channel, addr, id).await;
            }
            RecvOutcome::Discard => {
                log::debug!(
                    "[recv] discarded packet ahead of expectation (next={})",
                    machine.next_expected_id()
                );
            }
        }
    }
}

async fn send_ack(channel: &Channel, peer: SocketAddr, id: u64) {
    if let Err(e) = channel.send(peer, &Packet::ack(id).encode()).await {
        log::warn!("[recv] failed to send ACK id={id}: {e}");
    }
}
