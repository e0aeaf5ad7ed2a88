//! Send-side ARQ state machine.
//!
//! [`Sender`] owns everything the sending half of a session must remember:
//! the monotonically assigned id space, the set of in-flight (unacked)
//! records, the overflow queue of submissions waiting for window space, and
//! the per-packet retransmission deadlines.
//!
//! # Protocol contract
//!
//! - At most `window_capacity` packets may be in flight at once; further
//!   submissions queue until an ack (or a failure) frees a slot.
//! - Every in-flight packet carries its **own** expiry deadline, armed from
//!   the estimator's RTO at the moment of (re)send.  Deadlines live in a
//!   min-heap so the nearest one is a peek away.
//! - A retransmission re-sends the **identical encoded bytes** and doubles
//!   that packet's effective timeout; after `max_retries_per_packet`
//!   retransmissions the submission is declared failed.
//! - Acks for unknown or already-retired ids are ignored — duplicates and
//!   stale acks are expected, not errors.
//! - Ids are never reused, so a late ack always names exactly one packet.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.  Mutating calls enqueue wire writes which the caller
//! drains via [`Sender::poll_transmit`].

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::config::{ConfigError, SessionConfig};
use crate::packet::Packet;
use crate::rto::RtoEstimator;
use crate::state::SessionState;

// ---------------------------------------------------------------------------
// Records and outputs
// ---------------------------------------------------------------------------

/// One unacknowledged packet.
///
/// Created when the packet first enters the window, destroyed on ack,
/// failure, or session close.  The encoded bytes are kept verbatim so every
/// retransmission is byte-identical to the original transmission.
#[derive(Debug)]
struct InFlight {
    /// Encoded datagram, ready to hand to the channel.
    bytes: Vec<u8>,
    /// Wall-clock time of the **first** transmission (RTT sampling).
    first_sent_at: Instant,
    /// Number of retransmissions so far (0 = only the original send).
    retries: u32,
    /// Current expiry deadline.  The heap may hold older deadlines for this
    /// id; only an entry matching this value is live.
    deadline: Instant,
}

/// A wire write the event loop must perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmit {
    pub id: u64,
    pub bytes: Vec<u8>,
}

/// Result of feeding an ack to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The ack retired an in-flight record.  `rtt_sample` is present only
    /// when the packet was never retransmitted (Karn's rule).
    Retired { rtt_sample: Option<Duration> },
    /// Unknown, duplicate, or stale ack — a no-op.
    Ignored,
}

/// Notable outcomes of a deadline sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderEvent {
    /// The packet was re-sent; `attempt` counts retransmissions (1 = first
    /// retransmit).
    Retransmitted { id: u64, attempt: u32 },
    /// The retry ceiling was exceeded; the record is destroyed and the
    /// submission must be reported failed.  `attempts` counts every
    /// transmission including the original.
    Failed { id: u64, attempts: u32 },
}

/// Why a submission was rejected outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// Payload exceeds the session's `max_segment_size`.
    Oversized { len: usize, max: usize },
    /// The session no longer accepts submissions.
    NotActive(SessionState),
}

impl std::fmt::Display for SubmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitError::Oversized { len, max } => {
                write!(f, "payload of {len} bytes exceeds segment limit of {max}")
            }
            SubmitError::NotActive(s) => write!(f, "session is {s}, not accepting data"),
        }
    }
}

impl std::error::Error for SubmitError {}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

/// Send-side state for one session.
///
/// ```text
///  submit ──▶ [window below capacity?] ──yes──▶ in_flight (timer armed)
///                      │ no                          │
///                      ▼                     ack / ceiling
///                   queued ◀─────admit──────────────┘ (slot freed)
/// ```
#[derive(Debug)]
pub struct Sender {
    state: SessionState,
    /// Next id to assign; starts at 1 and only ever grows.
    next_id: u64,
    window_capacity: usize,
    max_segment_size: usize,
    max_retries: u32,
    /// In-flight records keyed by id.
    in_flight: HashMap<u64, InFlight>,
    /// Min-heap of `(deadline, id)`.  Entries are invalidated lazily: an
    /// entry is live only while it matches its record's current deadline.
    deadlines: BinaryHeap<Reverse<(Instant, u64)>>,
    /// Encoded submissions waiting for window space, oldest first.
    queued: VecDeque<(u64, Vec<u8>)>,
    /// Wire writes not yet drained by the event loop.
    transmits: VecDeque<Transmit>,
    estimator: RtoEstimator,
}

impl Sender {
    /// Create a sender for a fresh session.
    ///
    /// The configuration is validated here; a malformed one is fatal before
    /// any packet is sent.
    pub fn new(config: &SessionConfig) -> Result<Self, ConfigError> {
        let estimator = RtoEstimator::new(config)?;
        Ok(Self {
            state: SessionState::Active,
            next_id: 1,
            window_capacity: config.window_capacity,
            max_segment_size: config.max_segment_size,
            max_retries: config.max_retries_per_packet,
            in_flight: HashMap::new(),
            deadlines: BinaryHeap::new(),
            queued: VecDeque::new(),
            transmits: VecDeque::new(),
            estimator,
        })
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Accept one application message and assign it the next id.
    ///
    /// Enters the window (and the transmit queue) immediately when below
    /// capacity; otherwise waits in the overflow queue until an ack frees a
    /// slot.  Returns the assigned id either way.
    pub fn submit(&mut self, payload: Vec<u8>, now: Instant) -> Result<u64, SubmitError> {
        if self.state != SessionState::Active {
            return Err(SubmitError::NotActive(self.state));
        }
        if payload.len() > self.max_segment_size {
            return Err(SubmitError::Oversized {
                len: payload.len(),
                max: self.max_segment_size,
            });
        }

        let id = self.next_id;
        self.next_id += 1;
        let bytes = Packet::data(id, payload).encode();

        if self.in_flight.len() < self.window_capacity {
            self.start_flight(id, bytes, now);
        } else {
            self.queued.push_back((id, bytes));
        }
        Ok(id)
    }

    /// Process an ack for `id`.
    ///
    /// Retiring a record disarms its timer atomically (the record is the
    /// timer: heap entries without a record are dead) and admits the oldest
    /// queued submission into the freed slot.
    pub fn on_ack(&mut self, id: u64, now: Instant) -> AckOutcome {
        let Some(record) = self.in_flight.remove(&id) else {
            return AckOutcome::Ignored;
        };

        let rtt_sample = (record.retries == 0)
            .then(|| now.saturating_duration_since(record.first_sent_at));
        if let Some(sample) = rtt_sample {
            self.estimator.on_sample(sample);
        }

        self.admit_queued(now);
        AckOutcome::Retired { rtt_sample }
    }

    /// Sweep every deadline at or before `now`.
    ///
    /// Packets below the retry ceiling are re-sent verbatim and re-armed
    /// with their doubled per-packet timeout; packets at the ceiling are
    /// destroyed and reported as [`SenderEvent::Failed`].
    pub fn on_deadline(&mut self, now: Instant) -> Vec<SenderEvent> {
        let mut events = Vec::new();

        while let Some(&Reverse((deadline, id))) = self.deadlines.peek() {
            let live = self
                .in_flight
                .get(&id)
                .is_some_and(|r| r.deadline == deadline);
            if !live {
                self.deadlines.pop(); // stale entry for a retired/re-armed packet
                continue;
            }
            if deadline > now {
                break;
            }
            self.deadlines.pop();

            let record = self.in_flight.get_mut(&id).unwrap();
            if record.retries >= self.max_retries {
                let attempts = record.retries + 1;
                self.in_flight.remove(&id);
                events.push(SenderEvent::Failed { id, attempts });
                continue;
            }

            record.retries += 1;
            let attempt = record.retries;
            record.deadline = now + self.estimator.timeout_after(record.retries);
            self.transmits.push_back(Transmit {
                id,
                bytes: record.bytes.clone(),
            });
            self.deadlines.push(Reverse((record.deadline, id)));
            events.push(SenderEvent::Retransmitted { id, attempt });
        }

        // Failures freed window slots; let queued submissions claim them.
        self.admit_queued(now);
        events
    }

    /// The nearest live deadline, if any packet is in flight.
    ///
    /// Takes `&mut self` to discard stale heap entries while peeking.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(&Reverse((deadline, id))) = self.deadlines.peek() {
            let live = self
                .in_flight
                .get(&id)
                .is_some_and(|r| r.deadline == deadline);
            if live {
                return Some(deadline);
            }
            self.deadlines.pop();
        }
        None
    }

    /// Drain the next pending wire write, oldest first.
    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.transmits.pop_front()
    }

    /// Stop accepting submissions; already-accepted data keeps retrying.
    pub fn finish(&mut self) {
        if self.state == SessionState::Active {
            self.state = SessionState::Draining;
        }
    }

    /// `true` once a draining session has nothing left in flight or queued.
    pub fn is_drained(&self) -> bool {
        self.state == SessionState::Draining
            && self.in_flight.is_empty()
            && self.queued.is_empty()
    }

    /// Tear the session down.
    ///
    /// Cancels every pending timer, releases every record, and returns the
    /// ids of submissions that were never acked so the caller can report
    /// them failed rather than silently dropping them.
    pub fn close(&mut self) -> Vec<u64> {
        self.state = SessionState::Closed;
        let mut unacked: Vec<u64> = self
            .in_flight
            .drain()
            .map(|(id, _)| id)
            .chain(self.queued.drain(..).map(|(id, _)| id))
            .collect();
        unacked.sort_unstable();
        self.deadlines.clear();
        self.transmits.clear();
        unacked
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Number of packets currently awaiting acknowledgement.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of submissions waiting for window space.
    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    /// `true` while any submission is unresolved (in flight or queued).
    pub fn has_outstanding(&self) -> bool {
        !self.in_flight.is_empty() || !self.queued.is_empty()
    }

    /// Current smoothed RTT estimate, for diagnostics.
    pub fn srtt(&self) -> Option<Duration> {
        self.estimator.srtt()
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Move a packet into the window: arm its timer and queue the wire write.
    fn start_flight(&mut self, id: u64, bytes: Vec<u8>, now: Instant) {
        let deadline = now + self.estimator.current_timeout();
        self.transmits.push_back(Transmit {
            id,
            bytes: bytes.clone(),
        });
        self.in_flight.insert(
            id,
            InFlight {
                bytes,
                first_sent_at: now,
                retries: 0,
                deadline,
            },
        );
        self.deadlines.push(Reverse((deadline, id)));
    }

    /// Fill freed window slots from the overflow queue, oldest first.
    fn admit_queued(&mut self, now: Instant) {
        while self.in_flight.len() < self.window_capacity {
            let Some((id, bytes)) = self.queued.pop_front() else {
                break;
            };
            self.start_flight(id, bytes, now);
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
