//! Session and per-packet finite-state-machine types.
//!
//! Transitions are *not* implemented here — they live in [`crate::sender`] —
//! but keeping the state types in their own module makes it easy to add guard
//! logic or tracing without touching the protocol machinery.
//!
//! Per-packet lifecycle (tracked implicitly by the in-flight record's retry
//! count; an acked packet's record is destroyed, so `Acked` has no value
//! representation):
//!
//! ```text
//! SENT ──ack──▶ ACKED (record destroyed)
//!   │ ▲
//!   │ └──resent, timer re-armed with backoff──┐
//!   └──timer fires──▶ RETRANSMITTING ─────────┘
//!                        │
//!                        └──retry ceiling──▶ FAILED (record destroyed)
//! ```

/// All possible states of one sending session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting submissions and exchanging packets; initial state.
    Active,
    /// All application data has been submitted; waiting for the final acks.
    /// New submissions are rejected.
    Draining,
    /// Terminal.  All timers cancelled, all in-flight records released;
    /// any still-unacked submission has been reported failed.
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Active => "active",
            SessionState::Draining => "draining",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}
