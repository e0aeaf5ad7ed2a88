//! `arq-over-udp` — reliable, in-order message delivery over lossy UDP.
//!
//! The underlying transport may drop, duplicate, delay, or corrupt datagrams;
//! this crate layers Automatic Repeat reQuest (ARQ) on top of it: every DATA
//! packet carries a monotonically assigned id and a checksum, the receiver
//! acks each id it delivers, and the sender retransmits anything unacked when
//! its per-packet timer (driven by a smoothed RTT estimate) expires.
//!
//! # Architecture
//!
//! ```text
//!  application data                     delivered payloads (in order)
//!       │ submit()                             ▲ recv()
//!  ┌────▼─────────┐   DATA (id, csum)   ┌──────┴───────┐
//!  │ Sender loop  │────────────────────▶│ Receiver loop│
//!  │  ├ window    │                     │  ├ expected  │
//!  │  ├ in-flight │◀────────────────────│  │   id      │
//!  │  └ timers    │     ACK (id)        │  └ dedup     │
//!  └────┬─────────┘                     └──────┬───────┘
//!       │            raw UDP datagrams         │
//!  ┌────▼─────────────────────────────────────▼───────┐
//!  │            Channel  (lossy, unordered)           │
//!  └──────────────────────────────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]   — wire format (serialise / deserialise, checksum)
//! - [`rto`]      — retransmission-timeout estimation (SRTT / RTTVAR)
//! - [`config`]   — session tunables, validated before any packet is sent
//! - [`state`]    — session finite-state-machine types
//! - [`sender`]   — send-side state machine (window, in-flight set, deadlines)
//! - [`receiver`] — receive-side state machine (ordering, de-duplication)
//! - [`session`]  — event loops multiplexing network, app data, and timers
//! - [`channel`]  — async UDP datagram abstraction
//! - [`relay`]    — fault-injecting forwarder for deterministic tests

pub mod channel;
pub mod config;
pub mod packet;
pub mod receiver;
pub mod relay;
pub mod rto;
pub mod sender;
pub mod session;
pub mod state;
