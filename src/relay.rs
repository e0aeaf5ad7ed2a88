//! Fault-injecting UDP relay for deterministic testing.
//!
//! Real networks drop, reorder, duplicate, and corrupt packets.  To exercise
//! the reliability mechanisms without depending on actual network
//! conditions, a [`Relay`] stands between the two endpoints on loopback and
//! applies a configurable [`FaultPlan`] to the datagrams flowing through it:
//!
//! | Fault                  | Description                                   |
//! |------------------------|-----------------------------------------------|
//! | Targeted drop          | Drop a specific DATA id's first transmission, |
//! |                        | or every transmission of that id.             |
//! | ACK drop               | Drop the first ACK for a specific id.         |
//! | Duplication            | Deliver a DATA id's first transmission twice. |
//! | Corruption             | Flip one payload bit in a DATA id's first     |
//! |                        | transmission.                                 |
//! | Probabilistic loss     | Drop any datagram with probability            |
//! |                        | `loss_rate`, from a **seeded** RNG so runs    |
//! |                        | are reproducible.                             |
//!
//! The relay decodes passing datagrams only to classify them; whatever bytes
//! arrived are forwarded verbatim (or deliberately damaged).  It also counts
//! DATA transmissions per id so tests can assert statements like "exactly
//! one retransmission of id 2 was observed".
//!
//! Topology: the sender targets the relay's address; the relay forwards to
//! the receiver and learns the sender's address from the first datagram, so
//! ACKs find their way back.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;

use crate::channel::{Channel, ChannelError};
use crate::packet::{Packet, PacketKind, HEADER_LEN};

/// Faults to apply, all keyed by packet id where targeted.
///
/// The default plan is a transparent pass-through.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Drop any datagram with this probability (0.0 = never).
    pub loss_rate: f64,
    /// Seed for the probabilistic faults; identical seeds replay identical
    /// fault sequences.
    pub seed: u64,
    /// Drop only the first transmission of these DATA ids.
    pub drop_data_once: HashSet<u64>,
    /// Drop every transmission of these DATA ids (forces exhaustion).
    pub drop_data_always: HashSet<u64>,
    /// Drop the first ACK observed for these ids.
    pub drop_ack_once: HashSet<u64>,
    /// Forward the first transmission of these DATA ids twice.
    pub duplicate_data_once: HashSet<u64>,
    /// Flip one payload bit in the first transmission of these DATA ids.
    pub corrupt_data_once: HashSet<u64>,
}

/// Per-id transmission counters, shared with the test for assertions.
#[derive(Debug, Default)]
struct Counters {
    data_seen: HashMap<u64, u32>,
    ack_seen: HashMap<u64, u32>,
}

/// A running fault relay.
pub struct Relay {
    addr: SocketAddr,
    counters: Arc<Mutex<Counters>>,
    task: JoinHandle<()>,
}

impl Relay {
    /// Start a relay forwarding to `receiver_addr` with the given plan.
    pub async fn spawn(receiver_addr: SocketAddr, plan: FaultPlan) -> Result<Self, ChannelError> {
        let channel = Channel::bind("127.0.0.1:0".parse().unwrap()).await?;
        let addr = channel.local_addr();
        let counters = Arc::new(Mutex::new(Counters::default()));
        let task = tokio::spawn(relay_loop(channel, receiver_addr, plan, counters.clone()));
        Ok(Self {
            addr,
            counters,
            task,
        })
    }

    /// The address the **sender** should target instead of the receiver.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// How many DATA transmissions of `id` the relay has observed (including
    /// ones it then dropped or damaged).
    pub fn data_transmissions(&self, id: u64) -> u32 {
        self.counters
            .lock()
            .unwrap()
            .data_seen
            .get(&id)
            .copied()
            .unwrap_or(0)
    }

    /// Stop forwarding.
    pub fn shutdown(self) {
        self.task.abort();
    }
}

async fn relay_loop(
    channel: Channel,
    receiver_addr: SocketAddr,
    plan: FaultPlan,
    counters: Arc<Mutex<Counters>>,
) {
    let mut rng = StdRng::seed_from_u64(plan.seed);
    let mut sender_addr: Option<SocketAddr> = None;

    loop {
        let (from, mut bytes) = match channel.recv().await {
            Ok(v) => v,
            Err(e) => {
                log::warn!("[relay] read failed: {e}");
                break;
            }
        };

        let dest = if from == receiver_addr {
            match sender_addr {
                Some(a) => a,
                None => continue, // receiver spoke first; nowhere to forward
            }
        } else {
            sender_addr = Some(from);
            receiver_addr
        };

        let mut duplicate = false;
        if let Ok(pkt) = Packet::decode(&bytes) {
            let nth = {
                let mut c = counters.lock().unwrap();
                let slot = match pkt.kind {
                    PacketKind::Data => c.data_seen.entry(pkt.id).or_insert(0),
                    PacketKind::Ack => c.ack_seen.entry(pkt.id).or_insert(0),
                };
                *slot += 1;
                *slot
            };

            match pkt.kind {
                PacketKind::Data => {
                    if plan.drop_data_always.contains(&pkt.id)
                        || (nth == 1 && plan.drop_data_once.contains(&pkt.id))
                    {
                        log::debug!("[relay] dropping DATA id={} (#{nth})", pkt.id);
                        continue;
                    }
                    if nth == 1 && plan.corrupt_data_once.contains(&pkt.id) {
                        // One bit of damage; enough for the checksum to catch.
                        let victim = HEADER_LEN.min(bytes.len() - 1);
                        bytes[victim] ^= 0x01;
                        log::debug!("[relay] corrupting DATA id={}", pkt.id);
                    }
                    duplicate = nth == 1 && plan.duplicate_data_once.contains(&pkt.id);
                }
                PacketKind::Ack => {
                    if nth == 1 && plan.drop_ack_once.contains(&pkt.id) {
                        log::debug!("[relay] dropping ACK id={}", pkt.id);
                        continue;
                    }
                }
            }
        }

        if plan.loss_rate > 0.0 && rng.gen_bool(plan.loss_rate) {
            log::debug!("[relay] random loss");
            continue;
        }

        if let Err(e) = channel.send(dest, &bytes).await {
            log::warn!("[relay] forward failed: {e}");
        }
        if duplicate {
            let _ = channel.send(dest, &bytes).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_plan_is_passthrough() {
        let plan = FaultPlan::default();
        assert_eq!(plan.loss_rate, 0.0);
        assert!(plan.drop_data_once.is_empty());
        assert!(plan.drop_data_always.is_empty());
        assert!(plan.drop_ack_once.is_empty());
        assert!(plan.duplicate_data_once.is_empty());
        assert!(plan.corrupt_data_once.is_empty());
    }

    #[tokio::test]
    async fn relay_forwards_and_counts() {
        let receiver = Channel::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let relay = Relay::spawn(receiver.local_addr(), FaultPlan::default())
            .await
            .unwrap();

        let sender = Channel::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let bytes = Packet::data(1, b"through".to_vec()).encode();
        sender.send(relay.addr(), &bytes).await.unwrap();

        let (_, forwarded) = receiver.recv().await.unwrap();
        assert_eq!(forwarded, bytes);
        assert_eq!(relay.data_transmissions(1), 1);

        // And the return path: receiver's ACK reaches the sender.
        receiver
            .send(relay.addr(), &Packet::ack(1).encode())
            .await
            .unwrap();
        let (_, ack_bytes) = sender.recv().await.unwrap();
        assert_eq!(Packet::decode(&ack_bytes).unwrap(), Packet::ack(1));

        relay.shutdown();
    }
}
