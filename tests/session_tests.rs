//! End-to-end tests for the sender/receiver session loops.
//!
//! Each test spins up both endpoints as tokio tasks on loopback UDP, with a
//! fault-injecting relay in between where the scenario needs loss,
//! duplication, or corruption.  Fault plans are deterministic (targeted by
//! packet id, seeded RNG) so failures are reproducible.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use arq_over_udp::channel::Channel;
use arq_over_udp::config::SessionConfig;
use arq_over_udp::relay::{FaultPlan, Relay};
use arq_over_udp::session::{DeliveryError, ReceiverHandle, SenderHandle};

/// Bind a channel to an OS-assigned loopback port.
async fn ephemeral() -> Channel {
    let addr = "127.0.0.1:0".parse().unwrap();
    Channel::bind(addr).await.expect("bind failed")
}

/// Config with timeouts small enough for fast tests but far above loopback
/// RTT, so no spurious retransmissions muddy the assertions.
fn test_config() -> SessionConfig {
    SessionConfig {
        initial_rto: Duration::from_millis(200),
        min_rto: Duration::from_millis(100),
        max_rto: Duration::from_secs(5),
        ..SessionConfig::default()
    }
}

/// Spawn a receiver on an ephemeral port; returns its address and a task
/// that collects `expect` delivered payloads.
async fn collecting_receiver(
    expect: usize,
) -> (SocketAddr, tokio::task::JoinHandle<Vec<Vec<u8>>>) {
    let channel = ephemeral().await;
    let addr = channel.local_addr();
    let mut session = ReceiverHandle::spawn(channel);
    let task = tokio::spawn(async move {
        let mut got = Vec::new();
        while got.len() < expect {
            match session.recv().await {
                Some(payload) => got.push(payload),
                None => break,
            }
        }
        session.close().await;
        got
    });
    (addr, task)
}

/// Submit every payload, await every per-submission result, then drain the
/// session.  Returns the per-submission results in submission order.
async fn send_all(
    peer: SocketAddr,
    config: &SessionConfig,
    payloads: &[&[u8]],
) -> Vec<Result<(), DeliveryError>> {
    let channel = ephemeral().await;
    let session = SenderHandle::spawn(channel, peer, config).expect("spawn sender");

    let mut handles = Vec::new();
    for p in payloads {
        handles.push(session.submit(p.to_vec()).await.expect("submit"));
    }

    let mut results = Vec::new();
    for h in handles {
        results.push(h.wait().await);
    }
    session.finish().await;
    results
}

// ---------------------------------------------------------------------------
// Test 1: clean network, messages delivered in order
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_in_order_delivery_clean() {
    let (addr, receiver) = collecting_receiver(3).await;

    let results = send_all(addr, &test_config(), &[b"first", b"second", b"third"]).await;
    assert!(results.iter().all(Result::is_ok));

    let got = receiver.await.unwrap();
    assert_eq!(got, vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()]);
}

// ---------------------------------------------------------------------------
// Test 2: pipelined burst larger than the window
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_pipelined_burst_window4() {
    const MSG_COUNT: usize = 20;

    let (addr, receiver) = collecting_receiver(MSG_COUNT).await;

    let config = SessionConfig {
        window_capacity: 4,
        ..test_config()
    };
    let payloads: Vec<Vec<u8>> = (0..MSG_COUNT)
        .map(|i| format!("msg-{i:02}").into_bytes())
        .collect();
    let refs: Vec<&[u8]> = payloads.iter().map(Vec::as_slice).collect();

    let results = send_all(addr, &config, &refs).await;
    assert!(results.iter().all(Result::is_ok));

    let got = receiver.await.unwrap();
    assert_eq!(got, payloads, "delivery must match submission order exactly");
}

// ---------------------------------------------------------------------------
// Test 3: the canonical loss scenario — drop "b"'s first transmission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_single_loss_recovered_with_one_retransmit() {
    let (recv_addr, receiver) = collecting_receiver(3).await;

    // id 2 carries "b" (ids are assigned 1, 2, 3 in submission order).
    let plan = FaultPlan {
        drop_data_once: HashSet::from([2]),
        ..FaultPlan::default()
    };
    let relay = Relay::spawn(recv_addr, plan).await.unwrap();

    let config = SessionConfig {
        window_capacity: 2,
        ..test_config()
    };
    let results = send_all(relay.addr(), &config, &[b"a", b"b", b"c"]).await;
    assert!(results.iter().all(Result::is_ok));

    let got = receiver.await.unwrap();
    assert_eq!(got, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);

    // Original (dropped) + exactly one retransmission.
    assert_eq!(relay.data_transmissions(2), 2);
    relay.shutdown();
}

// ---------------------------------------------------------------------------
// Test 4: lost ACK — duplicate data is re-acked, never re-delivered
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_lost_ack_triggers_reack_not_redelivery() {
    let (recv_addr, receiver) = collecting_receiver(2).await;

    let plan = FaultPlan {
        drop_ack_once: HashSet::from([1]),
        ..FaultPlan::default()
    };
    let relay = Relay::spawn(recv_addr, plan).await.unwrap();

    let results = send_all(relay.addr(), &test_config(), &[b"ping", b"pong"]).await;
    assert!(results.iter().all(Result::is_ok));

    let got = receiver.await.unwrap();
    assert_eq!(got, vec![b"ping".to_vec(), b"pong".to_vec()]);

    // The sender had to retransmit id 1 because its ACK was eaten; the
    // receiver must have re-acked without delivering a second copy.
    assert_eq!(relay.data_transmissions(1), 2);
    relay.shutdown();
}

// ---------------------------------------------------------------------------
// Test 5: corruption is treated exactly like loss
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_corrupted_packet_recovered_by_timeout() {
    let (recv_addr, receiver) = collecting_receiver(2).await;

    let plan = FaultPlan {
        corrupt_data_once: HashSet::from([2]),
        ..FaultPlan::default()
    };
    let relay = Relay::spawn(recv_addr, plan).await.unwrap();

    let results = send_all(relay.addr(), &test_config(), &[b"intact", b"mangled"]).await;
    assert!(results.iter().all(Result::is_ok));

    let got = receiver.await.unwrap();
    assert_eq!(got, vec![b"intact".to_vec(), b"mangled".to_vec()]);

    // The damaged copy was silently discarded (no ack), so a retransmission
    // was needed.
    assert!(relay.data_transmissions(2) >= 2);
    relay.shutdown();
}

// ---------------------------------------------------------------------------
// Test 6: duplicated data delivered exactly once
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_duplicated_packet_delivered_once() {
    let (recv_addr, receiver) = collecting_receiver(3).await;

    let plan = FaultPlan {
        duplicate_data_once: HashSet::from([1, 2]),
        ..FaultPlan::default()
    };
    let relay = Relay::spawn(recv_addr, plan).await.unwrap();

    let results = send_all(relay.addr(), &test_config(), &[b"x", b"y", b"z"]).await;
    assert!(results.iter().all(Result::is_ok));

    let got = receiver.await.unwrap();
    assert_eq!(got, vec![b"x".to_vec(), b"y".to_vec(), b"z".to_vec()]);
    relay.shutdown();
}

// ---------------------------------------------------------------------------
// Test 7: exhaustion — a black-holed packet fails, the session survives
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_exhaustion_fails_only_that_submission() {
    let (recv_addr, receiver) = collecting_receiver(1).await;

    let plan = FaultPlan {
        drop_data_always: HashSet::from([2]),
        ..FaultPlan::default()
    };
    let relay = Relay::spawn(recv_addr, plan).await.unwrap();

    let config = SessionConfig {
        max_retries_per_packet: 2,
        initial_rto: Duration::from_millis(100),
        min_rto: Duration::from_millis(50),
        max_rto: Duration::from_secs(1),
        ..SessionConfig::default()
    };
    let results = send_all(relay.addr(), &config, &[b"delivered", b"blackholed"]).await;

    assert_eq!(results[0], Ok(()));
    assert_eq!(
        results[1],
        Err(DeliveryError::Exhausted { id: 2, attempts: 3 }),
        "black-holed submission must fail after original + 2 retries"
    );

    // Original + 2 retransmissions were attempted, all dropped.
    assert_eq!(relay.data_transmissions(2), 3);

    let got = receiver.await.unwrap();
    assert_eq!(got, vec![b"delivered".to_vec()]);
    relay.shutdown();
}

// ---------------------------------------------------------------------------
// Test 8: seeded random loss on both directions — everything still arrives
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_random_loss_eventual_delivery() {
    const MSG_COUNT: usize = 15;

    let (recv_addr, receiver) = collecting_receiver(MSG_COUNT).await;

    let plan = FaultPlan {
        loss_rate: 0.2,
        seed: 7,
        ..FaultPlan::default()
    };
    let relay = Relay::spawn(recv_addr, plan).await.unwrap();

    let config = SessionConfig {
        window_capacity: 4,
        initial_rto: Duration::from_millis(150),
        min_rto: Duration::from_millis(75),
        max_rto: Duration::from_secs(2),
        max_retries_per_packet: 12,
        ..SessionConfig::default()
    };
    let payloads: Vec<Vec<u8>> = (0..MSG_COUNT)
        .map(|i| format!("lossy-{i:02}").into_bytes())
        .collect();
    let refs: Vec<&[u8]> = payloads.iter().map(Vec::as_slice).collect();

    let results = send_all(relay.addr(), &config, &refs).await;
    assert!(results.iter().all(Result::is_ok));

    let got = receiver.await.unwrap();
    assert_eq!(got, payloads, "in-order, duplicate-free despite 20% loss");
    relay.shutdown();
}

// ---------------------------------------------------------------------------
// Test 9: oversized submission is rejected without touching the wire
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_oversized_submission_rejected() {
    let (addr, receiver) = collecting_receiver(1).await;

    let config = SessionConfig {
        max_segment_size: 8,
        ..test_config()
    };
    let results = send_all(addr, &config, &[b"fits", b"definitely too large"]).await;

    assert_eq!(results[0], Ok(()));
    assert!(matches!(results[1], Err(DeliveryError::Rejected(_))));

    let got = receiver.await.unwrap();
    assert_eq!(got, vec![b"fits".to_vec()]);
}

// ---------------------------------------------------------------------------
// Test 10: malformed configuration is fatal before any packet is sent
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_zero_window_config_rejected_at_spawn() {
    let channel = ephemeral().await;
    let peer = channel.local_addr();
    let config = SessionConfig {
        window_capacity: 0,
        ..SessionConfig::default()
    };
    assert!(SenderHandle::spawn(channel, peer, &config).is_err());
}

// ---------------------------------------------------------------------------
// Test 11: receiver sequence ends after the consumer closes the session
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_receiver_close_ends_sequence() {
    let channel = ephemeral().await;
    let addr = channel.local_addr();
    let mut session = ReceiverHandle::spawn(channel);

    let sender_channel = ephemeral().await;
    let sender = SenderHandle::spawn(sender_channel, addr, &test_config()).unwrap();
    sender.submit(b"only".to_vec()).await.unwrap();

    assert_eq!(session.recv().await, Some(b"only".to_vec()));
    session.close().await;

    sender.finish().await;
}
