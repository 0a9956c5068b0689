//! End-to-end transfers over the in-memory simulator.
//!
//! Both orchestrators run on the same task via `tokio::join!` with tokio's
//! clock paused, so retransmission timeouts elapse instantly and every run
//! is deterministic for a given simulator seed.

use std::time::Duration;

use trtp::simulator::{Simulator, SimulatorConfig};
use trtp::{ReceiveReport, Receiver, SendReport, Sender, TransferError, TransportConfig};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn fast_config() -> TransportConfig {
    TransportConfig::default()
        .with_retransmit_timeout(Duration::from_millis(100))
        .with_idle_timeout(Duration::from_secs(10))
}

/// Deterministic, non-repeating-looking test payload.
fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Run one transfer of `input` and return what the receiver wrote.
async fn transfer(
    input: &[u8],
    sender_cfg: TransportConfig,
    receiver_cfg: TransportConfig,
    to_receiver: SimulatorConfig,
    to_sender: SimulatorConfig,
) -> (
    Result<SendReport, TransferError>,
    Result<ReceiveReport, TransferError>,
    Vec<u8>,
) {
    let (s_link, r_link) = Simulator::pair(to_receiver, to_sender);
    let mut sender = Sender::new(s_link, sender_cfg).expect("sender config");
    let mut receiver = Receiver::new(r_link, receiver_cfg).expect("receiver config");
    let mut sink = Vec::new();

    let (sent, received) = tokio::join!(sender.run(input), receiver.run(&mut sink));
    (sent, received, sink)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Three chunks, the datagram for seq 1 lost once.
#[tokio::test(start_paused = true)]
async fn lost_segment_is_retransmitted_once() {
    let cfg = fast_config().with_chunk_size(4);
    let (sent, received, sink) = transfer(
        b"AAAABBBBCCCC",
        cfg.clone(),
        cfg,
        SimulatorConfig::dropping(&[2]),
        SimulatorConfig::default(),
    )
    .await;

    let sent = sent.expect("sender");
    received.expect("receiver");
    assert_eq!(sink, b"AAAABBBBCCCC");
    assert_eq!(sent.retransmissions_by_seq.get(&1), Some(&1));
    assert_eq!(sent.retransmissions_by_seq.get(&0), None);
}

#[tokio::test(start_paused = true)]
async fn clean_link_needs_no_retransmission() {
    let data = payload(10_000);
    let (sent, received, sink) = transfer(
        &data,
        fast_config(),
        fast_config(),
        SimulatorConfig::default(),
        SimulatorConfig::default(),
    )
    .await;

    let sent = sent.expect("sender");
    let received = received.expect("receiver");
    assert_eq!(sink, data);
    assert_eq!(sent.retransmissions, 0);
    assert_eq!(sent.packets_sent, 20);
    assert_eq!(received.bytes_delivered, 10_000);
    assert_eq!(received.corrupt, 0);
}

#[tokio::test(start_paused = true)]
async fn empty_input_delivers_nothing() {
    let (sent, received, sink) = transfer(
        b"",
        fast_config(),
        fast_config(),
        SimulatorConfig::default(),
        SimulatorConfig::default(),
    )
    .await;

    assert_eq!(sent.expect("sender").packets_sent, 0);
    assert_eq!(received.expect("receiver").acks_sent, 0);
    assert!(sink.is_empty());
}

/// More than 256 segments, so seqnums wrap, with a window that does not
/// divide 256.
#[tokio::test(start_paused = true)]
async fn seqnum_wraparound() {
    let data = payload(1_000);
    let cfg = fast_config().with_chunk_size(3).with_window_size(5);
    let lossy = SimulatorConfig {
        loss_rate: 0.05,
        seed: 3,
        ..SimulatorConfig::default()
    };

    let (sent, received, sink) = transfer(
        &data,
        cfg.clone().with_max_retries(20),
        cfg,
        lossy.clone(),
        SimulatorConfig { seed: 4, ..lossy },
    )
    .await;

    let sent = sent.expect("sender");
    received.expect("receiver");
    assert_eq!(sink, data);
    assert!(sent.packets_sent >= 334);
}

/// Loss, duplication, reordering and corruption in both directions.
#[tokio::test(start_paused = true)]
async fn hostile_link_still_delivers_in_order() {
    let data = payload(20_000);
    let cfg = fast_config()
        .with_chunk_size(100)
        .with_window_size(8)
        .with_max_retries(20)
        .with_stop_repeats(10);
    let faults = |seed| SimulatorConfig {
        loss_rate: 0.1,
        duplicate_rate: 0.05,
        reorder_rate: 0.1,
        corrupt_rate: 0.05,
        drop_nth: Vec::new(),
        seed,
    };

    let (sent, received, sink) = transfer(&data, cfg.clone(), cfg, faults(11), faults(12)).await;

    let sent = sent.expect("sender");
    let received = received.expect("receiver");
    assert_eq!(sink.len(), data.len());
    assert!(sink == data, "delivered stream differs from input");
    assert!(sent.retransmissions > 0);
    assert_eq!(received.packets_delivered, 200);
}

/// A receiver with a smaller buffer caps the sender through its advertised
/// window.
#[tokio::test(start_paused = true)]
async fn small_receive_window_is_honoured() {
    let data = payload(3_000);
    let (sent, received, sink) = transfer(
        &data,
        fast_config().with_chunk_size(50),
        fast_config().with_window_size(4),
        SimulatorConfig::default(),
        SimulatorConfig::default(),
    )
    .await;

    sent.expect("sender");
    received.expect("receiver");
    assert_eq!(sink, data);
}

#[tokio::test(start_paused = true)]
async fn unreachable_receiver_fails_the_sender() {
    let (s_link, _r_link) = Simulator::pair(
        SimulatorConfig {
            loss_rate: 1.0,
            ..SimulatorConfig::default()
        },
        SimulatorConfig::default(),
    );
    let mut sender = Sender::new(s_link, fast_config().with_max_retries(3)).unwrap();

    let err = sender.run(&b"hello"[..]).await.unwrap_err();
    assert!(matches!(err, TransferError::MaxRetriesExceeded { seq: 0, .. }));
    assert_eq!(sender.link().stats().dropped, 4);
}
