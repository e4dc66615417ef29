// Timed quiz rounds over the loopback hub, with the tokio clock paused

mod common;

use common::{init_tracing, settle, star};
use quizmesh_core::{LocalHub, SessionConfig};
use std::time::Duration;

fn quick_rounds() -> SessionConfig {
    SessionConfig {
        round_duration_secs: 5,
        ..SessionConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_every_device_ends_with_every_final_score() {
    init_tracing();
    let hub = LocalHub::new("quizmesh");
    let mut devices = star(&hub, 3, &quick_rounds());

    let handles: Vec<_> = devices.iter().map(|d| d.node.play_round()).collect();
    let correct = [4u32, 1, 0, 3];
    for (device, n) in devices.iter().zip(correct) {
        for _ in 0..n {
            device.node.answer(true);
        }
    }

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(devices.iter().all(|d| d.node.time_remaining() == 3));
    settle(&mut devices);

    for handle in handles {
        assert!(handle.await.unwrap().is_some());
    }
    settle(&mut devices);
    println!("✓ All rounds finished");

    for (i, device) in devices.iter().enumerate() {
        assert!(!device.node.tracker().is_playing());
        assert!(device.node.scoreboard().starts_with(&format!("My score: {:03} *", correct[i])));

        for (j, other) in devices.iter().enumerate().filter(|(j, _)| *j != i) {
            let record = device.node.tracker().endpoint(&other.id).unwrap();
            assert_eq!(record.score, correct[j], "{} sees {}", device.id, other.id);
            assert!(record.finished, "{} has no final score from {}", device.id, other.id);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_leaving_reports_final_score_early() {
    init_tracing();
    let hub = LocalHub::new("quizmesh");
    let mut devices = star(&hub, 2, &quick_rounds());

    let round = devices[1].node.play_round();
    devices[1].node.answer(true);
    devices[1].node.answer(true);
    assert!(devices[1].node.leave_round());
    assert_eq!(devices[1].node.answer(true), None);

    assert_eq!(round.await.unwrap(), Some(2));
    settle(&mut devices);

    for observer in [&devices[0], &devices[2]] {
        let record = observer.node.tracker().endpoint("G1").unwrap();
        assert_eq!(record.score, 2);
        assert!(record.finished);
    }
    assert!(devices[1].node.time_remaining() > 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_round() {
    init_tracing();
    let hub = LocalHub::new("quizmesh");
    let mut devices = star(&hub, 1, &quick_rounds());

    let round = devices[0].node.play_round();
    devices[0].node.answer(true);
    settle(&mut devices);
    devices[0].node.stop();

    assert_eq!(round.await.unwrap(), Some(1));
    settle(&mut devices);
    // the final score had nobody left to reach
    let host = devices[1].node.tracker().endpoint("H").unwrap();
    assert_eq!(host.score, 1);
    assert!(!host.connected);
}
