//! Timed quiz round
//!
//! A round runs on its own tokio task which advances the clock once per
//! tick. When the clock runs out, or the player leaves, the task stops
//! the round and reports the final score to every direct peer.

use super::node::SessionNode;
use super::tracker::RoundTick;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

impl SessionNode {
    /// Start a round and its clock
    ///
    /// Must be called from within a tokio runtime. The handle resolves to
    /// the final score, or `None` if another round replaced this one first.
    pub fn play_round(&self) -> JoinHandle<Option<u32>> {
        let round = self.tracker.begin_round();
        let tracker = Arc::clone(&self.tracker);
        let duration_secs = self.config.round_duration_secs;
        let tick = self.config.tick_interval();

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(tick).await;
                match tracker.tick_round(round, duration_secs) {
                    RoundTick::Running { remaining_secs } => {
                        debug!("Time left: {}", remaining_secs);
                    }
                    RoundTick::Finished { final_score } => {
                        info!("Final score {}", final_score);
                        tracker.broadcast_score(final_score, true);
                        return Some(final_score);
                    }
                    RoundTick::Superseded => {
                        debug!("Round {} replaced", round);
                        return None;
                    }
                }
            }
        })
    }

    /// Record an answer; returns the new score for a correct one during a round
    pub fn answer(&self, correct: bool) -> Option<u32> {
        if !correct {
            return None;
        }
        self.tracker.record_correct_answer()
    }

    /// End the round early; the clock task reports the final score on its next tick
    pub fn leave_round(&self) -> bool {
        self.tracker.end_round()
    }

    pub fn time_remaining(&self) -> u32 {
        self.tracker.time_remaining(self.config.round_duration_secs)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::SessionConfig;
    use crate::session::SessionNode;
    use crate::transport::abstraction::MockConnectionTransport;
    use std::sync::Arc;
    use std::time::Duration;

    fn short_round() -> SessionConfig {
        SessionConfig {
            round_duration_secs: 3,
            ..SessionConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_times_out_and_reports_final() {
        let mut mock = MockConnectionTransport::new();
        mock.expect_send_unreliable()
            .withf(|_, payload| payload.first() == Some(&b'i'))
            .times(2)
            .returning(|_, _| Ok(()));
        mock.expect_send_unreliable()
            .withf(|to, payload| to == "H" && payload == b"f12Broadcast_me2")
            .times(1)
            .returning(|_, _| Ok(()));
        let node = SessionNode::new(short_round(), Arc::new(mock)).unwrap();
        node.tracker().add_endpoint("H", true, false);

        let handle = node.play_round();
        assert_eq!(node.answer(true), Some(1));
        assert_eq!(node.answer(false), None);
        assert_eq!(node.answer(true), Some(2));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(node.time_remaining(), 2);
        assert!(node.tracker().is_playing());

        assert_eq!(handle.await.unwrap(), Some(2));
        assert!(!node.tracker().is_playing());
        assert_eq!(node.time_remaining(), 0);
        assert_eq!(node.answer(true), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaving_ends_round_on_next_tick() {
        let mut mock = MockConnectionTransport::new();
        mock.expect_send_unreliable()
            .withf(|_, payload| payload.first() == Some(&b'f'))
            .times(1)
            .returning(|_, _| Ok(()));
        let node = SessionNode::new(SessionConfig::default(), Arc::new(mock)).unwrap();
        node.tracker().add_endpoint("H", true, false);

        let handle = node.play_round();
        assert!(node.leave_round());
        assert_eq!(handle.await.unwrap(), Some(0));
        assert!(node.time_remaining() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_round_supersedes_old_clock() {
        let node =
            SessionNode::new(short_round(), Arc::new(MockConnectionTransport::new())).unwrap();
        let first = node.play_round();
        let second = node.play_round();

        assert_eq!(first.await.unwrap(), None);
        assert_eq!(second.await.unwrap(), Some(0));
    }
}
