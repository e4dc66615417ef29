//! Session relay tracker
//!
//! Keeps the local view of every peer seen during a session and relays
//! connection topology and score changes across a host-centred star, so
//! that guests which only have a link to the host still learn about each
//! other and see each other's scores.
//!
//! Nothing here fails loudly: unknown endpoints, encode failures and
//! refused sends are logged and the action is skipped.

use crate::message::{build_score_payload, encode_message, RelayMessage, SELF_SUBJECT};
use crate::transport::ConnectionTransport;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything known about one remote peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRecord {
    pub endpoint_id: String,
    /// Reachable, directly or through the host
    pub connected: bool,
    /// Final score received, or the peer left
    pub finished: bool,
    /// We advertised and accepted this link, so we relay its events
    pub is_host: bool,
    /// We hold a transport link to it; relayed peers are bookkeeping only
    pub is_direct_connection: bool,
    /// Never decreases
    pub score: u32,
}

impl EndpointRecord {
    fn new(endpoint_id: &str, is_direct_connection: bool, is_host: bool) -> Self {
        Self {
            endpoint_id: endpoint_id.to_string(),
            connected: true,
            finished: false,
            is_host,
            is_direct_connection,
            score: 0,
        }
    }

    /// Direct link we coordinate
    fn is_hosted_link(&self) -> bool {
        self.connected && self.is_direct_connection && self.is_host
    }
}

/// Result of advancing the round clock by one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundTick {
    Running { remaining_secs: u32 },
    /// The round is over; `final_score` is what should be broadcast
    Finished { final_score: u32 },
    /// A newer round was started, the caller's timer is stale
    Superseded,
}

#[derive(Debug, Default)]
struct TrackerState {
    endpoints: BTreeMap<String, EndpointRecord>,
    local_score: u32,
    playing: bool,
    elapsed_secs: u32,
    round: u64,
}

pub struct SessionRelayTracker {
    transport: Arc<dyn ConnectionTransport>,
    state: Mutex<TrackerState>,
}

impl SessionRelayTracker {
    pub fn new(transport: Arc<dyn ConnectionTransport>) -> Self {
        Self {
            transport,
            state: Mutex::new(TrackerState::default()),
        }
    }

    pub fn transport(&self) -> &Arc<dyn ConnectionTransport> {
        &self.transport
    }

    /// Insert a record, or reset an existing one to connected keeping its score
    pub fn add_endpoint(&self, endpoint_id: &str, is_direct: bool, is_host: bool) {
        let mut state = self.state.lock();
        match state.endpoints.entry(endpoint_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                if record.connected {
                    warn!("Endpoint {} is already connected", endpoint_id);
                }
                record.connected = true;
                record.finished = false;
                record.is_direct_connection = is_direct;
                record.is_host = is_host;
            }
            Entry::Vacant(entry) => {
                entry.insert(EndpointRecord::new(endpoint_id, is_direct, is_host));
            }
        }
        debug!(
            "Added endpoint {} (direct: {}, host: {})",
            endpoint_id, is_direct, is_host
        );
    }

    /// Mark a peer gone; with `notify`, tell the rest of our star about it
    pub fn remove_endpoint(&self, endpoint_id: &str, notify: bool) {
        let mut state = self.state.lock();
        let Some(record) = state.endpoints.get_mut(endpoint_id) else {
            warn!("Cannot remove unknown endpoint {}", endpoint_id);
            return;
        };
        record.connected = false;
        record.finished = true;
        let relay = notify && record.is_host;
        info!("Endpoint {} disconnected", endpoint_id);

        if !relay {
            return;
        }
        let targets = hosted_links_except(&state, endpoint_id);
        if targets.is_empty() {
            return;
        }
        let payload = match encode_message(&RelayMessage::Disconnected(endpoint_id.to_string())) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Cannot encode disconnect notice for {}: {}", endpoint_id, e);
                return;
            }
        };
        if let Err(e) = self.transport.send_reliable_to_many(&targets, &payload) {
            warn!("Disconnect notice for {} not fully sent: {}", endpoint_id, e);
        }
    }

    /// Records with `connected` set, relayed ones included
    pub fn count_connections(&self) -> usize {
        self.state
            .lock()
            .endpoints
            .values()
            .filter(|r| r.connected)
            .count()
    }

    /// Connected records we hold a transport link to
    pub fn count_direct_connections(&self) -> usize {
        self.state
            .lock()
            .endpoints
            .values()
            .filter(|r| r.connected && r.is_direct_connection)
            .count()
    }

    /// Announce a newly accepted guest to the guests we already host
    pub fn broadcast_new_connection(&self, new_endpoint_id: &str) {
        let state = self.state.lock();
        let targets = hosted_links_except(&state, new_endpoint_id);
        if targets.is_empty() {
            debug!("No peers to announce {} to", new_endpoint_id);
            return;
        }
        let payload = match encode_message(&RelayMessage::NewConnection(new_endpoint_id.to_string())) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Cannot encode announcement of {}: {}", new_endpoint_id, e);
                return;
            }
        };
        debug!("Announcing {} to {:?}", new_endpoint_id, targets);
        if let Err(e) = self.transport.send_reliable_to_many(&targets, &payload) {
            warn!("Announcement of {} not fully sent: {}", new_endpoint_id, e);
        }
    }

    /// Tell `to_id` about every peer we are directly linked to, one message each
    pub fn send_all_connections(&self, to_id: &str) {
        let state = self.state.lock();
        let known = state
            .endpoints
            .values()
            .filter(|r| r.is_direct_connection && r.connected && r.endpoint_id != to_id);

        for record in known {
            let payload = match encode_message(&RelayMessage::NewConnection(record.endpoint_id.clone())) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Cannot encode announcement of {}: {}", record.endpoint_id, e);
                    continue;
                }
            };
            if let Err(e) = self.transport.send_reliable(to_id, &payload) {
                warn!("Cannot send {} to {}: {}", record.endpoint_id, to_id, e);
            }
        }
    }

    /// Store a peer's score unless it is stale; hosts forward it to the rest of the star
    pub fn update_player_score(&self, endpoint_id: &str, score: u32, is_final: bool) {
        let mut state = self.state.lock();
        let Some(record) = state.endpoints.get_mut(endpoint_id) else {
            warn!("Score {} for unknown endpoint {}", score, endpoint_id);
            dump_records(&state);
            return;
        };
        if record.score > score {
            debug!(
                "Ignoring stale score {} for {} (have {})",
                score, endpoint_id, record.score
            );
            return;
        }
        record.score = score;
        record.finished = is_final;
        if !record.is_host {
            return;
        }

        let targets = hosted_links_except(&state, endpoint_id);
        if targets.is_empty() {
            return;
        }
        let payload = match build_score_payload(score, endpoint_id, is_final) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Cannot encode score of {}: {}", endpoint_id, e);
                return;
            }
        };
        for target in &targets {
            if let Err(e) = self.transport.send_unreliable(target, &payload) {
                warn!("Cannot forward score of {} to {}: {}", endpoint_id, target, e);
            }
        }
    }

    /// Report our own score to every peer we are directly linked to
    pub fn broadcast_score(&self, score: u32, is_final: bool) {
        let state = self.state.lock();
        self.send_own_score(&state, score, is_final);
    }

    fn send_own_score(&self, state: &TrackerState, score: u32, is_final: bool) {
        let payload = match build_score_payload(score, SELF_SUBJECT, is_final) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Cannot encode own score: {}", e);
                return;
            }
        };
        let targets = state
            .endpoints
            .values()
            .filter(|r| r.connected && r.is_direct_connection);
        for record in targets {
            if let Err(e) = self.transport.send_unreliable(&record.endpoint_id, &payload) {
                warn!("Cannot send score to {}: {}", record.endpoint_id, e);
            }
        }
    }

    /// `"<id>: <score>"` per known peer, in ascending id order
    pub fn retrieve_scores(&self) -> String {
        self.state
            .lock()
            .endpoints
            .values()
            .map(|r| format!("{}: {}", r.endpoint_id, r.score))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Forget every peer
    pub fn clear(&self) {
        self.state.lock().endpoints.clear();
    }

    pub fn snapshot(&self) -> Vec<EndpointRecord> {
        self.state.lock().endpoints.values().cloned().collect()
    }

    pub fn endpoint(&self, endpoint_id: &str) -> Option<EndpointRecord> {
        self.state.lock().endpoints.get(endpoint_id).cloned()
    }

    pub fn debug_dump(&self) {
        dump_records(&self.state.lock());
    }

    // Round state

    /// Reset the local score and clock; returns the round number
    pub fn begin_round(&self) -> u64 {
        let mut state = self.state.lock();
        state.round += 1;
        state.playing = true;
        state.elapsed_secs = 0;
        state.local_score = 0;
        info!("Round {} started", state.round);
        state.round
    }

    /// Stop playing; returns whether a round was in progress
    pub fn end_round(&self) -> bool {
        let mut state = self.state.lock();
        let was_playing = state.playing;
        state.playing = false;
        if was_playing {
            info!("Round {} over", state.round);
        }
        was_playing
    }

    /// Advance round `round` by one second
    pub fn tick_round(&self, round: u64, duration_secs: u32) -> RoundTick {
        let mut state = self.state.lock();
        if state.round != round {
            return RoundTick::Superseded;
        }
        if !state.playing {
            return RoundTick::Finished {
                final_score: state.local_score,
            };
        }
        state.elapsed_secs = state.elapsed_secs.saturating_add(1);
        if state.elapsed_secs >= duration_secs {
            state.playing = false;
            info!("Round {} timed out", round);
            return RoundTick::Finished {
                final_score: state.local_score,
            };
        }
        RoundTick::Running {
            remaining_secs: duration_secs - state.elapsed_secs,
        }
    }

    /// Count a correct answer and report the new score; `None` outside a round
    pub fn record_correct_answer(&self) -> Option<u32> {
        let mut state = self.state.lock();
        if !state.playing {
            return None;
        }
        state.local_score = state.local_score.saturating_add(1);
        let score = state.local_score;
        self.send_own_score(&state, score, false);
        Some(score)
    }

    pub fn local_score(&self) -> u32 {
        self.state.lock().local_score
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    pub fn time_remaining(&self, duration_secs: u32) -> u32 {
        duration_secs.saturating_sub(self.state.lock().elapsed_secs)
    }
}

fn dump_records(state: &TrackerState) {
    for record in state.endpoints.values() {
        debug!(
            "{}: score {} connected {} finished {} host {} direct {}",
            record.endpoint_id,
            record.score,
            record.connected,
            record.finished,
            record.is_host,
            record.is_direct_connection
        );
    }
}

fn hosted_links_except(state: &TrackerState, excluded: &str) -> Vec<String> {
    state
        .endpoints
        .values()
        .filter(|r| r.endpoint_id != excluded && r.is_hosted_link())
        .map(|r| r.endpoint_id.clone())
        .collect()
}
