//! Session node: one device's side of the quiz session
//!
//! Owns the relay tracker and the session state and turns transport
//! events into tracker operations.

use super::state::{SessionError, SessionEvent, SessionState};
use super::tracker::SessionRelayTracker;
use crate::config::SessionConfig;
use crate::message::{decode_message, encode_message, RelayMessage};
use crate::transport::{ConnectionStatus, ConnectionTransport, EventReceiver, TransportEvent};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct SessionNode {
    pub(super) config: SessionConfig,
    pub(super) tracker: Arc<SessionRelayTracker>,
    state: RwLock<SessionState>,
    local_name: RwLock<Option<String>>,
}

impl SessionNode {
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn ConnectionTransport>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        Ok(Self {
            config,
            tracker: Arc::new(SessionRelayTracker::new(transport)),
            state: RwLock::new(SessionState::Idle),
            local_name: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<SessionRelayTracker> {
        &self.tracker
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Name the transport advertised us under, once advertising succeeded
    pub fn local_name(&self) -> Option<String> {
        self.local_name.read().clone()
    }

    fn apply(&self, event: SessionEvent) -> Result<SessionState, SessionError> {
        let mut state = self.state.write();
        let next = state.next(event)?;
        if next != *state {
            info!("Session {} -> {}", *state, next);
        }
        *state = next;
        Ok(next)
    }

    /// Apply a transition caused by a transport event; refusals are only logged
    fn observe(&self, event: SessionEvent) {
        if let Err(e) = self.apply(event) {
            warn!("{}", e);
        }
    }

    fn transport(&self) -> &Arc<dyn ConnectionTransport> {
        self.tracker.transport()
    }

    /// Become a host: advertise until stopped
    pub fn start_advertising(&self) -> Result<(), SessionError> {
        self.apply(SessionEvent::StartAdvertising)?;
        let result = self.transport().start_advertising(
            &self.config.endpoint_name,
            &self.config.app_identifiers(),
            Duration::ZERO,
        );
        if let Err(e) = result {
            error!("Advertising failed: {}", e);
            self.observe(SessionEvent::TransportFailed);
            return Err(e.into());
        }
        Ok(())
    }

    /// Become a guest: look for hosts of our service until stopped
    pub fn start_discovery(&self) -> Result<(), SessionError> {
        self.apply(SessionEvent::StartDiscovery)?;
        if let Err(e) = self
            .transport()
            .start_discovery(&self.config.service_id, Duration::ZERO)
        {
            error!("Discovery failed: {}", e);
            self.observe(SessionEvent::TransportFailed);
            return Err(e.into());
        }
        Ok(())
    }

    /// Drop every link, forget every peer and end any running round
    pub fn stop(&self) {
        self.transport().stop();
        self.tracker.clear();
        self.tracker.end_round();
        *self.local_name.write() = None;
        self.observe(SessionEvent::Stop);
    }

    /// Pump transport events until the stream closes
    pub async fn run(&self, mut events: EventReceiver) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        debug!("Transport event stream closed");
    }

    pub fn handle_event(&self, event: TransportEvent) {
        debug!("Event: {}", event);
        match event {
            TransportEvent::AdvertisingResult {
                status,
                local_endpoint_name,
            } => {
                if status.is_ok() {
                    info!("Advertising as {} ({:?})", local_endpoint_name, status);
                    *self.local_name.write() = Some(local_endpoint_name);
                } else {
                    error!("Advertising failed: {:?}", status);
                    self.observe(SessionEvent::TransportFailed);
                }
            }
            TransportEvent::ConnectionRequest {
                endpoint_id,
                endpoint_name,
                ..
            } => self.on_connection_request(&endpoint_id, &endpoint_name),
            TransportEvent::ConnectionResponse {
                endpoint_id, status, ..
            } => self.on_connection_response(&endpoint_id, status),
            TransportEvent::EndpointFound(details) => {
                if !self.state().is_discovering() {
                    debug!("Ignoring {}, not discovering", details.endpoint_id);
                    return;
                }
                info!("Found {} ({})", details.endpoint_id, details.name);
                if let Err(e) = self.transport().send_connection_request(
                    &self.config.endpoint_name,
                    &details.endpoint_id,
                    &[],
                ) {
                    warn!("Connection request to {} failed: {}", details.endpoint_id, e);
                }
            }
            TransportEvent::EndpointLost { endpoint_id } => {
                if self.tracker.endpoint(&endpoint_id).is_some() {
                    self.lose_peer(&endpoint_id);
                }
            }
            TransportEvent::MessageReceived {
                endpoint_id,
                payload,
                ..
            } => self.on_message(&endpoint_id, &payload),
            TransportEvent::Disconnected { endpoint_id } => self.lose_peer(&endpoint_id),
        }
    }

    fn on_connection_request(&self, endpoint_id: &str, endpoint_name: &str) {
        if !self.state().is_advertising() {
            info!("Rejecting {}, not hosting", endpoint_id);
            if let Err(e) = self.transport().reject_connection_request(endpoint_id) {
                warn!("Reject of {} failed: {}", endpoint_id, e);
            }
            return;
        }
        if let Err(e) = self.transport().accept_connection_request(endpoint_id, &[]) {
            warn!("Accept of {} failed: {}", endpoint_id, e);
            return;
        }
        info!("Accepted {} ({})", endpoint_id, endpoint_name);
        self.tracker.broadcast_new_connection(endpoint_id);
        self.tracker.add_endpoint(endpoint_id, true, true);
        self.observe(SessionEvent::PeerConnected);
    }

    fn on_connection_response(&self, endpoint_id: &str, status: ConnectionStatus) {
        match status {
            ConnectionStatus::Accepted => {
                info!("Connected to host {}", endpoint_id);
                self.tracker.add_endpoint(endpoint_id, true, false);
                self.observe(SessionEvent::PeerConnected);
                match encode_message(&RelayMessage::GuestReady) {
                    Ok(payload) => {
                        if let Err(e) = self.transport().send_reliable(endpoint_id, &payload) {
                            warn!("Ready notice to {} failed: {}", endpoint_id, e);
                        }
                    }
                    Err(e) => warn!("Cannot encode ready notice: {}", e),
                }
            }
            ConnectionStatus::EndpointNotConnected => {
                warn!("{} is not reachable", endpoint_id);
                if self.tracker.endpoint(endpoint_id).is_some() {
                    self.lose_peer(endpoint_id);
                }
            }
            ConnectionStatus::Rejected => {
                info!("Connection rejected by {}", endpoint_id);
                let stale = self
                    .tracker
                    .endpoint(endpoint_id)
                    .map_or(false, |record| !record.connected);
                if stale {
                    self.tracker.remove_endpoint(endpoint_id, false);
                }
            }
            ConnectionStatus::Internal => {
                error!("Connection to {} failed internally", endpoint_id);
            }
        }
    }

    fn on_message(&self, from: &str, payload: &[u8]) {
        let message = match decode_message(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping message from {}: {}", from, e);
                return;
            }
        };
        debug!("{} from {}", message, from);

        match message {
            RelayMessage::NewConnection(endpoint_id) => {
                let direct = self
                    .tracker
                    .endpoint(&endpoint_id)
                    .map_or(false, |r| r.connected && r.is_direct_connection);
                if direct {
                    debug!("Already linked to announced {}", endpoint_id);
                    return;
                }
                self.tracker.add_endpoint(&endpoint_id, false, false);
            }
            RelayMessage::GuestReady => self.tracker.send_all_connections(from),
            RelayMessage::Score(score) => {
                let subject = if score.is_self_report() {
                    from
                } else {
                    score.endpoint_id.as_str()
                };
                self.tracker
                    .update_player_score(subject, score.score, score.is_final);
            }
            RelayMessage::Disconnected(endpoint_id) => {
                self.tracker.remove_endpoint(&endpoint_id, false)
            }
        }
    }

    fn lose_peer(&self, endpoint_id: &str) {
        self.tracker.remove_endpoint(endpoint_id, true);
        if self.tracker.count_direct_connections() == 0 && self.state().is_connected() {
            self.observe(SessionEvent::AllPeersLost);
        }
    }

    /// `"My score: NNN"` (with ` *` once the round is over) followed by every peer's score
    pub fn scoreboard(&self) -> String {
        let marker = if self.tracker.is_playing() { "" } else { " *" };
        let mut board = format!("My score: {:03}{}", self.tracker.local_score(), marker);
        let scores = self.tracker.retrieve_scores();
        if !scores.is_empty() {
            board.push('\n');
            board.push_str(&scores);
        }
        board
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::state::Role;
    use crate::transport::abstraction::MockConnectionTransport;
    use crate::transport::{AdvertisingStatus, EndpointDetails, TransportError};

    fn node_with(mock: MockConnectionTransport) -> SessionNode {
        SessionNode::new(SessionConfig::default(), Arc::new(mock)).unwrap()
    }

    fn hosting_mock() -> MockConnectionTransport {
        let mut mock = MockConnectionTransport::new();
        mock.expect_start_advertising().returning(|_, _, _| Ok(()));
        mock
    }

    fn message(from: &str, payload: &[u8]) -> TransportEvent {
        TransportEvent::MessageReceived {
            endpoint_id: from.to_string(),
            payload: payload.to_vec(),
            reliable: true,
        }
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = SessionConfig::default();
        config.service_id.clear();
        let result = SessionNode::new(config, Arc::new(MockConnectionTransport::new()));
        assert!(matches!(result, Err(SessionError::Config(_))));
    }

    #[test]
    fn test_start_advertising_uses_config() {
        let mut mock = MockConnectionTransport::new();
        mock.expect_start_advertising()
            .withf(|name, ids, duration| {
                name.is_empty()
                    && ids == ["org.quizmesh.app".to_string()]
                    && *duration == Duration::ZERO
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        let node = node_with(mock);
        node.start_advertising().unwrap();
        assert_eq!(node.state(), SessionState::Advertising);
    }

    #[test]
    fn test_advertising_refused_marks_failed() {
        let mut mock = MockConnectionTransport::new();
        mock.expect_start_advertising()
            .returning(|_, _, _| Err(TransportError::Internal("radio off".to_string())));
        let node = node_with(mock);
        assert!(matches!(
            node.start_advertising(),
            Err(SessionError::Transport(_))
        ));
        assert_eq!(node.state(), SessionState::Failed);
    }

    #[test]
    fn test_advertising_error_status_marks_failed() {
        let node = node_with(hosting_mock());
        node.start_advertising().unwrap();
        node.handle_event(TransportEvent::AdvertisingResult {
            status: AdvertisingStatus::NetworkNotConnected,
            local_endpoint_name: String::new(),
        });
        assert_eq!(node.state(), SessionState::Failed);
    }

    #[test]
    fn test_cannot_discover_while_advertising() {
        let node = node_with(hosting_mock());
        node.start_advertising().unwrap();
        assert!(matches!(
            node.start_discovery(),
            Err(SessionError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_connection_request_is_accepted_and_announced() {
        let mut mock = hosting_mock();
        mock.expect_accept_connection_request()
            .returning(|_, _| Ok(()));
        mock.expect_send_reliable_to_many()
            .withf(|ids, payload| ids == ["A".to_string()] && payload == b"cB")
            .times(1)
            .returning(|_, _| Ok(()));
        let node = node_with(mock);
        node.start_advertising().unwrap();

        for id in ["A", "B"] {
            node.handle_event(TransportEvent::ConnectionRequest {
                endpoint_id: id.to_string(),
                endpoint_name: id.to_lowercase(),
                payload: Vec::new(),
            });
        }

        assert_eq!(node.state(), SessionState::Connected(Role::Host));
        let b = node.tracker().endpoint("B").unwrap();
        assert!(b.is_host && b.is_direct_connection && b.connected);
    }

    #[test]
    fn test_connection_request_rejected_when_not_hosting() {
        let mut mock = MockConnectionTransport::new();
        mock.expect_reject_connection_request()
            .withf(|id| id == "A")
            .times(1)
            .returning(|_| Ok(()));
        let node = node_with(mock);
        node.handle_event(TransportEvent::ConnectionRequest {
            endpoint_id: "A".to_string(),
            endpoint_name: "a".to_string(),
            payload: Vec::new(),
        });
        assert!(node.tracker().endpoint("A").is_none());
    }

    #[test]
    fn test_guest_connects_and_reports_ready() {
        let mut mock = MockConnectionTransport::new();
        mock.expect_start_discovery()
            .withf(|service, _| service == "quizmesh")
            .returning(|_, _| Ok(()));
        mock.expect_send_connection_request()
            .withf(|_, id, _| id == "H")
            .times(1)
            .returning(|_, _, _| Ok(()));
        mock.expect_send_reliable()
            .withf(|to, payload| to == "H" && payload == b"n")
            .times(1)
            .returning(|_, _| Ok(()));
        let node = node_with(mock);
        node.start_discovery().unwrap();

        node.handle_event(TransportEvent::EndpointFound(EndpointDetails {
            endpoint_id: "H".to_string(),
            name: "host".to_string(),
            service_id: "quizmesh".to_string(),
        }));
        node.handle_event(TransportEvent::ConnectionResponse {
            endpoint_id: "H".to_string(),
            status: ConnectionStatus::Accepted,
            payload: Vec::new(),
        });

        assert_eq!(node.state(), SessionState::Connected(Role::Guest));
        let host = node.tracker().endpoint("H").unwrap();
        assert!(host.is_direct_connection && !host.is_host);
    }

    #[test]
    fn test_relay_messages_update_tracker() {
        let mut mock = MockConnectionTransport::new();
        mock.expect_send_unreliable().times(0);
        let node = node_with(mock);
        node.tracker().add_endpoint("H", true, false);

        node.handle_event(message("H", b"cG1"));
        node.handle_event(message("H", b"i02G14"));
        node.handle_event(message("H", b"f12Broadcast_me6"));
        node.handle_event(message("H", b"dG1"));

        let g1 = node.tracker().endpoint("G1").unwrap();
        assert!(!g1.is_direct_connection);
        assert!(!g1.connected);
        assert_eq!(g1.score, 4);
        let host = node.tracker().endpoint("H").unwrap();
        assert_eq!(host.score, 6);
        assert!(host.finished);
        assert!(host.connected);
    }

    #[test]
    fn test_announcement_does_not_downgrade_direct_link() {
        let node = node_with(MockConnectionTransport::new());
        node.tracker().add_endpoint("H", true, false);
        node.handle_event(message("X", b"cH"));
        assert!(node.tracker().endpoint("H").unwrap().is_direct_connection);
    }

    #[test]
    fn test_guest_ready_sends_known_peers() {
        let mut mock = MockConnectionTransport::new();
        mock.expect_send_reliable()
            .withf(|to, payload| to == "G2" && payload == b"cG1")
            .times(1)
            .returning(|_, _| Ok(()));
        let node = node_with(mock);
        node.tracker().add_endpoint("G1", true, true);
        node.tracker().add_endpoint("G2", true, true);
        node.handle_event(message("G2", b"n"));
    }

    #[test]
    fn test_garbage_is_dropped() {
        let node = node_with(MockConnectionTransport::new());
        node.tracker().add_endpoint("H", true, false);
        node.handle_event(message("H", b""));
        node.handle_event(message("H", b"x"));
        node.handle_event(message("H", b"i99E"));
        assert_eq!(node.tracker().endpoint("H").unwrap().score, 0);
    }

    #[test]
    fn test_losing_last_guest_returns_to_advertising() {
        let mut mock = hosting_mock();
        mock.expect_accept_connection_request()
            .returning(|_, _| Ok(()));
        mock.expect_send_reliable_to_many().returning(|_, _| Ok(()));
        let node = node_with(mock);
        node.start_advertising().unwrap();
        for id in ["A", "B"] {
            node.handle_event(TransportEvent::ConnectionRequest {
                endpoint_id: id.to_string(),
                endpoint_name: String::new(),
                payload: Vec::new(),
            });
        }

        node.handle_event(TransportEvent::Disconnected {
            endpoint_id: "A".to_string(),
        });
        assert_eq!(node.state(), SessionState::Connected(Role::Host));
        node.handle_event(TransportEvent::Disconnected {
            endpoint_id: "B".to_string(),
        });
        assert_eq!(node.state(), SessionState::Advertising);
        assert_eq!(node.tracker().snapshot().len(), 2);
    }

    #[test]
    fn test_rejection_drops_stale_record_only() {
        let node = node_with(MockConnectionTransport::new());
        node.tracker().add_endpoint("H", true, false);
        node.handle_event(TransportEvent::ConnectionResponse {
            endpoint_id: "H".to_string(),
            status: ConnectionStatus::Rejected,
            payload: Vec::new(),
        });
        assert!(node.tracker().endpoint("H").unwrap().connected);
    }

    #[test]
    fn test_stop_clears_everything() {
        let mut mock = hosting_mock();
        mock.expect_stop().times(1).return_const(());
        let node = node_with(mock);
        node.start_advertising().unwrap();
        node.tracker().add_endpoint("A", true, true);
        node.tracker().begin_round();

        node.stop();
        assert_eq!(node.state(), SessionState::Idle);
        assert!(node.tracker().snapshot().is_empty());
        assert!(!node.tracker().is_playing());
    }

    #[test]
    fn test_scoreboard_format() {
        let mut mock = MockConnectionTransport::new();
        mock.expect_send_unreliable().returning(|_, _| Ok(()));
        let node = node_with(mock);
        assert_eq!(node.scoreboard(), "My score: 000 *");

        node.tracker().add_endpoint("G1", true, false);
        node.tracker().update_player_score("G1", 12, false);
        node.tracker().begin_round();
        node.tracker().record_correct_answer();
        assert_eq!(node.scoreboard(), "My score: 001\nG1: 12");
    }
}
