//! In-process loopback transport
//!
//! `LocalHub` links any number of [`LocalTransport`] handles living in the
//! same process. Each handle gets its own event receiver, so a test or the
//! CLI simulator can run several sessions side by side and watch the relay
//! protocol converge without radio hardware.

use super::abstraction::{
    AdvertisingStatus, ConnectionStatus, ConnectionTransport, EndpointDetails, TransportError,
    TransportEvent,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Receiving half handed out with every registered endpoint
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

struct EndpointSlot {
    name: String,
    events: mpsc::UnboundedSender<TransportEvent>,
    advertising: bool,
    discovering: bool,
    links: HashSet<String>,
    /// Endpoints waiting for us to accept or reject them
    pending_requests: HashSet<String>,
}

impl EndpointSlot {
    fn emit(&self, event: TransportEvent) {
        trace!("local transport -> {}: {}", self.name, event);
        if self.events.send(event).is_err() {
            debug!("Event receiver for {} is gone", self.name);
        }
    }
}

#[derive(Default)]
struct HubState {
    endpoints: HashMap<String, EndpointSlot>,
}

impl HubState {
    fn emit_to(&self, endpoint_id: &str, event: TransportEvent) {
        if let Some(slot) = self.endpoints.get(endpoint_id) {
            slot.emit(event);
        }
    }

    fn details_of(&self, endpoint_id: &str, service_id: &str) -> Option<EndpointDetails> {
        self.endpoints.get(endpoint_id).map(|slot| EndpointDetails {
            endpoint_id: endpoint_id.to_string(),
            name: slot.name.clone(),
            service_id: service_id.to_string(),
        })
    }

    /// Withdraw an endpoint from advertising, discovery and all links
    fn shut_down(&mut self, endpoint_id: &str, service_id: &str) {
        let (was_advertising, links) = match self.endpoints.get_mut(endpoint_id) {
            Some(slot) => {
                let was_advertising = slot.advertising;
                slot.advertising = false;
                slot.discovering = false;
                slot.pending_requests.clear();
                (was_advertising, slot.links.drain().collect::<Vec<_>>())
            }
            None => return,
        };

        for peer in links {
            if let Some(slot) = self.endpoints.get_mut(&peer) {
                slot.links.remove(endpoint_id);
            }
            self.emit_to(
                &peer,
                TransportEvent::Disconnected {
                    endpoint_id: endpoint_id.to_string(),
                },
            );
        }

        if was_advertising {
            for (id, slot) in &self.endpoints {
                if id != endpoint_id && slot.discovering {
                    slot.emit(TransportEvent::EndpointLost {
                        endpoint_id: endpoint_id.to_string(),
                    });
                }
            }
        }
        debug!("Endpoint {} left service {}", endpoint_id, service_id);
    }
}

/// Shared switchboard for one service id
#[derive(Clone)]
pub struct LocalHub {
    service_id: Arc<str>,
    state: Arc<Mutex<HubState>>,
}

impl LocalHub {
    pub fn new(service_id: &str) -> Self {
        Self {
            service_id: Arc::from(service_id),
            state: Arc::new(Mutex::new(HubState::default())),
        }
    }

    /// Register an endpoint under a chosen id
    ///
    /// Registering an id twice replaces the earlier slot.
    pub fn register(&self, endpoint_id: &str, name: &str) -> (LocalTransport, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let slot = EndpointSlot {
            name: name.to_string(),
            events: tx,
            advertising: false,
            discovering: false,
            links: HashSet::new(),
            pending_requests: HashSet::new(),
        };
        self.state.lock().endpoints.insert(endpoint_id.to_string(), slot);

        let transport = LocalTransport {
            endpoint_id: endpoint_id.to_string(),
            hub: self.clone(),
        };
        (transport, rx)
    }

    /// Register an endpoint with a transport-issued opaque id
    pub fn register_generated(&self, name: &str) -> (LocalTransport, EventReceiver) {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.register(&id[..12], name)
    }

    /// Simulate a device vanishing: its peers see `Disconnected`, its
    /// discoverers see `EndpointLost`, and its event stream ends
    pub fn drop_endpoint(&self, endpoint_id: &str) {
        let mut state = self.state.lock();
        state.shut_down(endpoint_id, &self.service_id);
        state.endpoints.remove(endpoint_id);
    }

    /// Linked peers of an endpoint, sorted
    pub fn links_of(&self, endpoint_id: &str) -> Vec<String> {
        let state = self.state.lock();
        let mut links: Vec<String> = state
            .endpoints
            .get(endpoint_id)
            .map(|slot| slot.links.iter().cloned().collect())
            .unwrap_or_default();
        links.sort();
        links
    }

    pub fn endpoint_count(&self) -> usize {
        self.state.lock().endpoints.len()
    }
}

/// One endpoint's handle onto a [`LocalHub`]
#[derive(Clone)]
pub struct LocalTransport {
    endpoint_id: String,
    hub: LocalHub,
}

impl LocalTransport {
    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }

    fn send(&self, to: &str, payload: &[u8], reliable: bool) -> Result<(), TransportError> {
        let state = self.hub.state.lock();
        let me = state
            .endpoints
            .get(&self.endpoint_id)
            .ok_or(TransportError::Stopped)?;
        if !me.links.contains(to) {
            return Err(TransportError::NotConnected(to.to_string()));
        }
        state.emit_to(
            to,
            TransportEvent::MessageReceived {
                endpoint_id: self.endpoint_id.clone(),
                payload: payload.to_vec(),
                reliable,
            },
        );
        Ok(())
    }
}

impl ConnectionTransport for LocalTransport {
    fn start_advertising(
        &self,
        name: &str,
        app_identifiers: &[String],
        _duration: Duration,
    ) -> Result<(), TransportError> {
        let mut state = self.hub.state.lock();
        let me = state
            .endpoints
            .get_mut(&self.endpoint_id)
            .ok_or(TransportError::Stopped)?;

        if !name.is_empty() {
            me.name = name.to_string();
        }
        let local_endpoint_name = me.name.clone();
        if me.advertising {
            me.emit(TransportEvent::AdvertisingResult {
                status: AdvertisingStatus::AlreadyAdvertising,
                local_endpoint_name,
            });
            return Ok(());
        }
        me.advertising = true;
        me.emit(TransportEvent::AdvertisingResult {
            status: AdvertisingStatus::Success,
            local_endpoint_name,
        });
        debug!(
            "{} advertising {} for {:?}",
            self.endpoint_id, self.hub.service_id, app_identifiers
        );

        if let Some(details) = state.details_of(&self.endpoint_id, &self.hub.service_id) {
            for (id, slot) in &state.endpoints {
                if *id != self.endpoint_id && slot.discovering {
                    slot.emit(TransportEvent::EndpointFound(details.clone()));
                }
            }
        }
        Ok(())
    }

    fn start_discovery(&self, service_id: &str, _duration: Duration) -> Result<(), TransportError> {
        let mut state = self.hub.state.lock();
        let same_service = service_id == &*self.hub.service_id;
        let me = state
            .endpoints
            .get_mut(&self.endpoint_id)
            .ok_or(TransportError::Stopped)?;
        if !same_service {
            debug!("{} discovering unknown service {}", self.endpoint_id, service_id);
            return Ok(());
        }
        me.discovering = true;

        let found: Vec<EndpointDetails> = state
            .endpoints
            .iter()
            .filter(|(id, slot)| **id != self.endpoint_id && slot.advertising)
            .filter_map(|(id, _)| state.details_of(id, service_id))
            .collect();
        for details in found {
            state.emit_to(&self.endpoint_id, TransportEvent::EndpointFound(details));
        }
        Ok(())
    }

    fn send_connection_request(
        &self,
        name: &str,
        endpoint_id: &str,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let mut state = self.hub.state.lock();
        let my_name = match state.endpoints.get(&self.endpoint_id) {
            Some(slot) if name.is_empty() => slot.name.clone(),
            Some(_) => name.to_string(),
            None => return Err(TransportError::Stopped),
        };

        let target_advertising = state
            .endpoints
            .get(endpoint_id)
            .map_or(false, |slot| slot.advertising);

        if target_advertising {
            if let Some(target) = state.endpoints.get_mut(endpoint_id) {
                target.pending_requests.insert(self.endpoint_id.clone());
                target.emit(TransportEvent::ConnectionRequest {
                    endpoint_id: self.endpoint_id.clone(),
                    endpoint_name: my_name,
                    payload: payload.to_vec(),
                });
            }
        } else {
            state.emit_to(
                &self.endpoint_id,
                TransportEvent::ConnectionResponse {
                    endpoint_id: endpoint_id.to_string(),
                    status: ConnectionStatus::EndpointNotConnected,
                    payload: Vec::new(),
                },
            );
        }
        Ok(())
    }

    fn accept_connection_request(
        &self,
        endpoint_id: &str,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let mut state = self.hub.state.lock();
        let me = state
            .endpoints
            .get_mut(&self.endpoint_id)
            .ok_or(TransportError::Stopped)?;
        if !me.pending_requests.remove(endpoint_id) {
            return Err(TransportError::NoPendingRequest(endpoint_id.to_string()));
        }

        let Some(requester) = state.endpoints.get_mut(endpoint_id) else {
            return Err(TransportError::EndpointNotFound(endpoint_id.to_string()));
        };
        requester.links.insert(self.endpoint_id.clone());
        requester.emit(TransportEvent::ConnectionResponse {
            endpoint_id: self.endpoint_id.clone(),
            status: ConnectionStatus::Accepted,
            payload: payload.to_vec(),
        });
        if let Some(me) = state.endpoints.get_mut(&self.endpoint_id) {
            me.links.insert(endpoint_id.to_string());
        }
        Ok(())
    }

    fn reject_connection_request(&self, endpoint_id: &str) -> Result<(), TransportError> {
        let mut state = self.hub.state.lock();
        let me = state
            .endpoints
            .get_mut(&self.endpoint_id)
            .ok_or(TransportError::Stopped)?;
        if !me.pending_requests.remove(endpoint_id) {
            return Err(TransportError::NoPendingRequest(endpoint_id.to_string()));
        }
        state.emit_to(
            endpoint_id,
            TransportEvent::ConnectionResponse {
                endpoint_id: self.endpoint_id.clone(),
                status: ConnectionStatus::Rejected,
                payload: Vec::new(),
            },
        );
        Ok(())
    }

    fn send_reliable(&self, endpoint_id: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.send(endpoint_id, payload, true)
    }

    fn send_reliable_to_many(
        &self,
        endpoint_ids: &[String],
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let mut first_error = None;
        for id in endpoint_ids {
            if let Err(e) = self.send(id, payload, true) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn send_unreliable(&self, endpoint_id: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.send(endpoint_id, payload, false)
    }

    fn stop(&self) {
        self.hub
            .state
            .lock()
            .shut_down(&self.endpoint_id, &self.hub.service_id);
    }
}
