// Shared harness: several session nodes on one loopback hub

#![allow(dead_code)]

use quizmesh_core::{EventReceiver, LocalHub, SessionConfig, SessionNode};
use std::sync::Arc;

pub struct Device {
    pub id: String,
    pub node: SessionNode,
    pub events: EventReceiver,
}

impl Device {
    pub fn join(hub: &LocalHub, id: &str, config: SessionConfig) -> Self {
        let (transport, events) = hub.register(id, id);
        let node = SessionNode::new(config, Arc::new(transport)).expect("valid config");
        Self {
            id: id.to_string(),
            node,
            events,
        }
    }

    /// Handle every queued event; returns how many there were
    pub fn drain(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.node.handle_event(event);
            handled += 1;
        }
        handled
    }
}

/// Deliver events round-robin until every queue is empty
pub fn settle(devices: &mut [Device]) {
    loop {
        let handled: usize = devices.iter_mut().map(Device::drain).sum();
        if handled == 0 {
            break;
        }
    }
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .try_init()
        .ok();
}

/// A host `H` with `guests` guests `G1..Gn`, all linked
pub fn star(hub: &LocalHub, guests: usize, config: &SessionConfig) -> Vec<Device> {
    let mut devices = vec![Device::join(hub, "H", config.clone())];
    devices[0].node.start_advertising().expect("host advertises");
    settle(&mut devices);

    for n in 1..=guests {
        let guest = Device::join(hub, &format!("G{}", n), config.clone());
        guest.node.start_discovery().expect("guest discovers");
        devices.push(guest);
        settle(&mut devices);
    }
    devices
}
