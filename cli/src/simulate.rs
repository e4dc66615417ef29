// In-process quiz session: one host and several guests on a loopback hub

use anyhow::{Context, Result};
use quizmesh_core::{LocalHub, SessionConfig, SessionNode};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// How long devices get to find each other before the round starts
const LINK_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SimulationOptions {
    pub session: SessionConfig,
    pub guests: usize,
    pub accuracy: f64,
    pub seed: Option<u64>,
}

pub struct DeviceReport {
    pub name: String,
    pub endpoint_id: String,
    pub final_score: u32,
    pub scoreboard: String,
}

pub struct SimulationReport {
    pub devices: Vec<DeviceReport>,
    /// Every device holds every other device's final score
    pub converged: bool,
}

struct SimDevice {
    name: String,
    endpoint_id: String,
    node: Arc<SessionNode>,
    pump: JoinHandle<()>,
}

fn spawn_device(hub: &LocalHub, name: &str, config: &SessionConfig) -> Result<SimDevice> {
    let (transport, events) = hub.register_generated(name);
    let endpoint_id = transport.endpoint_id().to_string();
    let node = Arc::new(
        SessionNode::new(config.clone(), Arc::new(transport))
            .with_context(|| format!("Failed to create {}", name))?,
    );
    let pump = {
        let node = Arc::clone(&node);
        tokio::spawn(async move { node.run(events).await })
    };
    debug!("{} registered as {}", name, endpoint_id);
    Ok(SimDevice {
        name: name.to_string(),
        endpoint_id,
        node,
        pump,
    })
}

fn converged(devices: &[SimDevice]) -> bool {
    devices.iter().all(|device| {
        devices
            .iter()
            .filter(|other| other.endpoint_id != device.endpoint_id)
            .all(|other| {
                device
                    .node
                    .tracker()
                    .endpoint(&other.endpoint_id)
                    .map_or(false, |r| r.finished && r.score == other.node.tracker().local_score())
            })
    })
}

async fn wait_for<F: Fn() -> bool>(condition: F, limit: Duration) -> bool {
    let poll = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(limit, poll).await.is_ok()
}

pub async fn run(options: SimulationOptions) -> Result<SimulationReport> {
    options.session.validate().context("Invalid session settings")?;
    if !(0.0..=1.0).contains(&options.accuracy) {
        anyhow::bail!("accuracy must be between 0 and 1");
    }
    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let hub = LocalHub::new(&options.session.service_id);
    let mut devices = vec![spawn_device(&hub, "host", &options.session)?];
    devices[0]
        .node
        .start_advertising()
        .context("Host failed to advertise")?;

    for n in 1..=options.guests {
        let guest = spawn_device(&hub, &format!("guest-{}", n), &options.session)?;
        guest
            .node
            .start_discovery()
            .with_context(|| format!("{} failed to discover", guest.name))?;
        devices.push(guest);
    }

    let host = Arc::clone(&devices[0].node);
    let guests = options.guests;
    if !wait_for(|| host.tracker().count_direct_connections() == guests, LINK_TIMEOUT).await {
        anyhow::bail!("Guests did not all connect within {:?}", LINK_TIMEOUT);
    }
    info!("{} guests connected", guests);

    let rounds: Vec<JoinHandle<Option<u32>>> =
        devices.iter().map(|d| d.node.play_round()).collect();

    // Each device answers twice per clock tick until its round ends
    let mut answering = tokio::time::interval(options.session.tick_interval() / 2);
    while devices.iter().any(|d| d.node.tracker().is_playing()) {
        answering.tick().await;
        for device in &devices {
            if device.node.tracker().is_playing() {
                device.node.answer(rng.gen_bool(options.accuracy));
            }
        }
    }

    let mut finals = Vec::with_capacity(rounds.len());
    for score in futures::future::join_all(rounds).await {
        finals.push(score.context("Round task failed")?.unwrap_or_default());
    }

    let converged = wait_for(|| converged(&devices), options.session.tick_interval() * 2).await;

    let report = SimulationReport {
        devices: devices
            .iter()
            .zip(finals)
            .map(|(device, final_score)| DeviceReport {
                name: device.name.clone(),
                endpoint_id: device.endpoint_id.clone(),
                final_score,
                scoreboard: device.node.scoreboard(),
            })
            .collect(),
        converged,
    };

    for device in &devices {
        device.node.stop();
        device.pump.abort();
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(guests: usize, seed: u64) -> SimulationOptions {
        SimulationOptions {
            session: SessionConfig {
                round_duration_secs: 3,
                tick_interval_ms: 100,
                ..SessionConfig::default()
            },
            guests,
            accuracy: 0.5,
            seed: Some(seed),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulation_converges() {
        let report = run(options(3, 7)).await.unwrap();
        assert!(report.converged);
        assert_eq!(report.devices.len(), 4);
        assert_eq!(report.devices[0].name, "host");

        for device in &report.devices {
            assert!(device.scoreboard.starts_with(&format!("My score: {:03} *", device.final_score)));
            for other in report.devices.iter().filter(|o| o.endpoint_id != device.endpoint_id) {
                let line = format!("{}: {}", other.endpoint_id, other.final_score);
                assert!(device.scoreboard.contains(&line), "{} lacks {}", device.name, line);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_alone() {
        let report = run(options(0, 1)).await.unwrap();
        assert!(report.converged);
        assert_eq!(report.devices.len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_bad_accuracy() {
        let mut bad = options(1, 1);
        bad.accuracy = 2.0;
        assert!(run(bad).await.is_err());
    }
}
