//! Fletch Demo Server
//!
//! Runs an authority and one predicting client in the same process,
//! connected by simulated lossy links, and checks that the client's
//! prediction lands on the authority's state.

use std::time::Duration;
use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fletch::{
    TICK_RATE, VERSION,
    core::fixed::{from_int, DEFAULT_MAX_HEALTH},
    core::vec2::FixedVec2,
    game::{
        archer::ParticipantId,
        input::LocalInput,
        physics::{Segment, Terrain},
        predicted::{snapshot_fingerprint, Predicted},
        world::{Role, SimConfig, World},
    },
    network::{ClientMessage, Link, LinkConfig, ServerMessage},
};

/// Demo knobs, read from `FLETCH_DEMO_*`.
#[derive(Debug, Clone)]
struct DemoConfig {
    link: LinkConfig,
    ticks: u32,
    realtime: bool,
}

impl DemoConfig {
    fn from_env() -> Self {
        let var = |key: &str| std::env::var(key).ok();
        Self {
            link: LinkConfig {
                latency: var("FLETCH_DEMO_LATENCY").and_then(|v| v.parse().ok()).unwrap_or(3),
                loss_period: var("FLETCH_DEMO_LOSS_PERIOD").and_then(|v| v.parse().ok()).unwrap_or(7),
                reorder: var("FLETCH_DEMO_REORDER").map(|v| v == "1" || v == "true").unwrap_or(true),
            },
            ticks: var("FLETCH_DEMO_TICKS").and_then(|v| v.parse().ok()).unwrap_or(600),
            realtime: var("FLETCH_DEMO_REALTIME").map(|v| v == "1" || v == "true").unwrap_or(false),
        }
    }
}

fn arena() -> Terrain {
    let mut terrain = Terrain::flat(0, from_int(-40), from_int(40));
    // A gentle ramp and a wall to stick arrows in
    terrain.push(Segment::new(FixedVec2::from_ints(10, 0), FixedVec2::from_ints(20, 3)));
    terrain.push(Segment::new(FixedVec2::from_ints(30, 0), FixedVec2::from_ints(30, 10)));
    terrain
}

/// Scripted owner: run right, jump now and then, shoot in bursts.
fn scripted_input(tick: u32) -> LocalInput {
    let phase = tick % 180;
    let mut input = LocalInput::new().with_movement(if phase < 90 { 127 } else { -127 }, 0);
    if phase == 45 || phase == 135 {
        input.move_y = 127;
    }
    input.aim_y = ((tick / 7) % 64) as i8;
    if phase % 60 < 40 {
        input.set_flag(LocalInput::FLAG_DRAW, true);
    }
    if phase > 150 {
        input.set_flag(LocalInput::FLAG_SPRINT, true);
    }
    input
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let sim = SimConfig::from_env();
    let demo = DemoConfig::from_env();
    info!("Fletch v{}", VERSION);
    info!("Tick Rate: {} Hz (default {})", sim.tick_rate, TICK_RATE);
    info!(?demo, "demo configuration");

    run_demo(sim, demo).await
}

async fn run_demo(sim: SimConfig, demo: DemoConfig) -> anyhow::Result<()> {
    let participant = ParticipantId::random();
    info!(participant = %participant.to_uuid_string(), "local participant");

    let mut server = World::new(Role::Server, sim.clone(), arena());
    let mut client = World::new(Role::Client { local: participant }, sim.clone(), arena());
    server.start(0);
    server.add_target(FixedVec2::from_ints(25, 2), FixedVec2::from_ints(1, 2), DEFAULT_MAX_HEALTH);

    // Links carry encoded frames so the wire format is exercised too
    let mut up: Link<Vec<u8>> = Link::new(demo.link);
    let mut down: Link<Vec<u8>> = Link::new(demo.link);
    up.send(0, ClientMessage::Join { participant }.to_bytes()?);

    let mut tick_interval = tokio::time::interval(Duration::from_micros(1_000_000 / u64::from(sim.tick_rate.max(1))));
    tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut observed = 0usize;
    for _ in 0..demo.ticks {
        if demo.realtime {
            tick_interval.tick().await;
        }

        let now = server.step().context("server step")?;
        for frame in up.receive(now) {
            let message = ClientMessage::from_bytes(&frame)?;
            match server.receive_client(message) {
                Ok(Some(reply)) => {
                    down.send(now, reply.to_bytes()?);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "client message rejected"),
            }
        }
        for (_, message) in server.server_outbound() {
            down.send(now, message.to_bytes()?);
        }

        for frame in down.receive(now) {
            let message = ServerMessage::from_bytes(&frame)?;
            if let Err(e) = client.receive_server(message) {
                warn!(error = %e, "server message rejected");
            }
        }
        observed += client.drain_events().len();

        if let Some(tick) = client.tick() {
            client.set_local_input(scripted_input(tick));
            client.step().context("client step")?;
            if let Some(message) = client.client_outbound() {
                up.send(now, message.to_bytes()?);
            }
        }

        if now % sim.tick_rate == 0 {
            if let (Some(c), Some(s)) = (client.archer(participant), server.archer(participant)) {
                let (x, y) = c.position().to_floats();
                info!(
                    tick = now,
                    x,
                    y,
                    health = s.health().health() >> 16,
                    corrections = c.locomotion().stats().corrections,
                    "status"
                );
            }
        }
    }

    // Drain: neutral input until the authority reaches the client's tick
    client.set_local_input(LocalInput::new());
    let target = client.tick().context("client never joined")?;
    while server.tick().map_or(false, |t| t < target) {
        let now = server.tick().unwrap_or(0);
        if let Some(message) = client.client_outbound() {
            up.send(now, message.to_bytes()?);
        }
        for frame in up.receive(now) {
            server.receive_client(ClientMessage::from_bytes(&frame)?)?;
        }
        server.step()?;
    }

    let predicted = client.archer(participant).context("client archer")?;
    let authoritative = server.archer(participant).context("server archer")?;
    let ours = snapshot_fingerprint(&predicted.locomotion().entity().snapshot());
    let theirs = snapshot_fingerprint(&authoritative.locomotion().entity().snapshot());

    info!("=== Results ===");
    info!(up = ?up.stats(), down = ?down.stats(), "links");
    info!(stats = ?predicted.locomotion().stats(), "client locomotion prediction");
    info!(stats = ?predicted.bow().stats(), "client bow prediction");
    info!(observed, arrows = server.arrows().len(), "observer events received");
    info!("Server world hash: {}", hex::encode(server.compute_hash()));
    info!("Client snapshot:   {}", ours.map(hex::encode).unwrap_or_default());
    info!("Server snapshot:   {}", theirs.map(hex::encode).unwrap_or_default());

    if ours.is_some() && ours == theirs {
        info!("PREDICTION CONVERGED: snapshots match");
    } else {
        warn!("PREDICTION DIVERGED: snapshots differ");
    }
    Ok(())
}
