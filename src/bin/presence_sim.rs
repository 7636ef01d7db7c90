//! Presence sensor simulator
//!
//! Publishes room entry detections and exhibit detections to the configured
//! topics so the service can be exercised without real sensors. Simulated
//! visitors walk the rooms in order; each tick either admits a new visitor,
//! moves one forward, or fires a detection at an exhibit.
//!
//! Usage:
//!   cargo run --bin presence-sim -- --config config/dev.toml --rate 5

use clap::Parser;
use presence_stats::infra::Config;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "presence-sim")]
#[command(about = "Publish simulated presence events for local testing")]
struct Args {
    /// Config file path (broker and topics are taken from it)
    #[arg(short, long)]
    config: Option<String>,

    /// Messages per second
    #[arg(long, default_value = "2")]
    rate: u32,

    /// Exhibits per room
    #[arg(long, default_value = "3")]
    exhibits: u32,

    /// Stop after this many messages (0 = run until Ctrl+C)
    #[arg(long, default_value = "0")]
    count: u64,

    /// Seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,
}

/// Where the simulated visitors currently are
struct Museum {
    rooms: u32,
    exhibits: u32,
    visitors: Vec<u32>,
    rng: StdRng,
}

impl Museum {
    fn new(rooms: u32, exhibits: u32, seed: u64) -> Self {
        Self { rooms, exhibits, visitors: Vec::new(), rng: StdRng::seed_from_u64(seed) }
    }

    /// Next message as (is_room_event, payload)
    fn next_event(&mut self) -> (bool, serde_json::Value) {
        let roll: f64 = self.rng.gen();

        if self.visitors.is_empty() || roll < 0.2 {
            self.visitors.push(0);
            return (true, json!({ "id": 0, "detected": true }));
        }

        let index = self.rng.gen_range(0..self.visitors.len());
        let room = self.visitors[index];

        if roll < 0.5 {
            if room + 1 < self.rooms {
                self.visitors[index] = room + 1;
                return (true, json!({ "id": room + 1, "detected": true }));
            }
            // walked out of the last room
            self.visitors.swap_remove(index);
        }

        let exhibit = room * self.exhibits + self.rng.gen_range(0..self.exhibits.max(1));
        let detected = self.rng.gen_bool(0.8);
        (false, json!({ "r_id": room, "id": exhibit.to_string(), "detected": detected }))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = Config::load_from_path(Config::resolve_config_path(args.config.as_deref()));

    let mut options = MqttOptions::new(
        format!("presence-sim-{}", Uuid::now_v7()),
        config.mqtt_host(),
        config.mqtt_port(),
    );
    options.set_keep_alive(Duration::from_secs(config.mqtt_keep_alive_secs()));
    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        options.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(options, 100);

    // Drive the event loop in the background
    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                warn!(error = %e, "sim_mqtt_error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });

    let seed = args.seed.unwrap_or_else(rand::random::<u64>);
    let mut museum = Museum::new(config.room_count(), args.exhibits, seed);
    let period = Duration::from_secs_f64(1.0 / f64::from(args.rate.max(1)));
    let mut interval = tokio::time::interval(period);

    info!(
        host = %config.mqtt_host(),
        port = %config.mqtt_port(),
        rooms = %config.room_count(),
        rate = %args.rate,
        seed = %seed,
        "sim_started"
    );

    let mut sent = 0u64;
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!(sent = %sent, "sim_interrupted");
                break;
            }
        }

        let (is_room, payload) = museum.next_event();
        let topic = if is_room { config.room_topic() } else { config.exhibit_topic() };
        match client.publish(topic, QoS::AtMostOnce, false, payload.to_string()).await {
            Ok(()) => {
                sent += 1;
                debug!(topic = %topic, payload = %payload, "sim_published");
            }
            Err(e) => error!(error = %e, "sim_publish_failed"),
        }

        if args.count > 0 && sent >= args.count {
            info!(sent = %sent, "sim_done");
            break;
        }
    }

    // Give the event loop a moment to flush the last publishes
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}
