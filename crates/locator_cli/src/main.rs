//! Command-line driver for the locator service.
//!
//! Every run builds a fresh in-memory store, seeds a synthetic fleet around a centre
//! point, and prints the requested view as JSON. Accepted updates are appended to the
//! JSON-lines event log under `LOCATOR_EVENT_LOG_DIR`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use locator_core::events::JsonLinesEventLog;
use locator_core::spatial::{destination_point, GeoPoint};
use locator_core::store::MemoryStore;
use locator_core::{load_config, LocationService, LocationUpdate, LocatorConfig, NearbyQuery};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tracing_subscriber::EnvFilter;

const VEHICLE_CLASSES: [&str; 5] = ["sedan", "suv", "premium", "bike", "tricycle"];

#[derive(Parser)]
#[command(name = "locator", about = "Nearby-agent locator and surge engine")]
struct Cli {
    /// Directory for the JSON-lines event log.
    #[arg(long, global = true, env = "LOCATOR_EVENT_LOG_DIR")]
    event_log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Seed agents and demand, then report nearby agents and surge around the centre.
    Simulate {
        #[command(flatten)]
        fleet: FleetArgs,
        /// Demand markers tracked at the centre.
        #[arg(long, default_value_t = 20)]
        demand: usize,
        #[arg(long, default_value_t = 2.0)]
        radius_km: f64,
    },
    /// Nearby search against a seeded fleet.
    Nearby {
        #[command(flatten)]
        fleet: FleetArgs,
        #[arg(long, default_value_t = 2.0)]
        radius_km: f64,
        #[arg(long)]
        vehicle_class: Option<String>,
        /// Query the geo-index instead of the cell neighbourhood.
        #[arg(long)]
        by_radius: bool,
    },
    /// Surge zones around a seeded fleet.
    Surge {
        #[command(flatten)]
        fleet: FleetArgs,
        #[arg(long, default_value_t = 20)]
        demand: usize,
        /// Ring size of the reported zone grid, at most `LOCATOR_MAX_ZONE_RING_K`.
        #[arg(long, default_value_t = 1)]
        k: u32,
        /// Also quote this base fare at the centre.
        #[arg(long)]
        base_fare: Option<f64>,
    },
}

#[derive(Args, Clone)]
struct FleetArgs {
    /// Centre latitude; defaults to Nairobi CBD.
    #[arg(long, default_value_t = -1.2921, allow_hyphen_values = true)]
    lat: f64,
    #[arg(long, default_value_t = 36.8219, allow_hyphen_values = true)]
    lng: f64,
    #[arg(long, default_value_t = 200)]
    agents: usize,
    /// Agents are scattered uniformly over a disc of this radius.
    #[arg(long, default_value_t = 3.0)]
    spread_km: f64,
    /// Share of agents reporting as available.
    #[arg(long, default_value_t = 0.8)]
    available_ratio: f64,
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config()?;
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    if let Some(dir) = cli.event_log_dir {
        config.event_log_dir = dir;
    }
    let (service, writer) = build_service(&config).await?;

    let report = match cli.command {
        Command::Simulate {
            fleet,
            demand,
            radius_km,
        } => {
            seed_fleet(&service, &fleet).await?;
            track_demand(&service, &fleet, demand).await?;
            let nearby = service
                .find_nearby(&NearbyQuery::new(fleet.lat, fleet.lng, radius_km))
                .await?;
            let zone = service.surge_zone_at(fleet.lat, fleet.lng).await?;
            let zones = service.surge_zones(fleet.lat, fleet.lng, None).await?;
            json!({
                "nearby": nearby,
                "surge": zone,
                "zones": zones,
                "telemetry": service.telemetry(),
            })
        }
        Command::Nearby {
            fleet,
            radius_km,
            vehicle_class,
            by_radius,
        } => {
            seed_fleet(&service, &fleet).await?;
            let mut query = NearbyQuery::new(fleet.lat, fleet.lng, radius_km);
            if let Some(class) = vehicle_class {
                query = query.with_vehicle_class(class);
            }
            let result = if by_radius {
                service.find_nearby_by_radius(&query).await?
            } else {
                service.find_nearby(&query).await?
            };
            serde_json::to_value(result)?
        }
        Command::Surge {
            fleet,
            demand,
            k,
            base_fare,
        } => {
            seed_fleet(&service, &fleet).await?;
            track_demand(&service, &fleet, demand).await?;
            let zones = service.surge_zones(fleet.lat, fleet.lng, Some(k)).await?;
            let fare = match base_fare {
                Some(base) => Some(service.surged_fare(fleet.lat, fleet.lng, base).await?),
                None => None,
            };
            json!({ "zones": zones, "fare": fare })
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);

    drop(service);
    writer.await.context("event log writer panicked")?;
    Ok(())
}

async fn build_service(
    config: &LocatorConfig,
) -> anyhow::Result<(LocationService<MemoryStore>, tokio::task::JoinHandle<()>)> {
    let store = Arc::new(MemoryStore::new());
    let _reaper = store.spawn_reaper(config.reaper_interval);
    let log = JsonLinesEventLog::open(
        &config.event_log_dir,
        config.event_log_topic.clone(),
        config.event_log_partitions,
    )
    .await
    .with_context(|| format!("opening event log in {}", config.event_log_dir.display()))?;
    Ok(LocationService::with_event_log(store, Arc::new(log), config))
}

async fn seed_fleet(service: &LocationService<MemoryStore>, fleet: &FleetArgs) -> anyhow::Result<()> {
    let centre = GeoPoint::new(fleet.lat, fleet.lng)?;
    let mut rng = StdRng::seed_from_u64(fleet.seed);
    for i in 0..fleet.agents {
        let distance = fleet.spread_km * rng.gen::<f64>().sqrt();
        let position = destination_point(centre, distance, rng.gen_range(0.0..360.0))?;
        let class = VEHICLE_CLASSES[rng.gen_range(0..VEHICLE_CLASSES.len())];
        let available = rng.gen_bool(fleet.available_ratio.clamp(0.0, 1.0));
        let update = LocationUpdate::new(format!("agent-{i}"), position.lat(), position.lng(), class, available)
            .with_motion(rng.gen_range(0.0..360.0), rng.gen_range(0.0..15.0), rng.gen_range(3.0..25.0));
        service.update_location(update).await?;
    }
    tracing::info!(agents = fleet.agents, spread_km = fleet.spread_km, "fleet seeded");
    Ok(())
}

async fn track_demand(
    service: &LocationService<MemoryStore>,
    fleet: &FleetArgs,
    demand: usize,
) -> anyhow::Result<()> {
    for i in 0..demand {
        service
            .track_request(&format!("request-{i}"), fleet.lat, fleet.lng)
            .await?;
    }
    tracing::info!(demand, "demand tracked");
    Ok(())
}
